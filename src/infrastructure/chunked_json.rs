// Chunked streaming of JSON frames
use async_compression::tokio::bufread::BrotliEncoder;
use axum::body::Body;
use axum::http::{header, Response, StatusCode};
use axum::response::IntoResponse;
use bytes::{BufMut, Bytes, BytesMut};
use futures::stream::Stream;
use futures::StreamExt;
use serde::Serialize;
use tokio::io::AsyncReadExt;

pub const FRAMED_JSON_CONTENT_TYPE: &str = "application/x-ndjson-framed";

/// Create a chunked response where every item becomes one length-prefixed frame
pub fn chunked_json_stream<S, T>(stream: S, compress: bool) -> Result<Response<Body>, StatusCode>
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + Sync + 'static,
{
    let byte_stream = stream.then(move |item| async move { serialize_frame(&item, compress).await });

    let body = Body::from_stream(byte_stream);

    // Frames are compressed individually, so no Content-Encoding header:
    // clients must not try to decompress the HTTP body as a whole.
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, FRAMED_JSON_CONTENT_TYPE)
        .header(header::CACHE_CONTROL, "no-cache")
        .body(body)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Serialize one item: 4-byte big-endian length, then JSON (optionally Brotli)
pub async fn serialize_frame<T: Serialize>(item: &T, compress: bool) -> Result<Bytes, std::io::Error> {
    let json = serde_json::to_vec(item).map_err(std::io::Error::other)?;

    let payload = if compress {
        let mut encoder = BrotliEncoder::new(std::io::Cursor::new(json));
        let mut compressed = Vec::new();
        encoder.read_to_end(&mut compressed).await?;
        compressed
    } else {
        json
    };

    let length = u32::try_from(payload.len()).map_err(std::io::Error::other)?;
    let mut frame = BytesMut::with_capacity(4 + payload.len());
    frame.put_u32(length);
    frame.put_slice(&payload);

    Ok(frame.freeze())
}

/// Stream everything a receiver-like stream yields until it ends
pub fn stream_response<S, T>(stream: S, compress: bool) -> axum::response::Response
where
    S: Stream<Item = T> + Send + 'static,
    T: Serialize + Send + Sync + 'static,
{
    match chunked_json_stream(stream, compress) {
        Ok(response) => response.into_response(),
        Err(status) => status.into_response(),
    }
}
