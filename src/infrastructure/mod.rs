// Infrastructure layer - External dependencies and adapters
pub mod chunked_json;
pub mod config;
pub mod http_response;
pub mod thingsboard_client;
pub mod thingsboard_ws;
pub mod visual_crossing;
