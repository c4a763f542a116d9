use crate::application::dashboard_service::Location;
use crate::domain::data_point::{AggregationType, DataPointConfig, DataPointConfigs, ValueTransform};
use crate::domain::telemetry::TimeRange;
use crate::error::TelemetryError;
use crate::infrastructure::thingsboard_ws::RetryPolicy;
use serde::Deserialize;
use std::time::Duration;

pub const VISUAL_CROSSING_URL: &str = "https://weather.visualcrossing.com";

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    pub thingsboard: ThingsboardSettings,
    #[serde(default)]
    pub subscription: SubscriptionSettings,
    #[serde(default)]
    pub weather: WeatherSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_listen")]
    pub listen: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ThingsboardSettings {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub public_id: Option<String>,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credentials {
    Public { public_id: String },
    User { username: String, password: String },
}

impl ThingsboardSettings {
    /// A public id wins over username/password.
    pub fn credentials(&self) -> Result<Credentials, TelemetryError> {
        if let Some(public_id) = &self.public_id {
            return Ok(Credentials::Public {
                public_id: public_id.clone(),
            });
        }
        match (&self.username, &self.password) {
            (Some(username), Some(password)) => Ok(Credentials::User {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => Err(TelemetryError::Config(
                "thingsboard needs either public_id or username and password".to_string(),
            )),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SubscriptionSettings {
    #[serde(default = "default_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_secs")]
    pub reconnect_delay_secs: u64,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: default_reconnect_attempts(),
            reconnect_delay_secs: default_reconnect_delay_secs(),
        }
    }
}

impl SubscriptionSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_reconnect_attempts,
            delay: Duration::from_secs(self.reconnect_delay_secs),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct WeatherSettings {
    pub api_key: Option<String>,
    #[serde(default = "default_weather_url")]
    pub url: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Default for WeatherSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            url: default_weather_url(),
            latitude: None,
            longitude: None,
        }
    }
}

impl WeatherSettings {
    pub fn location(&self) -> Option<Location> {
        Some(Location {
            latitude: self.latitude?,
            longitude: self.longitude?,
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardSettings {
    #[serde(default)]
    pub default_time_range: TimeRange,
    #[serde(default)]
    pub data_points: Vec<DataPointSettings>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DataPointSettings {
    pub key: String,
    pub aggregation: AggregationType,
    pub fraction_digits: Option<u32>,
    /// Expression over `x`, e.g. `x / 1000 * 14`.
    pub transform: Option<String>,
}

impl DashboardSettings {
    pub fn data_point_configs(&self) -> Result<DataPointConfigs, TelemetryError> {
        let mut configs = DataPointConfigs::new();
        for settings in &self.data_points {
            let mut config = DataPointConfig::new(settings.aggregation);
            config.fraction_digits = settings.fraction_digits;
            if let Some(expression) = &settings.transform {
                let transform = ValueTransform::from_expression(expression).map_err(|source| {
                    TelemetryError::Transform {
                        key: settings.key.clone(),
                        source,
                    }
                })?;
                config = config.with_transform(transform);
            }
            if configs.insert(settings.key.clone(), config).is_some() {
                tracing::warn!(key = %settings.key, "Duplicate data point; last definition wins");
            }
        }
        Ok(configs)
    }
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_max_items() -> usize {
    crate::application::dashboard_session::DEFAULT_MAX_ITEMS
}

fn default_reconnect_attempts() -> u32 {
    5
}

fn default_reconnect_delay_secs() -> u64 {
    5
}

fn default_weather_url() -> String {
    VISUAL_CROSSING_URL.to_string()
}

/// `config/app.*`, overridable with `WEATHER__SECTION__KEY` variables.
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/app"))
        .add_source(
            config::Environment::with_prefix("WEATHER")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize()?)
}

pub fn load_dashboard_config() -> anyhow::Result<DashboardSettings> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/dashboard"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
