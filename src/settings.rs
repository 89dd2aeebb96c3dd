use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub debug: bool,
    pub auth_token: String,
    pub enable_swagger: bool,
    pub port: u16,
    /// How many weeks ahead catch-up keeps populated.
    pub horizon_weeks: u32,
    pub catch_up_on_start: bool,
    /// Period of the background catch-up ticker; 0 disables it.
    pub catch_up_interval_secs: u64,
    pub catch_up_timeout_ms: u64,
    pub calendar_name: String,
    pub location: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            // Load from environment variables with APP_ prefix
            .add_source(Environment::with_prefix("APP").try_parsing(true))
            .set_default("debug", false)?
            .set_default("auth_token", "default-token-change-me")?
            .set_default("enable_swagger", true)?
            .set_default("port", 8080)?
            .set_default("horizon_weeks", 4)?
            .set_default("catch_up_on_start", true)?
            .set_default("catch_up_interval_secs", 0)?
            .set_default("catch_up_timeout_ms", 5000)?
            .set_default("calendar_name", "Studio Schedule")?
            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            debug: false,
            auth_token: "default-token-change-me".into(),
            enable_swagger: true,
            port: 8080,
            horizon_weeks: 4,
            catch_up_on_start: true,
            catch_up_interval_secs: 0,
            catch_up_timeout_ms: 5000,
            calendar_name: "Studio Schedule".into(),
            location: None,
        }
    }
}
