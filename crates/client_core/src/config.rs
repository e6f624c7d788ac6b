use std::{collections::HashMap, fmt, path::Path, str::FromStr};

use ::config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ClientError;

pub const ENV_PREFIX: &str = "MEETING_ACTIONS";
pub const DEFAULT_SETTINGS_FILE: &str = "client.toml";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Deployment {
    #[default]
    Development,
    Test,
    Production,
}

impl Deployment {
    pub fn default_base_url(self) -> Option<&'static str> {
        match self {
            Deployment::Development => Some("http://localhost:8080/api"),
            Deployment::Test => Some("http://127.0.0.1:8080/api"),
            Deployment::Production => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Deployment::Development => "development",
            Deployment::Test => "test",
            Deployment::Production => "production",
        }
    }
}

impl fmt::Display for Deployment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Deployment {
    type Err = ClientError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Deployment::Development),
            "test" => Ok(Deployment::Test),
            "production" | "prod" => Ok(Deployment::Production),
            other => Err(ClientError::Configuration(format!(
                "unknown deployment '{other}'"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientSettings {
    #[serde(default)]
    pub deployment: Deployment,
    #[serde(default)]
    pub api_base_url: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            deployment: Deployment::default(),
            api_base_url: None,
            request_timeout_secs: default_timeout_secs(),
        }
    }
}

impl ClientSettings {
    /// Defaults, then the optional settings file, then `MEETING_ACTIONS__*` variables.
    pub fn load(file: Option<&Path>) -> Result<Self, ClientError> {
        Self::load_with(file, None)
    }

    /// Like [`ClientSettings::load`] but reads variables from `env` when given.
    pub fn load_with(
        file: Option<&Path>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ClientError> {
        let file = file.unwrap_or_else(|| Path::new(DEFAULT_SETTINGS_FILE));
        Config::builder()
            .set_default("deployment", Deployment::default().as_str())
            .and_then(|b| b.set_default("request_timeout_secs", default_timeout_secs()))
            .map_err(configuration)?
            .add_source(File::from(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .and_then(|built| built.try_deserialize::<ClientSettings>())
            .map_err(configuration)
    }

    /// The API base URL for this deployment.
    ///
    /// An explicit URL must be absolute http(s). Production has no implicit default.
    pub fn resolve_base_url(&self) -> Result<Url, ClientError> {
        let explicit = self
            .api_base_url
            .as_deref()
            .map(str::trim)
            .filter(|raw| !raw.is_empty());

        let raw = match (explicit, self.deployment.default_base_url()) {
            (Some(raw), _) => raw,
            (None, Some(default)) => default,
            (None, None) => {
                return Err(ClientError::Configuration(format!(
                    "api_base_url must be set for the {} deployment",
                    self.deployment
                )))
            }
        };

        let url = Url::parse(raw).map_err(|err| {
            ClientError::Configuration(format!("api_base_url '{raw}' is not a valid url: {err}"))
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ClientError::Configuration(format!(
                "api_base_url '{raw}' must use http or https"
            )));
        }
        Ok(url)
    }
}

fn configuration(err: ConfigError) -> ClientError {
    ClientError::Configuration(err.to_string())
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
