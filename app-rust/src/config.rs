use std::env;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 4000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Process configuration. The API key is the only credential; every
/// generation parameter is a code constant.
#[derive(Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub api_key: String,
    pub port: u16,
    pub app_url: Option<String>,
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &"<redacted>")
            .field("port", &self.port)
            .field("app_url", &self.app_url)
            .finish()
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("GOOGLE_API_KEY")
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing("GOOGLE_API_KEY"))?;

        let port = match lookup("PORT") {
            Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
                name: "PORT",
                value,
            })?,
            None => DEFAULT_PORT,
        };

        let app_url = lookup("APP_URL").filter(|url| !url.trim().is_empty());

        Ok(Self {
            api_key,
            port,
            app_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn reads_key_and_defaults() {
        let config = AppConfig::from_lookup(lookup(&[("GOOGLE_API_KEY", "abc")])).unwrap();
        assert_eq!(
            config,
            AppConfig {
                api_key: "abc".to_string(),
                port: DEFAULT_PORT,
                app_url: None,
            }
        );
    }

    #[test]
    fn missing_key_is_an_error() {
        assert_eq!(
            AppConfig::from_lookup(lookup(&[("GOOGLE_API_KEY", " ")])),
            Err(ConfigError::Missing("GOOGLE_API_KEY"))
        );
    }

    #[test]
    fn invalid_port_is_reported() {
        let error =
            AppConfig::from_lookup(lookup(&[("GOOGLE_API_KEY", "abc"), ("PORT", "http")]))
                .unwrap_err();
        assert_eq!(
            error,
            ConfigError::Invalid {
                name: "PORT",
                value: "http".to_string(),
            }
        );
    }

    #[test]
    fn debug_output_hides_the_key() {
        let config = AppConfig::from_lookup(lookup(&[
            ("GOOGLE_API_KEY", "secret-key"),
            ("PORT", "8080"),
            ("APP_URL", "http://localhost:4321"),
        ]))
        .unwrap();
        assert_eq!(config.port, 8080);
        assert!(!format!("{config:?}").contains("secret-key"));
    }
}
