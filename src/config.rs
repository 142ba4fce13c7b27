use std::path::PathBuf;

use thiserror::Error;

pub const TOKEN_VAR: &str = "TELEGRAM_BOT_TOKEN";
pub const DATA_FILE_VAR: &str = "DATA_FILE";
pub const DEFAULT_DATA_FILE: &str = "subscriptions_data.json";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("TELEGRAM_BOT_TOKEN environment variable not set")]
    MissingToken,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub token: String,
    pub data_file: PathBuf,
}

impl Config {
    /// Reads the configuration from the environment, honouring a `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Err(e) = dotenvy::dotenv() {
            log::debug!("No .env file loaded: {e}");
        }

        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let token = var(TOKEN_VAR)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ConfigError::MissingToken)?;

        let data_file = var(DATA_FILE_VAR)
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DATA_FILE.to_string());

        Ok(Self {
            token,
            data_file: data_file.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_token_is_an_error() {
        let result = Config::from_vars(vars(&[(DATA_FILE_VAR, "data.json")]));
        assert!(matches!(result, Err(ConfigError::MissingToken)));

        let result = Config::from_vars(vars(&[(TOKEN_VAR, "  ")]));
        assert!(matches!(result, Err(ConfigError::MissingToken)));
    }

    #[test]
    fn data_file_defaults() {
        let config = Config::from_vars(vars(&[(TOKEN_VAR, "123:abc")])).unwrap();
        assert_eq!(config.token, "123:abc");
        assert_eq!(config.data_file, PathBuf::from(DEFAULT_DATA_FILE));

        let config =
            Config::from_vars(vars(&[(TOKEN_VAR, "123:abc"), (DATA_FILE_VAR, "/tmp/x.json")]))
                .unwrap();
        assert_eq!(config.data_file, PathBuf::from("/tmp/x.json"));
    }
}
