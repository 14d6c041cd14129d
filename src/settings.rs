use crate::error::{Error, Result};
use std::collections::HashMap;
use std::env;

#[derive(Clone, Debug)]
pub struct Settings {
    pub debug: bool,
    pub host: String,
    pub port: u16,
    pub database_url: String,
    /// Prepended to every route registered by a site, e.g. `/api`.
    pub url_prefix: String,
    pub max_body_bytes: usize,
    pub other: HashMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            debug: false,
            host: "127.0.0.1".to_string(),
            port: 8000,
            database_url: "sqlite::memory:".to_string(),
            url_prefix: String::new(),
            max_body_bytes: 2 * 1024 * 1024,
            other: HashMap::new(),
        }
    }
}

impl Settings {
    /// Build settings from `BACKBONE_*` environment variables, falling back
    /// to the defaults for anything unset.
    ///
    /// Unknown `BACKBONE_*` variables end up in `other`, keyed by the
    /// lowercased suffix.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(env::vars())
    }

    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut settings = Settings::default();
        for (key, value) in vars {
            let Some(name) = key.strip_prefix("BACKBONE_") else {
                continue;
            };
            match name {
                "DEBUG" => settings.debug = parse_bool(&key, &value)?,
                "HOST" => settings.host = value,
                "PORT" => {
                    settings.port = value
                        .parse()
                        .map_err(|_| Error::Config(format!("{key} must be a port number")))?
                }
                "DATABASE_URL" => settings.database_url = value,
                "URL_PREFIX" => settings.url_prefix = normalize_prefix(&value),
                "MAX_BODY_BYTES" => {
                    settings.max_body_bytes = value
                        .parse()
                        .map_err(|_| Error::Config(format!("{key} must be a byte count")))?
                }
                _ => {
                    settings.other.insert(name.to_lowercase(), value);
                }
            }
        }
        Ok(settings)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(Error::Config(format!("{key} must be a boolean"))),
    }
}

// "api/" and "/api" both become "/api"; "/" becomes "".
fn normalize_prefix(prefix: &str) -> String {
    let trimmed = prefix.trim_matches('/');
    if trimmed.is_empty() {
        String::new()
    } else {
        format!("/{trimmed}")
    }
}
