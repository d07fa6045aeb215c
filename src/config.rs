//! Backend configuration parsed from environment variables.

pub const DEFAULT_PROFILE_TABLE: &str = "users";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required env var {var}")]
    Missing { var: &'static str },
    #[error("invalid value for {var}: {value}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub request_secs: u64,
    pub connect_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self { request_secs: DEFAULT_REQUEST_TIMEOUT_SECS, connect_secs: DEFAULT_CONNECT_TIMEOUT_SECS }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Project base URL without a trailing slash, e.g. `https://xyz.supabase.co`.
    pub url: String,
    /// Public (anon) API key sent as `apikey` on every request.
    pub anon_key: String,
    /// Table holding one profile row per auth user.
    pub profile_table: String,
    pub timeouts: Timeouts,
}

impl BackendConfig {
    #[must_use]
    pub fn new(url: &str, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.trim_end_matches('/').to_owned(),
            anon_key: anon_key.into(),
            profile_table: DEFAULT_PROFILE_TABLE.to_owned(),
            timeouts: Timeouts::default(),
        }
    }

    /// Build typed config from environment variables.
    ///
    /// Required:
    /// - `AUTHKIT_URL`
    /// - `AUTHKIT_ANON_KEY`
    ///
    /// Optional:
    /// - `AUTHKIT_PROFILE_TABLE`: default `users`
    /// - `AUTHKIT_REQUEST_TIMEOUT_SECS`: default 30
    /// - `AUTHKIT_CONNECT_TIMEOUT_SECS`: default 10
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing or empty, the URL
    /// is not http(s), or a timeout is not a positive integer.
    pub fn from_env() -> Result<Self, ConfigError> {
        let url = required("AUTHKIT_URL")?;
        if !(url.starts_with("https://") || url.starts_with("http://")) {
            return Err(ConfigError::Invalid { var: "AUTHKIT_URL", value: url });
        }
        let anon_key = required("AUTHKIT_ANON_KEY")?;

        let mut config = Self::new(&url, anon_key);
        if let Some(table) = std::env::var("AUTHKIT_PROFILE_TABLE")
            .ok()
            .filter(|v| !v.trim().is_empty())
        {
            config.profile_table = table.trim().to_owned();
        }
        config.timeouts = Timeouts {
            request_secs: env_parse_secs("AUTHKIT_REQUEST_TIMEOUT_SECS", DEFAULT_REQUEST_TIMEOUT_SECS)?,
            connect_secs: env_parse_secs("AUTHKIT_CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?,
        };
        Ok(config)
    }

    #[must_use]
    pub fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{path}", self.url)
    }

    #[must_use]
    pub fn table_url(&self) -> String {
        format!("{}/rest/v1/{}", self.url, self.profile_table)
    }
}

fn required(var: &'static str) -> Result<String, ConfigError> {
    std::env::var(var)
        .ok()
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::Missing { var })
}

fn env_parse_secs(var: &'static str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(var) {
        Err(_) => Ok(default),
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(v) if v > 0 => Ok(v),
            _ => Err(ConfigError::Invalid { var, value: raw }),
        },
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
