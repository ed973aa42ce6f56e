use std::net::SocketAddr;
use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "CareSync";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Access token lifetime: 5 minutes.
pub const DEFAULT_ACCESS_TTL_SECS: i64 = 300;
/// Refresh token lifetime: 1 day.
pub const DEFAULT_REFRESH_TTL_SECS: i64 = 86_400;
/// HS256 secrets shorter than this are rejected.
pub const MIN_JWT_SECRET_LEN: usize = 32;

const DEFAULT_BIND: &str = "127.0.0.1:8000";

/// Default tracing filter when `RUST_LOG` is unset.
pub fn default_log_filter() -> &'static str {
    "caresync=info,tower_http=warn"
}

/// Get the application data directory.
/// ~/CareSync/ on all platforms, falling back to the working directory.
pub fn app_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default database file location.
pub fn default_db_path() -> PathBuf {
    app_data_dir().join("caresync.db")
}

/// Errors raised while reading configuration from the environment.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

/// Runtime configuration, read once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub bind_addr: SocketAddr,
    pub jwt_secret: Vec<u8>,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

impl AppConfig {
    /// Load from `CARESYNC_*` environment variables, with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup (environment in production, a map in tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let db_path = lookup("CARESYNC_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(default_db_path);

        let bind_raw = lookup("CARESYNC_BIND").unwrap_or_else(|| DEFAULT_BIND.to_string());
        let bind_addr = bind_raw.parse().map_err(|e| ConfigError::Invalid {
            var: "CARESYNC_BIND",
            reason: format!("{e}"),
        })?;

        let jwt_secret = match lookup("CARESYNC_JWT_SECRET") {
            Some(secret) if secret.len() >= MIN_JWT_SECRET_LEN => secret.into_bytes(),
            Some(_) => {
                return Err(ConfigError::Invalid {
                    var: "CARESYNC_JWT_SECRET",
                    reason: format!("must be at least {MIN_JWT_SECRET_LEN} bytes"),
                })
            }
            None => {
                tracing::warn!(
                    "CARESYNC_JWT_SECRET not set; generated an ephemeral secret, tokens will not survive a restart"
                );
                rand::random::<[u8; 32]>().to_vec()
            }
        };

        let access_ttl_secs = parse_secs(&lookup, "CARESYNC_ACCESS_TTL_SECS", DEFAULT_ACCESS_TTL_SECS)?;
        let refresh_ttl_secs =
            parse_secs(&lookup, "CARESYNC_REFRESH_TTL_SECS", DEFAULT_REFRESH_TTL_SECS)?;

        Ok(Self {
            db_path,
            bind_addr,
            jwt_secret,
            access_ttl_secs,
            refresh_ttl_secs,
        })
    }
}

fn parse_secs<F>(lookup: &F, var: &'static str, default: i64) -> Result<i64, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => match raw.parse::<i64>() {
            Ok(secs) if secs > 0 => Ok(secs),
            _ => Err(ConfigError::Invalid {
                var,
                reason: format!("expected a positive number of seconds, got {raw:?}"),
            }),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn app_data_dir_ends_with_app_name() {
        assert!(app_data_dir().ends_with("CareSync"));
        assert!(default_db_path().starts_with(app_data_dir()));
    }

    #[test]
    fn defaults_apply_when_unset() {
        let cfg = AppConfig::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(cfg.bind_addr.to_string(), "127.0.0.1:8000");
        assert_eq!(cfg.access_ttl_secs, 300);
        assert_eq!(cfg.refresh_ttl_secs, 86_400);
        assert_eq!(cfg.jwt_secret.len(), 32);
    }

    #[test]
    fn explicit_values_override_defaults() {
        let cfg = AppConfig::from_lookup(lookup_from(&[
            ("CARESYNC_DB_PATH", "/tmp/cs.db"),
            ("CARESYNC_BIND", "0.0.0.0:9000"),
            ("CARESYNC_JWT_SECRET", "0123456789abcdef0123456789abcdef"),
            ("CARESYNC_ACCESS_TTL_SECS", "60"),
        ]))
        .unwrap();
        assert_eq!(cfg.db_path, PathBuf::from("/tmp/cs.db"));
        assert_eq!(cfg.bind_addr.port(), 9000);
        assert_eq!(cfg.access_ttl_secs, 60);
        assert_eq!(cfg.jwt_secret, b"0123456789abcdef0123456789abcdef".to_vec());
    }

    #[test]
    fn short_secret_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[("CARESYNC_JWT_SECRET", "short")]));
        assert!(matches!(err, Err(ConfigError::Invalid { var: "CARESYNC_JWT_SECRET", .. })));
    }

    #[test]
    fn non_positive_ttl_rejected() {
        let err = AppConfig::from_lookup(lookup_from(&[("CARESYNC_REFRESH_TTL_SECS", "0")]));
        assert!(err.is_err());
        let err = AppConfig::from_lookup(lookup_from(&[("CARESYNC_BIND", "not-an-addr")]));
        assert!(err.is_err());
    }

    #[test]
    fn app_version_matches_cargo() {
        assert_eq!(APP_VERSION, env!("CARGO_PKG_VERSION"));
    }
}
