use crate::reference_data::{KEYS_DATA_PATH_PLACEHOLDER, LOOKUP_CONFIG_FILE};
use crate::resolution_cache::ResolutionCache;
use crate::resolver::ResolverSettings;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_KEYS_DATA_PATH: &str = "/var/oasis/keys_data";

/// Per-client rate limit applied by `tower_governor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    pub per_second: u64,
    pub burst: u32,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub keys_data_path: PathBuf,
    pub lookup_config_file: PathBuf,
    pub resolve_concurrency: usize,
    pub location_timeout: Option<Duration>, // None waits indefinitely
    pub timeout_abort_threshold: Option<usize>,
    pub result_cache_capacity: u64, // 0 disables the cache
    pub result_cache_ttl: Duration,
    pub compress_response: bool,
    pub healthcheck_probe_reference_data: bool,
    pub reload_enabled: bool,
    pub max_payload_bytes: usize,
    pub request_timeout: Duration,
    pub rate_limit: Option<RateLimit>,
}

impl Default for Config {
    fn default() -> Self {
        let keys_data_path = PathBuf::from(DEFAULT_KEYS_DATA_PATH);
        Self {
            port: 5000,
            lookup_config_file: keys_data_path.join(LOOKUP_CONFIG_FILE),
            keys_data_path,
            resolve_concurrency: ResolverSettings::default().concurrency,
            location_timeout: Some(Duration::from_millis(5000)),
            timeout_abort_threshold: None,
            result_cache_capacity: 100_000,
            result_cache_ttl: Duration::from_secs(3600),
            compress_response: false,
            healthcheck_probe_reference_data: false,
            reload_enabled: false,
            max_payload_bytes: 50 * 1024 * 1024,
            request_timeout: Duration::from_secs(300),
            rate_limit: None,
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_var<T: FromStr>(name: &str) -> anyhow::Result<Option<T>> {
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow::anyhow!("{} has an invalid value: '{}'", name, raw)),
        None => Ok(None),
    }
}

fn parse_flag(name: &str) -> anyhow::Result<Option<bool>> {
    match var(name) {
        Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(Some(true)),
            "0" | "false" | "no" | "off" => Ok(Some(false)),
            _ => anyhow::bail!("{} must be true or false, got '{}'", name, raw),
        },
        None => Ok(None),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        let keys_data_path = var("KEYS_DATA_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.keys_data_path);

        let lookup_config_file = var("LOOKUP_CONFIG_FILE")
            .map(|template| {
                PathBuf::from(template.replace(
                    KEYS_DATA_PATH_PLACEHOLDER,
                    &keys_data_path.to_string_lossy(),
                ))
            })
            .unwrap_or_else(|| keys_data_path.join(LOOKUP_CONFIG_FILE));

        let port = parse_var::<u16>("PORT")
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?
            .unwrap_or(defaults.port);
        if port == 0 {
            anyhow::bail!("PORT must be a valid number between 1-65535");
        }

        let resolve_concurrency = parse_var::<usize>("RESOLVE_CONCURRENCY")?
            .unwrap_or(defaults.resolve_concurrency);
        if resolve_concurrency == 0 {
            anyhow::bail!("RESOLVE_CONCURRENCY must be at least 1");
        }

        let location_timeout = match parse_var::<u64>("LOCATION_TIMEOUT_MS")? {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.location_timeout,
        };

        let rate_limit = match (
            parse_var::<u64>("RATE_LIMIT_PER_SECOND")?,
            parse_var::<u32>("RATE_LIMIT_BURST")?,
        ) {
            (None, None) => None,
            (Some(per_second), burst) if per_second > 0 => Some(RateLimit {
                per_second,
                burst: burst
                    .unwrap_or_else(|| (per_second.min(u32::MAX as u64) as u32).saturating_mul(2))
                    .max(1),
            }),
            (Some(_), _) => anyhow::bail!("RATE_LIMIT_PER_SECOND must be at least 1"),
            (None, Some(_)) => {
                anyhow::bail!("RATE_LIMIT_BURST requires RATE_LIMIT_PER_SECOND")
            }
        };

        let config = Self {
            port,
            keys_data_path,
            lookup_config_file,
            resolve_concurrency,
            location_timeout,
            timeout_abort_threshold: parse_var("TIMEOUT_ABORT_THRESHOLD")?,
            result_cache_capacity: parse_var("RESULT_CACHE_CAPACITY")?
                .unwrap_or(defaults.result_cache_capacity),
            result_cache_ttl: parse_var("RESULT_CACHE_TTL_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.result_cache_ttl),
            compress_response: parse_flag("COMPRESS_RESPONSE")?
                .unwrap_or(defaults.compress_response),
            healthcheck_probe_reference_data: parse_flag("HEALTHCHECK_PROBE_REFERENCE_DATA")?
                .unwrap_or(defaults.healthcheck_probe_reference_data),
            reload_enabled: parse_flag("RELOAD_ENABLED")?.unwrap_or(defaults.reload_enabled),
            max_payload_bytes: parse_var("MAX_PAYLOAD_BYTES")?
                .unwrap_or(defaults.max_payload_bytes),
            request_timeout: parse_var("REQUEST_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            rate_limit,
        };

        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Keys data path: {}", config.keys_data_path.display());
        tracing::debug!("Lookup config: {}", config.lookup_config_file.display());
        tracing::debug!(
            "Resolver: concurrency={}, location_timeout={:?}, abort_threshold={:?}",
            config.resolve_concurrency,
            config.location_timeout,
            config.timeout_abort_threshold
        );
        if let Some(limit) = config.rate_limit {
            tracing::info!(
                "Rate limiting enabled: {} req/s, burst {}",
                limit.per_second,
                limit.burst
            );
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }

    /// Uses `keys_data_path` for both the model directory and `lookup.json`.
    pub fn with_keys_data_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.keys_data_path = path.into();
        self.lookup_config_file = self.keys_data_path.join(LOOKUP_CONFIG_FILE);
        self
    }

    pub fn resolver_settings(&self) -> ResolverSettings {
        ResolverSettings {
            concurrency: self.resolve_concurrency,
            location_timeout: self.location_timeout,
            timeout_abort_threshold: self.timeout_abort_threshold,
        }
    }

    pub fn result_cache(&self) -> Option<ResolutionCache> {
        (self.result_cache_capacity > 0)
            .then(|| ResolutionCache::new(self.result_cache_capacity, self.result_cache_ttl))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.port, 5000);
        assert_eq!(
            config.lookup_config_file,
            PathBuf::from("/var/oasis/keys_data/lookup.json")
        );
        assert_eq!(config.location_timeout, Some(Duration::from_secs(5)));
        assert!(config.result_cache().is_some());
        assert!(!config.reload_enabled);
    }

    #[test]
    fn test_zero_capacity_disables_cache() {
        let config = Config {
            result_cache_capacity: 0,
            ..Config::default()
        };
        assert!(config.result_cache().is_none());
    }

    #[test]
    fn test_with_keys_data_path_moves_lookup_config() {
        let config = Config::default().with_keys_data_path("/tmp/model");
        assert_eq!(
            config.lookup_config_file,
            PathBuf::from("/tmp/model/lookup.json")
        );
    }
}
