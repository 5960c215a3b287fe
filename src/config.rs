use std::env;
use std::path::PathBuf;
use std::time::Duration;

const APP_DIR: &str = "smurf_radar";

pub const DEFAULT_OPEN_API_URL: &str = "https://open.faceit.com/data/v4";
pub const DEFAULT_LEGACY_API_URL: &str = "https://www.faceit.com/api";
pub const DEFAULT_GAME: &str = "cs2";
pub const DEFAULT_SAMPLE_SIZE: u32 = 20;

#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub api_key: Option<String>,
    pub open_api_url: String,
    pub legacy_api_url: String,
    pub game: String,
    pub sample_size: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            open_api_url: DEFAULT_OPEN_API_URL.to_string(),
            legacy_api_url: DEFAULT_LEGACY_API_URL.to_string(),
            game: DEFAULT_GAME.to_string(),
            sample_size: DEFAULT_SAMPLE_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.min(16)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchConfig {
    pub size: usize,
    pub delay: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            size: 3,
            delay: Duration::from_millis(200),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DetectConfig {
    pub cooldown: Duration,
    pub content_wait: Duration,
    pub content_poll: Duration,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            content_wait: Duration::from_secs(15),
            content_poll: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api: ApiConfig,
    pub retry: RetryPolicy,
    pub batch: BatchConfig,
    pub detect: DetectConfig,
    pub cache_ttl: Duration,
    pub max_matches: Option<u32>,
    pub min_confidence: Option<u8>,
    pub store_path: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Self {
        let api_key = env::var("FACEIT_API_KEY")
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let open_api_url = env::var("FACEIT_OPEN_API_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_OPEN_API_URL.to_string());
        let legacy_api_url = env::var("FACEIT_LEGACY_API_URL")
            .ok()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_LEGACY_API_URL.to_string());
        let game = env::var("STATS_GAME")
            .unwrap_or_else(|_| DEFAULT_GAME.to_string())
            .trim()
            .to_ascii_lowercase();
        let sample_size = env_parse::<u32>("STATS_SAMPLE_SIZE")
            .unwrap_or(DEFAULT_SAMPLE_SIZE)
            .clamp(1, 100);

        let retry = RetryPolicy {
            max_attempts: env_parse::<u32>("RETRY_MAX_ATTEMPTS")
                .unwrap_or(5)
                .clamp(1, 10),
            base_delay: Duration::from_millis(
                env_parse::<u64>("RETRY_BASE_DELAY_MS")
                    .unwrap_or(1000)
                    .min(60_000),
            ),
        };
        let batch = BatchConfig {
            size: env_parse::<usize>("BATCH_SIZE").unwrap_or(3).clamp(1, 10),
            delay: Duration::from_millis(
                env_parse::<u64>("BATCH_DELAY_MS").unwrap_or(200).min(10_000),
            ),
        };
        let detect = DetectConfig {
            cooldown: Duration::from_secs(
                env_parse::<u64>("DETECT_COOLDOWN_SECS").unwrap_or(5).min(600),
            ),
            content_wait: Duration::from_secs(
                env_parse::<u64>("CONTENT_WAIT_SECS").unwrap_or(15).min(120),
            ),
            content_poll: Duration::from_millis(
                env_parse::<u64>("CONTENT_POLL_MS")
                    .unwrap_or(500)
                    .clamp(50, 5_000),
            ),
        };

        Self {
            api: ApiConfig {
                api_key,
                open_api_url,
                legacy_api_url,
                game,
                sample_size,
            },
            retry,
            batch,
            detect,
            cache_ttl: Duration::from_secs(env_parse::<u64>("CACHE_TTL_SECS").unwrap_or(600)),
            max_matches: env_parse::<u32>("SMURF_MAX_MATCHES"),
            min_confidence: env_parse::<u8>("SMURF_MIN_CONFIDENCE").map(|v| v.min(100)),
            store_path: env::var("SMURF_STORE_PATH")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(PathBuf::from)
                .or_else(|| app_cache_dir().map(|dir| dir.join("store.sqlite"))),
        }
    }
}

pub fn app_cache_dir() -> Option<PathBuf> {
    if let Ok(base) = env::var("XDG_CACHE_HOME") {
        if !base.trim().is_empty() {
            return Some(PathBuf::from(base).join(APP_DIR));
        }
    }
    let home = env::var("HOME").ok()?;
    if home.trim().is_empty() {
        return None;
    }
    Some(PathBuf::from(home).join(".cache").join(APP_DIR))
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|val| val.trim().parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::RetryPolicy;
    use std::time::Duration;

    #[test]
    fn backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1000));
        assert_eq!(policy.backoff(1), Duration::from_millis(2000));
        assert_eq!(policy.backoff(4), Duration::from_millis(16000));
    }
}
