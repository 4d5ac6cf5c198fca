use std::env;

/// Worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Base URL of the graph data provider's public API.
    pub provider_base_url: String,

    /// Handle to analyze when running the worker binary.
    pub subject_handle: String,

    /// Handle exempt from the daily refresh quota and always scheduled first.
    pub priority_handle: Option<String>,

    /// Refreshes allowed per handle per UTC calendar day.
    pub daily_refresh_limit: u32,

    /// Max jobs in flight at once.
    pub max_concurrent_jobs: usize,

    /// Scheduler poll interval in seconds.
    pub poll_interval_secs: u64,

    /// Attempts before a job fails terminally.
    pub job_max_attempts: u32,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if required vars are missing.
    pub fn from_env() -> Self {
        Self {
            provider_base_url: env::var("PROVIDER_BASE_URL")
                .unwrap_or_else(|_| "https://public.api.bsky.app".to_string()),
            subject_handle: required_env("SUBJECT_HANDLE"),
            priority_handle: env::var("PRIORITY_HANDLE").ok().filter(|v| !v.is_empty()),
            daily_refresh_limit: parsed_env("DAILY_REFRESH_LIMIT", 5),
            max_concurrent_jobs: parsed_env("MAX_CONCURRENT_JOBS", 2),
            poll_interval_secs: parsed_env("POLL_INTERVAL_SECS", 2),
            job_max_attempts: parsed_env("JOB_MAX_ATTEMPTS", 3),
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a number")),
        Err(_) => default,
    }
}
