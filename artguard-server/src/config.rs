//! Server configuration module
//!
//! Handles loading configuration from environment variables with sensible defaults.

use std::net::SocketAddr;
use std::time::Duration;

/// Slack between the processor hand-off deadline and the request deadline.
const REQUEST_TIMEOUT_MARGIN: Duration = Duration::from_secs(1);

/// Server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Server port (default: 3000)
    pub port: u16,
    /// Server host (default: 127.0.0.1)
    pub host: [u8; 4],
    /// Allowed CORS origins, comma-separated (default: allow all in dev)
    pub allowed_origins: Option<Vec<String>>,
    /// Request body limit in MB (default: 50)
    pub body_limit_mb: usize,
    /// Maximum image size per upload in MB (default: 25)
    pub max_file_size_mb: usize,
    /// Request timeout in seconds (default: 30). Raised at runtime when too
    /// short to cover a processor hand-off, see [`Config::request_timeout`].
    pub timeout_secs: u64,
    /// Enable rate limiting (default: false for tests, true when loaded from env)
    pub rate_limit_enabled: bool,
    /// Rate limit: requests per second (default: 10)
    pub rate_limit_per_sec: u64,
    /// Rate limit: burst size (default: 20)
    pub rate_limit_burst: u32,
    /// Emit JSON logs instead of the human-readable format
    pub json_logs: bool,

    /// Postgres URL of the artwork store; in-memory store when unset
    pub database_url: Option<String>,
    /// Database connection pool maximum connections (default: 20)
    pub database_max_connections: u32,
    /// Redis URL of the job store; in-memory store when unset
    pub redis_url: Option<String>,
    /// Job time-to-live in seconds (default: 86400)
    pub job_ttl_secs: u64,

    /// Processor base URL (default: http://localhost:8000)
    pub processor_url: String,
    /// Hard timeout on a processor submission in ms (default: 30000)
    pub processor_timeout_ms: u64,
    /// Bearer token presented to the processor
    pub processor_api_key: Option<String>,
    /// Shared secret the processor presents on callbacks
    pub callback_token: String,
    /// Base URL the processor calls back to (default: http://localhost:3000)
    pub public_url: String,

    /// Consecutive failures before the breaker opens (default: 5)
    pub breaker_failure_threshold: u32,
    /// Seconds the breaker stays open before a trial call (default: 30)
    pub breaker_cooldown_secs: u64,

    /// Upper bound on candidates fetched per similarity query (default: 1000)
    pub similarity_candidate_limit: usize,
    /// Score at or above which a submission is a duplicate (default: 0.95)
    pub duplicate_threshold: f64,
    /// Timeout for each health probe in ms (default: 2000)
    pub health_probe_timeout_ms: u64,
    /// Timeout for every store call in ms (default: 5000)
    pub store_timeout_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 3000,
            host: [127, 0, 0, 1],
            allowed_origins: None, // None = allow all (dev mode)
            body_limit_mb: 50,
            max_file_size_mb: 25,
            timeout_secs: 30,
            rate_limit_enabled: false, // Disabled by default (for tests)
            rate_limit_per_sec: 10,
            rate_limit_burst: 20,
            json_logs: false,
            database_url: None,
            database_max_connections: 20,
            redis_url: None,
            job_ttl_secs: 86_400,
            processor_url: "http://localhost:8000".to_string(),
            processor_timeout_ms: 30_000,
            processor_api_key: None,
            callback_token: "test-callback-token".to_string(),
            public_url: "http://localhost:3000".to_string(),
            breaker_failure_threshold: 5,
            breaker_cooldown_secs: 30,
            similarity_candidate_limit: 1000,
            duplicate_threshold: 0.95,
            health_probe_timeout_ms: 2000,
            store_timeout_ms: 5000,
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Read an absolute http(s) URL, falling back to `default` when the value
/// is missing or does not parse.
fn env_url(key: &str, default: String) -> String {
    match env_opt(key) {
        Some(raw) => match url::Url::parse(&raw) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => raw,
            Ok(parsed) => {
                tracing::warn!(
                    key,
                    scheme = parsed.scheme(),
                    "Unsupported URL scheme, using default"
                );
                default
            }
            Err(e) => {
                tracing::warn!(key, error = %e, "Invalid URL, using default");
                default
            }
        },
        None => default,
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host = std::env::var("HOST")
            .ok()
            .map(|h| {
                if h == "0.0.0.0" {
                    [0, 0, 0, 0]
                } else {
                    [127, 0, 0, 1]
                }
            })
            .unwrap_or(defaults.host);

        let allowed_origins = std::env::var("ALLOWED_ORIGINS").ok().map(|origins| {
            origins
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });

        // Rate limiting enabled by default in production, can be disabled with RATE_LIMIT_ENABLED=false
        let rate_limit_enabled = std::env::var("RATE_LIMIT_ENABLED")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let json_logs = std::env::var("LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let callback_token = env_opt("CALLBACK_TOKEN").unwrap_or_else(|| {
            tracing::warn!("CALLBACK_TOKEN not set: every processor callback will be rejected");
            String::new()
        });

        let port = env_parse("PORT", defaults.port);
        let timeout_secs = env_parse("REQUEST_TIMEOUT_SECS", defaults.timeout_secs);
        let public_url = env_url("PUBLIC_URL", format!("http://localhost:{}", port));

        Self {
            port,
            host,
            allowed_origins,
            body_limit_mb: env_parse("BODY_LIMIT_MB", defaults.body_limit_mb),
            max_file_size_mb: env_parse("MAX_FILE_SIZE_MB", defaults.max_file_size_mb),
            timeout_secs,
            rate_limit_enabled,
            rate_limit_per_sec: env_parse("RATE_LIMIT_PER_SEC", defaults.rate_limit_per_sec),
            rate_limit_burst: env_parse("RATE_LIMIT_BURST", defaults.rate_limit_burst),
            json_logs,
            database_url: env_opt("DATABASE_URL"),
            database_max_connections: env_parse(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            redis_url: env_opt("REDIS_URL"),
            job_ttl_secs: env_parse("JOB_TTL_SECS", defaults.job_ttl_secs),
            processor_url: env_url("PROCESSOR_URL", defaults.processor_url),
            processor_timeout_ms: env_parse("PROCESSOR_TIMEOUT_MS", defaults.processor_timeout_ms),
            processor_api_key: env_opt("PROCESSOR_API_KEY"),
            callback_token,
            public_url,
            breaker_failure_threshold: env_parse(
                "BREAKER_FAILURE_THRESHOLD",
                defaults.breaker_failure_threshold,
            ),
            breaker_cooldown_secs: env_parse(
                "BREAKER_COOLDOWN_SECS",
                defaults.breaker_cooldown_secs,
            ),
            similarity_candidate_limit: env_parse(
                "SIMILARITY_CANDIDATE_LIMIT",
                defaults.similarity_candidate_limit,
            ),
            duplicate_threshold: env_parse("DUPLICATE_THRESHOLD", defaults.duplicate_threshold),
            health_probe_timeout_ms: env_parse(
                "HEALTH_PROBE_TIMEOUT_MS",
                defaults.health_probe_timeout_ms,
            ),
            store_timeout_ms: env_parse("STORE_TIMEOUT_MS", defaults.store_timeout_ms),
        }
    }

    /// Timeout for the whole request.
    ///
    /// A submission makes up to two store calls before the processor call
    /// starts, so the router must wait longer than that chain or a hung
    /// processor surfaces as a bare 408 instead of an upstream timeout.
    pub fn request_timeout(&self) -> Duration {
        let configured = Duration::from_secs(self.timeout_secs);
        let floor = self.processor_timeout() + self.store_timeout() * 2 + REQUEST_TIMEOUT_MARGIN;
        if configured < floor {
            tracing::warn!(
                timeout_secs = self.timeout_secs,
                processor_timeout_ms = self.processor_timeout_ms,
                store_timeout_ms = self.store_timeout_ms,
                effective_ms = floor.as_millis() as u64,
                "Request timeout shorter than a processor hand-off, raising it"
            );
            return floor;
        }
        configured
    }

    /// Get socket address from config
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::from((self.host, self.port))
    }

    /// URL the processor posts completion reports to
    pub fn callback_url(&self) -> String {
        format!(
            "{}/api/v1/callbacks/processor",
            self.public_url.trim_end_matches('/')
        )
    }

    pub fn max_file_size(&self) -> usize {
        self.max_file_size_mb * 1024 * 1024
    }

    pub fn job_ttl(&self) -> Duration {
        Duration::from_secs(self.job_ttl_secs)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms)
    }

    pub fn processor_timeout(&self) -> Duration {
        Duration::from_millis(self.processor_timeout_ms)
    }

    pub fn health_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.health_probe_timeout_ms)
    }
}
