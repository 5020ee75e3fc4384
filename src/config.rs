//! Configuration for the KV engine connection and the GC worker. Modeled on
//! the teacher's `HandleBuilder`: a handful of flat, env-overridable fields
//! rather than a generic config-file loader.
use std::time::Duration;

/// Placeholder for mutual-TLS settings to the KV engine.
///
/// Per spec.md §9 Open Questions, a real deployment must implement
/// certificate loading; this struct only carries the configuration the
/// teacher's `HandleBuilder::add_cert_from_pemfile()` /
/// `danger_accept_invalid_certs()` methods accept. See
/// [`crate::kv::etcd::EtcdEngine::connect`] for where loading is stubbed.
#[derive(Debug, Clone, Default)]
pub struct TlsConfig {
    pub ca_cert_path: Option<String>,
    pub client_cert_path: Option<String>,
    pub client_key_path: Option<String>,
    pub danger_accept_invalid_certs: bool,
}

impl TlsConfig {
    pub fn insecure() -> Self {
        TlsConfig {
            danger_accept_invalid_certs: true,
            ..Default::default()
        }
    }

    pub fn with_ca_cert(mut self, path: impl Into<String>) -> Self {
        self.ca_cert_path = Some(path.into());
        self
    }

    pub fn with_client_identity(mut self, cert_path: impl Into<String>, key_path: impl Into<String>) -> Self {
        self.client_cert_path = Some(cert_path.into());
        self.client_key_path = Some(key_path.into());
        self
    }
}

/// Connection configuration for the KV engine.
#[derive(Debug, Clone)]
pub struct EtcdConfig {
    pub endpoints: Vec<String>,
    pub connect_timeout: Option<Duration>,
    pub tls: Option<TlsConfig>,
}

impl EtcdConfig {
    pub fn new(endpoints: Vec<String>) -> Self {
        EtcdConfig {
            endpoints,
            connect_timeout: Some(Duration::from_secs(5)),
            tls: None,
        }
    }

    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Reads `THEMELIO_ETCD_ENDPOINTS` (comma-separated) from the
    /// environment, defaulting to a single local endpoint.
    pub fn from_environment() -> Self {
        let endpoints = std::env::var("THEMELIO_ETCD_ENDPOINTS")
            .unwrap_or_else(|_| "http://127.0.0.1:2379".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        EtcdConfig::new(endpoints)
    }
}

/// GC worker configuration (spec.md §6.3). All fields have defaults and can
/// be overridden by the named environment variable.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub poll_interval: Duration,
    pub worker_count: usize,
    pub lock_value: String,
    pub lock_ttl: Duration,
    pub batch_limit: i64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        WorkerConfig {
            poll_interval: Duration::from_secs(1),
            worker_count: 3,
            lock_value: unique_lock_value(),
            lock_ttl: Duration::from_secs(5 * 60),
            batch_limit: 10,
        }
    }
}

impl WorkerConfig {
    /// Reads each field from its environment variable, falling back to the
    /// default when unset or unparseable.
    ///
    /// Unlike the source implementation, `lock_value` has no fixed literal
    /// default: spec.md §9 notes that a shared literal across worker
    /// instances causes them to falsely "renew" each other's locks. When
    /// `THEMELIO_LOCK_VALUE` is unset, a unique identity is generated per
    /// process (see [`unique_lock_value`]).
    pub fn from_environment() -> Self {
        let defaults = WorkerConfig::default();
        WorkerConfig {
            poll_interval: env_duration("THEMELIO_POLL_INTERVAL", defaults.poll_interval),
            worker_count: env_parse("THEMELIO_WORKER_COUNT", defaults.worker_count),
            lock_value: std::env::var("THEMELIO_LOCK_VALUE").unwrap_or(defaults.lock_value),
            lock_ttl: env_duration("THEMELIO_LOCK_TTL", defaults.lock_ttl),
            batch_limit: env_parse("THEMELIO_BATCH_LIMIT", defaults.batch_limit),
        }
    }
}

/// A per-process worker identity: hostname plus a random suffix, so that
/// multiple worker instances never collide on the same deletion-lock value.
pub fn unique_lock_value() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "worker".to_string());
    format!("{host}-{}", uuid::Uuid::new_v4())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_duration(name: &str, default: Duration) -> Duration {
    Duration::from_secs(env_parse(name, default.as_secs()))
}
