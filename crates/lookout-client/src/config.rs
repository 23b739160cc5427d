use std::env;
use std::time::Duration;

use lookout_core::push_protocol::DEFAULT_MAX_FRAME_BYTES;
use url::Url;

use crate::error::SyncError;

/// Every tunable cadence and bound of the sync engine. Defaults match the
/// values the web client shipped with; none of them are load-tested optima.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    pub api_base: Url,
    pub ws_base: Url,
    pub reconnect_base: Duration,
    pub reconnect_ceiling: Duration,
    pub max_retries: u32,
    pub active_poll_interval: Duration,
    pub idle_poll_interval: Duration,
    pub mutation_poll_delay: Duration,
    pub poll_timeout: Duration,
    /// Upper bound on any single REST call, polls included.
    pub request_timeout: Duration,
    pub completion_fallback: Duration,
    pub deployment_poll_interval: Duration,
    pub deployment_error_display: Duration,
    pub merge_window: Duration,
    pub max_frame_bytes: usize,
}

impl SyncConfig {
    pub fn new(api_base: Url) -> Result<Self, SyncError> {
        let ws_base = derive_ws_base(&api_base)?;
        Ok(Self {
            api_base,
            ws_base,
            reconnect_base: Duration::from_millis(1000),
            reconnect_ceiling: Duration::from_millis(10_000),
            max_retries: 5,
            active_poll_interval: Duration::from_millis(500),
            idle_poll_interval: Duration::from_millis(5000),
            mutation_poll_delay: Duration::from_millis(150),
            poll_timeout: Duration::from_millis(5000),
            request_timeout: Duration::from_secs(30),
            completion_fallback: Duration::from_secs(60),
            deployment_poll_interval: Duration::from_millis(1000),
            deployment_error_display: Duration::from_millis(5000),
            merge_window: Duration::from_secs(120),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        })
    }

    pub fn with_ws_base(mut self, ws_base: Url) -> Self {
        self.ws_base = ws_base;
        self
    }

    /// Applies `LOOKOUT_*` overrides on top of the defaults.
    pub fn from_env(api_base: Url) -> Result<Self, SyncError> {
        let mut cfg = Self::new(api_base)?;
        if let Some(value) = env_millis("LOOKOUT_RECONNECT_BASE_MS") {
            cfg.reconnect_base = value;
        }
        if let Some(value) = env_millis("LOOKOUT_RECONNECT_CEILING_MS") {
            cfg.reconnect_ceiling = value;
        }
        if let Some(value) = env_parsed::<u32>("LOOKOUT_MAX_RETRIES") {
            cfg.max_retries = value;
        }
        if let Some(value) = env_millis("LOOKOUT_ACTIVE_POLL_MS") {
            cfg.active_poll_interval = value;
        }
        if let Some(value) = env_millis("LOOKOUT_IDLE_POLL_MS") {
            cfg.idle_poll_interval = value;
        }
        if let Some(value) = env_millis("LOOKOUT_MUTATION_POLL_MS") {
            cfg.mutation_poll_delay = value;
        }
        if let Some(value) = env_millis("LOOKOUT_POLL_TIMEOUT_MS") {
            cfg.poll_timeout = value;
        }
        if let Some(value) = env_millis("LOOKOUT_REQUEST_TIMEOUT_MS") {
            cfg.request_timeout = value;
        }
        if let Some(value) = env_parsed::<u64>("LOOKOUT_COMPLETION_FALLBACK_SECS") {
            cfg.completion_fallback = Duration::from_secs(value);
        }
        if let Some(value) = env_millis("LOOKOUT_DEPLOY_POLL_MS") {
            cfg.deployment_poll_interval = value;
        }
        if let Some(value) = env_millis("LOOKOUT_DEPLOY_ERROR_MS") {
            cfg.deployment_error_display = value;
        }
        if let Some(value) = env_parsed::<u64>("LOOKOUT_MERGE_WINDOW_SECS") {
            cfg.merge_window = Duration::from_secs(value);
        }
        Ok(cfg)
    }

    pub fn push_url(&self, project_id: &str) -> Result<Url, SyncError> {
        join_path(&self.ws_base, &format!("api/chat/{project_id}"))
    }

    pub fn api_url(&self, path: &str) -> Result<Url, SyncError> {
        join_path(&self.api_base, path)
    }
}

pub fn derive_ws_base(api_base: &Url) -> Result<Url, SyncError> {
    let scheme = match api_base.scheme() {
        "http" => "ws",
        "https" => "wss",
        "ws" | "wss" => return Ok(api_base.clone()),
        other => {
            return Err(SyncError::InvalidEndpoint(format!(
                "unsupported scheme {other} in {api_base}"
            )))
        }
    };
    let mut ws_base = api_base.clone();
    ws_base
        .set_scheme(scheme)
        .map_err(|_| SyncError::InvalidEndpoint(format!("cannot map {api_base} to {scheme}")))?;
    Ok(ws_base)
}

fn join_path(base: &Url, path: &str) -> Result<Url, SyncError> {
    if base.cannot_be_a_base() {
        return Err(SyncError::InvalidEndpoint(base.to_string()));
    }
    let mut joined = base.clone();
    let prefix = base.path().trim_end_matches('/');
    joined.set_path(&format!("{prefix}/{}", path.trim_start_matches('/')));
    Ok(joined)
}

pub fn parse_bool_flag(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "TRUE" | "yes" | "YES" | "on" | "ON" => Some(true),
        "0" | "false" | "FALSE" | "no" | "NO" | "off" | "OFF" => Some(false),
        _ => None,
    }
}

fn env_value(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parsed<T: std::str::FromStr>(key: &str) -> Option<T> {
    env_value(key).and_then(|value| value.parse::<T>().ok())
}

fn env_millis(key: &str) -> Option<Duration> {
    env_parsed::<u64>(key).map(Duration::from_millis)
}
