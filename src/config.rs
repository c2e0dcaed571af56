//! Runtime configuration
//!
//! Values come from the process environment (a `.env` file is loaded by the
//! binary first). Only the backend URL and viewer id are mandatory.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AgendaError, Result};

/// Which side of a booking the local viewer is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ViewerRole {
    /// Customer who booked the service (`usuario`).
    #[default]
    Requester,
    /// Professional delivering the service (`fornecedor`).
    Provider,
}

impl FromStr for ViewerRole {
    type Err = AgendaError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "requester" | "usuario" | "user" => Ok(ViewerRole::Requester),
            "provider" | "fornecedor" => Ok(ViewerRole::Provider),
            other => Err(AgendaError::Config(format!("unknown viewer role '{}'", other))),
        }
    }
}

/// Identity of the locally authenticated party, passed explicitly into the
/// session instead of being read from shared globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub id: String,
    pub role: ViewerRole,
}

impl Viewer {
    pub fn new(id: impl Into<String>, role: ViewerRole) -> Self {
        Self { id: id.into(), role }
    }
}

/// Reconnection policy for the live channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Consecutive failed attempts before giving up.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Limit for opening the socket and for the server's handshake.
    pub connect_timeout: Duration,
}

impl ReconnectPolicy {
    /// Delay before reconnect attempt `attempt` (1-based): doubles from the
    /// initial delay and is capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        let delay = self.initial_delay.saturating_mul(1u32 << shift);
        delay.min(self.max_delay)
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(5000),
            connect_timeout: Duration::from_millis(20_000),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AgendaConfig {
    /// Base URL of the REST backend; the live channel is served from the same host.
    pub api_url: String,
    pub viewer: Viewer,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
}

impl AgendaConfig {
    pub fn new(api_url: impl Into<String>, viewer: Viewer) -> Self {
        Self {
            api_url: api_url.into(),
            viewer,
            request_timeout: Duration::from_secs(20),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Build the configuration from `AGENDA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let api_url = lookup("AGENDA_API_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AgendaError::Config("AGENDA_API_URL is not set".into()))?;
        let viewer_id = lookup("AGENDA_VIEWER_ID")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| AgendaError::Config("AGENDA_VIEWER_ID is not set".into()))?;
        let role = match lookup("AGENDA_VIEWER_ROLE") {
            Some(raw) => raw.parse()?,
            None => ViewerRole::default(),
        };

        let mut config = Self::new(api_url.trim_end_matches('/'), Viewer::new(viewer_id, role));

        if let Some(secs) = parse_number(&lookup, "AGENDA_REQUEST_TIMEOUT_SECS")? {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = parse_number(&lookup, "AGENDA_RECONNECT_ATTEMPTS")? {
            config.reconnect.max_attempts = u32::try_from(attempts).map_err(|_| {
                AgendaError::Config(format!("AGENDA_RECONNECT_ATTEMPTS = {} is out of range", attempts))
            })?;
        }
        if let Some(ms) = parse_number(&lookup, "AGENDA_RECONNECT_DELAY_MS")? {
            config.reconnect.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&lookup, "AGENDA_RECONNECT_DELAY_MAX_MS")? {
            config.reconnect.max_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_number(&lookup, "AGENDA_CONNECT_TIMEOUT_MS")? {
            config.reconnect.connect_timeout = Duration::from_millis(ms);
        }

        Ok(config)
    }
}

fn parse_number(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<u64>> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|e| AgendaError::Config(format!("{} = '{}': {}", key, raw, e))),
    }
}
