//! Event Normalizer
//!
//! Turns raw live-channel events into store operations. Payloads that cannot
//! be attributed to a service are dropped here with a log line; they never
//! surface as errors.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::domain::record::{amount_from_value, identifier_from_value};
use crate::domain::ServiceStatus;

pub const EVENT_NEW_APPOINTMENT: &str = "novo_agendamento";
pub const EVENT_STATUS_CHANGED: &str = "atualizacao_status";
pub const EVENT_VALUE_CHANGED: &str = "valor_atualizado";

/// Fields a patch may overwrite. `None` means "leave untouched".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchFields {
    pub status: Option<ServiceStatus>,
    pub value: Option<f64>,
    pub rated: Option<bool>,
}

impl PatchFields {
    pub fn is_empty(&self) -> bool {
        self.status.is_none() && self.value.is_none() && self.rated.is_none()
    }
}

/// Partial update aimed at one record by service identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Patch {
    pub service_id: String,
    pub fields: PatchFields,
    /// Who triggered the change, when the event says so.
    #[serde(default)]
    pub origin: Option<String>,
}

impl Patch {
    pub fn status(service_id: impl Into<String>, status: ServiceStatus) -> Self {
        Self {
            service_id: service_id.into(),
            fields: PatchFields {
                status: Some(status),
                ..PatchFields::default()
            },
            origin: None,
        }
    }

    pub fn value(service_id: impl Into<String>, value: f64) -> Self {
        Self {
            service_id: service_id.into(),
            fields: PatchFields {
                value: Some(value),
                ..PatchFields::default()
            },
            origin: None,
        }
    }

    pub fn rated(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            fields: PatchFields {
                rated: Some(true),
                ..PatchFields::default()
            },
            origin: None,
        }
    }

    pub fn from_origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }
}

/// What the session should do with one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Patch(Patch),
    /// A record the local set does not know yet; only a full fetch can add it.
    Refetch { payload: Value },
}

/// How much of the set the current screen cares about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Interest {
    /// List view: every record of the viewer.
    #[default]
    All,
    /// Detail view narrowed to one service.
    Single(String),
}

impl Interest {
    pub fn admits(&self, service_id: &str) -> bool {
        match self {
            Interest::All => true,
            Interest::Single(id) => id == service_id,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventNormalizer {
    interest: Interest,
}

impl EventNormalizer {
    pub fn new(interest: Interest) -> Self {
        Self { interest }
    }

    pub fn interest(&self) -> &Interest {
        &self.interest
    }

    pub fn normalize(&self, event: &str, payload: &Value) -> Option<Inbound> {
        match event {
            EVENT_NEW_APPOINTMENT => Some(Inbound::Refetch {
                payload: payload.clone(),
            }),
            EVENT_STATUS_CHANGED | EVENT_VALUE_CHANGED => {
                let patch = decode_patch(event, payload)?;
                if !self.interest.admits(&patch.service_id) {
                    debug!("Ignoring {} for service {} outside current interest", event, patch.service_id);
                    return None;
                }
                Some(Inbound::Patch(patch))
            }
            other => {
                debug!("Ignoring unrecognized live event '{}'", other);
                None
            }
        }
    }
}

fn decode_patch(event: &str, payload: &Value) -> Option<Patch> {
    let Some(service_id) = payload.get("id_servico").and_then(identifier_from_value) else {
        warn!("Dropping {} without service identifier: {}", event, payload);
        return None;
    };

    let status = payload
        .get("novo_status")
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(ServiceStatus::parse);
    let value = if event == EVENT_VALUE_CHANGED {
        payload.get("novo_valor").and_then(amount_from_value)
    } else {
        None
    };

    let fields = PatchFields {
        status,
        value,
        rated: None,
    };
    if fields.is_empty() {
        debug!("{} for service {} carries no fields", event, service_id);
        return None;
    }

    let origin = payload
        .get("id_origem")
        .or_else(|| payload.get("origem"))
        .and_then(identifier_from_value);

    Some(Patch {
        service_id,
        fields,
        origin,
    })
}
