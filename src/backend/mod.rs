//! Backend Module
//!
//! The REST surface the sync engine talks to, behind a trait so sessions can
//! run against a scripted backend in tests.

mod http;

pub use http::HttpBackend;

use async_trait::async_trait;
use chrono::{Local, NaiveDate, NaiveTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Viewer;
use crate::domain::{AppointmentRecord, ServiceStatus};
use crate::error::{AgendaError, Result};

#[async_trait]
pub trait AgendaBackend: Send + Sync {
    /// Every appointment visible to the viewer, in no particular order.
    async fn fetch_appointments(&self, viewer: &Viewer) -> Result<Vec<AppointmentRecord>>;

    async fn update_status(&self, service_id: &str, status: &ServiceStatus) -> Result<()>;

    async fn submit_rating(&self, rating: &RatingSubmission) -> Result<()>;

    async fn check_conflicts(&self, provider_id: &str, date: NaiveDate, time: NaiveTime) -> Result<ConflictReport>;

    /// Book a new appointment; a taken slot is reported as
    /// [`AgendaError::ScheduleConflict`].
    async fn create_appointment(&self, request: &NewAppointment) -> Result<Value>;
}

/// Post-completion feedback from the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingSubmission {
    #[serde(rename = "id_servico")]
    pub service_id: String,
    #[serde(rename = "id_usuario")]
    pub requester_id: String,
    #[serde(rename = "id_fornecedor")]
    pub provider_id: String,
    #[serde(rename = "data")]
    pub date: NaiveDate,
    #[serde(rename = "nota")]
    pub score: u8,
    #[serde(rename = "comentario")]
    pub comment: String,
}

impl RatingSubmission {
    pub fn for_record(record: &AppointmentRecord, requester_id: impl Into<String>, score: u8, comment: impl Into<String>) -> Self {
        Self {
            service_id: record.service_id.clone(),
            requester_id: requester_id.into(),
            provider_id: record.provider_id.clone(),
            date: record.date,
            score,
            comment: comment.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_id("service id", &self.service_id)?;
        require_id("requester id", &self.requester_id)?;
        if !(1..=5).contains(&self.score) {
            return Err(AgendaError::InvalidInput(format!("rating must be 1-5, got {}", self.score)));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConflictKind {
    #[serde(rename = "servico")]
    Service,
    #[serde(rename = "leilao")]
    Auction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictingService {
    pub id: String,
    pub data: String,
    pub horario: String,
    pub tipo: ConflictKind,
    #[serde(default)]
    pub titulo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictReport {
    pub has_conflict: bool,
    #[serde(default)]
    pub conflicting_services: Vec<ConflictingService>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Booking request for `POST /servicos`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewAppointment {
    #[serde(rename = "id_usuario")]
    pub requester_id: String,
    #[serde(rename = "id_fornecedor")]
    pub provider_id: String,
    pub data: String,
    pub horario: String,
    #[serde(rename = "descricao", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "valor", skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl NewAppointment {
    pub fn new(requester_id: impl Into<String>, provider_id: impl Into<String>, date: NaiveDate, time: NaiveTime) -> Self {
        Self {
            requester_id: requester_id.into(),
            provider_id: provider_id.into(),
            data: iso_instant(date, NaiveTime::MIN),
            horario: iso_instant(date, time),
            description: None,
            value: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_id("requester id", &self.requester_id)?;
        require_id("provider id", &self.provider_id)?;
        if self.value.is_some_and(|v| !v.is_finite() || v < 0.0) {
            return Err(AgendaError::InvalidInput("value must be a non-negative amount".into()));
        }
        Ok(())
    }
}

/// Local date and time as a UTC timestamp with millisecond precision, the
/// format the backend expects for `data`/`horario`.
pub fn iso_instant(date: NaiveDate, time: NaiveTime) -> String {
    let naive = date.and_time(time);
    let local = Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| Local.from_utc_datetime(&naive));
    local.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn require_id(what: &str, id: &str) -> Result<()> {
    if id.trim().is_empty() {
        return Err(AgendaError::InvalidInput(format!("{} must not be empty", what)));
    }
    Ok(())
}
