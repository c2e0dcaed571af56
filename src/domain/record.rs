//! Appointment records and their wire representation.

use std::fmt;

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

/// Lifecycle state of a booked service.
///
/// Transitions are decided by the backend; the client only mirrors whatever
/// value it last received, so no transition graph is enforced here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServiceStatus {
    Pending,
    /// Provider proposed a price the requester still has to accept.
    ConfirmValue,
    Confirmed,
    InProgress,
    AwaitingPayment,
    Completed,
    Cancelled,
    Refused,
    /// Status text this client does not recognise, kept verbatim.
    Unrecognized(String),
}

impl ServiceStatus {
    /// Parse status text case-insensitively. Only the backend's own
    /// spellings are known; anything else (including accented or padded
    /// variants) is kept as `Unrecognized` and ranks last.
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "pendente" => ServiceStatus::Pending,
            "confirmar valor" => ServiceStatus::ConfirmValue,
            "confirmado" => ServiceStatus::Confirmed,
            "em andamento" => ServiceStatus::InProgress,
            "aguardando pagamento" => ServiceStatus::AwaitingPayment,
            "concluido" => ServiceStatus::Completed,
            "cancelado" => ServiceStatus::Cancelled,
            "recusado" => ServiceStatus::Refused,
            _ => ServiceStatus::Unrecognized(raw.to_string()),
        }
    }

    /// Spelling the backend uses for this status.
    pub fn as_wire(&self) -> &str {
        match self {
            ServiceStatus::Pending => "pendente",
            ServiceStatus::ConfirmValue => "confirmar valor",
            ServiceStatus::Confirmed => "confirmado",
            ServiceStatus::InProgress => "Em Andamento",
            ServiceStatus::AwaitingPayment => "Aguardando pagamento",
            ServiceStatus::Completed => "concluido",
            ServiceStatus::Cancelled => "cancelado",
            ServiceStatus::Refused => "Recusado",
            ServiceStatus::Unrecognized(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Completed | ServiceStatus::Cancelled | ServiceStatus::Refused
        )
    }
}

impl From<String> for ServiceStatus {
    fn from(s: String) -> Self {
        ServiceStatus::parse(&s)
    }
}

impl From<&str> for ServiceStatus {
    fn from(s: &str) -> Self {
        ServiceStatus::parse(s)
    }
}

impl From<ServiceStatus> for String {
    fn from(status: ServiceStatus) -> Self {
        match status {
            ServiceStatus::Unrecognized(raw) => raw,
            known => known.as_wire().to_string(),
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_wire())
    }
}

/// One scheduled service engagement as seen by the viewer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppointmentRecord {
    #[serde(rename = "id_servico", deserialize_with = "de_identifier")]
    pub service_id: String,
    #[serde(rename = "id_usuario", default, deserialize_with = "de_optional_identifier")]
    pub requester_id: String,
    #[serde(rename = "id_fornecedor", default, deserialize_with = "de_optional_identifier")]
    pub provider_id: String,
    #[serde(
        rename = "data",
        serialize_with = "ser_calendar_day",
        deserialize_with = "de_calendar_day"
    )]
    pub date: NaiveDate,
    #[serde(
        rename = "horario",
        default,
        serialize_with = "ser_time_of_day",
        deserialize_with = "de_time_of_day"
    )]
    pub time: Option<NaiveTime>,
    pub status: ServiceStatus,
    #[serde(rename = "valor", default, deserialize_with = "de_amount")]
    pub value: Option<f64>,
    #[serde(rename = "avaliado", default, deserialize_with = "de_flag")]
    pub rated: bool,
}

impl AppointmentRecord {
    pub fn new(service_id: impl Into<String>, date: NaiveDate, status: ServiceStatus) -> Self {
        Self {
            service_id: service_id.into(),
            requester_id: String::new(),
            provider_id: String::new(),
            date,
            time: None,
            status,
            value: None,
            rated: false,
        }
    }

    pub fn with_participants(mut self, requester: impl Into<String>, provider: impl Into<String>) -> Self {
        self.requester_id = requester.into();
        self.provider_id = provider.into();
        self
    }

    pub fn with_time(mut self, time: NaiveTime) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }
}

/// Shapes the list endpoints return: providers get each record wrapped in a
/// `servico` object, requesters get them flat.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum WireRecord {
    Wrapped { servico: AppointmentRecord },
    Flat(AppointmentRecord),
}

impl From<WireRecord> for AppointmentRecord {
    fn from(wire: WireRecord) -> Self {
        match wire {
            WireRecord::Wrapped { servico } => servico,
            WireRecord::Flat(record) => record,
        }
    }
}

/// Turn a JSON identifier (string or number) into its string form.
pub(crate) fn identifier_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Amounts arrive as numbers or numeric strings.
pub(crate) fn amount_from_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse().ok(),
        _ => None,
    }
}

/// Interpret a date string as a local calendar day.
pub fn parse_calendar_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(day);
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Local).date_naive());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|dt| dt.date())
}

pub fn parse_time_of_day(raw: &str) -> Option<NaiveTime> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(raw)
                .ok()
                .map(|ts| ts.with_timezone(&Local).time())
        })
}

fn de_identifier<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = Value::deserialize(d)?;
    identifier_from_value(&value).ok_or_else(|| de::Error::custom("missing service identifier"))
}

fn de_optional_identifier<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(identifier_from_value(&value).unwrap_or_default())
}

fn de_calendar_day<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDate, D::Error> {
    let raw = String::deserialize(d)?;
    parse_calendar_day(&raw).ok_or_else(|| de::Error::custom(format!("invalid date '{}'", raw)))
}

fn ser_calendar_day<S: Serializer>(day: &NaiveDate, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&day.format("%Y-%m-%d").to_string())
}

fn de_time_of_day<'de, D: Deserializer<'de>>(d: D) -> Result<Option<NaiveTime>, D::Error> {
    let raw: Option<String> = Option::deserialize(d)?;
    Ok(raw.as_deref().and_then(parse_time_of_day))
}

fn ser_time_of_day<S: Serializer>(time: &Option<NaiveTime>, s: S) -> Result<S::Ok, S::Error> {
    match time {
        Some(t) => s.serialize_str(&t.format("%H:%M").to_string()),
        None => s.serialize_none(),
    }
}

fn de_amount<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(amount_from_value(&value))
}

fn de_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let value = Value::deserialize(d)?;
    Ok(match value {
        Value::Bool(b) => b,
        Value::Number(n) => n.as_i64().unwrap_or(0) != 0,
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_status_parsing_is_case_insensitive() {
        assert_eq!(ServiceStatus::parse("EM ANDAMENTO"), ServiceStatus::InProgress);
        assert_eq!(ServiceStatus::parse("Pendente"), ServiceStatus::Pending);
        assert_eq!(ServiceStatus::parse("Aguardando pagamento"), ServiceStatus::AwaitingPayment);
        assert_eq!(
            ServiceStatus::parse("em revisão"),
            ServiceStatus::Unrecognized("em revisão".into())
        );
    }

    #[test]
    fn test_only_backend_spellings_are_known() {
        for raw in ["concluído", "completed", "pending", " pendente"] {
            assert_eq!(ServiceStatus::parse(raw), ServiceStatus::Unrecognized(raw.into()));
        }
    }

    #[test]
    fn test_status_serializes_to_backend_spelling() {
        assert_eq!(json!(ServiceStatus::InProgress), json!("Em Andamento"));
        assert_eq!(json!(ServiceStatus::Unrecognized("xyz".into())), json!("xyz"));
        assert!(ServiceStatus::Refused.is_terminal());
        assert!(!ServiceStatus::ConfirmValue.is_terminal());
    }

    #[test]
    fn test_decode_flat_requester_record() {
        let raw = json!({
            "id_servico": 42,
            "id_usuario": "u-1",
            "id_fornecedor": "f-1",
            "data": "2026-10-20",
            "horario": "14:30",
            "status": "confirmado",
            "valor": "150,50",
            "avaliado": 1
        });
        let wire: WireRecord = serde_json::from_value(raw).unwrap();
        let record = AppointmentRecord::from(wire);

        assert_eq!(record.service_id, "42");
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2026, 10, 20).unwrap());
        assert_eq!(record.time, NaiveTime::from_hms_opt(14, 30, 0));
        assert_eq!(record.status, ServiceStatus::Confirmed);
        assert_eq!(record.value, Some(150.5));
        assert!(record.rated);
    }

    #[test]
    fn test_decode_wrapped_provider_record() {
        let raw = json!({
            "servico": {
                "id_servico": "s-7",
                "data": "2026-10-15T09:00:00",
                "status": "pendente",
                "valor": null
            },
            "usuario": { "nome": "Ana" }
        });
        let record = AppointmentRecord::from(serde_json::from_value::<WireRecord>(raw).unwrap());

        assert_eq!(record.service_id, "s-7");
        assert_eq!(record.date, NaiveDate::from_ymd_opt(2026, 10, 15).unwrap());
        assert_eq!(record.value, None);
        assert!(!record.rated);
        assert!(record.requester_id.is_empty());
    }

    #[test]
    fn test_record_without_identifier_is_rejected() {
        let raw = json!({ "data": "2026-10-15", "status": "pendente" });
        assert!(serde_json::from_value::<AppointmentRecord>(raw).is_err());
    }
}
