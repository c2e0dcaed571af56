use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{iso_instant, require_id, AgendaBackend, ConflictReport, NewAppointment, RatingSubmission};
use crate::config::{AgendaConfig, Viewer, ViewerRole};
use crate::domain::record::WireRecord;
use crate::domain::{AppointmentRecord, ServiceStatus};
use crate::error::{AgendaError, Result};

/// `reqwest`-backed client for the marketplace REST API.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    base_url: String,
}

impl HttpBackend {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AgendaConfig) -> Result<Self> {
        Self::new(config.api_url.clone(), config.request_timeout)
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn list_path(viewer: &Viewer) -> String {
        match viewer.role {
            ViewerRole::Requester => format!("/usuarios/historico/{}", viewer.id),
            ViewerRole::Provider => format!("/fornecedor/{}/solicitacoes", viewer.id),
        }
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(AgendaError::Status {
        status: status.as_u16(),
        body,
    })
}

/// Decode a list response, skipping entries that are not valid records.
fn decode_records(body: Value) -> Vec<AppointmentRecord> {
    let Value::Array(items) = body else {
        warn!("Appointment list response is not an array; treating as empty");
        return Vec::new();
    };
    items
        .into_iter()
        .filter_map(|item| match serde_json::from_value::<WireRecord>(item) {
            Ok(wire) => Some(AppointmentRecord::from(wire)),
            Err(e) => {
                warn!("Skipping undecodable appointment: {}", e);
                None
            }
        })
        .collect()
}

#[async_trait]
impl AgendaBackend for HttpBackend {
    async fn fetch_appointments(&self, viewer: &Viewer) -> Result<Vec<AppointmentRecord>> {
        require_id("viewer id", &viewer.id)?;
        let url = self.url(&Self::list_path(viewer));
        debug!("GET {}", url);

        let response = ensure_success(self.client.get(&url).send().await?).await?;
        let body: Value = response.json().await?;
        let records = decode_records(body);
        debug!("Fetched {} appointments for {}", records.len(), viewer.id);
        Ok(records)
    }

    async fn update_status(&self, service_id: &str, status: &ServiceStatus) -> Result<()> {
        require_id("service id", service_id)?;
        let body = json!({ "id_servico": service_id, "status": status });
        ensure_success(self.client.put(self.url("/servicos")).json(&body).send().await?).await?;
        Ok(())
    }

    async fn submit_rating(&self, rating: &RatingSubmission) -> Result<()> {
        rating.validate()?;
        ensure_success(self.client.post(self.url("/avaliacao")).json(rating).send().await?).await?;
        Ok(())
    }

    async fn check_conflicts(&self, provider_id: &str, date: NaiveDate, time: NaiveTime) -> Result<ConflictReport> {
        require_id("provider id", provider_id)?;
        let body = json!({
            "fornecedorId": provider_id,
            "data": iso_instant(date, NaiveTime::MIN),
            "horario": iso_instant(date, time),
        });
        let response = self
            .client
            .post(self.url("/servicos/verificar-conflitos"))
            .json(&body)
            .send()
            .await?;

        // 409 carries the same report as a 200.
        if response.status() == StatusCode::CONFLICT {
            return Ok(response.json().await?);
        }
        Ok(ensure_success(response).await?.json().await?)
    }

    async fn create_appointment(&self, request: &NewAppointment) -> Result<Value> {
        request.validate()?;
        let response = self.client.post(self.url("/servicos")).json(request).send().await?;

        if response.status() == StatusCode::CONFLICT {
            let body: Value = response.json().await.unwrap_or(Value::Null);
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("schedule conflict detected")
                .to_string();
            return Err(AgendaError::ScheduleConflict(message));
        }
        Ok(ensure_success(response).await?.json().await?)
    }
}
