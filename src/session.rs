//! Agenda Session
//!
//! Scoped owner of everything one viewer session needs: the reconciliation
//! store, the live channel, the backend client and the notifier. Acquired with
//! [`AgendaSessionBuilder::start`], released by [`AgendaSession::shutdown`] or
//! by dropping the session.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::backend::{AgendaBackend, ConflictReport, HttpBackend, NewAppointment, RatingSubmission};
use crate::config::{AgendaConfig, Viewer, ViewerRole};
use crate::domain::{AppointmentRecord, Clock, ServiceStatus, SystemClock};
use crate::error::{AgendaError, Result};
use crate::events::{AgendaEvent, EventBus};
use crate::live::{self, endpoint_url, ChannelContext, LiveChannelHandle, LiveTransport, WebSocketTransport};
use crate::notify::{LogNotifier, Notification, Notifier};
use crate::sync::{
    EventNormalizer, Inbound, Interest, Patch, PatchHub, PatchOutcome, ReconciliationStore,
    ReplaceOutcome, Subscription, ViewFilter,
};

const INBOUND_QUEUE: usize = 256;

struct Shared {
    viewer: Viewer,
    store: Mutex<ReconciliationStore>,
    backend: Arc<dyn AgendaBackend>,
    notifier: Arc<dyn Notifier>,
    clock: Arc<dyn Clock>,
    hub: PatchHub,
    bus: EventBus,
}

impl Shared {
    /// Runs the fetch on its own task so a caller giving up on the result
    /// cannot leave its ticket in flight.
    async fn refresh(self: &Arc<Self>) -> Result<ReplaceOutcome> {
        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.fetch_and_replace().await })
            .await
            .map_err(AgendaError::transport)?
    }

    async fn fetch_and_replace(&self) -> Result<ReplaceOutcome> {
        let ticket = self.store.lock().await.begin_fetch();

        match self.backend.fetch_appointments(&self.viewer).await {
            Ok(records) => {
                let count = records.len();
                let outcome = self.store.lock().await.replace_all(ticket, records);
                match outcome {
                    ReplaceOutcome::Applied { .. } => {
                        self.bus.publish(AgendaEvent::RecordsReplaced { seq: ticket.seq(), count })
                    }
                    ReplaceOutcome::Discarded => {
                        self.bus.publish(AgendaEvent::FetchDiscarded { seq: ticket.seq() })
                    }
                }
                Ok(outcome)
            }
            Err(e) => {
                self.store.lock().await.abandon_fetch(ticket);
                warn!("Fetching appointments failed: {}", e);
                self.notifier.notify(Notification::alert(
                    "Error",
                    "Could not load your appointments. Try again.",
                ));
                self.bus.publish(AgendaEvent::FetchFailed { reason: e.to_string() });
                Err(e)
            }
        }
    }

    /// Handlers see patches in the order the store applied them.
    async fn apply(&self, patch: &Patch) -> PatchOutcome {
        let mut store = self.store.lock().await;
        let outcome = store.apply_patch(patch);
        if outcome == PatchOutcome::Applied {
            self.hub.emit(patch);
        }
        drop(store);
        if outcome == PatchOutcome::Applied {
            self.bus.publish(AgendaEvent::PatchApplied {
                service_id: patch.service_id.clone(),
            });
        }
        outcome
    }

    async fn apply_live(&self, patch: Patch) {
        self.apply(&patch).await;

        let notification = match (&patch.fields.value, &patch.fields.status) {
            (Some(value), _) => Notification::value_changed(&patch.service_id, *value),
            (None, Some(status)) => Notification::status_changed(&patch.service_id, status.as_wire()),
            (None, None) => return,
        };
        self.notifier.notify(notification);
    }
}

pub struct AgendaSessionBuilder {
    config: AgendaConfig,
    backend: Option<Arc<dyn AgendaBackend>>,
    transport: Option<Arc<dyn LiveTransport>>,
    notifier: Option<Arc<dyn Notifier>>,
    clock: Option<Arc<dyn Clock>>,
    interest: Interest,
}

impl AgendaSessionBuilder {
    pub fn backend(mut self, backend: Arc<dyn AgendaBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn LiveTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Narrow live patches to a single service (detail view).
    pub fn interest(mut self, interest: Interest) -> Self {
        self.interest = interest;
        self
    }

    /// Open the live channel and run the first fetch. A failing first fetch
    /// only raises an alert; the session still starts and recovers on the
    /// next refresh or event.
    pub async fn start(self) -> Result<AgendaSession> {
        let url = endpoint_url(&self.config.api_url)?;
        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(HttpBackend::from_config(&self.config)?),
        };
        let transport = self.transport.unwrap_or_else(|| Arc::new(WebSocketTransport));

        let shared = Arc::new(Shared {
            viewer: self.config.viewer.clone(),
            store: Mutex::new(ReconciliationStore::new()),
            backend,
            notifier: self.notifier.unwrap_or_else(|| Arc::new(LogNotifier)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            hub: PatchHub::new(),
            bus: EventBus::new(),
        });

        let (tx, rx) = mpsc::channel(INBOUND_QUEUE);
        let event_loop = tokio::spawn(run_event_loop(shared.clone(), rx));
        let channel = live::spawn(
            ChannelContext {
                url,
                viewer_id: self.config.viewer.id.clone(),
                policy: self.config.reconnect,
                normalizer: EventNormalizer::new(self.interest),
                bus: shared.bus.clone(),
            },
            transport,
            tx,
        );

        info!("Agenda session started for {:?} {}", shared.viewer.role, shared.viewer.id);
        let session = AgendaSession {
            shared,
            channel: Some(channel),
            event_loop: Some(event_loop),
        };

        if let Err(e) = session.shared.refresh().await {
            debug!("Initial fetch failed, waiting for next refresh: {}", e);
        }
        Ok(session)
    }
}

pub struct AgendaSession {
    shared: Arc<Shared>,
    channel: Option<LiveChannelHandle>,
    event_loop: Option<JoinHandle<()>>,
}

impl AgendaSession {
    pub fn builder(config: AgendaConfig) -> AgendaSessionBuilder {
        AgendaSessionBuilder {
            config,
            backend: None,
            transport: None,
            notifier: None,
            clock: None,
            interest: Interest::All,
        }
    }

    pub fn viewer(&self) -> &Viewer {
        &self.shared.viewer
    }

    pub fn today(&self) -> NaiveDate {
        self.shared.clock.today()
    }

    /// Fetch the full set again. Responses overtaken by a newer fetch are
    /// discarded.
    pub async fn refresh(&self) -> Result<ReplaceOutcome> {
        self.shared.refresh().await
    }

    pub async fn view(&self, filter: &ViewFilter) -> Vec<AppointmentRecord> {
        let today = self.shared.clock.today();
        self.shared.store.lock().await.view(filter, today)
    }

    pub async fn get(&self, service_id: &str) -> Option<AppointmentRecord> {
        self.shared.store.lock().await.get(service_id).cloned()
    }

    /// Apply the new status locally right away and send it to the backend
    /// without waiting. The live echo confirms the change; a failed request
    /// only raises an alert.
    pub async fn update_status(&self, service_id: &str, status: ServiceStatus) -> Result<PatchOutcome> {
        if service_id.trim().is_empty() {
            return Err(AgendaError::InvalidInput("service id must not be empty".into()));
        }
        let outcome = self.shared.apply(&Patch::status(service_id, status.clone())).await;

        let shared = self.shared.clone();
        let service_id = service_id.to_string();
        tokio::spawn(async move {
            if let Err(e) = shared.backend.update_status(&service_id, &status).await {
                warn!("Status update for {} failed: {}", service_id, e);
                shared.notifier.notify(Notification::alert(
                    "Error",
                    "Could not update the service status. Try again.",
                ));
            }
        });
        Ok(outcome)
    }

    /// Rate a service the viewer booked; marks it rated once the backend
    /// accepts the rating.
    pub async fn submit_rating(&self, service_id: &str, score: u8, comment: &str) -> Result<()> {
        if self.shared.viewer.role != ViewerRole::Requester {
            return Err(AgendaError::InvalidInput("only requesters can rate a service".into()));
        }
        let record = self
            .get(service_id)
            .await
            .ok_or_else(|| AgendaError::InvalidInput(format!("unknown service {}", service_id)))?;

        let rating = RatingSubmission::for_record(&record, self.shared.viewer.id.clone(), score, comment);
        rating.validate()?;
        self.shared.backend.submit_rating(&rating).await?;
        self.shared.apply(&Patch::rated(service_id)).await;
        Ok(())
    }

    pub async fn check_conflicts(&self, provider_id: &str, date: NaiveDate, time: NaiveTime) -> Result<ConflictReport> {
        self.shared.backend.check_conflicts(provider_id, date, time).await
    }

    /// Book a new appointment. The record shows up through the backend's
    /// `novo_agendamento` push or the next refresh.
    pub async fn book(&self, request: &NewAppointment) -> Result<Value> {
        request.validate()?;
        self.shared.backend.create_appointment(request).await
    }

    pub fn on_patch<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Patch) + Send + Sync + 'static,
    {
        self.shared.hub.on_patch(handler)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<AgendaEvent> {
        self.shared.bus.subscribe()
    }

    /// Tear the session down. No live event is applied after this returns.
    pub async fn shutdown(mut self) {
        if let Some(channel) = self.channel.take() {
            channel.shutdown().await;
        }
        if let Some(event_loop) = self.event_loop.take() {
            event_loop.abort();
            let _ = event_loop.await;
        }
        info!("Agenda session for {} closed", self.shared.viewer.id);
    }
}

impl Drop for AgendaSession {
    fn drop(&mut self) {
        // Handle drop aborts the channel task.
        self.channel.take();
        if let Some(event_loop) = self.event_loop.take() {
            event_loop.abort();
        }
    }
}

async fn run_event_loop(shared: Arc<Shared>, mut rx: mpsc::Receiver<Inbound>) {
    let mut fetches = JoinSet::new();

    loop {
        tokio::select! {
            inbound = rx.recv() => match inbound {
                Some(Inbound::Patch(patch)) => shared.apply_live(patch).await,
                Some(Inbound::Refetch { payload }) => {
                    debug!("New appointment announced: {}", payload);
                    let fetcher = shared.clone();
                    fetches.spawn(async move {
                        // A failed refetch has already raised its own alert.
                        let _ = fetcher.refresh().await;
                        fetcher.notifier.notify(Notification::new_appointment());
                    });
                }
                None => break,
            },
            Some(_) = fetches.join_next(), if !fetches.is_empty() => {}
        }
    }
    // Let refetches that were already triggered finish.
    while fetches.join_next().await.is_some() {}
}
