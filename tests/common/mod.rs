#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use serde_json::Value;
use tokio::sync::mpsc;

use agenda_sync::backend::{AgendaBackend, ConflictReport, NewAppointment, RatingSubmission};
use agenda_sync::live::{LiveConnection, LiveTransport};
use agenda_sync::notify::{Notification, NotificationLevel, Notifier};
use agenda_sync::{AgendaError, AppointmentRecord, Result, ServiceStatus, Viewer};

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

// --- Backend ---

pub struct FetchScript {
    pub delay: Duration,
    pub response: std::result::Result<Vec<AppointmentRecord>, u16>,
}

/// Serves `records` unless a scripted response is queued.
#[derive(Default)]
pub struct ScriptedBackend {
    pub records: Mutex<Vec<AppointmentRecord>>,
    pub scripted: Mutex<VecDeque<FetchScript>>,
    pub fetches: AtomicU32,
    pub status_updates: Mutex<Vec<(String, ServiceStatus)>>,
    pub fail_status_updates: Mutex<bool>,
    pub ratings: Mutex<Vec<RatingSubmission>>,
}

impl ScriptedBackend {
    pub fn with_records(records: Vec<AppointmentRecord>) -> Arc<Self> {
        let backend = Self::default();
        *backend.records.lock().unwrap() = records;
        Arc::new(backend)
    }

    pub fn script(&self, delay: Duration, response: std::result::Result<Vec<AppointmentRecord>, u16>) {
        self.scripted.lock().unwrap().push_back(FetchScript { delay, response });
    }
}

#[async_trait]
impl AgendaBackend for ScriptedBackend {
    async fn fetch_appointments(&self, _viewer: &Viewer) -> Result<Vec<AppointmentRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let next = self.scripted.lock().unwrap().pop_front();
        match next {
            Some(script) => {
                tokio::time::sleep(script.delay).await;
                script.response.map_err(|status| AgendaError::Status {
                    status,
                    body: "scripted failure".into(),
                })
            }
            None => Ok(self.records.lock().unwrap().clone()),
        }
    }

    async fn update_status(&self, service_id: &str, status: &ServiceStatus) -> Result<()> {
        self.status_updates
            .lock()
            .unwrap()
            .push((service_id.to_string(), status.clone()));
        if *self.fail_status_updates.lock().unwrap() {
            return Err(AgendaError::Status { status: 500, body: "boom".into() });
        }
        Ok(())
    }

    async fn submit_rating(&self, rating: &RatingSubmission) -> Result<()> {
        self.ratings.lock().unwrap().push(rating.clone());
        Ok(())
    }

    async fn check_conflicts(&self, _provider_id: &str, _date: NaiveDate, _time: NaiveTime) -> Result<ConflictReport> {
        Ok(ConflictReport {
            has_conflict: false,
            conflicting_services: Vec::new(),
            message: None,
        })
    }

    async fn create_appointment(&self, _request: &NewAppointment) -> Result<Value> {
        Ok(Value::Null)
    }
}

// --- Notifier ---

#[derive(Default)]
pub struct RecordingNotifier {
    pub seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    pub fn titles(&self) -> Vec<String> {
        self.seen.lock().unwrap().iter().map(|n| n.title.clone()).collect()
    }

    pub fn alerts(&self) -> usize {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.level == NotificationLevel::Alert)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

// --- Live transport ---

/// Test-side end of one live connection.
pub struct ServerEnd {
    pub to_client: mpsc::UnboundedSender<String>,
    pub from_client: mpsc::UnboundedReceiver<String>,
}

impl ServerEnd {
    pub fn send(&self, frame: &str) {
        let _ = self.to_client.send(frame.to_string());
    }

    pub async fn expect(&mut self, frame: &str) {
        let got = tokio::time::timeout(Duration::from_secs(2), self.from_client.recv())
            .await
            .expect("client did not answer in time");
        assert_eq!(got.as_deref(), Some(frame));
    }

    /// Engine.IO open, Socket.IO connect, then the room join.
    pub async fn handshake(&mut self, viewer_id: &str, ping_interval: u64) {
        self.send(&format!(
            r#"0{{"sid":"test-sid","upgrades":[],"pingInterval":{},"pingTimeout":20000,"maxPayload":1000000}}"#,
            ping_interval
        ));
        self.expect("40").await;
        self.send(r#"40{"sid":"socket-sid"}"#);
        self.expect(&format!(r#"42["join","{}"]"#, viewer_id)).await;
    }
}

struct ChannelConnection {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl LiveConnection for ChannelConnection {
    async fn send(&mut self, frame: String) -> Result<()> {
        self.outgoing.send(frame).map_err(AgendaError::transport)
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

enum Offer {
    Accept(ChannelConnection),
    Refuse,
    /// Connect never resolves.
    Hang,
}

/// Hands out queued connections in order; an empty queue refuses the attempt.
#[derive(Default)]
pub struct ScriptedTransport {
    queue: Mutex<VecDeque<Offer>>,
    pub attempts: AtomicU32,
    pub urls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn accept(&self) -> ServerEnd {
        let (to_client, incoming) = mpsc::unbounded_channel();
        let (outgoing, from_client) = mpsc::unbounded_channel();
        self.queue
            .lock()
            .unwrap()
            .push_back(Offer::Accept(ChannelConnection { incoming, outgoing }));
        ServerEnd { to_client, from_client }
    }

    pub fn refuse(&self) {
        self.queue.lock().unwrap().push_back(Offer::Refuse);
    }

    pub fn hang(&self) {
        self.queue.lock().unwrap().push_back(Offer::Hang);
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LiveTransport for ScriptedTransport {
    async fn connect(&self, url: &str) -> Result<Box<dyn LiveConnection>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        let offer = self.queue.lock().unwrap().pop_front();
        match offer {
            Some(Offer::Accept(conn)) => Ok(Box::new(conn)),
            Some(Offer::Hang) => std::future::pending().await,
            Some(Offer::Refuse) | None => Err(AgendaError::transport("connection refused")),
        }
    }
}
