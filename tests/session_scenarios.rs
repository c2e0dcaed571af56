mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use agenda_sync::domain::FixedClock;
use agenda_sync::events::{AgendaEvent, ConnectionState};
use agenda_sync::sync::{PatchOutcome, ReplaceOutcome, StatusFilter, UrgencyFilter};
use agenda_sync::{
    AgendaConfig, AgendaError, AgendaSession, AppointmentRecord, Interest, ServiceStatus, UrgencyBucket,
    ViewFilter, Viewer, ViewerRole,
};

use common::{day, eventually, RecordingNotifier, ScriptedBackend, ScriptedTransport};

fn config(role: ViewerRole) -> AgendaConfig {
    let mut config = AgendaConfig::new("http://agenda.test:3000", Viewer::new("u-1", role));
    config.reconnect.initial_delay = Duration::from_millis(20);
    config.reconnect.max_delay = Duration::from_millis(50);
    config
}

/// Live channel gives up immediately; only the REST side is exercised.
fn offline_config(role: ViewerRole) -> AgendaConfig {
    let mut config = config(role);
    config.reconnect.max_attempts = 0;
    config
}

fn agenda() -> Vec<AppointmentRecord> {
    vec![
        AppointmentRecord::new("S1", day(15), ServiceStatus::Pending).with_participants("u-1", "f-1"),
        AppointmentRecord::new("S2", day(18), ServiceStatus::Confirmed).with_participants("u-1", "f-2"),
        AppointmentRecord::new("S3", day(30), ServiceStatus::Completed).with_participants("u-1", "f-1"),
    ]
}

struct Harness {
    session: AgendaSession,
    backend: Arc<ScriptedBackend>,
    notifier: Arc<RecordingNotifier>,
}

async fn start(config: AgendaConfig, transport: Arc<ScriptedTransport>, interest: Interest) -> Harness {
    let backend = ScriptedBackend::with_records(agenda());
    let notifier = Arc::new(RecordingNotifier::default());
    let session = AgendaSession::builder(config)
        .backend(backend.clone())
        .transport(transport)
        .notifier(notifier.clone())
        .clock(Arc::new(FixedClock(day(14))))
        .interest(interest)
        .start()
        .await
        .unwrap();
    Harness { session, backend, notifier }
}

fn ids(records: &[AppointmentRecord]) -> Vec<&str> {
    records.iter().map(|r| r.service_id.as_str()).collect()
}

#[tokio::test]
async fn test_initial_fetch_ranks_view() {
    let h = start(offline_config(ViewerRole::Requester), ScriptedTransport::new(), Interest::All).await;

    let all = h.session.view(&ViewFilter::all()).await;
    assert_eq!(ids(&all), vec!["S1", "S2", "S3"]);

    let urgent = h
        .session
        .view(&ViewFilter {
            status: StatusFilter::All,
            urgency: UrgencyFilter::Only(UrgencyBucket::Urgent),
        })
        .await;
    assert_eq!(ids(&urgent), vec!["S1"]);

    let confirmed = h.session.view(&ViewFilter::parse("confirmado", "todos").unwrap()).await;
    assert_eq!(ids(&confirmed), vec!["S2"]);
}

#[tokio::test]
async fn test_live_channel_joins_viewer_room() {
    let transport = ScriptedTransport::new();
    let mut server = transport.accept();
    let h = start(config(ViewerRole::Requester), transport.clone(), Interest::All).await;
    let mut events = h.session.subscribe_events();

    server.handshake("u-1", 25000).await;
    assert_eq!(
        transport.urls.lock().unwrap()[0],
        "ws://agenda.test:3000/socket.io/?EIO=4&transport=websocket"
    );

    // Heartbeat
    server.send("2");
    server.expect("3").await;

    let connected = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(AgendaEvent::Connection(ConnectionState::Connected)) = events.recv().await {
                return;
            }
        }
    })
    .await;
    assert!(connected.is_ok());
    h.session.shutdown().await;
}

#[tokio::test]
async fn test_status_push_updates_record_and_notifies() {
    let transport = ScriptedTransport::new();
    let mut server = transport.accept();
    let h = start(config(ViewerRole::Requester), transport, Interest::All).await;
    server.handshake("u-1", 25000).await;

    let seen = Arc::new(AtomicUsize::new(0));
    let counter = seen.clone();
    let _sub = h.session.on_patch(move |patch| {
        assert_eq!(patch.service_id, "S2");
        counter.fetch_add(1, Ordering::SeqCst);
    });

    server.send(r#"42["atualizacao_status",{"id_servico":"S2","novo_status":"Em Andamento","id_origem":"f-2"}]"#);

    let session = &h.session;
    assert!(
        eventually(|| async move {
            session.get("S2").await.map(|r| r.status) == Some(ServiceStatus::InProgress)
        })
        .await
    );
    let seen = &seen;
    assert!(eventually(|| async move { seen.load(Ordering::SeqCst) == 1 }).await);
    let notifier = &h.notifier;
    assert!(eventually(|| async move { notifier.titles().contains(&"Service status updated".to_string()) }).await);
}

#[tokio::test]
async fn test_value_push_updates_amount() {
    let transport = ScriptedTransport::new();
    let mut server = transport.accept();
    let h = start(config(ViewerRole::Requester), transport, Interest::All).await;
    server.handshake("u-1", 25000).await;

    server.send(r#"42["valor_atualizado",{"id_servico":"S1","novo_valor":"180.00","novo_status":"confirmar valor"}]"#);

    let session = &h.session;
    assert!(eventually(|| async move { session.get("S1").await.and_then(|r| r.value) == Some(180.0) }).await);
    let record = h.session.get("S1").await.unwrap();
    assert_eq!(record.status, ServiceStatus::ConfirmValue);
    let notifier = &h.notifier;
    assert!(eventually(|| async move { notifier.titles().contains(&"Service value updated".to_string()) }).await);
}

#[tokio::test]
async fn test_new_appointment_push_triggers_refetch() {
    let transport = ScriptedTransport::new();
    let mut server = transport.accept();
    let h = start(config(ViewerRole::Provider), transport, Interest::All).await;
    server.handshake("u-1", 25000).await;

    h.backend
        .records
        .lock()
        .unwrap()
        .push(AppointmentRecord::new("S4", day(14), ServiceStatus::Pending));
    server.send(r#"42["novo_agendamento",{"id_servico":"S4"}]"#);

    let session = &h.session;
    assert!(eventually(|| async move { session.get("S4").await.is_some() }).await);
    assert_eq!(h.session.view(&ViewFilter::all()).await[0].service_id, "S4");
    let notifier = &h.notifier;
    assert!(eventually(|| async move { notifier.titles().contains(&"New request".to_string()) }).await);
}

#[tokio::test]
async fn test_new_appointment_is_announced_even_if_refetch_fails() {
    let transport = ScriptedTransport::new();
    let mut server = transport.accept();
    let h = start(config(ViewerRole::Provider), transport, Interest::All).await;
    server.handshake("u-1", 25000).await;

    h.backend.script(Duration::ZERO, Err(500));
    server.send(r#"42["novo_agendamento",{"id_servico":"S4"}]"#);

    let notifier = &h.notifier;
    assert!(eventually(|| async move { notifier.titles().contains(&"New request".to_string()) }).await);
    assert_eq!(notifier.alerts(), 1);
    assert_eq!(h.session.view(&ViewFilter::all()).await.len(), 3);
}

#[tokio::test]
async fn test_single_interest_ignores_other_services() {
    let transport = ScriptedTransport::new();
    let mut server = transport.accept();
    let h = start(config(ViewerRole::Requester), transport, Interest::Single("S1".into())).await;
    server.handshake("u-1", 25000).await;

    server.send(r#"42["atualizacao_status",{"id_servico":"S2","novo_status":"cancelado"}]"#);
    server.send(r#"42["atualizacao_status",{"id_servico":"S1","novo_status":"confirmado"}]"#);

    let session = &h.session;
    assert!(
        eventually(|| async move {
            session.get("S1").await.map(|r| r.status) == Some(ServiceStatus::Confirmed)
        })
        .await
    );
    // Events are handled in receipt order, so S2's push has already been dropped.
    assert_eq!(h.session.get("S2").await.unwrap().status, ServiceStatus::Confirmed);
}

#[tokio::test]
async fn test_push_for_unknown_service_is_not_applied() {
    let transport = ScriptedTransport::new();
    let mut server = transport.accept();
    let h = start(config(ViewerRole::Requester), transport, Interest::All).await;
    server.handshake("u-1", 25000).await;

    let applied = Arc::new(AtomicUsize::new(0));
    let counter = applied.clone();
    let _sub = h.session.on_patch(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    server.send(r#"42["atualizacao_status",{"id_servico":"S99","novo_status":"cancelado"}]"#);
    server.send(r#"42["atualizacao_status",{"id_servico":"S3","novo_status":"cancelado"}]"#);

    let counted = &applied;
    assert!(eventually(|| async move { counted.load(Ordering::SeqCst) == 1 }).await);
    assert_eq!(h.session.get("S3").await.unwrap().status, ServiceStatus::Cancelled);
    assert!(h.session.get("S99").await.is_none());
}

#[tokio::test]
async fn test_shutdown_stops_live_processing() {
    let transport = ScriptedTransport::new();
    let mut server = transport.accept();
    let h = start(config(ViewerRole::Requester), transport.clone(), Interest::All).await;
    server.handshake("u-1", 25000).await;

    let applied = Arc::new(AtomicUsize::new(0));
    let counter = applied.clone();
    let sub = h.session.on_patch(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    let mut events = h.session.subscribe_events();

    h.session.shutdown().await;

    // Connection is gone: the client end no longer reads frames.
    assert!(server
        .to_client
        .send(r#"42["atualizacao_status",{"id_servico":"S1","novo_status":"cancelado"}]"#.into())
        .is_err());
    assert_eq!(applied.load(Ordering::SeqCst), 0);
    assert_eq!(transport.attempts(), 1);

    let mut closed = false;
    while let Ok(event) = events.try_recv() {
        closed |= event == AgendaEvent::Connection(ConnectionState::Closed);
    }
    assert!(closed);
    sub.unsubscribe();
}

#[tokio::test]
async fn test_optimistic_status_update_keeps_local_change_on_failure() {
    let h = start(offline_config(ViewerRole::Provider), ScriptedTransport::new(), Interest::All).await;
    *h.backend.fail_status_updates.lock().unwrap() = true;

    let outcome = h.session.update_status("S1", ServiceStatus::Confirmed).await.unwrap();
    assert_eq!(outcome, PatchOutcome::Applied);
    assert_eq!(h.session.get("S1").await.unwrap().status, ServiceStatus::Confirmed);

    let notifier = &h.notifier;
    assert!(eventually(|| async move { notifier.alerts() == 1 }).await);
    assert_eq!(
        h.backend.status_updates.lock().unwrap().clone(),
        vec![("S1".to_string(), ServiceStatus::Confirmed)]
    );
    // Local change is not rolled back.
    assert_eq!(h.session.get("S1").await.unwrap().status, ServiceStatus::Confirmed);

    assert!(matches!(
        h.session.update_status(" ", ServiceStatus::Cancelled).await,
        Err(AgendaError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_rating_marks_record_rated() {
    let h = start(offline_config(ViewerRole::Requester), ScriptedTransport::new(), Interest::All).await;

    h.session.submit_rating("S3", 5, "Excelente").await.unwrap();

    assert!(h.session.get("S3").await.unwrap().rated);
    let ratings = h.backend.ratings.lock().unwrap().clone();
    assert_eq!(ratings.len(), 1);
    assert_eq!(ratings[0].provider_id, "f-1");
    assert_eq!(ratings[0].requester_id, "u-1");

    assert!(h.session.submit_rating("S3", 9, "").await.is_err());
    assert!(h.session.submit_rating("S404", 4, "").await.is_err());
    assert_eq!(h.backend.ratings.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_providers_cannot_rate() {
    let h = start(offline_config(ViewerRole::Provider), ScriptedTransport::new(), Interest::All).await;

    let err = h.session.submit_rating("S3", 5, "").await.unwrap_err();
    assert!(matches!(err, AgendaError::InvalidInput(_)));
    assert!(!h.session.get("S3").await.unwrap().rated);
}

#[tokio::test]
async fn test_failed_initial_fetch_alerts_and_recovers() {
    let backend = ScriptedBackend::with_records(agenda());
    backend.script(Duration::ZERO, Err(503));
    let notifier = Arc::new(RecordingNotifier::default());

    let session = AgendaSession::builder(offline_config(ViewerRole::Requester))
        .backend(backend.clone())
        .transport(ScriptedTransport::new())
        .notifier(notifier.clone())
        .clock(Arc::new(FixedClock(day(14))))
        .start()
        .await
        .unwrap();

    assert!(session.view(&ViewFilter::all()).await.is_empty());
    assert_eq!(notifier.alerts(), 1);

    let outcome = session.refresh().await.unwrap();
    assert_eq!(outcome, ReplaceOutcome::Applied { replayed: 0 });
    assert_eq!(session.view(&ViewFilter::all()).await.len(), 3);
}

#[tokio::test]
async fn test_stale_fetch_response_is_discarded() {
    let h = start(offline_config(ViewerRole::Requester), ScriptedTransport::new(), Interest::All).await;

    // Older fetch answers last with an outdated list.
    h.backend.script(
        Duration::from_millis(100),
        Ok(vec![AppointmentRecord::new("OLD", day(15), ServiceStatus::Pending)]),
    );
    h.backend.script(
        Duration::ZERO,
        Ok(vec![AppointmentRecord::new("NEW", day(16), ServiceStatus::Pending)]),
    );

    let (older, newer) = tokio::join!(h.session.refresh(), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.session.refresh().await
    });

    assert_eq!(newer.unwrap(), ReplaceOutcome::Applied { replayed: 0 });
    assert_eq!(older.unwrap(), ReplaceOutcome::Discarded);
    assert_eq!(ids(&h.session.view(&ViewFilter::all()).await), vec!["NEW"]);
}

#[tokio::test]
async fn test_patch_during_fetch_survives_replacement() {
    let h = start(offline_config(ViewerRole::Provider), ScriptedTransport::new(), Interest::All).await;

    // The in-flight response still carries the pre-patch status.
    h.backend.script(Duration::from_millis(100), Ok(agenda()));
    let session = &h.session;
    let (refreshed, updated) = tokio::join!(session.refresh(), async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        session.update_status("S1", ServiceStatus::Confirmed).await
    });

    assert_eq!(updated.unwrap(), PatchOutcome::Applied);
    assert_eq!(refreshed.unwrap(), ReplaceOutcome::Applied { replayed: 1 });
    assert_eq!(h.session.get("S1").await.unwrap().status, ServiceStatus::Confirmed);
}

#[tokio::test]
async fn test_abandoned_refresh_still_completes() {
    let h = start(offline_config(ViewerRole::Provider), ScriptedTransport::new(), Interest::All).await;
    let mut events = h.session.subscribe_events();
    h.backend.script(
        Duration::from_millis(200),
        Ok(vec![AppointmentRecord::new("LATE", day(16), ServiceStatus::Pending)]),
    );

    let gave_up = tokio::time::timeout(Duration::from_millis(10), h.session.refresh()).await;
    assert!(gave_up.is_err());

    let session = &h.session;
    assert!(eventually(|| async move { session.get("LATE").await.is_some() }).await);
    let replaced = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(AgendaEvent::RecordsReplaced { count, .. }) = events.recv().await {
                return count;
            }
        }
    })
    .await;
    assert_eq!(replaced.ok(), Some(1));

    // Nothing is left waiting, so a later fetch replays no earlier updates.
    for _ in 0..50 {
        h.session.update_status("LATE", ServiceStatus::Confirmed).await.unwrap();
    }
    assert_eq!(h.session.refresh().await.unwrap(), ReplaceOutcome::Applied { replayed: 0 });
}
