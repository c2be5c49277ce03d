//! Integration tests for the event dispatcher: the at-most-one-call
//! invariant, the dispense cooldown, and update mutual exclusion, driven
//! through the same handle the real event sources use.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use dogphone::actuator::{ActuatorController, DispenseOutcome, SimulatedServo};
use dogphone::config::{CallConfig, ServoConfig};
use dogphone::dispatcher::{
    self, CallReply, Collaborators, DispatcherHandle, DispenseReply, Source, UpdateReply,
};
use dogphone::error::AppError;
use dogphone::launch::{CallOpener, LaunchFuture};
use dogphone::notify::{NotificationGateway, SendFuture};
use dogphone::update::{
    RestartFuture, SystemSupervisor, UpdateAgent, UpdateFuture, UpdateOutcome,
};

// ── Test doubles ─────────────────────────────────────────────────────────────

/// Counts opens; optionally holds each open until released, so a test can
/// keep a call "in flight" for as long as it needs.
struct GateOpener {
    opens: AtomicUsize,
    release: Option<Arc<Notify>>,
}

impl GateOpener {
    fn counting() -> Arc<Self> {
        Arc::new(Self { opens: AtomicUsize::new(0), release: None })
    }

    fn gated(release: Arc<Notify>) -> Arc<Self> {
        Arc::new(Self { opens: AtomicUsize::new(0), release: Some(release) })
    }

    fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

impl CallOpener for GateOpener {
    fn open(&self, _url: &str) -> LaunchFuture {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let release = self.release.clone();
        Box::pin(async move {
            if let Some(release) = release {
                release.notified().await;
            }
            Ok(())
        })
    }
}

struct CollectingGateway {
    sent: Mutex<Vec<String>>,
}

impl CollectingGateway {
    fn new() -> Arc<Self> {
        Arc::new(Self { sent: Mutex::new(Vec::new()) })
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl NotificationGateway for CollectingGateway {
    fn send(&self, text: &str) -> SendFuture {
        self.sent.lock().unwrap().push(text.to_string());
        Box::pin(async { Ok(()) })
    }
}

struct FailingGateway;

impl NotificationGateway for FailingGateway {
    fn send(&self, _text: &str) -> SendFuture {
        Box::pin(async { Err(AppError::Notify("telegram unreachable".into())) })
    }
}

/// Update agent that counts attempts and holds each one until released.
struct GateUpdateAgent {
    attempts: AtomicUsize,
    release: Arc<Notify>,
    outcome: UpdateOutcome,
}

impl GateUpdateAgent {
    fn new(release: Arc<Notify>, outcome: UpdateOutcome) -> Arc<Self> {
        Arc::new(Self { attempts: AtomicUsize::new(0), release, outcome })
    }

    fn attempt_count(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl UpdateAgent for GateUpdateAgent {
    fn run_update(&self) -> UpdateFuture {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let release = self.release.clone();
        let outcome = self.outcome;
        Box::pin(async move {
            release.notified().await;
            Ok(outcome)
        })
    }
}

struct RecordingSupervisor {
    restarts: AtomicUsize,
}

impl RecordingSupervisor {
    fn new() -> Arc<Self> {
        Arc::new(Self { restarts: AtomicUsize::new(0) })
    }

    fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::SeqCst)
    }
}

impl SystemSupervisor for RecordingSupervisor {
    fn restart(&self) -> RestartFuture {
        self.restarts.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(()) })
    }
}

// ── Harness ──────────────────────────────────────────────────────────────────

fn call_config() -> CallConfig {
    CallConfig {
        target: "123 456 789".into(),
        credential: String::new(),
        room: "kennel".into(),
        domain: "meet.jit.si".into(),
    }
}

fn servo_config() -> ServoConfig {
    ServoConfig { gpio: 27, pulse_min: 0.5, pulse_max: 2.5 }
}

struct Harness {
    handle: DispatcherHandle,
    shutdown: CancellationToken,
}

fn spawn_dispatcher(
    opener: Arc<dyn CallOpener>,
    gateway: Option<Arc<dyn NotificationGateway>>,
    update_agent: Option<Arc<dyn UpdateAgent>>,
    supervisor: Arc<dyn SystemSupervisor>,
) -> Harness {
    let collab = Collaborators {
        opener,
        gateway,
        actuator: Arc::new(ActuatorController::new(Arc::new(SimulatedServo), &servo_config())),
        update_agent,
        supervisor,
    };
    let shutdown = CancellationToken::new();
    let handle = dispatcher::spawn(call_config(), collab, shutdown.clone());
    Harness { handle, shutdown }
}

/// Poll the status snapshot until `pred` holds. Paused-time tests
/// auto-advance through the sleep.
async fn wait_for(handle: &DispatcherHandle, pred: impl Fn(&dispatcher::StatusSnapshot) -> bool) {
    for _ in 0..200 {
        let status = handle.status().await.expect("dispatcher alive");
        if pred(&status) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

// ── Call tests ───────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn second_call_during_in_flight_is_dropped() {
    let release = Arc::new(Notify::new());
    let opener = GateOpener::gated(release.clone());
    let gateway = CollectingGateway::new();
    let h = spawn_dispatcher(
        opener.clone(),
        Some(gateway.clone()),
        None,
        RecordingSupervisor::new(),
    );

    assert_eq!(h.handle.request_call(Source::Button).await.unwrap(), CallReply::Started);
    // Still in flight: the opener is gated.
    assert_eq!(h.handle.request_call(Source::HttpTest).await.unwrap(), CallReply::Busy);
    assert_eq!(h.handle.request_call(Source::Chat).await.unwrap(), CallReply::Busy);

    release.notify_one();
    wait_for(&h.handle, |s| !s.call_in_flight).await;

    // Exactly one open side effect and one notification.
    assert_eq!(opener.open_count(), 1);
    assert_eq!(gateway.sent().len(), 1);
    assert!(gateway.sent()[0].contains("https://zoom.us/j/123456789"));

    h.shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn call_flag_resets_after_completion() {
    let release = Arc::new(Notify::new());
    let opener = GateOpener::gated(release.clone());
    let h = spawn_dispatcher(opener.clone(), None, None, RecordingSupervisor::new());

    assert_eq!(h.handle.request_call(Source::Button).await.unwrap(), CallReply::Started);
    release.notify_one();
    wait_for(&h.handle, |s| !s.call_in_flight).await;

    // A fresh request is accepted again.
    assert_eq!(h.handle.request_call(Source::Button).await.unwrap(), CallReply::Started);
    release.notify_one();
    wait_for(&h.handle, |s| !s.call_in_flight).await;

    assert_eq!(opener.open_count(), 2);
    h.shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn call_without_recipient_opens_but_does_not_notify() {
    let opener = GateOpener::counting();
    let h = spawn_dispatcher(opener.clone(), None, None, RecordingSupervisor::new());

    assert_eq!(h.handle.request_call(Source::HttpTest).await.unwrap(), CallReply::Started);
    wait_for(&h.handle, |s| !s.call_in_flight).await;

    assert_eq!(opener.open_count(), 1);
    h.shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn notification_failure_does_not_roll_back_the_call() {
    let opener = GateOpener::counting();
    let h = spawn_dispatcher(
        opener.clone(),
        Some(Arc::new(FailingGateway)),
        None,
        RecordingSupervisor::new(),
    );

    assert_eq!(h.handle.request_call(Source::Button).await.unwrap(), CallReply::Started);
    wait_for(&h.handle, |s| !s.call_in_flight).await;

    // The open happened and the dispatcher is healthy again.
    assert_eq!(opener.open_count(), 1);
    assert_eq!(h.handle.request_call(Source::Button).await.unwrap(), CallReply::Started);

    h.shutdown.cancel();
}

// ── Dispense tests ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn dispense_within_cooldown_is_rejected() {
    let h = spawn_dispatcher(GateOpener::counting(), None, None, RecordingSupervisor::new());

    let first = h.handle.request_dispense(Source::Chat).await.unwrap();
    assert_eq!(first, DispenseReply::Done(DispenseOutcome::Simulated));

    let second = h.handle.request_dispense(Source::Chat).await.unwrap();
    assert_eq!(second, DispenseReply::CoolingDown);

    h.shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn dispense_accepted_after_cooldown_elapses() {
    let h = spawn_dispatcher(GateOpener::counting(), None, None, RecordingSupervisor::new());

    let first = h.handle.request_dispense(Source::Chat).await.unwrap();
    assert_eq!(first, DispenseReply::Done(DispenseOutcome::Simulated));

    tokio::time::advance(dispatcher::DISPENSE_COOLDOWN + Duration::from_millis(100)).await;

    let second = h.handle.request_dispense(Source::Button).await.unwrap();
    assert_eq!(second, DispenseReply::Done(DispenseOutcome::Simulated));

    h.shutdown.cancel();
}

// ── Update tests ─────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn concurrent_updates_run_exactly_one_attempt() {
    let release = Arc::new(Notify::new());
    let agent = GateUpdateAgent::new(release.clone(), UpdateOutcome::AlreadyUpToDate);
    let supervisor = RecordingSupervisor::new();
    let h = spawn_dispatcher(
        GateOpener::counting(),
        None,
        Some(agent.clone()),
        supervisor.clone(),
    );

    let handle_a = h.handle.clone();
    let first = tokio::spawn(async move { handle_a.request_update(Source::Chat).await });

    wait_for(&h.handle, |s| s.update_in_progress).await;
    let second = h.handle.request_update(Source::Chat).await.unwrap();
    assert_eq!(second, UpdateReply::Busy);

    release.notify_one();
    assert_eq!(first.await.unwrap().unwrap(), UpdateReply::AlreadyUpToDate);
    wait_for(&h.handle, |s| !s.update_in_progress).await;

    assert_eq!(agent.attempt_count(), 1);
    assert_eq!(supervisor.restart_count(), 0);

    h.shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn successful_update_requests_restart() {
    let release = Arc::new(Notify::new());
    let agent = GateUpdateAgent::new(release.clone(), UpdateOutcome::Updated);
    let supervisor = RecordingSupervisor::new();
    let h = spawn_dispatcher(
        GateOpener::counting(),
        None,
        Some(agent.clone()),
        supervisor.clone(),
    );

    let handle = h.handle.clone();
    let request = tokio::spawn(async move { handle.request_update(Source::Chat).await });
    wait_for(&h.handle, |s| s.update_in_progress).await;
    release.notify_one();

    assert_eq!(request.await.unwrap().unwrap(), UpdateReply::Updated);
    wait_for(&h.handle, |s| !s.update_in_progress).await;
    assert_eq!(supervisor.restart_count(), 1);

    h.shutdown.cancel();
}

#[tokio::test(start_paused = true)]
async fn failed_update_clears_the_flag() {
    struct FailingAgent;

    impl UpdateAgent for FailingAgent {
        fn run_update(&self) -> UpdateFuture {
            Box::pin(async { Err(AppError::Update("update timed out".into())) })
        }
    }

    let supervisor = RecordingSupervisor::new();
    let h = spawn_dispatcher(
        GateOpener::counting(),
        None,
        Some(Arc::new(FailingAgent)),
        supervisor.clone(),
    );

    match h.handle.request_update(Source::Chat).await.unwrap() {
        UpdateReply::Failed(msg) => assert!(msg.contains("timed out")),
        other => panic!("expected Failed, got {other:?}"),
    }
    wait_for(&h.handle, |s| !s.update_in_progress).await;

    // No restart, and a new attempt is accepted.
    assert_eq!(supervisor.restart_count(), 0);
    match h.handle.request_update(Source::Chat).await.unwrap() {
        UpdateReply::Failed(_) => {}
        other => panic!("expected Failed, got {other:?}"),
    }

    h.shutdown.cancel();
}
