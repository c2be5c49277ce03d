//! Event dispatcher — single authority over device actuation and
//! call-initiation.
//!
//! # Single-actor model
//!
//! All event sources (button edge, telegram command, local HTTP trigger)
//! talk to one actor task through a [`DispatcherHandle`]. The actor owns
//! [`DeviceState`] exclusively, so the guarded transitions — "is a call
//! already being opened", "is an update running", the dispense cooldown
//! check-and-set — are trivially atomic: two sources racing to start the
//! same action cannot both win.
//!
//! # Worker tasks
//!
//! Side effects that take real time (opening the browser, the notification
//! send, the servo motion, the git pull) run in spawned worker tasks so
//! the actor — and with it the hardware-callback path — stays responsive.
//! Workers report completion through an unbounded internal channel; every
//! guarded flag set here has a matching reset on every worker exit path.
//!
//! Requests that arrive while a guard is held are rejected, never queued;
//! nothing in this system is cancelable mid-flight.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actuator::{ActuatorController, DispenseOutcome};
use crate::call_url;
use crate::config::{self, CallConfig};
use crate::error::AppError;
use crate::launch::CallOpener;
use crate::notify::NotificationGateway;
use crate::update::{SystemSupervisor, UpdateAgent, UpdateOutcome};

/// Minimum interval between accepted dispenses. Same constant as the
/// button debounce: either alone should suffice, both are kept.
pub const DISPENSE_COOLDOWN: Duration = Duration::from_millis(3000);

/// Request buffer between event sources and the actor.
const REQUEST_BUFFER: usize = 32;

// ── Actions and replies ──────────────────────────────────────────────────────

/// Where an action came from. Logging/observability only — all sources
/// get identical handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Button,
    Chat,
    HttpTest,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Button => "button",
            Self::Chat => "chat",
            Self::HttpTest => "http-test",
        })
    }
}

/// Reply to a call request, resolved at acceptance time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallReply {
    /// Accepted; the call-open side effect is on its way.
    Started,
    /// A call is already being opened; this request was dropped.
    Busy,
    /// No call target resolves; nothing to open.
    NotConfigured,
}

/// Reply to a dispense request, resolved after the motion (or rejection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispenseReply {
    Done(DispenseOutcome),
    /// Inside the minimum inter-dispense interval; request dropped.
    CoolingDown,
    Failed(String),
}

/// Reply to an update request, resolved after the pull (or rejection).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateReply {
    /// Pulled new commits; a device restart has been requested.
    Updated,
    AlreadyUpToDate,
    /// An update is already running; this request was dropped.
    Busy,
    Failed(String),
}

/// Informational chat replies — no state mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    Start,
    Version,
}

/// Point-in-time view of [`DeviceState`] for the status endpoint.
#[derive(Debug, Clone, Copy)]
pub struct StatusSnapshot {
    pub configured: bool,
    pub messaging_available: bool,
    pub call_in_flight: bool,
    pub update_in_progress: bool,
    /// Remaining dispense cooldown, `None` when a dispense would be accepted.
    pub dispense_cooldown_remaining: Option<Duration>,
}

// ── Messages ─────────────────────────────────────────────────────────────────

enum Msg {
    Call {
        source: Source,
        reply: Option<oneshot::Sender<CallReply>>,
    },
    Dispense {
        source: Source,
        reply: Option<oneshot::Sender<DispenseReply>>,
    },
    Update {
        source: Source,
        reply: Option<oneshot::Sender<UpdateReply>>,
    },
    Info {
        kind: InfoKind,
        reply: oneshot::Sender<String>,
    },
    Status {
        reply: oneshot::Sender<StatusSnapshot>,
    },
}

/// Completion signals from worker tasks back to the actor. Unbounded so a
/// worker can never block on reporting.
enum Internal {
    CallFinished,
    DispenseFinished,
    UpdateFinished,
}

// ── Handle ───────────────────────────────────────────────────────────────────

/// Cloneable handle held by every event source.
#[derive(Clone)]
pub struct DispatcherHandle {
    tx: mpsc::Sender<Msg>,
}

impl DispatcherHandle {
    /// Request a call and await the acceptance decision.
    pub async fn request_call(&self, source: Source) -> Result<CallReply, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Msg::Call { source, reply: Some(reply_tx) }).await?;
        reply_rx.await.map_err(|_| closed())
    }

    /// Fire-and-forget call request for the hardware-callback path: never
    /// blocks, a full queue only logs.
    pub fn trigger_call(&self, source: Source) {
        if let Err(e) = self.tx.try_send(Msg::Call { source, reply: None }) {
            warn!(%source, "call request dropped: {e}");
        }
    }

    /// Request a dispense and await the outcome (rejection is immediate,
    /// success waits for the motion to finish).
    pub async fn request_dispense(&self, source: Source) -> Result<DispenseReply, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Msg::Dispense { source, reply: Some(reply_tx) }).await?;
        reply_rx.await.map_err(|_| closed())
    }

    /// Request an update and await the outcome.
    pub async fn request_update(&self, source: Source) -> Result<UpdateReply, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Msg::Update { source, reply: Some(reply_tx) }).await?;
        reply_rx.await.map_err(|_| closed())
    }

    /// Fetch an informational reply text.
    pub async fn info(&self, kind: InfoKind) -> Result<String, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Msg::Info { kind, reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| closed())
    }

    /// Snapshot the device state for the status endpoint.
    pub async fn status(&self) -> Result<StatusSnapshot, AppError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Msg::Status { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| closed())
    }

    async fn send(&self, msg: Msg) -> Result<(), AppError> {
        self.tx.send(msg).await.map_err(|_| closed())
    }
}

fn closed() -> AppError {
    AppError::Source("dispatcher is gone".into())
}

// ── Collaborators ────────────────────────────────────────────────────────────

/// External capabilities the dispatcher coordinates. Optional ones encode
/// the device's feature flags: no gateway ⇒ notifications degrade to a
/// logged skip, no update agent ⇒ update requests are refused.
pub struct Collaborators {
    pub opener: Arc<dyn CallOpener>,
    pub gateway: Option<Arc<dyn NotificationGateway>>,
    pub actuator: Arc<ActuatorController>,
    pub update_agent: Option<Arc<dyn UpdateAgent>>,
    pub supervisor: Arc<dyn SystemSupervisor>,
}

// ── State ────────────────────────────────────────────────────────────────────

/// Mutable device state. Owned exclusively by the actor; nothing else may
/// mutate these fields.
#[derive(Debug, Default)]
struct DeviceState {
    call_in_flight: bool,
    update_in_progress: bool,
    last_dispense_at: Option<Instant>,
}

// ── Actor ────────────────────────────────────────────────────────────────────

/// Spawn the dispatcher actor and return the handle event sources use.
pub fn spawn(
    call: CallConfig,
    collab: Collaborators,
    shutdown: CancellationToken,
) -> DispatcherHandle {
    let (tx, rx) = mpsc::channel(REQUEST_BUFFER);
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    let actor = Dispatcher {
        call,
        collab,
        state: DeviceState::default(),
        internal_tx,
        workers: JoinSet::new(),
    };
    tokio::spawn(actor.run(rx, internal_rx, shutdown));

    DispatcherHandle { tx }
}

struct Dispatcher {
    call: CallConfig,
    collab: Collaborators,
    state: DeviceState,
    internal_tx: mpsc::UnboundedSender<Internal>,
    workers: JoinSet<()>,
}

impl Dispatcher {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<Msg>,
        mut internal_rx: mpsc::UnboundedReceiver<Internal>,
        shutdown: CancellationToken,
    ) {
        info!("dispatcher running");
        loop {
            // Reap finished workers opportunistically.
            while self.workers.try_join_next().is_some() {}

            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("dispatcher shutting down");
                    break;
                }

                internal = internal_rx.recv() => {
                    if let Some(internal) = internal {
                        self.handle_internal(internal);
                    }
                }

                msg = rx.recv() => {
                    match msg {
                        Some(msg) => self.handle(msg),
                        None => {
                            info!("all event sources gone, dispatcher exiting");
                            break;
                        }
                    }
                }
            }
        }

        // Let in-flight motion and notifications finish before exiting;
        // abrupt termination mid-motion is a last resort only.
        while self.workers.join_next().await.is_some() {}
    }

    fn handle(&mut self, msg: Msg) {
        match msg {
            Msg::Call { source, reply } => self.handle_call(source, reply),
            Msg::Dispense { source, reply } => self.handle_dispense(source, reply),
            Msg::Update { source, reply } => self.handle_update(source, reply),
            Msg::Info { kind, reply } => {
                let _ = reply.send(info_text(kind));
            }
            Msg::Status { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::CallFinished => {
                debug!("call sequence finished");
                self.state.call_in_flight = false;
            }
            Internal::DispenseFinished => {
                // Cooldown was stamped at acceptance; nothing to reset.
                debug!("dispense motion finished");
            }
            Internal::UpdateFinished => {
                debug!("update attempt finished");
                self.state.update_in_progress = false;
            }
        }
    }

    /// Accept or reject a call request, then run the open + notify
    /// sequence in a worker. At most one call-open is ever in flight;
    /// later requests are dropped, not queued.
    fn handle_call(&mut self, source: Source, reply: Option<oneshot::Sender<CallReply>>) {
        if self.state.call_in_flight {
            debug!(%source, "call already in flight — dropping request");
            respond(reply, CallReply::Busy);
            return;
        }
        let Some(url) = call_url::resolve(&self.call) else {
            warn!(%source, "call requested but no call target configured");
            respond(reply, CallReply::NotConfigured);
            return;
        };

        self.state.call_in_flight = true;
        info!(%source, %url, "starting call");
        respond(reply, CallReply::Started);

        let opener = self.collab.opener.clone();
        let gateway = self.collab.gateway.clone();
        let internal_tx = self.internal_tx.clone();
        self.workers.spawn(async move {
            // Launch failure is logged with the URL; it does not stop the
            // notification, which lets the owner join from a phone anyway.
            if let Err(e) = opener.open(&url).await {
                warn!("{e}");
            }
            match gateway {
                Some(gateway) => {
                    let text =
                        format!("🐕 Your dog is calling!\n\nJoin the video call:\n{url}");
                    match gateway.send(&text).await {
                        Ok(()) => info!("call notification sent"),
                        Err(e) => warn!("call notification failed: {e}"),
                    }
                }
                None => warn!(%url, "no recipient configured; join the call manually"),
            }
            let _ = internal_tx.send(Internal::CallFinished);
        });
    }

    /// Accept or reject a dispense request, then run the motion in a
    /// worker. The cooldown stamp happens at acceptance so the
    /// check-and-set is atomic within the actor.
    fn handle_dispense(&mut self, source: Source, reply: Option<oneshot::Sender<DispenseReply>>) {
        let now = Instant::now();
        if let Some(last) = self.state.last_dispense_at {
            let since = now.duration_since(last);
            if since < DISPENSE_COOLDOWN {
                // The button-path debounce normally collapses these before
                // they get here; chat and http requests land here directly.
                debug!(%source, ?since, "dispense inside cooldown window — dropped");
                respond(reply, DispenseReply::CoolingDown);
                return;
            }
        }
        self.state.last_dispense_at = Some(now);
        info!(%source, "dispensing treat");

        let actuator = self.collab.actuator.clone();
        let internal_tx = self.internal_tx.clone();
        self.workers.spawn(async move {
            let outcome = match actuator.dispense().await {
                Ok(done) => DispenseReply::Done(done),
                Err(e) => {
                    warn!("treat dispense failed: {e}");
                    DispenseReply::Failed(e.to_string())
                }
            };
            if let Some(reply) = reply {
                let _ = reply.send(outcome);
            }
            let _ = internal_tx.send(Internal::DispenseFinished);
        });
    }

    /// Accept or reject an update request, run the pull in a worker, and
    /// on success hand the restart intent to the system supervisor. The
    /// requester hears the outcome before any restart is issued.
    fn handle_update(&mut self, source: Source, reply: Option<oneshot::Sender<UpdateReply>>) {
        let Some(agent) = self.collab.update_agent.clone() else {
            debug!(%source, "update requested but updates are not enabled");
            respond(reply, UpdateReply::Failed("updates are not enabled on this device".into()));
            return;
        };
        if self.state.update_in_progress {
            info!(%source, "update already in progress — rejecting");
            respond(reply, UpdateReply::Busy);
            return;
        }

        self.state.update_in_progress = true;
        info!(%source, "running update");

        let supervisor = self.collab.supervisor.clone();
        let internal_tx = self.internal_tx.clone();
        self.workers.spawn(async move {
            let result = agent.run_update().await;
            let (outcome, restart) = match &result {
                Ok(UpdateOutcome::Updated) => (UpdateReply::Updated, true),
                Ok(UpdateOutcome::AlreadyUpToDate) => (UpdateReply::AlreadyUpToDate, false),
                Err(e) => {
                    warn!("update failed: {e}");
                    (UpdateReply::Failed(e.to_string()), false)
                }
            };
            if let Some(reply) = reply {
                let _ = reply.send(outcome);
            }
            if restart {
                if let Err(e) = supervisor.restart().await {
                    warn!("restart request failed: {e}");
                }
            }
            let _ = internal_tx.send(Internal::UpdateFinished);
        });
    }

    fn snapshot(&self) -> StatusSnapshot {
        let messaging_available = self.collab.gateway.is_some();
        let dispense_cooldown_remaining = self.state.last_dispense_at.and_then(|last| {
            DISPENSE_COOLDOWN.checked_sub(Instant::now().duration_since(last))
        });
        StatusSnapshot {
            configured: messaging_available && call_url::resolve(&self.call).is_some(),
            messaging_available,
            call_in_flight: self.state.call_in_flight,
            update_in_progress: self.state.update_in_progress,
            dispense_cooldown_remaining: dispense_cooldown_remaining
                .filter(|d| !d.is_zero()),
        }
    }
}

fn respond<T>(reply: Option<oneshot::Sender<T>>, value: T) {
    if let Some(reply) = reply {
        // Receiver may have given up waiting; that is fine.
        let _ = reply.send(value);
    }
}

fn info_text(kind: InfoKind) -> String {
    match kind {
        InfoKind::Start => "DogPhone 🐕\n\n\
            • When your dog presses the button, you'll get a link to join the video call.\n\
            • Send /cookie to dispense a treat."
            .to_string(),
        InfoKind::Version => format!("DogPhone v{}", config::VERSION),
    }
}
