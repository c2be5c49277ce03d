//! Hardware button source — drains raw edge events and debounces them.
//!
//! The electrical side is out of scope: an edge-detection layer (GPIO
//! interrupt thread on a real device, a test helper elsewhere) pushes
//! timestamps into the bounded [`ButtonFeed`]. Decoupling the interrupt
//! context from business logic this way keeps the callback path fast —
//! feeding the channel is a `try_send`.
//!
//! Debouncing happens here, at the source: edges inside the configured
//! window after an accepted edge are collapsed into that logical press.
//! An accepted edge becomes a fire-and-forget call request.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::dispatcher::{DispatcherHandle, Source};
use crate::runtime::{EventSource, SourceFuture};

/// Raw edges buffered between the interrupt context and the drain loop.
const EDGE_BUFFER: usize = 8;

/// Sender half handed to the edge-detection layer.
#[derive(Clone)]
pub struct ButtonFeed {
    tx: mpsc::Sender<Instant>,
}

impl ButtonFeed {
    /// Record an edge at `at`. Never blocks: a full buffer drops the edge
    /// with a log line (the press is lost, the hardware stays responsive).
    pub fn edge(&self, at: Instant) {
        if self.tx.try_send(at).is_err() {
            warn!("button edge dropped (buffer full or source gone)");
        }
    }

    /// Record an edge happening now.
    pub fn press(&self) {
        self.edge(Instant::now());
    }
}

/// The drain-and-debounce loop.
pub struct ButtonSource {
    source_id: String,
    rx: mpsc::Receiver<Instant>,
    debounce: Duration,
    dispatcher: DispatcherHandle,
}

/// Create the feed/source pair for one physical button.
pub fn channel(
    source_id: impl Into<String>,
    debounce: Duration,
    dispatcher: DispatcherHandle,
) -> (ButtonFeed, ButtonSource) {
    let (tx, rx) = mpsc::channel(EDGE_BUFFER);
    let source = ButtonSource {
        source_id: source_id.into(),
        rx,
        debounce,
        dispatcher,
    };
    (ButtonFeed { tx }, source)
}

impl EventSource for ButtonSource {
    fn id(&self) -> &str {
        &self.source_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> SourceFuture {
        Box::pin(run_button(*self, shutdown))
    }
}

async fn run_button(source: ButtonSource, shutdown: CancellationToken) -> Result<(), crate::error::AppError> {
    let ButtonSource { source_id, mut rx, debounce, dispatcher } = source;
    info!(%source_id, ?debounce, "button source running");

    let mut last_accepted: Option<Instant> = None;

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                info!(%source_id, "shutdown signal received — closing button source");
                return Ok(());
            }

            edge = rx.recv() => {
                let Some(at) = edge else {
                    info!(%source_id, "edge feed closed, button source exiting");
                    return Ok(());
                };
                if accept_edge(&mut last_accepted, at, debounce) {
                    debug!(%source_id, "button press accepted");
                    dispatcher.trigger_call(Source::Button);
                } else {
                    debug!(%source_id, "button edge inside debounce window — ignored");
                }
            }
        }
    }
}

/// Debounce check-and-set over the edge's own timestamp, so bursts that
/// queued up in the buffer are still collapsed correctly.
fn accept_edge(last_accepted: &mut Option<Instant>, at: Instant, debounce: Duration) -> bool {
    let accept = match *last_accepted {
        None => true,
        Some(last) => at.duration_since(last) >= debounce,
    };
    if accept {
        *last_accepted = Some(at);
    }
    accept
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEBOUNCE: Duration = Duration::from_millis(3000);

    #[tokio::test(start_paused = true)]
    async fn edges_inside_window_are_collapsed() {
        let t0 = Instant::now();
        let mut last = None;

        assert!(accept_edge(&mut last, t0, DEBOUNCE));
        assert!(!accept_edge(&mut last, t0 + Duration::from_millis(1000), DEBOUNCE));
        assert!(!accept_edge(&mut last, t0 + Duration::from_millis(2999), DEBOUNCE));
    }

    #[tokio::test(start_paused = true)]
    async fn edges_past_window_are_independent_presses() {
        let t0 = Instant::now();
        let mut last = None;

        assert!(accept_edge(&mut last, t0, DEBOUNCE));
        assert!(accept_edge(&mut last, t0 + Duration::from_millis(3100), DEBOUNCE));
        // Window restarts from the second accepted edge.
        assert!(!accept_edge(&mut last, t0 + Duration::from_millis(4000), DEBOUNCE));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_edge_does_not_extend_the_window() {
        let t0 = Instant::now();
        let mut last = None;

        assert!(accept_edge(&mut last, t0, DEBOUNCE));
        assert!(!accept_edge(&mut last, t0 + Duration::from_millis(2900), DEBOUNCE));
        // 3000ms after the *accepted* edge, not the rejected one.
        assert!(accept_edge(&mut last, t0 + Duration::from_millis(3000), DEBOUNCE));
    }
}
