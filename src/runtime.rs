//! Spawning and supervision of the event sources.
//!
//! Each [`EventSource`] (button edge drain, telegram command loop, local
//! HTTP listener) is constructed with its dispatcher handle already
//! captured, handed to [`spawn_sources`] as a boxed trait object, and run
//! as its own tokio task. The returned [`SourceSet`] is what `main`
//! awaits: it resolves once every source has exited, reporting the first
//! error if there was one.
//!
//! Failure policy: a source erroring out cancels the shared
//! [`CancellationToken`], which tells the surviving sources and the
//! dispatcher to wind down. A source returning `Ok` (its feed closed) is
//! a normal exit and cancels nothing.

use std::future::Future;
use std::pin::Pin;

use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::error::AppError;

/// A boxed, owned future returned by [`EventSource::run`].
pub type SourceFuture =
    Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// A self-contained, concurrently-runnable event source.
pub trait EventSource: Send + 'static {
    /// Stable identifier used in log messages.
    fn id(&self) -> &str;

    /// Consume the source and return its run-loop as a boxed future. The
    /// future must watch `shutdown` and exit cooperatively when cancelled.
    fn run(self: Box<Self>, shutdown: CancellationToken) -> SourceFuture;
}

/// Handle to the running set of sources. Await [`SourceSet::join`] to
/// block until every source has exited.
pub struct SourceSet {
    inner: JoinHandle<Result<(), AppError>>,
}

impl SourceSet {
    /// Await all sources and return the first error, if any.
    pub async fn join(self) -> Result<(), AppError> {
        match self.inner.await {
            Ok(r) => r,
            Err(e) => Err(AppError::Source(format!("source task panicked: {e}"))),
        }
    }
}

/// Spawn each [`EventSource`] as an independent tokio task.
///
/// - If any source returns `Err`, `shutdown` is cancelled so all siblings
///   receive the signal and stop cooperatively.
/// - The manager task drains the remaining sources and returns the first
///   error encountered.
pub fn spawn_sources(
    sources: Vec<Box<dyn EventSource>>,
    shutdown: CancellationToken,
) -> SourceSet {
    let inner = tokio::spawn(async move {
        let mut set: JoinSet<Result<(), AppError>> = JoinSet::new();

        for source in sources {
            let id = source.id().to_string();
            debug!(source = %id, "spawning event source");
            set.spawn(source.run(shutdown.clone()));
        }

        let mut first_err: Option<AppError> = None;

        while let Some(res) = set.join_next().await {
            match res {
                Err(e) => {
                    error!("event source panicked: {e}");
                    shutdown.cancel();
                    first_err
                        .get_or_insert_with(|| AppError::Source(format!("source panicked: {e}")));
                }
                Ok(Err(e)) => {
                    error!("event source error: {e}");
                    shutdown.cancel();
                    first_err.get_or_insert(e);
                }
                Ok(Ok(())) => {}
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    });

    SourceSet { inner }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Quits(&'static str);

    impl EventSource for Quits {
        fn id(&self) -> &str {
            self.0
        }

        fn run(self: Box<Self>, _shutdown: CancellationToken) -> SourceFuture {
            Box::pin(async { Ok(()) })
        }
    }

    struct Fails;

    impl EventSource for Fails {
        fn id(&self) -> &str {
            "fails"
        }

        fn run(self: Box<Self>, _shutdown: CancellationToken) -> SourceFuture {
            Box::pin(async { Err(AppError::Source("boom".into())) })
        }
    }

    struct WaitsForShutdown;

    impl EventSource for WaitsForShutdown {
        fn id(&self) -> &str {
            "waits"
        }

        fn run(self: Box<Self>, shutdown: CancellationToken) -> SourceFuture {
            Box::pin(async move {
                shutdown.cancelled().await;
                Ok(())
            })
        }
    }

    #[tokio::test]
    async fn clean_sources_join_ok() {
        let set = spawn_sources(
            vec![Box::new(Quits("a")), Box::new(Quits("b"))],
            CancellationToken::new(),
        );
        assert!(set.join().await.is_ok());
    }

    #[tokio::test]
    async fn failing_source_cancels_siblings() {
        let shutdown = CancellationToken::new();
        let set = spawn_sources(
            vec![Box::new(Fails), Box::new(WaitsForShutdown)],
            shutdown.clone(),
        );
        let err = set.join().await.unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(shutdown.is_cancelled());
    }
}
