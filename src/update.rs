//! Self-update — `git pull` in the installed checkout, plus the reboot
//! capability used after a successful update.
//!
//! The agent enforces its own timeout (default 120 s), distinct from any
//! caller-side timeout, and classifies the outcome so the dispatcher can
//! report something readable over chat. It never restarts the process
//! itself; that intent flows back through the dispatcher to
//! [`SystemSupervisor::restart`].

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::AppError;

const REMOTE: &str = "origin";
const BRANCH: &str = "main";

/// Tail of error output kept in user-facing messages.
const MAX_MESSAGE_LEN: usize = 500;

/// Timeout for the best-effort pull at boot (kept short: boot must not hang
/// on a dead network).
const STARTUP_PULL_TIMEOUT: Duration = Duration::from_secs(30);

/// Boxed future returned by [`UpdateAgent::run_update`].
pub type UpdateFuture =
    Pin<Box<dyn Future<Output = Result<UpdateOutcome, AppError>> + Send + 'static>>;

/// Boxed future returned by [`SystemSupervisor::restart`].
pub type RestartFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// Successful update classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// New commits were pulled; a restart is warranted.
    Updated,
    AlreadyUpToDate,
}

/// Capability to attempt a software update.
pub trait UpdateAgent: Send + Sync {
    fn run_update(&self) -> UpdateFuture;
}

/// Capability to request an OS-level reboot. Only invoked by the
/// dispatcher after a confirmed successful update.
pub trait SystemSupervisor: Send + Sync {
    fn restart(&self) -> RestartFuture;
}

// ── GitUpdateAgent ───────────────────────────────────────────────────────────

/// Pulls the configured branch in the installed checkout.
pub struct GitUpdateAgent {
    repo_root: PathBuf,
    timeout: Duration,
}

impl GitUpdateAgent {
    pub fn new(repo_root: PathBuf, timeout: Duration) -> Self {
        Self { repo_root, timeout }
    }
}

impl UpdateAgent for GitUpdateAgent {
    fn run_update(&self) -> UpdateFuture {
        let repo_root = self.repo_root.clone();
        let timeout = self.timeout;
        Box::pin(async move { pull(&repo_root, timeout).await })
    }
}

async fn pull(repo_root: &Path, timeout: Duration) -> Result<UpdateOutcome, AppError> {
    if !repo_root.join(".git").exists() {
        return Err(AppError::Update(
            "not a git checkout (install from a clone to enable updates)".into(),
        ));
    }

    let mut pull = Command::new("git");
    pull.args(["pull", REMOTE, BRANCH])
        .current_dir(repo_root)
        .stdin(Stdio::null());

    let output = match tokio::time::timeout(timeout, pull.output()).await {
        Err(_) => return Err(AppError::Update("update timed out".into())),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(AppError::Update("git not installed".into()));
        }
        Ok(Err(e)) => return Err(AppError::Update(format!("could not run git: {e}"))),
        Ok(Ok(output)) => output,
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() { stdout.trim() } else { stderr.trim() };
        let detail = if detail.is_empty() { "git pull failed" } else { detail };
        return Err(AppError::Update(truncate(detail, MAX_MESSAGE_LEN)));
    }

    if stdout.contains("Already up to date") {
        Ok(UpdateOutcome::AlreadyUpToDate)
    } else {
        Ok(UpdateOutcome::Updated)
    }
}

/// Best-effort pull at boot, mirroring the launcher behavior of the
/// appliance image: outcome is logged, never surfaced.
pub async fn startup_pull(repo_root: &Path) {
    match pull(repo_root, STARTUP_PULL_TIMEOUT).await {
        Ok(UpdateOutcome::Updated) => info!("startup update pulled new commits"),
        Ok(UpdateOutcome::AlreadyUpToDate) => info!("startup update: already up to date"),
        Err(e) => info!("startup update skipped: {e}"),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}

// ── RebootSupervisor ─────────────────────────────────────────────────────────

/// Requests an OS reboot via `sudo reboot`.
pub struct RebootSupervisor;

impl SystemSupervisor for RebootSupervisor {
    fn restart(&self) -> RestartFuture {
        Box::pin(async {
            info!("requesting device reboot");
            let status = Command::new("sudo")
                .arg("reboot")
                .status()
                .await
                .map_err(|e| AppError::Update(format!("could not run reboot: {e}")))?;
            if status.success() {
                Ok(())
            } else {
                warn!(%status, "reboot command refused");
                Err(AppError::Update(format!("reboot exited with {status}")))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn non_repo_directory_is_a_typed_error() {
        let dir = TempDir::new().unwrap();
        let agent = GitUpdateAgent::new(dir.path().to_path_buf(), Duration::from_secs(5));
        let err = agent.run_update().await.unwrap_err();
        assert!(err.to_string().contains("not a git checkout"), "got: {err}");
    }

    #[tokio::test]
    async fn startup_pull_is_silent_on_non_repo() {
        // Must never panic or error out of the boot path.
        let dir = TempDir::new().unwrap();
        startup_pull(dir.path()).await;
    }

    #[test]
    fn truncate_caps_length() {
        let long = "x".repeat(900);
        assert_eq!(truncate(&long, MAX_MESSAGE_LEN).len(), MAX_MESSAGE_LEN);
        assert_eq!(truncate("short", MAX_MESSAGE_LEN), "short");
    }
}
