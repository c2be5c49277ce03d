//! Process-launch capability — open a call URL in a full-screen viewer.
//!
//! Fire-and-forget from the dispatcher's point of view: the spawned
//! browser is detached, and a launch failure is only ever logged together
//! with the URL so the owner can open it on a phone instead.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;

use tokio::process::Command;
use tracing::{info, warn};

use crate::error::AppError;

/// Boxed future returned by [`CallOpener::open`].
pub type LaunchFuture = Pin<Box<dyn Future<Output = Result<(), AppError>> + Send + 'static>>;

/// Capability to open a URL in a kiosk-style viewer.
pub trait CallOpener: Send + Sync {
    fn open(&self, url: &str) -> LaunchFuture;
}

/// Chromium kiosk launcher with an `xdg-open` fallback.
pub struct KioskOpener {
    display: String,
}

impl KioskOpener {
    /// `DISPLAY` is taken from the environment, defaulting to `:0` as on a
    /// single-screen appliance.
    pub fn from_env() -> Self {
        Self {
            display: std::env::var("DISPLAY").unwrap_or_else(|_| ":0".to_string()),
        }
    }
}

impl CallOpener for KioskOpener {
    fn open(&self, url: &str) -> LaunchFuture {
        let display = self.display.clone();
        let url = url.to_string();
        Box::pin(async move {
            // Kiosk flags: autoplay + auto-allow cam/mic so the call starts
            // without a touch screen interaction.
            let spawned = Command::new("chromium-browser")
                .args([
                    "--kiosk",
                    "--autoplay-policy=no-user-gesture-required",
                    "--use-fake-ui-for-media-stream",
                    &url,
                ])
                .env("DISPLAY", &display)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn();

            match spawned {
                Ok(_) => {
                    info!(%url, "opened call in chromium kiosk");
                    return Ok(());
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    warn!("chromium-browser not found, falling back to xdg-open");
                }
                Err(e) => {
                    return Err(AppError::Launch(format!(
                        "chromium launch failed: {e}; open manually: {url}"
                    )));
                }
            }

            match Command::new("xdg-open")
                .arg(&url)
                .env("DISPLAY", &display)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .spawn()
            {
                Ok(_) => {
                    info!(%url, "opened call via xdg-open");
                    Ok(())
                }
                Err(e) => Err(AppError::Launch(format!(
                    "no browser available ({e}); open manually: {url}"
                ))),
            }
        })
    }
}
