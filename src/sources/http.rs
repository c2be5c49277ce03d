//! Local HTTP source — the "Test call" trigger plus a small status surface.
//!
//! `GET /call` invokes the same call-action path as the hardware button.
//! The status page and JSON endpoint expose version, configuration facts
//! and the in-flight flags so a kiosk page (or a curious owner on the LAN)
//! can see what the device is doing.

use std::sync::Arc;

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config;
use crate::dispatcher::{CallReply, DispatcherHandle, Source};
use crate::error::AppError;
use crate::runtime::{EventSource, SourceFuture};

/// Router state injected into every handler. Cheap to clone.
#[derive(Clone)]
struct HttpState {
    source_id: Arc<str>,
    device_name: Arc<str>,
    started_at: chrono::DateTime<chrono::Utc>,
    dispatcher: DispatcherHandle,
}

pub struct HttpSource {
    source_id: String,
    bind_addr: String,
    device_name: String,
    dispatcher: DispatcherHandle,
}

impl HttpSource {
    pub fn new(
        source_id: impl Into<String>,
        bind_addr: impl Into<String>,
        device_name: impl Into<String>,
        dispatcher: DispatcherHandle,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            bind_addr: bind_addr.into(),
            device_name: device_name.into(),
            dispatcher,
        }
    }
}

impl EventSource for HttpSource {
    fn id(&self) -> &str {
        &self.source_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> SourceFuture {
        Box::pin(run_http(*self, shutdown))
    }
}

async fn run_http(source: HttpSource, shutdown: CancellationToken) -> Result<(), AppError> {
    let HttpSource { source_id, bind_addr, device_name, dispatcher } = source;

    let state = HttpState {
        source_id: Arc::from(source_id.as_str()),
        device_name: Arc::from(device_name.as_str()),
        started_at: chrono::Utc::now(),
        dispatcher,
    };

    let router = router(state);

    let listener = TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| AppError::Source(format!("http bind failed on {bind_addr}: {e}")))?;

    info!(%source_id, %bind_addr, "http source listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| AppError::Source(format!("http server error: {e}")))?;

    info!(%source_id, "http source shut down");
    Ok(())
}

fn router(state: HttpState) -> Router {
    Router::new()
        .route("/", get(status_page))
        .route("/call", get(test_call))
        .route("/api/status", get(api_status))
        .route("/healthz", get(|| async { StatusCode::OK }))
        .route("/favicon.ico", get(|| async { StatusCode::NO_CONTENT }))
        .with_state(state)
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET /call — the test trigger; same action path as the button.
async fn test_call(State(state): State<HttpState>) -> Response {
    match state.dispatcher.request_call(Source::HttpTest).await {
        Ok(CallReply::Started) => {
            (StatusCode::OK, trigger_page("Call started", "The call window is opening."))
                .into_response()
        }
        // A call is already opening — from the tester's point of view the
        // desired effect is underway.
        Ok(CallReply::Busy) => (
            StatusCode::OK,
            trigger_page("Call already starting", "A call is already being opened."),
        )
            .into_response(),
        Ok(CallReply::NotConfigured) => (
            StatusCode::SERVICE_UNAVAILABLE,
            trigger_page("Not configured", "No call target is configured yet."),
        )
            .into_response(),
        Err(e) => {
            warn!(source_id = %state.source_id, "test call failed: {e}");
            (StatusCode::INTERNAL_SERVER_ERROR, "dispatcher unavailable\n").into_response()
        }
    }
}

/// GET /api/status — machine-readable device state.
async fn api_status(State(state): State<HttpState>) -> Response {
    match state.dispatcher.status().await {
        Ok(status) => Json(json!({
            "device": &*state.device_name,
            "version": config::VERSION,
            "started_at": state.started_at.to_rfc3339(),
            "configured": status.configured,
            "messaging_available": status.messaging_available,
            "call_in_flight": status.call_in_flight,
            "update_in_progress": status.update_in_progress,
            "dispense_cooldown_ms": status
                .dispense_cooldown_remaining
                .map(|d| d.as_millis() as u64),
        }))
        .into_response(),
        Err(e) => {
            warn!(source_id = %state.source_id, "status query failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "dispatcher unavailable" })),
            )
                .into_response()
        }
    }
}

/// GET / — human-readable status page with the Test call link.
async fn status_page(State(state): State<HttpState>) -> Response {
    let (configured, messaging) = match state.dispatcher.status().await {
        Ok(s) => (s.configured, s.messaging_available),
        Err(_) => (false, false),
    };
    let row = |label: &str, ok: bool, ok_text: &str, err_text: &str| {
        format!(
            "<tr><td>{label}</td><td class=\"{}\">{}</td></tr>",
            if ok { "ok" } else { "err" },
            if ok { ok_text } else { err_text },
        )
    };
    let html = format!(
        r#"<!doctype html>
<html lang="en">
<head>
  <meta charset="utf-8" />
  <meta name="viewport" content="width=device-width, initial-scale=1" />
  <title>{name}</title>
  <style>
    body {{ font-family: system-ui, sans-serif; background: #0f0f0f; color: #e0e0e0;
           display: flex; align-items: center; justify-content: center; height: 100vh; }}
    .card {{ padding: 2rem 3rem; border: 1px solid #333; border-radius: 12px; background: #1a1a1a; }}
    h1 {{ font-size: 1.5rem; margin-bottom: 0.5rem; }}
    table {{ margin: 1rem 0; border-collapse: collapse; }}
    td {{ padding: 0.25rem 0.75rem 0.25rem 0; color: #aaa; }}
    .ok {{ color: #7c7; }} .err {{ color: #c77; }}
    a {{ display: inline-block; padding: 0.5rem 1.5rem; border-radius: 8px;
        background: #2a2a3a; color: #c0c0e0; text-decoration: none; }}
  </style>
</head>
<body>
  <div class="card">
    <h1>🐕 {name}</h1>
    <table>
      <tr><td>Version</td><td>{version}</td></tr>
      {configured_row}
      {messaging_row}
    </table>
    <a href="/call">Test call</a>
  </div>
</body>
</html>
"#,
        name = state.device_name,
        version = config::VERSION,
        configured_row = row("Configured", configured, "yes", "no"),
        messaging_row = row("Telegram", messaging, "ready", "missing"),
    );
    Html(html).into_response()
}

fn trigger_page(title: &str, detail: &str) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        format!(
            "<!doctype html><html><body style=\"font-family: system-ui; background:#0f0f0f; \
             color:#e0e0e0; text-align:center; padding-top:4rem\">\
             <h1>{title}</h1><p>{detail}</p><p><a style=\"color:#c0c0e0\" href=\"/\">Back</a></p>\
             </body></html>"
        ),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    use crate::actuator::{ActuatorController, SimulatedServo};
    use crate::config::{CallConfig, ServoConfig};
    use crate::dispatcher::Collaborators;
    use crate::launch::{CallOpener, LaunchFuture};
    use crate::update::{RestartFuture, SystemSupervisor};

    struct NullOpener;

    impl CallOpener for NullOpener {
        fn open(&self, _url: &str) -> LaunchFuture {
            Box::pin(async { Ok(()) })
        }
    }

    struct NullSupervisor;

    impl SystemSupervisor for NullSupervisor {
        fn restart(&self) -> RestartFuture {
            Box::pin(async { Ok(()) })
        }
    }

    fn test_router(call: CallConfig) -> Router {
        let collab = Collaborators {
            opener: Arc::new(NullOpener),
            gateway: None,
            actuator: Arc::new(ActuatorController::new(
                Arc::new(SimulatedServo),
                &ServoConfig { gpio: 27, pulse_min: 0.5, pulse_max: 2.5 },
            )),
            update_agent: None,
            supervisor: Arc::new(NullSupervisor),
        };
        let dispatcher =
            crate::dispatcher::spawn(call, collab, CancellationToken::new());
        router(HttpState {
            source_id: Arc::from("http0"),
            device_name: Arc::from("test-dogphone"),
            started_at: chrono::Utc::now(),
            dispatcher,
        })
    }

    fn get_req(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn call_trigger_returns_200_when_a_target_resolves() {
        let app = test_router(CallConfig {
            target: "123456789".into(),
            credential: String::new(),
            room: String::new(),
            domain: String::new(),
        });

        let resp = app.oneshot(get_req("/call")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn call_trigger_returns_503_when_nothing_is_configured() {
        let app = test_router(CallConfig {
            target: String::new(),
            credential: String::new(),
            room: String::new(),
            domain: String::new(),
        });

        let resp = app.oneshot(get_req("/call")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn healthz_always_answers() {
        let app = test_router(CallConfig {
            target: String::new(),
            credential: String::new(),
            room: String::new(),
            domain: String::new(),
        });

        let resp = app.oneshot(get_req("/healthz")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
