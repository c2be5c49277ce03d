//! Telegram command source — receives owner messages, routes parsed
//! commands into the dispatcher, and replies with the outcome.
//!
//! Single-user bot: only messages from the configured chat id are honored;
//! anything else is logged at debug and dropped, as are unrecognized
//! commands from the owner.

use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actuator::DispenseOutcome;
use crate::command::Command;
use crate::dispatcher::{
    DispatcherHandle, DispenseReply, InfoKind, Source, UpdateReply,
};
use crate::error::AppError;
use crate::runtime::{EventSource, SourceFuture};

pub struct TelegramSource {
    source_id: String,
    bot_token: String,
    owner_chat_id: i64,
    /// Gates whether `/update` is wired at all.
    update_enabled: bool,
    dispatcher: DispatcherHandle,
}

impl TelegramSource {
    pub fn new(
        source_id: impl Into<String>,
        bot_token: String,
        owner_chat_id: i64,
        update_enabled: bool,
        dispatcher: DispatcherHandle,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            bot_token,
            owner_chat_id,
            update_enabled,
            dispatcher,
        }
    }
}

impl EventSource for TelegramSource {
    fn id(&self) -> &str {
        &self.source_id
    }

    fn run(self: Box<Self>, shutdown: CancellationToken) -> SourceFuture {
        Box::pin(run_telegram(*self, shutdown))
    }
}

async fn run_telegram(source: TelegramSource, shutdown: CancellationToken) -> Result<(), AppError> {
    let TelegramSource { source_id, bot_token, owner_chat_id, update_enabled, dispatcher } =
        source;

    info!(%source_id, "telegram source starting");

    let bot = Bot::new(bot_token);

    let handler = Update::filter_message().endpoint(move |bot: Bot, msg: Message| {
        let dispatcher = dispatcher.clone();
        async move {
            let Some(text) = msg.text() else {
                return respond(());
            };
            if msg.chat.id.0 != owner_chat_id {
                debug!(chat_id = %msg.chat.id, "message from unknown chat — ignored");
                return respond(());
            }

            if let Some(reply) =
                handle_command(&dispatcher, text, update_enabled).await
            {
                if let Err(e) = bot.send_message(msg.chat.id, reply).await {
                    warn!("failed to send telegram reply: {e}");
                }
            }
            respond(())
        }
    });

    let mut tg_dispatcher = Dispatcher::builder(bot, handler).build();

    tokio::select! {
        biased;

        _ = shutdown.cancelled() => {
            info!(%source_id, "shutdown signal received — closing telegram source");
        }
        _ = tg_dispatcher.dispatch() => {
            warn!(%source_id, "telegram dispatcher exited unexpectedly");
        }
    }

    Ok(())
}

/// Route one message. `None` means "no reply" — the drop policy for
/// unrecognized text and for disabled commands.
async fn handle_command(
    dispatcher: &DispatcherHandle,
    text: &str,
    update_enabled: bool,
) -> Option<String> {
    match Command::parse(text) {
        Command::Start => dispatcher.info(InfoKind::Start).await.ok(),
        Command::Version => dispatcher.info(InfoKind::Version).await.ok(),
        Command::Cookie => match dispatcher.request_dispense(Source::Chat).await {
            Ok(DispenseReply::Done(DispenseOutcome::Dispensed)) => {
                Some("🍪 Cookie sent! Treat dispensed.".to_string())
            }
            Ok(DispenseReply::Done(DispenseOutcome::Simulated)) => {
                Some("🍪 Cookie sent! (no dispenser hardware, simulated)".to_string())
            }
            Ok(DispenseReply::CoolingDown) => {
                Some("🍪 Easy there — the dispenser needs a moment between treats.".to_string())
            }
            Ok(DispenseReply::Failed(msg)) => Some(format!("Treat dispense failed: {msg}")),
            Err(e) => {
                warn!("dispense request failed: {e}");
                Some("Internal error processing command.".to_string())
            }
        },
        Command::Update => {
            if !update_enabled {
                debug!("/update received but updates are disabled — dropped");
                return None;
            }
            match dispatcher.request_update(Source::Chat).await {
                Ok(UpdateReply::Updated) => Some("Updated. Restarting…".to_string()),
                Ok(UpdateReply::AlreadyUpToDate) => Some("Already up to date.".to_string()),
                Ok(UpdateReply::Busy) => Some("An update is already in progress.".to_string()),
                Ok(UpdateReply::Failed(msg)) => Some(format!("Update failed: {msg}")),
                Err(e) => {
                    warn!("update request failed: {e}");
                    Some("Internal error processing command.".to_string())
                }
            }
        }
        Command::Unrecognized => {
            debug!("unrecognized message dropped");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

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

    fn spawn_test_dispatcher() -> DispatcherHandle {
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
        let call = CallConfig {
            target: String::new(),
            credential: String::new(),
            room: "kennel".into(),
            domain: "meet.jit.si".into(),
        };
        crate::dispatcher::spawn(call, collab, CancellationToken::new())
    }

    #[tokio::test(start_paused = true)]
    async fn cookie_replies_with_the_dispense_outcome() {
        let dispatcher = spawn_test_dispatcher();
        let reply = handle_command(&dispatcher, "/cookie", false).await;
        assert!(reply.unwrap().contains("Cookie sent"), "simulated dispense still earns a cookie reply");
    }

    #[tokio::test(start_paused = true)]
    async fn cookie_inside_cooldown_gets_the_cooldown_text() {
        let dispatcher = spawn_test_dispatcher();
        handle_command(&dispatcher, "cookie", false).await;
        let reply = handle_command(&dispatcher, "cookie", false).await.unwrap();
        assert!(reply.contains("needs a moment"), "got: {reply}");
    }

    #[tokio::test]
    async fn update_is_dropped_when_updates_are_disabled() {
        let dispatcher = spawn_test_dispatcher();
        assert_eq!(handle_command(&dispatcher, "/update", false).await, None);
    }

    #[tokio::test]
    async fn update_reports_failure_when_no_agent_is_wired() {
        let dispatcher = spawn_test_dispatcher();
        let reply = handle_command(&dispatcher, "/update", true).await.unwrap();
        assert!(reply.contains("Update failed"), "got: {reply}");
    }

    #[tokio::test]
    async fn unrecognized_text_gets_no_reply() {
        let dispatcher = spawn_test_dispatcher();
        assert_eq!(handle_command(&dispatcher, "woof woof", false).await, None);
        assert_eq!(handle_command(&dispatcher, "Cookie please", false).await, None);
    }

    #[tokio::test]
    async fn start_and_version_reply_informationally() {
        let dispatcher = spawn_test_dispatcher();
        let help = handle_command(&dispatcher, "/start", false).await.unwrap();
        assert!(help.contains("/cookie"));
        let version = handle_command(&dispatcher, "/version", false).await.unwrap();
        assert!(version.contains(crate::config::VERSION));
    }
}
