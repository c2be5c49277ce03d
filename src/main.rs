//! DogPhone — appliance entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args
//!   3. Load config
//!   4. Resolve effective log level (CLI `-v` flags > env > config)
//!   5. Init logger once
//!   6. Best-effort startup update pull
//!   7. Build collaborators and spawn the dispatcher actor
//!   8. Spawn event sources per config (button, telegram, http)
//!   9. Ctrl-C cancels the shared token; join everything and exit

use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dogphone::actuator::{ActuatorController, SimulatedServo};
use dogphone::config;
use dogphone::dispatcher::{self, Collaborators};
use dogphone::error::AppError;
use dogphone::launch::KioskOpener;
use dogphone::logger;
use dogphone::runtime::{spawn_sources, EventSource};
use dogphone::sources::button;
use dogphone::update::{self, GitUpdateAgent, RebootSupervisor, UpdateAgent};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present — ignore errors (file is optional).
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();

    let config_path = args
        .config_path
        .or_else(|| std::env::var("DOGPHONE_CONFIG").ok());
    let cfg = config::load(config_path.as_deref().map(Path::new))?;

    let effective_log_level = args.log_level.unwrap_or(cfg.log_level.as_str());
    logger::init(effective_log_level)?;

    info!(
        device = %cfg.device_name,
        version = %config::VERSION,
        configured = %cfg.is_configured(),
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let messaging = cfg.telegram.is_available();
    let call_url = dogphone::call_url::resolve(&cfg.call);

    // A device that can neither open a call nor reach its owner has
    // nothing it could ever do — refuse to start so the problem is seen.
    if call_url.is_none() && !messaging {
        return Err(AppError::Config(
            "no call target configured and no Telegram credentials set \
             (set [call] target/room or TELEGRAM_BOT_TOKEN + TELEGRAM_CHAT_ID)"
                .into(),
        ));
    }
    if !messaging {
        warn!("Telegram not configured — calls will open without notifying the owner");
    }

    if cfg.update.enabled {
        update::startup_pull(&cfg.update.repo_root).await;
    }

    // Shared shutdown token — Ctrl-C cancels it, all tasks watch it.
    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received — initiating shutdown");
            ctrlc_token.cancel();
        }
    });

    // Collaborators. Real GPIO/PWM output lives behind the ServoDriver
    // seam; without a hardware backend the simulated driver keeps the
    // whole system runnable.
    let gateway = build_gateway(&cfg);
    let update_agent: Option<Arc<dyn UpdateAgent>> = cfg.update.enabled.then(|| {
        Arc::new(GitUpdateAgent::new(cfg.update.repo_root.clone(), cfg.update.timeout))
            as Arc<dyn UpdateAgent>
    });
    let collab = Collaborators {
        opener: Arc::new(KioskOpener::from_env()),
        gateway,
        actuator: Arc::new(ActuatorController::new(Arc::new(SimulatedServo), &cfg.servo)),
        update_agent,
        supervisor: Arc::new(RebootSupervisor),
    };

    let dispatcher = dispatcher::spawn(cfg.call.clone(), collab, shutdown.clone());

    // Event sources. The button feed is what a GPIO edge-detection layer
    // would drive; without one it simply stays idle.
    let mut sources: Vec<Box<dyn EventSource>> = Vec::new();

    let (button_feed, button_source) =
        button::channel("button0", cfg.button.debounce, dispatcher.clone());
    info!(gpio = cfg.button.gpio, "button source configured (no GPIO driver attached)");
    sources.push(Box::new(button_source));

    #[cfg(feature = "channel-telegram")]
    if let (Some(token), Some(chat_id)) =
        (cfg.telegram.bot_token.clone(), cfg.telegram.chat_id)
    {
        if cfg.telegram.enabled {
            info!("loading telegram source");
            sources.push(Box::new(dogphone::sources::telegram::TelegramSource::new(
                "telegram0",
                token,
                chat_id,
                cfg.update.enabled,
                dispatcher.clone(),
            )));
        }
    }

    #[cfg(feature = "channel-http")]
    if cfg.http.enabled {
        info!(bind = %cfg.http.bind, "loading http source");
        sources.push(Box::new(dogphone::sources::http::HttpSource::new(
            "http0",
            cfg.http.bind.clone(),
            cfg.device_name.clone(),
            dispatcher.clone(),
        )));
    }

    info!("DogPhone running — press the button to call, send /cookie to treat");
    let set = spawn_sources(sources, shutdown.clone());
    let result = set.join().await;

    // Sources are gone (error or EOF) — make sure everything else stops.
    shutdown.cancel();
    drop(button_feed);

    result
}

#[cfg(feature = "channel-telegram")]
fn build_gateway(
    cfg: &config::Config,
) -> Option<Arc<dyn dogphone::notify::NotificationGateway>> {
    if !cfg.telegram.enabled {
        return None;
    }
    let token = cfg.telegram.bot_token.as_deref()?;
    let chat_id = cfg.telegram.chat_id?;
    Some(Arc::new(dogphone::notify::TelegramGateway::new(
        teloxide::Bot::new(token),
        chat_id,
    )))
}

#[cfg(not(feature = "channel-telegram"))]
fn build_gateway(
    _cfg: &config::Config,
) -> Option<Arc<dyn dogphone::notify::NotificationGateway>> {
    None
}

const HELP: &str = "\
Usage: dogphone [OPTIONS]

Options:
  -h, --help           Print help
  -f, --config <PATH>  Configuration file (default: config/default.toml,
                       or the DOGPHONE_CONFIG env var)
  -v, -vv              More verbose logging (debug, trace)
";

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                print!("{HELP}");
                std::process::exit(0);
            }
            "-f" | "--config" => match iter.next() {
                Some(path) => config_path = Some(path),
                None => {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            },
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    // The configured default is already "info"; -v drops to debug, -vv
    // (and beyond) to trace.
    let log_level = match verbosity {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    };

    CliArgs { log_level, config_path }
}
