//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` (or the `-f` path) relative to the current
//! working directory, then applies `DOGPHONE_LOG_LEVEL` and the Telegram
//! credential env vars. Secrets (`TELEGRAM_BOT_TOKEN`, `TELEGRAM_CHAT_ID`)
//! are never read from TOML.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::error::AppError;

/// Crate version, shown by `/version` and the status endpoint.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Video-call target configuration. Input to the call-link resolver.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// Raw URL or bare numeric meeting id. Empty means "use the room".
    pub target: String,
    /// Optional meeting credential, appended as a `pwd=` query parameter.
    pub credential: String,
    /// Jitsi room name for synthesized URLs (hostname-derived default).
    pub room: String,
    /// Jitsi domain for synthesized URLs.
    pub domain: String,
}

/// Telegram channel configuration. Credentials come from the environment.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub enabled: bool,
    pub bot_token: Option<String>,
    pub chat_id: Option<i64>,
}

impl TelegramConfig {
    /// Messaging is available only when enabled with both credentials set.
    pub fn is_available(&self) -> bool {
        self.enabled && self.bot_token.is_some() && self.chat_id.is_some()
    }
}

/// Call-button input configuration.
#[derive(Debug, Clone)]
pub struct ButtonConfig {
    /// BCM pin number of the call button.
    pub gpio: u8,
    /// Minimum time between accepted edges.
    pub debounce: Duration,
}

/// Treat-dispenser servo configuration.
#[derive(Debug, Clone)]
pub struct ServoConfig {
    /// BCM pin number of the servo signal line.
    pub gpio: u8,
    /// Duty-cycle percent at one end of the motion range.
    pub pulse_min: f64,
    /// Duty-cycle percent at the other end of the motion range.
    pub pulse_max: f64,
}

impl ServoConfig {
    /// Duty-cycle mid-point used for the dispense motion.
    pub fn mid_duty(&self) -> f64 {
        (self.pulse_min + self.pulse_max) / 2.0
    }
}

/// Local HTTP listener (test trigger + status page) configuration.
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub enabled: bool,
    pub bind: String,
}

/// Self-update configuration.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    /// Gates whether the `/update` chat command is wired at all.
    pub enabled: bool,
    /// Checkout root the update pull runs in (already `~`-expanded).
    pub repo_root: PathBuf,
    pub timeout: Duration,
}

/// Fully-resolved device configuration — immutable snapshot, loaded once.
#[derive(Debug, Clone)]
pub struct Config {
    pub device_name: String,
    pub log_level: String,
    pub call: CallConfig,
    pub telegram: TelegramConfig,
    pub button: ButtonConfig,
    pub servo: ServoConfig,
    pub http: HttpConfig,
    pub update: UpdateConfig,
}

impl Config {
    /// True iff both a messaging recipient and a call target are usable.
    /// An unconfigured device still runs; chat-triggered actions degrade.
    pub fn is_configured(&self) -> bool {
        self.telegram.is_available() && crate::call_url::resolve(&self.call).is_some()
    }
}

/// Raw TOML shape — `serde` target before resolution.
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    device: RawDevice,
    #[serde(default)]
    call: RawCall,
    #[serde(default)]
    telegram: RawTelegram,
    #[serde(default)]
    button: RawButton,
    #[serde(default)]
    servo: RawServo,
    #[serde(default)]
    http: RawHttp,
    #[serde(default)]
    update: RawUpdate,
}

#[derive(Deserialize)]
struct RawDevice {
    #[serde(default = "default_device_name")]
    name: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

#[derive(Deserialize)]
struct RawCall {
    #[serde(default)]
    target: String,
    #[serde(default)]
    credential: String,
    /// Empty means "derive from the device hostname at load time".
    #[serde(default)]
    room: String,
    #[serde(default = "default_call_domain")]
    domain: String,
}

#[derive(Deserialize)]
struct RawTelegram {
    #[serde(default = "default_true")]
    enabled: bool,
}

#[derive(Deserialize)]
struct RawButton {
    #[serde(default = "default_button_gpio")]
    gpio: u8,
    #[serde(default = "default_debounce_ms")]
    debounce_ms: u64,
}

#[derive(Deserialize)]
struct RawServo {
    #[serde(default = "default_servo_gpio")]
    gpio: u8,
    #[serde(default = "default_pulse_min")]
    pulse_min: f64,
    #[serde(default = "default_pulse_max")]
    pulse_max: f64,
}

#[derive(Deserialize)]
struct RawHttp {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_http_bind")]
    bind: String,
}

#[derive(Deserialize)]
struct RawUpdate {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default = "default_repo_root")]
    repo_root: String,
    #[serde(default = "default_update_timeout_seconds")]
    timeout_seconds: u64,
}

impl Default for RawDevice {
    fn default() -> Self {
        Self { name: default_device_name(), log_level: default_log_level() }
    }
}

impl Default for RawCall {
    fn default() -> Self {
        Self {
            target: String::new(),
            credential: String::new(),
            room: String::new(),
            domain: default_call_domain(),
        }
    }
}

impl Default for RawTelegram {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for RawButton {
    fn default() -> Self {
        Self { gpio: default_button_gpio(), debounce_ms: default_debounce_ms() }
    }
}

impl Default for RawServo {
    fn default() -> Self {
        Self {
            gpio: default_servo_gpio(),
            pulse_min: default_pulse_min(),
            pulse_max: default_pulse_max(),
        }
    }
}

impl Default for RawHttp {
    fn default() -> Self {
        Self { enabled: true, bind: default_http_bind() }
    }
}

impl Default for RawUpdate {
    fn default() -> Self {
        Self {
            enabled: true,
            repo_root: default_repo_root(),
            timeout_seconds: default_update_timeout_seconds(),
        }
    }
}

fn default_device_name() -> String { "dogphone".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_call_domain() -> String { "meet.jit.si".to_string() }
fn default_button_gpio() -> u8 { 17 }
fn default_debounce_ms() -> u64 { 3000 }
fn default_servo_gpio() -> u8 { 27 }
fn default_pulse_min() -> f64 { 0.5 }
fn default_pulse_max() -> f64 { 2.5 }
fn default_http_bind() -> String { "127.0.0.1:8766".to_string() }
fn default_repo_root() -> String { ".".to_string() }
fn default_update_timeout_seconds() -> u64 { 120 }

fn default_true() -> bool {
    true
}

/// Env-sourced values. Split out so tests can inject without touching the
/// process environment.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    pub log_level: Option<String>,
    pub telegram_bot_token: Option<String>,
    pub telegram_chat_id: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            log_level: env::var("DOGPHONE_LOG_LEVEL").ok(),
            telegram_bot_token: env::var("TELEGRAM_BOT_TOKEN").ok(),
            telegram_chat_id: env::var("TELEGRAM_CHAT_ID").ok(),
        }
    }
}

/// Load config from `path` (default `config/default.toml`), then apply
/// env-var overrides. A missing file yields an all-defaults config; a file
/// that exists but does not parse is an error.
pub fn load(path: Option<&Path>) -> Result<Config, AppError> {
    load_from(
        path.unwrap_or(Path::new("config/default.toml")),
        &EnvOverrides::from_env(),
    )
}

/// Internal loader — accepts an explicit path and explicit overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(path: &Path, overrides: &EnvOverrides) -> Result<Config, AppError> {
    let parsed: RawConfig = if path.exists() {
        let raw = fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?
    } else {
        RawConfig::default()
    };

    let chat_id = match overrides.telegram_chat_id.as_deref() {
        Some(raw) => Some(raw.trim().parse::<i64>().map_err(|e| {
            AppError::Config(format!("TELEGRAM_CHAT_ID is not a number: {e}"))
        })?),
        None => None,
    };

    let log_level = overrides
        .log_level
        .clone()
        .unwrap_or(parsed.device.log_level);

    let room = if parsed.call.room.trim().is_empty() {
        default_room_name(&parsed.device.name)
    } else {
        parsed.call.room.trim().to_string()
    };

    Ok(Config {
        device_name: parsed.device.name,
        log_level,
        call: CallConfig {
            target: parsed.call.target.trim().to_string(),
            credential: parsed.call.credential.trim().to_string(),
            room,
            domain: parsed.call.domain.trim().to_string(),
        },
        telegram: TelegramConfig {
            enabled: parsed.telegram.enabled,
            bot_token: overrides
                .telegram_bot_token
                .as_deref()
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string),
            chat_id,
        },
        button: ButtonConfig {
            gpio: parsed.button.gpio,
            debounce: Duration::from_millis(parsed.button.debounce_ms),
        },
        servo: ServoConfig {
            gpio: parsed.servo.gpio,
            pulse_min: parsed.servo.pulse_min,
            pulse_max: parsed.servo.pulse_max,
        },
        http: HttpConfig {
            enabled: parsed.http.enabled,
            bind: parsed.http.bind,
        },
        update: UpdateConfig {
            enabled: parsed.update.enabled,
            repo_root: expand_home(&parsed.update.repo_root),
            timeout: Duration::from_secs(parsed.update.timeout_seconds),
        },
    })
}

/// Hostname-derived default room name, e.g. `dogphone-raspberrypi`.
/// Resolved at load time so the call-link resolver stays a pure function.
fn default_room_name(device_name: &str) -> String {
    let host = env::var("HOSTNAME")
        .ok()
        .or_else(|| fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty());
    match host {
        Some(host) => format!("{device_name}-{host}"),
        None => device_name.to_string(),
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Config` for unit tests — no credentials, no external endpoints.
#[cfg(test)]
impl Config {
    pub fn test_default() -> Self {
        Self {
            device_name: "test-dogphone".into(),
            log_level: "info".into(),
            call: CallConfig {
                target: String::new(),
                credential: String::new(),
                room: "test-room".into(),
                domain: "meet.jit.si".into(),
            },
            telegram: TelegramConfig {
                enabled: false,
                bot_token: None,
                chat_id: None,
            },
            button: ButtonConfig {
                gpio: default_button_gpio(),
                debounce: Duration::from_millis(default_debounce_ms()),
            },
            servo: ServoConfig {
                gpio: default_servo_gpio(),
                pulse_min: default_pulse_min(),
                pulse_max: default_pulse_max(),
            },
            http: HttpConfig {
                enabled: false,
                bind: default_http_bind(),
            },
            update: UpdateConfig {
                enabled: false,
                repo_root: PathBuf::from("."),
                timeout: Duration::from_secs(1),
            },
        }
    }
}
