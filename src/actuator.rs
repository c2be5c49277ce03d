//! Treat-dispenser actuator — serialized motion over a servo driver seam.
//!
//! The electrical side (PWM waveform at the 50 Hz carrier) lives behind
//! [`ServoDriver`]; on a machine with no servo attached the simulated
//! driver lets the rest of the system run unmodified.
//!
//! # Serialization
//!
//! The motion body holds a `tokio::sync::Mutex` for its full duration, so
//! overlapping `dispense()` calls never interleave pulse commands on the
//! channel: a second caller waits for the first motion to finish and then
//! runs its own full motion.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::ServoConfig;
use crate::error::AppError;

/// How long the servo holds the dispense position before releasing.
const HOLD_DURATION: Duration = Duration::from_millis(500);

/// Outcome of a completed dispense motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispenseOutcome {
    /// Real hardware moved.
    Dispensed,
    /// No servo hardware present; motion was logged only.
    Simulated,
}

/// Low-level servo capability. Carrier frequency (50 Hz) is fixed by the
/// implementation; callers speak duty-cycle percent only.
pub trait ServoDriver: Send + Sync {
    fn set_duty(&self, percent: f64) -> Result<(), AppError>;
    fn stop(&self) -> Result<(), AppError>;
    /// True when no hardware backs this driver.
    fn is_simulated(&self) -> bool {
        false
    }
}

/// Stand-in driver for development machines and tests.
pub struct SimulatedServo;

impl ServoDriver for SimulatedServo {
    fn set_duty(&self, percent: f64) -> Result<(), AppError> {
        debug!(percent, "(simulated) servo duty");
        Ok(())
    }

    fn stop(&self) -> Result<(), AppError> {
        debug!("(simulated) servo stop");
        Ok(())
    }

    fn is_simulated(&self) -> bool {
        true
    }
}

/// Owns the dispensing servo and serializes its motion profile.
pub struct ActuatorController {
    driver: Arc<dyn ServoDriver>,
    motion: Mutex<()>,
    mid_duty: f64,
}

impl ActuatorController {
    pub fn new(driver: Arc<dyn ServoDriver>, servo: &ServoConfig) -> Self {
        Self {
            driver,
            motion: Mutex::new(()),
            mid_duty: servo.mid_duty(),
        }
    }

    /// Drive one full dispense motion: move to the range mid-point, hold,
    /// release to neutral. Safe to call repeatedly; overlapping callers are
    /// queued on the motion lock.
    ///
    /// The driver is stopped even when a step fails, so a fault cannot
    /// leave the servo energized.
    pub async fn dispense(&self) -> Result<DispenseOutcome, AppError> {
        let _guard = self.motion.lock().await;

        let result = self.run_motion().await;
        let stop_result = self.driver.stop();

        result?;
        stop_result?;

        if self.driver.is_simulated() {
            info!("treat dispense simulated (no servo hardware)");
            Ok(DispenseOutcome::Simulated)
        } else {
            info!("treat dispensed");
            Ok(DispenseOutcome::Dispensed)
        }
    }

    async fn run_motion(&self) -> Result<(), AppError> {
        self.driver.set_duty(self.mid_duty)?;
        tokio::time::sleep(HOLD_DURATION).await;
        self.driver.set_duty(0.0)?;
        Ok(())
    }
}
