//! Hardware seam for actuator writes
//!
//! Concrete GPIO/I2C bring-up lives outside this crate; the registry only
//! needs something that can put a channel at an angle.

use log::debug;
use std::fmt;

/// Hardware write failure (transient, never stops a movement loop)
#[derive(Debug)]
pub struct HardwareError(pub String);

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hardware write failed: {}", self.0)
    }
}

impl std::error::Error for HardwareError {}

/// A servo/motor bus. Calls are serialized by the registry's bus lock.
pub trait ServoDriver: Send {
    fn set_angle(&mut self, channel: u32, angle: f64) -> Result<(), HardwareError>;
}

/// Driver that only logs writes; used when no hardware driver is attached
#[derive(Debug, Default)]
pub struct LoggingDriver;

impl ServoDriver for LoggingDriver {
    fn set_angle(&mut self, channel: u32, angle: f64) -> Result<(), HardwareError> {
        debug!("channel {} -> {:.2} deg", channel, angle);
        Ok(())
    }
}
