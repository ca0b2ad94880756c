//! Command-style actuator surface
//!
//! `Move`, `Stop` and `GetAngles` as consumed by the control router and
//! exposed to external control services. Results are always `{ok, err}`.

use super::{ActuatorError, ActuatorRegistry, ChannelId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Structured result of a command-style operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub ok: bool,
    pub err: String,
}

impl CommandResult {
    pub fn ok() -> Self {
        Self { ok: true, err: String::new() }
    }

    pub fn error(err: impl ToString) -> Self {
        Self { ok: false, err: err.to_string() }
    }
}

impl From<Result<(), ActuatorError>> for CommandResult {
    fn from(result: Result<(), ActuatorError>) -> Self {
        match result {
            Ok(()) => CommandResult::ok(),
            Err(e) => CommandResult::error(e),
        }
    }
}

/// Current angle of one channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AngleReading {
    pub channel: ChannelId,
    pub angle: f64,
}

/// Actuator command service, in-process or remote
#[async_trait]
pub trait ActuatorControl: Send + Sync {
    async fn move_channel(&self, channel: ChannelId, direction: i32, speed: f64) -> CommandResult;

    async fn stop_channel(&self, channel: ChannelId) -> CommandResult;

    async fn get_angles(&self) -> Vec<AngleReading>;
}

#[async_trait]
impl ActuatorControl for ActuatorRegistry {
    async fn move_channel(&self, channel: ChannelId, direction: i32, speed: f64) -> CommandResult {
        self.start_move(channel, direction, speed).into()
    }

    async fn stop_channel(&self, channel: ChannelId) -> CommandResult {
        self.stop(channel).into()
    }

    async fn get_angles(&self) -> Vec<AngleReading> {
        self.angles()
    }
}
