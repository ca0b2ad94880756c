//! Control-channel command routing
//!
//! Decodes `{"Key": ..., "Action": "pressed"|"released"}` messages and maps
//! keys to actuator commands through a static key table:
//! - `pressed` issues a move for every axis bound to the key
//! - `released` stops every channel bound to the key
//!
//! Axes of a compound drive binding are independent; one failing does not
//! prevent the others from executing.

use crate::actuator::{ActuatorControl, ChannelId};
use crate::config::ControlsConfig;
use log::{debug, warn};
use serde::Deserialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Control message decoding errors
#[derive(Debug)]
pub enum ControlError {
    /// Payload is not a valid control message
    Malformed(String),
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlError::Malformed(msg) => write!(f, "Malformed control message: {}", msg),
        }
    }
}

impl std::error::Error for ControlError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAction {
    Pressed,
    Released,
}

/// A decoded control-channel message
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyCommand {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Action")]
    pub action: KeyAction,
}

/// One actuator call issued by a key
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisMove {
    pub channel: ChannelId,
    pub direction: i32,
    pub speed: f64,
}

/// Routes key commands to an actuator service
pub struct CommandRouter {
    bindings: HashMap<String, Vec<AxisMove>>,
    actuators: Arc<dyn ActuatorControl>,
}

impl CommandRouter {
    pub fn new(config: &ControlsConfig, actuators: Arc<dyn ActuatorControl>) -> Self {
        let bindings = config
            .bindings
            .iter()
            .map(|binding| {
                let moves = binding
                    .moves
                    .iter()
                    .map(|axis| AxisMove {
                        channel: axis.channel,
                        direction: axis.direction,
                        speed: axis.speed,
                    })
                    .collect();
                (binding.key.clone(), moves)
            })
            .collect();

        Self { bindings, actuators }
    }

    /// Decode a control-channel payload
    pub fn decode(message: &str) -> Result<KeyCommand, ControlError> {
        serde_json::from_str(message).map_err(|e| ControlError::Malformed(e.to_string()))
    }

    /// Axes bound to a key
    pub fn binding(&self, key: &str) -> Option<&[AxisMove]> {
        self.bindings.get(key).map(Vec::as_slice)
    }

    /// Decode and execute a raw message; malformed payloads are logged and dropped
    pub async fn handle_message(&self, message: &str) {
        match Self::decode(message) {
            Ok(command) => self.execute(&command).await,
            Err(e) => warn!("{}", e),
        }
    }

    /// Execute a decoded command. Unmapped keys are ignored.
    pub async fn execute(&self, command: &KeyCommand) {
        let Some(moves) = self.bindings.get(&command.key) else {
            debug!("Ignoring unmapped key {:?}", command.key);
            return;
        };

        for axis in moves {
            let result = match command.action {
                KeyAction::Pressed => {
                    self.actuators
                        .move_channel(axis.channel, axis.direction, axis.speed)
                        .await
                }
                KeyAction::Released => self.actuators.stop_channel(axis.channel).await,
            };
            if !result.ok {
                warn!(
                    "key {:?} {:?} on channel {}: {}",
                    command.key, command.action, axis.channel, result.err
                );
            }
        }
    }
}
