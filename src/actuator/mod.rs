//! Actuator control
//!
//! Owns per-channel position state and at most one movement task per
//! channel. A movement task ticks at a fixed interval, stepping the channel
//! position towards one bound and writing it to the hardware bus.

pub mod driver;
pub mod service;

pub use driver::{HardwareError, LoggingDriver, ServoDriver};
pub use service::{ActuatorControl, AngleReading, CommandResult};

use crate::config::{ActuatorConfig, ChannelConfig};
use log::{debug, info, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Actuator channel identifier
pub type ChannelId = u32;

/// Errors returned synchronously by movement commands. No state is mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActuatorError {
    /// A movement task is already running on the channel
    AlreadyMoving,
    /// The channel is not configured
    InvalidChannel,
    /// Direction was not +1 or -1
    InvalidDirection,
    /// Speed was not a positive finite number
    InvalidSpeed,
}

impl fmt::Display for ActuatorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActuatorError::AlreadyMoving => write!(f, "already moving"),
            ActuatorError::InvalidChannel => write!(f, "invalid channel"),
            ActuatorError::InvalidDirection => write!(f, "invalid direction"),
            ActuatorError::InvalidSpeed => write!(f, "invalid speed"),
        }
    }
}

impl std::error::Error for ActuatorError {}

struct MovementTask {
    id: u64,
    stop_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct ChannelState {
    position: f64,
    active: Option<MovementTask>,
}

struct Shared {
    channels: HashMap<ChannelId, ChannelConfig>,
    /// Positions and active tasks
    state: Mutex<HashMap<ChannelId, ChannelState>>,
    /// Serializes every hardware write across channels
    bus: Mutex<Box<dyn ServoDriver>>,
    tick: Duration,
    next_task_id: AtomicU64,
}

/// Registry of actuator channels and their movement tasks
#[derive(Clone)]
pub struct ActuatorRegistry {
    shared: Arc<Shared>,
}

impl ActuatorRegistry {
    /// Create a registry for the configured channels
    pub fn new(config: &ActuatorConfig, driver: Box<dyn ServoDriver>) -> Self {
        let channels = config
            .channels
            .iter()
            .map(|channel| (channel.id, *channel))
            .collect();

        Self {
            shared: Arc::new(Shared {
                channels,
                state: Mutex::new(HashMap::new()),
                bus: Mutex::new(driver),
                tick: Duration::from_millis(config.tick_ms.max(1)),
                next_task_id: AtomicU64::new(1),
            }),
        }
    }

    /// Tick interval of movement tasks
    pub fn tick(&self) -> Duration {
        self.shared.tick
    }

    /// Start continuous movement on a channel.
    ///
    /// Returns immediately; the movement runs until [`stop`](Self::stop) is
    /// called for the channel or the registry is shut down.
    pub fn start_move(&self, channel: ChannelId, direction: i32, speed: f64) -> Result<(), ActuatorError> {
        if direction != 1 && direction != -1 {
            return Err(ActuatorError::InvalidDirection);
        }
        let bounds = *self
            .shared
            .channels
            .get(&channel)
            .ok_or(ActuatorError::InvalidChannel)?;
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ActuatorError::InvalidSpeed);
        }

        let step = direction as f64 * speed * self.shared.tick.as_secs_f64();

        // Check and register under one lock so two tasks can never coexist
        let mut state = self.shared.state.lock();
        let entry = state.entry(channel).or_insert_with(|| ChannelState {
            position: bounds.default,
            active: None,
        });
        if entry.active.is_some() {
            return Err(ActuatorError::AlreadyMoving);
        }

        let id = self.shared.next_task_id.fetch_add(1, Ordering::Relaxed);
        let (stop_tx, stop_rx) = oneshot::channel();
        let handle = tokio::spawn(run_movement(self.shared.clone(), bounds, id, step, stop_rx));
        entry.active = Some(MovementTask { id, stop_tx, handle });

        debug!("channel {} moving (direction {}, {} deg/s)", channel, direction, speed);
        Ok(())
    }

    /// Cancel the movement on a channel. Stopping an idle channel is a no-op.
    pub fn stop(&self, channel: ChannelId) -> Result<(), ActuatorError> {
        if !self.shared.channels.contains_key(&channel) {
            return Err(ActuatorError::InvalidChannel);
        }

        let task = self
            .shared
            .state
            .lock()
            .get_mut(&channel)
            .and_then(|entry| entry.active.take());

        if let Some(task) = task {
            let _ = task.stop_tx.send(());
            debug!("channel {} stopped", channel);
        }
        Ok(())
    }

    /// Whether a movement task is registered for the channel
    pub fn is_moving(&self, channel: ChannelId) -> bool {
        self.shared
            .state
            .lock()
            .get(&channel)
            .map_or(false, |entry| entry.active.is_some())
    }

    /// Current position of a configured channel
    pub fn position(&self, channel: ChannelId) -> Option<f64> {
        let bounds = self.shared.channels.get(&channel)?;
        let state = self.shared.state.lock();
        Some(state.get(&channel).map_or(bounds.default, |entry| entry.position))
    }

    /// Positions of every configured channel, ordered by channel
    pub fn angles(&self) -> Vec<AngleReading> {
        let state = self.shared.state.lock();
        let mut readings: Vec<AngleReading> = self
            .shared
            .channels
            .values()
            .map(|bounds| AngleReading {
                channel: bounds.id,
                angle: state.get(&bounds.id).map_or(bounds.default, |entry| entry.position),
            })
            .collect();
        readings.sort_by_key(|reading| reading.channel);
        readings
    }

    /// Cancel every movement task and wait for them to finish
    pub async fn shutdown(&self) {
        let tasks: Vec<MovementTask> = self
            .shared
            .state
            .lock()
            .values_mut()
            .filter_map(|entry| entry.active.take())
            .collect();

        let count = tasks.len();
        for task in tasks {
            let _ = task.stop_tx.send(());
            if let Err(e) = task.handle.await {
                warn!("movement task {} ended abnormally: {}", task.id, e);
            }
        }
        info!("Actuators shut down ({} movement tasks cancelled)", count);
    }
}

async fn run_movement(
    shared: Arc<Shared>,
    bounds: ChannelConfig,
    task_id: u64,
    step: f64,
    mut stop_rx: oneshot::Receiver<()>,
) {
    let channel = bounds.id;
    let mut interval = tokio::time::interval(shared.tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    interval.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = &mut stop_rx => break,
            _ = interval.tick() => {}
        }

        let next = {
            let mut state = shared.state.lock();
            let Some(entry) = state.get_mut(&channel) else {
                break;
            };
            // A stop that raced this tick already deregistered us
            if entry.active.as_ref().map(|task| task.id) != Some(task_id) {
                break;
            }
            let next = (entry.position + step).clamp(bounds.min, bounds.max);
            entry.position = next;
            next
        };

        if let Err(e) = shared.bus.lock().set_angle(channel, next) {
            warn!("channel {}: {}", channel, e);
        }
    }
}
