//! gilrs-backed device backend
//!
//! Runs on a blocking thread, waits for gilrs events and forwards them as
//! [`DeviceNotice`]s. gilrs buttons and axes are laid out in the standard
//! gamepad order so pin numbers in the control mapping are portable:
//!
//! ```text
//! buttons  0 South  1 East  2 West  3 North  4 LB  5 RB  6 LT  7 RT
//!          8 Select 9 Start 10 LS   11 RS    12-15 DPad U/D/L/R  16 Mode
//! axes     0 LX  1 LY (down positive)  2 RX  3 RY (down positive)
//! ```

use super::control::{DeviceIndex, DeviceInfo, DeviceNotice, RawDeviceState};
use gilrs::{Axis, Button, Event, EventType, Gamepad, GamepadId, Gilrs};
use statum::{machine, state};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const STANDARD_BUTTONS: [Button; 17] = [
    Button::South,
    Button::East,
    Button::West,
    Button::North,
    Button::LeftTrigger,
    Button::RightTrigger,
    Button::LeftTrigger2,
    Button::RightTrigger2,
    Button::Select,
    Button::Start,
    Button::LeftThumb,
    Button::RightThumb,
    Button::DPadUp,
    Button::DPadDown,
    Button::DPadLeft,
    Button::DPadRight,
    Button::Mode,
];

const STANDARD_AXES: [Axis; 4] = [
    Axis::LeftStickX,
    Axis::LeftStickY,
    Axis::RightStickX,
    Axis::RightStickY,
];

/// How long one blocking wait for a gilrs event may take before the
/// cancellation token is checked again
const WAIT_SLICE: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("Failed to initialize collector: {0}")]
    InitializationError(String),

    #[error("Device notice channel closed")]
    ChannelClosed,
}

#[state]
#[derive(Debug, Clone)]
pub enum CollectionState {
    Initializing,
    Collecting,
}

#[machine]
#[derive(Debug)]
pub struct GamepadCollector<S: CollectionState> {
    gilrs: Gilrs,
    notices: mpsc::Sender<DeviceNotice>,
    cancel: CancellationToken,
}

impl GamepadCollector<Initializing> {
    pub fn create(
        notices: mpsc::Sender<DeviceNotice>,
        cancel: CancellationToken,
    ) -> Result<Self, CollectorError> {
        info!("Initializing gilrs controller interface");
        let gilrs = Gilrs::new().map_err(|e| {
            error!("Failed to initialize gilrs: {}", e);
            CollectorError::InitializationError(e.to_string())
        })?;
        Ok(Self::new(gilrs, notices, cancel))
    }

    /// Announces the gamepads that were already plugged in
    pub fn initialize(self) -> Result<GamepadCollector<Collecting>, CollectorError> {
        let present: Vec<GamepadId> = self.gilrs.gamepads().map(|(id, _)| id).collect();
        if present.is_empty() {
            debug!("No gamepad connected yet");
        }
        for id in present {
            let gamepad = self.gilrs.gamepad(id);
            self.send(connected_notice(id, &gamepad))?;
        }
        Ok(self.transition())
    }
}

impl<S: CollectionState> GamepadCollector<S> {
    fn send(&self, notice: DeviceNotice) -> Result<(), CollectorError> {
        self.notices
            .blocking_send(notice)
            .map_err(|_| CollectorError::ChannelClosed)
    }
}

impl GamepadCollector<Collecting> {
    /// Blocks until cancelled or the receiving side goes away
    pub fn run_collection_loop(&mut self) -> Result<(), CollectorError> {
        info!("Starting gamepad collection loop");
        while !self.cancel.is_cancelled() {
            let Some(Event { id, event, .. }) = self.gilrs.next_event_blocking(Some(WAIT_SLICE)) else {
                continue;
            };
            if let Some(notice) = self.convert_gilrs_event(id, event) {
                self.send(notice)?;
            }
        }
        info!("Gamepad collection loop cancelled");
        Ok(())
    }

    fn convert_gilrs_event(&self, id: GamepadId, event: EventType) -> Option<DeviceNotice> {
        let device = device_index(id);
        match event {
            EventType::Connected => {
                let gamepad = self.gilrs.connected_gamepad(id)?;
                Some(connected_notice(id, &gamepad))
            }
            EventType::Disconnected => {
                warn!("Gamepad {} disconnected", device);
                Some(DeviceNotice::Disconnected { device })
            }
            EventType::ButtonPressed(..)
            | EventType::ButtonReleased(..)
            | EventType::ButtonChanged(..)
            | EventType::AxisChanged(..) => {
                let gamepad = self.gilrs.connected_gamepad(id)?;
                Some(DeviceNotice::State {
                    device,
                    raw: read_gamepad(&gamepad),
                })
            }
            _ => None,
        }
    }
}

/// Owns the blocking collector thread
pub struct CollectorHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CollectorHandle {
    pub fn spawn(notices: mpsc::Sender<DeviceNotice>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();

        info!("Spawning gamepad collector");
        let task = tokio::task::spawn_blocking(move || {
            let result = GamepadCollector::create(notices, token)
                .and_then(|collector| collector.initialize())
                .and_then(|mut collector| collector.run_collection_loop());
            match result {
                Ok(()) => debug!("Gamepad collector finished"),
                Err(CollectorError::ChannelClosed) => debug!("Gamepad collector stopped, engine gone"),
                Err(e) => error!("Gamepad collector terminated with error: {}", e),
            }
        });

        Self { cancel, task }
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for CollectorHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn device_index(id: GamepadId) -> DeviceIndex {
    DeviceIndex(usize::from(id) as i32)
}

fn connected_notice(id: GamepadId, gamepad: &Gamepad<'_>) -> DeviceNotice {
    let info = DeviceInfo {
        name: gamepad.name().to_string(),
        buttons: supported_count(&STANDARD_BUTTONS, |button| gamepad.button_code(*button).is_some()),
        axes: supported_count(&STANDARD_AXES, |axis| gamepad.axis_code(*axis).is_some()),
    };
    info!(
        "Gamepad {} '{}' reports {} buttons, {} axes",
        device_index(id),
        info.name,
        info.buttons,
        info.axes
    );
    DeviceNotice::Connected {
        device: device_index(id),
        raw: read_gamepad(gamepad),
        info,
    }
}

/// Highest supported standard index + 1
fn supported_count<T>(layout: &[T], supported: impl Fn(&T) -> bool) -> usize {
    layout
        .iter()
        .rposition(supported)
        .map_or(0, |index| index + 1)
}

fn read_gamepad(gamepad: &Gamepad<'_>) -> RawDeviceState {
    RawDeviceState {
        buttons: STANDARD_BUTTONS
            .iter()
            .map(|button| gamepad.is_pressed(*button))
            .collect(),
        axes: STANDARD_AXES
            .iter()
            .map(|axis| {
                let value = gamepad.value(*axis);
                // gilrs reports stick Y up-positive
                match axis {
                    Axis::LeftStickY | Axis::RightStickY => -value,
                    _ => value,
                }
            })
            .collect(),
    }
}
