//! Edge detection for controller input
//!
//! [`InputManager`] keeps one [`ControlSnapshot`] per device and turns the
//! difference between consecutive snapshots into logical control events:
//!
//! ```text
//! prev  next   action
//! Up    Down   clear lock, start on-down cooldown, emit down (repeat = false)
//! Down  Up     clear lock, clear cooldown, emit up
//! Down  Down   if unlocked and cooldown elapsed: emit down (repeat = true),
//!              restart on-held cooldown
//! ```
//!
//! Every emitted transition of a control that has a key in
//! `InputSettings::control_keys` is also re-synthesized as a keyboard event.
//! Physical devices are sampled by [`InputManager::poll`]; keyboard input is
//! routed to negative-indexed virtual controllers through
//! [`InputManager::handle_key_event`].

use super::control::{Control, ControlSnapshot, ControlValue, DeviceIndex, DeviceInfo, RawDeviceState};
use super::error::InputError;
use super::keyboard::{key_to_control, KeyEvent, KeyEventKind};
use crate::config::InputSettings;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// Logical control transition
#[derive(Clone, Debug, PartialEq)]
pub struct ControlEvent {
    pub device: DeviceIndex,
    pub control: Control,
    pub value: ControlValue,
    pub repeat: bool,
    pub at: DateTime<Utc>,
}

/// What the engine has to do after a transition
#[derive(Clone, Debug, PartialEq)]
pub enum InputOutput {
    Control(ControlEvent),
    /// Synthesized keyboard event for the focus target
    Key(KeyEvent),
    /// Primary activation of the focused element
    Activate,
}

/// How a key event reaching the input layer was routed
#[derive(Clone, Debug, PartialEq)]
pub enum KeyRouting {
    /// Our own synthesized event, goes to the key listeners only
    Listeners,
    /// Mapped to a virtual controller
    Consumed(Vec<InputOutput>),
    /// Not ours (unmapped key or virtual controllers disabled)
    Ignored,
}

#[derive(Clone, Debug, Default)]
struct DeviceState {
    snapshot: ControlSnapshot,
    cooldowns: HashMap<Control, DateTime<Utc>>,
}

impl DeviceState {
    fn with_snapshot(snapshot: ControlSnapshot) -> Self {
        Self {
            snapshot,
            cooldowns: HashMap::new(),
        }
    }
}

pub struct InputManager {
    settings: InputSettings,
    initialized: bool,
    devices: BTreeMap<DeviceIndex, DeviceState>,
    physical: HashMap<DeviceIndex, DeviceInfo>,
    latest_raw: HashMap<DeviceIndex, RawDeviceState>,
    locks: HashSet<Control>,
    virtual_enabled: bool,
    window_visible: bool,
}

impl InputManager {
    pub fn new(settings: InputSettings) -> Self {
        debug!(
            "Creating input manager (poll {}ms, on-down {}ms, on-held {}ms)",
            settings.poll_interval_ms, settings.on_down_cooldown_ms, settings.on_held_cooldown_ms
        );
        Self {
            settings,
            initialized: false,
            devices: BTreeMap::new(),
            physical: HashMap::new(),
            latest_raw: HashMap::new(),
            locks: HashSet::new(),
            virtual_enabled: true,
            window_visible: true,
        }
    }

    pub fn settings(&self) -> &InputSettings {
        &self.settings
    }

    /// Creates the virtual controllers. Only allowed once.
    pub fn initialize(&mut self) -> Result<(), InputError> {
        if self.initialized {
            return Err(InputError::AlreadyInitialized);
        }
        self.initialized = true;

        for slot in 0..self.settings.virtual_gamepads.len() {
            self.devices
                .insert(DeviceIndex::virtual_slot(slot), DeviceState::default());
        }
        info!(
            "Input layer initialized with {} virtual controller(s)",
            self.settings.virtual_gamepads.len()
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Registers a newly connected physical device.
    ///
    /// Returns `Ok(false)` when the device fails the capability filter; such a
    /// device gets no snapshot and is never polled.
    pub fn connect(
        &mut self,
        device: DeviceIndex,
        info: DeviceInfo,
        raw: RawDeviceState,
    ) -> Result<bool, InputError> {
        let mapping = &self.settings.mapping;
        if !mapping.accepts(&info) {
            debug!(
                "Ignoring device {} '{}' ({} buttons, {} axes; need {} / {})",
                device,
                info.name,
                info.buttons,
                info.axes,
                mapping.min_buttons_required(),
                mapping.min_axes_required()
            );
            return Ok(false);
        }

        let snapshot = mapping.read_snapshot(device, &raw)?;
        info!("Controller connected: {} '{}'", device, info.name);
        self.devices.insert(device, DeviceState::with_snapshot(snapshot));
        self.latest_raw.insert(device, raw);
        self.physical.insert(device, info);
        Ok(true)
    }

    /// Drops a physical device and everything tracked for it
    pub fn disconnect(&mut self, device: DeviceIndex) -> bool {
        let known = self.physical.remove(&device).is_some();
        self.latest_raw.remove(&device);
        // unplugging counts as the release that ends a lock
        if let Some(state) = self.devices.remove(&device) {
            for (control, value) in state.snapshot.iter() {
                let held_elsewhere = self
                    .devices
                    .values()
                    .any(|other| other.snapshot.get(control) == ControlValue::Down);
                if value == ControlValue::Down && !held_elsewhere && self.locks.remove(&control) {
                    debug!("Released lock on {:?} with {}", control, device);
                }
            }
        }
        if known {
            info!("Controller disconnected: {}", device);
        }
        known
    }

    pub fn has_physical_devices(&self) -> bool {
        !self.physical.is_empty()
    }

    pub fn device_count(&self) -> usize {
        self.physical.len()
    }

    pub fn snapshot(&self, device: DeviceIndex) -> Option<ControlSnapshot> {
        self.devices.get(&device).map(|state| state.snapshot)
    }

    /// Stores the most recent raw read of a device, sampled on the next poll
    pub fn update_raw(&mut self, device: DeviceIndex, raw: RawDeviceState) -> Result<(), InputError> {
        if !self.physical.contains_key(&device) {
            return Err(InputError::UnknownDevice(device));
        }
        self.latest_raw.insert(device, raw);
        Ok(())
    }

    /// One poll tick: diff every physical device against its previous snapshot
    pub fn poll(&mut self, now: DateTime<Utc>) -> Result<Vec<InputOutput>, InputError> {
        let mut outputs = Vec::new();
        let mut devices: Vec<DeviceIndex> = self.physical.keys().copied().collect();
        devices.sort();

        for device in devices {
            let Some(raw) = self.latest_raw.get(&device) else {
                continue;
            };
            let next = self.settings.mapping.read_snapshot(device, raw)?;
            self.apply_snapshot(device, next, now, &mut outputs);
        }
        Ok(outputs)
    }

    /// Routes a raw key event.
    ///
    /// Synthetic events are never processed as input again. User events are
    /// mapped onto the first virtual controller that knows the key, unless
    /// virtual controllers are disabled.
    pub fn handle_key_event(&mut self, event: &KeyEvent, now: DateTime<Utc>) -> KeyRouting {
        if event.is_synthetic() {
            return KeyRouting::Listeners;
        }
        if !self.virtual_enabled {
            return KeyRouting::Ignored;
        }
        let Some((slot, control)) = key_to_control(&self.settings.virtual_gamepads, &event.key) else {
            return KeyRouting::Ignored;
        };

        let device = DeviceIndex::virtual_slot(slot);
        let value = match event.kind {
            KeyEventKind::Down => ControlValue::Down,
            KeyEventKind::Up => ControlValue::Up,
        };
        let next = self
            .devices
            .get(&device)
            .map(|state| state.snapshot)
            .unwrap_or_default()
            .with(control, value);

        let mut outputs = Vec::new();
        self.apply_snapshot(device, next, now, &mut outputs);
        KeyRouting::Consumed(outputs)
    }

    pub fn keyboard_key_to_control(&self, key: &str) -> Option<Control> {
        key_to_control(&self.settings.virtual_gamepads, key).map(|(_, control)| control)
    }

    /// Suppresses the control until it is next released
    pub fn lock_control(&mut self, control: Control) {
        debug!("Locking control {:?}", control);
        self.locks.insert(control);
    }

    pub fn is_control_locked(&self, control: Control) -> bool {
        self.locks.contains(&control)
    }

    pub fn set_virtual_gamepads_enabled(&mut self, enabled: bool) {
        debug!("Virtual gamepads enabled: {}", enabled);
        self.virtual_enabled = enabled;
    }

    pub fn virtual_gamepads_enabled(&self) -> bool {
        self.virtual_enabled
    }

    /// While hidden no keyboard events are synthesized
    pub fn set_window_visible(&mut self, visible: bool) {
        self.window_visible = visible;
    }

    /// Resets every snapshot to all-Up and drops cooldowns and locks
    pub fn clear(&mut self) {
        for state in self.devices.values_mut() {
            *state = DeviceState::default();
        }
        self.locks.clear();
        info!("Input state cleared");
    }

    fn apply_snapshot(
        &mut self,
        device: DeviceIndex,
        next: ControlSnapshot,
        now: DateTime<Utc>,
        outputs: &mut Vec<InputOutput>,
    ) {
        let Some(state) = self.devices.get_mut(&device) else {
            warn!("Snapshot for untracked device {}", device);
            return;
        };
        let prev = state.snapshot;

        for control in Control::ALL {
            match (prev.get(control), next.get(control)) {
                (ControlValue::Up, ControlValue::Down) => {
                    let was_locked = self.locks.remove(&control);
                    state
                        .cooldowns
                        .insert(control, now + self.settings.on_down_cooldown());
                    debug!("{} {:?} down", device, control);
                    emit(
                        &self.settings,
                        self.window_visible,
                        ControlEvent {
                            device,
                            control,
                            value: ControlValue::Down,
                            repeat: false,
                            at: now,
                        },
                        outputs,
                    );
                    if control == Control::A && self.settings.translate_a_to_activate && !was_locked {
                        outputs.push(InputOutput::Activate);
                    }
                }
                (ControlValue::Down, ControlValue::Up) => {
                    self.locks.remove(&control);
                    state.cooldowns.remove(&control);
                    debug!("{} {:?} up", device, control);
                    emit(
                        &self.settings,
                        self.window_visible,
                        ControlEvent {
                            device,
                            control,
                            value: ControlValue::Up,
                            repeat: false,
                            at: now,
                        },
                        outputs,
                    );
                }
                (ControlValue::Down, ControlValue::Down) if !self.locks.contains(&control) => {
                    let ready = state
                        .cooldowns
                        .get(&control)
                        .map_or(true, |until| *until < now);
                    if ready {
                        state
                            .cooldowns
                            .insert(control, now + self.settings.on_held_cooldown());
                        emit(
                            &self.settings,
                            self.window_visible,
                            ControlEvent {
                                device,
                                control,
                                value: ControlValue::Down,
                                repeat: true,
                                at: now,
                            },
                            outputs,
                        );
                    }
                }
                _ => {}
            }
        }

        state.snapshot = next;
    }
}

fn emit(settings: &InputSettings, window_visible: bool, event: ControlEvent, outputs: &mut Vec<InputOutput>) {
    let key = settings
        .control_keys
        .get(&event.control)
        .filter(|_| window_visible)
        .map(|key| {
            let kind = match event.value {
                ControlValue::Down => KeyEventKind::Down,
                ControlValue::Up => KeyEventKind::Up,
            };
            KeyEvent::synthetic(kind, key.clone(), event.control, event.repeat)
        });

    outputs.push(InputOutput::Control(event));
    if let Some(key) = key {
        outputs.push(InputOutput::Key(key));
    }
}
