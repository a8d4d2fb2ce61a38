//! Logical controls, per-device snapshots and the control → pin mapping
//!
//! A physical device is described by a [`RawDeviceState`]: pressed flags for its
//! buttons and values for its axes, both indexed in the standard gamepad layout.
//! [`ControlMapping`] turns that into a [`ControlSnapshot`], one Down/Up value per
//! logical [`Control`].

use super::error::{InputError, PinKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Logical control exposed to the rest of the application
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Control {
    A,
    B,
    Up,
    Down,
    Left,
    Right,
    Menu,
    Escape,
    Start,
}

impl Control {
    pub const COUNT: usize = 9;

    pub const ALL: [Control; Control::COUNT] = [
        Control::A,
        Control::B,
        Control::Up,
        Control::Down,
        Control::Left,
        Control::Right,
        Control::Menu,
        Control::Escape,
        Control::Start,
    ];

    fn slot(self) -> usize {
        self as usize
    }

    pub fn is_directional(self) -> bool {
        matches!(
            self,
            Control::Up | Control::Down | Control::Left | Control::Right
        )
    }
}

/// Binary state of a control
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlValue {
    #[default]
    Up,
    Down,
}

impl ControlValue {
    pub fn from_pressed(pressed: bool) -> Self {
        if pressed {
            ControlValue::Down
        } else {
            ControlValue::Up
        }
    }

    pub fn is_down(self) -> bool {
        self == ControlValue::Down
    }

    /// Down wins
    pub fn merge(self, other: ControlValue) -> ControlValue {
        if self.is_down() || other.is_down() {
            ControlValue::Down
        } else {
            ControlValue::Up
        }
    }
}

/// Down/Up value of every control for one device at one instant
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ControlSnapshot {
    values: [ControlValue; Control::COUNT],
}

impl ControlSnapshot {
    pub fn get(&self, control: Control) -> ControlValue {
        self.values[control.slot()]
    }

    pub fn set(&mut self, control: Control, value: ControlValue) {
        self.values[control.slot()] = value;
    }

    pub fn with(mut self, control: Control, value: ControlValue) -> Self {
        self.set(control, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (Control, ControlValue)> + '_ {
        Control::ALL.iter().map(move |control| (*control, self.get(*control)))
    }
}

/// Device identity. Physical controllers use their non-negative index, keyboard
/// based virtual controllers use `-1, -2, ...` in the order they are configured.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceIndex(pub i32);

impl DeviceIndex {
    pub fn virtual_slot(slot: usize) -> Self {
        DeviceIndex(-(slot as i32) - 1)
    }

    pub fn is_virtual(self) -> bool {
        self.0 < 0
    }
}

impl fmt::Display for DeviceIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_virtual() {
            write!(f, "virtual#{}", -self.0 - 1)
        } else {
            write!(f, "pad#{}", self.0)
        }
    }
}

/// Capabilities a device reported when it connected
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceInfo {
    pub name: String,
    pub buttons: usize,
    pub axes: usize,
}

/// One raw read of a physical device
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawDeviceState {
    pub buttons: Vec<bool>,
    pub axes: Vec<f32>,
}

impl RawDeviceState {
    pub fn idle(info: &DeviceInfo) -> Self {
        Self {
            buttons: vec![false; info.buttons],
            axes: vec![0.0; info.axes],
        }
    }

    pub fn press(mut self, pin: usize) -> Self {
        if let Some(button) = self.buttons.get_mut(pin) {
            *button = true;
        }
        self
    }

    pub fn tilt(mut self, pin: usize, value: f32) -> Self {
        if let Some(axis) = self.axes.get_mut(pin) {
            *axis = value;
        }
        self
    }
}

/// Device lifecycle and state changes reported by a device backend
#[derive(Clone, Debug, PartialEq)]
pub enum DeviceNotice {
    Connected {
        device: DeviceIndex,
        info: DeviceInfo,
        raw: RawDeviceState,
    },
    Disconnected {
        device: DeviceIndex,
    },
    State {
        device: DeviceIndex,
        raw: RawDeviceState,
    },
}

/// Axis that also drives a directional control
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisBinding {
    pub pin: usize,
    /// `-1.0` for the negative half of the axis, `1.0` for the positive half
    pub sign: f32,
    pub threshold: f32,
}

impl AxisBinding {
    fn is_down(&self, value: f32) -> bool {
        let threshold = self.sign * self.threshold;
        if threshold < 0.0 {
            value <= threshold
        } else {
            value >= threshold
        }
    }
}

/// Which device buttons and axes feed each logical control
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ControlMapping {
    pub buttons: BTreeMap<Control, Vec<usize>>,
    #[serde(default)]
    pub axes: BTreeMap<Control, AxisBinding>,
}

impl Default for ControlMapping {
    /// Standard gamepad layout: face buttons 0-3, select/start 8/9, d-pad 12-15,
    /// left stick on axes 0/1.
    fn default() -> Self {
        let buttons = BTreeMap::from([
            (Control::A, vec![0]),
            (Control::B, vec![1]),
            (Control::Menu, vec![2]),
            (Control::Escape, vec![8, 3]),
            (Control::Start, vec![9]),
            (Control::Up, vec![12]),
            (Control::Down, vec![13]),
            (Control::Left, vec![14]),
            (Control::Right, vec![15]),
        ]);
        let axes = BTreeMap::from([
            (Control::Up, AxisBinding { pin: 1, sign: -1.0, threshold: 0.5 }),
            (Control::Down, AxisBinding { pin: 1, sign: 1.0, threshold: 0.5 }),
            (Control::Left, AxisBinding { pin: 0, sign: -1.0, threshold: 0.5 }),
            (Control::Right, AxisBinding { pin: 0, sign: 1.0, threshold: 0.5 }),
        ]);
        Self { buttons, axes }
    }
}

impl ControlMapping {
    /// Smallest button count a device needs so every mapped pin exists
    pub fn min_buttons_required(&self) -> usize {
        self.buttons
            .values()
            .flatten()
            .max()
            .map_or(0, |pin| pin + 1)
    }

    pub fn min_axes_required(&self) -> usize {
        self.axes.values().map(|axis| axis.pin + 1).max().unwrap_or(0)
    }

    /// Capability filter for newly connected devices
    pub fn accepts(&self, info: &DeviceInfo) -> bool {
        info.buttons >= self.min_buttons_required() && info.axes >= self.min_axes_required()
    }

    /// Reads every control from a raw device state
    pub fn read_snapshot(
        &self,
        device: DeviceIndex,
        raw: &RawDeviceState,
    ) -> Result<ControlSnapshot, InputError> {
        let mut snapshot = ControlSnapshot::default();
        for control in Control::ALL {
            let mut value = ControlValue::Up;
            if let Some(pins) = self.buttons.get(&control) {
                for pin in pins {
                    value = value.merge(read_button(device, raw, *pin)?);
                }
            }
            if let Some(axis) = self.axes.get(&control) {
                value = value.merge(read_axis(device, raw, axis)?);
            }
            snapshot.set(control, value);
        }
        Ok(snapshot)
    }
}

fn read_button(
    device: DeviceIndex,
    raw: &RawDeviceState,
    pin: usize,
) -> Result<ControlValue, InputError> {
    match raw.buttons.get(pin) {
        Some(pressed) => Ok(ControlValue::from_pressed(*pressed)),
        None => Err(InputError::InvalidControlMapping {
            device,
            kind: PinKind::Button,
            index: pin,
            available: raw.buttons.len(),
        }),
    }
}

fn read_axis(
    device: DeviceIndex,
    raw: &RawDeviceState,
    axis: &AxisBinding,
) -> Result<ControlValue, InputError> {
    match raw.axes.get(axis.pin) {
        Some(value) => Ok(ControlValue::from_pressed(axis.is_down(*value))),
        None => Err(InputError::InvalidControlMapping {
            device,
            kind: PinKind::Axis,
            index: axis.pin,
            available: raw.axes.len(),
        }),
    }
}
