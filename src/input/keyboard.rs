//! Keyboard events and keyboard-as-gamepad mappings

use super::control::Control;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum KeyEventKind {
    Down,
    Up,
}

/// Where a key event came from.
///
/// Events synthesized from controller input are tagged [`EventOrigin::Synthetic`]
/// and are never fed back into the virtual controllers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventOrigin {
    User,
    Synthetic,
}

#[derive(Clone, Debug, PartialEq)]
pub struct KeyEvent {
    pub kind: KeyEventKind,
    pub key: String,
    pub repeat: bool,
    pub shift: bool,
    pub origin: EventOrigin,
    /// Control this event was synthesized from, if any
    pub control: Option<Control>,
    /// Set once a consumer acted on the event
    pub handled: bool,
}

impl KeyEvent {
    pub fn user(kind: KeyEventKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            repeat: false,
            shift: false,
            origin: EventOrigin::User,
            control: None,
            handled: false,
        }
    }

    pub fn synthetic(kind: KeyEventKind, key: impl Into<String>, control: Control, repeat: bool) -> Self {
        Self {
            kind,
            key: key.into(),
            repeat,
            shift: false,
            origin: EventOrigin::Synthetic,
            control: Some(control),
            handled: false,
        }
    }

    pub fn with_shift(mut self, shift: bool) -> Self {
        self.shift = shift;
        self
    }

    pub fn is_synthetic(&self) -> bool {
        self.origin == EventOrigin::Synthetic
    }
}

/// Keys of one keyboard-based virtual controller
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VirtualGamepadMap {
    pub keys: HashMap<String, Control>,
}

impl VirtualGamepadMap {
    pub fn new<'a>(pairs: impl IntoIterator<Item = (&'a str, Control)>) -> Self {
        Self {
            keys: pairs
                .into_iter()
                .map(|(key, control)| (key.to_string(), control))
                .collect(),
        }
    }

    pub fn control_for(&self, key: &str) -> Option<Control> {
        self.keys.get(key).copied()
    }
}

/// Arrow keys plus Enter/Backspace, and a WASD cluster
pub fn default_virtual_gamepads() -> Vec<VirtualGamepadMap> {
    vec![
        VirtualGamepadMap::new([
            ("ArrowUp", Control::Up),
            ("ArrowDown", Control::Down),
            ("ArrowLeft", Control::Left),
            ("ArrowRight", Control::Right),
            ("Enter", Control::A),
            ("Backspace", Control::B),
            ("Escape", Control::Escape),
            ("Home", Control::Menu),
        ]),
        VirtualGamepadMap::new([
            ("w", Control::Up),
            ("s", Control::Down),
            ("a", Control::Left),
            ("d", Control::Right),
            ("q", Control::A),
            ("e", Control::B),
            ("x", Control::Escape),
            ("z", Control::Start),
        ]),
    ]
}

/// Keys that controller input is re-synthesized as
pub fn default_control_keys() -> BTreeMap<Control, String> {
    BTreeMap::from([
        (Control::A, "Enter".to_string()),
        (Control::B, "Backspace".to_string()),
        (Control::Up, "ArrowUp".to_string()),
        (Control::Down, "ArrowDown".to_string()),
        (Control::Left, "ArrowLeft".to_string()),
        (Control::Right, "ArrowRight".to_string()),
        (Control::Menu, "Home".to_string()),
        (Control::Escape, "Escape".to_string()),
    ])
}

/// First mapping (in configured order) that knows the key wins
pub fn key_to_control(maps: &[VirtualGamepadMap], key: &str) -> Option<(usize, Control)> {
    maps.iter()
        .enumerate()
        .find_map(|(slot, map)| map.control_for(key).map(|control| (slot, control)))
}
