//! Input normalization layer
//!
//! Presents every physical or keyboard-emulated controller as one stream of
//! edge-triggered logical control events.
//!
//! ```text
//! gilrs ──► event_collector ──► DeviceNotice ──┐
//!                                               ├──► event_processor ──► ControlEvent / KeyEvent
//! keyboard ──► KeyEvent (User) ─────────────────┘
//! ```
//!
//! 1. [`event_collector`] - gamepad discovery and raw reads (gilrs, blocking thread)
//! 2. [`event_processor`] - snapshots, edge detection, cooldowns, locks
//! 3. [`keyboard`] - keyboard events and virtual controller key maps

pub mod control;
pub mod error;
pub mod event_collector;
pub mod event_processor;
pub mod keyboard;

pub use control::{
    AxisBinding, Control, ControlMapping, ControlSnapshot, ControlValue, DeviceIndex, DeviceInfo,
    DeviceNotice, RawDeviceState,
};
pub use error::{InputError, PinKind};
pub use event_collector::{CollectorError, CollectorHandle};
pub use event_processor::{ControlEvent, InputManager, InputOutput, KeyRouting};
pub use keyboard::{EventOrigin, KeyEvent, KeyEventKind, VirtualGamepadMap};
