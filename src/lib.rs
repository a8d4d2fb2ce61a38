//! padnav - controller input normalization and spatial focus navigation
//!
//! Gamepads (through gilrs) and keyboard-emulated controllers are turned into
//! edge-triggered logical control events, which drive directional focus
//! movement across the elements a UI host registers. Everything runs inside one
//! [`engine::Engine`] task, reached through an [`engine::EngineHandle`].

pub mod clock;
pub mod config;
pub mod engine;
pub mod input;
pub mod navigation;

pub use config::PadnavConfig;
pub use engine::{DeviceBackend, Engine, EngineError, EngineHandle};
pub use input::{Control, ControlEvent, ControlValue, KeyEvent, KeyEventKind};
pub use navigation::{Direction, ElementHandle, NavigableOptions, Registration};
