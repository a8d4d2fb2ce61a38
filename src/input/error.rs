//! Error types for the input layer

use super::control::DeviceIndex;
use thiserror::Error;

/// Which kind of device index a control mapping pointed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinKind {
    Button,
    Axis,
}

impl std::fmt::Display for PinKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinKind::Button => write!(f, "button"),
            PinKind::Axis => write!(f, "axis"),
        }
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum InputError {
    /// `initialize()` was called more than once
    #[error("input layer already initialized")]
    AlreadyInitialized,

    /// A control mapping refers to a button or axis the device does not have.
    /// This is a misconfigured control map, never a transient condition.
    #[error("invalid control mapping: {kind} {index} out of range for device {device} ({available} available)")]
    InvalidControlMapping {
        device: DeviceIndex,
        kind: PinKind,
        index: usize,
        available: usize,
    },

    #[error("unknown device: {0}")]
    UnknownDevice(DeviceIndex),
}
