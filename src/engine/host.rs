//! The UI the engine drives
//!
//! Rendering is not our business; the host owns the real elements and answers
//! layout queries, moves focus and receives the keyboard events synthesized
//! from controller input.

use crate::input::keyboard::KeyEvent;
use crate::navigation::{ElementHandle, FocusHost, LayoutProvider, NavRect, SoundCue};
use tracing::{debug, info};

pub trait UiHost: FocusHost + Send {
    /// Delivers a key event to `target`, or to the window when nothing is focused
    fn dispatch_key(&mut self, _target: Option<ElementHandle>, _event: &KeyEvent) {}

    /// Primary activation (a click) of the focused element
    fn activate(&mut self, _element: ElementHandle) {}
}

/// Host without a UI, logs what a real one would do
#[derive(Debug, Default)]
pub struct LoggingHost {
    focused: Option<ElementHandle>,
}

impl LoggingHost {
    pub fn focused(&self) -> Option<ElementHandle> {
        self.focused
    }
}

impl LayoutProvider for LoggingHost {
    fn measure(&mut self, _element: ElementHandle) -> NavRect {
        NavRect::default()
    }
}

impl FocusHost for LoggingHost {
    fn focus(&mut self, element: ElementHandle) {
        info!("Focus -> {:?}", element);
        self.focused = Some(element);
    }

    fn blur(&mut self, element: ElementHandle) {
        debug!("Blur {:?}", element);
        if self.focused == Some(element) {
            self.focused = None;
        }
    }

    fn play_cue(&mut self, cue: SoundCue) {
        debug!("Cue {:?}", cue);
    }
}

impl UiHost for LoggingHost {
    fn dispatch_key(&mut self, target: Option<ElementHandle>, event: &KeyEvent) {
        info!(
            "{:?} '{}' (repeat: {}) -> {:?}",
            event.kind, event.key, event.repeat, target
        );
    }

    fn activate(&mut self, element: ElementHandle) {
        info!("Activate {:?}", element);
    }
}
