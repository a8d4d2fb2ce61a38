//! Engine - the single-inbox actor that owns input, navigation and geometry
//!
//! Every stimulus is serialized through one tokio task:
//!
//! ```text
//! EngineHandle ──► EngineCommand ──┐
//! collector ──► DeviceNotice ──────┤
//! poll tick (devices connected) ───┼──► Engine::run ──► InputManager / NavGrid / RectCache / UiHost
//! sweep tick ──────────────────────┘
//! ```
//!
//! Each command is handled to completion before the next one is looked at, so
//! the snapshot maps, the navigable registry and the rect cache need no locks.
//!
//! A synthesized keydown is delivered in a fixed order: the host (on the focus
//! target), then the navigator's direction handler, then the external keydown
//! listeners in registration order.

pub mod host;

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigError, PadnavConfig};
use crate::input::control::{Control, DeviceNotice};
use crate::input::error::InputError;
use crate::input::event_collector::CollectorHandle;
use crate::input::event_processor::{ControlEvent, InputManager, InputOutput, KeyRouting};
use crate::input::keyboard::{key_to_control, KeyEvent, KeyEventKind};
use crate::navigation::{
    ContextId, Direction, ElementHandle, NavGrid, NavigableOptions, RectCache, Registration,
};
use host::UiHost;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

pub use host::LoggingHost;

const INBOX_CAPACITY: usize = 256;
const NOTICE_CAPACITY: usize = 256;
const CONTROL_STREAM_CAPACITY: usize = 256;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine already initialized")]
    AlreadyInitialized,

    #[error(transparent)]
    Input(#[from] InputError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("channel error: {0}")]
    ChannelError(String),

    #[error("initialization error: {0}")]
    InitializationError(String),
}

/// Where physical device notices come from
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeviceBackend {
    /// gilrs collector thread, started by `initialize`
    #[default]
    Gilrs,
    /// The caller feeds notices through [`EngineHandle::device_notice`]
    External,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub type KeyListener = Box<dyn FnMut(&KeyEvent) + Send>;

type Reply<T> = oneshot::Sender<T>;

macro_rules! reply {
    ($response_tx:expr, $value:expr) => {
        if $response_tx.send($value).is_err() {
            debug!("Caller went away before the reply");
        }
    };
}

pub enum EngineCommand {
    Initialize {
        response_tx: Reply<Result<(), EngineError>>,
    },
    Register {
        element: ElementHandle,
        options: NavigableOptions,
        response_tx: Reply<Registration>,
    },
    Unregister {
        registration: Registration,
        response_tx: Reply<()>,
    },
    Navigate {
        direction: Direction,
        response_tx: Reply<bool>,
    },
    MoveFocus {
        forward: bool,
        response_tx: Reply<bool>,
    },
    ActiveElement {
        response_tx: Reply<Option<ElementHandle>>,
    },
    IsActiveElement {
        element: ElementHandle,
        response_tx: Reply<bool>,
    },
    PushContext {
        response_tx: Reply<ContextId>,
    },
    PopContext {
        response_tx: Reply<bool>,
    },
    AddListener {
        kind: KeyEventKind,
        listener: KeyListener,
        response_tx: Reply<ListenerId>,
    },
    RemoveListener {
        kind: KeyEventKind,
        id: ListenerId,
        response_tx: Reply<bool>,
    },
    LockControl {
        control: Control,
        response_tx: Reply<()>,
    },
    IsControlLocked {
        control: Control,
        response_tx: Reply<bool>,
    },
    SetVirtualGamepadsEnabled {
        enabled: bool,
        response_tx: Reply<()>,
    },
    SetWindowVisible {
        visible: bool,
        response_tx: Reply<()>,
    },
    Clear {
        response_tx: Reply<()>,
    },
    PollNow {
        response_tx: Reply<Result<(), EngineError>>,
    },
    Device {
        notice: DeviceNotice,
        response_tx: Option<Reply<Result<(), EngineError>>>,
    },
    Key(KeyEvent),
    PointerDown(ElementHandle),
    PointerUp(ElementHandle),
    FocusChanged {
        element: ElementHandle,
        from_other: bool,
    },
    Blurred(ElementHandle),
    Resized(ElementHandle),
    IsPolling {
        response_tx: Reply<bool>,
    },
    CachedRectCount {
        response_tx: Reply<usize>,
    },
    Shutdown {
        response_tx: Reply<()>,
    },
}

pub struct Engine {
    config: Arc<PadnavConfig>,
    backend: DeviceBackend,
    clock: Arc<dyn Clock>,
    host: Box<dyn UiHost>,
    input: InputManager,
    nav: NavGrid,
    rects: RectCache,
    keydown_listeners: Vec<(ListenerId, KeyListener)>,
    keyup_listeners: Vec<(ListenerId, KeyListener)>,
    next_listener: u64,
    controls: broadcast::Sender<ControlEvent>,
    notices_tx: mpsc::Sender<DeviceNotice>,
    collector: Option<CollectorHandle>,
    /// Poll timer armed
    polling: bool,
}

impl Engine {
    /// Spawns the engine task on the current tokio runtime
    pub fn spawn(
        config: PadnavConfig,
        host: Box<dyn UiHost>,
        backend: DeviceBackend,
    ) -> Result<EngineHandle, EngineError> {
        Self::spawn_with_clock(config, host, backend, Arc::new(SystemClock))
    }

    pub fn spawn_with_clock(
        config: PadnavConfig,
        host: Box<dyn UiHost>,
        backend: DeviceBackend,
        clock: Arc<dyn Clock>,
    ) -> Result<EngineHandle, EngineError> {
        config.validate()?;
        let config = Arc::new(config);

        let (tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let (notices_tx, notices) = mpsc::channel(NOTICE_CAPACITY);
        let (controls, _) = broadcast::channel(CONTROL_STREAM_CAPACITY);

        let engine = Engine {
            input: InputManager::new(config.input.clone()),
            nav: NavGrid::new(),
            rects: RectCache::new(config.rect_cache.ttl()),
            config: config.clone(),
            backend,
            clock,
            host,
            keydown_listeners: Vec::new(),
            keyup_listeners: Vec::new(),
            next_listener: 1,
            controls: controls.clone(),
            notices_tx,
            collector: None,
            polling: false,
        };

        info!("Spawning engine ({:?} device backend)", backend);
        tokio::spawn(engine.run(inbox, notices));

        Ok(EngineHandle {
            tx,
            controls,
            config,
        })
    }

    async fn run(
        mut self,
        mut inbox: mpsc::Receiver<EngineCommand>,
        mut notices: mpsc::Receiver<DeviceNotice>,
    ) {
        let mut poll = tokio::time::interval(self.config.input.poll_interval());
        poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut sweep = tokio::time::interval(self.config.rect_cache.sweep_interval());
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            // the poll timer only exists while a physical device is connected
            let wants_polling = self.input.has_physical_devices();
            if wants_polling != self.polling {
                if wants_polling {
                    poll.reset();
                    info!("Device polling started");
                } else {
                    info!("Device polling stopped");
                }
                self.polling = wants_polling;
            }

            tokio::select! {
                command = inbox.recv() => {
                    let Some(command) = command else {
                        debug!("All engine handles dropped");
                        break;
                    };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                Some(notice) = notices.recv() => {
                    let command = EngineCommand::Device { notice, response_tx: None };
                    if !self.handle_command(command) {
                        break;
                    }
                }
                _ = poll.tick(), if self.polling => {
                    if let Err(e) = self.poll() {
                        error!("Device poll failed, stopping engine: {}", e);
                        break;
                    }
                }
                _ = sweep.tick() => {
                    self.rects.sweep(self.clock.now());
                }
            }
        }

        if let Some(collector) = self.collector.take() {
            collector.stop();
        }
        info!("Engine stopped");
    }

    /// Returns `false` when the engine has to stop
    fn handle_command(&mut self, command: EngineCommand) -> bool {
        match command {
            EngineCommand::Initialize { response_tx } => {
                reply!(response_tx, self.initialize());
            }
            EngineCommand::Register {
                element,
                options,
                response_tx,
            } => {
                let registration = self.nav.register(element, options, self.host.as_mut());
                reply!(response_tx, registration);
            }
            EngineCommand::Unregister {
                registration,
                response_tx,
            } => {
                self.nav.unregister(registration, &mut self.rects);
                reply!(response_tx, ());
            }
            EngineCommand::Navigate {
                direction,
                response_tx,
            } => {
                reply!(response_tx, self.navigate(direction));
            }
            EngineCommand::MoveFocus {
                forward,
                response_tx,
            } => {
                reply!(response_tx, self.move_focus(forward));
            }
            EngineCommand::ActiveElement { response_tx } => {
                reply!(response_tx, self.nav.active_element());
            }
            EngineCommand::IsActiveElement {
                element,
                response_tx,
            } => {
                reply!(response_tx, self.nav.is_active_element(element));
            }
            EngineCommand::PushContext { response_tx } => {
                reply!(response_tx, self.nav.push_context(self.host.as_mut()));
            }
            EngineCommand::PopContext { response_tx } => {
                let popped = self.nav.pop_context(self.host.as_mut(), &mut self.rects);
                reply!(response_tx, popped);
            }
            EngineCommand::AddListener {
                kind,
                listener,
                response_tx,
            } => {
                let id = ListenerId(self.next_listener);
                self.next_listener += 1;
                self.listeners_mut(kind).push((id, listener));
                reply!(response_tx, id);
            }
            EngineCommand::RemoveListener {
                kind,
                id,
                response_tx,
            } => {
                let listeners = self.listeners_mut(kind);
                let before = listeners.len();
                listeners.retain(|(listener_id, _)| *listener_id != id);
                let removed = listeners.len() != before;
                reply!(response_tx, removed);
            }
            EngineCommand::LockControl {
                control,
                response_tx,
            } => {
                self.input.lock_control(control);
                reply!(response_tx, ());
            }
            EngineCommand::IsControlLocked {
                control,
                response_tx,
            } => {
                reply!(response_tx, self.input.is_control_locked(control));
            }
            EngineCommand::SetVirtualGamepadsEnabled {
                enabled,
                response_tx,
            } => {
                self.input.set_virtual_gamepads_enabled(enabled);
                reply!(response_tx, ());
            }
            EngineCommand::SetWindowVisible {
                visible,
                response_tx,
            } => {
                self.input.set_window_visible(visible);
                reply!(response_tx, ());
            }
            EngineCommand::Clear { response_tx } => {
                self.input.clear();
                reply!(response_tx, ());
            }
            EngineCommand::PollNow { response_tx } => {
                let result = self.poll();
                let fatal = result.is_err();
                reply!(response_tx, result);
                if fatal {
                    error!("Device poll failed, stopping engine");
                    return false;
                }
            }
            EngineCommand::Device {
                notice,
                response_tx,
            } => {
                let result = self.handle_notice(notice);
                let fatal = result.is_err();
                match response_tx {
                    Some(response_tx) => reply!(response_tx, result),
                    None => {
                        if let Err(e) = result {
                            error!("Device notice failed, stopping engine: {}", e);
                        }
                    }
                }
                if fatal {
                    return false;
                }
            }
            EngineCommand::Key(event) => self.handle_key(event),
            EngineCommand::PointerDown(element) => self.nav.pointer_down(element),
            EngineCommand::PointerUp(element) => self.nav.pointer_up(element),
            EngineCommand::FocusChanged {
                element,
                from_other,
            } => {
                self.nav
                    .focus_changed(element, from_other, self.host.as_mut());
            }
            EngineCommand::Blurred(element) => self.nav.blurred(element),
            EngineCommand::Resized(element) => self.nav.resized(element, &mut self.rects),
            EngineCommand::IsPolling { response_tx } => {
                reply!(response_tx, self.polling);
            }
            EngineCommand::CachedRectCount { response_tx } => {
                reply!(response_tx, self.rects.len());
            }
            EngineCommand::Shutdown { response_tx } => {
                info!("Engine shutdown requested");
                reply!(response_tx, ());
                return false;
            }
        }
        true
    }

    fn initialize(&mut self) -> Result<(), EngineError> {
        self.input.initialize().map_err(|e| match e {
            InputError::AlreadyInitialized => EngineError::AlreadyInitialized,
            other => EngineError::Input(other),
        })?;

        if self.backend == DeviceBackend::Gilrs {
            self.collector = Some(CollectorHandle::spawn(self.notices_tx.clone()));
        }
        info!("Engine initialized");
        Ok(())
    }

    fn listeners_mut(&mut self, kind: KeyEventKind) -> &mut Vec<(ListenerId, KeyListener)> {
        match kind {
            KeyEventKind::Down => &mut self.keydown_listeners,
            KeyEventKind::Up => &mut self.keyup_listeners,
        }
    }

    fn navigate(&mut self, direction: Direction) -> bool {
        let now = self.clock.now();
        self.nav
            .navigate(direction, self.host.as_mut(), &mut self.rects, now)
    }

    fn move_focus(&mut self, forward: bool) -> bool {
        let now = self.clock.now();
        self.nav
            .move_focus(forward, self.host.as_mut(), &mut self.rects, now)
    }

    fn handle_notice(&mut self, notice: DeviceNotice) -> Result<(), EngineError> {
        if !self.input.is_initialized() {
            debug!("Dropping device notice received before initialize");
            return Ok(());
        }
        match notice {
            DeviceNotice::Connected { device, info, raw } => {
                self.input.connect(device, info, raw)?;
            }
            DeviceNotice::Disconnected { device } => {
                self.input.disconnect(device);
            }
            DeviceNotice::State { device, raw } => match self.input.update_raw(device, raw) {
                Ok(()) => {}
                // devices rejected by the capability filter keep reporting
                Err(InputError::UnknownDevice(_)) => {}
                Err(e) => return Err(e.into()),
            },
        }
        Ok(())
    }

    fn poll(&mut self) -> Result<(), EngineError> {
        let outputs = self.input.poll(self.clock.now())?;
        self.dispatch_outputs(outputs);
        Ok(())
    }

    fn handle_key(&mut self, event: KeyEvent) {
        if !self.input.is_initialized() {
            self.deliver_user_key(event);
            return;
        }
        match self.input.handle_key_event(&event, self.clock.now()) {
            KeyRouting::Consumed(outputs) => self.dispatch_outputs(outputs),
            // a host echoing a synthesized key back only reaches the listeners
            KeyRouting::Listeners => self.notify_listeners(&event),
            KeyRouting::Ignored => self.deliver_user_key(event),
        }
    }

    /// A key no virtual controller claimed, passed through untouched
    fn deliver_user_key(&mut self, event: KeyEvent) {
        let target = self.nav.active_element();
        self.host.dispatch_key(target, &event);
        if event.kind == KeyEventKind::Down && event.key == "Tab" {
            self.move_focus(!event.shift);
        }
    }

    fn dispatch_outputs(&mut self, outputs: Vec<InputOutput>) {
        for output in outputs {
            match output {
                InputOutput::Control(event) => {
                    // no subscribers is fine
                    let _ = self.controls.send(event);
                }
                InputOutput::Key(event) => self.deliver_synthetic(event),
                InputOutput::Activate => {
                    if let Some(element) = self.nav.active_element() {
                        self.host.activate(element);
                    }
                }
            }
        }
    }

    fn deliver_synthetic(&mut self, mut event: KeyEvent) {
        let target = self.nav.active_element();
        self.host.dispatch_key(target, &event);

        match event.kind {
            KeyEventKind::Down => {
                let direction = event
                    .control
                    .or_else(|| self.input.keyboard_key_to_control(&event.key))
                    .and_then(Direction::from_control);
                if let Some(direction) = direction {
                    if self.navigate(direction) {
                        event.handled = true;
                    }
                }
            }
            KeyEventKind::Up => {}
        }
        self.notify_listeners(&event);
    }

    /// Keydown or keyup listeners, in registration order
    fn notify_listeners(&mut self, event: &KeyEvent) {
        for (_, listener) in self.listeners_mut(event.kind) {
            listener(event);
        }
    }
}

/// Cloneable front door to a running engine
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineCommand>,
    controls: broadcast::Sender<ControlEvent>,
    config: Arc<PadnavConfig>,
}

impl EngineHandle {
    async fn send(&self, command: EngineCommand) -> Result<(), EngineError> {
        self.tx.send(command).await.map_err(|_| {
            warn!("Engine inbox closed");
            EngineError::ChannelError("engine is not running".to_string())
        })
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(Reply<T>) -> EngineCommand,
    ) -> Result<T, EngineError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(command(response_tx)).await?;
        response_rx
            .await
            .map_err(|_| EngineError::ChannelError("engine dropped the request".to_string()))
    }

    pub fn config(&self) -> &PadnavConfig {
        &self.config
    }

    /// Creates the virtual controllers and starts device discovery. Only allowed once.
    pub async fn initialize(&self) -> Result<(), EngineError> {
        self.request(|response_tx| EngineCommand::Initialize { response_tx })
            .await?
    }

    pub async fn register_navigable(
        &self,
        element: ElementHandle,
        options: NavigableOptions,
    ) -> Result<Registration, EngineError> {
        self.request(|response_tx| EngineCommand::Register {
            element,
            options,
            response_tx,
        })
        .await
    }

    pub async fn unregister(&self, registration: Registration) -> Result<(), EngineError> {
        self.request(|response_tx| EngineCommand::Unregister {
            registration,
            response_tx,
        })
        .await
    }

    pub async fn navigate(&self, direction: Direction) -> Result<bool, EngineError> {
        self.request(|response_tx| EngineCommand::Navigate {
            direction,
            response_tx,
        })
        .await
    }

    /// Sequential focus, forwards or backwards
    pub async fn move_focus(&self, forward: bool) -> Result<bool, EngineError> {
        self.request(|response_tx| EngineCommand::MoveFocus {
            forward,
            response_tx,
        })
        .await
    }

    pub async fn active_element(&self) -> Result<Option<ElementHandle>, EngineError> {
        self.request(|response_tx| EngineCommand::ActiveElement { response_tx })
            .await
    }

    pub async fn is_active_element(&self, element: ElementHandle) -> Result<bool, EngineError> {
        self.request(|response_tx| EngineCommand::IsActiveElement {
            element,
            response_tx,
        })
        .await
    }

    pub async fn push_context(&self) -> Result<ContextId, EngineError> {
        self.request(|response_tx| EngineCommand::PushContext { response_tx })
            .await
    }

    pub async fn pop_context(&self) -> Result<bool, EngineError> {
        self.request(|response_tx| EngineCommand::PopContext { response_tx })
            .await
    }

    pub async fn add_keydown_listener(
        &self,
        listener: impl FnMut(&KeyEvent) + Send + 'static,
    ) -> Result<ListenerId, EngineError> {
        self.add_listener(KeyEventKind::Down, Box::new(listener))
            .await
    }

    pub async fn remove_keydown_listener(&self, id: ListenerId) -> Result<bool, EngineError> {
        self.remove_listener(KeyEventKind::Down, id).await
    }

    pub async fn add_keyup_listener(
        &self,
        listener: impl FnMut(&KeyEvent) + Send + 'static,
    ) -> Result<ListenerId, EngineError> {
        self.add_listener(KeyEventKind::Up, Box::new(listener)).await
    }

    pub async fn remove_keyup_listener(&self, id: ListenerId) -> Result<bool, EngineError> {
        self.remove_listener(KeyEventKind::Up, id).await
    }

    async fn add_listener(
        &self,
        kind: KeyEventKind,
        listener: KeyListener,
    ) -> Result<ListenerId, EngineError> {
        self.request(|response_tx| EngineCommand::AddListener {
            kind,
            listener,
            response_tx,
        })
        .await
    }

    async fn remove_listener(&self, kind: KeyEventKind, id: ListenerId) -> Result<bool, EngineError> {
        self.request(|response_tx| EngineCommand::RemoveListener {
            kind,
            id,
            response_tx,
        })
        .await
    }

    /// Suppresses `control` until its next release
    pub async fn lock_control(&self, control: Control) -> Result<(), EngineError> {
        self.request(|response_tx| EngineCommand::LockControl {
            control,
            response_tx,
        })
        .await
    }

    pub async fn is_control_locked(&self, control: Control) -> Result<bool, EngineError> {
        self.request(|response_tx| EngineCommand::IsControlLocked {
            control,
            response_tx,
        })
        .await
    }

    pub async fn set_virtual_gamepads_enabled(&self, enabled: bool) -> Result<(), EngineError> {
        self.request(|response_tx| EngineCommand::SetVirtualGamepadsEnabled {
            enabled,
            response_tx,
        })
        .await
    }

    pub async fn set_window_visible(&self, visible: bool) -> Result<(), EngineError> {
        self.request(|response_tx| EngineCommand::SetWindowVisible {
            visible,
            response_tx,
        })
        .await
    }

    /// Forgets all pressed state, cooldowns and locks
    pub async fn clear(&self) -> Result<(), EngineError> {
        self.request(|response_tx| EngineCommand::Clear { response_tx })
            .await
    }

    /// Control a key drives on a virtual controller. Reads configuration only.
    pub fn keyboard_key_to_control(&self, key: &str) -> Option<Control> {
        key_to_control(&self.config.input.virtual_gamepads, key).map(|(_, control)| control)
    }

    /// Raw key input from the runtime
    pub async fn key_event(&self, event: KeyEvent) -> Result<(), EngineError> {
        self.send(EngineCommand::Key(event)).await
    }

    /// Feeds a notice from an external device backend
    pub async fn device_notice(&self, notice: DeviceNotice) -> Result<(), EngineError> {
        self.request(|response_tx| EngineCommand::Device {
            notice,
            response_tx: Some(response_tx),
        })
        .await?
    }

    /// Runs one poll tick right away
    pub async fn poll_now(&self) -> Result<(), EngineError> {
        self.request(|response_tx| EngineCommand::PollNow { response_tx })
            .await?
    }

    pub async fn pointer_down(&self, element: ElementHandle) -> Result<(), EngineError> {
        self.send(EngineCommand::PointerDown(element)).await
    }

    pub async fn pointer_up(&self, element: ElementHandle) -> Result<(), EngineError> {
        self.send(EngineCommand::PointerUp(element)).await
    }

    /// The host moved focus to `element`
    pub async fn focus_changed(
        &self,
        element: ElementHandle,
        from_other: bool,
    ) -> Result<(), EngineError> {
        self.send(EngineCommand::FocusChanged {
            element,
            from_other,
        })
        .await
    }

    pub async fn blurred(&self, element: ElementHandle) -> Result<(), EngineError> {
        self.send(EngineCommand::Blurred(element)).await
    }

    pub async fn resized(&self, element: ElementHandle) -> Result<(), EngineError> {
        self.send(EngineCommand::Resized(element)).await
    }

    /// Stream of every logical control event
    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.controls.subscribe()
    }

    /// Whether the device poll timer is running
    pub async fn is_polling(&self) -> Result<bool, EngineError> {
        self.request(|response_tx| EngineCommand::IsPolling { response_tx })
            .await
    }

    /// Number of element rectangles currently held by the geometry cache
    pub async fn cached_rect_count(&self) -> Result<usize, EngineError> {
        self.request(|response_tx| EngineCommand::CachedRectCount { response_tx })
            .await
    }

    pub async fn shutdown(&self) -> Result<(), EngineError> {
        self.request(|response_tx| EngineCommand::Shutdown { response_tx })
            .await
    }
}
