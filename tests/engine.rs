use padnav::clock::ManualClock;
use padnav::engine::host::UiHost;
use padnav::engine::{DeviceBackend, Engine, EngineError, EngineHandle};
use padnav::input::{
    Control, ControlValue, DeviceIndex, DeviceInfo, DeviceNotice, EventOrigin, InputError,
    KeyEvent, KeyEventKind, RawDeviceState,
};
use padnav::navigation::{
    Direction, ElementHandle, FocusHost, LayoutProvider, NavRect, NavigableOptions, SoundCue,
};
use padnav::PadnavConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast::error::TryRecvError;

#[derive(Default)]
struct HostState {
    rects: HashMap<ElementHandle, NavRect>,
    focused: Option<ElementHandle>,
    keys: Vec<(Option<ElementHandle>, KeyEvent)>,
    activated: Vec<ElementHandle>,
    cues: usize,
}

#[derive(Clone, Default)]
struct SharedHost(Arc<Mutex<HostState>>);

impl SharedHost {
    fn place(&self, id: u64, x: f32, y: f32) -> ElementHandle {
        let element = ElementHandle(id);
        self.0
            .lock()
            .unwrap()
            .rects
            .insert(element, NavRect::centered(x, y, 40.0, 20.0));
        element
    }

    fn focused(&self) -> Option<ElementHandle> {
        self.0.lock().unwrap().focused
    }

    fn keys(&self) -> Vec<(Option<ElementHandle>, KeyEvent)> {
        self.0.lock().unwrap().keys.clone()
    }
}

impl LayoutProvider for SharedHost {
    fn measure(&mut self, element: ElementHandle) -> NavRect {
        self.0
            .lock()
            .unwrap()
            .rects
            .get(&element)
            .copied()
            .unwrap_or_default()
    }
}

impl FocusHost for SharedHost {
    fn focus(&mut self, element: ElementHandle) {
        self.0.lock().unwrap().focused = Some(element);
    }

    fn blur(&mut self, element: ElementHandle) {
        let mut state = self.0.lock().unwrap();
        if state.focused == Some(element) {
            state.focused = None;
        }
    }

    fn play_cue(&mut self, _cue: SoundCue) {
        self.0.lock().unwrap().cues += 1;
    }
}

impl UiHost for SharedHost {
    fn dispatch_key(&mut self, target: Option<ElementHandle>, event: &KeyEvent) {
        self.0.lock().unwrap().keys.push((target, event.clone()));
    }

    fn activate(&mut self, element: ElementHandle) {
        self.0.lock().unwrap().activated.push(element);
    }
}

struct Harness {
    engine: EngineHandle,
    host: SharedHost,
    clock: ManualClock,
}

fn test_config() -> PadnavConfig {
    let mut config = PadnavConfig::default();
    // ticks stay out of the way, tests poll explicitly
    config.input.poll_interval_ms = 60_000;
    config
}

async fn start_with(config: PadnavConfig) -> Harness {
    let host = SharedHost::default();
    let clock = ManualClock::default();
    let engine = Engine::spawn_with_clock(
        config,
        Box::new(host.clone()),
        DeviceBackend::External,
        Arc::new(clock.clone()),
    )
    .unwrap();
    engine.initialize().await.unwrap();
    Harness {
        engine,
        host,
        clock,
    }
}

async fn start() -> Harness {
    start_with(test_config()).await
}

/// 3x3 grid, 100px apart, ids 1..=9 row by row
async fn register_grid(harness: &Harness) -> Vec<ElementHandle> {
    let mut elements = Vec::new();
    for row in 0..3u64 {
        for col in 0..3u64 {
            let element = harness
                .host
                .place(row * 3 + col + 1, 100.0 * col as f32, 100.0 * row as f32);
            harness
                .engine
                .register_navigable(element, NavigableOptions::default())
                .await
                .unwrap();
            elements.push(element);
        }
    }
    elements
}

async fn press(engine: &EngineHandle, key: &str) {
    engine
        .key_event(KeyEvent::user(KeyEventKind::Down, key))
        .await
        .unwrap();
    engine
        .key_event(KeyEvent::user(KeyEventKind::Up, key))
        .await
        .unwrap();
}

fn pad_info() -> DeviceInfo {
    DeviceInfo {
        name: "Test Pad".to_string(),
        buttons: 17,
        axes: 4,
    }
}

async fn connect_pad(harness: &Harness) -> DeviceInfo {
    let info = pad_info();
    harness
        .engine
        .device_notice(DeviceNotice::Connected {
            device: DeviceIndex(0),
            raw: RawDeviceState::idle(&info),
            info: info.clone(),
        })
        .await
        .unwrap();
    info
}

async fn set_raw(harness: &Harness, raw: RawDeviceState) {
    harness
        .engine
        .device_notice(DeviceNotice::State {
            device: DeviceIndex(0),
            raw,
        })
        .await
        .unwrap();
    harness.engine.poll_now().await.unwrap();
}

#[tokio::test]
async fn second_initialize_is_rejected() {
    let harness = start().await;
    let err = harness.engine.initialize().await.unwrap_err();
    assert!(matches!(err, EngineError::AlreadyInitialized));
}

#[tokio::test]
async fn navigates_registered_elements() {
    let harness = start().await;
    let elements = register_grid(&harness).await;
    let engine = &harness.engine;

    assert_eq!(engine.active_element().await.unwrap(), None);
    assert!(engine.navigate(Direction::Right).await.unwrap());
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[0]));

    assert!(engine.navigate(Direction::Right).await.unwrap());
    assert!(engine.navigate(Direction::Down).await.unwrap());
    assert!(engine.is_active_element(elements[4]).await.unwrap());
    assert_eq!(harness.host.focused(), Some(elements[4]));

    assert!(engine.navigate(Direction::Down).await.unwrap());
    assert!(!engine.navigate(Direction::Down).await.unwrap());
    assert!(engine.is_active_element(elements[7]).await.unwrap());
}

#[tokio::test]
async fn modal_context_isolates_navigation() {
    let harness = start().await;
    let elements = register_grid(&harness).await;
    let engine = &harness.engine;
    engine.navigate(Direction::Down).await.unwrap();
    engine.navigate(Direction::Right).await.unwrap();

    engine.push_context().await.unwrap();
    assert_eq!(engine.active_element().await.unwrap(), None);
    assert!(!engine.navigate(Direction::Left).await.unwrap());

    let ok = harness.host.place(100, 150.0, 100.0);
    let cancel = harness.host.place(101, 250.0, 100.0);
    let ok_registration = engine
        .register_navigable(ok, NavigableOptions::autofocus())
        .await
        .unwrap();
    engine
        .register_navigable(cancel, NavigableOptions::default())
        .await
        .unwrap();
    assert_eq!(engine.active_element().await.unwrap(), Some(ok));

    for direction in Direction::ALL {
        engine.navigate(direction).await.unwrap();
        let active = engine.active_element().await.unwrap();
        assert!(active == Some(ok) || active == Some(cancel));
    }

    let duplicate = engine
        .register_navigable(ok, NavigableOptions::default())
        .await
        .unwrap();
    assert!(duplicate.is_noop());
    assert!(!ok_registration.is_noop());

    assert!(engine.pop_context().await.unwrap());
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[1]));
    assert_eq!(harness.host.focused(), Some(elements[1]));
    assert!(!engine.pop_context().await.unwrap());
}

#[tokio::test]
async fn keyboard_drives_focus_through_virtual_controllers() {
    let harness = start().await;
    let elements = register_grid(&harness).await;
    let engine = &harness.engine;
    let mut controls = engine.subscribe();

    press(engine, "ArrowDown").await;
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[0]));
    press(engine, "ArrowRight").await;
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[1]));
    // second virtual controller
    press(engine, "s").await;
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[4]));

    let down = controls.try_recv().unwrap();
    assert_eq!(down.device, DeviceIndex(-1));
    assert_eq!(down.control, Control::Down);
    assert_eq!(down.value, ControlValue::Down);
    assert!(!down.repeat);
    let up = controls.try_recv().unwrap();
    assert_eq!(up.value, ControlValue::Up);

    let keys = harness.host.keys();
    assert!(keys.iter().all(|(_, event)| event.origin == EventOrigin::Synthetic));
    let (target, last) = keys.last().unwrap();
    assert_eq!(last.key, "ArrowDown");
    assert_eq!(last.kind, KeyEventKind::Up);
    assert_eq!(*target, Some(elements[4]));
}

#[tokio::test]
async fn listeners_see_synthesized_keys_in_registration_order() {
    let harness = start().await;
    let elements = register_grid(&harness).await;
    let engine = &harness.engine;
    let seen: Arc<Mutex<Vec<(String, String, bool)>>> = Arc::default();

    let log = seen.clone();
    let first = engine
        .add_keydown_listener(move |event| {
            log.lock()
                .unwrap()
                .push(("first".to_string(), event.key.clone(), event.handled));
        })
        .await
        .unwrap();
    let log = seen.clone();
    engine
        .add_keydown_listener(move |event| {
            log.lock()
                .unwrap()
                .push(("second".to_string(), event.key.clone(), event.handled));
        })
        .await
        .unwrap();
    let ups = Arc::new(Mutex::new(0usize));
    let counter = ups.clone();
    engine
        .add_keyup_listener(move |_| *counter.lock().unwrap() += 1)
        .await
        .unwrap();

    press(engine, "ArrowDown").await;
    press(engine, "Enter").await;
    assert!(engine.remove_keydown_listener(first).await.unwrap());
    assert!(!engine.remove_keydown_listener(first).await.unwrap());
    press(engine, "ArrowUp").await;
    engine.active_element().await.unwrap();

    let seen = seen.lock().unwrap().clone();
    assert_eq!(
        seen,
        vec![
            ("first".to_string(), "ArrowDown".to_string(), true),
            ("second".to_string(), "ArrowDown".to_string(), true),
            ("first".to_string(), "Enter".to_string(), false),
            ("second".to_string(), "Enter".to_string(), false),
            // already on the top row
            ("second".to_string(), "ArrowUp".to_string(), false),
        ]
    );
    assert_eq!(*ups.lock().unwrap(), 3);
    assert!(engine.is_active_element(elements[0]).await.unwrap());
}

#[tokio::test]
async fn disabled_virtual_controllers_pass_keys_through() {
    let harness = start().await;
    register_grid(&harness).await;
    let engine = &harness.engine;

    engine.set_virtual_gamepads_enabled(false).await.unwrap();
    press(engine, "ArrowDown").await;
    assert_eq!(engine.active_element().await.unwrap(), None);
    let keys = harness.host.keys();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|(_, event)| event.origin == EventOrigin::User));

    engine.set_virtual_gamepads_enabled(true).await.unwrap();
    press(engine, "ArrowDown").await;
    assert!(engine.active_element().await.unwrap().is_some());
}

#[tokio::test]
async fn tab_cycles_sequential_focus() {
    let harness = start().await;
    let elements = register_grid(&harness).await;
    let engine = &harness.engine;

    press(engine, "Tab").await;
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[0]));
    press(engine, "Tab").await;
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[1]));
    engine
        .key_event(KeyEvent::user(KeyEventKind::Down, "Tab").with_shift(true))
        .await
        .unwrap();
    engine
        .key_event(KeyEvent::user(KeyEventKind::Down, "Tab").with_shift(true))
        .await
        .unwrap();
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[8]));
    assert!(engine.move_focus(true).await.unwrap());
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[0]));
}

#[tokio::test]
async fn a_press_activates_the_focused_element() {
    let mut config = test_config();
    config.input.translate_a_to_activate = true;
    let harness = start_with(config).await;
    let elements = register_grid(&harness).await;
    let engine = &harness.engine;

    // nothing focused, nothing to click
    press(engine, "Enter").await;
    engine.navigate(Direction::Down).await.unwrap();
    press(engine, "Enter").await;
    engine.active_element().await.unwrap();
    assert_eq!(harness.host.0.lock().unwrap().activated, vec![elements[0]]);

    // a lock taken while released swallows the next activation
    engine.lock_control(Control::A).await.unwrap();
    press(engine, "Enter").await;
    engine.active_element().await.unwrap();
    assert_eq!(harness.host.0.lock().unwrap().activated.len(), 1);
}

#[tokio::test]
async fn gamepad_presses_repeat_on_cooldown() {
    let harness = start().await;
    let elements = register_grid(&harness).await;
    let info = connect_pad(&harness).await;
    let engine = &harness.engine;
    let mut controls = engine.subscribe();

    let held = RawDeviceState::idle(&info).press(13);
    set_raw(&harness, held.clone()).await;
    let event = controls.try_recv().unwrap();
    assert_eq!(event.device, DeviceIndex(0));
    assert_eq!(event.control, Control::Down);
    assert!(!event.repeat);
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[0]));

    harness.clock.advance_ms(150);
    engine.poll_now().await.unwrap();
    assert!(matches!(controls.try_recv(), Err(TryRecvError::Empty)));

    harness.clock.advance_ms(100);
    engine.poll_now().await.unwrap();
    let repeat = controls.try_recv().unwrap();
    assert!(repeat.repeat);
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[3]));

    harness.clock.advance_ms(299);
    engine.poll_now().await.unwrap();
    assert!(matches!(controls.try_recv(), Err(TryRecvError::Empty)));
    harness.clock.advance_ms(2);
    engine.poll_now().await.unwrap();
    assert!(controls.try_recv().unwrap().repeat);
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[6]));

    set_raw(&harness, RawDeviceState::idle(&info)).await;
    let up = controls.try_recv().unwrap();
    assert_eq!(up.value, ControlValue::Up);
}

#[tokio::test]
async fn lock_holds_until_release() {
    let harness = start().await;
    let info = connect_pad(&harness).await;
    let engine = &harness.engine;
    let mut controls = engine.subscribe();

    set_raw(&harness, RawDeviceState::idle(&info).press(0)).await;
    assert_eq!(controls.try_recv().unwrap().control, Control::A);

    engine.lock_control(Control::A).await.unwrap();
    assert!(engine.is_control_locked(Control::A).await.unwrap());
    harness.clock.advance_ms(5_000);
    engine.poll_now().await.unwrap();
    assert!(matches!(controls.try_recv(), Err(TryRecvError::Empty)));

    set_raw(&harness, RawDeviceState::idle(&info)).await;
    assert_eq!(controls.try_recv().unwrap().value, ControlValue::Up);
    assert!(!engine.is_control_locked(Control::A).await.unwrap());

    set_raw(&harness, RawDeviceState::idle(&info).press(0)).await;
    assert_eq!(controls.try_recv().unwrap().value, ControlValue::Down);
}

#[tokio::test]
async fn undersized_devices_are_ignored() {
    let harness = start().await;
    let engine = &harness.engine;
    let mut controls = engine.subscribe();
    let info = DeviceInfo {
        name: "Media Remote".to_string(),
        buttons: 4,
        axes: 0,
    };

    engine
        .device_notice(DeviceNotice::Connected {
            device: DeviceIndex(3),
            raw: RawDeviceState::idle(&info),
            info: info.clone(),
        })
        .await
        .unwrap();
    engine
        .device_notice(DeviceNotice::State {
            device: DeviceIndex(3),
            raw: RawDeviceState::idle(&info).press(0),
        })
        .await
        .unwrap();
    engine.poll_now().await.unwrap();
    assert!(matches!(controls.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn out_of_range_pins_fail_fast() {
    let harness = start().await;
    let engine = &harness.engine;

    // claims enough buttons but reports fewer
    let err = engine
        .device_notice(DeviceNotice::Connected {
            device: DeviceIndex(0),
            info: pad_info(),
            raw: RawDeviceState {
                buttons: vec![false; 4],
                axes: vec![0.0; 4],
            },
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::Input(InputError::InvalidControlMapping { .. })
    ));

    let err = engine.active_element().await.unwrap_err();
    assert!(matches!(err, EngineError::ChannelError(_)));
}

#[tokio::test]
async fn hidden_window_suppresses_key_synthesis() {
    let harness = start().await;
    register_grid(&harness).await;
    let info = connect_pad(&harness).await;
    let engine = &harness.engine;
    let mut controls = engine.subscribe();

    engine.set_window_visible(false).await.unwrap();
    set_raw(&harness, RawDeviceState::idle(&info).press(13)).await;
    assert_eq!(controls.try_recv().unwrap().control, Control::Down);
    assert!(harness.host.keys().is_empty());
    assert_eq!(engine.active_element().await.unwrap(), None);

    engine.clear().await.unwrap();
    engine.set_window_visible(true).await.unwrap();
    // cleared snapshot sees the held button as a fresh press
    engine.poll_now().await.unwrap();
    assert!(!controls.try_recv().unwrap().repeat);
    assert_eq!(harness.host.keys().len(), 1);
}

#[tokio::test]
async fn host_notifications_reach_the_navigator() {
    let harness = start().await;
    let elements = register_grid(&harness).await;
    let engine = &harness.engine;

    engine.focus_changed(elements[4], false).await.unwrap();
    assert!(engine.is_active_element(elements[4]).await.unwrap());
    engine.blurred(elements[4]).await.unwrap();
    assert_eq!(engine.active_element().await.unwrap(), None);

    engine.navigate(Direction::Down).await.unwrap();
    engine.pointer_down(elements[1]).await.unwrap();
    engine.focus_changed(elements[1], true).await.unwrap();
    engine.pointer_up(elements[1]).await.unwrap();
    assert_eq!(harness.host.0.lock().unwrap().cues, 0);
    engine.navigate(Direction::Down).await.unwrap();
    assert_eq!(harness.host.0.lock().unwrap().cues, 1);

    // the focused center element moves to the right end of the top row
    harness.host.place(5, 300.0, 0.0);
    engine.resized(elements[4]).await.unwrap();
    assert!(engine.navigate(Direction::Left).await.unwrap());
    assert!(engine.is_active_element(elements[2]).await.unwrap());
    assert!(engine.navigate(Direction::Right).await.unwrap());
    assert!(engine.is_active_element(elements[4]).await.unwrap());
}

#[tokio::test]
async fn unregister_and_shutdown() {
    let harness = start().await;
    let engine = &harness.engine;
    let element = harness.host.place(1, 0.0, 0.0);
    let registration = engine
        .register_navigable(element, NavigableOptions::autofocus())
        .await
        .unwrap();
    assert_eq!(engine.active_element().await.unwrap(), Some(element));

    engine.unregister(registration).await.unwrap();
    assert_eq!(engine.active_element().await.unwrap(), None);
    assert!(!engine.navigate(Direction::Up).await.unwrap());

    assert_eq!(engine.keyboard_key_to_control("w"), Some(Control::Up));
    assert_eq!(engine.keyboard_key_to_control("F13"), None);

    engine.shutdown().await.unwrap();
    let err = engine.navigate(Direction::Up).await.unwrap_err();
    assert!(matches!(err, EngineError::ChannelError(_)));
}

#[tokio::test]
async fn echoed_synthetic_keys_only_reach_listeners() {
    let harness = start().await;
    let elements = register_grid(&harness).await;
    let engine = &harness.engine;
    press(engine, "ArrowDown").await;
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[0]));
    let dispatched = harness.host.keys().len();

    let calls = Arc::new(Mutex::new(0usize));
    let counter = calls.clone();
    engine
        .add_keydown_listener(move |_| *counter.lock().unwrap() += 1)
        .await
        .unwrap();

    engine
        .key_event(KeyEvent::synthetic(
            KeyEventKind::Down,
            "ArrowRight",
            Control::Right,
            false,
        ))
        .await
        .unwrap();

    assert_eq!(engine.active_element().await.unwrap(), Some(elements[0]));
    assert_eq!(harness.host.keys().len(), dispatched);
    assert_eq!(*calls.lock().unwrap(), 1);
}

#[tokio::test(start_paused = true)]
async fn poll_timer_reads_connected_devices() {
    let mut config = test_config();
    config.input.poll_interval_ms = 20;
    let harness = start_with(config).await;
    let elements = register_grid(&harness).await;
    let info = connect_pad(&harness).await;
    let engine = &harness.engine;
    let mut controls = engine.subscribe();

    engine
        .device_notice(DeviceNotice::State {
            device: DeviceIndex(0),
            raw: RawDeviceState::idle(&info).press(13),
        })
        .await
        .unwrap();
    assert!(matches!(controls.try_recv(), Err(TryRecvError::Empty)));

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(engine.active_element().await.unwrap(), Some(elements[0]));
    let event = controls.try_recv().unwrap();
    assert_eq!(event.control, Control::Down);
    assert_eq!(event.value, ControlValue::Down);
    // the manual clock never moved, so no repeat
    assert!(matches!(controls.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn polling_follows_device_connections() {
    let mut config = test_config();
    config.input.poll_interval_ms = 20;
    let harness = start_with(config).await;
    let engine = &harness.engine;
    let mut controls = engine.subscribe();

    assert!(!engine.is_polling().await.unwrap());
    connect_pad(&harness).await;
    assert!(engine.is_polling().await.unwrap());

    engine
        .device_notice(DeviceNotice::Disconnected {
            device: DeviceIndex(0),
        })
        .await
        .unwrap();
    assert!(!engine.is_polling().await.unwrap());

    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert!(!engine.is_polling().await.unwrap());
    assert!(matches!(controls.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test(start_paused = true)]
async fn sweep_timer_drops_expired_rects() {
    let mut config = test_config();
    config.rect_cache.ttl_secs = 1;
    config.rect_cache.sweep_interval_secs = 1;
    let harness = start_with(config).await;
    register_grid(&harness).await;
    let engine = &harness.engine;

    engine.navigate(Direction::Down).await.unwrap();
    engine.navigate(Direction::Right).await.unwrap();
    assert!(engine.cached_rect_count().await.unwrap() > 0);

    harness.clock.advance_ms(2_000);
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
    assert_eq!(engine.cached_rect_count().await.unwrap(), 0);
}
