//! Integration tests for the per-keyboard fade session.
//!
//! # Purpose
//!
//! These tests spawn a [`DeviceSession`] the way `App::run` does and drive it
//! through its public inputs: key events, the shutdown signal, and the
//! behaviour of the mock SDK connections it is handed.  They verify:
//!
//! - A key press lights its LED, fades it without ever brightening, and ends
//!   with exactly one off push.
//! - Ctrl-C turns every LED off and closes the connection.
//! - A lost connection is replaced by a fresh one and fading resumes.
//! - Reconnection that keeps failing ends the session with an error instead
//!   of hanging.
//! - A different device appearing at the same location ends the session and
//!   hands the new device back for calibration.
//! - The input stream closing ends the session with LEDs off.
//!
//! All tests run with paused tokio time; sleeping in the test lets the
//! session's 16 ms ticker run as fast as the CPU allows.

use std::sync::Arc;
use std::time::Duration;

use rgbfade::application::fade_engine::FadeSettings;
use rgbfade::application::retry::ConnectError;
use rgbfade::application::session::{DeviceSession, SessionError, SessionSettings};
use rgbfade::application::shutdown::shutdown_channel;
use rgbfade::infrastructure::input_capture::mock::MockInputSource;
use rgbfade::infrastructure::input_capture::InputSource;
use rgbfade::infrastructure::lighting::mock::{LedCommand, MockConnector, MockLedController};
use rgbfade::infrastructure::lighting::LedController;
use rgbfade_core::{DecayCurve, KeyId, Keymap, LedIndex, Rgb};
use tokio::time::sleep;

const LOCATION: &str = "HID: /dev/hidraw0";
const BASE: Rgb = Rgb::new(255, 100, 255);

fn settings() -> SessionSettings {
    SessionSettings {
        tick_interval: Duration::from_millis(16),
        connect_attempts: 3,
        fade: FadeSettings {
            base_color: BASE,
            duration: Duration::from_millis(1000),
            curve: DecayCurve::Linear,
            max_push_failures: 3,
        },
    }
}

fn keymap() -> Keymap {
    let mut km = Keymap::new();
    km.insert(KeyId(1), LedIndex(0));
    km.insert(KeyId(2), LedIndex(1));
    km
}

fn session(connector: Arc<MockConnector>, first: &MockLedController) -> DeviceSession {
    DeviceSession::new(
        connector,
        LOCATION,
        first.device_info().signature(),
        keymap(),
        settings(),
    )
}

fn sets_for(mock: &MockLedController, led: LedIndex) -> Vec<Rgb> {
    mock.set_commands()
        .into_iter()
        .filter(|(l, _)| *l == led)
        .map(|(_, color)| color)
        .collect()
}

// ── Fading and shutdown ───────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_press_fades_out_and_shutdown_turns_leds_off() {
    // Arrange
    let mock = Arc::new(MockLedController::keyboard(4));
    let connector = Arc::new(MockConnector::new(LOCATION, vec![mock.clone()]));
    let input = MockInputSource::new();
    let events = input.start().expect("start");
    let (trigger, shutdown) = shutdown_channel();
    let handle = tokio::spawn(session(connector, &mock).run(events, shutdown));

    // Act
    input.press(KeyId(1));
    sleep(Duration::from_millis(1200)).await;
    trigger.trigger();
    let result = handle.await.expect("session task");

    // Assert – the session ended cleanly
    assert!(result.is_ok(), "shutdown is not an error: {result:?}");

    // Assert – LED 0 faded monotonically and was switched off exactly once
    let colors = sets_for(&mock, LedIndex(0));
    assert!(colors.len() > 2, "expected several fade pushes, got {colors:?}");
    for pair in colors.windows(2) {
        assert!(
            pair[1].luminance_sum() <= pair[0].luminance_sum(),
            "fade brightened: {pair:?}"
        );
    }
    assert_eq!(colors.last(), Some(&Rgb::BLACK));
    assert_eq!(colors.iter().filter(|c| c.is_black()).count(), 1);
    assert!(sets_for(&mock, LedIndex(1)).is_empty(), "LED 1 was never pressed");

    // Assert – LEDs off and connection closed on shutdown
    let commands = mock.commands();
    assert_eq!(&commands[..2], &[LedCommand::DirectMode, LedCommand::Fill(Rgb::BLACK)]);
    assert_eq!(commands.last(), Some(&LedCommand::Fill(Rgb::BLACK)));
    assert!(mock.is_disconnected());
}

#[tokio::test(start_paused = true)]
async fn test_unmapped_key_pushes_nothing() {
    let mock = Arc::new(MockLedController::keyboard(4));
    let connector = Arc::new(MockConnector::new(LOCATION, vec![mock.clone()]));
    let input = MockInputSource::new();
    let events = input.start().expect("start");
    let (trigger, shutdown) = shutdown_channel();
    let handle = tokio::spawn(session(connector, &mock).run(events, shutdown));

    input.press(KeyId(77));
    sleep(Duration::from_millis(200)).await;
    trigger.trigger();
    handle.await.expect("session task").expect("clean exit");

    assert!(mock.set_commands().is_empty());
}

// ── Connection loss ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_lost_connection_is_replaced_and_fading_resumes() {
    // Arrange – the connector has a second connection ready
    let first = Arc::new(MockLedController::keyboard(4));
    let second = Arc::new(MockLedController::keyboard(4));
    let connector = Arc::new(MockConnector::new(
        LOCATION,
        vec![first.clone(), second.clone()],
    ));
    let input = MockInputSource::new();
    let events = input.start().expect("start");
    let (trigger, shutdown) = shutdown_channel();
    let handle = tokio::spawn(session(connector.clone(), &first).run(events, shutdown));

    // Act – drop the first connection while LED 0 is fading
    input.press(KeyId(1));
    sleep(Duration::from_millis(100)).await;
    first.set_failing(true);
    sleep(Duration::from_millis(300)).await;
    input.press(KeyId(2));
    sleep(Duration::from_millis(100)).await;
    trigger.trigger();
    handle.await.expect("session task").expect("clean exit");

    // Assert – the first connection saw the failures and was closed
    assert!(first.failed_calls() >= 3);
    assert!(first.is_disconnected());
    assert_eq!(connector.connect_attempts(), 2);

    // Assert – the second connection was prepared and picked up key 2
    let commands = second.commands();
    assert_eq!(&commands[..2], &[LedCommand::DirectMode, LedCommand::Fill(Rgb::BLACK)]);
    let key2 = sets_for(&second, LedIndex(1));
    let first_push = key2.first().expect("LED 1 pushed on the new connection");
    assert!(
        first_push.luminance_sum() >= BASE.luminance_sum() * 9 / 10,
        "key 2 should start near full brightness, got {first_push}"
    );
    assert!(sets_for(&second, LedIndex(0)).is_empty(), "old fades are not carried over");
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_gives_up_after_configured_attempts() {
    // Arrange – no replacement connection is available
    let mock = Arc::new(MockLedController::keyboard(4));
    let connector = Arc::new(MockConnector::new(LOCATION, vec![mock.clone()]));
    let input = MockInputSource::new();
    let events = input.start().expect("start");
    let (_trigger, shutdown) = shutdown_channel();
    let handle = tokio::spawn(session(connector.clone(), &mock).run(events, shutdown));

    // Act
    input.press(KeyId(1));
    sleep(Duration::from_millis(50)).await;
    mock.set_failing(true);
    let result = handle.await.expect("session task");

    // Assert – one initial connect plus three reconnect attempts
    assert!(matches!(
        result,
        Err(SessionError::Connect(ConnectError::Exhausted { attempts: 3, .. }))
    ));
    assert_eq!(connector.connect_attempts(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_different_device_after_reconnect_is_handed_back() {
    // Arrange – the replacement reports a different LED count
    let first = Arc::new(MockLedController::keyboard(4));
    let other = Arc::new(MockLedController::keyboard(104));
    let connector = Arc::new(MockConnector::new(LOCATION, vec![first.clone(), other.clone()]));
    let input = MockInputSource::new();
    let events = input.start().expect("start");
    let (_trigger, shutdown) = shutdown_channel();
    let handle = tokio::spawn(session(connector, &first).run(events, shutdown));

    // Act
    input.press(KeyId(1));
    sleep(Duration::from_millis(50)).await;
    first.set_failing(true);
    let result = handle.await.expect("session task");

    // Assert
    match result {
        Err(SessionError::DeviceMismatch { expected, found, .. }) => {
            assert_eq!(expected.led_count, 4);
            assert_eq!(&found, other.device_info());
        }
        unexpected => panic!("expected DeviceMismatch, got {unexpected:?}"),
    }
    assert!(other.is_disconnected());
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_initial_connect_is_clean() {
    // Arrange – nothing to connect to
    let connector = Arc::new(MockConnector::new(LOCATION, Vec::new()));
    let reference = MockLedController::keyboard(4);
    let input = MockInputSource::new();
    let events = input.start().expect("start");
    let (trigger, shutdown) = shutdown_channel();
    let handle = tokio::spawn(session(connector, &reference).run(events, shutdown));

    // Act
    sleep(Duration::from_millis(100)).await;
    trigger.trigger();

    // Assert
    assert!(handle.await.expect("session task").is_ok());
}

// ── Input loss ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_closed_input_ends_session_with_leds_off() {
    let mock = Arc::new(MockLedController::keyboard(4));
    let connector = Arc::new(MockConnector::new(LOCATION, vec![mock.clone()]));
    let input = MockInputSource::new();
    let events = input.start().expect("start");
    let (_trigger, shutdown) = shutdown_channel();
    let handle = tokio::spawn(session(connector, &mock).run(events, shutdown));

    sleep(Duration::from_millis(50)).await;
    input.stop();
    let result = handle.await.expect("session task");

    assert!(matches!(result, Err(SessionError::InputClosed { .. })));
    assert_eq!(mock.commands().last(), Some(&LedCommand::Fill(Rgb::BLACK)));
    assert!(mock.is_disconnected());
}
