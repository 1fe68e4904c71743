//! End-to-end scenarios over the public API, on simulated GPIO with
//! synthetic timestamps.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracked_drive::command::{Direction, MotorCommand, NormalizedCommand};
use tracked_drive::config::ControlConfig;
use tracked_drive::control::ControlLoop;
use tracked_drive::controller::mapper::{buttons, RawSample};
use tracked_drive::controller::{InputFault, SampleSource};
use tracked_drive::drive::differential::{decompose, Shaping};
use tracked_drive::drive::{Arbitration, DifferentialActuator, DriveArbiter, StopReason};
use tracked_drive::gpio::{Level, SimulatedGpio};
use tracked_drive::safety::{EmergencyStopMonitor, StopStatus};

const STOP_PIN: u8 = 26;
const RESET_PIN: u8 = 16;
const LEFT_EN: u8 = 22;
const RIGHT_EN: u8 = 25;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

/// Full-range stick, no floor, no ramp: motor output equals the mix.
fn plain_config() -> ControlConfig {
    let mut config = ControlConfig::default();
    config.input.max_throttle = 1.0;
    config.drive.min_throttle = 0.0;
    config.drive.soft_start = false;
    config
}

fn stick(shared: &Arc<Mutex<RawSample>>, x: f32, y: f32) {
    *shared.lock().unwrap() = RawSample {
        axis_x: x,
        axis_y: y,
        ..RawSample::default()
    };
}

fn build(config: &ControlConfig) -> (SimulatedGpio, Arc<Mutex<RawSample>>, ControlLoop) {
    let shared = Arc::new(Mutex::new(RawSample::default()));
    let reader = Arc::clone(&shared);
    let source: Box<dyn SampleSource + Send> =
        Box::new(move |_now: Instant| -> Result<RawSample, InputFault> { Ok(*reader.lock().unwrap()) });

    let mut gpio = SimulatedGpio::new();
    let probe = gpio.clone();
    let monitor = EmergencyStopMonitor::open(Some(&mut gpio), &config.emergency);
    let actuator = DifferentialActuator::from_config(&mut gpio, config).unwrap();
    let control = ControlLoop::new(config, source, monitor, actuator, None).unwrap();
    (probe, shared, control)
}

#[test]
fn test_half_turn_scenario() {
    let (gpio, sample, mut control) = build(&plain_config());
    stick(&sample, 0.5, 0.5);

    let report = control.tick(Instant::now()).unwrap();
    let (left, right) = report.motors;
    assert_eq!(left.direction, Direction::Forward);
    assert_eq!(left.duty_cycle, 1.0);
    assert_eq!(right, MotorCommand::STOPPED);
    assert_eq!(gpio.duty(LEFT_EN), Some(1.0));
    assert_eq!(gpio.duty(RIGHT_EN), Some(0.0));
}

#[test]
fn test_stop_held_150ms_with_full_input() {
    let (gpio, sample, mut control) = build(&plain_config());
    stick(&sample, 1.0, 1.0);

    let t0 = Instant::now();
    gpio.set_level(STOP_PIN, Level::Low);

    // 10 ms ticks over the 150 ms press
    for i in 0..=15u64 {
        let at = ms(i * 10);
        let report = control.tick(t0 + at).unwrap();
        if at >= ms(100) {
            assert!(report.stop.active, "stop not active at {:?}", at);
            assert_eq!(report.motors, (MotorCommand::STOPPED, MotorCommand::STOPPED));
        } else {
            assert!(!report.stop.active, "stop active early at {:?}", at);
        }
    }
    assert_eq!(gpio.duty(LEFT_EN), Some(0.0));
    assert_eq!(gpio.duty(RIGHT_EN), Some(0.0));
}

#[test]
fn test_release_only_does_not_reset_with_reset_pin() {
    let mut config = plain_config();
    config.emergency.reset_pin = Some(RESET_PIN);
    let (gpio, sample, mut control) = build(&config);
    stick(&sample, 0.0, 0.5);

    let t0 = Instant::now();
    gpio.set_level(STOP_PIN, Level::Low);
    for i in 0..=15u64 {
        control.tick(t0 + ms(i * 10)).unwrap();
    }
    gpio.set_level(STOP_PIN, Level::High);
    for i in 16..=200u64 {
        let report = control.tick(t0 + ms(i * 10)).unwrap();
        assert!(report.arbitration.is_stop());
    }

    gpio.set_level(RESET_PIN, Level::Low);
    let mut resumed = false;
    for i in 201..=230u64 {
        let report = control.tick(t0 + ms(i * 10)).unwrap();
        if !report.stop.active {
            resumed = true;
            assert_eq!(report.motors.0.direction, Direction::Forward);
            break;
        }
    }
    assert!(resumed, "reset button never cleared the stop");
}

#[test]
fn test_fast_toggling_triggers_at_most_once() {
    let config = plain_config();
    let mut gpio = SimulatedGpio::new();
    let probe = gpio.clone();
    let mut monitor = EmergencyStopMonitor::open(Some(&mut gpio), &config.emergency);

    let t0 = Instant::now();
    let mut events = 0;
    // Toggling every 40 ms never satisfies a 100 ms window
    for i in 0..100u64 {
        let level = if (i / 4) % 2 == 0 { Level::Low } else { Level::High };
        probe.set_level(STOP_PIN, level);
        if monitor.sample(t0 + ms(i * 10)).is_some() {
            events += 1;
        }
    }
    assert_eq!(events, 0);

    probe.set_level(STOP_PIN, Level::High);
    assert!(monitor.sample(t0 + ms(1500)).is_none());

    // Held for debounce + epsilon: exactly one transition
    probe.set_level(STOP_PIN, Level::Low);
    let start = t0 + ms(2000);
    assert!(monitor.sample(start).is_none());
    assert!(monitor.sample(start + ms(50)).is_none());
    assert!(monitor.sample(start + ms(101)).is_some());
    assert!(monitor.sample(start + ms(150)).is_none());
}

#[test]
fn test_emergency_button_after_glitch_stops_motors() {
    let (gpio, sample, mut control) = build(&plain_config());
    let t0 = Instant::now();

    stick(&sample, 0.0, 1.0);
    assert_eq!(control.tick(t0).unwrap().motors.0.duty_cycle, 1.0);

    // One out-of-range report
    stick(&sample, f32::NAN, 1.0);
    assert_eq!(control.tick(t0 + ms(10)).unwrap().input.fault, Some(InputFault::OutOfRange));

    *sample.lock().unwrap() = RawSample {
        axis_y: 1.0,
        buttons: buttons::EMERGENCY,
        ..RawSample::default()
    };
    for i in 2..6u64 {
        let report = control.tick(t0 + ms(i * 10)).unwrap();
        assert_eq!(report.arbitration, Arbitration::Stop(StopReason::SoftwareStop));
        assert_eq!(report.motors, (MotorCommand::STOPPED, MotorCommand::STOPPED));
    }
    assert_eq!(gpio.duty(LEFT_EN), Some(0.0));
    assert_eq!(gpio.duty(RIGHT_EN), Some(0.0));
}

#[test]
fn test_soft_start_bound_through_loop() {
    let mut config = plain_config();
    config.drive.soft_start = true;
    config.drive.max_duty_step = 0.1;
    let (_gpio, sample, mut control) = build(&config);
    stick(&sample, 0.0, 1.0);

    let t0 = Instant::now();
    let mut previous = 0.0f32;
    for i in 0..15u64 {
        let (left, right) = control.tick(t0 + ms(i * 50)).unwrap().motors;
        assert_eq!(left, right);
        assert!(left.duty_cycle - previous <= 0.1 + 1e-6);
        previous = left.duty_cycle;
    }
    assert_eq!(previous, 1.0);
}

#[test]
fn test_stop_invariant_for_any_command() {
    let stop = StopStatus {
        active: true,
        ..StopStatus::default()
    };
    let config = plain_config();
    let values = [f32::NAN, f32::INFINITY, -f32::INFINITY, -3.0, -1.0, -0.01, 0.0, 0.5, 1.0, 7.5];

    let mut gpio = SimulatedGpio::new();
    let mut actuator = DifferentialActuator::from_config(&mut gpio, &config).unwrap();
    let mut arbiter = DriveArbiter::new(config.drive.autopilot_timeout());
    let now = Instant::now();

    for &s in &values {
        for &t in &values {
            let input = tracked_drive::controller::input::HumanInput {
                command: NormalizedCommand {
                    steering: s,
                    throttle: t,
                    ..NormalizedCommand::default()
                },
                ..Default::default()
            };
            let arbitration = arbiter.arbitrate(&input, None, &stop, now);
            assert_eq!(arbitration, Arbitration::Stop(StopReason::EmergencyStop));
            let motors = actuator.actuate(&arbitration).unwrap();
            assert_eq!(motors, (MotorCommand::STOPPED, MotorCommand::STOPPED));
        }
    }
}

#[test]
fn test_decomposition_symmetry() {
    let shaping = Shaping::from_config(&ControlConfig::default());
    for i in -10..=10 {
        for j in -10..=10 {
            let s = i as f32 / 10.0;
            let t = j as f32 / 10.0;
            let (l1, r1) = decompose(&NormalizedCommand::human(s, t), &shaping);
            let (l2, r2) = decompose(&NormalizedCommand::human(-s, t), &shaping);
            assert_eq!((l1, r1), (r2, l2), "s={} t={}", s, t);
        }
    }
}
