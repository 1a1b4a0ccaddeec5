//! Appliance wiring: sensors, alarms and the fire detector between them
//!
//! Real drivers (camera capture, thermal sensor, siren) live outside this
//! crate and implement the traits below. Sensors and alarms are shared
//! between a driver thread running `run()` and the thread that eventually
//! calls `close()`, so every method takes `&self`.

use crate::classifier::{VisualClassifier, Verdict};
use crate::error::FlameResult;
use crate::tensor::Tensor;
use log::{debug, info, warn};
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Callback receiving temperatures in °C
pub type CelsiusReceiver = Arc<dyn Fn(f32) + Send + Sync>;
/// Callback receiving captured RGB8 frames
pub type FrameReceiver = Arc<dyn Fn(Tensor<u8>) + Send + Sync>;

/// Readings replayed by [`MockTemperatureSensor`]
pub const MOCK_READINGS: [f32; 5] = [20.0, 22.0, 316.0, 18.0, 28.0];
/// Default temperature above which the detector raises the alarm
pub const DEFAULT_FIRE_CELSIUS: f32 = 200.0;
/// Default sampling / polling period of the reference sensor and alarm
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(500);

pub trait Sensor: Send + Sync {
    /// Produce readings until [`Sensor::close`] is called
    fn run(&self);
    fn close(&self);
}

pub trait TemperatureSensor: Sensor {
    fn set_celsius_receiver(&self, receiver: CelsiusReceiver);
}

pub trait CameraSensor: Sensor {
    fn set_frame_receiver(&self, receiver: FrameReceiver);
}

pub trait Alarm: Send + Sync {
    /// Deliver fire reports until [`Alarm::close`] is called
    fn run(&self);
    fn report_fire(&self);
    fn close(&self);
}

// =============================================================================
// Mock temperature sensor
// =============================================================================

#[derive(Default)]
struct SensorState {
    closing: bool,
    receiver: Option<CelsiusReceiver>,
}

/// Cycles through [`MOCK_READINGS`], one reading per period
pub struct MockTemperatureSensor {
    period: Duration,
    state: Mutex<SensorState>,
    wake: Condvar,
}

impl Default for MockTemperatureSensor {
    fn default() -> Self {
        Self::with_period(DEFAULT_PERIOD)
    }
}

impl MockTemperatureSensor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_period(period: Duration) -> Self {
        Self {
            period,
            state: Mutex::new(SensorState::default()),
            wake: Condvar::new(),
        }
    }

    /// Sleep one period; `false` if closed meanwhile
    fn sleep_period(&self, state: &mut MutexGuard<'_, SensorState>) -> bool {
        let deadline = Instant::now() + self.period;
        while !state.closing && Instant::now() < deadline {
            self.wake.wait_until(state, deadline);
        }
        !state.closing
    }
}

impl Sensor for MockTemperatureSensor {
    fn run(&self) {
        let mut readings = MOCK_READINGS.iter().copied().cycle();
        let mut state = self.state.lock();
        while self.sleep_period(&mut state) {
            let Some(celsius) = readings.next() else { break };
            if let Some(receiver) = state.receiver.clone() {
                MutexGuard::unlocked(&mut state, || receiver(celsius));
            }
        }
        debug!("mock temperature sensor stopped");
    }

    fn close(&self) {
        self.state.lock().closing = true;
        self.wake.notify_all();
    }
}

impl TemperatureSensor for MockTemperatureSensor {
    fn set_celsius_receiver(&self, receiver: CelsiusReceiver) {
        self.state.lock().receiver = Some(receiver);
    }
}

// =============================================================================
// Log alarm
// =============================================================================

#[derive(Default)]
struct AlarmState {
    on_fire: bool,
    closing: bool,
    delivered: usize,
}

/// Alarm that emits a `warn!` fire notice per report
pub struct LogAlarm {
    poll: Duration,
    state: Mutex<AlarmState>,
    wake: Condvar,
}

impl Default for LogAlarm {
    fn default() -> Self {
        Self::with_poll(DEFAULT_PERIOD)
    }
}

impl LogAlarm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll(poll: Duration) -> Self {
        Self {
            poll,
            state: Mutex::new(AlarmState::default()),
            wake: Condvar::new(),
        }
    }

    /// Fire notices emitted so far
    pub fn delivered(&self) -> usize {
        self.state.lock().delivered
    }
}

impl Alarm for LogAlarm {
    fn run(&self) {
        let mut state = self.state.lock();
        while !state.closing {
            if !state.on_fire {
                self.wake.wait_for(&mut state, self.poll);
            }
            if state.on_fire {
                state.on_fire = false;
                state.delivered += 1;
                warn!("Oh no, the house is on fire!! Do something NOW!!");
            }
        }
        debug!("log alarm stopped");
    }

    fn report_fire(&self) {
        self.state.lock().on_fire = true;
        self.wake.notify_one();
    }

    fn close(&self) {
        self.state.lock().closing = true;
        self.wake.notify_all();
    }
}

// =============================================================================
// Fire detector
// =============================================================================

/// Turns classifier scores and temperatures into alarm reports
pub struct FireDetector<C> {
    classifier: Mutex<C>,
    alarm: Arc<dyn Alarm>,
    threshold_celsius: f32,
}

impl<C: VisualClassifier> FireDetector<C> {
    pub fn new(classifier: C, alarm: Arc<dyn Alarm>) -> Self {
        Self {
            classifier: Mutex::new(classifier),
            alarm,
            threshold_celsius: DEFAULT_FIRE_CELSIUS,
        }
    }

    pub fn with_threshold(mut self, celsius: f32) -> Self {
        self.threshold_celsius = celsius;
        self
    }

    pub fn threshold_celsius(&self) -> f32 {
        self.threshold_celsius
    }

    /// Classify one frame, reporting fire on a [`Verdict::Fire`]
    pub fn on_frame(&self, frame: &Tensor<u8>) -> FlameResult<Verdict> {
        let score = self.classifier.lock().process(frame)?;
        let verdict = Verdict::from_score(score);
        info!("score {score:.4} ({verdict})");
        if verdict.is_fire() {
            self.alarm.report_fire();
        }
        Ok(verdict)
    }

    /// Returns whether the reading raised the alarm
    pub fn on_celsius(&self, celsius: f32) -> bool {
        info!("temperature {celsius:.1} C");
        let hot = celsius > self.threshold_celsius;
        if hot {
            self.alarm.report_fire();
        }
        hot
    }
}

impl<C: VisualClassifier + 'static> FireDetector<C> {
    /// Receiver to hand to a [`TemperatureSensor`]
    pub fn celsius_receiver(self: &Arc<Self>) -> CelsiusReceiver {
        let detector = Arc::clone(self);
        Arc::new(move |celsius: f32| {
            detector.on_celsius(celsius);
        })
    }

    /// Receiver to hand to a [`CameraSensor`]; classification errors are logged
    pub fn frame_receiver(self: &Arc<Self>) -> FrameReceiver {
        let detector = Arc::clone(self);
        Arc::new(move |frame: Tensor<u8>| {
            if let Err(e) = detector.on_frame(&frame) {
                warn!("frame dropped: {e}");
            }
        })
    }
}
