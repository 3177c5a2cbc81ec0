use std::sync::{Mutex, MutexGuard, PoisonError};

use embedded_hal::{delay::DelayNs, digital::OutputPin};
use log::{info, warn};

use crate::{
    state::SharedState,
    stepper::{MotorActuator, MotorError},
    thermometer::{OneWireThermometer, TemperatureReader},
    types::TemperatureUnit,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub sensed: bool,
    pub reading_changed: bool,
    pub burst: bool,
    pub motor_error: Option<MotorError>,
}

/// The sensing/actuation half of the cooperative loop.
///
/// One tick polls the thermometer when due and then runs at most one motion
/// burst. Both steps block; the shared state is locked only long enough to
/// store a reading or snapshot the motor latch, so a command written while a
/// burst runs is seen on the next tick.
pub struct ControlLoop<T, P, D> {
    reader: TemperatureReader<T>,
    actuator: MotorActuator<P, D>,
    sense_interval_ms: u64,
    last_sense_ms: Option<u64>,
}

impl<T, P, D> ControlLoop<T, P, D>
where
    T: OneWireThermometer,
    P: OutputPin,
    D: DelayNs,
{
    /// A `sense_interval_ms` of zero polls the sensor on every tick.
    pub fn new(
        reader: TemperatureReader<T>,
        actuator: MotorActuator<P, D>,
        sense_interval_ms: u64,
    ) -> Self {
        Self {
            reader,
            actuator,
            sense_interval_ms,
            last_sense_ms: None,
        }
    }

    pub fn sense_due(&self, now_ms: u64) -> bool {
        match self.last_sense_ms {
            None => true,
            Some(last) => now_ms.saturating_sub(last) >= self.sense_interval_ms,
        }
    }

    pub fn tick(&mut self, now_ms: u64, state: &Mutex<SharedState>) -> TickReport {
        let mut report = TickReport::default();

        if self.sense_due(now_ms) {
            self.last_sense_ms = Some(now_ms);
            let reading = self.reader.read_temperature();
            report.sensed = true;

            let mut shared = lock(state);
            report.reading_changed = shared.store_reading(reading);
            if report.reading_changed {
                info!(
                    "temperature updated: {} C / {} F",
                    shared.temperature_text(TemperatureUnit::Celsius),
                    shared.temperature_text(TemperatureUnit::Fahrenheit)
                );
            }
        }

        let command = lock(state).motor_command();
        match self.actuator.drive_motor(command) {
            Ok(ran) => report.burst = ran,
            Err(err) => {
                warn!("motion burst aborted: {err}");
                report.motor_error = Some(err);
            }
        }

        report
    }

    pub fn reader_mut(&mut self) -> &mut TemperatureReader<T> {
        &mut self.reader
    }

    pub fn actuator(&self) -> &MotorActuator<P, D> {
        &self.actuator
    }
}

/// Locks the shared state; a poisoned lock still holds usable plain data.
pub fn lock(state: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::{
        cell::Cell,
        rc::Rc,
        sync::{Arc, Mutex},
    };

    use embedded_hal::delay::DelayNs;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        config::{MotionConfig, MotionPattern},
        routes::{dispatch, Route},
        stepper::fakes::{ClockDelay, RecordingPin, WriteLog},
        thermometer::fakes::ScriptedThermometer,
        types::{MotorCommand, TemperatureReading},
    };

    fn motion() -> MotionConfig {
        MotionConfig {
            steps_per_revolution: 8,
            step_delay_ms: 2,
            direction_pause_ms: 10,
            pattern: MotionPattern::FullRevolutionSweep,
        }
    }

    fn control_loop(
        thermometer: ScriptedThermometer,
        interval_ms: u64,
    ) -> (
        ControlLoop<ScriptedThermometer, RecordingPin, ClockDelay>,
        WriteLog,
    ) {
        let log = WriteLog::default();
        let actuator =
            MotorActuator::new(RecordingPin::bank(&log), ClockDelay::default(), motion());
        let control =
            ControlLoop::new(TemperatureReader::new(thermometer), actuator, interval_ms);
        (control, log)
    }

    fn get(state: &Mutex<SharedState>, route: Route) -> String {
        dispatch(route, b"", &mut lock(state)).body.into_owned()
    }

    fn post(state: &Mutex<SharedState>, body: &str) {
        dispatch(Route::MotorCommand, body.as_bytes(), &mut lock(state));
    }

    #[test]
    fn first_tick_senses_then_waits_for_interval() {
        let (mut control, _) = control_loop(ScriptedThermometer::celsius(21.5), 30_000);
        let state = Mutex::new(SharedState::new());

        assert!(control.tick(0, &state).sensed);
        assert!(!control.tick(29_999, &state).sensed);
        assert!(control.tick(30_000, &state).sensed);
        assert!(!control.tick(45_000, &state).sensed);
        assert_eq!(control.reader_mut().device_mut().conversions, 2);
    }

    #[test]
    fn zero_interval_senses_every_tick() {
        let (mut control, _) = control_loop(ScriptedThermometer::celsius(18.0), 0);
        let state = Mutex::new(SharedState::new());

        for now_ms in [0, 0, 1, 2] {
            assert!(control.tick(now_ms, &state).sensed);
        }
        assert_eq!(control.reader_mut().device_mut().conversions, 4);
    }

    #[test]
    fn boot_with_valid_sensor_serves_both_units() {
        let (mut control, _) = control_loop(ScriptedThermometer::celsius(21.5), 30_000);
        let state = Mutex::new(SharedState::new());

        let report = control.tick(0, &state);

        assert!(report.reading_changed);
        assert_eq!(get(&state, Route::TemperatureC), "21.5");
        assert_eq!(get(&state, Route::TemperatureF), "70.7");
        assert_eq!(get(&state, Route::TemperatureF), "70.7");
    }

    #[test]
    fn disconnected_sensor_overwrites_previous_value() {
        let (mut control, _) = control_loop(
            ScriptedThermometer::new(&[(21.5, 70.7), (-127.0, -196.6)]),
            0,
        );
        let state = Mutex::new(SharedState::new());

        control.tick(0, &state);
        assert_eq!(get(&state, Route::TemperatureC), "21.5");

        let report = control.tick(1, &state);
        assert!(report.reading_changed);
        assert_eq!(lock(&state).reading(), TemperatureReading::UNAVAILABLE);
        assert_eq!(get(&state, Route::TemperatureC), "--");
        assert_eq!(get(&state, Route::TemperatureF), "--");
    }

    #[test]
    fn on_runs_one_burst_per_tick_and_off_stops_the_next() {
        let (mut control, log) = control_loop(ScriptedThermometer::celsius(20.0), 30_000);
        let state = Mutex::new(SharedState::new());

        assert!(!control.tick(0, &state).burst);
        assert!(log.borrow().is_empty());

        post(&state, "state=ON");
        let report = control.tick(1, &state);
        assert!(report.burst);
        assert_eq!(control.actuator().bursts(), 1);
        // 16 steps plus the release, four coils each.
        assert_eq!(log.borrow().len(), 17 * 4);

        post(&state, "state=OFF");
        log.borrow_mut().clear();
        assert!(!control.tick(2, &state).burst);
        assert!(log.borrow().is_empty());
        assert_eq!(control.actuator().bursts(), 1);
    }

    #[test]
    fn unrecognized_command_keeps_motor_running() {
        let (mut control, _) = control_loop(ScriptedThermometer::celsius(20.0), 30_000);
        let state = Mutex::new(SharedState::new());

        post(&state, "state=ON");
        post(&state, "state=MAYBE");

        assert!(control.tick(0, &state).burst);
        assert!(control.tick(1, &state).burst);
    }

    #[test]
    fn coil_failure_is_reported_not_fatal() {
        let log = WriteLog::default();
        let actuator = MotorActuator::new(
            RecordingPin::failing_bank(&log, 0),
            ClockDelay::default(),
            motion(),
        );
        let mut control = ControlLoop::new(
            TemperatureReader::new(ScriptedThermometer::celsius(20.0)),
            actuator,
            30_000,
        );
        let state = Mutex::new(SharedState::new());
        post(&state, "ON");

        let report = control.tick(0, &state);

        assert!(report.sensed);
        assert!(!report.burst);
        assert!(report.motor_error.is_some());
        assert_eq!(get(&state, Route::TemperatureC), "20.0");
    }

    /// Delay that writes `OFF` into the shared state on its first call, the
    /// way an HTTP handler would while a burst is running.
    struct InterruptingDelay {
        state: Arc<Mutex<SharedState>>,
        sent: Rc<Cell<bool>>,
        lock_free: Rc<Cell<bool>>,
    }

    impl DelayNs for InterruptingDelay {
        fn delay_ns(&mut self, _ns: u32) {
            match self.state.try_lock() {
                Ok(mut shared) => {
                    if !self.sent.get() {
                        shared.set_motor_command(MotorCommand::Off);
                        self.sent.set(true);
                    }
                }
                Err(_) => self.lock_free.set(false),
            }
        }
    }

    #[test]
    fn off_during_burst_applies_on_next_tick() {
        let state = Arc::new(Mutex::new(SharedState::new()));
        let sent = Rc::new(Cell::new(false));
        let lock_free = Rc::new(Cell::new(true));
        let log = WriteLog::default();
        let delay = InterruptingDelay {
            state: state.clone(),
            sent: sent.clone(),
            lock_free: lock_free.clone(),
        };
        let actuator = MotorActuator::new(RecordingPin::bank(&log), delay, motion());
        let mut control = ControlLoop::new(
            TemperatureReader::new(ScriptedThermometer::celsius(20.0)),
            actuator,
            30_000,
        );

        post(&state, "state=ON");
        let report = control.tick(0, &state);

        assert!(sent.get());
        assert!(lock_free.get());
        assert!(report.burst);
        assert_eq!(log.borrow().len(), 17 * 4);
        assert_eq!(lock(&state).motor_command(), MotorCommand::Off);
        assert!(!control.tick(1, &state).burst);
    }
}
