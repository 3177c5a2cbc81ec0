use embedded_hal::{
    delay::DelayNs,
    digital::{Error as _, ErrorKind, OutputPin, PinState},
};
use log::{debug, info};
use thiserror::Error;

use crate::{
    config::{MotionConfig, MotionPattern},
    types::MotorCommand,
};

/// Four-wire full-step sequence, one row per phase, columns in coil order.
const FULL_STEP_SEQUENCE: [[bool; 4]; 4] = [
    [true, false, true, false],
    [false, true, true, false],
    [false, true, false, true],
    [true, false, false, true],
];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MotorError {
    #[error("failed to drive coil {coil}: {kind:?}")]
    CoilWrite { coil: usize, kind: ErrorKind },
}

/// Unipolar stepper on four driver inputs, stepped open loop with a fixed
/// delay between steps.
pub struct UnipolarStepper<P, D> {
    coils: [P; 4],
    delay: D,
    step_delay_us: u32,
    phase: usize,
}

impl<P: OutputPin, D: DelayNs> UnipolarStepper<P, D> {
    /// `coils` must be given in drive order (IN1, IN3, IN2, IN4 on the usual
    /// ULN2003 board).
    pub fn new(coils: [P; 4], delay: D, step_delay_ms: u32) -> Self {
        Self {
            coils,
            delay,
            step_delay_us: step_delay_ms.max(1).saturating_mul(1_000),
            phase: 0,
        }
    }

    /// Moves `steps` steps; positive is forward. Blocks for the whole move.
    pub fn step(&mut self, steps: i32) -> Result<(), MotorError> {
        let forward = steps > 0;
        for _ in 0..steps.unsigned_abs() {
            self.phase = if forward {
                (self.phase + 1) % FULL_STEP_SEQUENCE.len()
            } else {
                (self.phase + FULL_STEP_SEQUENCE.len() - 1) % FULL_STEP_SEQUENCE.len()
            };
            self.energize(FULL_STEP_SEQUENCE[self.phase])?;
            self.delay.delay_us(self.step_delay_us);
        }
        Ok(())
    }

    /// De-energizes every coil.
    pub fn release(&mut self) -> Result<(), MotorError> {
        self.energize([false; 4])
    }

    pub fn pause_ms(&mut self, ms: u32) {
        self.delay.delay_ms(ms);
    }

    fn energize(&mut self, levels: [bool; 4]) -> Result<(), MotorError> {
        for (coil, (pin, level)) in self.coils.iter_mut().zip(levels).enumerate() {
            pin.set_state(PinState::from(level))
                .map_err(|err| MotorError::CoilWrite {
                    coil,
                    kind: err.kind(),
                })?;
        }
        Ok(())
    }
}

/// Turns the motor latch into motion bursts.
pub struct MotorActuator<P, D> {
    stepper: UnipolarStepper<P, D>,
    config: MotionConfig,
    next_forward: bool,
    bursts: u64,
}

impl<P: OutputPin, D: DelayNs> MotorActuator<P, D> {
    pub fn new(coils: [P; 4], delay: D, mut config: MotionConfig) -> Self {
        config.sanitize();
        Self {
            stepper: UnipolarStepper::new(coils, delay, config.step_delay_ms),
            config,
            next_forward: true,
            bursts: 0,
        }
    }

    /// Runs one burst when `command` is on and returns whether it did. With
    /// the latch off no pin is touched.
    pub fn drive_motor(&mut self, command: MotorCommand) -> Result<bool, MotorError> {
        if !command.is_on() {
            return Ok(false);
        }

        let result = self.run_burst();
        let released = self.stepper.release();
        result?;
        released?;

        self.bursts = self.bursts.saturating_add(1);
        debug!("motion burst {} complete", self.bursts);
        Ok(true)
    }

    pub fn bursts(&self) -> u64 {
        self.bursts
    }

    fn run_burst(&mut self) -> Result<(), MotorError> {
        let revolution = i32::try_from(self.config.steps_per_revolution).unwrap_or(i32::MAX);

        match self.config.pattern {
            MotionPattern::FullRevolutionSweep => {
                info!("motor: one revolution forward, then back");
                self.stepper.step(revolution)?;
                self.stepper.pause_ms(self.config.direction_pause_ms);
                self.stepper.step(-revolution)?;
            }
            MotionPattern::AlternatingQuarterTurn => {
                let quarter = revolution / 4;
                let steps = if self.next_forward { quarter } else { -quarter };
                info!("motor: quarter turn ({steps} steps)");
                self.next_forward = !self.next_forward;
                self.stepper.step(steps)?;
                self.stepper.pause_ms(self.config.direction_pause_ms);
            }
        }
        Ok(())
    }
}
