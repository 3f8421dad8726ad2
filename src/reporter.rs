// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::sleep;
use std::time::{Duration, Instant};

use canonical_error::{CanonicalError, failed_precondition_error,
                      internal_error};
use log::{debug, error, info, warn};

use imu_agent_elements::imu_trait::InertialSensor;
use crate::report_format::{INIT_FAILED_LINE, INIT_OK_LINE, sample_lines};

// Longest sleep between checks of the stop flag while pacing.
const STOP_POLL_SLICE: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReporterState {
    // start() not yet called.
    Uninitialized,
    // Sensor initialized; samples are being reported.
    Ready,
    // Sensor initialization failed. Terminal.
    Halted,
}

// How a run() that did not fail came to an end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Stopped,
    SampleLimitReached,
}

#[derive(Debug, Clone, Copy)]
pub struct ReporterSettings {
    // Time from the start of one iteration to the start of the next. Zero
    // means poll as fast as the sensor answers.
    pub interval: Duration,

    // run() returns after this many samples have been reported.
    pub sample_limit: Option<u64>,

    // run() fails once more than this many reads in a row have failed. Zero
    // disables the limit.
    pub max_read_failures: u32,
}

impl Default for ReporterSettings {
    fn default() -> Self {
        ReporterSettings {
            interval: Duration::ZERO,
            sample_limit: None,
            max_read_failures: 10,
        }
    }
}

/// Polls an inertial sensor and writes each sample as a pair of text lines.
///
/// The reporter owns both the sensor and the output stream. start() writes
/// exactly one diagnostic line: the success line before any sample lines, or
/// the failure line after which nothing else is ever written.
pub struct Reporter<S: InertialSensor, W: Write> {
    sensor: S,
    out: W,
    settings: ReporterSettings,
    state: ReporterState,

    samples_reported: u64,
    consecutive_failures: u32,
}

impl<S: InertialSensor, W: Write> Reporter<S, W> {
    pub fn new(sensor: S, out: W, settings: ReporterSettings) -> Self {
        Reporter {
            sensor,
            out,
            settings,
            state: ReporterState::Uninitialized,
            samples_reported: 0,
            consecutive_failures: 0,
        }
    }

    pub fn state(&self) -> ReporterState {
        self.state
    }

    pub fn samples_reported(&self) -> u64 {
        self.samples_reported
    }

    /// Initializes the sensor and reports the result on the output stream.
    /// An initialization failure moves the reporter to Halted and is
    /// returned to the caller.
    pub fn start(&mut self) -> Result<(), CanonicalError> {
        if self.state != ReporterState::Uninitialized {
            return Err(failed_precondition_error(
                &format!("Reporter already started ({:?})", self.state)));
        }
        match self.sensor.initialize() {
            Ok(()) => {
                info!("Found {} sensor", self.sensor.model());
                self.state = ReporterState::Ready;
                self.write_lines(&[INIT_OK_LINE])
            },
            Err(e) => {
                error!("{} init failed: {:?}", self.sensor.model(), e);
                self.state = ReporterState::Halted;
                // The init error takes precedence over a failure to report it.
                if let Err(write_err) = self.write_lines(&[INIT_FAILED_LINE]) {
                    error!("Could not write diagnostic: {:?}", write_err);
                }
                Err(e)
            },
        }
    }

    /// Performs one iteration: reads a sample and writes its lines. Returns
    /// false if the read failed but the failure is still within tolerance;
    /// no output is produced for such an iteration.
    pub fn step(&mut self) -> Result<bool, CanonicalError> {
        match self.state {
            ReporterState::Ready => (),
            ReporterState::Uninitialized => {
                return Err(failed_precondition_error("Reporter not started"));
            },
            ReporterState::Halted => {
                return Err(failed_precondition_error(
                    "Reporter halted after sensor init failure"));
            },
        }
        let sample = match self.sensor.read_sample() {
            Ok(sample) => sample,
            Err(e) => {
                self.consecutive_failures += 1;
                warn!("Sample read failed ({} in a row): {:?}",
                      self.consecutive_failures, e);
                let limit = self.settings.max_read_failures;
                if limit > 0 && self.consecutive_failures > limit {
                    error!("Giving up after {} consecutive read failures",
                           self.consecutive_failures);
                    return Err(e);
                }
                return Ok(false);
            },
        };
        self.consecutive_failures = 0;
        debug!("Sample: {:?}", sample);
        let [accel, gyro] = sample_lines(&sample);
        self.write_lines(&[accel.as_str(), gyro.as_str()])?;
        self.samples_reported += 1;
        Ok(true)
    }

    /// Starts the reporter if needed, then reports samples until `stop` is
    /// set or the sample limit is reached. Returns an error immediately if
    /// the reporter is, or becomes, Halted.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<RunOutcome, CanonicalError> {
        if self.state == ReporterState::Uninitialized {
            self.start()?;
        }
        if self.state == ReporterState::Halted {
            return Err(failed_precondition_error(
                "Reporter halted after sensor init failure"));
        }
        loop {
            if stop.load(Ordering::Relaxed) {
                info!("Stop requested after {} samples", self.samples_reported);
                return Ok(RunOutcome::Stopped);
            }
            if let Some(limit) = self.settings.sample_limit {
                if self.samples_reported >= limit {
                    info!("Reported {} samples", self.samples_reported);
                    return Ok(RunOutcome::SampleLimitReached);
                }
            }
            let iteration_start = Instant::now();
            self.step()?;
            self.pace(iteration_start, stop);
        }
    }

    // Sleeps out the remainder of the interval, waking early on stop. An
    // interval too long to represent as a deadline lasts until stop.
    fn pace(&self, iteration_start: Instant, stop: &AtomicBool) {
        let deadline = iteration_start.checked_add(self.settings.interval);
        loop {
            if stop.load(Ordering::Relaxed) {
                return;
            }
            let nap = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return;
                    }
                    std::cmp::min(deadline - now, STOP_POLL_SLICE)
                },
                None => STOP_POLL_SLICE,
            };
            sleep(nap);
        }
    }

    fn write_lines(&mut self, lines: &[&str]) -> Result<(), CanonicalError> {
        for line in lines {
            writeln!(self.out, "{}", line)
                .map_err(|e| internal_error(
                    &format!("Failed to write output: {:?}", e)))?;
        }
        self.out.flush()
            .map_err(|e| internal_error(
                &format!("Failed to flush output: {:?}", e)))
    }
}

// mod tests.
