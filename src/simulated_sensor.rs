// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::SystemTime;

use canonical_error::{CanonicalError, failed_precondition_error,
                      unavailable_error};
use log::info;
use rand::Rng;

use imu_agent_elements::imu_trait::{AccelData, GyroData, InertialSensor,
                                    SensorSample};

// Largest accepted noise amplitude. Far beyond anything a real device
// produces, and small enough that the sampling range stays finite.
pub const MAX_NOISE: f64 = 1.0e6;

/// Stand-in for a real IMU, used when no hardware is attached. Returns a
/// fixed reading, optionally perturbed by uniform noise of +/- `noise` on
/// every field.
pub struct SimulatedSensor {
    accel: AccelData,
    gyro: GyroData,
    temperature: f64,
    noise: f64,

    // When set, initialize() reports an absent device.
    fail_init: bool,
    ready: bool,
}

impl SimulatedSensor {
    pub fn new(accel: AccelData, gyro: GyroData, temperature: f64) -> Self {
        SimulatedSensor{accel, gyro, temperature, noise: 0.0,
                        fail_init: false, ready: false}
    }

    // A device at rest, level, at room temperature.
    pub fn at_rest() -> Self {
        Self::new(AccelData{x: 0.0, y: 0.0, z: 9.8},
                  GyroData{x: 0.0, y: 0.0, z: 0.0},
                  25.0)
    }

    /// Amplitudes above MAX_NOISE are clamped; NaN means no noise.
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = if noise.is_nan() { 0.0 } else { noise.abs().min(MAX_NOISE) };
        self
    }

    pub fn with_init_failure(mut self) -> Self {
        self.fail_init = true;
        self
    }

    fn perturb(&self, rng: &mut impl Rng, value: f64) -> f64 {
        if self.noise == 0.0 {
            return value;
        }
        value + rng.gen_range(-self.noise..=self.noise)
    }
}

impl InertialSensor for SimulatedSensor {
    fn initialize(&mut self) -> Result<(), CanonicalError> {
        if self.fail_init {
            return Err(unavailable_error("Simulated device did not respond"));
        }
        self.ready = true;
        info!("Simulated IMU initialized");
        Ok(())
    }

    fn read_sample(&mut self) -> Result<SensorSample, CanonicalError> {
        if !self.ready {
            return Err(failed_precondition_error(
                "Simulated IMU read before successful initialization"));
        }
        let mut rng = rand::thread_rng();
        Ok(SensorSample {
            timestamp: SystemTime::now(),
            accel: AccelData {
                x: self.perturb(&mut rng, self.accel.x),
                y: self.perturb(&mut rng, self.accel.y),
                z: self.perturb(&mut rng, self.accel.z),
            },
            gyro: GyroData {
                x: self.perturb(&mut rng, self.gyro.x),
                y: self.perturb(&mut rng, self.gyro.y),
                z: self.perturb(&mut rng, self.gyro.z),
            },
            temperature: self.perturb(&mut rng, self.temperature),
        })
    }

    fn model(&self) -> String {
        "MPU-6050".to_string()
    }
}

// mod tests.
