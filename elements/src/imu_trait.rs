// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::time::SystemTime;

use canonical_error::CanonicalError;

// Acceleration data from IMU.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AccelData {
    // m/s².
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

// Angular velocity data from IMU.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GyroData {
    // Radians/second.
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

// One atomic set of readings obtained from a single device transaction.
#[derive(Debug, Clone, Copy)]
pub struct SensorSample {
    pub timestamp: SystemTime,
    pub accel: AccelData,
    pub gyro: GyroData,

    // Die temperature, degrees Celsius.
    pub temperature: f64,
}

impl SensorSample {
    // Compares readings only, ignoring the timestamp. `tolerance` is applied
    // to each field independently.
    pub fn readings_match(&self, other: &SensorSample, tolerance: f64) -> bool {
        let close = |a: f64, b: f64| (a - b).abs() <= tolerance;
        close(self.accel.x, other.accel.x) &&
            close(self.accel.y, other.accel.y) &&
            close(self.accel.z, other.accel.z) &&
            close(self.gyro.x, other.gyro.x) &&
            close(self.gyro.y, other.gyro.y) &&
            close(self.gyro.z, other.gyro.z) &&
            close(self.temperature, other.temperature)
    }
}

pub trait InertialSensor {
    // Establishes communication with the device and configures it. An error
    // means the device is absent or is not the expected model; the caller
    // must not call read_sample() afterwards.
    fn initialize(&mut self) -> Result<(), CanonicalError>;

    // Performs one blocking transaction with the device. Returns
    // failed_precondition if initialize() has not succeeded, and
    // deadline_exceeded or internal errors for bus problems.
    fn read_sample(&mut self) -> Result<SensorSample, CanonicalError>;

    // Returns the IMU's model.
    fn model(&self) -> String;
}

// mod tests.
