// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use imu_agent_elements::imu_trait::{AccelData, GyroData, SensorSample};

pub const INIT_OK_LINE: &str = "Found a MPU-6050 sensor";
pub const INIT_FAILED_LINE: &str = "MPU-6050 sensor init failed";

fn axes_line(label: &str, unit: &str, x: f64, y: f64, z: f64) -> String {
    format!("{} X: {:.1} {}, Y: {:.1} {}, Z: {:.1} {}",
            label, x, unit, y, unit, z, unit)
}

pub fn accel_line(accel: &AccelData) -> String {
    axes_line("Accelerometer", "m/s^2", accel.x, accel.y, accel.z)
}

pub fn gyro_line(gyro: &GyroData) -> String {
    axes_line("Gyroscope", "rps", gyro.x, gyro.y, gyro.z)
}

// The pair of lines written for each sample. Temperature is not reported.
pub fn sample_lines(sample: &SensorSample) -> [String; 2] {
    [accel_line(&sample.accel), gyro_line(&sample.gyro)]
}

// mod tests.
