// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use canonical_error::{CanonicalError, failed_precondition_error,
                      unavailable_error};
use log::{debug, info, warn};

use imu_agent_elements::imu_trait::{AccelData, GyroData, InertialSensor,
                                    SensorSample};

// Recordings carry no temperature column.
const REPLAY_TEMPERATURE: f64 = 25.0;

/// Replays readings recorded in a CSV file, one row per sample, starting
/// over from the first row after the last one has been reported.
///
/// Each row holds the accelerometer `x,y,z` values, optionally followed by
/// the gyro `x,y,z` values (zero when absent). A header row such as `x,y,z`
/// on the first line is skipped, as are malformed rows further down. Values
/// are reported as recorded, without unit conversion.
pub struct ReplaySensor {
    path: PathBuf,
    rows: Vec<(AccelData, GyroData)>,
    next: usize,
}

impl ReplaySensor {
    /// The file is not read until initialize() is called.
    pub fn new(path: impl AsRef<Path>) -> Self {
        ReplaySensor{path: path.as_ref().to_path_buf(), rows: Vec::new(), next: 0}
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

fn parse_row(line: &str) -> Result<(AccelData, GyroData), String> {
    let values = line.split(',')
        .map(|field| field.trim().parse::<f64>()
             .map_err(|e| format!("bad value {:?}: {}", field, e)))
        .collect::<Result<Vec<f64>, String>>()?;
    match values[..] {
        [ax, ay, az] => Ok((AccelData{x: ax, y: ay, z: az}, GyroData::default())),
        [ax, ay, az, gx, gy, gz] => Ok((AccelData{x: ax, y: ay, z: az},
                                        GyroData{x: gx, y: gy, z: gz})),
        _ => Err(format!("expected 3 or 6 values, got {}", values.len())),
    }
}

fn parse_recording(text: &str) -> Vec<(AccelData, GyroData)> {
    let mut rows = Vec::new();
    for (index, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match parse_row(line) {
            Ok(row) => rows.push(row),
            Err(_) if index == 0 => debug!("Skipping header {:?}", line),
            Err(e) => warn!("Skipping row {}: {}", index + 1, e),
        }
    }
    rows
}

impl InertialSensor for ReplaySensor {
    fn initialize(&mut self) -> Result<(), CanonicalError> {
        let text = fs::read_to_string(&self.path)
            .map_err(|e| unavailable_error(
                &format!("Could not read recording {:?}: {}", self.path, e)))?;
        let rows = parse_recording(&text);
        if rows.is_empty() {
            return Err(failed_precondition_error(
                &format!("Recording {:?} has no samples", self.path)));
        }
        info!("Replaying {} samples from {:?}", rows.len(), self.path);
        self.rows = rows;
        self.next = 0;
        Ok(())
    }

    fn read_sample(&mut self) -> Result<SensorSample, CanonicalError> {
        if self.rows.is_empty() {
            return Err(failed_precondition_error(
                "Replay read before successful initialization"));
        }
        if self.next >= self.rows.len() {
            debug!("End of recording, rewinding");
            self.next = 0;
        }
        let (accel, gyro) = self.rows[self.next];
        self.next += 1;
        Ok(SensorSample {
            timestamp: SystemTime::now(),
            accel,
            gyro,
            temperature: REPLAY_TEMPERATURE,
        })
    }

    fn model(&self) -> String {
        "MPU-6050".to_string()
    }
}

#[cfg(test)]
mod tests {
    use canonical_error::CanonicalErrorCode;
    use super::*;

    fn recording_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(
            format!("imu_agent_{}_{}.csv", name, std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_parse_recording() {
        let rows = parse_recording("x,y,z\n\
                                    1.0,0.0,9.8\n\
                                    \n\
                                    2.5, -1.0, 9.7, 0.1, 0.2, 0.3\n\
                                    1.0,2.0\n\
                                    3.0,bogus,9.8\n");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, AccelData{x: 1.0, y: 0.0, z: 9.8});
        assert_eq!(rows[0].1, GyroData::default());
        assert_eq!(rows[1].0, AccelData{x: 2.5, y: -1.0, z: 9.7});
        assert_eq!(rows[1].1, GyroData{x: 0.1, y: 0.2, z: 0.3});

        // No header.
        assert_eq!(parse_recording("1,2,3\n4,5,6").len(), 2);
    }

    #[test]
    fn test_replay_rewinds() {
        let path = recording_file("rewind", "x,y,z\n1.0,0.0,9.8\n2.0,0.0,9.8\n");
        let mut sensor = ReplaySensor::new(&path);
        assert!(sensor.read_sample().is_err());
        sensor.initialize().unwrap();
        assert_eq!(sensor.row_count(), 2);

        let xs: Vec<f64> = (0..5)
            .map(|_| sensor.read_sample().unwrap().accel.x)
            .collect();
        assert_eq!(xs, vec![1.0, 2.0, 1.0, 2.0, 1.0]);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_recording() {
        let mut sensor = ReplaySensor::new("/nonexistent/accelerometer.csv");
        let err = sensor.initialize().unwrap_err();
        assert!(matches!(err.code, CanonicalErrorCode::Unavailable));
        assert!(sensor.read_sample().is_err());
    }

    #[test]
    fn test_empty_recording() {
        let path = recording_file("empty", "x,y,z\n");
        let mut sensor = ReplaySensor::new(&path);
        let err = sensor.initialize().unwrap_err();
        assert!(matches!(err.code, CanonicalErrorCode::FailedPrecondition));
        fs::remove_file(&path).unwrap();
    }
}  // mod tests.
