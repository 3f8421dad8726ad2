// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::thread::sleep;
use std::time::{Duration, SystemTime};

use canonical_error::{CanonicalError,
                      failed_precondition_error, internal_error,
                      invalid_argument_error, unavailable_error};
use log::{debug, info};

use imu_agent_elements::imu_trait::{AccelData, GyroData, InertialSensor,
                                    SensorSample};
use crate::i2c_bus::RegisterBus;

// MPU-6050 constants.
pub const MPU6050_ADDR: u16 = 0x68;
pub const MPU6050_ALT_ADDR: u16 = 0x69;  // AD0 pulled high.
const WHO_AM_I_REG: u8 = 0x75;
const PWR_MGMT_1_REG: u8 = 0x6B;
const SMPLRT_DIV: u8 = 0x19;
const CONFIG: u8 = 0x1A;
const GYRO_CONFIG: u8 = 0x1B;
const ACCEL_CONFIG: u8 = 0x1C;
const EXPECTED_WHO_AM_I: u8 = 0x68;

// Start of the 14 byte burst: accel X/Y/Z, temperature, gyro X/Y/Z, each
// 16 bits big-endian.
const ACCEL_XOUT_H: u8 = 0x3B;
const BURST_LEN: usize = 14;

const G: f64 = 9.80665;  // Standard gravity in m/s².

// Temperature conversion from the register map document.
const TEMP_SCALE_FACTOR: f64 = 340.0;
const TEMP_OFFSET: f64 = 36.53;

/// Accelerometer full scale range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccelRange {
    G2,
    G4,
    G8,
    G16,
}

impl AccelRange {
    pub fn from_g(g: u32) -> Result<Self, CanonicalError> {
        match g {
            2 => Ok(AccelRange::G2),
            4 => Ok(AccelRange::G4),
            8 => Ok(AccelRange::G8),
            16 => Ok(AccelRange::G16),
            _ => Err(invalid_argument_error(
                &format!("Unsupported accelerometer range {}g", g))),
        }
    }

    fn register_value(&self) -> u8 {
        match self {
            AccelRange::G2 => 0x00,
            AccelRange::G4 => 0x08,
            AccelRange::G8 => 0x10,
            AccelRange::G16 => 0x18,
        }
    }

    // Raw counts per g.
    fn scale_factor(&self) -> f64 {
        match self {
            AccelRange::G2 => 16384.0,
            AccelRange::G4 => 8192.0,
            AccelRange::G8 => 4096.0,
            AccelRange::G16 => 2048.0,
        }
    }
}

/// Gyroscope full scale range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GyroRange {
    Dps250,
    Dps500,
    Dps1000,
    Dps2000,
}

impl GyroRange {
    pub fn from_dps(dps: u32) -> Result<Self, CanonicalError> {
        match dps {
            250 => Ok(GyroRange::Dps250),
            500 => Ok(GyroRange::Dps500),
            1000 => Ok(GyroRange::Dps1000),
            2000 => Ok(GyroRange::Dps2000),
            _ => Err(invalid_argument_error(
                &format!("Unsupported gyro range {}°/s", dps))),
        }
    }

    fn register_value(&self) -> u8 {
        match self {
            GyroRange::Dps250 => 0x00,
            GyroRange::Dps500 => 0x08,
            GyroRange::Dps1000 => 0x10,
            GyroRange::Dps2000 => 0x18,
        }
    }

    // Raw counts per degree/second.
    fn scale_factor(&self) -> f64 {
        match self {
            GyroRange::Dps250 => 131.0,
            GyroRange::Dps500 => 65.5,
            GyroRange::Dps1000 => 32.8,
            GyroRange::Dps2000 => 16.4,
        }
    }
}

/// Digital low pass filter bandwidth (accelerometer side).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterBandwidth {
    Hz260,
    Hz184,
    Hz94,
    Hz44,
    Hz21,
    Hz10,
    Hz5,
}

impl FilterBandwidth {
    pub fn from_hz(hz: u32) -> Result<Self, CanonicalError> {
        match hz {
            260 => Ok(FilterBandwidth::Hz260),
            184 => Ok(FilterBandwidth::Hz184),
            94 => Ok(FilterBandwidth::Hz94),
            44 => Ok(FilterBandwidth::Hz44),
            21 => Ok(FilterBandwidth::Hz21),
            10 => Ok(FilterBandwidth::Hz10),
            5 => Ok(FilterBandwidth::Hz5),
            _ => Err(invalid_argument_error(
                &format!("Unsupported filter bandwidth {}Hz", hz))),
        }
    }

    // DLPF_CFG field of the CONFIG register.
    fn register_value(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Mpu6050Config {
    pub accel_range: AccelRange,
    pub gyro_range: GyroRange,
    pub filter_bandwidth: FilterBandwidth,

    // Sample rate is gyro output rate / (1 + sample_rate_divisor).
    pub sample_rate_divisor: u8,
}

impl Default for Mpu6050Config {
    fn default() -> Self {
        Mpu6050Config {
            accel_range: AccelRange::G2,
            gyro_range: GyroRange::Dps500,
            filter_bandwidth: FilterBandwidth::Hz260,
            sample_rate_divisor: 0,
        }
    }
}

pub struct Mpu6050<B: RegisterBus> {
    bus: B,
    config: Mpu6050Config,

    // Set once initialize() succeeds.
    ready: bool,
}

/// Low level interface to the MPU-6050. Each read_sample() call performs a
/// single burst transaction so that acceleration, temperature and angular
/// rate belong to the same device sample. This layer does not provide zero
/// calibration or data integration.
impl<B: RegisterBus> Mpu6050<B> {
    /// Wraps the bus; no traffic occurs until initialize() is called.
    pub fn new(bus: B, config: Mpu6050Config) -> Self {
        Mpu6050{bus, config, ready: false}
    }

    pub fn is_ready(&self) -> bool {
        self.ready
    }

    /// Verify this is actually an MPU-6050. A bus error here means nothing
    /// answered at the address.
    fn verify_device(&mut self) -> Result<(), CanonicalError> {
        let who_am_i = self.read_register(WHO_AM_I_REG)
            .map_err(|e| unavailable_error(
                &format!("Device did not respond: {}", e.message)))?;

        if who_am_i == EXPECTED_WHO_AM_I {
            info!("Device verified: MPU-6050 (WHO_AM_I: 0x{:02X})", who_am_i);
            Ok(())
        } else {
            Err(failed_precondition_error(
                &format!("Wrong device ID: expected 0x{:02X}, got 0x{:02X}",
                         EXPECTED_WHO_AM_I, who_am_i)))
        }
    }

    /// Reset the device, wake it from sleep mode and apply our config.
    fn configure(&mut self) -> Result<(), CanonicalError> {
        // Perform device reset first for clean state.
        self.write_register(PWR_MGMT_1_REG, 0x80)?;
        sleep(Duration::from_millis(100));

        // Wake up the device (clock source = X gyro PLL).
        self.write_register(PWR_MGMT_1_REG, 0x01)?;
        sleep(Duration::from_millis(10));

        let config = self.config;
        self.write_register(SMPLRT_DIV, config.sample_rate_divisor)?;
        self.write_register(CONFIG, config.filter_bandwidth.register_value())?;
        self.write_register(GYRO_CONFIG, config.gyro_range.register_value())?;
        self.write_register(ACCEL_CONFIG, config.accel_range.register_value())?;

        // Verify the device still answers after the reset.
        let who_am_i = self.read_register(WHO_AM_I_REG)?;
        if who_am_i != EXPECTED_WHO_AM_I {
            return Err(failed_precondition_error(
                &format!("Device ID changed after configuration: got 0x{:02X}",
                         who_am_i)));
        }

        info!("Device configured: {:?} accel, {:?} gyro, {:?} filter, \
               sample rate divisor {}",
              config.accel_range, config.gyro_range, config.filter_bandwidth,
              config.sample_rate_divisor);
        Ok(())
    }

    /// Read a single register.
    fn read_register(&mut self, register: u8) -> Result<u8, CanonicalError> {
        let mut buffer = [0u8; 1];
        self.bus.write_read(&[register], &mut buffer)?;
        Ok(buffer[0])
    }

    /// Write to a single register.
    fn write_register(&mut self, register: u8, value: u8)
                      -> Result<(), CanonicalError> {
        self.bus.write(&[register, value])
    }

    fn convert(&self, buffer: &[u8; BURST_LEN]) -> SensorSample {
        let word = |i: usize| i16::from_be_bytes([buffer[i], buffer[i + 1]]) as f64;
        let (ax, ay, az) = (word(0), word(2), word(4));
        let temp_raw = word(6);
        let (gx, gy, gz) = (word(8), word(10), word(12));
        debug!("Raw accel: x={}, y={}, z={}; raw gyro: x={}, y={}, z={}",
               ax, ay, az, gx, gy, gz);

        let accel_scale = self.config.accel_range.scale_factor();
        let gyro_scale = self.config.gyro_range.scale_factor();
        SensorSample {
            timestamp: SystemTime::now(),
            accel: AccelData {
                x: ax / accel_scale * G,
                y: ay / accel_scale * G,
                z: az / accel_scale * G,
            },
            gyro: GyroData {
                x: (gx / gyro_scale).to_radians(),
                y: (gy / gyro_scale).to_radians(),
                z: (gz / gyro_scale).to_radians(),
            },
            temperature: temp_raw / TEMP_SCALE_FACTOR + TEMP_OFFSET,
        }
    }
}

// A floating or stuck bus reads back as all ones or all zeros.
fn is_corrupt_burst(buffer: &[u8]) -> bool {
    buffer.iter().all(|b| *b == 0xFF) || buffer.iter().all(|b| *b == 0x00)
}

impl<B: RegisterBus> InertialSensor for Mpu6050<B> {
    fn initialize(&mut self) -> Result<(), CanonicalError> {
        self.ready = false;
        self.verify_device()?;
        self.configure()?;
        self.ready = true;
        info!("MPU-6050 successfully initialized!");
        Ok(())
    }

    fn read_sample(&mut self) -> Result<SensorSample, CanonicalError> {
        if !self.ready {
            return Err(failed_precondition_error(
                "MPU-6050 read before successful initialization"));
        }
        let mut buffer = [0u8; BURST_LEN];
        self.bus.write_read(&[ACCEL_XOUT_H], &mut buffer)?;
        if is_corrupt_burst(&buffer) {
            return Err(internal_error(
                &format!("Corrupt sample burst: {:02X?}", buffer)));
        }
        Ok(self.convert(&buffer))
    }

    fn model(&self) -> String {
        "MPU-6050".to_string()
    }
}

#[cfg(test)]
mod tests {
    extern crate approx;
    use approx::assert_abs_diff_eq;
    use canonical_error::{CanonicalErrorCode, deadline_exceeded_error};
    use super::*;

    // Register file backed fake. Reads starting at a register return
    // consecutive registers; writes are recorded and stored.
    struct FakeBus {
        registers: [u8; 128],
        writes: Vec<(u8, u8)>,
        respond: bool,
        fail_reads_with_timeout: bool,

        // Identity reported once the device has been reset.
        who_am_i_after_reset: Option<u8>,
    }

    impl FakeBus {
        fn new() -> Self {
            let mut registers = [0u8; 128];
            registers[WHO_AM_I_REG as usize] = EXPECTED_WHO_AM_I;
            FakeBus{registers, writes: Vec::new(), respond: true,
                    fail_reads_with_timeout: false, who_am_i_after_reset: None}
        }

        fn set_word(&mut self, register: u8, value: i16) {
            let bytes = value.to_be_bytes();
            self.registers[register as usize] = bytes[0];
            self.registers[register as usize + 1] = bytes[1];
        }
    }

    impl RegisterBus for &mut FakeBus {
        fn write(&mut self, data: &[u8]) -> Result<(), CanonicalError> {
            if !self.respond {
                return Err(internal_error("NACK"));
            }
            self.writes.push((data[0], data[1]));
            // Reset and wake writes must not clobber the identity register.
            if data[0] != PWR_MGMT_1_REG {
                self.registers[data[0] as usize] = data[1];
            } else if data[1] == 0x80 {
                if let Some(id) = self.who_am_i_after_reset {
                    self.registers[WHO_AM_I_REG as usize] = id;
                }
            }
            Ok(())
        }

        fn write_read(&mut self, write_data: &[u8], read_buffer: &mut [u8])
                      -> Result<(), CanonicalError> {
            if !self.respond {
                return Err(internal_error("NACK"));
            }
            if self.fail_reads_with_timeout {
                return Err(deadline_exceeded_error("bus timeout"));
            }
            let start = write_data[0] as usize;
            read_buffer.copy_from_slice(
                &self.registers[start..start + read_buffer.len()]);
            Ok(())
        }
    }

    #[test]
    fn test_initialize_configures_device() {
        let mut bus = FakeBus::new();
        let mut mpu = Mpu6050::new(&mut bus, Mpu6050Config::default());
        assert!(!mpu.is_ready());
        mpu.initialize().unwrap();
        assert!(mpu.is_ready());
        assert_eq!(mpu.model(), "MPU-6050");
        drop(mpu);
        assert_eq!(bus.writes, vec![(PWR_MGMT_1_REG, 0x80),
                                    (PWR_MGMT_1_REG, 0x01),
                                    (SMPLRT_DIV, 0),
                                    (CONFIG, 0),
                                    (GYRO_CONFIG, 0x08),
                                    (ACCEL_CONFIG, 0x00)]);
    }

    #[test]
    fn test_initialize_wrong_identity() {
        let mut bus = FakeBus::new();
        bus.registers[WHO_AM_I_REG as usize] = 0x70;
        let mut mpu = Mpu6050::new(&mut bus, Mpu6050Config::default());
        let err = mpu.initialize().unwrap_err();
        assert!(matches!(err.code, CanonicalErrorCode::FailedPrecondition));
        assert!(!mpu.is_ready());
        drop(mpu);
        // No configuration writes after a failed identity check.
        assert!(bus.writes.is_empty());
    }

    #[test]
    fn test_initialize_identity_lost_after_reset() {
        let mut bus = FakeBus::new();
        bus.who_am_i_after_reset = Some(0x00);
        let mut mpu = Mpu6050::new(&mut bus, Mpu6050Config::default());
        let err = mpu.initialize().unwrap_err();
        assert!(matches!(err.code, CanonicalErrorCode::FailedPrecondition));
        assert!(!mpu.is_ready());
        assert!(mpu.read_sample().is_err());
    }

    #[test]
    fn test_initialize_no_response() {
        let mut bus = FakeBus::new();
        bus.respond = false;
        let mut mpu = Mpu6050::new(&mut bus, Mpu6050Config::default());
        let err = mpu.initialize().unwrap_err();
        assert!(matches!(err.code, CanonicalErrorCode::Unavailable));
    }

    #[test]
    fn test_read_before_initialize() {
        let mut bus = FakeBus::new();
        let mut mpu = Mpu6050::new(&mut bus, Mpu6050Config::default());
        let err = mpu.read_sample().unwrap_err();
        assert!(matches!(err.code, CanonicalErrorCode::FailedPrecondition));
    }

    #[test]
    fn test_read_sample_conversion() {
        let mut bus = FakeBus::new();
        bus.set_word(0x3B, 16384);   // 1g at ±2g.
        bus.set_word(0x3D, -8192);   // -0.5g.
        bus.set_word(0x3F, 0);
        bus.set_word(0x41, 340);     // 1°C above offset.
        bus.set_word(0x43, 655);     // 10°/s at ±500°/s.
        bus.set_word(0x45, 0);
        bus.set_word(0x47, -655);
        let mut mpu = Mpu6050::new(&mut bus, Mpu6050Config::default());
        mpu.initialize().unwrap();

        let sample = mpu.read_sample().unwrap();
        assert_abs_diff_eq!(sample.accel.x, 9.80665, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.accel.y, -4.903325, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.accel.z, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.gyro.x, 10.0_f64.to_radians(), epsilon = 1e-9);
        assert_abs_diff_eq!(sample.gyro.y, 0.0, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.gyro.z, -10.0_f64.to_radians(), epsilon = 1e-9);
        assert_abs_diff_eq!(sample.temperature, 37.53, epsilon = 1e-9);
    }

    #[test]
    fn test_read_sample_other_ranges() {
        let mut bus = FakeBus::new();
        bus.set_word(0x3B, 2048);    // 1g at ±16g.
        bus.set_word(0x43, 164);     // 10°/s at ±2000°/s.
        let config = Mpu6050Config {
            accel_range: AccelRange::G16,
            gyro_range: GyroRange::Dps2000,
            filter_bandwidth: FilterBandwidth::Hz44,
            sample_rate_divisor: 19,
        };
        let mut mpu = Mpu6050::new(&mut bus, config);
        mpu.initialize().unwrap();
        let sample = mpu.read_sample().unwrap();
        assert_abs_diff_eq!(sample.accel.x, 9.80665, epsilon = 1e-9);
        assert_abs_diff_eq!(sample.gyro.x, 10.0_f64.to_radians(), epsilon = 1e-9);
        drop(mpu);
        assert!(bus.writes.contains(&(CONFIG, 3)));
        assert!(bus.writes.contains(&(SMPLRT_DIV, 19)));
        assert!(bus.writes.contains(&(ACCEL_CONFIG, 0x18)));
        assert!(bus.writes.contains(&(GYRO_CONFIG, 0x18)));
    }

    #[test]
    fn test_repeated_reads_match() {
        let mut bus = FakeBus::new();
        bus.set_word(0x3B, 1000);
        bus.set_word(0x3F, 16000);
        let mut mpu = Mpu6050::new(&mut bus, Mpu6050Config::default());
        mpu.initialize().unwrap();
        let first = mpu.read_sample().unwrap();
        let second = mpu.read_sample().unwrap();
        assert!(first.readings_match(&second, 1e-12));
    }

    #[test]
    fn test_corrupt_burst_rejected() {
        let mut bus = FakeBus::new();
        for reg in 0x3B..0x3B + BURST_LEN {
            bus.registers[reg] = 0xFF;
        }
        let mut mpu = Mpu6050::new(&mut bus, Mpu6050Config::default());
        mpu.initialize().unwrap();
        let err = mpu.read_sample().unwrap_err();
        assert!(matches!(err.code, CanonicalErrorCode::Internal));
    }

    #[test]
    fn test_read_timeout_propagates() {
        let mut bus = FakeBus::new();
        bus.set_word(0x3F, 16384);
        let mut mpu = Mpu6050::new(&mut bus, Mpu6050Config::default());
        mpu.initialize().unwrap();
        mpu.bus.fail_reads_with_timeout = true;
        let err = mpu.read_sample().unwrap_err();
        assert!(matches!(err.code, CanonicalErrorCode::DeadlineExceeded));
        // The driver stays usable once the bus recovers.
        mpu.bus.fail_reads_with_timeout = false;
        assert!(mpu.read_sample().is_ok());
    }

    #[test]
    fn test_range_parsing() {
        assert_eq!(AccelRange::from_g(8).unwrap(), AccelRange::G8);
        assert!(AccelRange::from_g(3).is_err());
        assert_eq!(GyroRange::from_dps(1000).unwrap(), GyroRange::Dps1000);
        assert!(GyroRange::from_dps(300).is_err());
        assert_eq!(FilterBandwidth::from_hz(5).unwrap(), FilterBandwidth::Hz5);
        assert_eq!(FilterBandwidth::from_hz(5).unwrap().register_value(), 6);
        assert!(FilterBandwidth::from_hz(100).is_err());
    }
}  // mod tests.
