// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use canonical_error::{CanonicalError, invalid_argument_error};
use clap::Parser;
use log::{error, info, warn};
use tracing_appender::non_blocking::NonBlockingBuilder;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*, registry};

use imu_agent_elements::imu_trait::InertialSensor;
use crate::i2c_bus::{DeferredBus, RppalBus};
use crate::mpu6050::{AccelRange, FilterBandwidth, GyroRange, MPU6050_ADDR,
                     MPU6050_ALT_ADDR, Mpu6050, Mpu6050Config};
use crate::replay_sensor::ReplaySensor;
use crate::reporter::{Reporter, ReporterSettings, RunOutcome};
use crate::simulated_sensor::{MAX_NOISE, SimulatedSensor};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
pub struct Args {
    /// Linux I2C bus number the sensor is attached to.
    #[arg(long = "i2c_bus", default_value = "1")]
    pub i2c_bus: u8,

    /// I2C address of the sensor: 0x68, or 0x69 when AD0 is pulled high.
    #[arg(long, value_parser = parse_address, default_value = "0x68")]
    pub address: u16,

    /// Time between samples, seconds.
    #[arg(long, value_parser = parse_duration, default_value = "0.0")]
    pub interval: Duration,

    /// Stop after reporting this many samples. 0 means run until
    /// interrupted.
    #[arg(long, default_value = "0")]
    pub samples: u64,

    /// Accelerometer full scale range, g: 2, 4, 8 or 16.
    #[arg(long = "accel_range", default_value = "2")]
    pub accel_range: u32,

    /// Gyro full scale range, degrees/second: 250, 500, 1000 or 2000.
    #[arg(long = "gyro_range", default_value = "500")]
    pub gyro_range: u32,

    /// Low pass filter bandwidth, Hz: 260, 184, 94, 44, 21, 10 or 5.
    #[arg(long = "filter_bandwidth", default_value = "260")]
    pub filter_bandwidth: u32,

    #[arg(long = "sample_rate_divisor", default_value = "0")]
    pub sample_rate_divisor: u8,

    /// Number of consecutive sample read failures tolerated before giving
    /// up. 0 means never give up.
    #[arg(long = "max_read_failures", default_value = "10")]
    pub max_read_failures: u32,

    /// Use a simulated sensor instead of the I2C device.
    #[arg(long)]
    pub simulate: bool,

    /// Noise amplitude applied to simulated readings.
    #[arg(long = "simulate_noise", default_value = "0.0")]
    pub simulate_noise: f64,

    /// Replay readings from this CSV recording (rows of accel x,y,z,
    /// optionally followed by gyro x,y,z) instead of using the I2C device.
    #[arg(long = "replay_file", conflicts_with = "simulate")]
    pub replay_file: Option<String>,

    #[arg(long = "log_dir", default_value = ".")]
    pub log_dir: String,

    #[arg(long = "log_file", default_value = "imu_agent_log.txt")]
    pub log_file: String,
}

fn parse_duration(arg: &str) -> Result<Duration, String> {
    let seconds: f32 = arg.parse()
        .map_err(|e| format!("Invalid duration {}: {}", arg, e))?;
    Duration::try_from_secs_f32(seconds)
        .map_err(|e| format!("Invalid duration {}: {}", arg, e))
}

fn parse_address(arg: &str) -> Result<u16, String> {
    let address = match arg.strip_prefix("0x").or_else(|| arg.strip_prefix("0X")) {
        Some(hex) => u16::from_str_radix(hex, 16),
        None => arg.parse(),
    }.map_err(|e| format!("Invalid address {}: {}", arg, e))?;
    if address != MPU6050_ADDR && address != MPU6050_ALT_ADDR {
        return Err(format!("Address must be 0x{:02X} or 0x{:02X}, got 0x{:02X}",
                           MPU6050_ADDR, MPU6050_ALT_ADDR, address));
    }
    Ok(address)
}

impl Args {
    pub fn device_config(&self) -> Result<Mpu6050Config, CanonicalError> {
        Ok(Mpu6050Config {
            accel_range: AccelRange::from_g(self.accel_range)?,
            gyro_range: GyroRange::from_dps(self.gyro_range)?,
            filter_bandwidth: FilterBandwidth::from_hz(self.filter_bandwidth)?,
            sample_rate_divisor: self.sample_rate_divisor,
        })
    }

    pub fn reporter_settings(&self) -> Result<ReporterSettings, CanonicalError> {
        if !(0.0..=MAX_NOISE).contains(&self.simulate_noise) {
            return Err(invalid_argument_error(
                &format!("Invalid simulate_noise {}", self.simulate_noise)));
        }
        Ok(ReporterSettings {
            interval: self.interval,
            sample_limit: if self.samples == 0 { None } else { Some(self.samples) },
            max_read_failures: self.max_read_failures,
        })
    }
}

fn report<S: InertialSensor, W: Write>(
    sensor: S, out: W, settings: ReporterSettings, stop: &AtomicBool)
    -> Result<RunOutcome, CanonicalError>
{
    Reporter::new(sensor, out, settings).run(stop)
}

/// Builds the configured sensor and reports its samples to `out` until
/// `stop` is set, the sample limit is reached, or the sensor fails.
pub fn run_agent<W: Write>(args: &Args, out: W, stop: &AtomicBool)
                           -> Result<RunOutcome, CanonicalError> {
    let settings = args.reporter_settings()?;
    let device_config = args.device_config()?;

    if args.simulate {
        info!("Using simulated sensor instead of I2C device.");
        let sensor = SimulatedSensor::at_rest().with_noise(args.simulate_noise);
        return report(sensor, out, settings, stop);
    }

    if let Some(replay_file) = &args.replay_file {
        info!("Using recording {} instead of I2C device.", replay_file);
        return report(ReplaySensor::new(replay_file), out, settings, stop);
    }

    // The bus is opened during sensor initialization, so a missing bus is
    // reported like any other init failure.
    let (i2c_bus, address) = (args.i2c_bus, args.address);
    info!("Using MPU-6050 on I2C bus {} at address 0x{:02X}", i2c_bus, address);
    let bus = DeferredBus::new(move || RppalBus::new(i2c_bus, address));
    report(Mpu6050::new(bus, device_config), out, settings, stop)
}

pub fn agent_main() -> ExitCode {
    let args = Args::parse();

    // Set up logging. Stdout carries the sample report, so log lines go to
    // stderr and to a rolling file.
    let file_appender = match RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(&args.log_file)
        .max_log_files(10)
        .build(&args.log_dir)
    {
        Ok(appender) => appender,
        Err(e) => {
            eprintln!("Could not create log file in {}: {:?}", args.log_dir, e);
            return ExitCode::FAILURE;
        }
    };
    let (non_blocking_file, _guard1) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(file_appender);
    let (non_blocking_stderr, _guard2) = NonBlockingBuilder::default()
        .lossy(false)
        .finish(std::io::stderr());
    registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(non_blocking_stderr))
        .with(fmt::layer().with_ansi(false).with_writer(non_blocking_file))
        .init();

    let got_signal = Arc::new(AtomicBool::new(false));
    let got_signal2 = got_signal.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        info!("Got control-c");
        got_signal2.store(true, Ordering::Relaxed);
    }) {
        warn!("Could not install control-c handler: {:?}", e);
    }

    match run_agent(&args, std::io::stdout().lock(), &got_signal) {
        Ok(outcome) => {
            info!("Exiting: {:?}", outcome);
            ExitCode::SUCCESS
        },
        Err(e) => {
            error!("Exiting: {:?}", e);
            ExitCode::FAILURE
        },
    }
}

// mod tests.
