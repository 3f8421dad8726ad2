// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

pub mod agent_main;
pub mod i2c_bus;
pub mod mpu6050;
pub mod replay_sensor;
pub mod report_format;
pub mod reporter;
pub mod simulated_sensor;
