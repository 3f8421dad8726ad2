// Copyright (c) 2025 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::process::ExitCode;

use imu_agent::agent_main::agent_main;

fn main() -> ExitCode {
    agent_main()
}
