// SPDX-License-Identifier: Apache-2.0

use crate::init::parse;
use clap::Args;
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Debug, Args, Clone)]
pub struct AgentRun {
    /// Configuration file
    #[arg(long, env = "LOGDOG_CONFIG", default_value = crate::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Endpoint for the configuration push server
    #[arg(long, env = "LOGDOG_ADMIN_ENDPOINT", default_value = "0.0.0.0:8008", value_parser = parse::parse_endpoint)]
    pub admin_endpoint: SocketAddr,

    /// Disable the configuration push server
    #[arg(long, env = "LOGDOG_NO_ADMIN", default_value = "false")]
    pub no_admin: bool,

    /// Maximum concurrent push requests, 0 selects twice the CPU count
    #[arg(long, env = "LOGDOG_MAX_CONCURRENT_PUSHES", default_value = "0")]
    pub max_concurrent_pushes: usize,
}

impl AgentRun {
    /// Effective push-concurrency limit.
    pub fn push_limit(&self) -> usize {
        if self.max_concurrent_pushes > 0 {
            return self.max_concurrent_pushes;
        }
        std::thread::available_parallelism()
            .map(|n| n.get() * 2)
            .unwrap_or(2)
    }
}
