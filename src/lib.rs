// SPDX-License-Identifier: Apache-2.0

//! Log-tailing metrics collector. Tails configured log files, counts and
//! aggregates keyword matches, and pushes the results to an Open-Falcon
//! agent on a fixed interval. Configuration is hot-reloadable, from disk
//! or over HTTP.

pub mod admin;
pub mod config;
pub mod flush;
pub mod init;
pub mod listener;
pub mod metrics;
pub mod push;
pub mod reload;
pub mod watch;
