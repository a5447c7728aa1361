// SPDX-License-Identifier: Apache-2.0

pub mod agent;
pub mod args;
pub mod parse;
pub mod wait;
