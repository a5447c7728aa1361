// SPDX-License-Identifier: Apache-2.0

//! File tracking: resolving a watch spec to a concrete file, following that
//! file as it grows, and recovering when it rotates.

pub mod resolver;
pub mod tailer;
pub mod watcher;

pub use resolver::{resolve, ResolvedTarget};
pub use tailer::{TailFrom, Tailer};
pub use watcher::{DirWatcher, PathEvent, PathEventKind, WatchError};
