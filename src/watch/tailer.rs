// SPDX-License-Identifier: Apache-2.0

//! Tailer: one long-lived task per watch spec.
//!
//! The task cycles through `Resolving -> Following -> (Rotated -> Resolving)`
//! until its cancellation token fires. While following it drains newly
//! appended lines into the keyword aggregator, then suspends on the
//! directory watcher; it never polls. Rotation (the followed file removed,
//! renamed, or superseded by a newer match) cleanly ends the follow session
//! and re-resolves immediately.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, AsyncSeekExt, BufReader, SeekFrom};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, WatchSpec};
use crate::metrics::{KeywordAggregator, MetricStore};

use super::resolver::{self, ResolvedTarget};
use super::watcher::{DirWatcher, PathEvent, PathEventKind, WatchError};

/// Where a follow session starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailFrom {
    /// Seek to end first, so historical content is never double-counted.
    End,
    /// Read from the beginning; used for files that appear via rotation,
    /// which have no historical content to skip.
    Start,
}

enum FollowOutcome {
    /// Stop signal observed; no further lines are delivered.
    Stopped,
    /// The target was replaced; re-resolve with no delay.
    Rotated,
    /// The resolved file could not be opened; back to resolving.
    OpenFailed,
    /// The notification stream closed underneath us.
    WatcherClosed,
}

pub struct Tailer {
    spec: Arc<WatchSpec>,
    aggregator: KeywordAggregator,
    watcher: DirWatcher,
}

impl Tailer {
    /// Build a tailer with its rotation watcher already subscribed.
    ///
    /// Subscription happens here, before the task is spawned, because a
    /// tailer that cannot observe the watched directory can never detect
    /// rotation: the failure is surfaced to the reload orchestrator as a
    /// generation setup error instead of silently degrading.
    pub fn setup(
        cfg: Arc<Config>,
        spec: Arc<WatchSpec>,
        store: Arc<MetricStore>,
    ) -> Result<Tailer, WatchError> {
        let watch_dir = watch_dir_for(&spec);
        let mut watcher = DirWatcher::new()?;
        watcher.watch(&watch_dir)?;

        let aggregator = KeywordAggregator::new(cfg, spec.clone(), store);
        Ok(Tailer {
            spec,
            aggregator,
            watcher,
        })
    }

    pub async fn run(mut self, cancel: CancellationToken) {
        info!(
            path = %self.spec.path.display(),
            pattern = %self.spec.pattern,
            "tailer started"
        );

        let mut consumed = HashSet::new();
        // Resolve-time mtime of the last file actually followed. A target
        // that postdates it came into being through rotation and is read in
        // full; anything older existed before us and its history stays
        // unread.
        let mut last_followed: Option<SystemTime> = None;
        loop {
            let target = match self.resolve_target(&consumed, &cancel).await {
                Some(target) => target,
                None => break,
            };

            let from = match last_followed {
                Some(prev) if target.modified > prev => TailFrom::Start,
                _ => TailFrom::End,
            };

            debug!(target = %target.path.display(), ?from, "following target");
            match self.follow(&target, from, &cancel).await {
                FollowOutcome::Stopped => break,
                FollowOutcome::Rotated => {
                    // The consumed inode is remembered so the rotated-away
                    // file is never reattached under its new name, which
                    // would replay lines already counted.
                    consumed.insert(target.ino);
                    last_followed = Some(target.modified);
                }
                FollowOutcome::OpenFailed => {
                    // A target that resolves but refuses to open would spin
                    // this loop hot; suspend until the directory changes.
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        ev = self.watcher.next() => {
                            if ev.is_none() {
                                error!(
                                    path = %self.spec.path.display(),
                                    "rotation watcher closed, stopping tailer"
                                );
                                break;
                            }
                        }
                    }
                }
                FollowOutcome::WatcherClosed => {
                    error!(
                        path = %self.spec.path.display(),
                        "rotation watcher closed, stopping tailer"
                    );
                    break;
                }
            }
        }

        debug!(path = %self.spec.path.display(), "tailer stopped");
    }

    /// Resolve the current target, waiting on directory notifications while
    /// nothing matches. Files whose inode is in `consumed` were already
    /// followed to rotation and are not acceptable targets. Returns None on
    /// cancellation or watcher loss.
    async fn resolve_target(
        &mut self,
        consumed: &HashSet<u64>,
        cancel: &CancellationToken,
    ) -> Option<ResolvedTarget> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            match resolver::resolve(&self.spec) {
                Ok(Some(target)) if !consumed.contains(&target.ino) => {
                    return Some(target);
                }
                Ok(Some(stale)) => {
                    debug!(
                        candidate = %stale.path.display(),
                        "latest match was already consumed, waiting for a new target"
                    );
                }
                Ok(None) => {
                    debug!(
                        path = %self.spec.path.display(),
                        pattern = %self.spec.pattern,
                        "no file to tail yet, waiting for notification"
                    );
                }
                Err(e) => {
                    warn!(
                        path = %self.spec.path.display(),
                        error = %e,
                        "target resolution failed, waiting for notification"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return None,
                ev = self.watcher.next() => {
                    ev?;
                    // Any change in the directory is reason to re-resolve.
                }
            }
        }
    }

    async fn follow(
        &mut self,
        target: &ResolvedTarget,
        from: TailFrom,
        cancel: &CancellationToken,
    ) -> FollowOutcome {
        let mut reader = match LineReader::open(&target.path, from).await {
            Ok(reader) => reader,
            Err(e) => {
                // Races with deletion and permission flaps are survivable;
                // go back to resolving.
                warn!(
                    target = %target.path.display(),
                    error = %e,
                    "unable to open resolved target"
                );
                return FollowOutcome::OpenFailed;
            }
        };

        loop {
            // Drain everything currently appended. The stop signal is
            // checked between lines: data already read is still delivered,
            // but no new read is issued after the signal is observed.
            loop {
                if cancel.is_cancelled() {
                    return FollowOutcome::Stopped;
                }
                match reader.next_line().await {
                    Ok(Some(line)) => self.aggregator.apply_line(&line),
                    Ok(None) => break,
                    Err(e) => {
                        warn!(
                            target = %target.path.display(),
                            error = %e,
                            "read error while following"
                        );
                        break;
                    }
                }
            }

            let event = tokio::select! {
                _ = cancel.cancelled() => return FollowOutcome::Stopped,
                ev = self.watcher.next() => match ev {
                    Some(ev) => ev,
                    None => return FollowOutcome::WatcherClosed,
                },
            };

            if self.is_rotation(&event, target) {
                info!(
                    target = %target.path.display(),
                    "rotation detected, re-resolving target"
                );
                return FollowOutcome::Rotated;
            }
            // Otherwise loop: a modify event (or anything uninteresting)
            // just means we try another read pass.
        }
    }

    /// Does `event` replace the followed target?
    fn is_rotation(&self, event: &PathEvent, target: &ResolvedTarget) -> bool {
        match event.kind {
            PathEventKind::Remove => event.concerns(&target.path),
            PathEventKind::Create => {
                if event.concerns(&target.path) {
                    // The target itself was recreated after deletion.
                    return true;
                }
                if self.spec.path_is_file {
                    return false;
                }
                // A new file matching the pattern rotates us only if it
                // postdates the current target; touched old files do not.
                event.paths.iter().any(|p| {
                    matches_pattern(&self.spec, p) && postdates(p, target)
                })
            }
            PathEventKind::Modify => false,
        }
    }
}

fn watch_dir_for(spec: &WatchSpec) -> PathBuf {
    if spec.path_is_file {
        spec.path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        spec.path.clone()
    }
}

fn matches_pattern(spec: &WatchSpec, path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| spec.pattern_regex.is_match(n))
}

fn postdates(path: &Path, target: &ResolvedTarget) -> bool {
    match std::fs::metadata(path).and_then(|m| m.modified()) {
        Ok(modified) => modified >= target.modified,
        // Already gone again; let re-resolution sort it out.
        Err(_) => true,
    }
}

/// Buffered line reader over a followed file.
///
/// Reports `None` at end-of-data rather than blocking; the tailer suspends
/// on the watcher and comes back for more. A trailing fragment without a
/// newline is held back until the rest of the line arrives.
struct LineReader {
    reader: BufReader<File>,
    buf: Vec<u8>,
    partial: Vec<u8>,
}

impl LineReader {
    async fn open(path: &Path, from: TailFrom) -> io::Result<LineReader> {
        let mut file = File::open(path).await?;
        if from == TailFrom::End {
            file.seek(SeekFrom::End(0)).await?;
        }

        Ok(LineReader {
            reader: BufReader::new(file),
            buf: Vec::new(),
            partial: Vec::new(),
        })
    }

    async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            self.buf.clear();
            let n = self.reader.read_until(b'\n', &mut self.buf).await?;
            if n == 0 {
                return Ok(None);
            }

            if self.buf.last() != Some(&b'\n') {
                // Mid-line EOF: stash the fragment for the next pass.
                self.partial.extend_from_slice(&self.buf);
                return Ok(None);
            }

            let mut bytes = std::mem::take(&mut self.partial);
            bytes.extend_from_slice(&self.buf[..n - 1]);
            if bytes.last() == Some(&b'\r') {
                bytes.pop();
            }
            if bytes.is_empty() {
                continue;
            }

            return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()));
        }
    }
}
