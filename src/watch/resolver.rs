// SPDX-License-Identifier: Apache-2.0

//! Target resolution: mapping a watch spec to the concrete file that is
//! currently being written to.

use std::io;
use std::os::unix::fs::MetadataExt;
use std::path::PathBuf;
use std::time::SystemTime;

use tracing::debug;

use crate::config::WatchSpec;

/// The concrete file currently selected to satisfy a watch spec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub path: PathBuf,
    pub modified: SystemTime,
    /// Inode, used to recognize a rotated-away file under a new name.
    pub ino: u64,
}

/// Resolve `spec` to the file to tail.
///
/// A spec that names a file resolves to that path as long as it exists. A
/// spec that names a directory resolves to the matching immediate child with
/// the latest modification time; subdirectories are skipped. `Ok(None)` means
/// nothing to tail yet, which callers treat as a wait state rather than an
/// error.
pub fn resolve(spec: &WatchSpec) -> io::Result<Option<ResolvedTarget>> {
    if spec.path_is_file {
        return match std::fs::metadata(&spec.path) {
            Ok(meta) => Ok(Some(ResolvedTarget {
                path: spec.path.clone(),
                modified: meta.modified()?,
                ino: meta.ino(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        };
    }

    let mut candidates = Vec::new();
    for entry in std::fs::read_dir(&spec.path)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        if meta.is_dir() {
            debug!(path = %entry.path().display(), "skipping subdirectory in watch root");
            continue;
        }

        let name = entry.file_name();
        let matches = name
            .to_str()
            .is_some_and(|n| spec.pattern_regex.is_match(n));
        if !matches {
            continue;
        }

        candidates.push(ResolvedTarget {
            path: entry.path(),
            modified: meta.modified()?,
            ino: meta.ino(),
        });
    }

    Ok(pick_latest(candidates.into_iter()))
}

/// Latest modification time wins; on an exact tie the first candidate in
/// scan order is kept. Only a strictly later time supersedes the current
/// pick.
fn pick_latest(candidates: impl Iterator<Item = ResolvedTarget>) -> Option<ResolvedTarget> {
    let mut best: Option<ResolvedTarget> = None;
    for cand in candidates {
        match &best {
            Some(b) if cand.modified <= b.modified => {}
            _ => best = Some(cand),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::fs;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;

    fn spec_for(path: &std::path::Path, pattern: &str) -> Arc<crate::config::WatchSpec> {
        let doc = format!(
            r#"{{
                "metric": "m", "timer": 5, "host": "h", "agent": "http://a/push",
                "files": [{{
                    "path": "{}",
                    "filepattern": "{}",
                    "keywords": [{{"exp": "E", "tag": "t"}}]
                }}]
            }}"#,
            path.display(),
            pattern.replace('\\', "\\\\")
        );
        Config::from_slice(doc.as_bytes()).unwrap().files.remove(0)
    }

    #[test]
    fn test_direct_file_resolves_to_itself() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.log");
        fs::write(&file, "x\n").unwrap();
        // Distractors in the same directory are irrelevant for a file spec.
        fs::write(dir.path().join("other.log"), "y\n").unwrap();

        let spec = spec_for(&file, "");
        let target = resolve(&spec).unwrap().unwrap();
        assert_eq!(target.path, file);
    }

    #[test]
    fn test_direct_file_gone_is_not_found() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.log");
        fs::write(&file, "x\n").unwrap();

        let spec = spec_for(&file, "");
        fs::remove_file(&file).unwrap();

        assert!(resolve(&spec).unwrap().is_none());
    }

    #[test]
    fn test_directory_scan_picks_latest_matching() {
        let dir = TempDir::new().unwrap();
        let old = dir.path().join("app.log.1");
        let new = dir.path().join("app.log.2");
        fs::write(&old, "old\n").unwrap();
        fs::write(&new, "new\n").unwrap();

        // Make mtimes unambiguous.
        let f = fs::File::options().write(true).open(&new).unwrap();
        let later = SystemTime::now() + Duration::from_secs(60);
        f.set_times(fs::FileTimes::new().set_modified(later)).unwrap();

        let spec = spec_for(dir.path(), r"app\.log.*");
        let target = resolve(&spec).unwrap().unwrap();
        assert_eq!(target.path, new);
    }

    #[test]
    fn test_directory_scan_ignores_non_matching_and_subdirs() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("other.txt"), "x\n").unwrap();
        fs::create_dir(dir.path().join("app.log.d")).unwrap();

        let spec = spec_for(dir.path(), r"app\.log$");
        assert!(resolve(&spec).unwrap().is_none());
    }

    #[test]
    fn test_empty_directory_is_not_found() {
        let dir = TempDir::new().unwrap();
        let spec = spec_for(dir.path(), ".*");
        assert!(resolve(&spec).unwrap().is_none());
    }

    #[test]
    fn test_pick_latest_first_seen_wins_on_tie() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let a = ResolvedTarget {
            path: PathBuf::from("a.log"),
            modified: t,
            ino: 1,
        };
        let b = ResolvedTarget {
            path: PathBuf::from("b.log"),
            modified: t,
            ino: 2,
        };

        let picked = pick_latest(vec![a.clone(), b.clone()].into_iter()).unwrap();
        assert_eq!(picked.path, a.path);

        // Reversed scan order flips the winner.
        let picked = pick_latest(vec![b.clone(), a].into_iter()).unwrap();
        assert_eq!(picked.path, b.path);
    }

    #[test]
    fn test_pick_latest_strictly_later_supersedes() {
        let t = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let a = ResolvedTarget {
            path: PathBuf::from("a.log"),
            modified: t,
            ino: 1,
        };
        let b = ResolvedTarget {
            path: PathBuf::from("b.log"),
            modified: t + Duration::from_secs(1),
            ino: 2,
        };

        let picked = pick_latest(vec![a, b.clone()].into_iter()).unwrap();
        assert_eq!(picked.path, b.path);
    }
}
