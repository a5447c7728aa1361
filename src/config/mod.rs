// SPDX-License-Identifier: Apache-2.0

//! Configuration document for the collector.
//!
//! The on-disk format is a JSON document:
//!
//! ```json
//! {
//!   "metric": "log.console",
//!   "timer": 10,
//!   "host": "",
//!   "agent": "http://127.0.0.1:1988/v1/push",
//!   "files": [
//!     {
//!       "path": "/var/log/app",
//!       "filepattern": "app\\.log.*",
//!       "keywords": [
//!         { "exp": "ERROR", "tag": "err", "type": "count" }
//!       ]
//!     }
//!   ]
//! }
//! ```
//!
//! The raw document is deserialized with serde and then validated into the
//! compiled form consumed by the rest of the process. A validated [`Config`]
//! is immutable; reloads build a whole new one and swap it in.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

/// Default configuration file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "cfg.json";

/// Filename pattern used when a watch entry does not specify one.
const DEFAULT_FILE_PATTERN: &str = ".*";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("timer must be a positive number of seconds")]
    InvalidTimer,

    #[error("agent URL must be set")]
    MissingAgent,

    #[error("watch path not accessible: {path}: {source}")]
    PathNotAccessible {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid file pattern '{pattern}': {source}")]
    InvalidFilePattern { pattern: String, source: regex::Error },

    #[error("keyword list not set for {0}")]
    EmptyKeywords(PathBuf),

    #[error("keyword exp and tag are required")]
    MissingKeywordField,

    #[error("invalid keyword expression '{exp}': {source}")]
    InvalidKeywordExp { exp: String, source: regex::Error },

    #[error("keyword type must be one of count, sum, min, max, avg: '{0}'")]
    UnknownAggKind(String),

    #[error("{kind} expression must contain a capturing group: '{exp}'")]
    MissingCaptureGroup { kind: AggKind, exp: String },
}

/// How matches for a keyword rule fold into its metric over an interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggKind {
    Count,
    Sum,
    Min,
    Max,
    Avg,
}

impl AggKind {
    fn parse(s: &str) -> Option<AggKind> {
        match s {
            "count" => Some(AggKind::Count),
            "sum" => Some(AggKind::Sum),
            "min" => Some(AggKind::Min),
            "max" => Some(AggKind::Max),
            "avg" => Some(AggKind::Avg),
            _ => None,
        }
    }

    /// Numeric kinds extract their value from the first capture group.
    pub fn is_numeric(&self) -> bool {
        !matches!(self, AggKind::Count)
    }
}

impl fmt::Display for AggKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggKind::Count => "count",
            AggKind::Sum => "sum",
            AggKind::Min => "min",
            AggKind::Max => "max",
            AggKind::Avg => "avg",
        };
        write!(f, "{}", s)
    }
}

/// A compiled keyword rule. Immutable after validation.
#[derive(Debug)]
pub struct KeywordRule {
    /// Original expression as written in the document.
    pub exp: String,
    /// Tag label reported with the metric.
    pub tag: String,
    /// Aggregation policy, fixed for the life of the rule.
    pub kind: AggKind,
    /// Compiled form of `exp`.
    pub regex: Regex,
    /// Tag-safe form of `exp` with non-word runs collapsed to a dot.
    pub fixed_exp: String,
}

/// One watch entry: a root path, a filename pattern, and its keyword rules.
/// Immutable after validation; owned by exactly one configuration generation.
#[derive(Debug)]
pub struct WatchSpec {
    pub path: PathBuf,
    /// Filename pattern as written in the document.
    pub pattern: String,
    /// Compiled form of `pattern`, matched against file names only.
    pub pattern_regex: Regex,
    /// True when `path` names a file rather than a directory to scan.
    pub path_is_file: bool,
    pub keywords: Vec<KeywordRule>,
}

/// A validated configuration generation. Replaced wholesale on reload,
/// never mutated in place.
#[derive(Debug)]
pub struct Config {
    /// Metric namespace, e.g. `log.console`.
    pub metric: String,
    /// Push interval in seconds; reported as `step` on every record.
    pub timer: u64,
    /// Endpoint label; defaults to the system hostname.
    pub host: String,
    /// Agent push URL.
    pub agent: String,
    pub files: Vec<Arc<WatchSpec>>,
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    metric: String,
    timer: u64,
    #[serde(default)]
    host: String,
    #[serde(default)]
    agent: String,
    files: Vec<RawWatchFile>,
}

#[derive(Debug, Deserialize)]
struct RawWatchFile {
    path: PathBuf,
    #[serde(default)]
    filepattern: String,
    #[serde(default)]
    keywords: Vec<RawKeyword>,
}

#[derive(Debug, Deserialize)]
struct RawKeyword {
    #[serde(default)]
    exp: String,
    #[serde(default)]
    tag: String,
    #[serde(rename = "type", default)]
    kind: String,
}

impl Config {
    /// Read and validate the configuration document at `path`.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let bytes = std::fs::read(path)?;
        Self::from_slice(&bytes)
    }

    /// Parse and validate a configuration document from raw bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Config, ConfigError> {
        let raw: RawConfig = serde_json::from_slice(bytes)?;
        validate(raw)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.timer)
    }
}

fn validate(raw: RawConfig) -> Result<Config, ConfigError> {
    if raw.timer == 0 {
        return Err(ConfigError::InvalidTimer);
    }
    if raw.agent.is_empty() {
        return Err(ConfigError::MissingAgent);
    }

    let host = if raw.host.is_empty() {
        let host = gethostname::gethostname().to_string_lossy().into_owned();
        info!(host, "host not set, using system hostname");
        host
    } else {
        raw.host
    };

    let mut files = Vec::with_capacity(raw.files.len());
    for file in raw.files {
        files.push(Arc::new(validate_watch_file(file)?));
    }

    Ok(Config {
        metric: raw.metric,
        timer: raw.timer,
        host,
        agent: raw.agent,
        files,
    })
}

fn validate_watch_file(raw: RawWatchFile) -> Result<WatchSpec, ConfigError> {
    let meta = std::fs::metadata(&raw.path).map_err(|e| ConfigError::PathNotAccessible {
        path: raw.path.clone(),
        source: e,
    })?;
    let path_is_file = !meta.is_dir();

    let pattern = if raw.filepattern.is_empty() {
        info!(path = %raw.path.display(), "filepattern not set, matching any file name");
        DEFAULT_FILE_PATTERN.to_string()
    } else {
        raw.filepattern
    };
    let pattern_regex = Regex::new(&pattern).map_err(|e| ConfigError::InvalidFilePattern {
        pattern: pattern.clone(),
        source: e,
    })?;

    if raw.keywords.is_empty() {
        return Err(ConfigError::EmptyKeywords(raw.path));
    }

    let mut keywords = Vec::with_capacity(raw.keywords.len());
    for kw in raw.keywords {
        keywords.push(validate_keyword(kw)?);
    }

    Ok(WatchSpec {
        path: raw.path,
        pattern,
        pattern_regex,
        path_is_file,
        keywords,
    })
}

fn validate_keyword(raw: RawKeyword) -> Result<KeywordRule, ConfigError> {
    if raw.exp.is_empty() || raw.tag.is_empty() {
        return Err(ConfigError::MissingKeywordField);
    }

    let kind = if raw.kind.is_empty() {
        AggKind::Count
    } else {
        AggKind::parse(&raw.kind).ok_or_else(|| ConfigError::UnknownAggKind(raw.kind.clone()))?
    };

    let regex = Regex::new(&raw.exp).map_err(|e| ConfigError::InvalidKeywordExp {
        exp: raw.exp.clone(),
        source: e,
    })?;

    // Numeric kinds read their value out of capture group 1, so the
    // expression must define one.
    if kind.is_numeric() && regex.captures_len() < 2 {
        return Err(ConfigError::MissingCaptureGroup { kind, exp: raw.exp });
    }

    Ok(KeywordRule {
        fixed_exp: fix_exp(&raw.exp),
        exp: raw.exp,
        tag: raw.tag,
        kind,
        regex,
    })
}

/// Collapse runs of non-word characters to a single dot so the expression is
/// safe to embed in a tag value.
fn fix_exp(exp: &str) -> String {
    static FIX: std::sync::LazyLock<Regex> =
        std::sync::LazyLock::new(|| Regex::new(r"[\W]+").unwrap());
    FIX.replace_all(exp, ".").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn doc(files: &str) -> String {
        format!(
            r#"{{
                "metric": "log.console",
                "timer": 10,
                "host": "web01",
                "agent": "http://127.0.0.1:1988/v1/push",
                "files": [{}]
            }}"#,
            files
        )
    }

    fn file_entry(dir: &TempDir, keywords: &str) -> String {
        format!(
            r#"{{
                "path": "{}",
                "filepattern": "app\\.log.*",
                "keywords": [{}]
            }}"#,
            dir.path().display(),
            keywords
        )
    }

    #[test]
    fn test_parse_full_document() {
        let dir = TempDir::new().unwrap();
        let doc = doc(&file_entry(
            &dir,
            r#"{"exp": "ERROR", "tag": "err", "type": "count"}"#,
        ));

        let cfg = Config::from_slice(doc.as_bytes()).unwrap();
        assert_eq!(cfg.metric, "log.console");
        assert_eq!(cfg.timer, 10);
        assert_eq!(cfg.host, "web01");
        assert_eq!(cfg.interval(), Duration::from_secs(10));
        assert_eq!(cfg.files.len(), 1);

        let spec = &cfg.files[0];
        assert!(!spec.path_is_file);
        assert!(spec.pattern_regex.is_match("app.log.1"));
        assert_eq!(spec.keywords.len(), 1);
        assert_eq!(spec.keywords[0].kind, AggKind::Count);
        assert_eq!(spec.keywords[0].tag, "err");
    }

    #[test]
    fn test_path_may_name_a_file() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("app.log");
        std::fs::write(&file, "").unwrap();

        let doc = doc(&format!(
            r#"{{"path": "{}", "keywords": [{{"exp": "x", "tag": "t"}}]}}"#,
            file.display()
        ));

        let cfg = Config::from_slice(doc.as_bytes()).unwrap();
        assert!(cfg.files[0].path_is_file);
        // Pattern defaults to match-anything
        assert!(cfg.files[0].pattern_regex.is_match("whatever"));
    }

    #[test]
    fn test_keyword_type_defaults_to_count() {
        let dir = TempDir::new().unwrap();
        let doc = doc(&file_entry(&dir, r#"{"exp": "WARN", "tag": "warn"}"#));

        let cfg = Config::from_slice(doc.as_bytes()).unwrap();
        assert_eq!(cfg.files[0].keywords[0].kind, AggKind::Count);
    }

    #[test]
    fn test_empty_keywords_rejected() {
        let dir = TempDir::new().unwrap();
        let doc = doc(&file_entry(&dir, ""));

        let err = Config::from_slice(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyKeywords(_)));
    }

    #[test]
    fn test_missing_exp_or_tag_rejected() {
        let dir = TempDir::new().unwrap();
        let doc = doc(&file_entry(&dir, r#"{"exp": "ERROR"}"#));

        let err = Config::from_slice(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingKeywordField));
    }

    #[test]
    fn test_unknown_agg_kind_rejected() {
        let dir = TempDir::new().unwrap();
        let doc = doc(&file_entry(
            &dir,
            r#"{"exp": "ERROR", "tag": "err", "type": "p99"}"#,
        ));

        let err = Config::from_slice(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAggKind(k) if k == "p99"));
    }

    #[test]
    fn test_numeric_kind_requires_capture_group() {
        let dir = TempDir::new().unwrap();
        let doc = doc(&file_entry(
            &dir,
            r#"{"exp": "latency=\\d+", "tag": "lat", "type": "max"}"#,
        ));

        let err = Config::from_slice(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingCaptureGroup { .. }));
    }

    #[test]
    fn test_missing_watch_path_rejected() {
        let doc = doc(
            r#"{"path": "/nonexistent/logdog-test", "keywords": [{"exp": "x", "tag": "t"}]}"#,
        );

        let err = Config::from_slice(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::PathNotAccessible { .. }));
    }

    #[test]
    fn test_zero_timer_rejected() {
        let doc = r#"{"metric": "m", "timer": 0, "agent": "http://a", "files": []}"#;
        let err = Config::from_slice(doc.as_bytes()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTimer));
    }

    #[test]
    fn test_fix_exp_collapses_non_word_runs() {
        assert_eq!(fix_exp("ERROR"), "ERROR");
        assert_eq!(fix_exp(r"latency=(\d+\.\d+)"), "latency.d.d.");
        assert_eq!(fix_exp("a  ++ b"), "a.b");
    }
}
