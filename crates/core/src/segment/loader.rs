//! Shard file parsing.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use super::types::{SegmentDescriptor, Subset};

/// What to do with a row that cannot be parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MalformedRowPolicy {
    /// Record the row as a terminal failure and keep going.
    #[default]
    Reject,
    /// Abort the whole run.
    Abort,
}

/// Errors raised while loading a shard.
#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Failed to read shard file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed row at {path}:{line}: {reason}")]
    Format {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// A row that was skipped under [`MalformedRowPolicy::Reject`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedRow {
    pub line: usize,
    pub raw: String,
    pub reason: String,
}

/// Parsed contents of one shard file.
#[derive(Debug, Clone)]
pub struct LoadedShard {
    pub path: PathBuf,
    pub subset: Subset,
    pub descriptors: Vec<SegmentDescriptor>,
    pub rejected: Vec<RejectedRow>,
    pub duplicates: usize,
}

impl LoadedShard {
    /// File name used to derive per-shard ledger and report names.
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "shard".to_string())
    }
}

/// Loads a shard file into ordered segment descriptors.
pub fn load_shard(
    path: &Path,
    subset: Subset,
    policy: MalformedRowPolicy,
    skip_header_lines: usize,
) -> Result<LoadedShard, CatalogError> {
    let contents = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_shard(path, &contents, subset, policy, skip_header_lines)
}

/// Parses shard contents. Split out from [`load_shard`] for testing.
pub fn parse_shard(
    path: &Path,
    contents: &str,
    subset: Subset,
    policy: MalformedRowPolicy,
    skip_header_lines: usize,
) -> Result<LoadedShard, CatalogError> {
    let mut descriptors = Vec::new();
    let mut rejected = Vec::new();
    let mut seen = HashSet::new();
    let mut duplicates = 0;

    for (idx, raw) in contents.lines().enumerate().skip(skip_header_lines) {
        let line = idx + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        match parse_row(trimmed, subset, line) {
            Ok(descriptor) => {
                if !seen.insert(descriptor.key()) {
                    warn!(line, key = %descriptor.key(), "Dropping duplicate segment row");
                    duplicates += 1;
                    continue;
                }
                descriptors.push(descriptor);
            }
            Err(reason) => match policy {
                MalformedRowPolicy::Abort => {
                    return Err(CatalogError::Format {
                        path: path.to_path_buf(),
                        line,
                        reason,
                    });
                }
                MalformedRowPolicy::Reject => {
                    warn!(line, %reason, "Rejecting malformed shard row");
                    rejected.push(RejectedRow {
                        line,
                        raw: raw.to_string(),
                        reason,
                    });
                }
            },
        }
    }

    debug!(
        path = %path.display(),
        rows = descriptors.len(),
        rejected = rejected.len(),
        "Loaded shard"
    );

    Ok(LoadedShard {
        path: path.to_path_buf(),
        subset,
        descriptors,
        rejected,
        duplicates,
    })
}

/// Parses one row. An inverted interval is not a format error: the job for it
/// fails terminally later so that it is reported under its own key.
fn parse_row(row: &str, subset: Subset, line: usize) -> Result<SegmentDescriptor, String> {
    let fields = split_fields(row)?;
    if fields.len() < 3 {
        return Err(format!("expected at least 3 fields, found {}", fields.len()));
    }

    let video_id = fields[0].trim();
    if video_id.is_empty() {
        return Err("empty video id".to_string());
    }

    let start_seconds = parse_seconds(&fields[1], "start_seconds")?;
    let end_seconds = parse_seconds(&fields[2], "end_seconds")?;

    let labels = fields[3..]
        .iter()
        .flat_map(|f| f.split(','))
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect();

    Ok(SegmentDescriptor {
        video_id: video_id.to_string(),
        start_seconds,
        end_seconds,
        subset,
        labels,
        line,
    })
}

fn parse_seconds(field: &str, name: &str) -> Result<f64, String> {
    let value = field
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("{} is not a number: {:?}", name, field.trim()))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{} out of range: {}", name, value));
    }
    Ok(value)
}

/// Splits a comma separated row, honouring double-quoted fields.
fn split_fields(row: &str) -> Result<Vec<String>, String> {
    let mut fields = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut chars = row.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes && chars.peek() == Some(&'"') => {
                current.push('"');
                chars.next();
            }
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                fields.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }

    if in_quotes {
        return Err("unterminated quoted field".to_string());
    }
    fields.push(current.trim().to_string());
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const SAMPLE: &str = r#"# Segments csv created Sun Mar  5 10:54:31 2017
# num_ytids=22160, num_segs=22160, num_unique_labels=527, num_positive_labels=52882
# YTID, start_seconds, end_seconds, positive_labels
--PJHxphWEs, 30.000, 40.000, "/m/09x0r,/t/dd00088"
--ZhevVpy1s, 50.000, 60.000, "/m/012xff"
"#;

    fn parse(contents: &str, policy: MalformedRowPolicy) -> Result<LoadedShard, CatalogError> {
        parse_shard(Path::new("test.csv"), contents, Subset::Eval, policy, 0)
    }

    #[test]
    fn test_parse_audioset_rows() {
        let shard = parse(SAMPLE, MalformedRowPolicy::Reject).unwrap();
        assert_eq!(shard.descriptors.len(), 2);
        let first = &shard.descriptors[0];
        assert_eq!(first.video_id, "--PJHxphWEs");
        assert_eq!(first.start_seconds, 30.0);
        assert_eq!(first.end_seconds, 40.0);
        assert_eq!(first.labels, vec!["/m/09x0r", "/t/dd00088"]);
        assert_eq!(first.line, 4);
        assert!(shard.rejected.is_empty());
    }

    #[test]
    fn test_reject_policy_keeps_going() {
        let contents = "a, 1.0, 2.0\nb, x, 3.0\nc, 4.0\nd, 5.0, 6.0\n";
        let shard = parse(contents, MalformedRowPolicy::Reject).unwrap();
        assert_eq!(shard.descriptors.len(), 2);
        assert_eq!(shard.rejected.len(), 2);
        assert_eq!(shard.rejected[0].line, 2);
        assert!(shard.rejected[0].reason.contains("start_seconds"));
        assert_eq!(shard.rejected[1].line, 3);
    }

    #[test]
    fn test_abort_policy_fails() {
        let contents = "a, 1.0, 2.0\nb, x, 3.0\n";
        let err = parse(contents, MalformedRowPolicy::Abort).unwrap_err();
        assert!(matches!(err, CatalogError::Format { line: 2, .. }));
    }

    #[test]
    fn test_inverted_interval_is_kept_for_the_job_to_fail() {
        let shard = parse("a, 10.0, 5.0\n", MalformedRowPolicy::Abort).unwrap();
        assert_eq!(shard.descriptors.len(), 1);
        assert!(!shard.descriptors[0].has_valid_interval());
    }

    #[test]
    fn test_duplicates_dropped() {
        let shard = parse("a, 1.0, 2.0\na, 1.000, 2.000\n", MalformedRowPolicy::Reject).unwrap();
        assert_eq!(shard.descriptors.len(), 1);
        assert_eq!(shard.duplicates, 1);
    }

    #[test]
    fn test_skip_header_lines() {
        let contents = "header one\nheader two\na, 1.0, 2.0\n";
        let shard = parse_shard(
            Path::new("t.csv"),
            contents,
            Subset::Eval,
            MalformedRowPolicy::Abort,
            2,
        )
        .unwrap();
        assert_eq!(shard.descriptors.len(), 1);
    }

    #[test]
    fn test_unterminated_quote_rejected() {
        let shard = parse("a, 1.0, 2.0, \"/m/1\n", MalformedRowPolicy::Reject).unwrap();
        assert_eq!(shard.rejected.len(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let err = load_shard(
            Path::new("/nonexistent/shard.csv"),
            Subset::Eval,
            MalformedRowPolicy::Reject,
            0,
        )
        .unwrap_err();
        assert!(matches!(err, CatalogError::Io { .. }));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", SAMPLE).unwrap();
        let shard = load_shard(file.path(), Subset::Eval, MalformedRowPolicy::Reject, 0).unwrap();
        assert_eq!(shard.descriptors.len(), 2);
        assert_eq!(shard.subset, Subset::Eval);
    }
}
