//! Batch file parsing.
//!
//! One student per line: `student_id[,resource_tier]` or
//! `student_id,enrolled_date,resource_tier`. Blank lines and `#` comments are
//! ignored, as is a leading header row whose first cell is `student_id`.

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};

use crate::workspace::ResourceTier;

use super::BatchError;

const HEADER_CELL: &str = "student_id";
const MAX_COLUMNS: usize = 3;

/// A well-formed batch entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BatchEntry {
    /// One-based line number in the source file.
    pub line: usize,
    /// Student identifier as written; validated by provisioning.
    pub student_id: String,
    /// Requested tier.
    pub tier: ResourceTier,
}

/// One classified line of a batch file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BatchLine {
    /// An entry ready for provisioning.
    Entry(BatchEntry),
    /// A line missing a required field or carrying an unusable value.
    Malformed {
        /// One-based line number.
        line: usize,
        /// Student identifier, when one was present.
        student_id: String,
        /// Why the line was rejected.
        reason: String,
    },
}

impl BatchLine {
    /// Classifies a `(student_id, tier)` pair. An empty tier selects the
    /// default tier.
    #[must_use]
    pub fn classify(line: usize, student_id: &str, tier: &str) -> Self {
        let id = student_id.trim();
        if id.is_empty() {
            return Self::Malformed {
                line,
                student_id: String::new(),
                reason: String::from("missing student id"),
            };
        }
        let parsed = if tier.trim().is_empty() {
            Ok(ResourceTier::default())
        } else {
            tier.parse::<ResourceTier>()
        };
        match parsed {
            Ok(resolved) => Self::Entry(BatchEntry {
                line,
                student_id: id.to_owned(),
                tier: resolved,
            }),
            Err(err) => Self::Malformed {
                line,
                student_id: id.to_owned(),
                reason: err.to_string(),
            },
        }
    }

    /// One-based line number.
    #[must_use]
    pub const fn line(&self) -> usize {
        match self {
            Self::Entry(entry) => entry.line,
            Self::Malformed { line, .. } => *line,
        }
    }
}

/// Parses batch file contents into classified lines, in file order.
#[must_use]
pub fn parse_batch(contents: &str) -> Vec<BatchLine> {
    let mut lines = Vec::new();
    let mut seen_row = false;
    for (index, raw) in contents.lines().enumerate() {
        let line = index + 1;
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let cells: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        let first_row = !seen_row;
        seen_row = true;
        if first_row
            && cells
                .first()
                .is_some_and(|cell| cell.eq_ignore_ascii_case(HEADER_CELL))
        {
            continue;
        }

        lines.push(match cells.as_slice() {
            [id] => BatchLine::classify(line, id, ""),
            [id, tier] | [id, _, tier] => BatchLine::classify(line, id, tier),
            _ => BatchLine::Malformed {
                line,
                student_id: cells
                    .first()
                    .map(|cell| (*cell).to_owned())
                    .unwrap_or_default(),
                reason: format!("expected at most {MAX_COLUMNS} columns, found {}", cells.len()),
            },
        });
    }
    lines
}

/// Reads and parses a batch file.
///
/// # Errors
///
/// Returns [`BatchError::Read`] when the file cannot be opened or is not
/// UTF-8.
pub fn load_batch_file(path: &Utf8Path) -> Result<Vec<BatchLine>, BatchError> {
    let read_error = |err: std::io::Error| BatchError::Read {
        path: path.to_path_buf(),
        message: err.to_string(),
    };
    let parent = match path.parent() {
        Some(dir) if !dir.as_str().is_empty() => dir,
        _ => Utf8Path::new("."),
    };
    let file_name = path.file_name().ok_or_else(|| BatchError::Read {
        path: path.to_path_buf(),
        message: String::from("path does not name a file"),
    })?;

    let dir = Dir::open_ambient_dir(parent, ambient_authority()).map_err(read_error)?;
    let contents = dir.read_to_string(file_name).map_err(read_error)?;
    Ok(parse_batch(&contents))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn entry(line: usize, student_id: &str, tier: ResourceTier) -> BatchLine {
        BatchLine::Entry(BatchEntry {
            line,
            student_id: student_id.to_owned(),
            tier,
        })
    }

    #[test]
    fn parses_two_and_three_column_rows() {
        let lines = parse_batch(
            "student_id,enrolled_date,resource_tier\n\
             bob,2024-09-01,standard\n\
             carol,2024-09-02,high\n\
             dave\n\
             erin,HIGH\n",
        );

        assert_eq!(
            lines,
            vec![
                entry(2, "bob", ResourceTier::Standard),
                entry(3, "carol", ResourceTier::High),
                entry(4, "dave", ResourceTier::Standard),
                entry(5, "erin", ResourceTier::High),
            ]
        );
    }

    #[test]
    fn skips_blank_lines_and_comments() {
        let lines = parse_batch("# cohort A\n\n  bob  \n   # trailing\n");
        assert_eq!(lines, vec![entry(3, "bob", ResourceTier::Standard)]);
    }

    #[test]
    fn header_is_only_recognised_on_first_row() {
        let lines = parse_batch("bob\nstudent_id\n");
        assert_eq!(lines.len(), 2);
    }

    #[rstest]
    #[case(",standard", "missing student id")]
    #[case("bob,huge", "unknown resource tier 'huge'")]
    #[case("a,b,c,d", "expected at most 3 columns, found 4")]
    fn malformed_lines_carry_reasons(#[case] row: &str, #[case] reason: &str) {
        let lines = parse_batch(row);
        let [BatchLine::Malformed { reason: actual, .. }] = lines.as_slice() else {
            panic!("expected one malformed line, got {lines:?}");
        };
        assert!(actual.contains(reason), "{actual}");
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = load_batch_file(Utf8Path::new("definitely/not/here.csv"))
            .expect_err("missing file should fail");
        assert!(matches!(err, BatchError::Read { .. }));
    }
}
