//! Destination layout: `root/<year>/<MM>-<MonthName>/<filename>`.
//!
//! The zero-padded month prefix keeps lexicographic listings in calendar order.

use std::path::{Path, PathBuf};

use chrono::{Datelike, Month};

use crate::error::{HarvestError, Result};

/// Longest filename produced by [`safe_filename`], in characters.
const MAX_FILENAME_CHARS: usize = 200;

/// Destination directory for a timestamp. Pure; performs no I/O.
///
/// Any two timestamps in the same calendar year and month map to the same path.
pub fn plan(root: &Path, timestamp: &impl Datelike) -> PathBuf {
    root.join(format!("{:04}", timestamp.year()))
        .join(month_label(timestamp.month()))
}

/// `3` → `"03-March"`.
pub fn month_label(month: u32) -> String {
    let name = u8::try_from(month)
        .ok()
        .and_then(|m| Month::try_from(m).ok())
        .map(|m| m.name())
        .unwrap_or("Unknown");
    format!("{month:02}-{name}")
}

/// Create `path` and its parents if absent.
pub fn ensure(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| HarvestError::io(path, e))
}

/// Make a sender-supplied filename safe to join under a directory.
///
/// Separators, control characters and characters Windows rejects become `_`.
/// Leading and trailing dots and whitespace are dropped so the name can
/// never be `.`, `..` or hidden.
pub fn safe_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    let trimmed: String = replaced
        .trim_matches(|c: char| c == '.' || c.is_whitespace())
        .chars()
        .take(MAX_FILENAME_CHARS)
        .collect();

    if trimmed.is_empty() {
        "attachment".to_string()
    } else {
        trimmed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, NaiveDate};

    #[test]
    fn test_plan_march_2023() {
        let t = DateTime::parse_from_rfc2822("Wed, 15 Mar 2023 10:00:00 +0000").unwrap();
        assert_eq!(
            plan(Path::new("/root"), &t),
            PathBuf::from("/root/2023/03-March")
        );
    }

    #[test]
    fn test_plan_same_month_is_stable() {
        let root = Path::new("store");
        let first = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let last = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_opt(23, 59, 59)
            .unwrap();
        assert_eq!(plan(root, &first), plan(root, &last));
        let next = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_ne!(plan(root, &first), plan(root, &next));
    }

    #[test]
    fn test_plan_historical_year_is_padded() {
        let t = NaiveDate::from_ymd_opt(987, 12, 25).unwrap();
        assert_eq!(plan(Path::new("r"), &t), PathBuf::from("r/0987/12-December"));
    }

    #[test]
    fn test_month_labels_sort_chronologically() {
        let labels: Vec<String> = (1..=12).map(month_label).collect();
        let mut sorted = labels.clone();
        sorted.sort();
        assert_eq!(labels, sorted);
        assert_eq!(labels[0], "01-January");
        assert_eq!(labels[8], "09-September");
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("2023").join("03-March");
        ensure(&target).unwrap();
        ensure(&target).unwrap();
        assert!(target.is_dir());
    }

    #[test]
    fn test_ensure_fails_under_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"").unwrap();
        assert!(matches!(
            ensure(&file.join("2023")),
            Err(HarvestError::Io { .. })
        ));
    }

    #[test]
    fn test_safe_filename() {
        assert_eq!(safe_filename("invoice.pdf"), "invoice.pdf");
        assert_eq!(safe_filename("Q1 report.xlsx"), "Q1 report.xlsx");
        assert_eq!(safe_filename("../../etc/passwd"), "_.._etc_passwd");
        assert_eq!(safe_filename("a\\b:c*d?.txt"), "a_b_c_d_.txt");
        assert_eq!(safe_filename(".."), "attachment");
        assert_eq!(safe_filename("  .hidden "), "hidden");
        assert_eq!(safe_filename(""), "attachment");
        assert_eq!(safe_filename(&"x".repeat(500)).chars().count(), 200);
    }
}
