//! Flat-file helpers shared by every stage
//!
//! Every stage hands its output to the next one through plain text files:
//! one value per line, or `address#status` lines for classified addresses.

use crate::pipeline::models::{IpRecord, IpRecordSet};
use crate::Result;
use anyhow::Context;
use std::fs;
use std::path::{Path, PathBuf};

/// Reader/writer for the line-oriented files exchanged between stages
pub struct ListFile;

impl ListFile {
    /// Parse one value per line, trimming and dropping blank lines
    pub fn parse_values(content: &str) -> Vec<String> {
        content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(String::from)
            .collect()
    }

    /// Read a list of values from a file that must exist
    pub fn read_values<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self::parse_values(&content))
    }

    /// Read a list of values; an absent file is an empty list
    pub fn read_optional_values<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Vec::new());
        }
        Self::read_values(path)
    }

    /// Parse `address#status` lines into an insertion-ordered record set
    pub fn parse_records(content: &str) -> IpRecordSet {
        content.lines().filter_map(IpRecord::parse_line).collect()
    }

    pub fn read_records<P: AsRef<Path>>(path: P) -> Result<IpRecordSet> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Ok(Self::parse_records(&content))
    }

    pub fn write_records<'a, P, I>(path: P, records: I) -> Result<()>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = &'a IpRecord>,
    {
        Self::write_lines(path, records.into_iter().map(IpRecord::to_line))
    }

    /// Write every line followed by a newline.
    ///
    /// Parent directories are created as needed. The content goes to a
    /// sibling temporary file first and is renamed into place, so readers
    /// never observe a half-written file.
    pub fn write_lines<P, I, S>(path: P, lines: I) -> Result<()>
    where
        P: AsRef<Path>,
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let path = path.as_ref();
        let mut content = String::new();
        for line in lines {
            content.push_str(line.as_ref());
            content.push('\n');
        }

        ensure_parent_dir(path)?;
        let tmp = temp_sibling(path);
        fs::write(&tmp, content)
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, path)
            .with_context(|| format!("failed to move {} into place", path.display()))?;
        Ok(())
    }
}

/// Create the parent directory of `path` if it has one
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory {}", parent.display()))?;
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::models::IpStatus;

    #[test]
    fn test_parse_values_skips_blank_lines() {
        let content = "1.1.1.1\n\n  2.2.2.2  \n\t\n3.3.3.3";
        assert_eq!(
            ListFile::parse_values(content),
            vec!["1.1.1.1", "2.2.2.2", "3.3.3.3"]
        );
    }

    #[test]
    fn test_read_optional_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let values = ListFile::read_optional_values(dir.path().join("absent.txt")).unwrap();
        assert!(values.is_empty());
    }

    #[test]
    fn test_read_values_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ListFile::read_values(dir.path().join("absent.txt")).is_err());
    }

    #[test]
    fn test_parse_records_last_status_wins() {
        let content = "1.1.1.1#unchecked\ngarbage\n2.2.2.2#unknown\n1.1.1.1#USUnitedStates\n";
        let set = ListFile::parse_records(content);
        assert_eq!(set.len(), 2);
        assert_eq!(
            set.get("1.1.1.1").unwrap().status,
            IpStatus::classified("US", "UnitedStates")
        );
        assert_eq!(set.iter().next().unwrap().address, "1.1.1.1");
    }

    #[test]
    fn test_write_lines_creates_parent_and_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/out.txt");
        ListFile::write_lines(&path, ["a", "b"]).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "a\nb\n");
        assert!(!temp_sibling(&path).exists());

        ListFile::write_lines(&path, Vec::<String>::new()).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_write_then_read_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("records.txt");
        let records = vec![
            IpRecord::unresolved("1.1.1.1".to_string()),
            IpRecord::new("8.8.8.8".to_string(), IpStatus::Unreachable),
        ];
        ListFile::write_records(&path, &records).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "1.1.1.1#unchecked\n8.8.8.8#unreachable\n"
        );

        let set = ListFile::read_records(&path).unwrap();
        assert_eq!(set.into_records(), records);
    }
}
