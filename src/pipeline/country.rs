//! Country code to display-name directory

use crate::pipeline::models::UNKNOWN_MARKER;
use crate::Result;
use anyhow::{bail, Context};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Immutable lookup table from a two-letter country code to its display name
#[derive(Debug, Clone, Default)]
pub struct CountryDirectory {
    names: HashMap<String, String>,
}

impl CountryDirectory {
    /// Load a `code,name` table.
    ///
    /// Lines that do not split into exactly two fields are skipped. A missing
    /// file, or one without a single valid entry, is an error: nothing can be
    /// classified without this table.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("country table {} could not be read", path.display()))?;

        let directory = Self::parse(&content);
        if directory.is_empty() {
            bail!("country table {} has no valid entries", path.display());
        }
        Ok(directory)
    }

    pub fn parse(content: &str) -> Self {
        let names = content
            .lines()
            .filter_map(|line| {
                let parts: Vec<&str> = line.trim().split(',').collect();
                match parts.as_slice() {
                    [code, name] => Some((code.trim().to_string(), strip_whitespace(name))),
                    _ => None,
                }
            })
            .collect();
        Self { names }
    }

    pub fn from_entries<I, C, N>(entries: I) -> Self
    where
        I: IntoIterator<Item = (C, N)>,
        C: Into<String>,
        N: AsRef<str>,
    {
        let names = entries
            .into_iter()
            .map(|(code, name)| (code.into(), strip_whitespace(name.as_ref())))
            .collect();
        Self { names }
    }

    /// Display name for `code`, or the unknown marker when absent
    pub fn name(&self, code: &str) -> &str {
        self.names.get(code).map_or(UNKNOWN_MARKER, String::as_str)
    }

    pub fn contains(&self, code: &str) -> bool {
        self.names.contains_key(code)
    }

    /// Composite `<code><name>` classification string
    pub fn composite(&self, code: &str) -> String {
        format!("{}{}", code, self.name(code))
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}

fn strip_whitespace(s: &str) -> String {
    s.chars().filter(|c| !c.is_whitespace()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_malformed_lines() {
        let content = "US,United States\nbroken line\nDE,Germany,extra\n\nJP, 日 本 \n";
        let directory = CountryDirectory::parse(content);
        assert_eq!(directory.len(), 2);
        assert_eq!(directory.name("US"), "UnitedStates");
        assert_eq!(directory.name("JP"), "日本");
        assert!(!directory.contains("DE"));
    }

    #[test]
    fn test_unknown_code_uses_sentinel() {
        let directory = CountryDirectory::from_entries([("US", "United States")]);
        assert_eq!(directory.name("ZZ"), "unknown");
        assert_eq!(directory.composite("US"), "USUnitedStates");
        assert_eq!(directory.composite("ZZ"), "ZZunknown");
    }

    #[test]
    fn test_load_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let err = CountryDirectory::load(dir.path().join("countries.txt")).unwrap_err();
        assert!(err.to_string().contains("countries.txt"));
    }

    #[test]
    fn test_load_empty_table_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("countries.txt");
        fs::write(&path, "not a table\n").unwrap();
        assert!(CountryDirectory::load(&path).is_err());

        fs::write(&path, "US,United States\n").unwrap();
        let directory = CountryDirectory::load(&path).unwrap();
        assert_eq!(directory.name("US"), "UnitedStates");
    }
}
