use std::collections::HashMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use walkdir::WalkDir;

use crate::error::{HarvestError, Result};

/// One indexed file: its bare name and full content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactFile {
    pub filename: String,
    pub content: String,
}

/// Full path to indexed file, e.g.
/// `e2e-test/e2e-report.xml` -> `{filename: "e2e-report.xml", content: "..."}`.
pub type FileIndex = HashMap<PathBuf, ArtifactFile>;

/// Walks an extracted output tree and indexes every regular file whose path
/// matches one of the configured patterns.
///
/// Matched files are read fully into memory; there is no size cap, so very
/// large matches grow the index proportionally.
#[derive(Debug)]
pub struct ArtifactScanner {
    patterns: Vec<Regex>,
}

impl ArtifactScanner {
    pub fn new<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns = patterns
            .into_iter()
            .map(|pattern| {
                Regex::new(pattern.as_ref()).map_err(|err| HarvestError::Configuration {
                    reason: format!("invalid file pattern {:?}: {err}", pattern.as_ref()),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ArtifactScanner { patterns })
    }

    pub fn scan(&self, root: &Path) -> Result<FileIndex> {
        let mut index = FileIndex::new();

        for entry in WalkDir::new(root) {
            let entry = entry.map_err(|err| HarvestError::from_walkdir(root, err))?;
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            if !self.matches(path) {
                continue;
            }

            let bytes =
                std::fs::read(path).map_err(|err| HarvestError::filesystem(path, err))?;

            index.insert(
                path.to_path_buf(),
                ArtifactFile {
                    filename: entry.file_name().to_string_lossy().into_owned(),
                    content: String::from_utf8_lossy(&bytes).into_owned(),
                },
            );
        }

        Ok(index)
    }

    /// Patterns are independent alternatives: any one matching the full path
    /// selects the file.
    fn matches(&self, path: &Path) -> bool {
        let path = path.to_string_lossy();
        self.patterns.iter().any(|pattern| pattern.is_match(&path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexes_only_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("suite1")).unwrap();
        std::fs::write(dir.path().join("suite1/e2e-report.xml"), "<ok/>").unwrap();
        std::fs::write(dir.path().join("suite1/notes.txt"), "scratch").unwrap();

        let scanner = ArtifactScanner::new([r"e2e-report\.xml$"]).unwrap();
        let index = scanner.scan(dir.path()).unwrap();

        assert_eq!(index.len(), 1);
        let artifact = index.get(&dir.path().join("suite1/e2e-report.xml")).unwrap();
        assert_eq!(artifact.filename, "e2e-report.xml");
        assert_eq!(artifact.content, "<ok/>");
    }

    #[test]
    fn patterns_are_alternatives() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("report.xml"), "<a/>").unwrap();
        std::fs::write(dir.path().join("build.log"), "ok").unwrap();
        std::fs::write(dir.path().join("junk.bin"), "x").unwrap();

        let scanner = ArtifactScanner::new([r"\.xml$", r"\.log$"]).unwrap();
        let index = scanner.scan(dir.path()).unwrap();

        assert_eq!(index.len(), 2);
    }

    #[test]
    fn invalid_pattern_is_a_configuration_error() {
        assert!(matches!(
            ArtifactScanner::new(["("]).unwrap_err(),
            HarvestError::Configuration { .. }
        ));
    }

    #[test]
    fn empty_tree_yields_empty_index() {
        let dir = tempfile::tempdir().unwrap();
        let scanner = ArtifactScanner::new([r".*"]).unwrap();
        assert!(scanner.scan(dir.path()).unwrap().is_empty());
    }
}
