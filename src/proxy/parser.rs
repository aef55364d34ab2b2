//! Candidate parser for reading candidates from files

use crate::proxy::cycle::CandidateSource;
use crate::proxy::models::Candidate;
use crate::Result;
use anyhow::Context;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Candidate parser for strings and files
pub struct CandidateParser;

impl CandidateParser {
    /// Parse a single line.
    ///
    /// Blank lines and `#` comments are skipped; anything else is taken as a
    /// candidate verbatim (trimmed). Malformed entries are left to fail
    /// validation.
    pub fn parse_line(line: &str) -> Option<Candidate> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }
        Some(Candidate::new(line))
    }

    /// Parse candidates from a string (multiple lines)
    pub fn parse_string(content: &str) -> Vec<Candidate> {
        content.lines().filter_map(Self::parse_line).collect()
    }

    /// Parse candidates from a file
    pub async fn parse_file<P: AsRef<Path>>(path: P) -> Result<Vec<Candidate>> {
        let path = path.as_ref();
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read proxy file {:?}", path))?;
        Ok(Self::parse_string(&content))
    }
}

/// Candidates listed one per line in a local file
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CandidateSource for FileSource {
    async fn candidates(&self) -> Result<Vec<Candidate>> {
        CandidateParser::parse_file(&self.path).await
    }

    fn describe(&self) -> String {
        format!("file {}", self.path.display())
    }
}
