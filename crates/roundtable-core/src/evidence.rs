//! Boundary to the external evidence-retrieval capability and the query-term
//! extraction used to derive search terms from interview questions.

use std::fmt;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::EvidenceError;

/// Named external source an evidence query can target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceName {
    /// News articles and diverse web results.
    Google,
    /// Recent activities and public statements.
    Twitter,
}

impl SourceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceName::Google => "google",
            SourceName::Twitter => "twitter",
        }
    }

    /// Parse a configured source name; unknown names are skipped by callers.
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "google" => Some(SourceName::Google),
            "twitter" => Some(SourceName::Twitter),
            _ => None,
        }
    }
}

impl fmt::Display for SourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One retrieved evidence record: a citation plus the snippet that grounded it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub url: String,
    pub title: String,
    pub snippet: String,
}

/// A referencable source. Deduplication everywhere in the pipeline is by
/// `url`; titles are display metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub url: String,
    pub title: String,
}

impl From<&Evidence> for Citation {
    fn from(evidence: &Evidence) -> Self {
        Self {
            url: evidence.url.clone(),
            title: evidence.title.clone(),
        }
    }
}

/// External retrieval capability.
///
/// Finite results, possibly empty; "no results" is `Ok(vec![])`, never an
/// error. Implementations are shared across concurrent sessions.
#[async_trait]
pub trait EvidenceProvider: Send + Sync {
    async fn query(
        &self,
        search_terms: &str,
        sources: &[SourceName],
    ) -> Result<Vec<Evidence>, EvidenceError>;
}

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"[a-z0-9][a-z0-9'\-]*").expect("word regex"));

const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "can", "could", "do", "does", "for",
    "from", "has", "have", "how", "i", "in", "is", "it", "its", "me", "my", "of", "on", "or",
    "tell", "that", "the", "their", "there", "this", "to", "us", "was", "we", "were", "what",
    "when", "where", "which", "who", "why", "will", "with", "would", "you", "your",
];

const MAX_QUERY_TERMS: usize = 8;

/// Derive search terms from a free-text interview question.
///
/// Keeps the first distinctive words, dropping stop words and short tokens,
/// so downstream scrapers receive a compact keyword query rather than prose.
pub fn extract_query_terms(question: &str) -> String {
    let lowered = question.to_ascii_lowercase();
    let mut terms: Vec<&str> = Vec::new();

    for m in WORD.find_iter(&lowered) {
        let word = m.as_str();
        if word.len() < 3 || STOP_WORDS.contains(&word) || terms.contains(&word) {
            continue;
        }
        terms.push(word);
        if terms.len() == MAX_QUERY_TERMS {
            break;
        }
    }

    terms.join(" ")
}
