//! Condenses one completed transcript into a titled, citation-bearing
//! report section.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::completion::{CompletionRequest, CompletionService, with_retry};
use crate::config::ResearchConfig;
use crate::error::SectionError;
use crate::evidence::Citation;
use crate::interview::Transcript;

/// The condensed write-up of one transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    pub title: String,
    pub body: String,
    /// The transcript's reference set, in first-seen order. Inline `[n]`
    /// markers in `body` index into this list, 1-based.
    pub citations: Vec<Citation>,
}

const SECTION_INSTRUCTIONS: &str = "You are a technical writer condensing an expert interview \
into one section of a research report.

The interview was conducted by this analyst:
{persona}

Your task:

1. Analyze the interview transcript provided.
2. Extract the key insights and information.
3. Write a concise section (around 400 words) summarizing these findings.

Formatting rules:

1. Start with a single compelling title line. Do not prefix it with markdown headers.
2. Follow with the section body in plain markdown paragraphs.
3. Cite sources inline with markers like [1] that refer to the numbered reference list below. \
Use only these references; do not invent others.

References:
{references}

Transcript:

{transcript}";

static CITATION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("citation marker regex"));

/// Stateless writer; one completion per transcript.
pub struct SectionWriter<'a> {
    completion: &'a dyn CompletionService,
    config: &'a ResearchConfig,
}

impl<'a> SectionWriter<'a> {
    pub fn new(completion: &'a dyn CompletionService, config: &'a ResearchConfig) -> Self {
        Self { completion, config }
    }

    /// Condense `transcript` into a section. Deterministic given the
    /// transcript and the completion output.
    #[instrument(name = "section.write", skip_all, fields(persona = %transcript.persona.name))]
    pub async fn write(&self, transcript: &Transcript) -> Result<Section, SectionError> {
        let references = if transcript.citations.is_empty() {
            "(none)".to_string()
        } else {
            transcript
                .citations
                .iter()
                .enumerate()
                .map(|(idx, citation)| format!("[{}] {} — {}", idx + 1, citation.title, citation.url))
                .collect::<Vec<_>>()
                .join("\n")
        };

        let system = SECTION_INSTRUCTIONS
            .replace("{persona}", &transcript.persona.prompt_block())
            .replace("{references}", &references)
            .replace("{transcript}", &transcript.render());
        let request = CompletionRequest::new(system, "Write the section for this interview.");

        let raw = with_retry(self.config, "section.write", || {
            self.completion.complete(&request)
        })
        .await?;

        let (title, body) = split_title(&raw, &transcript.persona.role);
        let body = strip_unresolvable_markers(&body, transcript.citations.len());

        Ok(Section {
            title,
            body,
            citations: transcript.citations.clone(),
        })
    }
}

/// First non-empty line becomes the title (markdown header prefixes and
/// surrounding emphasis tolerated); the rest is the body.
fn split_title(raw: &str, fallback_title: &str) -> (String, String) {
    let mut lines = raw.trim().lines();
    let title = lines
        .next()
        .map(|line| line.trim().trim_start_matches('#').trim().trim_matches('*').to_string())
        .filter(|line| !line.is_empty())
        .unwrap_or_else(|| fallback_title.to_string());
    let body = lines.collect::<Vec<_>>().join("\n").trim().to_string();
    (title, body)
}

/// Markers that do not resolve to a known citation are a contract violation
/// on the model's side; drop them rather than ship dangling references.
fn strip_unresolvable_markers(body: &str, citation_count: usize) -> String {
    let mut stripped_any = false;
    let cleaned = CITATION_MARKER
        .replace_all(body, |caps: &Captures| {
            match caps[1].parse::<usize>() {
                Ok(n) if n >= 1 && n <= citation_count => caps[0].to_string(),
                _ => {
                    stripped_any = true;
                    String::new()
                }
            }
        })
        .to_string();

    if stripped_any {
        warn!("stripped citation markers that resolve to no known reference");
    }
    cleaned
}
