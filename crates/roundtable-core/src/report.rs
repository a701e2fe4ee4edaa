//! Merges per-analyst sections into the final report: introduction and
//! conclusion generation, global citation deduplication, and consistent
//! renumbering of inline markers.

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::RoundtableError;
use crate::completion::{CompletionRequest, CompletionService, with_retry};
use crate::config::ResearchConfig;
use crate::evidence::Citation;
use crate::section::Section;

/// Terminal artifact of a research run. Immutable once compiled;
/// serializable for the HTTP layer and renderable as markdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub topic: String,
    pub introduction: String,
    /// One per surviving persona, in persona-generation order.
    pub sections: Vec<Section>,
    pub conclusion: String,
    /// Deduplicated by url across all sections, first-appearance order.
    pub citations: Vec<Citation>,
}

impl Report {
    /// Render the report as a markdown document with a flat source list.
    pub fn to_markdown(&self) -> String {
        let mut out = format!("# {}\n\n{}\n", self.topic, self.introduction.trim());
        for section in &self.sections {
            out.push_str(&format!("\n## {}\n\n{}\n", section.title, section.body.trim()));
        }
        out.push_str(&format!("\n## Conclusion\n\n{}\n", self.conclusion.trim()));
        if !self.citations.is_empty() {
            out.push_str("\n## Sources\n\n");
            for (idx, citation) in self.citations.iter().enumerate() {
                out.push_str(&format!("{}. [{}]({})\n", idx + 1, citation.title, citation.url));
            }
        }
        out
    }
}

const INTRO_INSTRUCTIONS: &str = "You are a technical writer opening a research report on:

{topic}

The report contains sections with these titles:
{titles}

Write a short introduction (one or two paragraphs) that sets the context for the report and \
previews its themes. Plain markdown prose, no headers.";

const CONCLUSION_INSTRUCTIONS: &str = "You are a technical writer closing a research report on:

{topic}

The report contains sections with these titles:
{titles}

Write a short conclusion (one or two paragraphs) summarizing the overall implications. \
Plain markdown prose, no headers.";

static CITATION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("citation marker regex"));

/// Assembles the final report from surviving sections.
pub struct ReportCompiler<'a> {
    completion: &'a dyn CompletionService,
    config: &'a ResearchConfig,
}

impl<'a> ReportCompiler<'a> {
    pub fn new(completion: &'a dyn CompletionService, config: &'a ResearchConfig) -> Self {
        Self { completion, config }
    }

    /// Compile `sections` (already in persona order) into a [`Report`].
    ///
    /// Citation numbering and section order are a pure function of the
    /// input, so compiling the same sections twice yields identical output
    /// modulo the generated intro/conclusion text.
    #[instrument(name = "report.compile", skip(self, sections), fields(section_count = sections.len()))]
    pub async fn compile(
        &self,
        topic: &str,
        sections: Vec<Section>,
    ) -> Result<Report, RoundtableError> {
        if sections.is_empty() {
            return Err(RoundtableError::Compilation(
                "no usable sections: every interview session failed".into(),
            ));
        }

        let (sections, citations) = renumber_citations(sections);

        // Prompts carry only the titles, keeping their size independent of
        // body length.
        let titles = sections
            .iter()
            .map(|section| format!("- {}", section.title))
            .collect::<Vec<_>>()
            .join("\n");

        let introduction = self
            .framing_text(INTRO_INSTRUCTIONS, topic, &titles, "Write the introduction.")
            .await?;
        let conclusion = self
            .framing_text(CONCLUSION_INSTRUCTIONS, topic, &titles, "Write the conclusion.")
            .await?;

        Ok(Report {
            topic: topic.to_string(),
            introduction,
            sections,
            conclusion,
            citations,
        })
    }

    async fn framing_text(
        &self,
        instructions: &str,
        topic: &str,
        titles: &str,
        user: &str,
    ) -> Result<String, RoundtableError> {
        let system = instructions
            .replace("{topic}", topic)
            .replace("{titles}", titles);
        let request = CompletionRequest::new(system, user);

        with_retry(self.config, "report.framing", || {
            self.completion.complete(&request)
        })
        .await
        .map_err(|err| RoundtableError::Compilation(err.to_string()))
    }
}

/// Deduplicate citations by url across sections (first-seen title wins) and
/// rewrite each section's inline markers from its local numbering to the
/// global one. Only citations actually referenced by some body enter the
/// global list, so no entry in it is unused. Single-pass replacement, so
/// renumbering never cascades.
fn renumber_citations(sections: Vec<Section>) -> (Vec<Section>, Vec<Citation>) {
    let mut global: Vec<Citation> = Vec::new();

    let sections = sections
        .into_iter()
        .map(|section| {
            // local 1-based index -> global 1-based index, keyed by the
            // markers that actually appear, in first-appearance order.
            let mut mapping: Vec<Option<usize>> = vec![None; section.citations.len()];
            for caps in CITATION_MARKER.captures_iter(&section.body) {
                let Some(idx) = caps[1].parse::<usize>().ok().and_then(|n| n.checked_sub(1))
                else {
                    continue;
                };
                let Some(citation) = section.citations.get(idx) else {
                    continue;
                };
                if mapping[idx].is_none() {
                    let number = match global.iter().position(|known| known.url == citation.url)
                    {
                        Some(existing) => existing + 1,
                        None => {
                            global.push(citation.clone());
                            global.len()
                        }
                    };
                    mapping[idx] = Some(number);
                }
            }

            let body = CITATION_MARKER
                .replace_all(&section.body, |caps: &Captures| {
                    match caps[1]
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|idx| mapping.get(idx).copied().flatten())
                    {
                        Some(global_number) => format!("[{global_number}]"),
                        // The section writer already stripped unresolvable
                        // markers; anything left unmapped is dropped.
                        None => String::new(),
                    }
                })
                .to_string();

            Section {
                title: section.title,
                body,
                citations: section.citations,
            }
        })
        .collect();

    (sections, global)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use async_trait::async_trait;

    struct CannedCompletion;

    #[async_trait]
    impl CompletionService for CannedCompletion {
        async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
            if request.user.contains("introduction") {
                Ok("This report surveys the topic.".into())
            } else {
                Ok("The findings point in one direction.".into())
            }
        }

        async fn complete_structured(
            &self,
            _: &CompletionRequest,
        ) -> Result<serde_json::Value, CompletionError> {
            unreachable!("compilation is free-form")
        }
    }

    struct FailingCompletion;

    #[async_trait]
    impl CompletionService for FailingCompletion {
        async fn complete(&self, _: &CompletionRequest) -> Result<String, CompletionError> {
            Err(CompletionError::Service("backend down".into()))
        }

        async fn complete_structured(
            &self,
            _: &CompletionRequest,
        ) -> Result<serde_json::Value, CompletionError> {
            unreachable!()
        }
    }

    fn citation(url: &str, title: &str) -> Citation {
        Citation {
            url: url.into(),
            title: title.into(),
        }
    }

    fn fast_config() -> ResearchConfig {
        ResearchConfig {
            retry_count: 1,
            initial_backoff_ms: 1,
            max_backoff_ms: 2,
            ..ResearchConfig::default()
        }
    }

    fn two_sections() -> Vec<Section> {
        vec![
            Section {
                title: "Costs".into(),
                body: "Costs fell [1] while demand held [2].".into(),
                citations: vec![
                    citation("https://example.com/a", "Report A"),
                    citation("https://example.com/b", "Report B"),
                ],
            },
            Section {
                title: "Policy".into(),
                body: "Regulators reacted [1]; markets shrugged [2].".into(),
                citations: vec![
                    // Same url as section one, different title: dedupes to
                    // the first-seen entry.
                    citation("https://example.com/a", "Duplicate Title"),
                    citation("https://example.com/c", "Report C"),
                ],
            },
        ]
    }

    #[tokio::test]
    async fn deduplicates_by_url_and_renumbers_globally() {
        let config = fast_config();
        let report = ReportCompiler::new(&CannedCompletion, &config)
            .compile("energy storage", two_sections())
            .await
            .unwrap();

        let urls: Vec<&str> = report.citations.iter().map(|c| c.url.as_str()).collect();
        assert_eq!(
            urls,
            vec![
                "https://example.com/a",
                "https://example.com/b",
                "https://example.com/c"
            ]
        );
        // First-seen title wins for the duplicated url.
        assert_eq!(report.citations[0].title, "Report A");
        // Section two's local [1] is the global [1], its [2] becomes [3].
        assert_eq!(report.sections[1].body, "Regulators reacted [1]; markets shrugged [3].");
        assert_eq!(report.sections[0].body, "Costs fell [1] while demand held [2].");
    }

    #[tokio::test]
    async fn compilation_is_idempotent() {
        let config = fast_config();
        let compiler = ReportCompiler::new(&CannedCompletion, &config);
        let first = compiler.compile("topic", two_sections()).await.unwrap();
        let second = compiler.compile("topic", two_sections()).await.unwrap();

        assert_eq!(first.to_markdown(), second.to_markdown());
    }

    #[tokio::test]
    async fn every_marker_resolves_and_no_citation_is_unused() {
        let config = fast_config();
        let report = ReportCompiler::new(&CannedCompletion, &config)
            .compile("topic", two_sections())
            .await
            .unwrap();

        let marker = Regex::new(r"\[(\d+)\]").unwrap();
        let mut used = vec![false; report.citations.len()];
        for section in &report.sections {
            for caps in marker.captures_iter(&section.body) {
                let n: usize = caps[1].parse().unwrap();
                assert!(n >= 1 && n <= report.citations.len(), "dangling marker [{n}]");
                used[n - 1] = true;
            }
        }
        assert!(used.iter().all(|&u| u), "unused citation in final list");
    }

    #[tokio::test]
    async fn unreferenced_section_citations_stay_out_of_the_global_list() {
        let config = fast_config();
        let sections = vec![Section {
            title: "Sparse".into(),
            body: "Only the second source matters [2].".into(),
            citations: vec![
                citation("https://example.com/never-cited", "Ignored"),
                citation("https://example.com/b", "Report B"),
            ],
        }];
        let report = ReportCompiler::new(&CannedCompletion, &config)
            .compile("topic", sections)
            .await
            .unwrap();

        assert_eq!(report.citations.len(), 1);
        assert_eq!(report.citations[0].url, "https://example.com/b");
        assert_eq!(report.sections[0].body, "Only the second source matters [1].");
    }

    #[tokio::test]
    async fn zero_sections_is_a_compilation_error() {
        let config = fast_config();
        let err = ReportCompiler::new(&CannedCompletion, &config)
            .compile("topic", Vec::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RoundtableError::Compilation(_)));
    }

    #[tokio::test]
    async fn framing_failure_after_retries_is_fatal() {
        let config = fast_config();
        let err = ReportCompiler::new(&FailingCompletion, &config)
            .compile("topic", two_sections())
            .await
            .unwrap_err();
        assert!(matches!(err, RoundtableError::Compilation(_)));
    }

    #[tokio::test]
    async fn markdown_rendering_lists_sources_in_order() {
        let config = fast_config();
        let report = ReportCompiler::new(&CannedCompletion, &config)
            .compile("energy storage", two_sections())
            .await
            .unwrap();

        let markdown = report.to_markdown();
        assert!(markdown.starts_with("# energy storage\n"));
        assert!(markdown.contains("## Costs"));
        assert!(markdown.contains("## Conclusion"));
        let sources_at = markdown.find("## Sources").unwrap();
        assert!(markdown[sources_at..].contains("1. [Report A](https://example.com/a)"));
    }
}
