//! Bounded turn-based interview between an analyst persona and an
//! expert-answering role.
//!
//! One session per persona. The state machine is `Ask -> Answer -> (Ask |
//! Terminated)`; every suspension point (completion and evidence calls)
//! doubles as a cooperative deadline checkpoint. Sessions own their
//! transcript and citation set outright, so concurrent sessions never share
//! mutable state.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use crate::completion::{CompletionRequest, CompletionService, with_retry};
use crate::config::ResearchConfig;
use crate::error::InterviewError;
use crate::evidence::{Citation, Evidence, EvidenceProvider, SourceName, extract_query_terms};
use crate::persona::Persona;

/// The closing phrase the analyst is instructed to emit when satisfied.
pub const END_SIGNAL: &str = "Thank you so much for your help";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    Analyst,
    Expert,
}

/// One exchange unit within a transcript. Append-only, ordered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    /// Citations surfaced and actually referenced in this turn.
    pub references: Vec<Citation>,
}

/// Why a session left the `Ask` loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationCause {
    /// The analyst emitted the explicit end-of-interview phrase.
    EndSignal,
    /// The configured expert-answer budget was exhausted.
    TurnLimit,
}

/// The completed record of one session. Read-only once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcript {
    pub persona: Persona,
    pub turns: Vec<Turn>,
    /// Union of turn references, deduplicated by url in first-seen order.
    pub citations: Vec<Citation>,
    pub termination: TerminationCause,
}

impl Transcript {
    /// Render the dialogue for inclusion in prompts.
    pub fn render(&self) -> String {
        render_turns(&self.turns)
    }
}

fn render_turns(turns: &[Turn]) -> String {
    let mut out = String::new();
    for turn in turns {
        let label = match turn.speaker {
            Speaker::Analyst => "Analyst",
            Speaker::Expert => "Expert",
        };
        out.push_str(label);
        out.push_str(": ");
        out.push_str(&turn.text);
        out.push_str("\n\n");
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Ask,
    Answer,
    Terminated(TerminationCause),
}

const QUESTION_INSTRUCTIONS: &str = "You are an analyst tasked with interviewing an expert to \
learn about a specific topic.

Your goal is to gather interesting and specific insights related to your topic.

Here is your topic of focus and set of goals:
{persona}

Begin by introducing yourself using a name that fits your persona, and then ask your question.

Continue to ask questions to drill down and refine your understanding of the topic.

When you are satisfied with your understanding, complete the interview with: \
\"Thank you so much for your help!\"

Remember to stay in character throughout your response, reflecting the persona and goals \
provided to you.";

const ANSWER_INSTRUCTIONS: &str = "You are an expert being interviewed by an analyst.

Here is the analyst's area of focus:
{persona}

Your goal is to answer the question posed by the interviewer.

Guidelines:

1. Use only the numbered evidence provided below, when evidence is given. Cite it inline \
with markers like [1] that refer to the evidence numbering.

2. If no evidence is provided, answer from general knowledge and do not fabricate citations.

3. If you don't know something, acknowledge it rather than making up information.

Evidence:
{evidence}";

static CITATION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[(\d+)\]").expect("citation marker regex"));

/// A bounded analyst/expert dialogue producing one [`Transcript`].
pub struct InterviewSession<'a> {
    topic: &'a str,
    persona: Persona,
    config: &'a ResearchConfig,
    completion: &'a dyn CompletionService,
    evidence: &'a dyn EvidenceProvider,
    sources: &'a [SourceName],
    /// Run-wide deadline; checked cooperatively before each external call.
    deadline: Option<Instant>,
    state: SessionState,
    turns: Vec<Turn>,
    citations: Vec<Citation>,
    expert_answers: usize,
}

impl<'a> InterviewSession<'a> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        topic: &'a str,
        persona: Persona,
        config: &'a ResearchConfig,
        completion: &'a dyn CompletionService,
        evidence: &'a dyn EvidenceProvider,
        sources: &'a [SourceName],
        deadline: Option<Instant>,
    ) -> Self {
        Self {
            topic,
            persona,
            config,
            completion,
            evidence,
            sources,
            deadline,
            state: SessionState::Ask,
            turns: Vec::new(),
            citations: Vec::new(),
            expert_answers: 0,
        }
    }

    /// Drive the state machine to termination.
    #[instrument(name = "interview.run", skip(self), fields(persona = %self.persona.name))]
    pub async fn run(mut self) -> Result<Transcript, InterviewError> {
        loop {
            match self.state {
                SessionState::Ask => self.ask().await?,
                SessionState::Answer => self.answer().await?,
                SessionState::Terminated(cause) => {
                    debug!(
                        turns = self.turns.len(),
                        citations = self.citations.len(),
                        ?cause,
                        "interview terminated"
                    );
                    return Ok(Transcript {
                        persona: self.persona,
                        turns: self.turns,
                        citations: self.citations,
                        termination: cause,
                    });
                }
            }
        }
    }

    /// Analyst turn: emit a follow-up question or the end signal.
    async fn ask(&mut self) -> Result<(), InterviewError> {
        if self.expert_answers >= self.config.max_turns_per_interview {
            self.state = SessionState::Terminated(TerminationCause::TurnLimit);
            return Ok(());
        }
        self.check_deadline()?;

        let system = QUESTION_INSTRUCTIONS.replace("{persona}", &self.persona.prompt_block());
        let user = if self.turns.is_empty() {
            format!("I'd like to discuss {} with you.", self.topic)
        } else {
            format!(
                "Interview so far:\n\n{}\nAsk your next question, or end the interview.",
                self.render_so_far()
            )
        };

        let request = CompletionRequest::new(system, user);
        let question = with_retry(self.config, "interview.ask", || {
            self.completion.complete(&request)
        })
        .await?;

        if question.contains(END_SIGNAL) {
            self.state = SessionState::Terminated(TerminationCause::EndSignal);
            return Ok(());
        }

        self.turns.push(Turn {
            speaker: Speaker::Analyst,
            text: question,
            references: Vec::new(),
        });
        self.state = SessionState::Answer;
        Ok(())
    }

    /// Expert turn: retrieve evidence for the pending question, answer with
    /// it as context, and keep only the evidence the answer actually cites.
    async fn answer(&mut self) -> Result<(), InterviewError> {
        self.check_deadline()?;

        let question = self
            .turns
            .last()
            .map(|turn| turn.text.clone())
            .unwrap_or_default();

        let evidence = self.retrieve_evidence(&question).await;

        let evidence_block = if evidence.is_empty() {
            "(no evidence retrieved)".to_string()
        } else {
            evidence
                .iter()
                .enumerate()
                .map(|(idx, item)| {
                    format!(
                        "[{}] {} — {}\n    {}",
                        idx + 1,
                        item.title,
                        item.url,
                        item.snippet
                    )
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        let system = ANSWER_INSTRUCTIONS
            .replace("{persona}", &self.persona.prompt_block())
            .replace("{evidence}", &evidence_block);
        let user = format!(
            "Interview so far:\n\n{}\nAnswer the analyst's last question.",
            self.render_so_far()
        );

        let request = CompletionRequest::new(system, user);
        let answer = with_retry(self.config, "interview.answer", || {
            self.completion.complete(&request)
        })
        .await?;

        let references = cited_references(&answer, &evidence);
        for citation in &references {
            if !self.citations.iter().any(|known| known.url == citation.url) {
                self.citations.push(citation.clone());
            }
        }

        self.turns.push(Turn {
            speaker: Speaker::Expert,
            text: answer,
            references,
        });
        self.expert_answers += 1;
        self.state = SessionState::Ask;
        Ok(())
    }

    /// Evidence failures degrade to an uncited answer instead of aborting.
    async fn retrieve_evidence(&self, question: &str) -> Vec<Evidence> {
        let terms = extract_query_terms(question);
        if terms.is_empty() || self.sources.is_empty() {
            return Vec::new();
        }

        match self.evidence.query(&terms, self.sources).await {
            Ok(records) => {
                debug!(terms = %terms, count = records.len(), "evidence retrieved");
                records
            }
            Err(err) => {
                warn!(
                    persona = %self.persona.name,
                    error = %err,
                    "evidence retrieval failed, answering without citations"
                );
                Vec::new()
            }
        }
    }

    fn render_so_far(&self) -> String {
        render_turns(&self.turns)
    }

    fn check_deadline(&self) -> Result<(), InterviewError> {
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(InterviewError::DeadlineExceeded)
            }
            _ => Ok(()),
        }
    }
}

/// Map inline `[n]` markers in `answer` to the evidence numbering of this
/// turn, returning the cited records in marker order. Markers outside the
/// evidence range are ignored here; the section writer strips unresolvable
/// ones later.
fn cited_references(answer: &str, evidence: &[Evidence]) -> Vec<Citation> {
    let mut references: Vec<Citation> = Vec::new();
    for captures in CITATION_MARKER.captures_iter(answer) {
        let Ok(number) = captures[1].parse::<usize>() else {
            continue;
        };
        let Some(record) = number.checked_sub(1).and_then(|idx| evidence.get(idx)) else {
            continue;
        };
        let citation = Citation::from(record);
        if !references.iter().any(|known| known.url == citation.url) {
            references.push(citation);
        }
    }
    references
}
