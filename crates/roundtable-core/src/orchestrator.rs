//! Run-level sequencing: persona generation, concurrent bounded interview
//! fan-out, section-writer fan-out, and report compilation.
//!
//! Fan-out uses a `JoinSet` with a semaphore bound so in-flight work never
//! exceeds `max_concurrent_sessions`, respecting downstream rate limits.
//! Completion order is irrelevant: results carry their persona index and are
//! re-sorted before compilation, so section order is deterministic.

use std::sync::Arc;
use std::time::Instant as WallInstant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{Instant, timeout_at};
use tracing::{info, instrument, warn};

use crate::RoundtableError;
use crate::completion::CompletionService;
use crate::config::ResearchConfig;
use crate::events::{EventCollector, SessionOutcome};
use crate::evidence::{EvidenceProvider, SourceName};
use crate::interview::{InterviewSession, Transcript};
use crate::persona::{Persona, PersonaGenerator};
use crate::report::{Report, ReportCompiler};
use crate::section::{Section, SectionWriter};

/// Drives one research run end to end.
pub struct Orchestrator {
    completion: Arc<dyn CompletionService>,
    evidence: Arc<dyn EvidenceProvider>,
    config: ResearchConfig,
    sources: Vec<SourceName>,
    events: EventCollector,
}

impl Orchestrator {
    pub fn new(
        completion: Arc<dyn CompletionService>,
        evidence: Arc<dyn EvidenceProvider>,
        config: ResearchConfig,
        sources: Vec<SourceName>,
        events: EventCollector,
    ) -> Self {
        Self {
            completion,
            evidence,
            config,
            sources,
            events,
        }
    }

    /// Produce a report for `topic`, tolerating partial session failure.
    ///
    /// Fatal outcomes are persona-generation failure and ending up with zero
    /// usable sections; everything else degrades to a thinner report.
    #[instrument(name = "orchestrator.run", skip(self))]
    pub async fn run(&self, topic: &str) -> Result<Report, RoundtableError> {
        let deadline = Instant::now() + self.config.overall_timeout();

        let personas = PersonaGenerator::new(self.completion.as_ref(), &self.config)
            .generate(topic, self.config.max_analysts)
            .await?;
        info!(count = personas.len(), "personas generated");

        let transcripts = self.run_interviews(topic, personas, deadline).await;
        info!(count = transcripts.len(), "interviews completed");

        // The deadline bounds interviewing only: a timed-out run still
        // condenses and compiles whatever transcripts completed.
        let sections = self.write_sections(&transcripts).await;
        info!(count = sections.len(), "sections written");

        ReportCompiler::new(self.completion.as_ref(), &self.config)
            .compile(topic, sections)
            .await
    }

    /// Fan out one interview per persona; fan in successful transcripts in
    /// persona order. Failures are recorded and dropped.
    async fn run_interviews(
        &self,
        topic: &str,
        personas: Vec<Persona>,
        deadline: Instant,
    ) -> Vec<(usize, Transcript)> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_sessions));
        let mut join_set: JoinSet<(usize, String, Result<Transcript, String>, u64)> =
            JoinSet::new();

        for (index, persona) in personas.into_iter().enumerate() {
            let completion = Arc::clone(&self.completion);
            let evidence = Arc::clone(&self.evidence);
            let semaphore = Arc::clone(&semaphore);
            let config = self.config.clone();
            let sources = self.sources.clone();
            let topic = topic.to_string();
            let events = self.events.clone();
            let name = persona.name.clone();

            join_set.spawn(async move {
                // Closed only if the set itself is dropped mid-run.
                let Ok(_permit) = semaphore.acquire().await else {
                    return (index, name, Err("run cancelled".to_string()), 0);
                };
                events.emit_session_started(index, &name);
                let started = WallInstant::now();
                let result = InterviewSession::new(
                    &topic,
                    persona,
                    &config,
                    completion.as_ref(),
                    evidence.as_ref(),
                    &sources,
                    Some(deadline),
                )
                .run()
                .await
                .map_err(|err| err.to_string());
                let duration_ms = started.elapsed().as_millis() as u64;
                (index, name, result, duration_ms)
            });
        }

        let mut transcripts = Vec::new();
        // The deadline backstop: sessions check it cooperatively, but a call
        // already in flight may outlive it; cut the join loop off here.
        while let Ok(Some(joined)) = timeout_at(deadline, join_set.join_next()).await {
            self.collect_interview(joined, &mut transcripts);
        }

        if !join_set.is_empty() {
            // Sessions that terminated before the deadline but were not yet
            // joined are still kept; only unfinished ones are abandoned.
            while let Some(joined) = join_set.try_join_next() {
                self.collect_interview(joined, &mut transcripts);
            }
            if !join_set.is_empty() {
                warn!(
                    unfinished = join_set.len(),
                    "overall timeout elapsed, abandoning unfinished sessions"
                );
                join_set.abort_all();
            }
        }

        transcripts.sort_by_key(|(index, _)| *index);
        transcripts
    }

    fn collect_interview(
        &self,
        joined: Result<(usize, String, Result<Transcript, String>, u64), tokio::task::JoinError>,
        transcripts: &mut Vec<(usize, Transcript)>,
    ) {
        let Ok((index, name, result, duration_ms)) = joined else {
            warn!("interview task panicked or was cancelled");
            return;
        };
        match result {
            Ok(transcript) => {
                self.events.emit_session_finished(
                    index,
                    &name,
                    SessionOutcome::Success,
                    duration_ms,
                );
                transcripts.push((index, transcript));
            }
            Err(reason) => {
                warn!(session = index, persona = %name, %reason, "interview session failed");
                self.events.emit_session_finished(
                    index,
                    &name,
                    SessionOutcome::Failure { reason },
                    duration_ms,
                );
            }
        }
    }

    /// Fan out section writing per transcript; failures reduce the section
    /// set rather than aborting.
    async fn write_sections(&self, transcripts: &[(usize, Transcript)]) -> Vec<Section> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_sessions));
        let mut join_set: JoinSet<(usize, Result<Section, String>)> = JoinSet::new();

        for (index, transcript) in transcripts {
            let completion = Arc::clone(&self.completion);
            let semaphore = Arc::clone(&semaphore);
            let config = self.config.clone();
            let transcript = transcript.clone();
            let index = *index;

            join_set.spawn(async move {
                let Ok(_permit) = semaphore.acquire().await else {
                    return (index, Err("run cancelled".to_string()));
                };
                let result = SectionWriter::new(completion.as_ref(), &config)
                    .write(&transcript)
                    .await
                    .map_err(|err| err.to_string());
                (index, result)
            });
        }

        let mut sections = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            let Ok((index, result)) = joined else {
                warn!("section task panicked or was cancelled");
                continue;
            };
            match result {
                Ok(section) => {
                    self.events
                        .emit_section_finished(index, SessionOutcome::Success);
                    sections.push((index, section));
                }
                Err(reason) => {
                    warn!(section = index, %reason, "section writing failed");
                    self.events
                        .emit_section_finished(index, SessionOutcome::Failure { reason });
                }
            }
        }

        sections.sort_by_key(|(index, _)| *index);
        sections.into_iter().map(|(_, section)| section).collect()
    }
}
