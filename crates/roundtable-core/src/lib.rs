//! Roundtable core: multi-analyst interview-and-synthesis pipeline.
//!
//! A research run fans out one bounded interview per generated analyst
//! persona, condenses each transcript into a cited section, and compiles the
//! sections into a single report with globally deduplicated citations. The
//! language-model and evidence-retrieval backends are consumed through the
//! [`CompletionService`] and [`EvidenceProvider`] traits.

mod completion;
mod config;
mod error;
mod events;
mod evidence;
mod interview;
mod orchestrator;
mod persona;
mod report;
mod runlog;
mod section;
mod security;
mod telemetry;

pub use completion::{CompletionRequest, CompletionService, with_retry};
pub use config::{Config, ConfigLoader, EvidenceConfig, LlmConfig, LoggingConfig, ResearchConfig};
pub use error::{
    CompletionError, EvidenceError, InterviewError, RoundtableError, SectionError,
};
pub use events::{Event, EventCollector, SessionOutcome};
pub use evidence::{
    Citation, Evidence, EvidenceProvider, SourceName, extract_query_terms,
};
pub use interview::{
    END_SIGNAL, InterviewSession, Speaker, TerminationCause, Transcript, Turn,
};
pub use orchestrator::Orchestrator;
pub use persona::{Persona, PersonaGenerator};
pub use report::{Report, ReportCompiler};
pub use runlog::persist_run_record;
pub use section::{Section, SectionWriter};
pub use security::{SecretValue, require_env};
pub use telemetry::{TelemetryOptions, init_telemetry};
