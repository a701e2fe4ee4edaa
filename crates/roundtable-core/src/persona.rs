//! Persona diversification: one structured-output completion produces the
//! bounded set of analyst viewpoints for a research run.

use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};

use crate::RoundtableError;
use crate::completion::{CompletionRequest, CompletionService, with_retry};
use crate::config::ResearchConfig;
use crate::error::CompletionError;

/// A synthesized analyst viewpoint. Immutable after generation; each
/// interview session owns exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub name: String,
    pub affiliation: String,
    pub role: String,
    pub focus: String,
}

impl Persona {
    /// Render the persona block used to bias analyst prompts.
    pub fn prompt_block(&self) -> String {
        format!(
            "Name: {}\nAffiliation: {}\nRole: {}\nFocus: {}\n",
            self.name, self.affiliation, self.role, self.focus
        )
    }
}

/// Schema for the structured persona-roster response.
#[derive(Debug, Deserialize)]
struct PersonaRoster {
    analysts: Vec<Persona>,
}

const PERSONA_INSTRUCTIONS: &str = "You are tasked with creating a set of AI analyst personas. \
Follow these instructions carefully:

1. Review the research topic:
{topic}

2. Determine the most interesting themes based upon the topic.

3. Pick the top {max_analysts} themes, avoiding redundant or overlapping angles.

4. Assign one analyst to each theme.

Respond with a JSON object of the form \
{\"analysts\": [{\"name\": ..., \"affiliation\": ..., \"role\": ..., \"focus\": ...}]} \
where every field is a non-empty string and `focus` describes the analyst's \
concerns and motives.";

/// Generates analyst personas via one structured completion, with a single
/// corrective retry on schema violations.
pub struct PersonaGenerator<'a> {
    completion: &'a dyn CompletionService,
    config: &'a ResearchConfig,
}

impl<'a> PersonaGenerator<'a> {
    pub fn new(completion: &'a dyn CompletionService, config: &'a ResearchConfig) -> Self {
        Self { completion, config }
    }

    /// Produce between 1 and `max_analysts` personas for `topic`.
    #[instrument(name = "persona.generate", skip(self))]
    pub async fn generate(
        &self,
        topic: &str,
        max_analysts: usize,
    ) -> Result<Vec<Persona>, RoundtableError> {
        let system = PERSONA_INSTRUCTIONS
            .replace("{topic}", topic)
            .replace("{max_analysts}", &max_analysts.to_string());
        let request = CompletionRequest::new(
            system,
            format!("Generate up to {max_analysts} analyst personas."),
        );

        match self.request_roster(&request, max_analysts).await {
            Ok(personas) => Ok(personas),
            // Schema violations get one corrective retry; transport failures
            // already consumed their backoff budget inside `request_roster`.
            Err(err @ (CompletionError::Timeout | CompletionError::Service(_))) => {
                Err(RoundtableError::Generation(err.to_string()))
            }
            Err(first_failure) => {
                warn!(error = %first_failure, "persona roster rejected, retrying with correction");
                let corrective = CompletionRequest::new(
                    request.system.clone(),
                    format!(
                        "{}\n\nYour previous response was invalid: {first_failure}. \
                         Respond again with only the corrected JSON object.",
                        request.user
                    ),
                );
                self.request_roster(&corrective, max_analysts)
                    .await
                    .map_err(|err| RoundtableError::Generation(err.to_string()))
            }
        }
    }

    async fn request_roster(
        &self,
        request: &CompletionRequest,
        max_analysts: usize,
    ) -> Result<Vec<Persona>, CompletionError> {
        let value = with_retry(self.config, "persona.roster", || {
            self.completion.complete_structured(request)
        })
        .await?;
        let roster: PersonaRoster = serde_json::from_value(value)
            .map_err(|err| CompletionError::Schema(err.to_string()))?;

        validate_roster(roster, max_analysts)
    }
}

fn validate_roster(
    roster: PersonaRoster,
    max_analysts: usize,
) -> Result<Vec<Persona>, CompletionError> {
    if roster.analysts.is_empty() {
        return Err(CompletionError::Schema(
            "roster must contain at least one persona".into(),
        ));
    }

    for persona in &roster.analysts {
        if persona.name.trim().is_empty()
            || persona.role.trim().is_empty()
            || persona.focus.trim().is_empty()
        {
            return Err(CompletionError::Schema(format!(
                "persona '{}' has empty required fields",
                persona.name
            )));
        }
    }

    // The model is instructed, not trusted, on count. Excess personas are
    // truncated to keep the run bound intact.
    let mut personas = roster.analysts;
    if personas.len() > max_analysts {
        warn!(
            requested = max_analysts,
            returned = personas.len(),
            "model returned too many personas, truncating"
        );
        personas.truncate(max_analysts);
    }

    Ok(personas)
}
