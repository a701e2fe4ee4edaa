//! Offline stand-in backends so the pipeline can be exercised end to end
//! without network credentials. Real language-model and scraper backends plug
//! in through the same two traits.

use async_trait::async_trait;
use roundtable_core::{
    CompletionError, CompletionRequest, CompletionService, END_SIGNAL, Evidence, EvidenceError,
    EvidenceProvider, SourceName,
};

const ROLES: &[(&str, &str, &str)] = &[
    (
        "Morgan Hale",
        "Market Insights Group",
        "industry analyst focused on commercial adoption and market structure",
    ),
    (
        "Priya Raman",
        "Applied Research Lab",
        "research analyst focused on the underlying technology and its limits",
    ),
    (
        "Jonas Keller",
        "Policy Forum",
        "policy analyst focused on regulation and public-interest tradeoffs",
    ),
];

/// Deterministic completion backend with canned responses keyed off the
/// prompt's role preamble.
pub struct StubCompletion;

#[async_trait]
impl CompletionService for StubCompletion {
    async fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let focus = field(&request.system, "Focus:").unwrap_or("the topic");

        if request.system.contains("interviewing an expert") {
            // One question per session, then close.
            if request.user.contains("Expert:") {
                return Ok(format!("{END_SIGNAL}! That gives me what I need."));
            }
            return Ok(format!(
                "To start with the part I care most about: what is the current state of {focus}, \
                 and what is changing fastest?"
            ));
        }

        if request.system.contains("being interviewed by an analyst") {
            if request.system.contains("(no evidence retrieved)") {
                return Ok(format!(
                    "Speaking generally about {focus}: the fundamentals are moving faster than \
                     most observers expected, though reliable figures remain scarce."
                ));
            }
            return Ok(format!(
                "The clearest signal on {focus} is in the most recent coverage [1]. The pace of \
                 change there has outrun earlier projections."
            ));
        }

        if request.system.contains("condensing an expert interview") {
            let role = field(&request.system, "Role:").unwrap_or("Analyst perspective");
            return Ok(format!(
                "{role}\n\nThe interview surfaced one dominant theme: recent developments are \
                 outpacing expectations, and the most current reporting bears this out [1]. The \
                 expert cautioned that hard numbers remain thin."
            ));
        }

        if request.system.contains("opening a research report") {
            return Ok(
                "This report gathers several analyst perspectives on the topic, each grounded \
                 in a focused expert interview. The sections below present their findings in turn."
                    .to_string(),
            );
        }

        if request.system.contains("closing a research report") {
            return Ok(
                "Across every perspective the same pattern recurs: movement is faster than \
                 expected and evidence is thinner than anyone would like. Both points argue for \
                 revisiting this topic soon."
                    .to_string(),
            );
        }

        Err(CompletionError::Service(format!(
            "stub backend has no script for this prompt: {}",
            request.user
        )))
    }

    async fn complete_structured(
        &self,
        _: &CompletionRequest,
    ) -> Result<serde_json::Value, CompletionError> {
        let analysts: Vec<serde_json::Value> = ROLES
            .iter()
            .map(|(name, affiliation, focus)| {
                serde_json::json!({
                    "name": name,
                    "affiliation": affiliation,
                    "role": focus.split(" focused").next().unwrap_or("analyst"),
                    "focus": focus,
                })
            })
            .collect();
        Ok(serde_json::json!({ "analysts": analysts }))
    }
}

/// Fabricates one plausible evidence record per requested source.
pub struct StubEvidence;

#[async_trait]
impl EvidenceProvider for StubEvidence {
    async fn query(
        &self,
        search_terms: &str,
        sources: &[SourceName],
    ) -> Result<Vec<Evidence>, EvidenceError> {
        let slug = search_terms.split_whitespace().collect::<Vec<_>>().join("-");
        Ok(sources
            .iter()
            .map(|source| Evidence {
                url: format!("https://{source}.example.com/{slug}"),
                title: format!("{search_terms} ({source})"),
                snippet: format!("Canned result for '{search_terms}' from {source}."),
            })
            .collect())
    }
}

fn field<'a>(system: &'a str, label: &str) -> Option<&'a str> {
    system
        .lines()
        .find_map(|line| line.strip_prefix(label))
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stub_roster_parses_into_personas() {
        let value = StubCompletion
            .complete_structured(&CompletionRequest::new("", ""))
            .await
            .unwrap();
        let analysts = value["analysts"].as_array().unwrap();
        assert_eq!(analysts.len(), 3);
        assert!(analysts.iter().all(|a| !a["focus"].as_str().unwrap().is_empty()));
    }

    #[tokio::test]
    async fn stub_evidence_covers_each_source() {
        let records = StubEvidence
            .query("solid state batteries", &[SourceName::Google, SourceName::Twitter])
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].url.starts_with("https://google.example.com/"));
    }
}
