use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::domain::account::Project;
use crate::domain::request::RequestType;

const STOPWORDS: [&str; 11] =
    ["a", "an", "the", "some", "more", "new", "our", "my", "this", "that", "it"];

static INTEGRATION_PATTERN: OnceLock<Regex> = OnceLock::new();

fn integration_pattern() -> &'static Regex {
    INTEGRATION_PATTERN.get_or_init(|| {
        Regex::new(
            r"(?i)\b(?:integrate|connect|add|hook(?:\s+up)?)\s+(?:(?:with|to|into)\s+)?([a-z0-9][\w.-]*)(?:\s+([a-z0-9][\w.-]*))?",
        )
        .expect("valid integration regex")
    })
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddonAssessment {
    pub addon_flag: bool,
    pub rationale: Option<String>,
}

/// Heuristic out-of-scope detector for client requests.
#[derive(Clone, Debug)]
pub struct AddonClassifier {
    urgent_values: Vec<String>,
}

impl AddonClassifier {
    pub fn new<I, S>(urgent_values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            urgent_values: urgent_values
                .into_iter()
                .map(|value| value.as_ref().trim().to_ascii_lowercase())
                .collect(),
        }
    }

    pub fn classify(
        &self,
        project: &Project,
        request_type: RequestType,
        description: &str,
        urgency: &str,
    ) -> AddonAssessment {
        let mut reasons = Vec::new();

        for target in integration_targets(description) {
            if !project.knows_integration(&target) {
                reasons.push(format!("mentions integration with `{target}` not covered by the project"));
            }
        }

        let urgency = urgency.trim().to_ascii_lowercase();
        if !project.same_day_sla && self.urgent_values.contains(&urgency) {
            reasons.push(format!("urgency `{urgency}` requested without a same-day SLA"));
        }

        if request_type == RequestType::New {
            reasons.push("new feature request".to_string());
        }

        if reasons.is_empty() {
            AddonAssessment::default()
        } else {
            AddonAssessment { addon_flag: true, rationale: Some(reasons.join("; ")) }
        }
    }
}

/// Distinct integration targets named after an integration verb, in order of
/// first appearance.
pub fn integration_targets(description: &str) -> Vec<String> {
    let mut targets: Vec<String> = Vec::new();
    for captures in integration_pattern().captures_iter(description) {
        let candidate = [captures.get(1), captures.get(2)]
            .into_iter()
            .flatten()
            .map(|token| token.as_str().trim_end_matches(['.', '-']))
            .find(|token| !token.is_empty() && !is_stopword(token));

        if let Some(target) = candidate {
            if !targets.iter().any(|seen| seen.eq_ignore_ascii_case(target)) {
                targets.push(target.to_string());
            }
        }
    }
    targets
}

fn is_stopword(token: &str) -> bool {
    STOPWORDS.iter().any(|stopword| stopword.eq_ignore_ascii_case(token))
}
