use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::fields::{text_field, FieldMap, FieldValue};

pub const DEFAULT_BRIEF_SUMMARY: &str = "Intake submitted";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulingPreference {
    pub option: Option<String>,
    pub booking_url: Option<String>,
    pub preferred_times: Option<String>,
    pub timezone: Option<String>,
    pub preferred_contact_channel: Option<String>,
    pub skipped: bool,
}

/// Denormalized snapshot of a finished intake for downstream consumers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntakeBrief {
    pub id: String,
    pub conversation_id: String,
    pub summary: String,
    pub goals: Option<String>,
    pub constraints: Option<String>,
    pub timeline: Option<String>,
    pub budget: Option<String>,
    pub scheduling: SchedulingPreference,
    pub created_at: DateTime<Utc>,
}

impl IntakeBrief {
    pub fn derive(conversation_id: impl Into<String>, fields: &FieldMap) -> Self {
        let owned = |key: &str| text_field(fields, key).map(str::to_string);

        let summary = owned("summary")
            .or_else(|| owned("needs_summary"))
            .unwrap_or_else(|| DEFAULT_BRIEF_SUMMARY.to_string());

        let mut constraint_lines = Vec::new();
        if let Some(urgency) = text_field(fields, "urgency") {
            constraint_lines.push(format!("Urgency: {urgency}"));
        }
        if let Some(budget) = text_field(fields, "budget_band") {
            constraint_lines.push(format!("Budget: {budget}"));
        }

        let scheduling = SchedulingPreference {
            option: owned("scheduling_option"),
            booking_url: owned("booking_url"),
            preferred_times: owned("preferred_times"),
            timezone: owned("timezone"),
            preferred_contact_channel: owned("preferred_contact_channel"),
            skipped: fields.get("skip_scheduling").is_some_and(FieldValue::is_truthy),
        };

        Self {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.into(),
            summary,
            goals: owned("needs_summary"),
            constraints: (!constraint_lines.is_empty()).then(|| constraint_lines.join("\n")),
            timeline: owned("urgency"),
            budget: owned("budget_band"),
            scheduling,
            created_at: Utc::now(),
        }
    }

    pub fn scheduling_json(&self) -> String {
        serde_json::to_string(&self.scheduling).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::{IntakeBrief, DEFAULT_BRIEF_SUMMARY};
    use crate::domain::fields::FieldMap;

    fn fields(pairs: &[(&str, &str)]) -> FieldMap {
        pairs.iter().map(|(key, value)| (key.to_string(), (*value).into())).collect()
    }

    #[test]
    fn summary_prefers_explicit_then_needs_then_default() {
        let explicit = fields(&[("summary", "Done"), ("needs_summary", "Need a site")]);
        let needs_only = fields(&[("needs_summary", "Need a site")]);
        let blank = fields(&[("summary", "  ")]);

        assert_eq!(IntakeBrief::derive("c", &explicit).summary, "Done");
        assert_eq!(IntakeBrief::derive("c", &needs_only).summary, "Need a site");
        assert_eq!(IntakeBrief::derive("c", &blank).summary, DEFAULT_BRIEF_SUMMARY);
    }

    #[test]
    fn constraints_and_scheduling_are_collected() {
        let brief = IntakeBrief::derive(
            "conv-1",
            &fields(&[
                ("needs_summary", "Booking flow"),
                ("urgency", "Soon"),
                ("budget_band", "$5k-$10k"),
                ("preferred_times", "Tue mornings"),
                ("timezone", "Europe/Berlin"),
            ]),
        );

        assert_eq!(brief.goals.as_deref(), Some("Booking flow"));
        assert_eq!(brief.constraints.as_deref(), Some("Urgency: Soon\nBudget: $5k-$10k"));
        assert_eq!(brief.timeline.as_deref(), Some("Soon"));
        assert_eq!(brief.scheduling.timezone.as_deref(), Some("Europe/Berlin"));
        assert!(!brief.scheduling.skipped);
        assert!(brief.scheduling_json().contains("Tue mornings"));
    }
}
