use thiserror::Error;

use crate::domain::fields::{FieldMap, FieldValue};
use crate::flows::states::{IntakeState, SenderRole, TransitionOutcome};

const SKIP_TRUTHY_VALUES: [&str; 3] = ["true", "1", "yes"];
const SCHEDULING_TIME_FIELDS: [&str; 2] = ["preferred_times", "timezone"];

pub trait FlowDefinition {
    fn initial_state(&self) -> IntakeState;
    fn required_fields(&self, state: IntakeState) -> &'static [&'static str];
    fn validate(&self, state: IntakeState, fields: &FieldMap) -> Result<(), FlowTransitionError>;
    fn next(&self, state: IntakeState, fields: &FieldMap) -> IntakeState;
}

/// The prospect intake interview: WELCOME through SUBMIT with the client
/// short-circuit and the optional scheduling step.
#[derive(Clone, Debug, Default)]
pub struct ProspectIntakeFlow;

impl FlowDefinition for ProspectIntakeFlow {
    fn initial_state(&self) -> IntakeState {
        IntakeState::Welcome
    }

    fn required_fields(&self, state: IntakeState) -> &'static [&'static str] {
        match state {
            IntakeState::ModeSelect => &["mode"],
            IntakeState::Identity => &["full_name", "email"],
            IntakeState::BusinessContext => &["business_name"],
            IntakeState::Needs => &["needs_summary"],
            IntakeState::Scheduling => &SCHEDULING_TIME_FIELDS,
            IntakeState::Welcome | IntakeState::Summary | IntakeState::Submit => &[],
        }
    }

    fn validate(&self, state: IntakeState, fields: &FieldMap) -> Result<(), FlowTransitionError> {
        validate_required_fields(self, state, fields)
    }

    fn next(&self, state: IntakeState, fields: &FieldMap) -> IntakeState {
        next_state(state, fields)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> IntakeState {
        self.flow.initial_state()
    }

    /// Validate-then-advance for one turn. Non-contact turns and turns on a
    /// terminal conversation never validate and never move the state.
    pub fn apply(
        &self,
        current: IntakeState,
        role: SenderRole,
        fields: &FieldMap,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        if role != SenderRole::Contact || current.is_terminal() {
            return Ok(TransitionOutcome { from: current, to: current, reached_terminal: false });
        }

        self.flow.validate(current, fields)?;
        let to = self.flow.next(current, fields);
        Ok(TransitionOutcome { from: current, to, reached_terminal: to.is_terminal() })
    }

    pub fn validate(
        &self,
        state: IntakeState,
        fields: &FieldMap,
    ) -> Result<(), FlowTransitionError> {
        self.flow.validate(state, fields)
    }

    pub fn next(&self, state: IntakeState, fields: &FieldMap) -> IntakeState {
        self.flow.next(state, fields)
    }
}

impl Default for FlowEngine<ProspectIntakeFlow> {
    fn default() -> Self {
        Self::new(ProspectIntakeFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("missing required fields for {state}: {missing_fields:?}")]
    MissingRequiredFields { state: IntakeState, missing_fields: Vec<String> },
}

pub fn next_state(current: IntakeState, fields: &FieldMap) -> IntakeState {
    match current {
        IntakeState::Welcome => IntakeState::ModeSelect,
        IntakeState::ModeSelect if is_client_mode(fields) => IntakeState::Submit,
        IntakeState::Needs if skip_scheduling(fields) => IntakeState::Summary,
        IntakeState::Needs => IntakeState::Scheduling,
        IntakeState::Submit => IntakeState::Submit,
        other => other.successor(),
    }
}

fn validate_required_fields<F>(
    flow: &F,
    state: IntakeState,
    fields: &FieldMap,
) -> Result<(), FlowTransitionError>
where
    F: FlowDefinition + ?Sized,
{
    if state == IntakeState::Scheduling {
        return validate_scheduling(fields);
    }

    let missing_fields: Vec<String> = flow
        .required_fields(state)
        .iter()
        .filter(|key| !is_present(fields, key))
        .map(|key| key.to_string())
        .collect();

    if missing_fields.is_empty() {
        Ok(())
    } else {
        Err(FlowTransitionError::MissingRequiredFields { state, missing_fields })
    }
}

fn validate_scheduling(fields: &FieldMap) -> Result<(), FlowTransitionError> {
    let uses_link = fields
        .get("scheduling_option")
        .and_then(FieldValue::as_text)
        .is_some_and(|option| option.trim() == "link");
    if uses_link {
        return Ok(());
    }

    let missing_fields: Vec<String> = SCHEDULING_TIME_FIELDS
        .iter()
        .filter(|key| !is_present(fields, key))
        .map(|key| key.to_string())
        .collect();

    if missing_fields.is_empty() {
        Ok(())
    } else {
        Err(FlowTransitionError::MissingRequiredFields {
            state: IntakeState::Scheduling,
            missing_fields,
        })
    }
}

fn is_present(fields: &FieldMap, key: &str) -> bool {
    fields.get(key).is_some_and(FieldValue::is_truthy)
}

fn is_client_mode(fields: &FieldMap) -> bool {
    fields
        .get("mode")
        .and_then(FieldValue::as_text)
        .is_some_and(|mode| mode.trim().eq_ignore_ascii_case("client"))
}

fn skip_scheduling(fields: &FieldMap) -> bool {
    fields
        .get("skip_scheduling")
        .and_then(FieldValue::display_scalar)
        .map(|value| value.trim().to_ascii_lowercase())
        .is_some_and(|value| SKIP_TRUTHY_VALUES.contains(&value.as_str()))
}

#[cfg(test)]
mod tests {
    use crate::domain::fields::{FieldMap, FieldValue};
    use crate::flows::engine::{next_state, FlowEngine, FlowTransitionError};
    use crate::flows::states::{IntakeState, SenderRole};

    fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
        pairs.iter().map(|(key, value)| (key.to_string(), value.clone())).collect()
    }

    #[test]
    fn empty_fields_advance_one_step_in_fixed_order() {
        for window in IntakeState::ORDER.windows(2) {
            assert_eq!(next_state(window[0], &FieldMap::new()), window[1], "from {}", window[0]);
        }
    }

    #[test]
    fn client_mode_short_circuits_to_submit() {
        let client = fields(&[("mode", "client".into())]);
        let prospect = fields(&[("mode", "prospect".into())]);

        assert_eq!(next_state(IntakeState::ModeSelect, &client), IntakeState::Submit);
        assert_eq!(next_state(IntakeState::ModeSelect, &prospect), IntakeState::Identity);
    }

    #[test]
    fn skip_scheduling_jumps_to_summary() {
        let skip = fields(&[("skip_scheduling", "true".into())]);
        let keep = fields(&[("skip_scheduling", "false".into())]);
        let yes = fields(&[("skip_scheduling", "YES".into())]);
        let boolean = fields(&[("skip_scheduling", FieldValue::Bool(true))]);

        assert_eq!(next_state(IntakeState::Needs, &skip), IntakeState::Summary);
        assert_eq!(next_state(IntakeState::Needs, &keep), IntakeState::Scheduling);
        assert_eq!(next_state(IntakeState::Needs, &yes), IntakeState::Summary);
        assert_eq!(next_state(IntakeState::Needs, &boolean), IntakeState::Summary);
    }

    #[test]
    fn submit_is_absorbing() {
        let anything = fields(&[("mode", "client".into()), ("skip_scheduling", "1".into())]);
        assert_eq!(next_state(IntakeState::Submit, &anything), IntakeState::Submit);
        assert_eq!(next_state(IntakeState::Submit, &FieldMap::new()), IntakeState::Submit);
    }

    #[test]
    fn scheduling_link_option_needs_nothing_else() {
        let engine = FlowEngine::default();
        let link = fields(&[("scheduling_option", "link".into())]);

        assert_eq!(engine.validate(IntakeState::Scheduling, &link), Ok(()));
    }

    #[test]
    fn scheduling_windows_report_exactly_the_missing_field() {
        let engine = FlowEngine::default();
        let partial = fields(&[("preferred_times", "tomorrow".into())]);
        let complete = fields(&[
            ("preferred_times", "tomorrow".into()),
            ("timezone", "America/Los_Angeles".into()),
        ]);

        assert_eq!(
            engine.validate(IntakeState::Scheduling, &partial),
            Err(FlowTransitionError::MissingRequiredFields {
                state: IntakeState::Scheduling,
                missing_fields: vec!["timezone".to_string()],
            })
        );
        assert_eq!(engine.validate(IntakeState::Scheduling, &complete), Ok(()));
    }

    #[test]
    fn identity_requires_non_empty_name_and_email() {
        let engine = FlowEngine::default();
        let blank_email = fields(&[("full_name", "Ada".into()), ("email", "".into())]);

        let error = engine
            .validate(IntakeState::Identity, &blank_email)
            .expect_err("blank email must fail");
        assert_eq!(
            error,
            FlowTransitionError::MissingRequiredFields {
                state: IntakeState::Identity,
                missing_fields: vec!["email".to_string()],
            }
        );
    }

    #[test]
    fn non_contact_turns_bypass_validation_and_do_not_advance() {
        let engine = FlowEngine::default();

        let outcome = engine
            .apply(IntakeState::Identity, SenderRole::System, &FieldMap::new())
            .expect("system turns never fail validation");

        assert_eq!(outcome.to, IntakeState::Identity);
        assert!(!outcome.reached_terminal);
    }

    #[test]
    fn contact_turn_into_submit_reports_terminal() {
        let engine = FlowEngine::default();
        let summary = fields(&[("summary", "All set".into())]);

        let outcome =
            engine.apply(IntakeState::Summary, SenderRole::Contact, &summary).expect("advance");
        assert_eq!(outcome.to, IntakeState::Submit);
        assert!(outcome.reached_terminal);

        let again =
            engine.apply(IntakeState::Submit, SenderRole::Contact, &summary).expect("absorbing");
        assert!(!again.reached_terminal);
    }

    #[test]
    fn failed_validation_does_not_produce_a_transition() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(IntakeState::Needs, SenderRole::Contact, &FieldMap::new())
            .expect_err("needs_summary is required");

        assert!(matches!(
            error,
            FlowTransitionError::MissingRequiredFields { state: IntakeState::Needs, .. }
        ));
    }
}
