//! Form step state machine: which step of the wizard a session is on.

use serde::{Deserialize, Serialize};

/// The steps of the merchant form.
///
/// Progresses linearly: Personal → Business → Financial → Submitted.
/// `Submitted` is terminal; the session no longer exists once reached.
/// Serialized as the step number (1..=4) to match the client's step pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum FormStep {
    #[default]
    Personal,
    Business,
    Financial,
    Submitted,
}

impl FormStep {
    /// Check if a transition from `self` to `target` is valid.
    ///
    /// Forward edges advance one step. Back edges go one step back and are
    /// never allowed out of `Submitted`.
    pub fn can_transition_to(&self, target: FormStep) -> bool {
        use FormStep::*;
        matches!(
            (self, target),
            (Personal, Business)
                | (Business, Financial)
                | (Financial, Submitted)
                | (Business, Personal)
                | (Financial, Business)
        )
    }

    /// Whether this step is terminal (form has been submitted).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted)
    }

    /// Next step in the linear progression, if any.
    pub fn next(&self) -> Option<FormStep> {
        use FormStep::*;
        match self {
            Personal => Some(Business),
            Business => Some(Financial),
            Financial => Some(Submitted),
            Submitted => None,
        }
    }

    /// Previous step for "Back" navigation, if any.
    pub fn prev(&self) -> Option<FormStep> {
        use FormStep::*;
        match self {
            Personal | Submitted => None,
            Business => Some(Personal),
            Financial => Some(Business),
        }
    }

    /// One-based step number.
    pub fn number(&self) -> u8 {
        match self {
            Self::Personal => 1,
            Self::Business => 2,
            Self::Financial => 3,
            Self::Submitted => 4,
        }
    }

    /// Key used in `completed_steps` for this step (`step1`..`step3`).
    pub fn completion_key(&self) -> Option<&'static str> {
        match self {
            Self::Personal => Some("step1"),
            Self::Business => Some("step2"),
            Self::Financial => Some("step3"),
            Self::Submitted => None,
        }
    }
}

impl TryFrom<u8> for FormStep {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(Self::Personal),
            2 => Ok(Self::Business),
            3 => Ok(Self::Financial),
            4 => Ok(Self::Submitted),
            other => Err(format!("Invalid form step: {other}")),
        }
    }
}

impl From<FormStep> for u8 {
    fn from(step: FormStep) -> Self {
        step.number()
    }
}

impl std::fmt::Display for FormStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Personal => "personal",
            Self::Business => "business",
            Self::Financial => "financial",
            Self::Submitted => "submitted",
        };
        write!(f, "{s}")
    }
}

const INPUT_STEPS: [FormStep; 3] = [FormStep::Personal, FormStep::Business, FormStep::Financial];

/// Completion flags per step, stored alongside the form data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedSteps {
    #[serde(default)]
    pub step1: bool,
    #[serde(default)]
    pub step2: bool,
    #[serde(default)]
    pub step3: bool,
}

impl CompletedSteps {
    pub fn is_completed(&self, step: FormStep) -> bool {
        match step {
            FormStep::Personal => self.step1,
            FormStep::Business => self.step2,
            FormStep::Financial => self.step3,
            FormStep::Submitted => false,
        }
    }

    pub fn mark(&mut self, step: FormStep) {
        match step {
            FormStep::Personal => self.step1 = true,
            FormStep::Business => self.step2 = true,
            FormStep::Financial => self.step3 = true,
            FormStep::Submitted => {}
        }
    }

    /// All incomplete steps, as `stepN` keys.
    pub fn missing(&self) -> Vec<String> {
        INPUT_STEPS
            .into_iter()
            .filter(|s| !self.is_completed(*s))
            .filter_map(|s| s.completion_key().map(String::from))
            .collect()
    }

    pub fn all_completed(&self) -> bool {
        self.step1 && self.step2 && self.step3
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_transitions() {
        use FormStep::*;
        let transitions = [
            (Personal, Business),
            (Business, Financial),
            (Financial, Submitted),
            (Business, Personal),
            (Financial, Business),
        ];
        for (from, to) in transitions {
            assert!(from.can_transition_to(to), "{from} should transition to {to}");
        }
    }

    #[test]
    fn invalid_transitions() {
        use FormStep::*;
        // Skip steps
        assert!(!Personal.can_transition_to(Financial));
        assert!(!Personal.can_transition_to(Submitted));
        // Leave the terminal step
        assert!(!Submitted.can_transition_to(Financial));
        assert!(!Submitted.can_transition_to(Personal));
        // Self-transition
        assert!(!Business.can_transition_to(Business));
    }

    #[test]
    fn next_and_prev_walk_all_steps() {
        use FormStep::*;
        let mut current = Personal;
        for expected in [Business, Financial, Submitted] {
            let next = current.next().unwrap();
            assert_eq!(next, expected);
            current = next;
        }
        assert!(current.next().is_none());
        assert!(current.prev().is_none());

        assert_eq!(Financial.prev(), Some(Business));
        assert_eq!(Business.prev(), Some(Personal));
        assert!(Personal.prev().is_none());
    }

    #[test]
    fn is_terminal() {
        assert!(FormStep::Submitted.is_terminal());
        assert!(!FormStep::Personal.is_terminal());
        assert!(!FormStep::Financial.is_terminal());
    }

    #[test]
    fn serializes_as_step_number() {
        assert_eq!(serde_json::to_string(&FormStep::Business).unwrap(), "2");
        let parsed: FormStep = serde_json::from_str("3").unwrap();
        assert_eq!(parsed, FormStep::Financial);
        assert!(serde_json::from_str::<FormStep>("7").is_err());
    }

    #[test]
    fn missing_lists_incomplete_steps() {
        let mut done = CompletedSteps::default();
        assert_eq!(done.missing(), vec!["step1", "step2", "step3"]);

        done.mark(FormStep::Personal);
        assert_eq!(done.missing(), vec!["step2", "step3"]);

        done.mark(FormStep::Business);
        done.mark(FormStep::Financial);
        assert!(done.all_completed());
        assert!(done.missing().is_empty());
    }
}
