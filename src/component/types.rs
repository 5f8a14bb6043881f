use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Lifecycle state of a component. Exactly one holds at a time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum State {
    Disabled,
    Enabled,
    Unsatisfied,
    Activating,
    Active,
    Registered,
    Factory,
    Deactivating,
    Destroyed,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Disabled => "disabled",
            State::Enabled => "enabled",
            State::Unsatisfied => "unsatisfied",
            State::Activating => "activating",
            State::Active => "active",
            State::Registered => "registered",
            State::Factory => "factory",
            State::Deactivating => "deactivating",
            State::Destroyed => "destroyed",
        }
    }

    /// States reached after a successful activation.
    pub fn is_satisfied(&self) -> bool {
        matches!(self, State::Active | State::Registered | State::Factory)
    }

    /// Whether dependency events are acted upon in this state.
    pub(crate) fn handles_events(&self) -> bool {
        matches!(
            self,
            State::Unsatisfied
                | State::Activating
                | State::Active
                | State::Registered
                | State::Factory
                | State::Deactivating
        )
    }

    /// The transition table of the state machine.
    pub fn can_transition_to(&self, target: State) -> bool {
        use State::*;
        matches!(
            (self, target),
            (Disabled, Enabled)
                | (Disabled, Destroyed)
                | (Enabled, Activating)
                | (Enabled, Disabled)
                | (Unsatisfied, Activating)
                | (Unsatisfied, Disabled)
                | (Activating, Unsatisfied)
                | (Activating, Active)
                | (Activating, Registered)
                | (Activating, Factory)
                | (Activating, Deactivating)
                | (Active, Deactivating)
                | (Active, Registered)
                | (Registered, Active)
                | (Registered, Deactivating)
                | (Factory, Deactivating)
                | (Deactivating, Unsatisfied)
        )
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed transition.
#[derive(Clone, Debug, Serialize)]
pub struct StateChange {
    pub from: State,
    pub to: State,
    pub at: DateTime<Utc>,
}

/// Identity of one implementation instance and its private context.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ContextId(pub u64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn satisfied_states() {
        assert!(State::Active.is_satisfied());
        assert!(State::Registered.is_satisfied());
        assert!(State::Factory.is_satisfied());
        assert!(!State::Activating.is_satisfied());
        assert!(!State::Unsatisfied.is_satisfied());
    }

    #[test]
    fn terminal_and_transient_states_ignore_events() {
        for state in [State::Disabled, State::Enabled, State::Destroyed] {
            assert!(!state.handles_events(), "{state}");
        }
        assert!(State::Deactivating.handles_events());
    }

    #[test]
    fn destroyed_is_terminal() {
        for target in [
            State::Disabled,
            State::Enabled,
            State::Unsatisfied,
            State::Activating,
            State::Active,
            State::Destroyed,
        ] {
            assert!(!State::Destroyed.can_transition_to(target));
        }
    }

    #[test]
    fn state_change_serializes_with_timestamp() {
        let change = StateChange {
            from: State::Unsatisfied,
            to: State::Activating,
            at: Utc::now(),
        };
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["from"], "unsatisfied");
        assert_eq!(value["to"], "activating");
        assert!(value["at"].is_string());
    }
}
