//! Façade event stream: a typed observer channel over the Brain's
//! lifecycle. Every [`Event`] variant mirrors one of the façade's public
//! operations, carrying just enough payload for a subscriber to know what
//! happened without re-querying the Store.

use crate::error::CoreError;
use crate::validator::ValidationOutcome;

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum Event {
    Encode { episode_id: String },
    Reinforcement { semantic_id: String },
    Contradiction { contradiction_id: String },
    Consolidation { run_id: String, clusters_found: usize, principles_extracted: usize },
    Decay { transitioned_to_dormant: u64 },
    Rollback { run_id: String, rolled_back_memories: u64 },
    Error { message: String },
}

impl Event {
    pub fn error(error: &CoreError) -> Self {
        Event::Error { message: error.to_string() }
    }

    /// The detached post-encode Validator task reports its outcome this
    /// way; `ValidationOutcome::None` emits nothing.
    pub fn from_validation_outcome(outcome: &ValidationOutcome) -> Option<Self> {
        match outcome {
            ValidationOutcome::Reinforced { semantic_id } => Some(Event::Reinforcement { semantic_id: semantic_id.clone() }),
            ValidationOutcome::Contradiction { contradiction_id } => {
                Some(Event::Contradiction { contradiction_id: contradiction_id.clone() })
            }
            ValidationOutcome::None => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_event_carries_the_display_message() {
        let error = CoreError::NotFound("run r1 not found".into());
        let event = Event::error(&error);
        match event {
            Event::Error { message } => assert!(message.contains("r1")),
            _ => panic!("expected Event::Error"),
        }
    }

    #[test]
    fn none_outcome_emits_no_event() {
        assert!(Event::from_validation_outcome(&ValidationOutcome::None).is_none());
    }

    #[test]
    fn reinforced_outcome_emits_reinforcement_event() {
        let outcome = ValidationOutcome::Reinforced { semantic_id: "m-1".into() };
        assert!(matches!(Event::from_validation_outcome(&outcome), Some(Event::Reinforcement { .. })));
    }
}
