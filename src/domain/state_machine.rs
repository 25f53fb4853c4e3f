use crate::domain::types::{InvocationEvent, InvocationState, TransitionError};

pub fn transition(
    current: &InvocationState,
    event: &InvocationEvent,
) -> Result<InvocationState, TransitionError> {
    match (current, event) {
        (InvocationState::Created, InvocationEvent::PrecheckPassed) => {
            Ok(InvocationState::Prechecked)
        }
        (InvocationState::Prechecked, InvocationEvent::EvaluatePassed) => {
            Ok(InvocationState::Evaluated)
        }
        (InvocationState::Evaluated, InvocationEvent::ExecuteSucceeded) => {
            Ok(InvocationState::Executed)
        }
        (InvocationState::Executed, InvocationEvent::CommitCompleted) => {
            Ok(InvocationState::Committed)
        }
        // Denials are terminal only before any chain interaction.
        (InvocationState::Created, InvocationEvent::Denied { .. }) => Ok(InvocationState::Denied),
        (InvocationState::Prechecked, InvocationEvent::Denied { .. }) => {
            Ok(InvocationState::Denied)
        }
        (InvocationState::Created, InvocationEvent::Failed { .. })
        | (InvocationState::Prechecked, InvocationEvent::Failed { .. })
        | (InvocationState::Evaluated, InvocationEvent::Failed { .. }) => {
            Ok(InvocationState::Failed)
        }
        _ => Err(TransitionError {
            from: current.clone(),
            event: format!("{event:?}"),
            reason: "invalid transition".to_string(),
        }),
    }
}
