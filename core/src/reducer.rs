//! The reducer trait: all state-machine logic lives behind it.

use crate::effect::Effect;
use smallvec::SmallVec;

/// Pure business logic: `(State, Action, Environment) → (State, Effects)`.
///
/// A reducer validates the action against the current state, mutates the
/// state in place when the action is legal, and returns descriptions of the
/// side effects that should follow. It performs no I/O itself.
///
/// Most actions produce zero to two effects, so the return type is a
/// `SmallVec` sized to avoid heap allocation in the common case.
///
/// # Example
///
/// ```ignore
/// impl Reducer for RequestReducer {
///     type State = RequestLedger;
///     type Action = RequestAction;
///     type Environment = RequestEnvironment;
///
///     fn reduce(
///         &self,
///         state: &mut RequestLedger,
///         action: RequestAction,
///         env: &RequestEnvironment,
///     ) -> SmallVec<[Effect<RequestAction>; 4]> {
///         match action {
///             RequestAction::Reject { request_id, reason, .. } => {
///                 // Check pending → rejected is legal, then record the reason
///                 SmallVec::new()
///             }
///             _ => SmallVec::new(),
///         }
///     }
/// }
/// ```
pub trait Reducer {
    /// The state type this reducer operates on
    type State;

    /// The action type this reducer processes
    type Action;

    /// The environment type with injected dependencies
    type Environment;

    /// Reduce an action into state changes and effects.
    ///
    /// # Arguments
    ///
    /// - `state`: Mutable reference to current state
    /// - `action`: The action to process
    /// - `env`: Reference to injected dependencies
    ///
    /// # Returns
    ///
    /// Effects to be executed by the owning store once the state change is visible
    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> SmallVec<[Effect<Self::Action>; 4]>;
}
