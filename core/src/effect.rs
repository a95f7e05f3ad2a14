//! Side effect descriptions returned by reducers.
//!
//! Effects are values, not execution. The store that owns a reducer decides
//! when to run them; for the request lifecycle that is always after the write
//! lock on the ledger has been released.

use std::future::Future;
use std::pin::Pin;

/// A side effect to be executed after a state change.
///
/// # Type Parameters
///
/// - `Action`: The action type a completed effect may feed back into the reducer
pub enum Effect<Action> {
    /// No-op effect
    None,

    /// Run effects concurrently
    Parallel(Vec<Effect<Action>>),

    /// Run effects one after another
    Sequential(Vec<Effect<Action>>),

    /// Arbitrary async computation.
    ///
    /// If the future resolves to `Some(action)`, the action is dispatched back
    /// into the reducer.
    Future(Pin<Box<dyn Future<Output = Option<Action>> + Send>>),
}

// Manual Debug implementation since Future doesn't implement Debug
impl<Action> std::fmt::Debug for Effect<Action>
where
    Action: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Effect::None => write!(f, "Effect::None"),
            Effect::Parallel(effects) => f.debug_tuple("Effect::Parallel").field(effects).finish(),
            Effect::Sequential(effects) => {
                f.debug_tuple("Effect::Sequential").field(effects).finish()
            },
            Effect::Future(_) => write!(f, "Effect::Future(<future>)"),
        }
    }
}

impl<Action> Effect<Action> {
    /// Combine effects to run in parallel
    #[must_use]
    pub const fn merge(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Parallel(effects)
    }

    /// Chain effects to run sequentially
    #[must_use]
    pub const fn chain(effects: Vec<Effect<Action>>) -> Effect<Action> {
        Effect::Sequential(effects)
    }

    /// Returns `true` if this effect does nothing when executed.
    #[must_use]
    pub fn is_none(&self) -> bool {
        match self {
            Effect::None => true,
            Effect::Parallel(effects) | Effect::Sequential(effects) => {
                effects.iter().all(Effect::is_none)
            },
            Effect::Future(_) => false,
        }
    }
}

/// Create an `Effect::Future` from an async block body.
///
/// # Example
///
/// ```rust,ignore
/// use bloodbank_core::async_effect;
///
/// async_effect! {
///     notifier.notify(notification).await.ok();
///     None
/// }
/// ```
#[macro_export]
macro_rules! async_effect {
    ($($body:tt)*) => {
        $crate::effect::Effect::Future(
            ::std::boxed::Box::pin(async move { $($body)* })
        )
    };
}

#[cfg(test)]
mod tests {
    use super::Effect;

    #[derive(Clone, Debug)]
    enum TestAction {
        Recorded,
    }

    #[test]
    fn async_effect_macro_builds_future() {
        let effect = crate::async_effect! {
            Some(TestAction::Recorded)
        };

        assert!(matches!(effect, Effect::Future(_)));
        assert!(!effect.is_none());
    }

    #[test]
    fn nested_none_effects_are_none() {
        let effect: Effect<TestAction> = Effect::merge(vec![
            Effect::None,
            Effect::chain(vec![Effect::None, Effect::None]),
        ]);

        assert!(effect.is_none());
    }

    #[tokio::test]
    async fn future_effect_feeds_back_action() {
        let effect = crate::async_effect! {
            Some(TestAction::Recorded)
        };

        let Effect::Future(fut) = effect else {
            unreachable!("async_effect! always builds a future");
        };
        assert!(matches!(fut.await, Some(TestAction::Recorded)));
    }
}
