//! Skip dispatch unless the runtime signal type is allowed.
//!
//! Mostly useful on family handlers that only care about some members:
//!
//! ```ignore
//! fn configure_pipeline(p: &mut Pipeline<dyn OrderEvent>) -> Result<(), ConfigurationError> {
//!     p.use_middleware(SignalTypeFilter::only::<OrderPlaced>().or::<OrderCancelled>());
//!     Ok(())
//! }
//! ```

use std::any::TypeId;

use async_trait::async_trait;
use herald_engine::{
    DispatchResult, MiddlewareContext, SignalMiddleware, SignalType, SignalTypeInfo, SignalView,
};
use tracing::trace;

#[derive(Debug, Clone, Default)]
pub struct SignalTypeFilter {
    allowed: Vec<SignalType>,
}

impl SignalTypeFilter {
    pub fn only<T: ?Sized + 'static>() -> Self {
        Self::default().or::<T>()
    }

    pub fn or<T: ?Sized + 'static>(mut self) -> Self {
        let signal_type = SignalType::of::<T>();
        if !self.allowed.contains(&signal_type) {
            self.allowed.push(signal_type);
        }
        self
    }

    /// Matches on the concrete type only, never on families.
    pub fn allows(&self, signal_type: &SignalTypeInfo) -> bool {
        self.allows_id(signal_type.concrete().id())
    }

    fn allows_id(&self, id: TypeId) -> bool {
        self.allowed.iter().any(|allowed| allowed.id() == id)
    }

    pub fn allowed(&self) -> &[SignalType] {
        &self.allowed
    }
}

#[async_trait]
impl<S: ?Sized + SignalView> SignalMiddleware<S> for SignalTypeFilter {
    async fn execute(&self, ctx: MiddlewareContext<S>) -> DispatchResult {
        if self.allows(ctx.signal_type()) {
            return ctx.proceed().await;
        }
        trace!(
            signal = %ctx.signal_type().concrete(),
            "signal type filtered out"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Placed;
    #[derive(Debug)]
    struct Shipped;

    #[test]
    fn allow_list_deduplicates() {
        let filter = SignalTypeFilter::only::<Placed>().or::<Shipped>().or::<Placed>();
        assert_eq!(filter.allowed().len(), 2);
        assert!(filter.allows_id(TypeId::of::<Placed>()));
        assert!(filter.allows_id(TypeId::of::<Shipped>()));
        assert!(!filter.allows_id(TypeId::of::<u32>()));
    }

    #[test]
    fn empty_filter_allows_nothing() {
        assert!(!SignalTypeFilter::default().allows_id(TypeId::of::<Placed>()));
    }
}
