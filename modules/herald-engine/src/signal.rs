//! Signal typing: concrete types, families, and the type-erased view used
//! by the registry and transports.
//!
//! A handler registered for a family (a `dyn Trait` the signal opts into)
//! receives every signal that lists that family as a supertype. Families are
//! declared statically through [`impl_signal!`](crate::impl_signal).

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::ConfigurationError;
use crate::pipeline::Pipeline;

/// Anything a handler or middleware can be typed over: a concrete signal or
/// a family trait object.
pub trait SignalView: fmt::Debug + Send + Sync + 'static {}

impl<T: ?Sized + fmt::Debug + Send + Sync + 'static> SignalView for T {}

/// Identity of a signal type or family.
#[derive(Clone, Copy)]
pub struct SignalType {
    id: TypeId,
    name: &'static str,
}

impl SignalType {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for SignalType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SignalType {}

impl Hash for SignalType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for SignalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Runtime descriptor of a published value.
#[derive(Debug, Clone)]
pub struct SignalTypeInfo {
    concrete: SignalType,
    supertypes: Vec<SignalType>,
}

impl SignalTypeInfo {
    pub fn of<S: Signal>() -> Self {
        Self {
            concrete: SignalType::of::<S>(),
            supertypes: S::supertypes(),
        }
    }

    pub fn concrete(&self) -> SignalType {
        self.concrete
    }

    pub fn supertypes(&self) -> &[SignalType] {
        &self.supertypes
    }

    /// True if a handler declared for `target` should receive this signal.
    pub fn is_assignable_to(&self, target: TypeId) -> bool {
        self.concrete.id == target || self.supertypes.iter().any(|s| s.id == target)
    }
}

/// A publishable value.
///
/// Prefer [`impl_signal!`](crate::impl_signal) for the common cases; implement
/// the trait by hand to attach a default publisher pipeline.
pub trait Signal: SignalView + Sized {
    /// Families this signal belongs to.
    fn supertypes() -> Vec<SignalType> {
        Vec::new()
    }

    /// Produce a boxed `Arc<dyn Family>` for the family with id `target`.
    fn upcast(self: Arc<Self>, target: TypeId) -> Option<Box<dyn Any + Send + Sync>> {
        let _ = target;
        None
    }

    /// Default publisher pipeline, applied before any per-call configuration.
    fn configure_pipeline(pipeline: &mut Pipeline<Self>) -> Result<(), ConfigurationError> {
        let _ = pipeline;
        Ok(())
    }
}

/// Object-safe view of any [`Signal`].
pub trait AnySignal: Send + Sync + 'static {
    fn type_info(&self) -> SignalTypeInfo;

    fn as_debug(&self) -> &dyn fmt::Debug;

    /// Boxed `Arc<V>` where `V` has type id `target`, if assignable.
    fn upcast_to(self: Arc<Self>, target: TypeId) -> Option<Box<dyn Any + Send + Sync>>;
}

impl<T: Signal> AnySignal for T {
    fn type_info(&self) -> SignalTypeInfo {
        SignalTypeInfo::of::<T>()
    }

    fn as_debug(&self) -> &dyn fmt::Debug {
        self
    }

    fn upcast_to(self: Arc<Self>, target: TypeId) -> Option<Box<dyn Any + Send + Sync>> {
        if target == TypeId::of::<T>() {
            return Some(Box::new(self));
        }
        Signal::upcast(self, target)
    }
}

impl fmt::Debug for dyn AnySignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.as_debug().fmt(f)
    }
}

/// View a type-erased signal as `V` (its concrete type or one of its families).
pub fn view_of<V: ?Sized + 'static>(signal: &Arc<dyn AnySignal>) -> Option<Arc<V>> {
    let boxed = Arc::clone(signal).upcast_to(TypeId::of::<V>())?;
    boxed.downcast::<Arc<V>>().ok().map(|view| *view)
}

/// Implement [`Signal`] for a type, optionally listing the family traits it
/// belongs to.
///
/// ```ignore
/// trait OrderEvent: std::fmt::Debug + Send + Sync {}
///
/// #[derive(Debug)]
/// struct OrderPlaced;
/// impl OrderEvent for OrderPlaced {}
///
/// impl_signal!(OrderPlaced: dyn OrderEvent);
/// ```
#[macro_export]
macro_rules! impl_signal {
    ($ty:ty : $($family:ty),+ $(,)?) => {
        impl $crate::Signal for $ty {
            fn supertypes() -> ::std::vec::Vec<$crate::SignalType> {
                ::std::vec![$($crate::SignalType::of::<$family>()),+]
            }

            fn upcast(
                self: ::std::sync::Arc<Self>,
                target: ::std::any::TypeId,
            ) -> ::std::option::Option<
                ::std::boxed::Box<dyn ::std::any::Any + ::std::marker::Send + ::std::marker::Sync>,
            > {
                $(
                    if target == ::std::any::TypeId::of::<$family>() {
                        let view: ::std::sync::Arc<$family> = self;
                        return ::std::option::Option::Some(::std::boxed::Box::new(view));
                    }
                )+
                ::std::option::Option::None
            }
        }
    };
    ($ty:ty) => {
        impl $crate::Signal for $ty {}
    };
}
