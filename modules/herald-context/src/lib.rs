//! Correlation and data carrier threaded through every signal dispatch.
//!
//! A [`Context`] holds three data regions (downstream, upstream, bidirectional)
//! plus a trace id shared by a whole logical operation and a signal id scoped
//! to one publish. Nested dispatch forks the context through a
//! [`ContextScope`] guard, which merges receiver-side changes back into the
//! parent when it is dropped.
//!
//! The [`wire`] module encodes cross-transport entries into a single header
//! value and decodes them back. Zero knowledge of signals or handlers.

pub mod context;
pub mod data;
pub mod error;
pub mod ids;
pub mod wire;

pub use context::{Context, ContextScope, DataRegion, Region};
pub use data::{ContextData, ContextEntry, ContextValue, DataScope};
pub use error::ContextDecodeError;
pub use ids::{new_signal_id, new_trace_id};
pub use wire::{decode, encode_downstream, encode_upstream, HERALD_CONTEXT_HEADER};
