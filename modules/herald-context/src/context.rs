//! The shared, mutable context handle and its fork/merge guard.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::trace;

use crate::data::{ContextData, ContextEntry, ContextValue, DataScope};
use crate::ids::{new_signal_id, new_trace_id};

/// Which data region an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Region {
    /// Set by publishers, visible to receivers.
    Downstream,
    /// Set by receivers, visible to the publisher once dispatch completes.
    Upstream,
    /// Visible in both directions.
    Bidirectional,
}

impl Region {
    pub(crate) fn tag(self) -> char {
        match self {
            Region::Downstream => 'd',
            Region::Upstream => 'u',
            Region::Bidirectional => 'b',
        }
    }

    pub(crate) fn from_tag(tag: char) -> Option<Self> {
        match tag {
            'd' => Some(Region::Downstream),
            'u' => Some(Region::Upstream),
            'b' => Some(Region::Bidirectional),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
struct ContextState {
    trace_id: String,
    signal_id: Option<String>,
    downstream: ContextData,
    upstream: ContextData,
    bidirectional: ContextData,
}

impl ContextState {
    fn region(&self, region: Region) -> &ContextData {
        match region {
            Region::Downstream => &self.downstream,
            Region::Upstream => &self.upstream,
            Region::Bidirectional => &self.bidirectional,
        }
    }

    fn region_mut(&mut self, region: Region) -> &mut ContextData {
        match region {
            Region::Downstream => &mut self.downstream,
            Region::Upstream => &mut self.upstream,
            Region::Bidirectional => &mut self.bidirectional,
        }
    }
}

/// Cheaply clonable handle; clones share state.
#[derive(Clone)]
pub struct Context {
    state: Arc<Mutex<ContextState>>,
}

impl Context {
    /// A fresh context with a new trace id and no signal id.
    pub fn new() -> Self {
        Self::from_state(ContextState {
            trace_id: new_trace_id(),
            signal_id: None,
            downstream: ContextData::new(),
            upstream: ContextData::new(),
            bidirectional: ContextData::new(),
        })
    }

    fn from_state(state: ContextState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ContextState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn trace_id(&self) -> String {
        self.lock().trace_id.clone()
    }

    pub fn set_trace_id(&self, trace_id: impl Into<String>) {
        self.lock().trace_id = trace_id.into();
    }

    pub fn signal_id(&self) -> Option<String> {
        self.lock().signal_id.clone()
    }

    pub fn set_signal_id(&self, signal_id: impl Into<String>) {
        self.lock().signal_id = Some(signal_id.into());
    }

    /// Replace the signal id with a freshly generated one and return it.
    pub fn mint_signal_id(&self) -> String {
        let id = new_signal_id();
        self.set_signal_id(id.clone());
        id
    }

    pub fn downstream(&self) -> DataRegion<'_> {
        self.region(Region::Downstream)
    }

    pub fn upstream(&self) -> DataRegion<'_> {
        self.region(Region::Upstream)
    }

    pub fn bidirectional(&self) -> DataRegion<'_> {
        self.region(Region::Bidirectional)
    }

    pub fn region(&self, region: Region) -> DataRegion<'_> {
        DataRegion { ctx: self, region }
    }

    /// True if both handles point at the same state.
    pub fn ptr_eq(&self, other: &Context) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }

    /// Fork a child context for a nested operation.
    ///
    /// The child starts with this context's ids, downstream and bidirectional
    /// data; upstream starts empty. Dropping the returned scope merges the
    /// child's upstream entries and bidirectional changes back into `self`.
    pub fn fork(&self) -> ContextScope {
        let parent = self.lock();
        let child = Context::from_state(ContextState {
            trace_id: parent.trace_id.clone(),
            signal_id: parent.signal_id.clone(),
            downstream: parent.downstream.clone(),
            upstream: ContextData::new(),
            bidirectional: parent.bidirectional.clone(),
        });
        let baseline = parent.bidirectional.clone();
        drop(parent);

        ContextScope {
            child,
            parent: Some(self.clone()),
            baseline,
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("Context")
            .field("trace_id", &state.trace_id)
            .field("signal_id", &state.signal_id)
            .field("downstream", &state.downstream.len())
            .field("upstream", &state.upstream.len())
            .field("bidirectional", &state.bidirectional.len())
            .finish()
    }
}

/// Borrowed view of one region of a [`Context`]. Every call locks briefly.
pub struct DataRegion<'a> {
    ctx: &'a Context,
    region: Region,
}

impl DataRegion<'_> {
    /// Set a text entry scoped to this process.
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.set_scoped(key, value, DataScope::InProcess);
    }

    pub fn set_scoped(&self, key: impl Into<String>, value: impl Into<String>, scope: DataScope) {
        self.ctx
            .lock()
            .region_mut(self.region)
            .set(key, ContextValue::Text(value.into()), scope);
    }

    /// Store an arbitrary in-process object.
    pub fn set_object<T: Any + Send + Sync>(&self, key: impl Into<String>, value: T) {
        self.ctx.lock().region_mut(self.region).set(
            key,
            ContextValue::Object(Arc::new(value)),
            DataScope::InProcess,
        );
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.ctx
            .lock()
            .region(self.region)
            .get(key)
            .and_then(|e| e.value.as_text().map(str::to_owned))
    }

    pub fn get_object<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        let state = self.ctx.lock();
        match &state.region(self.region).get(key)?.value {
            ContextValue::Object(obj) => Arc::clone(obj).downcast::<T>().ok(),
            ContextValue::Text(_) => None,
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.ctx.lock().region(self.region).contains(key)
    }

    pub fn remove(&self, key: &str) -> bool {
        self.ctx.lock().region_mut(self.region).remove(key)
    }

    pub fn clear(&self) {
        self.ctx.lock().region_mut(self.region).clear();
    }

    pub fn len(&self) -> usize {
        self.ctx.lock().region(self.region).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of all entries in insertion order.
    pub fn entries(&self) -> Vec<ContextEntry> {
        self.ctx.lock().region(self.region).iter().cloned().collect()
    }

    pub fn snapshot(&self) -> ContextData {
        self.ctx.lock().region(self.region).clone()
    }
}

/// Guard owning a context for the duration of one dispatch.
///
/// Forked scopes merge back into their parent on drop, on every exit path.
/// Detached scopes own a root (or borrowed) context and merge nothing.
pub struct ContextScope {
    child: Context,
    parent: Option<Context>,
    baseline: ContextData,
}

impl ContextScope {
    pub fn detached(context: Context) -> Self {
        Self {
            child: context,
            parent: None,
            baseline: ContextData::new(),
        }
    }

    pub fn context(&self) -> &Context {
        &self.child
    }

    pub fn is_forked(&self) -> bool {
        self.parent.is_some()
    }
}

impl std::ops::Deref for ContextScope {
    type Target = Context;

    fn deref(&self) -> &Context {
        &self.child
    }
}

impl Drop for ContextScope {
    fn drop(&mut self) {
        let Some(parent) = self.parent.take() else {
            return;
        };
        if parent.ptr_eq(&self.child) {
            return;
        }

        let (upstream, bidirectional) = {
            let child = self.child.lock();
            (child.upstream.clone(), child.bidirectional.clone())
        };

        let mut state = parent.lock();
        state.upstream.merge_from(&upstream);
        state.bidirectional.apply_diff(&self.baseline, &bidirectional);
        trace!(
            upstream = upstream.len(),
            bidirectional = bidirectional.len(),
            "merged forked context into parent"
        );
    }
}
