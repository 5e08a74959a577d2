//! Shared signals, recorders and setup for the engine integration tests.
#![allow(dead_code)]

use std::fmt;
use std::sync::{Arc, Mutex};

use herald_engine::impl_signal;
use tracing_subscriber::EnvFilter;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ---------------------------------------------------------------------------
// Recorder: ordered log shared between test and handlers
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct Recorder {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.entries()).finish()
    }
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

/// Family shared by every order signal.
pub trait OrderEvent: fmt::Debug + Send + Sync {
    fn order_id(&self) -> u32;
}

/// Marker family that only some signals join.
pub trait Auditable: fmt::Debug + Send + Sync {}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderPlaced {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderShipped {
    pub id: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Ping(pub u32);

impl OrderEvent for OrderPlaced {
    fn order_id(&self) -> u32 {
        self.id
    }
}

impl OrderEvent for OrderShipped {
    fn order_id(&self) -> u32 {
        self.id
    }
}

impl Auditable for OrderShipped {}

impl_signal!(OrderPlaced: dyn OrderEvent);
impl_signal!(OrderShipped: dyn OrderEvent, dyn Auditable);
impl_signal!(Ping);

#[derive(Debug, thiserror::Error)]
#[error("invalid operation: {0}")]
pub struct InvalidOperation(pub &'static str);
