//! Log capture and sample signals for the middleware tests.
#![allow(dead_code)]

use std::fmt;
use std::io;
use std::sync::{Arc, Mutex};

use herald_engine::impl_signal;
use tracing::subscriber::DefaultGuard;
use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

// ---------------------------------------------------------------------------
// Captured logs
// ---------------------------------------------------------------------------

/// Formatted log output for the current thread's subscriber.
#[derive(Clone, Default)]
pub struct CapturedLogs {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl CapturedLogs {
    /// Install as the thread-local default at TRACE. Keep the guard alive.
    pub fn install() -> (Self, DefaultGuard) {
        Self::install_at(Level::TRACE)
    }

    pub fn install_at(level: Level) -> (Self, DefaultGuard) {
        let logs = Self::default();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_writer(logs.clone())
            .with_ansi(false)
            .without_time()
            .finish();
        let guard = tracing::subscriber::set_default(subscriber);
        (logs, guard)
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.contents().contains(needle)
    }

    /// Lines containing `needle`.
    pub fn matching(&self, needle: &str) -> Vec<String> {
        self.contents()
            .lines()
            .filter(|line| line.contains(needle))
            .map(str::to_owned)
            .collect()
    }
}

pub struct CapturedWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for CapturedWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedWriter;

    fn make_writer(&'a self) -> Self::Writer {
        CapturedWriter {
            buf: Arc::clone(&self.buf),
        }
    }
}

// ---------------------------------------------------------------------------
// Recorder
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
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

pub trait OrderEvent: fmt::Debug + Send + Sync {
    fn order_id(&self) -> u32;
}

#[derive(Debug, Clone)]
pub struct OrderPlaced {
    pub id: u32,
}

#[derive(Debug, Clone)]
pub struct OrderShipped {
    pub id: u32,
}

#[derive(Debug, Clone)]
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

impl_signal!(OrderPlaced: dyn OrderEvent);
impl_signal!(OrderShipped: dyn OrderEvent);
impl_signal!(Ping);
