//! Trace and signal id generation.

use uuid::Uuid;

/// A fresh 128-bit trace id, rendered as 32 lowercase hex digits.
pub fn new_trace_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A fresh 64-bit span-style id, rendered as 16 lowercase hex digits.
pub fn new_signal_id() -> String {
    let (hi, lo) = Uuid::new_v4().as_u64_pair();
    format!("{:016x}", hi ^ lo)
}
