//! Built-in middlewares for herald pipelines.
//!
//! Both work on publisher and receiver pipelines alike:
//!
//! ```ignore
//! engine
//!     .publisher::<OrderPlaced>(services)
//!     .with_pipeline(|p| {
//!         p.use_middleware(LoggingMiddleware::new());
//!         Ok(())
//!     })
//!     .dispatch(OrderPlaced { id: 1 }, cancel)
//!     .await?;
//! ```

pub mod filter;
pub mod logging;

pub use filter::SignalTypeFilter;
pub use logging::{LoggingHook, LoggingMiddleware, LoggingPhase, LoggingRecord, PayloadLogging};
