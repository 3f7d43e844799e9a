//! Observability for the logs table
//!
//! - Structured JSON logging, one line per event
//! - Typed lifecycle events
//! - Atomic feed counters
//!
//! Observability never fails an operation: write errors are dropped.
//!
//! ```ignore
//! use clusterlogs::observability::{Event, Logger};
//!
//! Logger::info(Event::FeedReady, &[("starters", "3")]);
//! ```

mod events;
mod logger;
mod metrics;

pub use events::Event;
pub use logger::{Logger, Severity};
pub use metrics::{FeedMetrics, MetricsSnapshot};
