//! Single-owner-thread script runtime.
//!
//! Each runtime owns one V8 isolate running on a dedicated OS thread with a
//! Tokio current-thread runtime. Other threads hand work to it through the
//! ingress queue; the scheduler on the owner thread decides what runs when.

pub mod bridge;
pub mod config;
pub mod engine;
pub mod events;
pub mod handle;
pub mod js_value;
pub mod queue;
pub mod registry;
pub mod runner;
pub mod scheduler;
pub mod task;
pub mod timers;
pub mod v8_engine;

#[cfg(test)]
pub(crate) mod testing;

// Re-export key types for convenience
pub use config::{ErrorPolicy, RuntimeConfig};
pub use engine::{Engine, Retainer, ValueId};
pub use events::{EventSink, HostEvent};
pub use handle::RuntimeHandle;
pub use js_value::JSValue;
pub use registry::TimerId;
pub use scheduler::{Scheduler, Submitter};
pub use task::Task;
