//! Embedded JavaScript runtime with a single-owner-thread event loop.
//!
//! A [`RuntimeHandle`] starts a V8 isolate on its own thread and gives script
//! code `setTimeout`/`setInterval`, promise microtasks and a `sendToHost`
//! channel back to the embedding application. Any thread may submit scripts
//! and function calls; they run in order on the owner thread.
//!
//! ```no_run
//! use jshost::{HostEvent, RuntimeConfig, RuntimeHandle};
//!
//! let (runtime, events) = RuntimeHandle::spawn_with_channel(RuntimeConfig::default())?;
//! runtime.submit_script("function echo(s) { sendToHost(s); }")?;
//! runtime.invoke("echo", vec!["hi".into()])?;
//! assert_eq!(events.recv().unwrap(), HostEvent::MessageReady("hi".into()));
//! runtime.close()?;
//! # Ok::<(), jshost::Error>(())
//! ```

pub mod error;
pub mod runtime;

pub use error::{Error, Result, ScriptFailure};
pub use runtime::{
    ErrorPolicy, EventSink, HostEvent, JSValue, RuntimeConfig, RuntimeHandle, TimerId,
};
