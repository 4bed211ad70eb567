//! Engine adapter boundary.
//!
//! The scheduler drives a script engine only through [`Engine`]. Engine values
//! are never handed out directly: the adapter keeps them in an owner-thread
//! store and gives out [`ValueId`] handles, which are plain integers and may
//! travel inside tasks across threads. A handle is worth one reference; the
//! holder must give it back through [`Retainer::release`] exactly once.

use crate::error::Result;
use crate::runtime::js_value::JSValue;
use std::fmt;

/// Handle to an engine-owned value held on behalf of the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ValueId(u32);

impl ValueId {
    pub(crate) fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Explicit reference counting for engine values held outside the engine.
pub trait Retainer {
    /// Take one more reference on `value`.
    fn retain(&mut self, value: ValueId);

    /// Drop one reference on `value`.
    fn release(&mut self, value: ValueId);
}

/// Receives promise continuations as zero-argument callables.
///
/// The handle passed in is already retained for the receiver.
pub type ContinuationSink = Box<dyn FnMut(ValueId)>;

/// Operations the scheduler needs from a script engine.
///
/// Implementations live on the owner thread only; the V8 implementation is
/// not `Send`, so holding one is proof of being on that thread.
pub trait Engine: Retainer {
    /// Parse and run `source` in the current context.
    ///
    /// The completion value is only converted when `want_result` is set;
    /// otherwise the call returns `Undefined` and only a thrown exception
    /// counts as failure.
    fn run_script(
        &mut self,
        source: &str,
        origin: &str,
        source_id: u32,
        want_result: bool,
    ) -> Result<JSValue>;

    /// Call `callable` with `args`; the receiver is the global object.
    /// `want_result` works as for [`Engine::run_script`].
    fn call(&mut self, callable: ValueId, args: &[ValueId], want_result: bool) -> Result<JSValue>;

    /// Look up a global function by name. Returns a retained handle, or
    /// `None` when the name is unbound or not callable.
    fn global_function(&mut self, name: &str) -> Option<ValueId>;

    /// Create an engine value for a native argument. Returns a retained handle.
    fn create_value(&mut self, value: &JSValue) -> Result<ValueId>;

    /// Install the single promise-continuation callback.
    fn set_promise_continuation(&mut self, sink: ContinuationSink);

    /// Called once when the event loop stops, before the engine is dropped.
    fn detach(&mut self) {}
}
