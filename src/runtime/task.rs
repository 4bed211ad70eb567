//! Units of deferred work.
//!
//! A [`Task`] is built on any thread, travels through the ingress queue, and
//! is executed on the owner thread. Tasks that hold engine values own one
//! reference per [`ValueId`]; [`Task::release_resources`] consumes the task,
//! so the references are given back exactly once, and a task that is being
//! rescheduled simply is not released.

use crate::error::{Error, Result};
use crate::runtime::engine::{Engine, Retainer, ValueId};
use crate::runtime::js_value::JSValue;
use crate::runtime::registry::{CancelFlag, TimerId};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::mpsc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

/// Source identities handed to the engine for diagnostics.
static NEXT_SOURCE_ID: AtomicU32 = AtomicU32::new(1);

const DEFAULT_ORIGIN: &str = "<script>";

/// Script source to parse and run.
#[derive(Debug)]
pub struct ScriptTask {
    source: String,
    origin: Option<String>,
    source_id: u32,
}

impl ScriptTask {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn origin(&self) -> Option<&str> {
        self.origin.as_deref()
    }

    pub fn source_id(&self) -> u32 {
        self.source_id
    }
}

/// What an invocation calls.
#[derive(Debug)]
pub enum Target {
    /// A callable already held by the engine, with retained arguments.
    Value { callable: ValueId, args: Vec<ValueId> },
    /// A global function resolved by name when the task runs. Arguments are
    /// turned into engine values at that point, on the owner thread.
    Global { name: String, args: Vec<JSValue> },
}

#[derive(Debug)]
pub enum TaskKind {
    Script(ScriptTask),
    Invocation(Target),
}

/// Where the result of a one-shot task goes.
#[derive(Debug)]
pub enum Responder {
    Sync(mpsc::Sender<Result<JSValue>>),
    Async(oneshot::Sender<Result<JSValue>>),
}

impl Responder {
    pub fn send(self, result: Result<JSValue>) {
        // The host may have stopped waiting; nothing to do then.
        let _ = match self {
            Responder::Sync(tx) => tx.send(result).map_err(|_| ()),
            Responder::Async(tx) => tx.send(result).map_err(|_| ()),
        };
    }
}

/// A unit of deferred work.
#[derive(Debug)]
pub struct Task {
    kind: TaskKind,
    id: Option<TimerId>,
    cancel: CancelFlag,
    delay: Duration,
    repeat: bool,
    due: Instant,
    continuation: bool,
    responder: Option<Responder>,
    released: bool,
}

impl Task {
    fn new(kind: TaskKind) -> Self {
        Self {
            kind,
            id: None,
            cancel: CancelFlag::new(),
            delay: Duration::ZERO,
            repeat: false,
            due: Instant::now(),
            continuation: false,
            responder: None,
            released: false,
        }
    }

    /// Run `source` in the engine's current context.
    pub fn script(source: impl Into<String>, origin: Option<String>) -> Self {
        Self::new(TaskKind::Script(ScriptTask {
            source: source.into(),
            origin,
            source_id: NEXT_SOURCE_ID.fetch_add(1, Ordering::Relaxed),
        }))
    }

    /// Call an engine function. The task takes ownership of one reference on
    /// `callable` and on every argument.
    pub fn invoke(callable: ValueId, args: Vec<ValueId>) -> Self {
        Self::new(TaskKind::Invocation(Target::Value { callable, args }))
    }

    /// Call the global function `name` with native arguments.
    pub fn invoke_global(name: impl Into<String>, args: Vec<JSValue>) -> Self {
        Self::new(TaskKind::Invocation(Target::Global {
            name: name.into(),
            args,
        }))
    }

    /// A promise continuation reported by the engine.
    pub(crate) fn continuation(callable: ValueId) -> Self {
        let mut task = Self::invoke(callable, Vec::new());
        task.continuation = true;
        task
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self.due = Instant::now() + delay;
        self
    }

    pub fn repeating(mut self, repeat: bool) -> Self {
        self.repeat = repeat;
        self
    }

    pub(crate) fn with_responder(mut self, responder: Responder) -> Self {
        self.responder = Some(responder);
        self
    }

    pub(crate) fn assign_id(&mut self, id: TimerId) {
        self.id = Some(id);
    }

    pub fn id(&self) -> Option<TimerId> {
        self.id
    }

    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn is_repeating(&self) -> bool {
        self.repeat
    }

    pub fn is_continuation(&self) -> bool {
        self.continuation
    }

    pub fn due(&self) -> Instant {
        self.due
    }

    pub(crate) fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Whether executing the task would still have an effect.
    pub fn should_run(&self) -> bool {
        !self.is_cancelled()
    }

    /// Zero once the task is due.
    pub fn time_to_execution(&self) -> Duration {
        self.due.saturating_duration_since(Instant::now())
    }

    /// Schedule the next run one delay from now.
    pub fn reset_scheduled_time(&mut self) {
        self.due = Instant::now() + self.delay;
    }

    pub(crate) fn take_responder(&mut self) -> Option<Responder> {
        self.responder.take()
    }

    /// Run the task against `engine`.
    ///
    /// A cancelled task returns `undefined` without touching the engine. The
    /// completion value is only converted when a responder is waiting for it.
    pub fn execute<E: Engine + ?Sized>(&self, engine: &mut E) -> Result<JSValue> {
        if !self.should_run() {
            return Ok(JSValue::Undefined);
        }

        let want_result = self.responder.is_some();
        match &self.kind {
            TaskKind::Script(script) => engine.run_script(
                &script.source,
                script.origin.as_deref().unwrap_or(DEFAULT_ORIGIN),
                script.source_id,
                want_result,
            ),
            TaskKind::Invocation(Target::Value { callable, args }) => {
                engine.call(*callable, args, want_result)
            }
            TaskKind::Invocation(Target::Global { name, args }) => {
                invoke_global(engine, name, args, want_result)
            }
        }
    }

    /// Give back every engine reference the task holds.
    pub fn release_resources<R: Retainer + ?Sized>(mut self, retainer: &mut R) {
        if let TaskKind::Invocation(Target::Value { callable, args }) = &mut self.kind {
            retainer.release(*callable);
            for arg in args.drain(..) {
                retainer.release(arg);
            }
        }
        self.released = true;
    }

    fn holds_engine_values(&self) -> bool {
        matches!(self.kind, TaskKind::Invocation(Target::Value { .. }))
    }
}

impl Drop for Task {
    fn drop(&mut self) {
        if self.released || !self.holds_engine_values() || std::thread::panicking() {
            return;
        }
        tracing::warn!("task dropped without releasing its engine values");
        debug_assert!(false, "task dropped without releasing its engine values");
    }
}

fn invoke_global<E: Engine + ?Sized>(
    engine: &mut E,
    name: &str,
    args: &[JSValue],
    want_result: bool,
) -> Result<JSValue> {
    if let Some(bad) = args.iter().find(|arg| !arg.is_native_argument()) {
        return Err(Error::resolution(format!(
            "unsupported argument type '{}' for '{}'",
            bad.type_name(),
            name
        )));
    }

    let Some(function) = engine.global_function(name) else {
        tracing::debug!(function = name, "global function not found; skipping call");
        return Ok(JSValue::Undefined);
    };

    let mut resolved = Vec::with_capacity(args.len());
    let mut outcome = Ok(());
    for arg in args {
        match engine.create_value(arg) {
            Ok(value) => resolved.push(value),
            Err(err) => {
                outcome = Err(err);
                break;
            }
        }
    }

    let result = outcome.and_then(|()| engine.call(function, &resolved, want_result));

    engine.release(function);
    for value in resolved {
        engine.release(value);
    }
    result
}
