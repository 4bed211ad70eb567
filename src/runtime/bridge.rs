//! Native functions projected into the script's global scope.
//!
//! `setTimeout`/`setInterval` turn their arguments into retained engine
//! values and submit an invocation task through the ingress path, so the
//! callback runs on a later loop turn. `sendToHost` and `console.*` notify the
//! host directly. Callbacks find their shared state in an isolate slot.
//!
//! Promises rejected without a handler are collected here and reported by
//! the engine after its next microtask checkpoint, once late handlers had a
//! chance to attach.

use crate::error::{Error, Result};
use crate::runtime::events::{EventSink, HostEvent};
use crate::runtime::registry::TimerId;
use crate::runtime::scheduler::Submitter;
use crate::runtime::task::Task;
use crate::runtime::v8_engine::ValueStore;
use deno_core::v8;
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

/// State reachable from native callbacks.
pub struct HostBridge {
    pub(crate) submitter: Submitter,
    pub(crate) sink: EventSink,
    pub(crate) values: RefCell<ValueStore>,
    /// Rejected promises without a handler, keyed by identity hash.
    pub(crate) rejections: RefCell<Vec<(i32, v8::Global<v8::Value>)>>,
}

impl HostBridge {
    pub fn new(submitter: Submitter, sink: EventSink) -> Self {
        Self {
            submitter,
            sink,
            values: RefCell::new(ValueStore::default()),
            rejections: RefCell::default(),
        }
    }
}

const CONSOLE_SOURCE: &str = r#"
((hostConsole) => {
  const format = (args) =>
    args
      .map((arg) => {
        if (typeof arg === "string") return arg;
        try {
          return JSON.stringify(arg) ?? String(arg);
        } catch {
          return String(arg);
        }
      })
      .join(" ");
  const level = (name) => (...args) => hostConsole(name, format(args));
  globalThis.console = {
    log: level("info"),
    info: level("info"),
    debug: level("debug"),
    trace: level("trace"),
    warn: level("warn"),
    error: level("error"),
  };
  delete globalThis.__hostConsole;
})(globalThis.__hostConsole);
"#;

const SILENT_CONSOLE_SOURCE: &str = r#"
(() => {
  const noop = () => {};
  globalThis.console = { log: noop, info: noop, debug: noop, trace: noop, warn: noop, error: noop };
})();
"#;

/// Script that defines `console` on top of the installed natives.
pub fn console_source(enabled: bool) -> &'static str {
    if enabled {
        CONSOLE_SOURCE
    } else {
        SILENT_CONSOLE_SOURCE
    }
}

/// Define the bridge natives on the global object.
pub fn install(scope: &mut v8::HandleScope, enable_console: bool) -> Result<()> {
    define(scope, "setTimeout", set_timeout)?;
    define(scope, "setInterval", set_interval)?;
    define(scope, "clearTimeout", clear_timer)?;
    define(scope, "clearInterval", clear_timer)?;
    define(scope, "sendToHost", send_to_host)?;
    if enable_console {
        define(scope, "__hostConsole", host_console)?;
    }
    Ok(())
}

fn define(
    scope: &mut v8::HandleScope,
    name: &str,
    callback: impl v8::MapFnTo<v8::FunctionCallback>,
) -> Result<()> {
    let global = scope.get_current_context().global(scope);
    let key = v8::String::new(scope, name)
        .ok_or_else(|| Error::usage(format!("failed to allocate name '{}'", name)))?;
    let function = v8::Function::new(scope, callback)
        .ok_or_else(|| Error::usage(format!("failed to create native '{}'", name)))?;
    global
        .set(scope, key.into(), function.into())
        .ok_or_else(|| Error::usage(format!("failed to define '{}'", name)))?;
    Ok(())
}

fn bridge(scope: &mut v8::HandleScope) -> Option<Rc<HostBridge>> {
    scope.get_slot::<Rc<HostBridge>>().cloned()
}

pub(crate) extern "C" fn promise_reject_callback(message: v8::PromiseRejectMessage) {
    let scope = &mut unsafe { v8::CallbackScope::new(&message) };
    let Some(bridge) = bridge(scope) else {
        return;
    };

    let key = message.get_promise().get_identity_hash().get();
    match message.get_event() {
        v8::PromiseRejectEvent::PromiseRejectWithNoHandler => {
            let reason = message
                .get_value()
                .unwrap_or_else(|| v8::undefined(scope).into());
            let reason = v8::Global::new(scope, reason);
            bridge.rejections.borrow_mut().push((key, reason));
        }
        v8::PromiseRejectEvent::PromiseHandlerAddedAfterReject => {
            bridge
                .rejections
                .borrow_mut()
                .retain(|(pending, _)| *pending != key);
        }
        _ => {}
    }
}

fn throw_type_error(scope: &mut v8::HandleScope, message: &str) {
    if let Some(message) = v8::String::new(scope, message) {
        let exception = v8::Exception::type_error(scope, message);
        scope.throw_exception(exception);
    }
}

fn set_timeout(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    schedule_timer(scope, &args, &mut rv, false);
}

fn set_interval(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    mut rv: v8::ReturnValue,
) {
    schedule_timer(scope, &args, &mut rv, true);
}

/// `(callback, delayMs, ...args)`; returns the cancellation id.
fn schedule_timer(
    scope: &mut v8::HandleScope,
    args: &v8::FunctionCallbackArguments,
    rv: &mut v8::ReturnValue,
    repeat: bool,
) {
    let Some(bridge) = bridge(scope) else {
        return;
    };

    let callback = args.get(0);
    if !callback.is_function() {
        let name = if repeat { "setInterval" } else { "setTimeout" };
        throw_type_error(scope, &format!("{}: callback must be a function", name));
        return;
    }

    // NaN, negative and missing delays all mean "as soon as possible".
    let delay_ms = args
        .get(1)
        .number_value(scope)
        .filter(|ms| ms.is_finite() && *ms > 0.0)
        .unwrap_or(0.0);

    let task = {
        let mut values = bridge.values.borrow_mut();
        let callable = values.insert(scope, callback);
        let extra = (2..args.length())
            .map(|i| values.insert(scope, args.get(i)))
            .collect();
        Task::invoke(callable, extra)
            .with_delay(Duration::from_millis(delay_ms as u64))
            .repeating(repeat)
    };

    match bridge.submitter.register_cancellable(task) {
        Ok(id) => rv.set_uint32(id.get()),
        Err(task) => {
            tracing::debug!("runtime is stopping; timer dropped");
            task.release_resources(&mut *bridge.values.borrow_mut());
        }
    }
}

fn clear_timer(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    let Some(bridge) = bridge(scope) else {
        return;
    };
    let id = args.get(0);
    if id.is_null_or_undefined() {
        return;
    }
    let Some(raw) = id.uint32_value(scope) else {
        return;
    };
    if let Err(err) = bridge.submitter.cancel(TimerId::from(raw)) {
        tracing::debug!(error = %err, "clear of unknown timer ignored");
    }
}

fn send_to_host(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    let Some(bridge) = bridge(scope) else {
        return;
    };
    let text = args.get(0).to_rust_string_lossy(scope);
    bridge.sink.emit(HostEvent::MessageReady(text));
}

fn host_console(
    scope: &mut v8::HandleScope,
    args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
    let level = args.get(0).to_rust_string_lossy(scope);
    let message = args.get(1).to_rust_string_lossy(scope);
    match level.as_str() {
        "error" => tracing::error!(target: "jshost::console", "{}", message),
        "warn" => tracing::warn!(target: "jshost::console", "{}", message),
        "debug" => tracing::debug!(target: "jshost::console", "{}", message),
        "trace" => tracing::trace!(target: "jshost::console", "{}", message),
        _ => tracing::info!(target: "jshost::console", "{}", message),
    }
}
