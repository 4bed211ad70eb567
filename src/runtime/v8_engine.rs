//! [`Engine`] implementation backed by `deno_core::JsRuntime`.
//!
//! Engine values held by the host live in a [`ValueStore`] of `v8::Global`
//! handles keyed by [`ValueId`]. The store is shared with the host bridge
//! through an isolate slot, so native callbacks such as `setTimeout` can turn
//! their arguments into retained handles.
//!
//! The isolate runs with the explicit microtask policy. After every script or
//! call entry the adapter reports one continuation whose callable performs a
//! microtask checkpoint; the scheduler runs it as a microtask.

use crate::error::{Error, Result, ScriptFailure};
use crate::runtime::bridge::{self, HostBridge};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::engine::{ContinuationSink, Engine, Retainer, ValueId};
use crate::runtime::events::{EventSink, HostEvent};
use crate::runtime::js_value::{JSValue, LimitTracker, MAX_JS_BYTES, MAX_JS_DEPTH};
use crate::runtime::scheduler::Submitter;
use deno_core::{v8, JsRuntime, RuntimeOptions};
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

/// Reference-counted `v8::Global` handles owned by the host.
#[derive(Default)]
pub struct ValueStore {
    next_id: u32,
    entries: HashMap<ValueId, (v8::Global<v8::Value>, usize)>,
}

impl ValueStore {
    /// Keep `value` alive; the returned handle carries one reference.
    pub fn insert(&mut self, scope: &mut v8::HandleScope, value: v8::Local<v8::Value>) -> ValueId {
        let global = v8::Global::new(scope, value);
        loop {
            self.next_id = self.next_id.wrapping_add(1);
            let id = ValueId::new(self.next_id);
            if self.next_id != 0 && !self.entries.contains_key(&id) {
                self.entries.insert(id, (global, 1));
                return id;
            }
        }
    }

    pub fn local<'s>(
        &self,
        scope: &mut v8::HandleScope<'s>,
        id: ValueId,
    ) -> Option<v8::Local<'s, v8::Value>> {
        self.entries
            .get(&id)
            .map(|(global, _)| v8::Local::new(scope, global))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Retainer for ValueStore {
    fn retain(&mut self, id: ValueId) {
        match self.entries.get_mut(&id) {
            Some((_, count)) => *count += 1,
            None => {
                tracing::warn!(value = %id, "retain of unknown engine value");
                debug_assert!(false, "retain of unknown engine value {}", id);
            }
        }
    }

    fn release(&mut self, id: ValueId) {
        match self.entries.get_mut(&id) {
            Some((_, count)) => {
                *count -= 1;
                if *count == 0 {
                    self.entries.remove(&id);
                }
            }
            None => {
                tracing::warn!(value = %id, "release of unknown engine value");
                debug_assert!(false, "release of unknown engine value {}", id);
            }
        }
    }
}

/// V8 isolate owned by the runtime thread.
///
/// Not `Send`: constructing one on a thread binds it there.
pub struct V8Engine {
    js_runtime: JsRuntime,
    bridge: Rc<HostBridge>,
    checkpoint: ValueId,
    continuation: Option<ContinuationSink>,
    continuation_pending: bool,
}

impl V8Engine {
    pub fn new(config: &RuntimeConfig, submitter: Submitter, sink: EventSink) -> Result<Self> {
        config.validate()?;

        let create_params = config
            .heap_limits()
            .map(|(initial, max)| v8::CreateParams::default().heap_limits(initial, max));

        let mut js_runtime = JsRuntime::new(RuntimeOptions {
            create_params,
            ..Default::default()
        });

        let isolate = js_runtime.v8_isolate();
        isolate.set_microtasks_policy(v8::MicrotasksPolicy::Explicit);

        isolate.set_promise_reject_callback(bridge::promise_reject_callback);

        let bridge = Rc::new(HostBridge::new(submitter, sink));
        isolate.set_slot(bridge.clone());

        let checkpoint = {
            let scope = &mut js_runtime.handle_scope();
            bridge::install(scope, config.enable_console)?;
            let function = v8::Function::new(scope, checkpoint_placeholder)
                .ok_or_else(|| Error::usage("failed to create microtask checkpoint"))?;
            bridge.values.borrow_mut().insert(scope, function.into())
        };

        js_runtime
            .execute_script("<bridge>", bridge::console_source(config.enable_console))
            .map_err(|err| Error::script(err.to_string()))?;

        if let Some(script) = config.bootstrap_script.clone() {
            js_runtime
                .execute_script("<bootstrap>", script)
                .map_err(|err| Error::script(err.to_string()))?;
        }

        Ok(Self {
            js_runtime,
            bridge,
            checkpoint,
            continuation: None,
            continuation_pending: false,
        })
    }

    /// Values retained on behalf of the host, not counting the checkpoint.
    pub fn live_values(&self) -> usize {
        self.bridge.values.borrow().len().saturating_sub(1)
    }

    /// Report a pending checkpoint unless one is already outstanding.
    fn report_continuation(&mut self) {
        if self.continuation_pending {
            return;
        }
        let Some(sink) = self.continuation.as_mut() else {
            return;
        };
        self.bridge.values.borrow_mut().retain(self.checkpoint);
        self.continuation_pending = true;
        sink(self.checkpoint);
    }

    fn perform_checkpoint(&mut self) -> Result<JSValue> {
        self.continuation_pending = false;
        let result = {
            let scope = &mut self.js_runtime.handle_scope();
            let tc = &mut v8::TryCatch::new(scope);
            tc.perform_microtask_checkpoint();
            if tc.has_caught() || tc.has_terminated() {
                Err(exception_to_error(tc))
            } else {
                Ok(JSValue::Undefined)
            }
        };
        self.report_rejections();
        result
    }

    /// Report promises that are still rejected without a handler once the
    /// microtask queue has settled.
    fn report_rejections(&mut self) {
        let pending = std::mem::take(&mut *self.bridge.rejections.borrow_mut());
        if pending.is_empty() {
            return;
        }

        let scope = &mut self.js_runtime.handle_scope();
        for (_, reason) in pending {
            let reason = v8::Local::new(scope, reason);
            let message = v8::Exception::create_message(scope, reason);
            let mut failure = message_to_failure(scope, message);
            failure.message = format!("unhandled promise rejection: {}", failure.message);
            tracing::warn!(error = %failure, "unhandled promise rejection");
            self.bridge.sink.emit(HostEvent::ScriptFailed(failure));
        }
    }
}

impl Retainer for V8Engine {
    fn retain(&mut self, value: ValueId) {
        self.bridge.values.borrow_mut().retain(value);
    }

    fn release(&mut self, value: ValueId) {
        self.bridge.values.borrow_mut().release(value);
    }
}

impl Engine for V8Engine {
    fn run_script(
        &mut self,
        source: &str,
        origin: &str,
        source_id: u32,
        want_result: bool,
    ) -> Result<JSValue> {
        let result = {
            let scope = &mut self.js_runtime.handle_scope();
            let tc = &mut v8::TryCatch::new(scope);

            let code = v8::String::new(tc, source)
                .ok_or_else(|| Error::usage("failed to allocate script source"))?;
            let name = v8::String::new(tc, origin)
                .ok_or_else(|| Error::usage("failed to allocate script name"))?;
            let script_origin = v8::ScriptOrigin::new(
                tc,
                name.into(),
                0,
                0,
                false,
                source_id as i32,
                None,
                false,
                false,
                false,
                None,
            );

            match v8::Script::compile(tc, code, Some(&script_origin)) {
                Some(script) => match script.run(tc) {
                    Some(value) => completion(tc, value, want_result),
                    None => Err(exception_to_error(tc)),
                },
                None => Err(exception_to_error(tc)),
            }
        };

        self.report_continuation();
        result
    }

    fn call(&mut self, callable: ValueId, args: &[ValueId], want_result: bool) -> Result<JSValue> {
        if callable == self.checkpoint {
            return self.perform_checkpoint();
        }

        let result = {
            let scope = &mut self.js_runtime.handle_scope();

            // Resolve everything before calling; the callee may re-enter the store.
            let (function, argv) = {
                let values = self.bridge.values.borrow();
                let function = values
                    .local(scope, callable)
                    .ok_or_else(|| Error::contract(format!("stale engine value {}", callable)))?;
                let mut argv = Vec::with_capacity(args.len());
                for arg in args {
                    argv.push(
                        values
                            .local(scope, *arg)
                            .ok_or_else(|| Error::contract(format!("stale engine value {}", arg)))?,
                    );
                }
                (function, argv)
            };

            let function = v8::Local::<v8::Function>::try_from(function)
                .map_err(|_| Error::usage(format!("engine value {} is not callable", callable)))?;
            let receiver = scope.get_current_context().global(scope).into();

            let tc = &mut v8::TryCatch::new(scope);
            match function.call(tc, receiver, &argv) {
                Some(value) => completion(tc, value, want_result),
                None => Err(exception_to_error(tc)),
            }
        };

        self.report_continuation();
        result
    }

    fn global_function(&mut self, name: &str) -> Option<ValueId> {
        let scope = &mut self.js_runtime.handle_scope();
        let global = scope.get_current_context().global(scope);
        let key = v8::String::new(scope, name)?;
        let value = global.get(scope, key.into())?;
        if !value.is_function() {
            return None;
        }
        Some(self.bridge.values.borrow_mut().insert(scope, value))
    }

    fn create_value(&mut self, value: &JSValue) -> Result<ValueId> {
        let scope = &mut self.js_runtime.handle_scope();
        let local: v8::Local<v8::Value> = match value {
            JSValue::Undefined => v8::undefined(scope).into(),
            JSValue::Null => v8::null(scope).into(),
            JSValue::Bool(b) => v8::Boolean::new(scope, *b).into(),
            JSValue::Int(i) => v8::Number::new(scope, *i as f64).into(),
            JSValue::Float(f) => v8::Number::new(scope, *f).into(),
            JSValue::String(s) => v8::String::new(scope, s)
                .ok_or_else(|| Error::usage("failed to allocate string argument"))?
                .into(),
            JSValue::Array(_) | JSValue::Object(_) => deno_core::serde_v8::to_v8(scope, value)
                .map_err(|err| Error::resolution(format!("failed to convert argument: {}", err)))?,
        };
        Ok(self.bridge.values.borrow_mut().insert(scope, local))
    }

    fn set_promise_continuation(&mut self, sink: ContinuationSink) {
        self.continuation = Some(sink);
        // Flush anything the bridge or bootstrap scripts queued.
        self.report_continuation();
    }

    fn detach(&mut self) {
        let leaked = self.live_values();
        if leaked > 0 {
            tracing::warn!(count = leaked, "engine values not released before shutdown");
        }
        self.continuation = None;
        self.bridge.values.borrow_mut().clear();
        self.bridge.rejections.borrow_mut().clear();
    }
}

impl Drop for V8Engine {
    fn drop(&mut self) {
        // Globals must go before the isolate.
        self.bridge.values.borrow_mut().clear();
        self.bridge.rejections.borrow_mut().clear();
    }
}

/// Function value behind the checkpoint handle. `V8Engine::call` intercepts
/// that handle before entering the engine, so this body never runs.
fn checkpoint_placeholder(
    _scope: &mut v8::HandleScope,
    _args: v8::FunctionCallbackArguments,
    _rv: v8::ReturnValue,
) {
}

/// Convert a completion value only when a caller is waiting for it.
fn completion<'s>(
    scope: &mut v8::HandleScope<'s>,
    value: v8::Local<'s, v8::Value>,
    want_result: bool,
) -> Result<JSValue> {
    if want_result {
        value_to_js_value(scope, value)
    } else {
        Ok(JSValue::Undefined)
    }
}

/// Turn the pending exception (or termination) into a crate error.
fn exception_to_error(tc: &mut v8::TryCatch<v8::HandleScope>) -> Error {
    if tc.has_terminated() {
        return Error::Terminated("script execution was terminated".to_string());
    }

    let Some(exception) = tc.exception() else {
        return Error::usage("engine call failed without an exception");
    };

    match tc.message() {
        Some(message) => Error::Script(message_to_failure(tc, message)),
        None => {
            let text = exception
                .to_string(tc)
                .map(|s| s.to_rust_string_lossy(tc))
                .unwrap_or_else(|| "unknown exception".to_string());
            Error::script(text)
        }
    }
}

fn message_to_failure(scope: &mut v8::HandleScope, message: v8::Local<v8::Message>) -> ScriptFailure {
    let text = message.get(scope).to_rust_string_lossy(scope);
    let file = message
        .get_script_resource_name(scope)
        .filter(|name| name.is_string())
        .and_then(|name| name.to_string(scope))
        .map(|name| name.to_rust_string_lossy(scope));
    let line = message.get_line_number(scope).map(|line| line as u32);
    ScriptFailure::new(text).at(file, line)
}

/// Convert a V8 value to JSValue with circular reference detection and limits enforced.
fn value_to_js_value<'s>(
    scope: &mut v8::HandleScope<'s>,
    value: v8::Local<'s, v8::Value>,
) -> Result<JSValue> {
    let mut seen = HashSet::new();
    let mut tracker = LimitTracker::new(MAX_JS_DEPTH, MAX_JS_BYTES);
    value_to_js_value_internal(scope, value, &mut seen, &mut tracker).map_err(Error::usage)
}

fn value_to_js_value_internal<'s>(
    scope: &mut v8::HandleScope<'s>,
    value: v8::Local<'s, v8::Value>,
    seen: &mut HashSet<i32>,
    tracker: &mut LimitTracker,
) -> std::result::Result<JSValue, String> {
    tracker.enter()?;

    let result = if value.is_undefined() || value.is_function() {
        // Functions stay inside the engine.
        tracker.add_bytes(9)?;
        Ok(JSValue::Undefined)
    } else if value.is_null() {
        tracker.add_bytes(4)?;
        Ok(JSValue::Null)
    } else if value.is_boolean() {
        tracker.add_bytes(5)?;
        Ok(JSValue::Bool(value.boolean_value(scope)))
    } else if value.is_number() {
        let num_val = value
            .number_value(scope)
            .ok_or_else(|| "Failed to convert value to number".to_string())?;
        tracker.add_bytes(24)?;
        if num_val.is_finite() && num_val.fract() == 0.0 && (num_val as i64) as f64 == num_val {
            Ok(JSValue::Int(num_val as i64))
        } else {
            Ok(JSValue::Float(num_val))
        }
    } else if value.is_string() {
        let rust_str = value.to_rust_string_lossy(scope);
        tracker.add_bytes(rust_str.len())?;
        Ok(JSValue::String(rust_str))
    } else if value.is_big_int() {
        let bigint = v8::Local::<v8::BigInt>::try_from(value)
            .map_err(|_| "Failed to cast to BigInt".to_string())?;
        let (val, lossless) = bigint.i64_value();
        if lossless {
            tracker.add_bytes(20)?;
            Ok(JSValue::Int(val))
        } else {
            Err("BigInt value too large to represent as i64".to_string())
        }
    } else if value.is_symbol() {
        Err("Cannot serialize V8 symbol".to_string())
    } else if value.is_array() {
        let array = v8::Local::<v8::Array>::try_from(value)
            .map_err(|_| "Failed to cast to array".to_string())?;
        let hash = array.get_identity_hash().get();
        if !seen.insert(hash) {
            return Err("Cannot serialize circular reference".to_string());
        }

        let len = array.length();
        let mut items = Vec::with_capacity(len as usize);
        for idx in 0..len {
            let item = array
                .get_index(scope, idx)
                .ok_or_else(|| format!("Failed to get array index {}", idx))?;
            items.push(value_to_js_value_internal(scope, item, seen, tracker)?);
        }

        seen.remove(&hash);
        Ok(JSValue::Array(items))
    } else if value.is_object() {
        let obj = v8::Local::<v8::Object>::try_from(value)
            .map_err(|_| "Failed to cast to object".to_string())?;
        let hash = obj.get_identity_hash().get();
        if !seen.insert(hash) {
            return Err("Cannot serialize circular reference".to_string());
        }

        let prop_names = obj
            .get_own_property_names(scope, v8::GetPropertyNamesArgs::default())
            .ok_or_else(|| "Failed to get property names".to_string())?;

        let mut map = IndexMap::new();
        for i in 0..prop_names.length() {
            let key = prop_names
                .get_index(scope, i)
                .ok_or_else(|| "Failed to get property name".to_string())?;
            let key_str = key.to_rust_string_lossy(scope);
            let val = obj
                .get(scope, key)
                .ok_or_else(|| format!("Failed to get property '{}'", key_str))?;

            tracker.add_bytes(key_str.len())?;
            map.insert(key_str, value_to_js_value_internal(scope, val, seen, tracker)?);
        }

        seen.remove(&hash);
        Ok(JSValue::Object(map))
    } else {
        let rust_str = value.to_rust_string_lossy(scope);
        tracker.add_bytes(rust_str.len())?;
        Ok(JSValue::String(rust_str))
    };

    tracker.exit();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::task::Task;
    use std::cell::RefCell;

    fn engine() -> (V8Engine, Submitter, std::sync::mpsc::Receiver<HostEvent>) {
        let (sink, events) = EventSink::channel();
        let submitter = Submitter::new();
        let engine = V8Engine::new(&RuntimeConfig::default(), submitter.clone(), sink).unwrap();
        (engine, submitter, events)
    }

    #[test]
    fn test_run_script_returns_value() {
        let (mut engine, _, _) = engine();
        assert_eq!(engine.run_script("40 + 2", "<test>", 1, true).unwrap(), JSValue::Int(42));
        assert_eq!(
            engine.run_script("({b: [1, 'x'], a: null})", "<test>", 2, true).unwrap(),
            serde_json::from_str::<JSValue>(r#"{"b": [1, "x"], "a": null}"#).unwrap()
        );
        assert_eq!(engine.run_script("undefined", "<test>", 3, true).unwrap(), JSValue::Undefined);
    }

    #[test]
    fn test_exception_carries_origin_and_line() {
        let (mut engine, _, _) = engine();
        let err = engine
            .run_script("let ok = 1;\nthrow new Error('boom');", "boom.js", 7, true)
            .unwrap_err();
        let Error::Script(failure) = err else {
            panic!("expected script error, got {:?}", err);
        };
        assert!(failure.message.contains("boom"));
        assert_eq!(failure.file.as_deref(), Some("boom.js"));
        assert_eq!(failure.line, Some(2));
    }

    #[test]
    fn test_syntax_error_is_script_error() {
        let (mut engine, _, _) = engine();
        let err = engine.run_script("function (", "bad.js", 1, true).unwrap_err();
        assert!(matches!(err, Error::Script(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn test_global_function_and_call() {
        let (mut engine, _, _) = engine();
        engine
            .run_script("function add(a, b) { return a + b; }", "<test>", 1, true)
            .unwrap();
        assert!(engine.global_function("missing").is_none());
        engine.run_script("var notFn = 3;", "<test>", 2, true).unwrap();
        assert!(engine.global_function("notFn").is_none());

        let add = engine.global_function("add").unwrap();
        let a = engine.create_value(&JSValue::from(2)).unwrap();
        let b = engine.create_value(&JSValue::from(40)).unwrap();
        assert_eq!(engine.call(add, &[a, b], true).unwrap(), JSValue::Int(42));

        for id in [add, a, b] {
            engine.release(id);
        }
        assert_eq!(engine.live_values(), 0);
    }

    #[test]
    fn test_calling_non_function_is_usage_error() {
        let (mut engine, _, _) = engine();
        let value = engine.create_value(&JSValue::from("text")).unwrap();
        let err = engine.call(value, &[], true).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
        engine.release(value);
    }

    #[test]
    fn test_continuation_runs_promise_reactions() {
        let (mut engine, _, _) = engine();
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = reported.clone();
        engine.set_promise_continuation(Box::new(move |id| sink.borrow_mut().push(id)));

        // Setting the sink flushes once; a second entry does not duplicate it.
        engine
            .run_script("var seen = []; Promise.resolve().then(() => seen.push('then'));", "<test>", 1, true)
            .unwrap();
        assert_eq!(reported.borrow().len(), 1);
        assert_eq!(engine.run_script("seen.length", "<test>", 2, true).unwrap(), JSValue::Int(0));

        let checkpoint = reported.borrow_mut().remove(0);
        engine.call(checkpoint, &[], false).unwrap();
        engine.release(checkpoint);
        assert_eq!(engine.run_script("seen[0]", "<test>", 3, true).unwrap(), JSValue::from("then"));
        // That entry reported a fresh continuation.
        assert_eq!(reported.borrow().len(), 1);
    }

    #[test]
    fn test_discarded_completion_is_not_converted() {
        let (mut engine, _, _) = engine();
        assert_eq!(
            engine
                .run_script("var self = globalThis; self", "<test>", 1, false)
                .unwrap(),
            JSValue::Undefined
        );
        assert_eq!(engine.run_script("Symbol('s')", "<test>", 2, false).unwrap(), JSValue::Undefined);

        // A waiting caller still learns that the value cannot cross over.
        let err = engine.run_script("self", "<test>", 3, true).unwrap_err();
        assert!(matches!(err, Error::Usage(_)));
    }

    #[test]
    fn test_unhandled_rejection_is_reported_after_checkpoint() {
        let (mut engine, _, events) = engine();
        let reported = Rc::new(RefCell::new(Vec::new()));
        let sink = reported.clone();
        engine.set_promise_continuation(Box::new(move |id| sink.borrow_mut().push(id)));
        let flush = |engine: &mut V8Engine| {
            let checkpoint = reported.borrow_mut().remove(0);
            engine.call(checkpoint, &[], false).unwrap();
            engine.release(checkpoint);
        };
        flush(&mut engine);

        engine
            .run_script(
                "Promise.reject(new Error('lost'));\n\
                 const late = Promise.reject(new Error('late'));\n\
                 late.catch(() => {});",
                "rejects.js",
                1,
                false,
            )
            .unwrap();
        assert!(events.try_recv().is_err());
        flush(&mut engine);

        let failures: Vec<_> = events.try_iter().collect();
        assert_eq!(failures.len(), 1, "{:?}", failures);
        let HostEvent::ScriptFailed(failure) = &failures[0] else {
            panic!("unexpected event {:?}", failures[0]);
        };
        assert!(failure.message.contains("lost"), "{}", failure);
    }

    #[test]
    fn test_set_timeout_registers_task() {
        let (mut engine, submitter, _) = engine();
        let id = engine
            .run_script("setTimeout(() => {}, 25, 'extra')", "<test>", 1, true)
            .unwrap();
        let JSValue::Int(id) = id else {
            panic!("expected numeric timer id, got {:?}", id);
        };
        assert!(id > 0);
        assert!(submitter
            .registry()
            .contains(crate::runtime::registry::TimerId::from(id as u32)));
        // Callback plus one extra argument.
        assert_eq!(engine.live_values(), 2);

        submitter.stop();
        let mut tasks = submitter.ingress().drain();
        assert_eq!(tasks.len(), 1);
        let task: Task = tasks.remove(0);
        assert_eq!(task.delay(), std::time::Duration::from_millis(25));
        task.release_resources(&mut engine);
        assert_eq!(engine.live_values(), 0);
    }

    #[test]
    fn test_send_to_host_emits_message() {
        let (mut engine, _, events) = engine();
        engine.run_script("sendToHost('x'); sendToHost(42)", "<test>", 1, true).unwrap();
        assert_eq!(events.try_recv().unwrap(), HostEvent::MessageReady("x".into()));
        assert_eq!(events.try_recv().unwrap(), HostEvent::MessageReady("42".into()));
    }

    #[test]
    fn test_set_timeout_requires_function() {
        let (mut engine, _, _) = engine();
        let err = engine.run_script("setTimeout('code', 1)", "<test>", 1, true).unwrap_err();
        let Error::Script(failure) = err else {
            panic!("expected script error");
        };
        assert!(failure.message.contains("TypeError"));
    }
}
