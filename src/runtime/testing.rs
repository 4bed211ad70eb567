//! Scripted engine for exercising the scheduler without V8.

use crate::error::{Error, Result};
use crate::runtime::engine::{ContinuationSink, Engine, Retainer, ValueId};
use crate::runtime::js_value::JSValue;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Behaviour of a fake function value.
#[derive(Debug, Clone)]
pub enum FakeFn {
    /// Append the label to the log.
    Log(&'static str),
    /// Log the first label, then report a continuation that logs the second.
    Continue(&'static str, &'static str),
    /// Log `echo:<first arg>` and return the first argument.
    Echo,
    /// Fail with a script error.
    Throw(&'static str),
    /// Fail with an error the loop cannot recover from.
    Fatal,
    /// Log the label and return a value that cannot be converted, such as a
    /// cyclic object. Only fails when the caller asks for the result.
    Unconvertible(&'static str),
}

#[derive(Debug)]
enum FakeValue {
    Function(FakeFn),
    Data(JSValue),
}

pub struct FakeEngine {
    next_id: u32,
    values: HashMap<ValueId, (FakeValue, usize)>,
    globals: HashMap<String, ValueId>,
    log: Rc<RefCell<Vec<String>>>,
    continuation: Option<ContinuationSink>,
    detached: bool,
}

impl FakeEngine {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            values: HashMap::new(),
            globals: HashMap::new(),
            log: Rc::default(),
            continuation: None,
            detached: false,
        }
    }

    fn insert(&mut self, value: FakeValue) -> ValueId {
        let id = ValueId::new(self.next_id);
        self.next_id += 1;
        self.values.insert(id, (value, 1));
        id
    }

    /// A retained function value.
    pub fn function(&mut self, behaviour: FakeFn) -> ValueId {
        self.insert(FakeValue::Function(behaviour))
    }

    /// Bind a global function; the binding holds one reference.
    pub fn define_global(&mut self, name: &str, behaviour: FakeFn) {
        let id = self.function(behaviour);
        self.globals.insert(name.to_owned(), id);
    }

    pub fn log(&self) -> Vec<String> {
        self.log.borrow().clone()
    }

    pub fn log_handle(&self) -> Rc<RefCell<Vec<String>>> {
        self.log.clone()
    }

    pub fn live_values(&self) -> usize {
        self.values.len()
    }

    pub fn is_detached(&self) -> bool {
        self.detached
    }

    fn push(&self, entry: String) {
        self.log.borrow_mut().push(entry);
    }
}

impl Retainer for FakeEngine {
    fn retain(&mut self, value: ValueId) {
        match self.values.get_mut(&value) {
            Some((_, count)) => *count += 1,
            None => panic!("retain of unknown value {}", value),
        }
    }

    fn release(&mut self, value: ValueId) {
        let Some((_, count)) = self.values.get_mut(&value) else {
            panic!("release of unknown value {}", value);
        };
        *count -= 1;
        if *count == 0 {
            self.values.remove(&value);
        }
    }
}

impl Engine for FakeEngine {
    fn run_script(
        &mut self,
        source: &str,
        origin: &str,
        _source_id: u32,
        _want_result: bool,
    ) -> Result<JSValue> {
        self.push(format!("script[{}]:{}", origin, source));
        Ok(JSValue::Undefined)
    }

    fn call(&mut self, callable: ValueId, args: &[ValueId], want_result: bool) -> Result<JSValue> {
        let behaviour = match self.values.get(&callable) {
            Some((FakeValue::Function(behaviour), _)) => behaviour.clone(),
            Some(_) => return Err(Error::usage("value is not a function")),
            None => return Err(Error::contract(format!("stale value {}", callable))),
        };

        match behaviour {
            FakeFn::Log(label) => {
                self.push(label.to_owned());
                Ok(JSValue::Undefined)
            }
            FakeFn::Continue(label, next) => {
                self.push(label.to_owned());
                let continuation = self.function(FakeFn::Log(next));
                match self.continuation.as_mut() {
                    Some(sink) => sink(continuation),
                    None => self.release(continuation),
                }
                Ok(JSValue::Undefined)
            }
            FakeFn::Echo => {
                let first = match args.first().and_then(|id| self.values.get(id)) {
                    Some((FakeValue::Data(value), _)) => value.clone(),
                    _ => JSValue::Undefined,
                };
                let shown = first
                    .as_str()
                    .map(str::to_owned)
                    .unwrap_or_else(|| format!("{:?}", first));
                self.push(format!("echo:{}", shown));
                Ok(first)
            }
            FakeFn::Throw(message) => Err(Error::script(message)),
            FakeFn::Fatal => Err(Error::contract("engine state corrupted")),
            FakeFn::Unconvertible(label) => {
                self.push(label.to_owned());
                if want_result {
                    Err(Error::usage("Cannot serialize circular reference"))
                } else {
                    Ok(JSValue::Undefined)
                }
            }
        }
    }

    fn global_function(&mut self, name: &str) -> Option<ValueId> {
        let id = *self.globals.get(name)?;
        self.retain(id);
        Some(id)
    }

    fn create_value(&mut self, value: &JSValue) -> Result<ValueId> {
        Ok(self.insert(FakeValue::Data(value.clone())))
    }

    fn set_promise_continuation(&mut self, sink: ContinuationSink) {
        self.continuation = Some(sink);
    }

    fn detach(&mut self) {
        self.detached = true;
    }
}
