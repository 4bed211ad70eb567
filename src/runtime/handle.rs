//! Host-facing handle for interacting with the runtime thread.

use crate::error::{Error, Result};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::events::{EventSink, HostEvent};
use crate::runtime::js_value::JSValue;
use crate::runtime::registry::TimerId;
use crate::runtime::runner::spawn_runtime_thread;
use crate::runtime::scheduler::Submitter;
use crate::runtime::task::{Responder, Task};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Duration;
use tokio::sync::oneshot;

/// Cloneable handle to one runtime. The last clone to drop closes it.
#[derive(Clone)]
pub struct RuntimeHandle {
    inner: Arc<Inner>,
}

struct Inner {
    submitter: Submitter,
    owner: ThreadId,
    thread: Mutex<Option<JoinHandle<Result<()>>>>,
}

impl Inner {
    /// Stop the loop and join the owner thread.
    ///
    /// On the owner thread itself the loop is only told to stop; the join
    /// handle stays in place so a host thread can still wait for the exit.
    fn close(&self) -> Result<()> {
        self.submitter.stop();

        if std::thread::current().id() == self.owner {
            tracing::warn!("runtime closed from its own thread; not joining");
            return Err(Error::contract(
                "runtime cannot be joined from its own thread",
            ));
        }

        let Some(thread) = self.thread.lock().take() else {
            return Ok(());
        };

        match thread.join() {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::Terminated("runtime thread panicked".to_string())),
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if std::thread::current().id() == self.owner {
            // Last handle went away inside an event callback; the loop
            // winds down on its own.
            self.submitter.stop();
            return;
        }
        if let Err(err) = self.close() {
            tracing::warn!(error = %err, "runtime exited with an error");
        }
    }
}

impl RuntimeHandle {
    /// Start a runtime. Events are delivered to `sink` on the owner thread.
    pub fn spawn(config: RuntimeConfig, sink: EventSink) -> Result<Self> {
        let (submitter, thread) = spawn_runtime_thread(config, sink)?;
        Ok(Self {
            inner: Arc::new(Inner {
                submitter,
                owner: thread.thread().id(),
                thread: Mutex::new(Some(thread)),
            }),
        })
    }

    /// Start a runtime whose events arrive on a channel.
    pub fn spawn_with_channel(config: RuntimeConfig) -> Result<(Self, mpsc::Receiver<HostEvent>)> {
        let (sink, events) = EventSink::channel();
        Ok((Self::spawn(config, sink)?, events))
    }

    fn submit(&self, task: Task) -> Result<()> {
        self.inner
            .submitter
            .submit(task)
            .map_err(|_| Error::Shutdown)
    }

    fn check_not_owner(&self) -> Result<()> {
        if std::thread::current().id() == self.inner.owner {
            return Err(Error::contract(
                "blocking call made from the runtime's own thread",
            ));
        }
        Ok(())
    }

    /// Queue `source` for execution.
    pub fn submit_script(&self, source: impl Into<String>) -> Result<()> {
        self.submit(Task::script(source, None))
    }

    /// Queue `source`, reporting failures against `origin`.
    pub fn submit_script_named(
        &self,
        source: impl Into<String>,
        origin: impl Into<String>,
    ) -> Result<()> {
        self.submit(Task::script(source, Some(origin.into())))
    }

    /// Read a script from disk and queue it, using the path as origin.
    pub fn submit_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        self.submit_script_named(source, path.display().to_string())
    }

    /// Queue a call of the global function `name`. A missing function is not an error.
    pub fn invoke(&self, name: impl Into<String>, args: Vec<JSValue>) -> Result<()> {
        self.submit(Task::invoke_global(name, args))
    }

    /// Run `code` and wait for its completion value.
    pub fn eval(&self, code: &str) -> Result<JSValue> {
        self.check_not_owner()?;
        let (result_tx, result_rx) = mpsc::channel();
        self.submit(Task::script(code, Some("<eval>".to_string())).with_responder(Responder::Sync(result_tx)))?;

        result_rx.recv().map_err(|_| Error::Shutdown)?
    }

    pub async fn eval_async(&self, code: &str) -> Result<JSValue> {
        let (result_tx, result_rx) = oneshot::channel();
        self.submit(
            Task::script(code, Some("<eval_async>".to_string()))
                .with_responder(Responder::Async(result_tx)),
        )?;

        result_rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Call the global function `name` and wait for its return value.
    pub fn call(&self, name: &str, args: Vec<JSValue>) -> Result<JSValue> {
        self.check_not_owner()?;
        let (result_tx, result_rx) = mpsc::channel();
        self.submit(Task::invoke_global(name, args).with_responder(Responder::Sync(result_tx)))?;

        result_rx.recv().map_err(|_| Error::Shutdown)?
    }

    /// Call the global function `name` after `delay`, optionally repeating.
    /// The returned id shares its space with `setTimeout`/`setInterval`.
    pub fn schedule(
        &self,
        name: impl Into<String>,
        args: Vec<JSValue>,
        delay: Duration,
        repeat: bool,
    ) -> Result<TimerId> {
        let task = Task::invoke_global(name, args)
            .with_delay(delay)
            .repeating(repeat);
        self.inner
            .submitter
            .register_cancellable(task)
            .map_err(|_| Error::Shutdown)
    }

    /// Cancel a timer from any thread.
    pub fn cancel(&self, id: TimerId) -> Result<()> {
        self.inner.submitter.cancel(id)
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.submitter.is_stopped()
    }

    /// Stop the runtime and wait for its thread.
    ///
    /// Work queued before this call still runs. Returns the loop's fatal
    /// error, if it had one. Later calls return `Ok(())`. Called from an
    /// event callback, this only stops the loop and returns a contract error.
    pub fn close(&self) -> Result<()> {
        self.inner.close()
    }
}
