//! Single-threaded event loop.
//!
//! The [`Scheduler`] owns the engine, the timer list and the microtask queue.
//! Every iteration drains microtasks, runs the timers that are due, then
//! waits on the ingress queue until the next timer is due or new work
//! arrives. Other threads reach the loop only through a [`Submitter`].

use crate::error::{Error, Result};
use crate::runtime::config::ErrorPolicy;
use crate::runtime::engine::Engine;
use crate::runtime::events::{EventSink, HostEvent};
use crate::runtime::js_value::JSValue;
use crate::runtime::queue::IngressQueue;
use crate::runtime::registry::{CancellationRegistry, TimerId};
use crate::runtime::task::{Responder, Task};
use crate::runtime::timers::TimerList;
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Thread-safe entry point into a running scheduler.
#[derive(Clone, Default)]
pub struct Submitter {
    ingress: Arc<IngressQueue<Task>>,
    registry: Arc<CancellationRegistry>,
}

impl Submitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand a task to the owner thread. A rejected task is returned so the
    /// caller can release what it holds.
    pub fn submit(&self, task: Task) -> std::result::Result<(), Task> {
        self.ingress.enqueue(task)
    }

    pub fn submit_many(&self, tasks: Vec<Task>) -> std::result::Result<(), Vec<Task>> {
        self.ingress.enqueue_many(tasks)
    }

    /// Assign a cancellation id to `task` and submit it.
    pub fn register_cancellable(&self, mut task: Task) -> std::result::Result<TimerId, Task> {
        let id = self.registry.register(task.cancel_flag());
        task.assign_id(id);
        match self.ingress.enqueue(task) {
            Ok(()) => Ok(id),
            Err(task) => {
                self.registry.deregister(id);
                Err(task)
            }
        }
    }

    /// Mark the task behind `id` cancelled. It is removed at its next turn.
    pub fn cancel(&self, id: TimerId) -> Result<()> {
        self.registry.cancel(id)
    }

    /// Stop accepting work and wake the loop.
    pub fn stop(&self) {
        self.ingress.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.ingress.is_stopped()
    }

    pub(crate) fn registry(&self) -> &CancellationRegistry {
        &self.registry
    }

    #[cfg(test)]
    pub(crate) fn ingress(&self) -> &IngressQueue<Task> {
        &self.ingress
    }
}

/// Event loop bound to one engine on its owner thread.
pub struct Scheduler<E: Engine> {
    engine: E,
    submitter: Submitter,
    timers: TimerList,
    microtasks: Rc<RefCell<VecDeque<Task>>>,
    sink: EventSink,
    policy: ErrorPolicy,
}

impl<E: Engine> Scheduler<E> {
    pub fn new(mut engine: E, submitter: Submitter, sink: EventSink, policy: ErrorPolicy) -> Self {
        let microtasks: Rc<RefCell<VecDeque<Task>>> = Rc::default();
        let queue = microtasks.clone();
        engine.set_promise_continuation(Box::new(move |callable| {
            queue.borrow_mut().push_back(Task::continuation(callable));
        }));

        Self {
            engine,
            submitter,
            timers: TimerList::new(),
            microtasks,
            sink,
            policy,
        }
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Run until the ingress queue is stopped and drained.
    ///
    /// Returns the first fatal error under [`ErrorPolicy::Strict`]. Either
    /// way, pending tasks are disposed and the engine is detached.
    pub async fn run(&mut self) -> Result<()> {
        tracing::debug!("event loop started");
        let outcome = self.run_loop().await;
        self.shutdown();
        match &outcome {
            Ok(()) => tracing::debug!("event loop stopped"),
            Err(err) => tracing::error!(error = %err, "event loop terminated"),
        }
        outcome
    }

    async fn run_loop(&mut self) -> Result<()> {
        loop {
            self.drain_microtasks()?;
            let wait = self.run_due_timers()?;

            match self.submitter.ingress.dequeue(wait).await {
                Some(task) => self.classify(task),
                None if self.submitter.is_stopped() => {
                    let remaining = self.submitter.ingress.drain();
                    if remaining.is_empty() {
                        return Ok(());
                    }
                    tracing::debug!(count = remaining.len(), "running work queued before stop");
                    for task in remaining {
                        self.classify(task);
                    }
                }
                // Timed out; a timer is due now.
                None => {}
            }
        }
    }

    fn classify(&mut self, task: Task) {
        if task.is_continuation() {
            self.microtasks.borrow_mut().push_back(task);
        } else {
            self.timers.insert(task);
        }
    }

    /// Run microtasks until the queue is empty, including ones queued meanwhile.
    fn drain_microtasks(&mut self) -> Result<()> {
        loop {
            let next = self.microtasks.borrow_mut().pop_front();
            let Some(mut task) = next else {
                return Ok(());
            };
            let result = task.execute(&mut self.engine);
            let responder = task.take_responder();
            self.dispose(task);
            self.settle(result, responder)?;
        }
    }

    /// Run the timers that were due when this step began.
    ///
    /// Returns how long the loop may wait for new work.
    fn run_due_timers(&mut self) -> Result<Option<Duration>> {
        let started = Instant::now();
        while let Some(mut task) = self.timers.pop_due(started) {
            let result = task.execute(&mut self.engine);

            if task.is_repeating() && task.should_run() && result.is_ok() {
                task.reset_scheduled_time();
                self.timers.insert(task);
            } else {
                let responder = task.take_responder();
                self.dispose(task);
                self.settle(result, responder)?;
            }

            self.drain_microtasks()?;
        }
        Ok(self.timers.next_wait())
    }

    /// Release the task's engine references and reclaim its id.
    fn dispose(&mut self, task: Task) {
        let id = task.id();
        task.release_resources(&mut self.engine);
        if let Some(id) = id {
            self.submitter.registry().deregister(id);
        }
    }

    fn settle(&self, result: Result<JSValue>, responder: Option<Responder>) -> Result<()> {
        let err = match result {
            Ok(value) => {
                if let Some(responder) = responder {
                    responder.send(Ok(value));
                }
                return Ok(());
            }
            Err(err) => err,
        };

        if !err.is_recoverable() && self.policy == ErrorPolicy::Strict {
            self.sink.emit(HostEvent::ScriptFailed(err.to_failure()));
            if let Some(responder) = responder {
                responder.send(Err(Error::Terminated(err.to_string())));
            }
            return Err(err);
        }

        match responder {
            Some(responder) => responder.send(Err(err)),
            None => {
                tracing::warn!(error = %err, "task failed");
                self.sink.emit(HostEvent::ScriptFailed(err.to_failure()));
            }
        }
        Ok(())
    }

    fn shutdown(&mut self) {
        self.submitter.stop();

        let mut leftovers: Vec<Task> = self.microtasks.borrow_mut().drain(..).collect();
        leftovers.extend(self.timers.drain());
        leftovers.extend(self.submitter.ingress.drain());
        if !leftovers.is_empty() {
            tracing::debug!(count = leftovers.len(), "discarding pending tasks");
        }

        for mut task in leftovers {
            if let Some(responder) = task.take_responder() {
                responder.send(Err(Error::Shutdown));
            }
            self.dispose(task);
        }

        self.engine.detach();
    }
}
