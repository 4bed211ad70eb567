//! Owner thread backed by `deno_core::JsRuntime`.
//!
//! This module hosts the engine on a dedicated OS thread with a
//! single-threaded Tokio runtime. The thread initializes the engine, reports
//! back to the spawning thread, and then runs the [`Scheduler`] until the
//! ingress queue is stopped.

use crate::error::{Error, Result};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::events::EventSink;
use crate::runtime::scheduler::{Scheduler, Submitter};
use crate::runtime::v8_engine::V8Engine;
use std::sync::mpsc::{Receiver as StdReceiver, Sender as StdSender};
use std::thread::JoinHandle;

type InitSignalChannel = (StdSender<Result<()>>, StdReceiver<Result<()>>);

/// Start the owner thread. Returns once the engine is initialized.
pub fn spawn_runtime_thread(
    config: RuntimeConfig,
    sink: EventSink,
) -> Result<(Submitter, JoinHandle<Result<()>>)> {
    config.validate()?;

    let submitter = Submitter::new();
    let (init_tx, init_rx): InitSignalChannel = std::sync::mpsc::channel();

    let thread_submitter = submitter.clone();
    let handle = std::thread::Builder::new()
        .name(config.thread_name.clone())
        .spawn(move || run_owner_thread(config, thread_submitter, sink, init_tx))
        .map_err(|e| Error::Spawn(e.to_string()))?;

    match init_rx.recv() {
        Ok(Ok(())) => Ok((submitter, handle)),
        Ok(Err(err)) => {
            let _ = handle.join();
            Err(err)
        }
        Err(_) => {
            let _ = handle.join();
            Err(Error::Spawn(
                "runtime thread exited during initialization".to_string(),
            ))
        }
    }
}

fn run_owner_thread(
    config: RuntimeConfig,
    submitter: Submitter,
    sink: EventSink,
    init_tx: StdSender<Result<()>>,
) -> Result<()> {
    let tokio_rt = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            let message = format!("failed to build tokio runtime: {}", err);
            let _ = init_tx.send(Err(Error::Spawn(message.clone())));
            return Err(Error::Spawn(message));
        }
    };

    let _guard = tokio_rt.enter();
    let engine = match V8Engine::new(&config, submitter.clone(), sink.clone()) {
        Ok(engine) => engine,
        Err(err) => {
            tracing::error!(error = %err, "engine initialization failed");
            let _ = init_tx.send(Err(err));
            return Ok(());
        }
    };

    let mut scheduler = Scheduler::new(engine, submitter, sink, config.error_policy);
    let _ = init_tx.send(Ok(()));
    tracing::debug!(thread = %config.thread_name, "runtime thread initialized");

    tokio_rt.block_on(scheduler.run())
}
