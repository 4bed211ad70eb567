//! Runtime configuration for a single scripting engine instance.
//!
//! This module defines the configuration structure for runtimes, including
//! heap limits, bootstrap options and the event loop's error policy.

use crate::error::{Error, Result};
use serde::Deserialize;

/// What the event loop does with an error that is not script-domain.
///
/// Script exceptions, engine usage errors and argument resolution failures
/// are always reported and survived. Anything else is reported too; `Strict`
/// then terminates the owner thread with that error, `Lenient` keeps going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    #[default]
    Strict,
    Lenient,
}

fn default_enable_console() -> bool {
    true
}

fn default_thread_name() -> String {
    "jshost-runtime".to_string()
}

/// Runtime configuration for a single JavaScript isolate.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Maximum heap size in bytes (None = V8 default)
    pub max_heap_size: Option<usize>,

    /// Initial heap size in bytes (None = V8 default)
    pub initial_heap_size: Option<usize>,

    /// Bootstrap script to run on startup
    pub bootstrap_script: Option<String>,

    /// Forward `console.*` to tracing (default: true)
    pub enable_console: bool,

    pub error_policy: ErrorPolicy,

    /// Name of the owner thread
    pub thread_name: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_heap_size: None,
            initial_heap_size: None,
            bootstrap_script: None,
            enable_console: default_enable_console(),
            error_policy: ErrorPolicy::default(),
            thread_name: default_thread_name(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_heap_size(mut self, bytes: usize) -> Self {
        self.max_heap_size = Some(bytes);
        self
    }

    pub fn with_initial_heap_size(mut self, bytes: usize) -> Self {
        self.initial_heap_size = Some(bytes);
        self
    }

    pub fn with_bootstrap(mut self, source: impl Into<String>) -> Self {
        self.bootstrap_script = Some(source.into());
        self
    }

    pub fn with_console(mut self, enabled: bool) -> Self {
        self.enable_console = enabled;
        self
    }

    pub fn with_error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Check heap limits before any engine is created.
    pub fn validate(&self) -> Result<()> {
        if self.initial_heap_size.is_some() && self.max_heap_size.is_none() {
            return Err(Error::config(
                "initial_heap_size requires max_heap_size to be set as well",
            ));
        }

        if let (Some(initial), Some(max)) = (self.initial_heap_size, self.max_heap_size) {
            if initial > max {
                return Err(Error::config(format!(
                    "initial_heap_size ({}) cannot exceed max_heap_size ({})",
                    initial, max
                )));
            }
        }

        if self.thread_name.is_empty() {
            return Err(Error::config("thread_name cannot be empty"));
        }

        Ok(())
    }

    /// `(initial, max)` heap limits in bytes, if limits were requested.
    pub fn heap_limits(&self) -> Option<(usize, usize)> {
        self.max_heap_size
            .map(|max| (self.initial_heap_size.unwrap_or(0), max))
    }
}
