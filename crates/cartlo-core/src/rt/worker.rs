//! # Worker Threads
//!
//! One named OS thread per long-running operation, paired with the
//! [`StopToken`] it polls between steps.
//!
//! ## Example
//!
//! ```rust
//! use cartlo_core::rt::{Worker, WorkerConfig};
//!
//! let worker = Worker::spawn(WorkerConfig::new("iv_curve"), |stop| {
//!     let mut steps = 0;
//!     while !stop.is_stopped() && steps < 10 {
//!         steps += 1;
//!     }
//!     steps
//! })
//! .unwrap();
//!
//! assert_eq!(worker.join(), Some(10));
//! ```

use std::thread::{self, JoinHandle};

use tracing::warn;

use super::stop::StopToken;
use crate::error::{LoError, LoResult};

/// Configuration for spawning a worker thread.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Thread name (for debugging)
    pub name: String,
    /// Stack size in bytes (0 = default)
    pub stack_size: usize,
}

impl WorkerConfig {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stack_size: 0,
        }
    }

    /// Set stack size in bytes.
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new("cartlo_worker")
    }
}

/// Handle to a running background operation.
#[derive(Debug)]
pub struct Worker<T> {
    name: String,
    stop: StopToken,
    handle: Option<JoinHandle<T>>,
}

impl<T: Send + 'static> Worker<T> {
    /// Spawn `f` on a named thread with a fresh stop token.
    pub fn spawn<F>(config: WorkerConfig, f: F) -> LoResult<Self>
    where
        F: FnOnce(StopToken) -> T + Send + 'static,
    {
        Self::spawn_with_token(config, StopToken::new(), f)
    }

    /// Spawn `f` sharing an existing stop token.
    pub fn spawn_with_token<F>(config: WorkerConfig, stop: StopToken, f: F) -> LoResult<Self>
    where
        F: FnOnce(StopToken) -> T + Send + 'static,
    {
        let mut builder = thread::Builder::new().name(config.name.clone());
        if config.stack_size > 0 {
            builder = builder.stack_size(config.stack_size);
        }

        let token = stop.clone();
        let handle = builder
            .spawn(move || f(token))
            .map_err(|e| LoError::Spawn(e.to_string()))?;

        Ok(Self {
            name: config.name,
            stop,
            handle: Some(handle),
        })
    }
}

impl<T> Worker<T> {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Request a cooperative stop.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_token(&self) -> StopToken {
        self.stop.clone()
    }

    /// True once the thread body has returned.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }

    /// Wait for the thread and take its result; `None` if it panicked.
    pub fn join(mut self) -> Option<T> {
        let handle = self.handle.take()?;
        match handle.join() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(worker = %self.name, "Worker thread panicked");
                None
            }
        }
    }
}

impl<T> Drop for Worker<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.stop.stop();
            let _ = handle.join();
        }
    }
}
