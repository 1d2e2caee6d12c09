//! Ordered release of per-connection resources
//!
//! Closing a TLS connection touches several independent resources. Each
//! release step runs immediately, in the order it is called, and a failing or
//! panicking step never prevents the following ones from running. Only the
//! final step decides the result handed back to the caller.

use std::fmt::Display;
use std::panic::{self, AssertUnwindSafe};

/// Runner for a fixed sequence of release steps
#[derive(Debug)]
pub struct Teardown {
    label: &'static str,
    failures: usize,
}

impl Teardown {
    pub fn new(label: &'static str) -> Self {
        Teardown { label, failures: 0 }
    }

    /// Run a step whose failure is logged and swallowed
    pub fn release<F, E>(&mut self, step: &'static str, f: F)
    where
        F: FnOnce() -> Result<(), E>,
        E: Display,
    {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(Ok(())) => {
                tracing::trace!("{}: {} released", self.label, step);
            }
            Ok(Err(e)) => {
                self.failures += 1;
                tracing::warn!("{}: {} failed: {}", self.label, step, e);
            }
            Err(_) => {
                self.failures += 1;
                tracing::warn!("{}: {} panicked", self.label, step);
            }
        }
    }

    /// Run the last step and return its result
    pub fn finish<F, T, E>(self, step: &'static str, f: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: Display,
    {
        let result = f();
        if let Err(e) = &result {
            tracing::debug!("{}: {} failed: {}", self.label, step, e);
        }
        result
    }

    /// Number of release steps that failed so far
    pub fn failures(&self) -> usize {
        self.failures
    }
}
