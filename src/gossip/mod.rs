//! This module contains the implementation details of `ripple`.
//!
//! By default, it is hidden to the user, unless explicitly enabled
//! with the feature flag `expose_impl`.

#[cfg(not(feature = "expose_impl"))]
mod socket;

#[cfg(feature = "expose_impl")]
pub mod socket;

pub mod api;
pub mod channel;
pub mod collections;
pub mod config;
pub mod error;
pub mod graph;
pub mod listener;
pub mod message;
pub mod node;
pub mod registry;
pub mod uid;

use std::ops::Drop;
use std::sync::atomic::{AtomicBool, Ordering};

use error::*;

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configures the init process of the library.
pub struct InitConfig {
    /// Number of worker threads used by the async runtime.
    pub async_threads: usize,
}

/// Handle to the global data (registries, runtime).
///
/// When dropped, the data is deinitialized.
pub struct InitGuard {
    /// The runtime `init` built. `None` when `init` was called from
    /// inside an already-running Tokio context (detected via
    /// `tokio::runtime::Handle::try_current`), since Tokio refuses to
    /// nest one multi-thread runtime inside another.
    runtime: Option<tokio::runtime::Runtime>,
}

impl InitGuard {
    /// A handle into the runtime this guard owns, or into whichever
    /// runtime `init` was called from if it didn't build its own.
    pub fn handle(&self) -> tokio::runtime::Handle {
        match &self.runtime {
            Some(runtime) => runtime.handle().clone(),
            None => tokio::runtime::Handle::current(),
        }
    }

    /// Runs `future` to completion on the owned runtime. Only valid
    /// when `init` built one, i.e. when the caller wasn't already
    /// inside a Tokio context; panics otherwise, same as
    /// `Runtime::block_on` would.
    pub fn block_on<F: std::future::Future>(&self, future: F) -> F::Output {
        self.runtime
            .as_ref()
            .expect("no owned runtime to block on; caller is already inside one")
            .block_on(future)
    }
}

/// Initializes global data: the async runtime and the process-wide
/// connection and node registries.
///
/// Should always be called before other methods, otherwise runtime
/// panics may ensue.
pub fn init(c: InitConfig) -> Result<Option<InitGuard>> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Ok(None);
    }
    tracing::debug!(threads = c.async_threads, "initializing ripple runtime");

    // A caller already running inside `#[tokio::main]`/`#[tokio::test]`
    // has a runtime; building a second multi-thread one and never
    // entering it would just burn worker threads for nothing, and
    // Tokio panics if init tries to block_on from inside one runtime
    // onto another. Only stand up an owned runtime when there isn't
    // one already current.
    let runtime = if tokio::runtime::Handle::try_current().is_err() {
        Some(
            tokio::runtime::Builder::new_multi_thread()
                .worker_threads(c.async_threads.max(1))
                .thread_name("ripple-worker")
                .thread_stack_size(2 * 1024 * 1024)
                .enable_all()
                .build()
                .wrapped(ErrorKind::Runtime)?,
        )
    } else {
        None
    };

    registry::connection::init();
    registry::node::init();
    node::verbs::init();
    uid::init();
    Ok(Some(InitGuard { runtime }))
}

impl Drop for InitGuard {
    fn drop(&mut self) {
        teardown();
    }
}

fn teardown() {
    INITIALIZED.store(false, Ordering::SeqCst);
    registry::connection::clear();
    registry::node::clear();
    tracing::debug!("ripple runtime torn down");
}
