//! The I/O executor archives are produced on.

use std::{io, time::Duration};

use log::debug;
use tokio::{
    runtime::{Builder, Handle, Runtime},
    task::JoinHandle,
};

/// Name given to the executor's thread.
pub const THREAD_NAME: &str = "tar-io";

/// How long [`IoExecutor::shutdown`] waits for a running archive.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

/// A dedicated single-threaded runtime for blocking archive I/O.
///
/// Work spawned here runs on one thread named `tar-io`, one job at a time,
/// so archives never compete with each other for the disk.  Each executor is
/// independent; there is no global instance.
#[derive(Debug)]
pub struct IoExecutor {
    runtime: Runtime,
}

impl IoExecutor {
    pub fn start() -> io::Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(1)
            .thread_name(THREAD_NAME)
            .build()?;
        debug!("started {THREAD_NAME} executor");
        Ok(Self { runtime })
    }

    /// Run blocking `job` on the executor thread.
    pub fn spawn<F, R>(&self, job: F) -> JoinHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        self.runtime.spawn_blocking(job)
    }

    pub fn handle(&self) -> &Handle {
        self.runtime.handle()
    }

    /// Stop the executor, giving running work a grace period to finish.
    ///
    /// Must not be called from within an async context.
    pub fn shutdown(self) {
        debug!("shutting down {THREAD_NAME} executor");
        self.runtime.shutdown_timeout(SHUTDOWN_GRACE);
    }
}
