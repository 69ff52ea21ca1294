use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};

use anyhow::{anyhow, Context, Result};

use crate::orchestrator::Orchestrator;
use crate::outcome::RunReport;
use crate::progress::{CancelToken, ProgressEvent};

/// A run executing on its own worker thread.
pub struct RunHandle {
    cancel: CancelToken,
    events: Receiver<ProgressEvent>,
    worker: JoinHandle<RunReport>,
}

impl RunHandle {
    /// Asks the worker to stop before its next step.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    pub fn join(self) -> Result<RunReport> {
        self.worker
            .join()
            .map_err(|_| anyhow!("the upgrade worker panicked"))
    }
}

pub fn spawn_run(orchestrator: Orchestrator) -> Result<RunHandle> {
    let (sender, events) = mpsc::channel();
    let cancel = CancelToken::new();
    let worker_cancel = cancel.clone();
    let worker = thread::Builder::new()
        .name("dsupgrade-run".to_string())
        .spawn(move || orchestrator.run(sender, worker_cancel))
        .context("failed to start the upgrade worker")?;
    Ok(RunHandle {
        cancel,
        events,
        worker,
    })
}
