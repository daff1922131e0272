// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Reader task: runs the stripe reader on its own thread.
//
// The task owns its copy of the job, the transport and the rear spool while
// it runs, and hands the transport and spool back through `join`. The session
// never shares mutable state with it: cancellation is a flag plus dropping the
// pipe's reading side, and the only results are the pipe and the outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use scanwerk_core::{Result, ScanError};
use scanwerk_transport::Transport;
use tracing::{debug, warn};

use crate::pipe::PipeWriter;
use crate::reader::{Reader, ReaderJob};
use crate::spool::RearSpool;

/// What the task returns when it ends.
pub struct TaskOutcome {
    /// `None` only when the task thread panicked.
    pub transport: Option<Box<dyn Transport>>,
    pub spool: Option<RearSpool>,
    pub status: Result<()>,
}

pub struct ReaderTask {
    cancel: Arc<AtomicBool>,
    done: Receiver<()>,
    handle: Option<JoinHandle<TaskOutcome>>,
}

impl ReaderTask {
    /// Start reading `job` into `out` on a new thread.
    pub fn spawn(
        job: ReaderJob,
        transport: Box<dyn Transport>,
        spool: Option<RearSpool>,
        out: PipeWriter,
    ) -> Result<Self> {
        let cancel = Arc::new(AtomicBool::new(false));
        let (done_tx, done) = mpsc::channel();
        let flag = Arc::clone(&cancel);
        let handle = thread::Builder::new()
            .name("scanwerk-reader".into())
            .spawn(move || {
                let mut transport = transport;
                let mut spool = spool;
                let mut out = out;
                let status = Reader::new(&job, &flag).run(&mut *transport, &mut spool, &mut out);
                // Closing the pipe is the consumer's end-of-data.
                drop(out);
                match &status {
                    Ok(()) => debug!("reader task finished"),
                    Err(err) => debug!(error = %err, "reader task stopped"),
                }
                let _ = done_tx.send(());
                TaskOutcome {
                    transport: Some(transport),
                    spool,
                    status,
                }
            })
            .map_err(|e| ScanError::Io(format!("cannot spawn reader task: {e}")))?;
        Ok(Self {
            cancel,
            done,
            handle: Some(handle),
        })
    }

    /// Ask the task to stop at the next stripe.
    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::Release);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().is_none_or(|h| h.is_finished())
    }

    /// Wait up to `timeout` for the task to finish its work.
    pub fn wait_done(&self, timeout: Duration) -> bool {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => self.is_finished(),
        }
    }

    /// Collect the outcome. Blocks until the thread has exited.
    pub fn join(mut self) -> TaskOutcome {
        let Some(handle) = self.handle.take() else {
            return TaskOutcome {
                transport: None,
                spool: None,
                status: Err(ScanError::Io("reader task already joined".into())),
            };
        };
        match handle.join() {
            Ok(outcome) => outcome,
            Err(_) => {
                warn!("reader task panicked; device handle lost");
                TaskOutcome {
                    transport: None,
                    spool: None,
                    status: Err(ScanError::Io("reader task panicked".into())),
                }
            }
        }
    }
}

impl Drop for ReaderTask {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.cancel.store(true, Ordering::Release);
            let _ = handle.join();
        }
    }
}
