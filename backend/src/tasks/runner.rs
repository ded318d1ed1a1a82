//! Fixed-size worker pool for blocking jobs.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;

use tokio::sync::{mpsc, oneshot};

use super::{GpuGate, RunnerError};

/// A unit of work executed on a worker thread.
///
/// Any `FnOnce() + Send + 'static` closure is work. Types that need to record
/// why they never ran can implement the trait directly and override
/// [`Work::abandon`].
pub trait Work: Send + 'static {
    fn run(self: Box<Self>);

    /// Called instead of [`Work::run`] when the work could not be admitted.
    fn abandon(self: Box<Self>, reason: RunnerError) {
        tracing::error!("Work abandoned before it started: {}", reason);
    }
}

impl<F> Work for F
where
    F: FnOnce() + Send + 'static,
{
    fn run(self: Box<Self>) {
        (*self)()
    }
}

/// How a submitted unit of work ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkOutcome {
    /// The work ran to the end.
    Finished,
    /// The work panicked; the message is the panic payload if it was a string.
    Panicked(String),
    /// The work never ran.
    Abandoned(RunnerError),
    /// The runner went away without reporting.
    Lost,
}

/// Returned by [`TaskRunner::submit`]. Dropping it does not affect the work.
#[derive(Debug)]
pub struct TaskHandle {
    task_id: String,
    done_rx: oneshot::Receiver<WorkOutcome>,
}

impl TaskHandle {
    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    /// Block the current thread until the work is done.
    ///
    /// Must not be called from inside an async runtime; use
    /// [`TaskHandle::finished`] there.
    pub fn wait(self) -> WorkOutcome {
        self.done_rx.blocking_recv().unwrap_or(WorkOutcome::Lost)
    }

    pub async fn finished(self) -> WorkOutcome {
        self.done_rx.await.unwrap_or(WorkOutcome::Lost)
    }
}

/// A queued unit of work.
struct Dispatch {
    task_id: String,
    work: Box<dyn Work>,
    /// Set only for GPU work.
    gate: Option<GpuGate>,
    done_tx: oneshot::Sender<WorkOutcome>,
}

/// Runs submitted work on a fixed pool of OS threads.
///
/// GPU-bound work acquires a slot from the [`GpuGate`] on its worker thread
/// before running and releases it afterwards, whether the work returned or
/// panicked. Dropping the runner stops accepting work, lets the workers drain
/// what is already queued, and joins them.
pub struct TaskRunner {
    queue_tx: Option<mpsc::UnboundedSender<Dispatch>>,
    workers: Vec<JoinHandle<()>>,
    gate: Option<GpuGate>,
}

impl TaskRunner {
    /// Spawn `max_workers` worker threads.
    pub fn new(max_workers: usize) -> Result<Self, RunnerError> {
        if max_workers == 0 {
            return Err(RunnerError::InvalidCapacity {
                what: "worker count",
                value: max_workers,
            });
        }

        let (queue_tx, queue_rx) = mpsc::unbounded_channel::<Dispatch>();
        let queue_rx = Arc::new(Mutex::new(queue_rx));

        let mut workers = Vec::with_capacity(max_workers);
        for index in 0..max_workers {
            let name = format!("task-worker-{}", index);
            let queue_rx = Arc::clone(&queue_rx);
            let handle = std::thread::Builder::new()
                .name(name.clone())
                .spawn(move || worker_loop(queue_rx))
                .map_err(|e| RunnerError::Spawn(name, e.to_string()))?;
            workers.push(handle);
        }

        tracing::info!("Task runner started with {} worker(s)", max_workers);

        Ok(Self {
            queue_tx: Some(queue_tx),
            workers,
            gate: None,
        })
    }

    /// Route GPU work through `gate`.
    pub fn with_gpu_gate(mut self, gate: GpuGate) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn gpu_gate(&self) -> Option<&GpuGate> {
        self.gate.as_ref()
    }

    /// Fail with [`RunnerError::GateNotConfigured`] if GPU work cannot be accepted.
    pub fn ensure_gpu_ready(&self) -> Result<(), RunnerError> {
        self.gate
            .as_ref()
            .map(|_| ())
            .ok_or(RunnerError::GateNotConfigured)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue `work` and return immediately.
    ///
    /// GPU work on a runner without a gate is rejected here rather than left
    /// to wait forever.
    pub fn submit(
        &self,
        task_id: impl Into<String>,
        work: impl Work,
        requires_gpu: bool,
    ) -> Result<TaskHandle, RunnerError> {
        let task_id = task_id.into();

        let gate = if requires_gpu {
            Some(self.gate.clone().ok_or(RunnerError::GateNotConfigured)?)
        } else {
            None
        };
        let queue_tx = self.queue_tx.as_ref().ok_or(RunnerError::Shutdown)?;

        let (done_tx, done_rx) = oneshot::channel();
        queue_tx
            .send(Dispatch {
                task_id: task_id.clone(),
                work: Box::new(work),
                gate,
                done_tx,
            })
            .map_err(|_| RunnerError::Shutdown)?;

        tracing::debug!(task_id = %task_id, requires_gpu, "Submitted work");
        Ok(TaskHandle { task_id, done_rx })
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        // Closing the queue ends each worker loop once the backlog is drained.
        self.queue_tx.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                tracing::warn!("Task worker exited with a panic");
            }
        }
    }
}

fn worker_loop(queue_rx: Arc<Mutex<mpsc::UnboundedReceiver<Dispatch>>>) {
    loop {
        let next = queue_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .blocking_recv();
        let Some(dispatch) = next else {
            break;
        };

        let task_id = dispatch.task_id;
        let outcome = execute(&task_id, dispatch.work, dispatch.gate);
        // The submitter may have dropped its handle.
        let _ = dispatch.done_tx.send(outcome);
    }
}

fn execute(task_id: &str, work: Box<dyn Work>, gate: Option<GpuGate>) -> WorkOutcome {
    let permit = match gate.as_ref().map(GpuGate::acquire) {
        None => None,
        Some(Ok(permit)) => Some(permit),
        Some(Err(reason)) => {
            tracing::error!(task_id, "Could not acquire GPU slot: {}", reason);
            let abandoned = reason.clone();
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(move || work.abandon(abandoned))) {
                tracing::error!(task_id, "Abandon handler panicked: {}", panic_message(&*payload));
            }
            return WorkOutcome::Abandoned(reason);
        }
    };

    let result = panic::catch_unwind(AssertUnwindSafe(move || work.run()));
    drop(permit);

    match result {
        Ok(()) => WorkOutcome::Finished,
        Err(payload) => {
            let message = panic_message(&*payload);
            tracing::error!(task_id, "Work panicked: {}", message);
            WorkOutcome::Panicked(message)
        }
    }
}

/// Text of a caught panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
