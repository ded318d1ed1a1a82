use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::services::{
    PredictInput, PredictOutput, Predictor, RenderInput, RenderOutput, Renderer, ServiceError,
};
use crate::storage::Storage;

/// What a stub collaborator does when called.
#[derive(Debug, Clone)]
pub enum StubBehavior {
    /// Write placeholder artifacts and succeed.
    Succeed,
    /// Return an error carrying this message.
    Fail(String),
    /// Panic with this message.
    Panic(String),
}

impl StubBehavior {
    fn check(&self, program: &str) -> Result<(), ServiceError> {
        match self {
            StubBehavior::Succeed => Ok(()),
            StubBehavior::Fail(message) => Err(ServiceError::Exited {
                program: program.to_string(),
                status: "exit status: 1".to_string(),
                stderr: message.clone(),
            }),
            StubBehavior::Panic(message) => panic!("{}", message),
        }
    }
}

/// Counts calls and tracks how many are in flight at once.
#[derive(Debug, Default)]
struct CallStats {
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl CallStats {
    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Leaves the in-flight count even if the stub panics.
struct Active<'a>(&'a CallStats);

impl Drop for Active<'_> {
    fn drop(&mut self) {
        self.0.exit();
    }
}

pub struct StubPredictor {
    storage: Storage,
    behavior: StubBehavior,
    delay: Duration,
    stats: CallStats,
}

impl StubPredictor {
    pub fn new(storage: Storage, behavior: StubBehavior) -> Self {
        Self {
            storage,
            behavior,
            delay: Duration::ZERO,
            stats: CallStats::default(),
        }
    }

    /// Sleep for `delay` inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.stats.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }
}

impl Predictor for StubPredictor {
    fn predict(&self, input: &PredictInput) -> Result<PredictOutput, ServiceError> {
        self.stats.enter();
        let _active = Active(&self.stats);
        std::thread::sleep(self.delay);
        self.behavior.check("stub-predictor")?;

        self.storage.ensure_file_dir(&input.file_id)?;
        let gaussians_path = self.storage.gaussians_path(&input.file_id);
        std::fs::write(&gaussians_path, b"ply\n")?;
        Ok(PredictOutput { gaussians_path })
    }
}

pub struct StubRenderer {
    storage: Storage,
    behavior: StubBehavior,
    delay: Duration,
    stats: CallStats,
}

impl StubRenderer {
    pub fn new(storage: Storage, behavior: StubBehavior) -> Self {
        Self {
            storage,
            behavior,
            delay: Duration::ZERO,
            stats: CallStats::default(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.stats.calls.load(Ordering::SeqCst)
    }

    /// Largest number of renders that were ever in progress together.
    pub fn peak_concurrency(&self) -> usize {
        self.stats.peak.load(Ordering::SeqCst)
    }
}

impl Renderer for StubRenderer {
    fn render(&self, input: &RenderInput) -> Result<RenderOutput, ServiceError> {
        self.stats.enter();
        let _active = Active(&self.stats);
        std::thread::sleep(self.delay);
        self.behavior.check("stub-renderer")?;

        self.storage.ensure_file_dir(&input.file_id)?;
        let render_path = self.storage.render_path(&input.file_id);
        let render_depth_path = self.storage.render_depth_path(&input.file_id);
        std::fs::write(&render_path, b"mp4")?;
        std::fs::write(&render_depth_path, b"mp4")?;
        Ok(RenderOutput {
            render_path,
            render_depth_path,
        })
    }
}
