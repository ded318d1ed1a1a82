use std::sync::Arc;
use std::time::Duration;

use mlsharp_backend::test_util::{
    create_test_state, test_config, wait_for_terminal, StubBehavior, StubPredictor, StubRenderer,
};
use mlsharp_backend::{AppState, Storage};
use mlsharp_common::{RenderParams, TaskStatus};

struct Scenario {
    _dir: tempfile::TempDir,
    storage: Storage,
    state: AppState,
    predictor: Arc<StubPredictor>,
    renderer: Arc<StubRenderer>,
}

fn scenario(workers: usize, gpu_slots: usize, render_delay: Duration) -> Scenario {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.runner.max_workers = workers;
    config.runner.max_gpu_tasks = gpu_slots;

    let storage = Storage::new(dir.path());
    let predictor = Arc::new(StubPredictor::new(storage.clone(), StubBehavior::Succeed));
    let renderer = Arc::new(
        StubRenderer::new(storage.clone(), StubBehavior::Succeed).with_delay(render_delay),
    );
    let state = create_test_state(config, predictor.clone(), renderer.clone());

    Scenario {
        _dir: dir,
        storage,
        state,
        predictor,
        renderer,
    }
}

impl Scenario {
    /// Upload and predict a file, waiting for the gaussians.
    fn predicted(&self, file_id: &str) {
        let path = self.storage.persist_upload(file_id, "scene.jpg", b"jpg").unwrap();
        let job = self
            .state
            .jobs
            .submit_predict(file_id, "scene.jpg", &path.to_string_lossy(), None)
            .unwrap();
        let task = wait_for_terminal(&self.state.repo, &job.task_id);
        assert_eq!(task.status, TaskStatus::Completed);
    }
}

#[test]
fn test_gpu_admission_never_exceeds_capacity() {
    let s = scenario(6, 2, Duration::from_millis(40));
    s.predicted("f1");

    let task_ids: Vec<String> = (0..6)
        .map(|_| {
            s.state
                .jobs
                .submit_render("f1", RenderParams::default())
                .unwrap()
                .task_id
        })
        .collect();

    for task_id in &task_ids {
        let task = wait_for_terminal(&s.state.repo, task_id);
        assert_eq!(task.status, TaskStatus::Completed);
    }
    assert_eq!(s.renderer.calls(), 6);
    assert!(s.renderer.peak_concurrency() <= 2);
}

#[test]
fn test_single_slot_runs_renders_one_at_a_time() {
    let s = scenario(2, 1, Duration::from_millis(30));
    s.predicted("f1");

    let r1 = s.state.jobs.submit_render("f1", RenderParams::default()).unwrap();
    let r2 = s.state.jobs.submit_render("f1", RenderParams::default()).unwrap();

    let t1 = wait_for_terminal(&s.state.repo, &r1.task_id);
    let t2 = wait_for_terminal(&s.state.repo, &r2.task_id);
    assert_eq!(t1.status, TaskStatus::Completed);
    assert_eq!(t2.status, TaskStatus::Completed);
    assert_eq!(s.renderer.peak_concurrency(), 1);
}

#[test]
fn test_predict_proceeds_while_gpu_is_busy() {
    let s = scenario(3, 1, Duration::from_millis(500));
    s.predicted("f1");

    let render = s.state.jobs.submit_render("f1", RenderParams::default()).unwrap();
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(s.state.jobs.gpu_stats().unwrap().in_use, 1);

    // A predict job finishes while the only GPU slot is still held.
    s.predicted("f2");
    let render_task = s.state.repo.get_task(&render.task_id).unwrap();
    assert_eq!(render_task.status, TaskStatus::Running);

    let render_task = wait_for_terminal(&s.state.repo, &render.task_id);
    assert_eq!(render_task.status, TaskStatus::Completed);
    assert_eq!(s.predictor.calls(), 2);
}

#[test]
fn test_every_job_reaches_a_terminal_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    config.runner.max_workers = 3;
    let storage = Storage::new(dir.path());
    let predictor = Arc::new(StubPredictor::new(
        storage.clone(),
        StubBehavior::Panic("worker blew up".to_string()),
    ));
    let renderer = Arc::new(StubRenderer::new(storage.clone(), StubBehavior::Succeed));
    let state = create_test_state(config, predictor, renderer);

    let task_ids: Vec<String> = (0..10)
        .map(|i| {
            let file_id = format!("f{}", i);
            let path = storage.persist_upload(&file_id, "a.png", b"png").unwrap();
            state
                .jobs
                .submit_predict(&file_id, "a.png", &path.to_string_lossy(), None)
                .unwrap()
                .task_id
        })
        .collect();

    for task_id in &task_ids {
        let task = wait_for_terminal(&state.repo, task_id);
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(task.error.as_deref().unwrap().contains("worker blew up"));
    }
}
