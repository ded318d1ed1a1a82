use std::sync::Arc;

use tokio::net::TcpListener;

use mlsharp_backend::{
    logging, routes, AppState, CommandPredictor, CommandRenderer, Config, GpuGate, JobExecutor,
    JobOrchestrator, Repository, Storage, TaskRunner,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    logging::init(&config.logging.level);

    tracing::info!("Starting mlsharp server");

    // Initialize components
    let storage = Storage::new(&config.storage.data_dir);
    std::fs::create_dir_all(storage.data_dir())?;
    let repo = Arc::new(Repository::new(&config.storage.database_url)?);

    let gate = GpuGate::start(config.runner.max_gpu_tasks)?;
    let runner = TaskRunner::new(config.runner.max_workers)?.with_gpu_gate(gate);

    let predictor = Arc::new(CommandPredictor::new(config.predictor.clone(), storage.clone()));
    let renderer = Arc::new(CommandRenderer::new(config.renderer.clone(), storage.clone()));
    tracing::info!(
        "Predictor: {} {:?}, renderer: {} {:?}",
        config.predictor.program,
        config.predictor.args,
        config.renderer.program,
        config.renderer.args
    );

    let executor = JobExecutor::new(Arc::clone(&repo), predictor, renderer);
    let jobs = JobOrchestrator::new(Arc::clone(&repo), runner, executor);

    let addr = format!("{}:{}", config.api.host, config.api.port);
    let state = Arc::new(AppState {
        config,
        storage,
        repo,
        jobs,
    });

    let app = routes::router(state);

    // Start server
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
