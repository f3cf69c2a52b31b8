use api::routes::routes;
use axum::Router;
use common::{AppConfig, AppState};
use db::connect;
use migration::Migrator;
use sea_orm_migration::MigratorTrait;
use services::attempt::AttemptService;
use services::collaborators::{HttpUploadStore, LogNotifier};
use services::reconciler::{CallbackReconciler, ReconcilerContext};
use services::speaking_submission::SpeakingSubmissionService;
use services::writing_submission::WritingSubmissionService;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::CorsLayer;
use tracing_appender::rolling;

#[tokio::main]
async fn main() {
    // Load configuration and initialize logging
    let (log_file, log_level) = {
        let config = AppConfig::global();
        (config.log_file.clone(), config.log_level.clone())
    };
    let _log_guard = init_logging(&log_file, &log_level);

    // Set up dependencies
    let db = connect().await;
    Migrator::up(&db, None)
        .await
        .expect("Failed to run migrations");
    let app_state = AppState::new(db);
    let ctx = Arc::new(reconciler_context());

    // Spawn the stale-submission sweep and the stuck-job recovery pass
    spawn_grading_sweep(app_state.clone());
    spawn_stuck_job_recovery(app_state.clone(), ctx.clone());

    // Configure middleware
    let cors = CorsLayer::very_permissive();

    // Build app router
    let app = Router::new()
        .nest("/api", routes(app_state, ctx))
        .layer(cors);

    // Start server
    let (host, port, project_name) = {
        let config = AppConfig::global();
        (config.host.clone(), config.port, config.project_name.clone())
    };
    let addr: SocketAddr = format!("{}:{}", host, port).parse().expect("Invalid address");

    println!("Starting {} on http://{}:{}", project_name, host, port);

    axum::serve(
        tokio::net::TcpListener::bind(&addr)
            .await
            .expect("Failed to bind"),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .expect("Server crashed");
}

fn reconciler_context() -> ReconcilerContext {
    let config = AppConfig::global();
    ReconcilerContext {
        webhook_secret: config.grading_webhook_secret.clone(),
        max_skew_seconds: config.webhook_max_skew_seconds,
        accept_partial_results: config.accept_partial_results,
        notifier: Arc::new(LogNotifier),
        uploads: Arc::new(HttpUploadStore::new()),
    }
}

fn init_logging(log_file: &str, _log_level: &str) -> tracing_appender::non_blocking::WorkerGuard {
    use std::fs;
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    fs::create_dir_all("logs").ok();

    let file_appender = rolling::daily("logs", log_file);
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    let log_to_stdout = AppConfig::global().log_to_stdout;

    let stdout_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_ansi(true)
        .with_target(true)
        .with_thread_ids(true);

    let env_filter =
        EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| EnvFilter::new("api=info"));

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer);

    if log_to_stdout {
        registry.with(stdout_layer).init();
    } else {
        registry.init();
    }

    guard
}

/// Periodically fails submissions stuck in `processing` past the grading
/// timeout, then recomputes every attempt they belonged to.
fn spawn_grading_sweep(app_state: AppState) {
    let timeout = Duration::from_secs(AppConfig::global().grading_timeout_seconds as u64);
    let db = app_state.db_clone();

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            let cutoff = chrono::Utc::now()
                - chrono::Duration::from_std(timeout).unwrap_or(chrono::Duration::zero());

            let mut attempt_ids = Vec::new();
            match SpeakingSubmissionService::fail_stale(&db, cutoff).await {
                Ok(ids) => attempt_ids.extend(ids),
                Err(err) => tracing::error!(%err, "speaking timeout sweep failed"),
            }
            match WritingSubmissionService::fail_stale(&db, cutoff).await {
                Ok(ids) => attempt_ids.extend(ids),
                Err(err) => tracing::error!(%err, "writing timeout sweep failed"),
            }

            attempt_ids.sort_unstable();
            attempt_ids.dedup();
            for attempt_id in attempt_ids {
                if let Err(err) = AttemptService::recompute(&db, attempt_id).await {
                    tracing::error!(attempt_id, %err, "recompute after timeout sweep failed");
                }
            }
        }
    });
}

/// Periodically re-drives ledger rows stuck in `received`, e.g. after a crash
/// between the ledger insert and the apply step.
fn spawn_stuck_job_recovery(app_state: AppState, ctx: Arc<ReconcilerContext>) {
    let older_than = chrono::Duration::seconds(AppConfig::global().stuck_job_recovery_seconds);
    let db = app_state.db_clone();

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(Duration::from_secs(60)).await;
            match CallbackReconciler::recover_stuck_jobs(&db, &ctx, older_than).await {
                Ok(0) => {}
                Ok(count) => tracing::info!(count, "recovered stuck grading jobs"),
                Err(err) => tracing::error!(%err, "stuck-job recovery pass failed"),
            }
        }
    });
}
