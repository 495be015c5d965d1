use std::{process, sync::Arc, time::Duration};

use scorta::{
    AppError,
    config::{self, RefreshArgs},
    controller::{
        CacheController, ControllerConfig, DispatchError, EventLoop, NetworkFetcher, WorkerEvent,
    },
    domain::ControlMessage,
    infra::{
        error::InfraError,
        http::{GatewayState, build_router},
        telemetry,
        upstream::HttpFetcher,
    },
    store::MemoryStore,
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;
use url::Url;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Refresh(args) => run_refresh(&settings, args).await,
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let upstream_origin = settings.upstream.origin.clone().ok_or_else(|| {
        InfraError::configuration(
            "upstream.origin is required to serve; set it in the config file, \
             SCORTA__UPSTREAM__ORIGIN, or --upstream-origin",
        )
    })?;

    let origin = Url::parse(&format!("http://{}", settings.server.listen_addr))
        .map_err(|err| AppError::unexpected(format!("listen address is not a URL: {err}")))?;

    let store = Arc::new(MemoryStore::new());
    let fetcher: Arc<dyn NetworkFetcher> = Arc::new(HttpFetcher::new(
        upstream_origin.clone(),
        settings.upstream.timeout,
    )?);

    let controller = Arc::new(CacheController::new(
        ControllerConfig::from_settings(&settings.cache, origin.clone()),
        store,
        fetcher.clone(),
    ));

    let (event_loop, events) = EventLoop::new(controller.clone());
    let loop_task = tokio::spawn(event_loop.run());

    // Install is fatal: a partially-populated static partition must never
    // go live. Activation then reaps partitions from older generations.
    events.submit(WorkerEvent::Install).await.map_err(fatal)?;
    events.submit(WorkerEvent::Activate).await.map_err(fatal)?;

    info!(
        listen = %settings.server.listen_addr,
        upstream = %upstream_origin,
        generation = %settings.cache.generation,
        "gateway ready"
    );

    let router = build_router(GatewayState {
        events: events.clone(),
        fetcher,
        origin,
    });

    let listener = tokio::net::TcpListener::bind(settings.server.listen_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;

    axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal(settings.server.graceful_shutdown))
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")))?;

    // Dropping the last handle closes the queue; the loop drains whatever
    // handlers are still in flight before returning.
    drop(events);
    if let Err(err) = loop_task.await {
        warn!(error = %err, "event loop task failed to join");
    }

    Ok(())
}

async fn shutdown_signal(graceful: Duration) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for shutdown signal");
        return;
    }
    info!(grace_seconds = graceful.as_secs(), "shutdown requested");
}

async fn run_refresh(settings: &config::Settings, args: RefreshArgs) -> Result<(), AppError> {
    let endpoint = format!(
        "{}/__scorta/message",
        args.gateway_url.trim_end_matches('/')
    );

    // The gateway answers 202 once the wipe handler has run, so the
    // acknowledgement window doubles as the request timeout here.
    let client = reqwest::Client::builder()
        .timeout(settings.cache.refresh_timeout)
        .build()
        .map_err(|err| AppError::unexpected(format!("failed to build client: {err}")))?;

    let response = client
        .post(&endpoint)
        .json(&ControlMessage::RefreshCache)
        .send()
        .await
        .map_err(|err| {
            AppError::from(InfraError::upstream(format!(
                "failed to reach gateway at {endpoint}: {err}"
            )))
        })?;

    if !response.status().is_success() {
        return Err(AppError::from(InfraError::upstream(format!(
            "gateway rejected refresh: {}",
            response.status()
        ))));
    }

    info!(endpoint = %endpoint, "refresh accepted");
    Ok(())
}

fn fatal(err: DispatchError) -> AppError {
    match err {
        DispatchError::Closed => AppError::unexpected("event loop stopped during startup"),
        DispatchError::Controller(err) => AppError::from(err),
    }
}
