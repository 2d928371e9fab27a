use crate::cli::ServeArgs;
use crate::infra::{sample_owner, seed_samples, AppState};
use crate::routes::with_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use bhxh_declarations::config::AppConfig;
use bhxh_declarations::error::AppError;
use bhxh_declarations::telemetry;
use bhxh_declarations::workflows::declarations::{
    EventBus, EventKind, InMemoryDeclarationStore, InMemoryEventBus, PendingPaymentPoller,
    UnprocessedRecordsService, UserId, WorkflowEvent,
};
use chrono::Utc;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let store = Arc::new(InMemoryDeclarationStore::new());
    if args.seed {
        let loaded = seed_samples(&store, &sample_owner(), Utc::now())?;
        info!(participants = loaded, "sample declarations loaded");
    }

    let events = Arc::new(InMemoryEventBus::new());
    let subscription = events.subscribe(
        EventKind::PendingPaymentReminder,
        Arc::new(|event: &WorkflowEvent| {
            info!(
                count = event.detail("count").unwrap_or("0"),
                declarations = event.detail("declarations").unwrap_or_default(),
                "declarations still awaiting payment"
            );
        }),
    );
    if let Err(err) = subscription {
        warn!(error = %err, "pending payment reminders will not be logged");
    }

    let poll_interval = config.workflow.pending_poll_interval;
    let service = Arc::new(UnprocessedRecordsService::new(
        store.clone(),
        events.clone(),
        config.workflow.clone(),
    ));
    let _poller = PendingPaymentPoller::spawn(
        store,
        events,
        args.owner.take().map(UserId),
        poll_interval,
    );

    let app = with_routes(service)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        poll_secs = poll_interval.as_secs(),
        "declaration workflow service ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
