pub mod auth;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod ical;
pub mod locks;
pub mod middleware;
pub mod models;
pub mod occurrence;
pub mod openapi;
pub mod quick_add;
pub mod settings;
pub mod shutdown;
pub mod store;
pub mod validation;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    Router,
    routing::{get, post, put},
};
use chrono::{Local, NaiveDate};
use handlers::{
    create_template, get_ical, get_template, healthz_live, healthz_ready, list_instances,
    list_templates, quick_add, root, run_catch_up, set_auto_schedule,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::engine::AutoScheduler;
use crate::ical::ICalExporter;
use crate::locks::TemplateLocks;
use crate::openapi::ApiDoc;
use crate::quick_add::QuickAddResolver;
use crate::settings::Settings;
use crate::shutdown::{Shutdown, stopped, wait_for_signal};
use crate::store::{InMemoryInstanceStore, InMemoryTemplateStore, InstanceStore, TemplateStore};
use crate::validation::validate_horizon_weeks;

#[derive(Clone)]
pub struct AppState {
    pub(crate) settings: Settings,
    pub(crate) templates: Arc<dyn TemplateStore>,
    pub(crate) instances: Arc<dyn InstanceStore>,
    pub(crate) engine: Arc<AutoScheduler>,
    pub(crate) quick_add: Arc<QuickAddResolver>,
    pub(crate) exporter: Arc<ICalExporter>,
    locks: Arc<TemplateLocks>,
    fixed_today: Option<NaiveDate>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        templates: Arc<dyn TemplateStore>,
        instances: Arc<dyn InstanceStore>,
    ) -> Self {
        let locks = Arc::new(TemplateLocks::new());
        Self {
            engine: Arc::new(AutoScheduler::new(
                templates.clone(),
                instances.clone(),
                locks.clone(),
            )),
            quick_add: Arc::new(QuickAddResolver::new(instances.clone(), locks.clone())),
            exporter: Arc::new(ICalExporter::new(
                settings.calendar_name.clone(),
                settings.location.clone(),
            )),
            settings,
            templates,
            instances,
            locks,
            fixed_today: None,
        }
    }

    pub fn in_memory(settings: Settings) -> Self {
        Self::new(
            settings,
            Arc::new(InMemoryTemplateStore::new()),
            Arc::new(InMemoryInstanceStore::new()),
        )
    }

    /// Pins the date handlers treat as "today".
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.fixed_today = Some(today);
        self
    }

    pub fn today(&self) -> NaiveDate {
        self.fixed_today
            .unwrap_or_else(|| Local::now().date_naive())
    }

    pub fn engine(&self) -> &AutoScheduler {
        &self.engine
    }

    /// Per-template locks shared by the engine and Quick-Add.
    pub fn locks(&self) -> Arc<TemplateLocks> {
        self.locks.clone()
    }

    /// Catch-up for all templates, bounded by the configured timeout.
    pub fn catch_up_all(&self) {
        let deadline = Instant::now() + Duration::from_millis(self.settings.catch_up_timeout_ms);
        if let Err(err) = self.engine.run_catch_up_until(
            self.today(),
            self.settings.horizon_weeks,
            deadline,
        ) {
            error!(error = %err, "catch-up could not start");
        }
    }
}

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::from_env()?;

    let env_filter = if settings.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .without_time()
        .init();

    validate_horizon_weeks(settings.horizon_weeks)
        .map_err(|_| format!("invalid horizon_weeks: {}", settings.horizon_weeks))?;

    serve(AppState::in_memory(settings)).await
}

/// Serves `state` until Ctrl+C or SIGTERM, then stops the catch-up ticker.
///
/// `run` hands this a fresh in-memory state. Embedders with persistent
/// stores build their own [`AppState`] so that the start-up catch-up has
/// templates to work on.
pub async fn serve(state: AppState) -> Result<(), Box<dyn std::error::Error>> {
    let shutdown = Shutdown::new();
    let ticker = start_catch_up(&state, shutdown.subscribe()).await;

    let app = build_router(state.clone());
    let addr = SocketAddr::from(([0, 0, 0, 0], state.settings.port));
    info!("Starting Class Auto-Scheduler API on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            wait_for_signal().await;
            shutdown.trigger();
        })
        .await?;

    if let Some(ticker) = ticker
        && let Err(err) = ticker.await
    {
        error!(error = %err, "catch-up ticker panicked");
    }
    info!("server stopped");
    Ok(())
}

/// Runs the start-up catch-up when configured and spawns the periodic ticker
/// when `catch_up_interval_secs > 0`.
pub(crate) async fn start_catch_up(
    state: &AppState,
    stop: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    if state.settings.catch_up_on_start {
        let state = state.clone();
        if let Err(err) = tokio::task::spawn_blocking(move || state.catch_up_all()).await {
            error!(error = %err, "start-up catch-up panicked");
        }
    }
    (state.settings.catch_up_interval_secs > 0).then(|| {
        spawn_catch_up_ticker(
            state.clone(),
            Duration::from_secs(state.settings.catch_up_interval_secs),
            stop,
        )
    })
}

fn spawn_catch_up_ticker(
    state: AppState,
    period: Duration,
    mut stop: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        // The first tick fires immediately; start-up catch-up already covered it.
        interval.tick().await;
        loop {
            tokio::select! {
                biased;
                _ = stopped(&mut stop) => break,
                _ = interval.tick() => {}
            }
            let state = state.clone();
            if let Err(err) = tokio::task::spawn_blocking(move || state.catch_up_all()).await {
                error!(error = %err, "periodic catch-up panicked");
            }
        }
        info!("catch-up ticker stopped");
    })
}

pub fn build_router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/", get(root))
        .route("/healthz/live", get(healthz_live))
        .route("/healthz/ready", get(healthz_ready))
        .route("/templates", get(list_templates).post(create_template))
        .route("/templates/{id}", get(get_template))
        .route("/templates/{id}/auto-schedule", put(set_auto_schedule))
        .route("/templates/{id}/quick-add", post(quick_add))
        .route("/schedule/catch-up", post(run_catch_up))
        .route("/instances", get(list_instances))
        .route("/instances.ical", get(get_ical))
        .with_state(state.clone());

    if state.settings.enable_swagger {
        let openapi = ApiDoc::openapi();
        let swagger = SwaggerUi::new("/docs").url("/openapi.json", openapi);
        router = router.merge(swagger);
    }

    middleware::apply(router, state.settings.debug)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::{date, vinyasa};

    fn state_with_template(
        catch_up_on_start: bool,
        catch_up_interval_secs: u64,
    ) -> (AppState, Arc<InMemoryInstanceStore>) {
        let templates = Arc::new(InMemoryTemplateStore::new());
        templates.create(vinyasa(0)).unwrap();
        let instances = Arc::new(InMemoryInstanceStore::new());
        let settings = Settings {
            catch_up_on_start,
            catch_up_interval_secs,
            ..Settings::default()
        };
        let state =
            AppState::new(settings, templates, instances.clone()).with_today(date(2024, 1, 29));
        (state, instances)
    }

    #[tokio::test]
    async fn test_start_up_catch_up_fills_horizon() {
        let (state, instances) = state_with_template(true, 0);
        let shutdown = Shutdown::new();

        let ticker = start_catch_up(&state, shutdown.subscribe()).await;

        assert!(ticker.is_none());
        assert_eq!(instances.len(), 5);
    }

    #[tokio::test]
    async fn test_start_up_catch_up_can_be_disabled() {
        let (state, instances) = state_with_template(false, 0);
        let shutdown = Shutdown::new();

        let ticker = start_catch_up(&state, shutdown.subscribe()).await;

        assert!(ticker.is_none());
        assert!(instances.is_empty());
    }

    #[tokio::test]
    async fn test_ticker_stops_on_shutdown() {
        let (state, _) = state_with_template(false, 3600);
        let shutdown = Shutdown::new();
        let ticker = start_catch_up(&state, shutdown.subscribe()).await.unwrap();

        shutdown.trigger();

        tokio::time::timeout(Duration::from_secs(1), ticker)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_ticker_runs_catch_up() {
        let (state, instances) = state_with_template(false, 0);
        let shutdown = Shutdown::new();
        let ticker = spawn_catch_up_ticker(state, Duration::from_millis(20), shutdown.subscribe());

        let filled = tokio::time::timeout(Duration::from_secs(2), async {
            while instances.len() < 5 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        shutdown.trigger();

        assert!(filled.is_ok());
        ticker.await.unwrap();
        assert_eq!(instances.len(), 5);
    }
}
