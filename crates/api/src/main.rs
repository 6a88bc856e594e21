use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
mod registry;

use registry::SessionRegistry;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use policy_dash_core::aggregate::{GroupKey, GroupedTable, Measure};
use policy_dash_core::chart::{ChartData, ChartKind, Summary};
use policy_dash_core::config::Settings;
use policy_dash_core::domain::ResultTable;
use policy_dash_core::salesforce::{QueryExecutor, SalesforceClient};
use policy_dash_core::session::{QueryRequest, SessionContext};
use policy_dash_core::time::DateRangeCalculator;
use policy_dash_core::PipelineError;

type Session = SessionContext<SalesforceClient>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let calculator = DateRangeCalculator::new(settings.timezone()?);
    let idle = Duration::from_secs(settings.session_idle_secs);
    let state = AppState {
        settings: Arc::new(settings),
        calculator,
        sessions: Arc::new(Mutex::new(SessionRegistry::new(idle))),
    };
    tokio::spawn(sweep_idle_sessions(state.sessions.clone(), idle));

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/sessions", post(create_session))
        .route("/sessions/:id", axum::routing::delete(delete_session))
        .route("/sessions/:id/query", post(run_query))
        .route("/sessions/:id/table", get(get_table))
        .route("/sessions/:id/aggregate", get(get_aggregate))
        .route("/sessions/:id/chart", get(get_chart))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    settings: Arc<Settings>,
    calculator: DateRangeCalculator,
    sessions: Arc<Mutex<SessionRegistry<Session>>>,
}

impl AppState {
    async fn session(&self, id: Uuid) -> Result<Arc<Mutex<Session>>, ApiError> {
        self.sessions
            .lock()
            .await
            .get(&id, Instant::now())
            .ok_or_else(|| ApiError::not_found(format!("unknown or expired session {id}")))
    }
}

async fn sweep_idle_sessions(sessions: Arc<Mutex<SessionRegistry<Session>>>, idle: Duration) {
    let mut ticker = tokio::time::interval(idle.max(Duration::from_secs(1)));
    loop {
        ticker.tick().await;
        let mut registry = sessions.lock().await;
        let evicted = registry.evict_idle(Instant::now());
        if evicted > 0 {
            tracing::info!(evicted, remaining = registry.len(), "idle sessions evicted");
        }
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        let status = if matches!(err, PipelineError::NoResult) {
            StatusCode::NOT_FOUND
        } else if err.is_auth() {
            StatusCode::UNAUTHORIZED
        } else if err.is_client_input() {
            StatusCode::BAD_REQUEST
        } else {
            StatusCode::BAD_GATEWAY
        };
        if status == StatusCode::BAD_GATEWAY {
            sentry::capture_error(&err);
        }
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::warn!(status = %self.status, error = %self.message, "request failed");
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

#[derive(Debug, Serialize)]
struct CreatedSession {
    session_id: Uuid,
}

async fn create_session(State(state): State<AppState>) -> Result<Json<CreatedSession>, ApiError> {
    let client = SalesforceClient::connect(&state.settings).await?;
    let executor = QueryExecutor::new(client, state.settings.max_pages);
    let session = SessionContext::new(executor, state.calculator);

    let session_id = state.sessions.lock().await.insert(session, Instant::now());
    tracing::info!(%session_id, "session authenticated");

    Ok(Json(CreatedSession { session_id }))
}

async fn delete_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> StatusCode {
    if state.sessions.lock().await.remove(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Debug, Deserialize)]
struct RunQueryBody {
    #[serde(flatten)]
    request: QueryRequest,
    #[serde(default)]
    force: bool,
}

#[derive(Debug, Serialize)]
struct QueryResponse {
    soql: String,
    pages_fetched: usize,
    fetched_at: chrono::DateTime<chrono::Utc>,
    summary: Summary,
    rows: ResultTable,
}

async fn run_query(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(body): Json<RunQueryBody>,
) -> Result<Json<QueryResponse>, ApiError> {
    let session = state.session(id).await?;
    let mut session = session.lock().await;
    if body.force {
        session.request_requery();
    }

    let snapshot = match session.run(&body.request, chrono::Utc::now()).await {
        Ok(snapshot) => snapshot,
        Err(err) => {
            if err.is_auth() {
                // The salesforce session is dead; the client must create a new one.
                state.sessions.lock().await.remove(&id);
                tracing::warn!(session_id = %id, "session dropped after auth failure");
            }
            return Err(err.into());
        }
    };
    Ok(Json(QueryResponse {
        soql: snapshot.soql.clone(),
        pages_fetched: snapshot.pages_fetched,
        fetched_at: snapshot.fetched_at,
        summary: Summary::of(&snapshot.table),
        rows: snapshot.table.clone(),
    }))
}

async fn get_table(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ResultTable>, ApiError> {
    let session = state.session(id).await?;
    let session = session.lock().await;
    let snapshot = session.last().ok_or_else(no_result)?;
    Ok(Json(snapshot.table.clone()))
}

#[derive(Debug, Deserialize)]
struct AggregateParams {
    group_by: Option<String>,
}

async fn get_aggregate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<AggregateParams>,
) -> Result<Json<GroupedTable>, ApiError> {
    let key = match params.group_by.as_deref() {
        Some(raw) => raw.parse::<GroupKey>().map_err(ApiError::bad_request)?,
        None => GroupKey::OpportunityId,
    };

    let session = state.session(id).await?;
    let session = session.lock().await;
    let grouped = session
        .aggregate(key, &[Measure::PolicyCount, Measure::PremiumTotal])
        .ok_or_else(no_result)?;
    Ok(Json(grouped))
}

#[derive(Debug, Deserialize)]
struct ChartParams {
    kind: Option<String>,
}

async fn get_chart(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(params): Query<ChartParams>,
) -> Result<Json<ChartData>, ApiError> {
    let kind = match params.kind.as_deref() {
        Some(raw) => raw.parse::<ChartKind>()?,
        None => ChartKind::Bar,
    };

    let session = state.session(id).await?;
    let session = session.lock().await;
    let chart = session.chart(kind)?;
    Ok(Json(chart))
}

fn no_result() -> ApiError {
    ApiError::not_found("no query has been run in this session")
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
