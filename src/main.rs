use axum::{
    extract::{Path, Query, State},
    http::{HeaderValue, StatusCode},
    routing::{delete, get},
    Extension, Json, Router,
};
use chrono::{Datelike, NaiveDate, Utc};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

mod charts;
mod config;
mod datasets;
mod error;
mod labels;
mod models;
mod pagination;
mod period;
mod store;

#[cfg(test)]
mod tests;

use charts::ChartDataService;
use config::Config;
use error::AppError;
use models::{
    AnnualClientCount, ApiResponse, ChartData, ChartQuery, ChartShape, Entry, EntryInput,
    EntryPatch, NewEntry, Page, PageQuery, Participant, ParticipantsInput, RecordKind, YearQuery,
};
use pagination::PageParams;
use period::{parse_iso_date, Clock, Period, SystemClock};
use store::Store;

/// Case-management HTTP API.
/// Every record kind gets the same CRUD + chart routes under `/api/{slug}`;
/// activities additionally expose their participants.
#[derive(Clone)]
struct AppState {
    store: Store,
    charts: ChartDataService,
    clock: Arc<dyn Clock>,
}

impl AppState {
    fn new(store: Store, clock: Arc<dyn Clock>) -> Self {
        let charts = ChartDataService::new(Arc::new(store.clone()), clock.clone());
        Self {
            store,
            charts,
            clock,
        }
    }
}

type HandlerResult<T> = Result<T, AppError>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .init();

    // a missing .env file is fine, the process environment still applies
    dotenvy::dotenv().ok();
    let config = Config::from_env();
    let store = Store::open(&config.database_path)?;
    info!(path = %config.database_path, "database ready");

    let state = AppState::new(store, Arc::new(SystemClock));
    let app = build_router(state, &config);

    let addr = config.bind_addr()?;
    info!("Server running on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

fn build_router(state: AppState, config: &Config) -> Router {
    let mut api = Router::new()
        .route("/reports/client-count", get(annual_client_count))
        .route("/reports/client-count/chart", get(client_count_chart));
    for kind in RecordKind::ALL {
        api = api.nest(&format!("/{}", kind.slug()), record_routes(kind));
    }

    Router::new()
        .route("/", get(root))
        .route("/health", get(health_check))
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(config))
        .with_state(state)
}

/// CRUD and chart routes for one record kind. The kind reaches the handlers as an extension.
fn record_routes(kind: RecordKind) -> Router<AppState> {
    let mut router = Router::new()
        .route("/", get(list_entries).post(create_entry))
        .route("/chart", get(entry_chart))
        .route("/:id", get(get_entry).put(update_entry).delete(delete_entry));

    if kind.is_scheduled() {
        router = router.route("/upcoming", get(upcoming_entries));
    }
    if kind.shape() == ChartShape::Bridge {
        router = router
            .route("/:id/participants", get(list_participants).post(add_participants))
            .route("/:id/participants/:client_id", delete(remove_participant));
    }

    router.layer(Extension(kind))
}

fn cors_layer(config: &Config) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match config
        .cors_origin
        .as_deref()
        .and_then(|origin| origin.parse::<HeaderValue>().ok())
    {
        Some(origin) => cors.allow_origin(origin),
        None => cors.allow_origin(Any),
    }
}

async fn root() -> &'static str {
    "Outreach Case Management API v0.1.0"
}

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    let database = match state.store.call(|store| store.ping()).await {
        Ok(()) => "connected".to_string(),
        Err(e) => format!("error: {}", e),
    };

    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": Utc::now().to_rfc3339(),
        "database": database,
    }))
}

/// Create a new entry
async fn create_entry(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Json(input): Json<EntryInput>,
) -> HandlerResult<(StatusCode, Json<ApiResponse>)> {
    let new_entry = validate_new_entry(kind, input, state.clock.today())?;
    let entry = state
        .store
        .call(move |store| store.insert_entry(kind, &new_entry))
        .await?;

    info!(kind = %kind, id = %entry.id, "entry created");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            format!("{} entry created successfully", kind.display_name()),
            &entry,
        )),
    ))
}

async fn get_entry(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Path(id): Path<String>,
) -> HandlerResult<Json<Entry>> {
    let entry = state
        .store
        .call(move |store| store.get_entry(kind, &id))
        .await?
        .ok_or_else(|| entry_not_found(kind))?;

    info!(kind = %kind, id = %entry.id, "entry retrieved");
    Ok(Json(entry))
}

async fn update_entry(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Path(id): Path<String>,
    Json(input): Json<EntryInput>,
) -> HandlerResult<Json<ApiResponse>> {
    let patch = validate_patch(kind, input)?;
    let entry = state
        .store
        .call(move |store| store.update_entry(kind, &id, &patch))
        .await?
        .ok_or_else(|| entry_not_found(kind))?;

    info!(kind = %kind, id = %entry.id, "entry updated");
    Ok(Json(ApiResponse::success(
        format!("{} entry updated successfully", kind.display_name()),
        &entry,
    )))
}

async fn delete_entry(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Path(id): Path<String>,
) -> HandlerResult<Json<ApiResponse>> {
    let entry = state
        .store
        .call(move |store| store.delete_entry(kind, &id))
        .await?
        .ok_or_else(|| entry_not_found(kind))?;

    info!(kind = %kind, id = %entry.id, "entry deleted");
    Ok(Json(ApiResponse::success(
        format!("{} entry deleted successfully", kind.display_name()),
        &entry,
    )))
}

/// Paginated listing, newest first
async fn list_entries(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Query(query): Query<PageQuery>,
) -> HandlerResult<Json<Page<Entry>>> {
    let params = PageParams::from_query(&query);
    let page = state
        .store
        .call(move |store| store.list_entries(kind, params))
        .await?;

    if page.rows.is_empty() {
        return Err(AppError::NotFound(format!(
            "No {} entries found",
            kind.display_name()
        )));
    }

    info!(kind = %kind, rows = page.rows.len(), total = page.count, "entries listed");
    Ok(Json(page))
}

async fn entry_chart(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Query(query): Query<ChartQuery>,
) -> HandlerResult<Json<ChartData>> {
    let chart = state
        .charts
        .series_for(kind, query.period.as_deref(), query.date.as_deref())
        .await?;

    info!(
        kind = %kind,
        period = Period::from_code(query.period.as_deref()).code(),
        from = %chart.from,
        to = %chart.to,
        "chart generated"
    );
    Ok(Json(chart))
}

/// Activities scheduled for today or later
async fn upcoming_entries(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
) -> HandlerResult<Json<Page<Entry>>> {
    let today = state.clock.today();
    let rows = state
        .store
        .call(move |store| store.upcoming_entries(kind, today))
        .await?;

    if rows.is_empty() {
        return Err(AppError::NotFound(format!(
            "No upcoming {} entries found",
            kind.display_name()
        )));
    }

    info!(kind = %kind, rows = rows.len(), "upcoming entries listed");
    let count = rows.len() as i64;
    Ok(Json(Page { rows, count }))
}

async fn list_participants(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Path(id): Path<String>,
    Query(query): Query<PageQuery>,
) -> HandlerResult<Json<Page<Participant>>> {
    let params = PageParams::from_query(&query);
    let page = state
        .store
        .call(move |store| match store.get_entry(kind, &id)? {
            Some(_) => store.list_participants(kind, &id, params).map(Some),
            None => Ok(None),
        })
        .await?
        .ok_or_else(|| entry_not_found(kind))?;

    info!(kind = %kind, rows = page.rows.len(), total = page.count, "participants listed");
    Ok(Json(page))
}

async fn add_participants(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Path(id): Path<String>,
    Json(input): Json<ParticipantsInput>,
) -> HandlerResult<(StatusCode, Json<ApiResponse>)> {
    let client_ids: Vec<String> = input
        .client_ids
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if client_ids.is_empty() {
        return Err(AppError::BadRequest("At least one client ID required".to_string()));
    }
    let date_registered = parse_entry_date(input.date_registered.as_deref(), state.clock.today())?;

    let (entry, added) = state
        .store
        .call(move |store| store.add_participants(kind, &id, &client_ids, date_registered))
        .await?
        .ok_or_else(|| entry_not_found(kind))?;

    info!(kind = %kind, id = %entry.id, added, "participants added");
    Ok((
        StatusCode::CREATED,
        Json(ApiResponse::success(
            format!("{} participant(s) added", added),
            serde_json::json!({ "activity": entry, "added": added }),
        )),
    ))
}

async fn remove_participant(
    State(state): State<AppState>,
    Extension(kind): Extension<RecordKind>,
    Path((id, client_id)): Path<(String, String)>,
) -> HandlerResult<Json<ApiResponse>> {
    let entry = state
        .store
        .call(move |store| store.remove_participant(kind, &id, &client_id))
        .await?
        .ok_or_else(|| AppError::NotFound("Participant not found".to_string()))?;

    info!(kind = %kind, id = %entry.id, "participant removed");
    Ok(Json(ApiResponse::success("Participant removed", &entry)))
}

/// Yearly headline numbers, `?year=` defaults to the current year
async fn annual_client_count(
    State(state): State<AppState>,
    Query(query): Query<YearQuery>,
) -> HandlerResult<Json<AnnualClientCount>> {
    let year = query
        .year
        .as_deref()
        .and_then(|y| y.trim().parse::<i32>().ok())
        .unwrap_or_else(|| state.clock.today().year());

    let count = state
        .store
        .call(move |store| store.annual_client_count(year))
        .await?;

    info!(year, total = count.total_clients, "annual client count retrieved");
    Ok(Json(count))
}

async fn client_count_chart(
    State(state): State<AppState>,
    Query(query): Query<ChartQuery>,
) -> HandlerResult<Json<ChartData>> {
    let chart = state
        .charts
        .client_count_series(query.period.as_deref(), query.date.as_deref())
        .await?;

    info!(
        period = Period::from_code(query.period.as_deref()).code(),
        from = %chart.from,
        to = %chart.to,
        "client count chart generated"
    );
    Ok(Json(chart))
}

// Helper functions

fn entry_not_found(kind: RecordKind) -> AppError {
    AppError::NotFound(format!("{} entry not found", kind.display_name()))
}

/// Missing or blank means today; anything else must be `yyyy-mm-dd`.
fn parse_entry_date(value: Option<&str>, today: NaiveDate) -> HandlerResult<NaiveDate> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(today),
        Some(raw) => parse_iso_date(raw)
            .ok_or_else(|| AppError::BadRequest("Date must be in yyyy-mm-dd format".to_string())),
    }
}

fn validate_type(kind: RecordKind, entry_type: &str) -> HandlerResult<()> {
    if kind.allowed_types().contains(&entry_type) {
        Ok(())
    } else {
        Err(AppError::BadRequest(format!(
            "Invalid type '{}' for {}",
            entry_type,
            kind.display_name()
        )))
    }
}

fn validate_new_entry(kind: RecordKind, input: EntryInput, today: NaiveDate) -> HandlerResult<NewEntry> {
    let date = parse_entry_date(input.date.as_deref(), today)?;

    if !kind.is_typed() {
        return Ok(NewEntry {
            date,
            entry_type: None,
            number_of_clients: None,
            description: input.description,
        });
    }

    let entry_type = input
        .entry_type
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing required fields".to_string()))?;
    validate_type(kind, &entry_type)?;

    let number_of_clients = match (kind.shape(), input.number_of_clients) {
        (ChartShape::Grouped, Some(n)) if n >= 1 => n,
        (ChartShape::Grouped, _) => {
            return Err(AppError::BadRequest(
                "Number of clients must be a positive number".to_string(),
            ))
        }
        (_, Some(n)) if n < 0 => {
            return Err(AppError::BadRequest(
                "Number of clients cannot be negative".to_string(),
            ))
        }
        (_, n) => n.unwrap_or(0),
    };

    Ok(NewEntry {
        date,
        entry_type: Some(entry_type),
        number_of_clients: Some(number_of_clients),
        description: None,
    })
}

fn validate_patch(kind: RecordKind, input: EntryInput) -> HandlerResult<EntryPatch> {
    let date = match input.date.as_deref().map(str::trim).filter(|v| !v.is_empty()) {
        Some(raw) => Some(parse_iso_date(raw).ok_or_else(|| {
            AppError::BadRequest("Date must be in yyyy-mm-dd format".to_string())
        })?),
        None => None,
    };

    let mut patch = EntryPatch {
        date,
        ..Default::default()
    };

    if kind.is_typed() {
        if let Some(entry_type) = input.entry_type.map(|t| t.trim().to_string()).filter(|t| !t.is_empty()) {
            validate_type(kind, &entry_type)?;
            patch.entry_type = Some(entry_type);
        }
        if let Some(n) = input.number_of_clients {
            if n < 0 {
                return Err(AppError::BadRequest(
                    "Number of clients cannot be negative".to_string(),
                ));
            }
            patch.number_of_clients = Some(n);
        }
    } else {
        patch.description = input.description;
    }

    if patch.is_empty() {
        return Err(AppError::BadRequest("Must include at least 1 field".to_string()));
    }
    Ok(patch)
}
