use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{FromRequestParts, Query, State},
    http::{StatusCode, Uri, request::Parts},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::actions::{
    ActionOutcome, CustomerMutation, ErrorContext, ErrorReporter, FailureKind, ShopActions,
    TicketMutation,
};
use super::db::DbHandle;
use super::form::{FormController, Mutation, SubmitBlocked, submitted_customer, submitted_ticket};
use super::models::Capabilities;
use super::notify::{CollectingNotifier, Notification};
use super::pages::{self, ExplainKind, FormPage};
use super::poll::Revision;
use super::schema::{CustomerInput, FormSchema, TicketInput};
use super::view_state::ViewState;
use crate::config::ShopConfig;
use crate::errors::ShopError;

// ── Shared application state ──────────────────────────────────────────

pub struct AppState {
    pub db: DbHandle,
    pub ws_tx: broadcast::Sender<String>,
    pub actions: ShopActions,
    pub config: ShopConfig,
}

impl AppState {
    pub fn new(db: DbHandle, config: ShopConfig, reporter: Arc<dyn ErrorReporter>) -> Self {
        let (ws_tx, _rx) = broadcast::channel::<String>(256);
        let actions = ShopActions::new(db.clone(), Revision::default(), ws_tx.clone(), reporter);
        Self {
            db,
            ws_tx,
            actions,
            config,
        }
    }
}

pub type SharedState = Arc<AppState>;

// ── Caller identity ───────────────────────────────────────────────────

pub const USER_EMAIL_HEADER: &str = "x-user-email";
pub const USER_PERMISSIONS_HEADER: &str = "x-user-permissions";

/// The caller's capabilities, taken from the identity headers the auth
/// proxy sets. Missing headers mean an anonymous, non-manager caller.
pub struct Caller(pub Capabilities);

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };
        let email = header(USER_EMAIL_HEADER);
        let permissions = header(USER_PERMISSIONS_HEADER).unwrap_or_default();
        Ok(Caller(Capabilities::from_permissions(email, &permissions)))
    }
}

// ── Error handling ────────────────────────────────────────────────────

pub enum ApiError {
    NotFound(String),
    BadRequest(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(serde_json::json!({"error": message}))).into_response()
    }
}

/// An unexpected failure while loading a page: report it, then fail the
/// request with a generic 500.
fn page_error(state: &AppState, action_name: &'static str, input: &impl Serialize, err: ShopError) -> ApiError {
    let context = ErrorContext::new(action_name, input);
    state.actions.reporter().capture(&err, &context);
    ApiError::Internal(err.to_string())
}

pub fn failure_status(kind: FailureKind) -> StatusCode {
    match kind {
        FailureKind::Duplicate | FailureKind::BadRequest => StatusCode::BAD_REQUEST,
        FailureKind::Forbidden => StatusCode::FORBIDDEN,
        FailureKind::NotFound => StatusCode::NOT_FOUND,
        FailureKind::Database | FailureKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

// ── Router ────────────────────────────────────────────────────────────

pub fn api_router() -> Router<SharedState> {
    Router::new()
        .route("/tickets", get(ticket_search))
        .route("/tickets/form", get(ticket_form_page))
        .route("/customers", get(customer_search))
        .route("/customers/form", get(customer_form_page))
        .route("/api/customers", post(save_customer))
        .route("/api/tickets", post(save_ticket))
        .route("/api/revision", get(get_revision))
        .route("/health", get(health_check))
}

// ── Handlers ──────────────────────────────────────────────────────────

async fn health_check() -> &'static str {
    "ok"
}

async fn get_revision(State(state): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "revision": state.actions.revision().current() }))
}

async fn ticket_search(State(state): State<SharedState>, uri: Uri) -> Result<Response, ApiError> {
    let view = ViewState::from_uri(&uri);
    let query = view.to_query_string();
    let page = pages::load_ticket_search(&state.db, view, state.config.tables.ticket_page_size)
        .await
        .map_err(|e| page_error(&state, "getTicketSearchResults", &query, e))?;
    let page = page.with_live_poll(state.config.poll.interval_secs, state.actions.revision().current());
    Ok(Json(page).into_response())
}

async fn customer_search(State(state): State<SharedState>, uri: Uri) -> Result<Response, ApiError> {
    let view = ViewState::from_uri(&uri);
    let query = view.to_query_string();
    let page = pages::load_customer_search(&state.db, view, state.config.tables.customer_page_size)
        .await
        .map_err(|e| page_error(&state, "getCustomerSearchResults", &query, e))?;
    let page = page.with_live_poll(state.config.poll.interval_secs, state.actions.revision().current());
    Ok(Json(page).into_response())
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerFormQuery {
    pub customer_id: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketFormQuery {
    pub customer_id: Option<String>,
    pub ticket_id: Option<String>,
}

fn form_page_response(page: FormPage) -> Response {
    let status = match &page {
        FormPage::Explain(view) => match view.kind {
            ExplainKind::NotFound => StatusCode::NOT_FOUND,
            ExplainKind::MissingIds | ExplainKind::Inactive => StatusCode::BAD_REQUEST,
        },
        _ => StatusCode::OK,
    };
    (status, Json(page)).into_response()
}

async fn customer_form_page(
    State(state): State<SharedState>,
    Caller(caps): Caller,
    Query(query): Query<CustomerFormQuery>,
) -> Result<Response, ApiError> {
    let page = pages::load_customer_form(&state.db, &caps, query.customer_id.as_deref())
        .await
        .map_err(|e| page_error(&state, "loadCustomerForm", &query, e))?;
    Ok(form_page_response(page))
}

async fn ticket_form_page(
    State(state): State<SharedState>,
    Caller(caps): Caller,
    Query(query): Query<TicketFormQuery>,
) -> Result<Response, ApiError> {
    let page = pages::load_ticket_form(
        &state.db,
        &caps,
        query.customer_id.as_deref(),
        query.ticket_id.as_deref(),
        &state.config.shop.technicians,
    )
    .await
    .map_err(|e| page_error(&state, "loadTicketForm", &query, e))?;
    Ok(form_page_response(page))
}

#[derive(Serialize)]
pub struct SaveResponse {
    #[serde(flatten)]
    pub outcome: ActionOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notification: Option<Notification>,
}

/// Run a client-filled form through validation and its mutation, then
/// answer with the outcome and the one notification it produced.
async fn submit<S: FormSchema>(mut form: FormController<S>, mutation: &dyn Mutation<S>) -> Response {
    let notifier = CollectingNotifier::default();
    let outcome = match form.submit(mutation, &notifier).await {
        Ok(()) => form.last_result().cloned(),
        Err(SubmitBlocked::Invalid(validation_errors)) => Some(ActionOutcome::Invalid { validation_errors }),
        Err(blocked) => {
            return ApiError::BadRequest(blocked.to_string()).into_response();
        }
    };
    let Some(outcome) = outcome else {
        return ApiError::Internal("Save finished without a result".into()).into_response();
    };
    let status = match &outcome {
        ActionOutcome::Saved { .. } => StatusCode::OK,
        ActionOutcome::Invalid { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        ActionOutcome::Failed { kind, .. } => failure_status(*kind),
    };
    let notification = notifier.take().into_iter().next();
    (status, Json(SaveResponse { outcome, notification })).into_response()
}

async fn save_customer(
    State(state): State<SharedState>,
    Caller(caps): Caller,
    Json(input): Json<CustomerInput>,
) -> Response {
    let mutation = CustomerMutation {
        actions: state.actions.clone(),
        caps,
    };
    submit(submitted_customer(input), &mutation).await
}

async fn save_ticket(
    State(state): State<SharedState>,
    Caller(caps): Caller,
    Json(input): Json<TicketInput>,
) -> Response {
    let mutation = TicketMutation {
        actions: state.actions.clone(),
        caps,
    };
    submit(submitted_ticket(input), &mutation).await
}
