// 🌐 REST API with Axum
//
// Thin HTTP mapping over `MatchService`. Handlers extract the caller, move
// the blocking service call onto the blocking pool, and translate
// `LedgerError` into a status code plus a stable `{kind, code, message}` body.

use axum::{
    async_trait,
    extract::{FromRequestParts, Path, State},
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

use crate::auth::{Identity, TokenVerifier};
use crate::entities::account::ProfileUpdate;
use crate::entities::card::MatchType;
use crate::error::{ErrorKind, LedgerError};
use crate::service::MatchService;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub service: MatchService,
    pub verifier: Arc<dyn TokenVerifier>,
}

impl AppState {
    pub fn new(service: MatchService, verifier: Arc<dyn TokenVerifier>) -> Self {
        AppState { service, verifier }
    }
}

// ============================================================================
// Response envelope
// ============================================================================

#[derive(Serialize)]
pub struct ApiResponse<T> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorBody>,
}

#[derive(Serialize)]
struct ErrorBody {
    kind: ErrorKind,
    code: &'static str,
    message: String,
    retryable: bool,
}

impl<T> ApiResponse<T> {
    fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }
}

/// Failure returned from any handler
#[derive(Debug)]
pub struct ApiError(LedgerError);

impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        ApiError(err)
    }
}

pub fn status_for(err: &LedgerError) -> StatusCode {
    match err {
        LedgerError::InsufficientCredit => StatusCode::PAYMENT_REQUIRED,
        LedgerError::SelfRevealForbidden
        | LedgerError::SelfDeleteForbidden
        | LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        _ => match err.kind() {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Conflict => StatusCode::CONFLICT,
            ErrorKind::PreconditionFailed => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        },
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let err = self.0;
        let status = status_for(&err);

        if err.kind() == ErrorKind::Internal {
            error!(error = %err, "request failed");
        } else {
            warn!(code = err.code(), reason = %err, "request rejected");
        }

        let body = ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(ErrorBody {
                kind: err.kind(),
                code: err.code(),
                message: err.public_message(),
                retryable: err.kind().is_retryable(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Run a blocking service call off the async workers
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| LedgerError::Internal(format!("blocking task failed: {}", e)))?
        .map_err(ApiError::from)
}

// ============================================================================
// Authentication extractor
// ============================================================================

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| LedgerError::Unauthenticated("missing bearer token".into()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| LedgerError::Unauthenticated("missing bearer token".into()))?;

        Ok(state.verifier.verify(token.trim())?)
    }
}

// ============================================================================
// Request bodies
// ============================================================================

/// Missing fields surface as `InvalidInput`
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateCardRequest {
    description: Option<String>,
    match_type: Option<String>,
}

impl CreateCardRequest {
    fn into_parts(self) -> Result<(String, MatchType), LedgerError> {
        let description = self
            .description
            .ok_or_else(|| LedgerError::InvalidInput("description is required".into()))?;
        let match_type = self
            .match_type
            .ok_or_else(|| LedgerError::InvalidInput("matchType is required".into()))?
            .parse()?;
        Ok((description, match_type))
    }
}

#[derive(Serialize)]
struct Deleted {
    deleted: bool,
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health - Health check
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("OK"))
}

/// GET /api/me - Current account with fresh coin balance
async fn get_me(State(state): State<AppState>, caller: Identity) -> ApiResult<impl Serialize> {
    let snapshot = blocking(move || state.service.me(&caller)).await?;
    Ok(Json(ApiResponse::ok(snapshot)))
}

/// PUT /api/me/profile - Edit non-coin profile fields
async fn update_profile(
    State(state): State<AppState>,
    caller: Identity,
    Json(update): Json<ProfileUpdate>,
) -> ApiResult<impl Serialize> {
    let snapshot = blocking(move || state.service.update_profile(&caller, &update)).await?;
    Ok(Json(ApiResponse::ok(snapshot)))
}

/// GET /api/matching-cards - Recent cards, authors hidden
async fn list_cards(State(state): State<AppState>) -> ApiResult<impl Serialize> {
    let cards = blocking(move || state.service.list_recent_cards()).await?;
    Ok(Json(ApiResponse::ok(cards)))
}

/// POST /api/matching-cards - Post the caller's card
async fn create_card(
    State(state): State<AppState>,
    caller: Identity,
    Json(request): Json<CreateCardRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (description, match_type) = request.into_parts()?;
    let card = blocking(move || state.service.create_card(&caller, &description, match_type)).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::ok(card))))
}

/// DELETE /api/matching-cards - Remove the caller's card
async fn delete_own_card(State(state): State<AppState>, caller: Identity) -> ApiResult<impl Serialize> {
    blocking(move || state.service.delete_own_card(&caller)).await?;
    Ok(Json(ApiResponse::ok(Deleted { deleted: true })))
}

/// GET /api/cards/:card_id - One card as seen by the caller
async fn view_card(
    State(state): State<AppState>,
    caller: Identity,
    Path(card_id): Path<String>,
) -> ApiResult<impl Serialize> {
    let view = blocking(move || state.service.view_card(&caller, &card_id)).await?;
    Ok(Json(ApiResponse::ok(view)))
}

/// POST /api/cards/:card_id/reveal - Spend a coin to reveal the author
async fn reveal_card(
    State(state): State<AppState>,
    caller: Identity,
    Path(card_id): Path<String>,
) -> ApiResult<impl Serialize> {
    let snapshot = blocking(move || state.service.reveal(&caller, &card_id)).await?;
    Ok(Json(ApiResponse::ok(snapshot)))
}

/// GET /api/notifications - Caller's inbox, newest first
async fn list_notifications(State(state): State<AppState>, caller: Identity) -> ApiResult<impl Serialize> {
    let notifications = blocking(move || state.service.notifications(&caller)).await?;
    Ok(Json(ApiResponse::ok(notifications)))
}

/// PUT /api/notifications/:id/read - Mark one of the caller's messages read
async fn mark_notification_read(
    State(state): State<AppState>,
    caller: Identity,
    Path(notification_id): Path<String>,
) -> ApiResult<impl Serialize> {
    let notification = blocking(move || {
        state
            .service
            .mark_notification_read(&caller, &notification_id)
    })
    .await?;
    Ok(Json(ApiResponse::ok(notification)))
}

/// GET /api/admin/users
async fn admin_list_users(State(state): State<AppState>, caller: Identity) -> ApiResult<impl Serialize> {
    let accounts = blocking(move || state.service.admin_list_accounts(&caller)).await?;
    Ok(Json(ApiResponse::ok(accounts)))
}

/// GET /api/admin/cards
async fn admin_list_cards(State(state): State<AppState>, caller: Identity) -> ApiResult<impl Serialize> {
    let cards = blocking(move || state.service.admin_list_cards(&caller)).await?;
    Ok(Json(ApiResponse::ok(cards)))
}

/// GET /api/admin/cards/:card_id/reveals
async fn admin_card_reveals(
    State(state): State<AppState>,
    caller: Identity,
    Path(card_id): Path<String>,
) -> ApiResult<impl Serialize> {
    let reveals = blocking(move || state.service.admin_card_reveals(&caller, &card_id)).await?;
    Ok(Json(ApiResponse::ok(reveals)))
}

/// DELETE /api/admin/cards/:card_id
async fn admin_delete_card(
    State(state): State<AppState>,
    caller: Identity,
    Path(card_id): Path<String>,
) -> ApiResult<impl Serialize> {
    blocking(move || state.service.admin_delete_card(&caller, &card_id)).await?;
    Ok(Json(ApiResponse::ok(Deleted { deleted: true })))
}

/// DELETE /api/admin/users/:user_id
async fn admin_delete_user(
    State(state): State<AppState>,
    caller: Identity,
    Path(user_id): Path<String>,
) -> ApiResult<impl Serialize> {
    let report = blocking(move || state.service.admin_delete_account(&caller, &user_id)).await?;
    Ok(Json(ApiResponse::ok(report)))
}

// ============================================================================
// Router
// ============================================================================

pub fn router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/me", get(get_me))
        .route("/me/profile", put(update_profile))
        .route(
            "/matching-cards",
            get(list_cards).post(create_card).delete(delete_own_card),
        )
        .route("/cards/:card_id", get(view_card))
        .route("/cards/:card_id/reveal", post(reveal_card))
        .route("/notifications", get(list_notifications))
        .route("/notifications/:notification_id/read", put(mark_notification_read))
        .route("/admin/users", get(admin_list_users))
        .route("/admin/users/:user_id", delete(admin_delete_user))
        .route("/admin/cards", get(admin_list_cards))
        .route("/admin/cards/:card_id", delete(admin_delete_card))
        .route("/admin/cards/:card_id/reveals", get(admin_card_reveals))
        .with_state(state);

    Router::new()
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

// ============================================================================
// TESTS
// ============================================================================
