//! JSON-over-HTTP surface for the booking engine.

use std::sync::Arc;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{DefaultBodyLimit, MatchedPath, Query, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{require_admin, AdminAuth};
use crate::engine::{format_iso, parse_time_zone, render_in, BookingError, Engine, DATE_PATTERN, TIME_PATTERN};
use crate::limits::{MAX_ID_LEN, MAX_REQUEST_BODY_BYTES};
use crate::model::*;
use crate::notify::{dispatch, Notice, NoticeKind, Notifier};
use crate::observability::HTTP_REQUESTS_TOTAL;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub notifier: Arc<dyn Notifier>,
    pub admin: AdminAuth,
    pub bcc: Arc<Vec<String>>,
}

/// Error body shared by every route: `{error, code, ...detail}`.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
    #[serde(flatten)]
    pub detail: Map<String, Value>,
}

impl ErrorBody {
    pub fn new(error: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            code: code.into(),
            detail: Map::new(),
        }
    }

    fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.detail.insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn bad_request(error: impl Into<String>, code: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            body: ErrorBody::new(error, code),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        let status = StatusCode::from_u16(e.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = match &e {
            BookingError::Validation(fields) => {
                ErrorBody::new("Missing required fields", e.code()).with("fields", fields.clone())
            }
            BookingError::SlotConflict(at) => {
                ErrorBody::new("Time slot already booked", e.code()).with("datetime", format_iso(*at))
            }
            BookingError::SlotConflictDuringProcessing(at) => ErrorBody::new(
                "This time slot was just booked by someone else while your request was processing. Please choose another time.",
                e.code(),
            )
            .with("datetime", format_iso(*at)),
            BookingError::NotFound(id) => {
                ErrorBody::new("Booking not found", e.code()).with("id", id.as_str())
            }
            BookingError::Storage(_) | BookingError::QueueClosed => {
                tracing::error!("request failed: {e}");
                ErrorBody::new("Internal server error", e.code())
            }
            BookingError::InvalidTime(_) | BookingError::LimitExceeded(_) => {
                ErrorBody::new(e.to_string(), e.code())
            }
        };
        Self { status, body }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let status = match &rejection {
            JsonRejection::JsonDataError(_) | JsonRejection::JsonSyntaxError(_) => {
                StatusCode::BAD_REQUEST
            }
            _ => rejection.status(),
        };
        Self {
            status,
            body: ErrorBody::new(rejection.body_text(), "invalid_json"),
        }
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::bad_request(rejection.body_text(), "invalid_query")
    }
}

type ApiResult = Result<Response, ApiError>;

/// Build the application router.
///
/// Endpoints:
/// - GET    /api/health
/// - GET    /api/available-slots?date=YYYY-MM-DD[&tz=Zone]
/// - POST   /api/book
/// - POST   /api/cancel
/// - GET    /api/bookings[?date=]   (admin)
/// - PUT    /api/bookings           (admin)
/// - DELETE /api/bookings           (admin)
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route(
            "/api/bookings",
            get(list_bookings).put(update_booking).delete(delete_booking),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_origin(Any);

    Router::new()
        .route("/api/health", get(health))
        .route("/api/available-slots", get(available_slots))
        .route("/api/book", post(book))
        .route("/api/cancel", post(cancel))
        .merge(admin)
        .with_state(state)
        .layer(middleware::from_fn(count_requests))
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

async fn count_requests(req: Request, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| "unmatched".into());
    let resp = next.run(req).await;
    metrics::counter!(
        HTTP_REQUESTS_TOTAL,
        "route" => route,
        "status" => resp.status().as_u16().to_string()
    )
    .increment(1);
    resp
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

fn parse_date(raw: Option<&str>) -> Result<NaiveDate, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ApiError::bad_request("Missing date parameter", "invalid_date"))?;
    NaiveDate::parse_from_str(raw, DATE_PATTERN).map_err(|_| {
        ApiError::bad_request(format!("Invalid date: {raw} (expected YYYY-MM-DD)"), "invalid_date")
    })
}

#[derive(Debug, Deserialize)]
struct SlotsQuery {
    date: Option<String>,
    tz: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotView {
    time: String,
    is_booked: bool,
    display: String,
}

async fn available_slots(
    State(state): State<AppState>,
    query: Result<Query<SlotsQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let date = parse_date(query.date.as_deref())?;
    let display_tz = match query.tz.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(name) => parse_time_zone(name)
            .map_err(|e| ApiError::bad_request(e.to_string(), "invalid_time_zone"))?,
        None => state.engine.time_zone(),
    };

    let slots: Vec<SlotView> = state
        .engine
        .list_slots(date)
        .await?
        .into_iter()
        .map(|s| SlotView {
            time: format_iso(s.time),
            is_booked: s.is_booked,
            display: render_in(s.time, display_tz, TIME_PATTERN),
        })
        .collect();
    Ok(Json(json!({ "timeSlots": slots })).into_response())
}

async fn notify(state: &AppState, kind: NoticeKind, booking: &Booking) -> bool {
    let notice = Notice::new(kind, booking.clone(), state.engine.time_zone(), &state.bcc);
    dispatch(state.notifier.as_ref(), &notice).await
}

async fn book(
    State(state): State<AppState>,
    payload: Result<Json<BookingRequest>, JsonRejection>,
) -> ApiResult {
    let Json(req) = payload?;
    let booking = state.engine.create_booking(&req).await?;
    let email_sent = notify(&state, NoticeKind::Created, &booking).await;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "booking": booking, "emailSent": email_sent })),
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
struct CancelBody {
    #[serde(default)]
    datetime: Option<String>,
    #[serde(default)]
    email: Option<String>,
}

async fn cancel(
    State(state): State<AppState>,
    payload: Result<Json<CancelBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let datetime = body.datetime.filter(|s| !s.trim().is_empty());
    let email = body.email.filter(|s| !s.trim().is_empty());
    let (Some(datetime), Some(email)) = (datetime.as_deref(), email.as_deref()) else {
        let mut missing = Vec::new();
        if datetime.is_none() {
            missing.push("datetime");
        }
        if email.is_none() {
            missing.push("email");
        }
        return Err(BookingError::Validation(missing).into());
    };

    let removed = state.engine.cancel_booking(datetime, email).await?;
    let email_sent = notify(&state, NoticeKind::Cancelled, &removed).await;
    Ok(Json(json!({ "success": true, "booking": removed, "emailSent": email_sent })).into_response())
}

#[derive(Debug, Deserialize)]
struct BookingsQuery {
    date: Option<String>,
}

async fn list_bookings(
    State(state): State<AppState>,
    query: Result<Query<BookingsQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query?;
    let bookings = match query.date.as_deref() {
        Some(raw) => state.engine.bookings_on(parse_date(Some(raw))?).await?,
        None => state.engine.list_bookings().await?,
    };
    Ok(Json(json!({ "bookings": bookings })).into_response())
}

#[derive(Debug, Deserialize)]
struct UpdateBody {
    #[serde(default)]
    id: Option<IdParam>,
    #[serde(flatten)]
    booking: BookingRequest,
}

fn require_id(id: Option<IdParam>) -> Result<String, ApiError> {
    let id = id
        .and_then(IdParam::into_id)
        .ok_or_else(|| ApiError::bad_request("Missing booking ID", "validation_error"))?;
    if id.len() > MAX_ID_LEN {
        return Err(BookingError::LimitExceeded("booking id too long").into());
    }
    Ok(id)
}

async fn update_booking(
    State(state): State<AppState>,
    payload: Result<Json<UpdateBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let id = require_id(body.id)?;
    let updated = state.engine.update_booking(&id, &body.booking).await?;
    let email_sent = notify(&state, NoticeKind::Updated, &updated).await;
    Ok(Json(json!({ "success": true, "booking": updated, "emailSent": email_sent })).into_response())
}

#[derive(Debug, Deserialize)]
struct DeleteBody {
    #[serde(default)]
    id: Option<IdParam>,
}

async fn delete_booking(
    State(state): State<AppState>,
    payload: Result<Json<DeleteBody>, JsonRejection>,
) -> ApiResult {
    let Json(body) = payload?;
    let id = require_id(body.id)?;
    let removed = state.engine.delete_booking(&id).await?;
    Ok(Json(json!({ "success": true, "booking": removed })).into_response())
}
