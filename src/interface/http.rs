use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post, put},
    Router,
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use crate::bus::Event;
use crate::chat::{ChatMessage, ConversationSnapshot};
use crate::contact::{
    ContactForm, ContactFormSnapshot, Field, FieldErrors, LicenseType, SubmitOutcome, UnknownField,
};
use crate::conversation::{ConversationSession, ReplyTicket};
use crate::manager::Manager;
use crate::theme::{ThemeConfig, ThemeMode, UnknownThemeMode};

// -----------------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("chat session not found: {0}")]
    SessionNotFound(String),
    #[error("no pending reply with ticket {0}")]
    TicketNotFound(u64),
    #[error("contact form not found: {0}")]
    FormNotFound(String),
    #[error("suggestions are no longer offered in this session")]
    SuggestionsClosed,
    #[error(transparent)]
    ThemeMode(#[from] UnknownThemeMode),
    #[error(transparent)]
    UnknownField(#[from] UnknownField),
    #[error("some fields need attention")]
    InvalidForm(FieldErrors),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            ApiError::SessionNotFound(_)
            | ApiError::TicketNotFound(_)
            | ApiError::FormNotFound(_) => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            ApiError::SuggestionsClosed => {
                (StatusCode::CONFLICT, Json(json!({ "error": message }))).into_response()
            }
            ApiError::ThemeMode(_) | ApiError::UnknownField(_) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            ApiError::InvalidForm(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": message, "errors": errors })),
            )
                .into_response(),
            ApiError::Internal(e) => {
                error!("Request failed: {:#}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error" })),
                )
                    .into_response()
            }
        }
    }
}

// -----------------------------------------------------------------------------
// Request / response bodies
// -----------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct TextBody {
    pub text: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct SendBody {
    /// Sends the input buffer when absent.
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SendResponse {
    pub ticket: Option<ReplyTicket>,
    pub snapshot: ConversationSnapshot,
}

#[derive(Debug, Deserialize)]
pub struct ThemeBody {
    pub mode: String,
}

#[derive(Debug, Deserialize)]
pub struct FieldBody {
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub errors: FieldErrors,
}

// -----------------------------------------------------------------------------
// Implementation
// -----------------------------------------------------------------------------

pub struct HttpInterface {
    manager: Arc<Manager>,
}

impl HttpInterface {
    pub fn new(manager: Arc<Manager>) -> Self {
        Self { manager }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/events", get(global_events))
            .route("/chat/sessions", post(create_session))
            .route("/chat/sessions/:id", get(get_session).delete(end_session))
            .route("/chat/sessions/:id/open", post(open_session))
            .route("/chat/sessions/:id/close", post(close_session))
            .route("/chat/sessions/:id/toggle", post(toggle_session))
            .route("/chat/sessions/:id/input", put(set_input))
            .route(
                "/chat/sessions/:id/messages",
                get(list_messages).post(send_message),
            )
            .route(
                "/chat/sessions/:id/suggestions",
                get(list_suggestions).post(select_suggestion),
            )
            .route("/chat/sessions/:id/replies", delete(cancel_replies))
            .route("/chat/sessions/:id/replies/:ticket", delete(cancel_reply))
            .route("/chat/sessions/:id/events", get(session_events))
            .route("/contact", post(submit_contact))
            .route("/contact/license-types", get(license_types))
            .route("/contact/forms", post(create_form))
            .route("/contact/forms/:id", get(get_form).delete(end_form))
            .route("/contact/forms/:id/fields/:field", put(set_form_field))
            .route("/contact/forms/:id/validate", post(validate_form))
            .route("/contact/forms/:id/submit", post(submit_form))
            .route("/theme", get(get_theme).put(set_theme))
            .route("/theme/toggle", post(toggle_theme))
            .with_state(self.manager.clone())
            .layer(CorsLayer::permissive())
            .layer(TraceLayer::new_for_http())
    }
}

fn lookup(manager: &Manager, id: &str) -> Result<Arc<ConversationSession>, ApiError> {
    manager
        .session(id)
        .ok_or_else(|| ApiError::SessionNotFound(id.to_string()))
}

/// Forwards bus events accepted by `keep` as SSE frames until the bus closes.
fn forward_events<F>(
    mut rx: broadcast::Receiver<Event>,
    keep: F,
) -> impl Stream<Item = Result<SseEvent, axum::BoxError>>
where
    F: Fn(&Event) -> bool + Send + 'static,
{
    async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if !keep(&event) {
                        continue;
                    }
                    match serde_json::to_string(&event) {
                        Ok(data) => {
                            yield Ok(SseEvent::default().data(data));
                        }
                        Err(e) => warn!("Failed to encode event: {}", e),
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "SSE subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    }
}

/// Events that belong to no chat session: contact submissions and theme
/// changes.
async fn global_events(
    State(manager): State<Arc<Manager>>,
) -> Sse<impl Stream<Item = Result<SseEvent, axum::BoxError>>> {
    info!("New global SSE connection established");
    let rx = manager.event_bus().subscribe();
    let stream = forward_events(rx, |event| event.session_id().is_none());
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn create_session(State(manager): State<Arc<Manager>>) -> impl IntoResponse {
    let session = manager.create_session();
    (StatusCode::CREATED, Json(session.snapshot()))
}

async fn get_session(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    Ok(Json(lookup(&manager, &id)?.snapshot()))
}

async fn end_session(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if manager.end_session(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}

async fn open_session(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    let session = lookup(&manager, &id)?;
    session.open();
    Ok(Json(session.snapshot()))
}

async fn close_session(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    let session = lookup(&manager, &id)?;
    session.close();
    Ok(Json(session.snapshot()))
}

async fn toggle_session(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    let session = lookup(&manager, &id)?;
    session.toggle();
    Ok(Json(session.snapshot()))
}

async fn set_input(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
    Json(body): Json<TextBody>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    let session = lookup(&manager, &id)?;
    session.set_input(body.text);
    Ok(Json(session.snapshot()))
}

async fn list_messages(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<ChatMessage>>, ApiError> {
    Ok(Json(lookup(&manager, &id)?.messages()))
}

async fn send_message(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
    Json(body): Json<SendBody>,
) -> Result<(StatusCode, Json<SendResponse>), ApiError> {
    let session = lookup(&manager, &id)?;
    let ticket = match body.text {
        Some(text) => session.submit_user_message(&text),
        None => session.send_input(),
    };

    let status = if ticket.is_some() {
        StatusCode::ACCEPTED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(SendResponse {
            ticket,
            snapshot: session.snapshot(),
        }),
    ))
}

async fn list_suggestions(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<Json<Vec<String>>, ApiError> {
    Ok(Json(lookup(&manager, &id)?.suggestions()))
}

async fn select_suggestion(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
    Json(body): Json<TextBody>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    let session = lookup(&manager, &id)?;
    if !session.select_suggested_question(&body.text) {
        return Err(ApiError::SuggestionsClosed);
    }
    Ok(Json(session.snapshot()))
}

async fn cancel_replies(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = lookup(&manager, &id)?;
    let cancelled = session.cancel_pending();
    Ok(Json(json!({ "cancelled": cancelled })))
}

async fn cancel_reply(
    State(manager): State<Arc<Manager>>,
    Path((id, ticket)): Path<(String, u64)>,
) -> Result<Json<ConversationSnapshot>, ApiError> {
    let session = lookup(&manager, &id)?;
    if !session.cancel_reply(ReplyTicket::from(ticket)) {
        return Err(ApiError::TicketNotFound(ticket));
    }
    Ok(Json(session.snapshot()))
}

async fn session_events(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<SseEvent, axum::BoxError>>>, ApiError> {
    lookup(&manager, &id)?;
    info!(session = %id, "New SSE connection established");

    let rx = manager.event_bus().subscribe();
    let stream = forward_events(rx, move |event| event.session_id() == Some(id.as_str()));

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn submit_contact(
    State(manager): State<Arc<Manager>>,
    Json(form): Json<ContactForm>,
) -> Result<Json<serde_json::Value>, ApiError> {
    submitted(manager.submit_contact(form)?)
}

fn submitted(outcome: SubmitOutcome) -> Result<Json<serde_json::Value>, ApiError> {
    match outcome {
        SubmitOutcome::Submitted(submission) => {
            Ok(Json(json!({ "ok": true, "submission": submission })))
        }
        SubmitOutcome::Rejected(errors) => Err(ApiError::InvalidForm(errors)),
    }
}

async fn license_types() -> Json<Vec<&'static str>> {
    Json(LicenseType::ALL.iter().map(|t| t.label()).collect())
}

async fn create_form(State(manager): State<Arc<Manager>>) -> impl IntoResponse {
    (StatusCode::CREATED, Json(manager.create_form()))
}

async fn get_form(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<Json<ContactFormSnapshot>, ApiError> {
    manager
        .with_form(&id, |form| form.snapshot(id.as_str()))
        .map(Json)
        .ok_or(ApiError::FormNotFound(id))
}

async fn end_form(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    if manager.end_form(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::FormNotFound(id))
    }
}

/// Stores one field value. Only that field's error is cleared; the rest wait
/// for the next validate or submit.
async fn set_form_field(
    State(manager): State<Arc<Manager>>,
    Path((id, field)): Path<(String, String)>,
    Json(body): Json<FieldBody>,
) -> Result<Json<ContactFormSnapshot>, ApiError> {
    let field: Field = field.parse()?;
    manager
        .with_form(&id, |form| {
            form.set_field(field, body.value);
            form.snapshot(id.as_str())
        })
        .map(Json)
        .ok_or(ApiError::FormNotFound(id))
}

async fn validate_form(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<Json<ValidateResponse>, ApiError> {
    manager
        .with_form(&id, |form| ValidateResponse {
            valid: form.validate(),
            errors: form.errors().clone(),
        })
        .map(Json)
        .ok_or(ApiError::FormNotFound(id))
}

async fn submit_form(
    State(manager): State<Arc<Manager>>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    match manager.submit_form(&id) {
        Some(outcome) => submitted(outcome?),
        None => Err(ApiError::FormNotFound(id)),
    }
}

async fn get_theme(State(manager): State<Arc<Manager>>) -> Json<ThemeConfig> {
    Json(manager.theme().config().await)
}

async fn set_theme(
    State(manager): State<Arc<Manager>>,
    Json(body): Json<ThemeBody>,
) -> Result<Json<ThemeConfig>, ApiError> {
    let mode: ThemeMode = body.mode.parse()?;
    let mode = manager.theme().set_mode(mode).await?;
    Ok(Json(ThemeConfig::for_mode(mode)))
}

async fn toggle_theme(State(manager): State<Arc<Manager>>) -> Result<Json<ThemeConfig>, ApiError> {
    let mode = manager.theme().toggle().await?;
    Ok(Json(ThemeConfig::for_mode(mode)))
}
