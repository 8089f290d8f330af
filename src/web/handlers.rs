//! HTTP handlers for the protected form endpoints.

use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::client::ClientIdentity;
use super::server::AppState;
use crate::contact::ContactForm;
use crate::ratelimit::RateLimiter;
use crate::subscribers::{is_valid_email, normalize_email};

pub const CONTACT_SENT: &str = "Message Sent!";
pub const CONTACT_LIMITED: &str = "Too many submissions. Please try again later.";
pub const CONTACT_INCOMPLETE: &str = "Please fill in all required fields.";
pub const CONTACT_DELIVERY_FAILED: &str =
    "Sorry, there was a problem sending your message. Please try again or contact us directly.";
pub const SUBSCRIBED: &str = "Thank you for subscribing!";
pub const SUBSCRIBE_LIMITED: &str = "Too many attempts. Please try again later.";
pub const SUBSCRIBE_INVALID: &str = "Enter a valid email address.";
pub const SUBSCRIBE_FAILED: &str = "Sorry, we could not complete your subscription. Please try again later.";
pub const UNSUBSCRIBED: &str = "You have been unsubscribed.";
pub const UNSUBSCRIBE_UNKNOWN: &str = "Unknown unsubscribe link.";

/// JSON body returned by every form endpoint.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct FormResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FormResponse {
    fn success(message: &str) -> Json<Self> {
        Json(Self {
            ok: true,
            message: Some(message.to_string()),
            error: None,
        })
    }

    fn failure(error: &str) -> Json<Self> {
        Json(Self {
            ok: false,
            message: None,
            error: Some(error.to_string()),
        })
    }
}

/// 429 with a `Retry-After` pointing at the end of the current window.
///
/// The body is the same whatever the reason for the rejection.
fn limited(limiter: &RateLimiter, error: &str) -> Response {
    let retry_secs = limiter.retry_after().as_secs();
    (
        StatusCode::TOO_MANY_REQUESTS,
        [(header::RETRY_AFTER, retry_secs.to_string())],
        FormResponse::failure(error),
    )
        .into_response()
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
}

/// Liveness plus a store round trip.
pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let status = match state.contact_limiter.counter().health_check().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
    };
    (
        status.0,
        Json(HealthResponse {
            status: status.1,
            service: "formguard",
            version: env!("CARGO_PKG_VERSION"),
        }),
    )
        .into_response()
}

/// Contact form submission.
///
/// The limiter runs before validation, so malformed submissions count too.
pub async fn contact(
    State(state): State<Arc<AppState>>,
    ClientIdentity(identity): ClientIdentity,
    Form(form): Form<ContactForm>,
) -> Response {
    if !state.contact_limiter.permit(&identity).await.is_allowed() {
        info!(limiter = state.contact_limiter.name(), "Contact submission rate limited");
        return limited(&state.contact_limiter, CONTACT_LIMITED);
    }

    let Some(message) = form.validate() else {
        return (
            StatusCode::BAD_REQUEST,
            FormResponse::failure(CONTACT_INCOMPLETE),
        )
            .into_response();
    };

    match state.sink.deliver(&message).await {
        Ok(()) => (StatusCode::OK, FormResponse::success(CONTACT_SENT)).into_response(),
        Err(e) => {
            error!(error = %e, "Contact message delivery failed");
            (
                StatusCode::BAD_GATEWAY,
                FormResponse::failure(CONTACT_DELIVERY_FAILED),
            )
                .into_response()
        }
    }
}

/// Fields posted by the newsletter signup form.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SubscribeForm {
    pub email: String,
    /// Honeypot; real visitors never see or fill this field.
    pub website: String,
}

/// Newsletter signup.
///
/// Known and new addresses get the same response so the endpoint cannot be
/// used to probe the subscriber list.
pub async fn subscribe(
    State(state): State<Arc<AppState>>,
    ClientIdentity(identity): ClientIdentity,
    Form(form): Form<SubscribeForm>,
) -> Response {
    if !state.newsletter_limiter.permit(&identity).await.is_allowed() {
        info!(limiter = state.newsletter_limiter.name(), "Newsletter signup rate limited");
        return limited(&state.newsletter_limiter, SUBSCRIBE_LIMITED);
    }

    if !form.website.is_empty() {
        debug!("Newsletter honeypot filled, discarding signup");
        return (StatusCode::OK, FormResponse::success(SUBSCRIBED)).into_response();
    }

    let email = normalize_email(&form.email);
    if !is_valid_email(&email) {
        return (
            StatusCode::BAD_REQUEST,
            FormResponse::failure(SUBSCRIBE_INVALID),
        )
            .into_response();
    }

    let ip_hash = state.newsletter_limiter.counter().identity_hash(&identity);
    let now = state.clock.now().timestamp();
    match state.subscribers.subscribe(&email, &ip_hash, now).await {
        Ok(outcome) => {
            debug!(outcome = ?outcome, "Newsletter signup processed");
            (StatusCode::OK, FormResponse::success(SUBSCRIBED)).into_response()
        }
        Err(e) => {
            error!(error = %e, "Newsletter signup failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                FormResponse::failure(SUBSCRIBE_FAILED),
            )
                .into_response()
        }
    }
}

/// One-click unsubscribe from the link in newsletter footers.
pub async fn unsubscribe(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
) -> Response {
    match state.subscribers.unsubscribe(&token).await {
        Ok(true) => (StatusCode::OK, FormResponse::success(UNSUBSCRIBED)).into_response(),
        Ok(false) => (
            StatusCode::NOT_FOUND,
            FormResponse::failure(UNSUBSCRIBE_UNKNOWN),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Unsubscribe failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                FormResponse::failure(SUBSCRIBE_FAILED),
            )
                .into_response()
        }
    }
}
