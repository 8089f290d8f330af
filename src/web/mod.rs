//! HTTP surface for the protected form endpoints.

mod client;
mod handlers;
mod server;

pub use client::{client_identity, ClientIdentity};
pub use handlers::{
    FormResponse, HealthResponse, SubscribeForm, CONTACT_DELIVERY_FAILED, CONTACT_INCOMPLETE,
    CONTACT_LIMITED, CONTACT_SENT, SUBSCRIBED, SUBSCRIBE_FAILED, SUBSCRIBE_INVALID,
    SUBSCRIBE_LIMITED, UNSUBSCRIBED, UNSUBSCRIBE_UNKNOWN,
};
pub use server::{router, AppState, HttpServer};
