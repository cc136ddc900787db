//! Inbound webhook ingestion: verification, dispatch, HTTP surface

mod dispatch;
mod server;
mod verifier;

pub use dispatch::{EventBus, WebhookEvent};
pub use server::{AppState, IngressServer, create_router};
pub use verifier::{WebhookVerifier, sign};
