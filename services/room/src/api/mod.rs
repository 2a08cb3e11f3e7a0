use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::config::RoomConfig;
use crate::ledger::Ledger;
use crate::room::Mailbox;

mod http;
mod ws;

#[derive(Clone)]
pub(crate) struct AppState {
    mailbox: Mailbox,
    ledger: Arc<Ledger>,
    config: Arc<RoomConfig>,
    admin_token: Option<Arc<str>>,
}

pub struct Api {
    state: AppState,
}

impl Api {
    pub fn new(
        mailbox: Mailbox,
        ledger: Arc<Ledger>,
        config: RoomConfig,
        admin_token: Option<String>,
    ) -> Self {
        let admin_token = admin_token
            .filter(|token| !token.is_empty())
            .map(Arc::from);
        Self {
            state: AppState {
                mailbox,
                ledger,
                config: Arc::new(config),
                admin_token,
            },
        }
    }

    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(ws::upgrade))
            .route("/ws", get(ws::upgrade))
            .route("/init", get(http::init))
            .route("/charge", post(http::charge))
            .route("/healthz", get(http::healthz))
            .layer(TraceLayer::new_for_http())
            .with_state(self.state.clone())
    }
}
