//! A single-room wagering service.
//!
//! Clients join over a WebSocket, place one bet per round, and when the
//! countdown expires the pot goes to one bettor drawn with probability
//! proportional to stake. The [`room`] actor owns all round state; the
//! [`ledger`] holds balances and is shared with the HTTP handlers.

use axum::Router;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::sync::Arc;
use tokio::task::JoinHandle;

pub mod broadcast;
pub mod config;
pub mod ledger;
pub mod liveness;
pub mod registry;
pub mod room;
pub mod round;

mod api;
pub use api::Api;
pub use config::{ConfigError, RoomConfig};
pub use ledger::{JsonFileStore, Ledger, LedgerError, LedgerStore, MemoryStore};
pub use room::{Actor, Mailbox, Room, RoomError};

/// A running room: its HTTP router and the actor task behind it.
pub struct Service {
    pub router: Router,
    pub actor: JoinHandle<()>,
}

/// Spawn the room actor and build the router that feeds it.
pub fn start(config: RoomConfig, ledger: Arc<Ledger>, admin_token: Option<String>) -> Service {
    let (actor, mailbox) = Actor::new(&config, ledger.clone(), StdRng::from_entropy());
    let actor = actor.start();
    let router = Api::new(mailbox, ledger, config, admin_token).router();
    Service { router, actor }
}
