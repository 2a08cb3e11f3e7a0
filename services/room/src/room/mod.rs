//! The room coordinator.
//!
//! [`Room`] is the sans-IO core: it owns the connection registry and the
//! round, and reacts to socket events and timer ticks by queueing frames on
//! connection outbound queues. [`Actor`] drives it from a single task.

use rand::Rng;
use stakeroom_protocol::{
    decode_client_message, AmountInput, ClientMessage, ConnectionId, ProtocolError,
    ServerMessage, UserId,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::broadcast::{self, broadcast, send_to};
use crate::config::RoomConfig;
use crate::ledger::Ledger;
use crate::liveness;
use crate::registry::{BindError, ConnectionRegistry, OutboundSender};
use crate::round::{BetError, Phase, Resolution, RoundState};

mod actor;
pub use actor::Actor;
mod ingress;
pub use ingress::{Mailbox, Message};

pub const WELCOME_MESSAGE: &str = "Hello from server!";

/// Rejections reported to the client. `Display` is the wire text.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RoomError {
    #[error("Bad JSON")]
    MalformedMessage,
    #[error("Unknown type")]
    UnknownMessageType,
    #[error("Invalid bet")]
    UnboundConnection,
    #[error("Invalid bet")]
    InvalidBetAmount,
    #[error("Already placed a bet")]
    DuplicateBet,
    #[error("Unknown user")]
    UnknownUser,
    #[error("Already joined")]
    AlreadyJoined,
}

impl From<ProtocolError> for RoomError {
    fn from(err: ProtocolError) -> Self {
        match err {
            ProtocolError::UnknownType(_) => RoomError::UnknownMessageType,
            ProtocolError::Malformed(_) | ProtocolError::InvalidFields { .. } => {
                RoomError::MalformedMessage
            }
        }
    }
}

impl From<BetError> for RoomError {
    fn from(err: BetError) -> Self {
        match err {
            BetError::NonPositive | BetError::ExceedsBalance { .. } => RoomError::InvalidBetAmount,
            BetError::Duplicate(_) => RoomError::DuplicateBet,
        }
    }
}

pub struct Room<R> {
    ledger: Arc<Ledger>,
    registry: ConnectionRegistry,
    round: RoundState,
    rng: R,
}

impl<R: Rng> Room<R> {
    pub fn new(config: &RoomConfig, ledger: Arc<Ledger>, rng: R) -> Self {
        Self {
            ledger,
            registry: ConnectionRegistry::new(),
            round: RoundState::new(config.countdown_secs, config.min_bettors),
            rng,
        }
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn round(&self) -> &RoundState {
        &self.round
    }

    pub fn is_collecting(&self) -> bool {
        self.round.phase() == Phase::Collecting
    }

    pub fn handle(&mut self, message: Message) {
        match message {
            Message::Opened { id, sender } => self.on_open(id, sender),
            Message::Closed { id } => self.on_close(id),
            Message::Text { id, text } => self.on_text(id, &text),
            Message::Pong { id } => self.on_pong(id),
        }
    }

    pub fn on_open(&mut self, id: ConnectionId, sender: OutboundSender) {
        if !self.registry.register(id, sender) {
            warn!(conn = %id, "duplicate connection id; ignoring open");
            return;
        }
        debug!(conn = %id, connections = self.registry.len(), "connection opened");
        send_to(
            &self.registry,
            id,
            &ServerMessage::Welcome {
                message: WELCOME_MESSAGE.to_string(),
            },
        );
    }

    /// Forget the connection. Any bet it placed stays in the pool.
    pub fn on_close(&mut self, id: ConnectionId) {
        if let Some(connection) = self.registry.unbind(id) {
            debug!(
                conn = %id,
                user = ?connection.user(),
                connections = self.registry.len(),
                "connection closed"
            );
        }
    }

    pub fn on_pong(&mut self, id: ConnectionId) {
        self.registry.mark_alive(id);
    }

    pub fn on_text(&mut self, id: ConnectionId, text: &str) {
        if let Err(err) = self.dispatch(id, text) {
            debug!(conn = %id, ?err, "rejected client message");
            send_to(&self.registry, id, &ServerMessage::error(err.to_string()));
        }
    }

    fn dispatch(&mut self, id: ConnectionId, text: &str) -> Result<(), RoomError> {
        match decode_client_message(text)? {
            ClientMessage::Join { user_id } => self.join(id, user_id),
            ClientMessage::PlaceBet { amount } => self.place_bet(id, amount.as_ref()),
        }
    }

    fn join(&mut self, id: ConnectionId, user: UserId) -> Result<(), RoomError> {
        if !self.ledger.contains(&user) {
            return Err(RoomError::UnknownUser);
        }
        match self.registry.bind(id, user.clone()) {
            Ok(true) => info!(conn = %id, user = %user, "user joined"),
            Ok(false) => {}
            Err(BindError::AlreadyBound(_)) => return Err(RoomError::AlreadyJoined),
            Err(BindError::UnknownConnection) => {
                warn!(conn = %id, "join from unregistered connection");
                return Ok(());
            }
        }
        send_to(&self.registry, id, &ServerMessage::Joined { user_id: user });
        Ok(())
    }

    fn place_bet(&mut self, id: ConnectionId, amount: Option<&AmountInput>) -> Result<(), RoomError> {
        let user = self
            .registry
            .resolve(id)
            .cloned()
            .ok_or(RoomError::UnboundConnection)?;
        let amount = amount
            .and_then(AmountInput::positive)
            .ok_or(RoomError::InvalidBetAmount)?;
        let balance = self
            .ledger
            .balance(&user)
            .ok_or(RoomError::InvalidBetAmount)?;

        let opened = self.round.place_bet(user.clone(), amount, balance)?;
        info!(
            round = self.round.round_number(),
            user = %user,
            amount,
            pot = self.round.pot(),
            "bet accepted"
        );
        broadcast(
            &self.registry,
            &ServerMessage::NewBet {
                user_id: user,
                amount,
            },
        );
        if opened {
            info!(round = self.round.round_number(), "countdown started");
            broadcast(
                &self.registry,
                &ServerMessage::Timer {
                    time_left: self.round.time_left(),
                },
            );
        }
        Ok(())
    }

    /// Advance the countdown; resolves the round when it runs out.
    pub fn on_tick(&mut self) {
        let Some(tick) = self.round.tick() else {
            return;
        };
        broadcast(
            &self.registry,
            &ServerMessage::Timer {
                time_left: tick.time_left,
            },
        );
        if tick.expired {
            self.resolve();
        }
    }

    fn resolve(&mut self) {
        let round = self.round.round_number();
        let Some(resolution) = self.round.resolve(&self.ledger, &mut self.rng) else {
            return;
        };
        match resolution {
            Resolution::Cancelled { reason, voided } => {
                for bet in &voided {
                    warn!(round, user = %bet.user, amount = bet.amount, "bet voided; balance no longer covers it");
                }
                info!(round, ?reason, "round cancelled");
                broadcast(&self.registry, &ServerMessage::RoundCancelled);
            }
            Resolution::Settled {
                winner,
                total,
                bets,
                voided,
            } => {
                for bet in &voided {
                    warn!(round, user = %bet.user, amount = bet.amount, "bet voided; balance no longer covers it");
                }
                info!(round, winner = %winner, total, bettors = bets.len(), "round settled");
                self.ledger.persist();
                broadcast(&self.registry, &ServerMessage::RoundResult { winner, total });
                self.push_balances();
            }
        }
    }

    fn push_balances(&self) {
        self.registry.for_each_live(|id, connection| {
            let Some(balance) = connection.user().and_then(|user| self.ledger.balance(user)) else {
                return;
            };
            broadcast::send(id, connection, &ServerMessage::BalanceUpdate { balance });
        });
    }

    pub fn on_probe(&mut self) {
        let sweep = liveness::sweep(&mut self.registry);
        for id in &sweep.evicted {
            warn!(conn = %id, "evicting unresponsive connection");
        }
        debug!(
            probed = sweep.probed,
            evicted = sweep.evicted.len(),
            "liveness sweep"
        );
    }
}
