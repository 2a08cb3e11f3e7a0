//! Round lifecycle: bet collection, countdown, weighted settlement.
//!
//! A round opens with its first accepted bet, counts down one unit per tick
//! and is resolved once the countdown reaches zero. Settlement debits every
//! stake and credits the whole pot to a single winner inside one ledger
//! transaction, so balances are conserved across a round.

use rand::Rng;
use stakeroom_protocol::UserId;
use thiserror::Error;
use tracing::error;

use crate::ledger::{Ledger, LedgerError};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Collecting,
    Resolving,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Bet {
    pub user: UserId,
    pub amount: u64,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BetError {
    #[error("bet amount must be positive")]
    NonPositive,
    #[error("bet of {amount} exceeds balance {balance}")]
    ExceedsBalance { amount: u64, balance: u64 },
    #[error("{0} already has a bet this round")]
    Duplicate(UserId),
}

/// Countdown progress after one tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tick {
    pub time_left: u32,
    pub expired: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CancelReason {
    TooFewBettors,
    SettlementFailed,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Cancelled {
        reason: CancelReason,
        /// Bets dropped because the bettor could no longer cover them.
        voided: Vec<Bet>,
    },
    Settled {
        winner: UserId,
        total: u64,
        bets: Vec<Bet>,
        voided: Vec<Bet>,
    },
}

#[derive(Debug)]
pub struct RoundState {
    phase: Phase,
    countdown_secs: u32,
    time_left: u32,
    min_bettors: usize,
    /// Placement order; the winner draw walks bets in this order.
    bets: Vec<Bet>,
    round: u64,
}

impl RoundState {
    pub fn new(countdown_secs: u32, min_bettors: usize) -> Self {
        Self {
            phase: Phase::Idle,
            countdown_secs,
            time_left: 0,
            min_bettors,
            bets: Vec::new(),
            round: 1,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn time_left(&self) -> u32 {
        self.time_left
    }

    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    pub fn round_number(&self) -> u64 {
        self.round
    }

    pub fn pot(&self) -> u64 {
        self.bets
            .iter()
            .fold(0u64, |acc, bet| acc.saturating_add(bet.amount))
    }

    pub fn has_bet(&self, user: &UserId) -> bool {
        self.bets.iter().any(|bet| &bet.user == user)
    }

    /// Record a bet against the bettor's current `balance`.
    ///
    /// Returns `true` when this bet opened the round and started the countdown.
    pub fn place_bet(&mut self, user: UserId, amount: u64, balance: u64) -> Result<bool, BetError> {
        if amount == 0 {
            return Err(BetError::NonPositive);
        }
        if amount > balance {
            return Err(BetError::ExceedsBalance { amount, balance });
        }
        if self.has_bet(&user) {
            return Err(BetError::Duplicate(user));
        }
        self.bets.push(Bet { user, amount });
        Ok(self.start_countdown())
    }

    fn start_countdown(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        self.phase = Phase::Collecting;
        self.time_left = self.countdown_secs;
        true
    }

    /// Advance the countdown by one unit. `None` while no round is open.
    pub fn tick(&mut self) -> Option<Tick> {
        if self.phase != Phase::Collecting || self.time_left == 0 {
            return None;
        }
        self.time_left -= 1;
        Some(Tick {
            time_left: self.time_left,
            expired: self.time_left == 0,
        })
    }

    /// Settle an expired round and reset for the next one.
    ///
    /// Returns `None` unless the countdown has run out.
    pub fn resolve<R: Rng + ?Sized>(&mut self, ledger: &Ledger, rng: &mut R) -> Option<Resolution> {
        if self.phase != Phase::Collecting || self.time_left > 0 {
            return None;
        }
        self.phase = Phase::Resolving;
        let bets = std::mem::take(&mut self.bets);
        let resolution = settle(bets, self.min_bettors, ledger, rng);
        self.phase = Phase::Idle;
        self.round = self.round.saturating_add(1);
        Some(resolution)
    }
}

fn settle<R: Rng + ?Sized>(
    bets: Vec<Bet>,
    min_bettors: usize,
    ledger: &Ledger,
    rng: &mut R,
) -> Resolution {
    if bets.len() < min_bettors {
        return Resolution::Cancelled {
            reason: CancelReason::TooFewBettors,
            voided: Vec::new(),
        };
    }

    let outcome = ledger.transact(|tx| -> Result<Resolution, LedgerError> {
        let (eligible, voided): (Vec<Bet>, Vec<Bet>) = bets
            .into_iter()
            .partition(|bet| tx.balance(&bet.user).is_some_and(|b| b >= bet.amount));
        if eligible.len() < min_bettors {
            return Ok(Resolution::Cancelled {
                reason: CancelReason::TooFewBettors,
                voided,
            });
        }

        let mut total = 0u64;
        for bet in &eligible {
            tx.debit(&bet.user, bet.amount)?;
            total = total
                .checked_add(bet.amount)
                .ok_or_else(|| LedgerError::Overflow(bet.user.clone()))?;
        }
        let winner = eligible[draw_winner(&eligible, total, rng)].user.clone();
        tx.credit(&winner, total)?;

        Ok(Resolution::Settled {
            winner,
            total,
            bets: eligible,
            voided,
        })
    });

    outcome.unwrap_or_else(|err| {
        error!(?err, "settlement failed; round cancelled without moving funds");
        Resolution::Cancelled {
            reason: CancelReason::SettlementFailed,
            voided: Vec::new(),
        }
    })
}

/// Index of the winning bet for a uniform draw over `[0, total)`.
///
/// `total` must be the positive sum of the bet amounts.
pub fn draw_winner<R: Rng + ?Sized>(bets: &[Bet], total: u64, rng: &mut R) -> usize {
    pick_winner(bets, rng.gen_range(0..total))
}

/// Map a draw in `[0, total)` onto the bet whose cumulative range holds it.
pub fn pick_winner(bets: &[Bet], mut draw: u64) -> usize {
    for (index, bet) in bets.iter().enumerate() {
        if draw < bet.amount {
            return index;
        }
        draw -= bet.amount;
    }
    bets.len().saturating_sub(1)
}
