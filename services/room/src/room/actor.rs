use rand::Rng;
use std::future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::{debug, info};

use super::{Mailbox, Message, Room};
use crate::config::RoomConfig;
use crate::ledger::Ledger;

/// Owns the room and applies socket events and timer ticks one at a time.
pub struct Actor<R> {
    room: Room<R>,
    inbox: mpsc::Receiver<Message>,
    tick: Duration,
    probe: Duration,
}

impl<R: Rng + Send + 'static> Actor<R> {
    pub fn new(config: &RoomConfig, ledger: Arc<Ledger>, rng: R) -> (Self, Mailbox) {
        let (sender, inbox) = mpsc::channel(config.mailbox_size);
        let actor = Self {
            room: Room::new(config, ledger, rng),
            inbox,
            tick: config.tick_interval(),
            probe: config.probe_interval(),
        };
        (actor, Mailbox::new(sender))
    }

    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut probe = interval(self.probe);
        let mut countdown: Option<Interval> = None;

        loop {
            // The countdown timer exists only while a round is collecting.
            if self.room.is_collecting() {
                if countdown.is_none() {
                    debug!(round = self.room.round().round_number(), "countdown armed");
                    countdown = Some(interval(self.tick));
                }
            } else {
                countdown = None;
            }

            tokio::select! {
                message = self.inbox.recv() => match message {
                    Some(message) => self.room.handle(message),
                    None => {
                        info!("room mailbox closed; stopping actor");
                        break;
                    }
                },
                _ = next_tick(&mut countdown) => self.room.on_tick(),
                _ = probe.tick() => self.room.on_probe(),
            }
        }
    }
}

/// An interval whose first tick fires one `period` from now.
fn interval(period: Duration) -> Interval {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(countdown: &mut Option<Interval>) {
    match countdown {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}
