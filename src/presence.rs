//! Card presence polling
//!
//! The monitor owns no tag state beyond the last UID it saw. It only looks
//! at the reader when nobody else holds the transport, so it can never
//! stall or be stalled by a read/verify sequence; a busy tick is skipped.

use crate::tag::SharedTransport;
use crate::transport::{PageTransport, TransportError};
use serde::Serialize;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Default capacity of the presence event channel
pub const DEFAULT_EVENT_CAPACITY: usize = 16;

/// Change in what is on the reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CardEvent {
    Inserted { uid: Vec<u8> },
    Removed,
}

/// Poll `transport` every `interval` and publish presence changes
///
/// Returns the receiving end of a bounded channel and the task handle. The
/// task ends when `cancel` fires or the receiver is dropped. When the channel
/// is full the tick is dropped and the change is reported again on the next
/// tick.
pub fn spawn_presence_monitor<T>(
    transport: SharedTransport<T>,
    interval: Duration,
    capacity: usize,
    cancel: CancellationToken,
) -> (mpsc::Receiver<CardEvent>, JoinHandle<()>)
where
    T: PageTransport + 'static,
{
    // A swap is two events and must fit at once
    let (tx, rx) = mpsc::channel(capacity.max(2));
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut last: Option<Vec<u8>> = None;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let current = match transport.try_lock() {
                Ok(mut guard) => match guard.get_uid() {
                    Ok(uid) => Some(uid),
                    Err(TransportError::NotPresent) => None,
                    Err(e) => {
                        debug!(error = %e, "presence probe failed, treating as absent");
                        None
                    }
                },
                Err(_) => {
                    debug!("transport busy, skipping presence tick");
                    continue;
                }
            };

            if current == last {
                continue;
            }
            let mut events = Vec::with_capacity(2);
            if last.is_some() {
                events.push(CardEvent::Removed);
            }
            if let Some(uid) = &current {
                events.push(CardEvent::Inserted { uid: uid.clone() });
            }

            match publish(&tx, events) {
                Publish::Sent => {
                    info!(
                        uid = ?current.as_deref().map(hex::encode_upper),
                        "card presence changed"
                    );
                    last = current;
                }
                Publish::Full => debug!("presence channel full, dropping tick"),
                Publish::Closed => break,
            }
        }
        debug!("presence monitor stopped");
    });
    (rx, handle)
}

enum Publish {
    Sent,
    Full,
    Closed,
}

fn publish(tx: &mpsc::Sender<CardEvent>, events: Vec<CardEvent>) -> Publish {
    // Reserve every slot first so a swap is never half-reported
    let mut permits = Vec::with_capacity(events.len());
    for _ in &events {
        match tx.try_reserve() {
            Ok(permit) => permits.push(permit),
            Err(TrySendError::Full(_)) => return Publish::Full,
            Err(TrySendError::Closed(_)) => return Publish::Closed,
        }
    }
    for (permit, event) in permits.into_iter().zip(events) {
        permit.send(event);
    }
    Publish::Sent
}
