use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::config::ToggleMode;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PowerEventKind {
    TimerArmed { timeout_ms: u64 },
    TimerCancelled,
    TimerFired,
    Toggled { goal: bool, mode: ToggleMode },
    SenseSkipped { level: bool },
    Suppressed,
    Reconfigured { sense_pin: u32, toggle_pin: u32 },
}

#[derive(Debug, Clone, Serialize)]
pub struct PowerEvent {
    #[serde(flatten)]
    pub kind: PowerEventKind,
    pub timestamp_ms: u64,
}

pub struct EventCallbackHandler {
    event_tx: broadcast::Sender<PowerEvent>,
    history: RwLock<VecDeque<PowerEvent>>,
    history_capacity: usize,
}

impl EventCallbackHandler {
    pub fn new(broadcast_capacity: usize, history_capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(broadcast_capacity.max(1));
        Self {
            event_tx,
            history: RwLock::new(VecDeque::with_capacity(history_capacity)),
            history_capacity,
        }
    }

    pub fn dispatch(&self, kind: PowerEventKind) {
        let event = PowerEvent {
            kind,
            timestamp_ms: epoch_millis(),
        };
        if self.history_capacity > 0 {
            let mut history = self.history.write();
            while history.len() >= self.history_capacity {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PowerEvent> {
        self.event_tx.subscribe()
    }

    pub fn recent(&self, limit: Option<usize>) -> Vec<PowerEvent> {
        let history = self.history.read();
        let skip = limit
            .map(|lim| history.len().saturating_sub(lim))
            .unwrap_or(0);
        history.iter().skip(skip).cloned().collect()
    }
}

pub type EventHandler = Arc<EventCallbackHandler>;

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
