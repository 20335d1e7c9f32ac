//! Typed lifecycle event stream.
//!
//! Each run gets its own broadcast channel. The hub enforces the stream
//! contract at the publishing side: at most one `step_complete` per
//! (run, step), at most one `done`, and nothing after `done`. Subscribers
//! that attach late see only events from their subscription point on;
//! the full history lives in the store, not the stream.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::pipeline::state::{LifecycleStatus, VerdictRecord};

const CHANNEL_CAPACITY: usize = 256;

/// Events observable on a run's stream, serialized as
/// `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum RunEvent {
    /// Lifecycle transition.
    Status { status: LifecycleStatus },
    /// A check finished; carries its full verdict.
    StepComplete { step: String, verdict: VerdictRecord },
    /// The run suspended for human review.
    AwaitingDecision {
        run_id: String,
        overall_score: f64,
        overall_passed: bool,
        verdicts: Vec<VerdictRecord>,
    },
    /// A non-fatal or fatal problem was recorded.
    Error { message: String },
    /// Terminal. Always the last event on a stream.
    Done { status: LifecycleStatus },
    /// Emitted by the SSE layer during silence; never published here.
    Keepalive,
}

struct RunChannel {
    tx: broadcast::Sender<RunEvent>,
    emitted_steps: HashSet<String>,
    done: bool,
}

/// Registry of per-run event channels.
#[derive(Default)]
pub struct EventHub {
    channels: Mutex<HashMap<String, RunChannel>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the channel for a run. Idempotent.
    pub fn register(&self, run_id: &str) {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels.entry(run_id.to_string()).or_insert_with(|| {
            let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
            RunChannel {
                tx,
                emitted_steps: HashSet::new(),
                done: false,
            }
        });
    }

    /// Subscribe to a run's live stream. `None` when the run has no
    /// channel (unknown id, or already finished and cleaned up).
    pub fn subscribe(&self, run_id: &str) -> Option<broadcast::Receiver<RunEvent>> {
        let channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels.get(run_id).map(|c| c.tx.subscribe())
    }

    /// Publish an event on a run's channel, enforcing dedup and the
    /// done-is-last invariant. Events for unknown runs are dropped.
    pub fn emit(&self, run_id: &str, event: RunEvent) {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let Some(channel) = channels.get_mut(run_id) else {
            warn!(run_id, "Dropping event for unregistered run");
            return;
        };

        if channel.done {
            warn!(run_id, ?event, "Dropping event after done");
            return;
        }

        match &event {
            RunEvent::StepComplete { step, .. } => {
                if !channel.emitted_steps.insert(step.clone()) {
                    debug!(run_id, step = %step, "Suppressing duplicate step_complete");
                    return;
                }
            }
            RunEvent::Done { .. } => {
                channel.done = true;
            }
            _ => {}
        }

        // Send fails only when no subscriber is attached, which is fine.
        let _ = channel.tx.send(event);
    }

    /// Drop a finished run's channel.
    pub fn remove(&self, run_id: &str) {
        let mut channels = match self.channels.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        channels.remove(run_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verdict(step: &str) -> VerdictRecord {
        VerdictRecord {
            step: step.to_string(),
            passed: true,
            score: 1.0,
            observations: vec![],
            issues: vec![],
            recommendations: vec![],
        }
    }

    fn drain(rx: &mut broadcast::Receiver<RunEvent>) -> Vec<RunEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn duplicate_step_complete_is_suppressed() {
        let hub = EventHub::new();
        hub.register("r1");
        let mut rx = hub.subscribe("r1").unwrap();

        hub.emit(
            "r1",
            RunEvent::StepComplete {
                step: "metadata".to_string(),
                verdict: verdict("metadata"),
            },
        );
        hub.emit(
            "r1",
            RunEvent::StepComplete {
                step: "metadata".to_string(),
                verdict: verdict("metadata"),
            },
        );
        hub.emit(
            "r1",
            RunEvent::StepComplete {
                step: "editorial".to_string(),
                verdict: verdict("editorial"),
            },
        );

        let events = drain(&mut rx);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn nothing_after_done() {
        let hub = EventHub::new();
        hub.register("r1");
        let mut rx = hub.subscribe("r1").unwrap();

        hub.emit(
            "r1",
            RunEvent::Done {
                status: LifecycleStatus::Approved,
            },
        );
        hub.emit(
            "r1",
            RunEvent::Status {
                status: LifecycleStatus::Failed,
            },
        );
        hub.emit(
            "r1",
            RunEvent::Done {
                status: LifecycleStatus::Failed,
            },
        );

        let events = drain(&mut rx);
        assert_eq!(
            events,
            vec![RunEvent::Done {
                status: LifecycleStatus::Approved
            }]
        );
    }

    #[test]
    fn step_dedup_is_scoped_per_run() {
        let hub = EventHub::new();
        hub.register("r1");
        hub.register("r2");
        let mut rx2 = hub.subscribe("r2").unwrap();

        hub.emit(
            "r1",
            RunEvent::StepComplete {
                step: "metadata".to_string(),
                verdict: verdict("metadata"),
            },
        );
        hub.emit(
            "r2",
            RunEvent::StepComplete {
                step: "metadata".to_string(),
                verdict: verdict("metadata"),
            },
        );

        assert_eq!(drain(&mut rx2).len(), 1);
    }

    #[test]
    fn subscribe_unknown_run_returns_none() {
        let hub = EventHub::new();
        assert!(hub.subscribe("nope").is_none());
    }

    #[test]
    fn events_serialize_with_type_and_data_tags() {
        let event = RunEvent::Status {
            status: LifecycleStatus::Checking,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["data"]["status"], "checking");

        let done = serde_json::to_value(RunEvent::Done {
            status: LifecycleStatus::Approved,
        })
        .unwrap();
        assert_eq!(done["type"], "done");
    }

    #[test]
    fn late_subscriber_gets_no_history() {
        let hub = EventHub::new();
        hub.register("r1");
        hub.emit(
            "r1",
            RunEvent::Status {
                status: LifecycleStatus::Fetching,
            },
        );

        let mut rx = hub.subscribe("r1").unwrap();
        assert!(drain(&mut rx).is_empty());
    }
}
