//! Drives a run through the fixed pipeline topology:
//!
//! fetch → route → parallel checks → aggregate → human gate → terminal.
//!
//! One spawned task owns the run state from submission to the human gate.
//! At the gate the snapshot is persisted and the task ends; the external
//! decision later finishes the run as a fresh invocation against the
//! stored snapshot, so a suspended run survives a process restart.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

use crate::checks::judge::JudgeAdvisor;
use crate::content::ContentSource;
use crate::errors::PipelineError;
use crate::pipeline::aggregate::aggregate;
use crate::pipeline::events::{EventHub, RunEvent};
use crate::pipeline::router::{route, RouteRule};
use crate::pipeline::state::{
    Decision, HumanDecision, LifecycleStatus, RunState, StateUpdate, StepStatus, VerdictRecord,
};
use crate::pipeline::steps::{StepContext, StepRegistry};
use crate::store::{RunStore, RunSummary};

pub struct Orchestrator {
    registry: StepRegistry,
    rules: Vec<RouteRule>,
    content: Arc<dyn ContentSource>,
    judge: Option<JudgeAdvisor>,
    store: RunStore,
    events: Arc<EventHub>,
}

impl Orchestrator {
    pub fn new(
        registry: StepRegistry,
        rules: Vec<RouteRule>,
        content: Arc<dyn ContentSource>,
        judge: Option<JudgeAdvisor>,
        store: RunStore,
    ) -> Self {
        Self {
            registry,
            rules,
            content,
            judge,
            store,
            events: Arc::new(EventHub::new()),
        }
    }

    /// Accept a submission, persist the pending run, and spawn the
    /// pipeline task. Returns the run id immediately.
    pub async fn submit(
        self: &Arc<Self>,
        url: &str,
        requested_by: Option<String>,
    ) -> Result<String, PipelineError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(PipelineError::InvalidSubmission("URL is empty".to_string()));
        }
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(PipelineError::InvalidSubmission(format!(
                "URL must be http(s): {}",
                url
            )));
        }

        let run_id = uuid::Uuid::new_v4().to_string();
        let state = RunState::new(
            run_id.clone(),
            url.to_string(),
            requested_by.unwrap_or_else(|| "anonymous".to_string()),
        );

        self.store.save(&state).await.map_err(PipelineError::Store)?;
        self.events.register(&run_id);

        info!(run_id = %run_id, url = %url, "Accepted validation run");
        let orchestrator = self.clone();
        tokio::spawn(async move {
            orchestrator.run(state).await;
        });

        Ok(run_id)
    }

    /// Execute the pipeline up to the human gate, converting any fatal
    /// error into the failed terminal state.
    async fn run(self: Arc<Self>, mut state: RunState) {
        if let Err(e) = self.execute_until_gate(&mut state).await {
            self.fail_run(&mut state, e.to_string()).await;
        }
    }

    async fn execute_until_gate(&self, state: &mut RunState) -> Result<(), PipelineError> {
        // Fetch
        self.transition(state, LifecycleStatus::Fetching).await?;
        let snapshot = Arc::new(self.content.fetch(&state.url).await?);
        state.apply(StateUpdate {
            content: Some((*snapshot).clone()),
            ..Default::default()
        });

        // Route
        self.transition(state, LifecycleStatus::Routing).await?;
        let decision = route(&state.url, &self.rules);
        info!(
            run_id = %state.run_id,
            class = %decision.content_class,
            dispatch = ?decision.dispatch,
            "Routed run"
        );
        state.apply(StateUpdate {
            routing: Some(decision.clone()),
            ..Default::default()
        });

        // Parallel checks
        self.transition(state, LifecycleStatus::Checking).await?;
        self.run_checks(state, &decision.dispatch, snapshot).await?;

        // Aggregate
        self.transition(state, LifecycleStatus::Aggregating).await?;
        let agg = aggregate(&state.verdicts);
        state.apply(StateUpdate {
            overall_score: Some(agg.overall_score),
            overall_passed: Some(agg.overall_passed),
            ..Default::default()
        });

        if let Some(judge) = &self.judge {
            let recommendation = judge
                .recommend(
                    &state.url,
                    &state.verdicts,
                    agg.overall_score,
                    agg.overall_passed,
                )
                .await;
            state.apply(StateUpdate {
                judge: recommendation,
                ..Default::default()
            });
        }

        // Suspend at the human gate. Snapshot is persisted before the
        // event goes out, then the task simply ends.
        self.transition(state, LifecycleStatus::AwaitingDecision)
            .await?;
        self.events.emit(
            &state.run_id,
            RunEvent::AwaitingDecision {
                run_id: state.run_id.clone(),
                overall_score: agg.overall_score,
                overall_passed: agg.overall_passed,
                verdicts: state.verdicts.clone(),
            },
        );
        info!(run_id = %state.run_id, score = agg.overall_score, "Run suspended for review");
        Ok(())
    }

    /// Fan the dispatched checks out onto their own tasks and merge their
    /// updates back in arrival order. Every dispatched check ends up with
    /// a verdict and a status entry: a check that never reports gets a
    /// synthesized zero-score failure. After the join, check results are
    /// normalized to dispatch order so completion order is unobservable.
    async fn run_checks(
        &self,
        state: &mut RunState,
        dispatch: &[String],
        snapshot: Arc<crate::content::ContentSnapshot>,
    ) -> Result<(), PipelineError> {
        let (tx, mut rx) = mpsc::channel::<(String, StateUpdate)>(dispatch.len().max(1));

        for name in dispatch {
            let Some(step) = self.registry.get(name) else {
                warn!(run_id = %state.run_id, step = %name, "Routed check not in registry");
                let verdict = VerdictRecord::failed(
                    name,
                    format!("Check '{}' is not registered", name),
                );
                let mut update = StateUpdate::verdict(verdict.clone())
                    .with_error(format!("Check '{}' is not registered", name));
                update
                    .step_statuses
                    .insert(name.clone(), StepStatus::Failed);
                state.apply(update);
                self.events.emit(
                    &state.run_id,
                    RunEvent::StepComplete {
                        step: name.clone(),
                        verdict,
                    },
                );
                continue;
            };

            let ctx = StepContext {
                run_id: state.run_id.clone(),
                url: state.url.clone(),
            };
            let content = snapshot.clone();
            let name = name.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let update = step.execute(content, &ctx).await;
                let _ = tx.send((name, update)).await;
            });
        }
        drop(tx);

        while let Some((name, update)) = rx.recv().await {
            if state.step_statuses.contains_key(&name) {
                warn!(run_id = %state.run_id, step = %name, "Discarding duplicate check report");
                continue;
            }
            let verdict = update.verdicts.first().cloned();
            state.apply(update);
            self.store.save(state).await.map_err(PipelineError::Store)?;
            if let Some(verdict) = verdict {
                self.events.emit(
                    &state.run_id,
                    RunEvent::StepComplete {
                        step: name.clone(),
                        verdict,
                    },
                );
            }
        }

        // Checks whose task died without reporting still owe a record.
        for name in dispatch {
            if state.step_statuses.contains_key(name) {
                continue;
            }
            warn!(run_id = %state.run_id, step = %name, "Check never reported; recording failure");
            let verdict =
                VerdictRecord::failed(name, format!("Check '{}' did not report a verdict", name));
            let mut update = StateUpdate {
                verdicts: vec![verdict.clone()],
                ..Default::default()
            }
            .with_error(format!("Check '{}' did not report a verdict", name));
            update
                .step_statuses
                .insert(name.clone(), StepStatus::Failed);
            state.apply(update);
            self.events.emit(
                &state.run_id,
                RunEvent::StepComplete {
                    step: name.clone(),
                    verdict,
                },
            );
        }

        state.normalize_check_results(dispatch);
        self.store.save(state).await.map_err(PipelineError::Store)?;
        Ok(())
    }

    /// Resume a suspended run with a human decision. Validates against
    /// the stored snapshot, so this works across process restarts, and
    /// conflicts leave the stored state untouched.
    ///
    /// The write is a conditional update guarded on the stored status,
    /// so of two racing decisions exactly one is acknowledged; the loser
    /// gets the conflict error even though it also saw `awaiting_decision`
    /// when it loaded.
    pub async fn decide(
        &self,
        run_id: &str,
        decision: Decision,
        feedback: Option<String>,
        reviewer: Option<String>,
    ) -> Result<RunState, PipelineError> {
        let mut state = self
            .store
            .load(run_id)
            .await
            .map_err(PipelineError::Store)?
            .ok_or_else(|| PipelineError::RunNotFound {
                id: run_id.to_string(),
            })?;

        if state.status != LifecycleStatus::AwaitingDecision {
            return Err(PipelineError::DecisionConflict {
                id: run_id.to_string(),
                status: state.status.to_string(),
            });
        }

        let terminal = decision.terminal_status();
        state.apply(StateUpdate {
            decision: Some(HumanDecision {
                decision,
                feedback: feedback.unwrap_or_default(),
                reviewer: reviewer.unwrap_or_else(|| "anonymous".to_string()),
                decided_at: chrono::Utc::now().to_rfc3339(),
            }),
            status: Some(terminal),
            ..Default::default()
        });

        let resolved = self
            .store
            .save_resolution(&state)
            .await
            .map_err(PipelineError::Store)?;
        if !resolved {
            // Lost the race (or the run vanished): report whatever is
            // stored now.
            let status = self
                .store
                .load(run_id)
                .await
                .map_err(PipelineError::Store)?
                .map(|s| s.status.to_string())
                .ok_or_else(|| PipelineError::RunNotFound {
                    id: run_id.to_string(),
                })?;
            return Err(PipelineError::DecisionConflict {
                id: run_id.to_string(),
                status,
            });
        }

        info!(run_id = %run_id, status = %terminal, "Run resolved by reviewer");
        self.events
            .emit(run_id, RunEvent::Status { status: terminal });
        self.events
            .emit(run_id, RunEvent::Done { status: terminal });
        self.events.remove(run_id);

        Ok(state)
    }

    /// Advance the lifecycle, persist the snapshot, publish the status
    /// event. Every forward transition goes through here.
    async fn transition(
        &self,
        state: &mut RunState,
        status: LifecycleStatus,
    ) -> Result<(), PipelineError> {
        state.apply(StateUpdate::status(status));
        self.store.save(state).await.map_err(PipelineError::Store)?;
        self.events
            .emit(&state.run_id, RunEvent::Status { status });
        Ok(())
    }

    /// Terminal failure path: record the error, mark the run failed,
    /// persist best-effort, close the stream.
    async fn fail_run(&self, state: &mut RunState, message: String) {
        error!(run_id = %state.run_id, %message, "Run failed");
        state.apply(
            StateUpdate::status(LifecycleStatus::Failed).with_error(message.clone()),
        );
        if let Err(e) = self.store.save(state).await {
            error!(run_id = %state.run_id, error = %e, "Failed to persist failed run");
        }
        self.events
            .emit(&state.run_id, RunEvent::Error { message });
        self.events.emit(
            &state.run_id,
            RunEvent::Done {
                status: LifecycleStatus::Failed,
            },
        );
        self.events.remove(&state.run_id);
    }

    pub async fn get_state(&self, run_id: &str) -> Result<RunState, PipelineError> {
        self.store
            .load(run_id)
            .await
            .map_err(PipelineError::Store)?
            .ok_or_else(|| PipelineError::RunNotFound {
                id: run_id.to_string(),
            })
    }

    pub async fn list_recent(&self, limit: usize) -> Result<Vec<RunSummary>, PipelineError> {
        self.store
            .list_recent(limit)
            .await
            .map_err(PipelineError::Store)
    }

    /// Live event stream for a run; `None` once the run has finished.
    pub fn subscribe(&self, run_id: &str) -> Option<broadcast::Receiver<RunEvent>> {
        self.events.subscribe(run_id)
    }
}
