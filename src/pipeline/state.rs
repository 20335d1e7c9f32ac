//! Shared run state and the per-field merge strategies that make parallel
//! check execution safe.
//!
//! Every field of [`RunState`] has exactly one declared merge strategy,
//! applied by [`RunState::apply`]:
//!
//! | field           | strategy                         |
//! |-----------------|----------------------------------|
//! | `content`       | last-writer-wins (set once)      |
//! | `routing`       | last-writer-wins (set once)      |
//! | `verdicts`      | append/union                     |
//! | `step_statuses` | key-wise union                   |
//! | `overall_score` | last-writer-wins                 |
//! | `overall_passed`| last-writer-wins                 |
//! | `status`        | last-writer-wins, monotonic      |
//! | `decision`      | last-writer-wins (resume only)   |
//! | `judge`         | last-writer-wins                 |
//! | `errors`        | append/union                     |
//!
//! Append and key-wise union are associative and commutative, so updates
//! from concurrently completing checks can be folded in any arrival order
//! without losing or duplicating results. Without the key-wise union on
//! `step_statuses`, parallel branches would overwrite each other's entries.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::content::ContentSnapshot;

// ── Verdicts ─────────────────────────────────────────────────────────

/// Outcome of a single check. Immutable once produced; exactly one per
/// dispatched check per run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerdictRecord {
    /// Name of the check that issued this verdict.
    pub step: String,
    pub passed: bool,
    /// Score in [0.0, 1.0].
    pub score: f64,
    #[serde(default)]
    pub observations: Vec<String>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

impl VerdictRecord {
    /// Zero-score failed verdict, used when a check errors internally
    /// instead of letting the failure abort sibling checks.
    pub fn failed(step: &str, issue: impl Into<String>) -> Self {
        Self {
            step: step.to_string(),
            passed: false,
            score: 0.0,
            observations: Vec::new(),
            issues: vec![issue.into()],
            recommendations: Vec::new(),
        }
    }
}

// ── Lifecycle ────────────────────────────────────────────────────────

/// Run lifecycle states. Transitions are monotonic: forward only, with
/// `Failed` reachable from any non-terminal state. Only the orchestrator
/// writes this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStatus {
    Pending,
    Fetching,
    Routing,
    Checking,
    Aggregating,
    AwaitingDecision,
    Approved,
    Rejected,
    Failed,
}

impl LifecycleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Fetching => "fetching",
            Self::Routing => "routing",
            Self::Checking => "checking",
            Self::Aggregating => "aggregating",
            Self::AwaitingDecision => "awaiting_decision",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Fetching => 1,
            Self::Routing => 2,
            Self::Checking => 3,
            Self::Aggregating => 4,
            Self::AwaitingDecision => 5,
            Self::Approved | Self::Rejected => 6,
            Self::Failed => 7,
        }
    }

    /// Monotonic merge: a terminal state never regresses, and an incoming
    /// state is only accepted when it advances the machine (or is `Failed`,
    /// which is reachable from any non-terminal state).
    pub fn merge(self, incoming: LifecycleStatus) -> LifecycleStatus {
        if self.is_terminal() {
            self
        } else if incoming == Self::Failed || incoming.rank() > self.rank() {
            incoming
        } else {
            self
        }
    }
}

impl std::fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "fetching" => Ok(Self::Fetching),
            "routing" => Ok(Self::Routing),
            "checking" => Ok(Self::Checking),
            "aggregating" => Ok(Self::Aggregating),
            "awaiting_decision" => Ok(Self::AwaitingDecision),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid lifecycle status: {}", s)),
        }
    }
}

/// Per-step completion marker. `Done` means the check reported a verdict;
/// `Failed` means the merger synthesized one because the check never
/// reported. Both count toward the fan-in join condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Done,
    Failed,
}

// ── Routing / decision / judge records ───────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedStep {
    pub step: String,
    pub reason: String,
}

/// Output of the router: which checks to dispatch and which to skip,
/// with a human-readable reason per skipped check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingDecision {
    /// Classification the routing was derived from (e.g. "hil", "standard").
    pub content_class: String,
    pub dispatch: Vec<String>,
    pub skipped: Vec<SkippedStep>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Approve,
    Reject,
}

impl Decision {
    pub fn terminal_status(&self) -> LifecycleStatus {
        match self {
            Self::Approve => LifecycleStatus::Approved,
            Self::Reject => LifecycleStatus::Rejected,
        }
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(Self::Approve),
            "reject" => Ok(Self::Reject),
            _ => Err(format!("Invalid decision: {}", s)),
        }
    }
}

/// Human review outcome folded into the run on resume.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanDecision {
    pub decision: Decision,
    #[serde(default)]
    pub feedback: String,
    pub reviewer: String,
    pub decided_at: String,
}

/// Advisory synthesis of all verdicts, produced before the human gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeRecommendation {
    pub recommendation: String,
    pub confidence: String,
    #[serde(default)]
    pub key_concerns: Vec<String>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub rationale: String,
}

// ── Run state ────────────────────────────────────────────────────────

/// Complete state of one validation run. Owned exclusively by the
/// orchestrating task; concurrent checks receive read snapshots and
/// return [`StateUpdate`]s that are merged back through [`apply`].
///
/// [`apply`]: RunState::apply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunState {
    pub run_id: String,
    pub url: String,
    pub requested_by: String,
    pub created_at: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<ContentSnapshot>,
    #[serde(default)]
    pub routing: Option<RoutingDecision>,
    #[serde(default)]
    pub verdicts: Vec<VerdictRecord>,
    #[serde(default)]
    pub step_statuses: BTreeMap<String, StepStatus>,
    #[serde(default)]
    pub overall_score: Option<f64>,
    #[serde(default)]
    pub overall_passed: Option<bool>,
    pub status: LifecycleStatus,
    #[serde(default)]
    pub decision: Option<HumanDecision>,
    #[serde(default)]
    pub judge: Option<JudgeRecommendation>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl RunState {
    pub fn new(run_id: String, url: String, requested_by: String) -> Self {
        Self {
            run_id,
            url,
            requested_by,
            created_at: chrono::Utc::now().to_rfc3339(),
            content: None,
            routing: None,
            verdicts: Vec::new(),
            step_statuses: BTreeMap::new(),
            overall_score: None,
            overall_passed: None,
            status: LifecycleStatus::Pending,
            decision: None,
            judge: None,
            errors: Vec::new(),
        }
    }

    /// Merge a partial update into this state using the per-field
    /// strategies documented at module level.
    pub fn apply(&mut self, update: StateUpdate) {
        merge::last_writer_wins(&mut self.content, update.content);
        merge::last_writer_wins(&mut self.routing, update.routing);
        merge::append(&mut self.verdicts, update.verdicts);
        merge::union_keys(&mut self.step_statuses, update.step_statuses);
        merge::last_writer_wins(&mut self.overall_score, update.overall_score);
        merge::last_writer_wins(&mut self.overall_passed, update.overall_passed);
        if let Some(status) = update.status {
            self.status = self.status.merge(status);
        }
        merge::last_writer_wins(&mut self.decision, update.decision);
        merge::last_writer_wins(&mut self.judge, update.judge);
        merge::append(&mut self.errors, update.errors);
    }

    /// Canonicalize check results after the fan-in join: verdicts and
    /// check errors are reordered to match dispatch order, so the merged
    /// state is identical for every permutation of completion order.
    pub fn normalize_check_results(&mut self, dispatch: &[String]) {
        let position = |step: &str| {
            dispatch
                .iter()
                .position(|name| name == step)
                .unwrap_or(dispatch.len())
        };
        self.verdicts.sort_by_key(|v| position(&v.step));
        self.errors.sort();
    }
}

/// Partial update produced by one pipeline step. Absent fields leave the
/// corresponding state field untouched.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub content: Option<ContentSnapshot>,
    pub routing: Option<RoutingDecision>,
    pub verdicts: Vec<VerdictRecord>,
    pub step_statuses: BTreeMap<String, StepStatus>,
    pub overall_score: Option<f64>,
    pub overall_passed: Option<bool>,
    pub status: Option<LifecycleStatus>,
    pub decision: Option<HumanDecision>,
    pub judge: Option<JudgeRecommendation>,
    pub errors: Vec<String>,
}

impl StateUpdate {
    pub fn status(status: LifecycleStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Update carrying one check's verdict plus its own status entry.
    pub fn verdict(verdict: VerdictRecord) -> Self {
        let mut step_statuses = BTreeMap::new();
        step_statuses.insert(verdict.step.clone(), StepStatus::Done);
        Self {
            verdicts: vec![verdict],
            step_statuses,
            ..Default::default()
        }
    }

    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.errors.push(message.into());
        self
    }
}

// ── Field reducers ───────────────────────────────────────────────────

/// The merge-strategy registry. Each reducer is associative; `append` and
/// `union_keys` are also commutative, which is what makes fan-in order
/// irrelevant.
mod merge {
    use std::collections::BTreeMap;

    pub fn last_writer_wins<T>(current: &mut Option<T>, incoming: Option<T>) {
        if incoming.is_some() {
            *current = incoming;
        }
    }

    pub fn append<T>(current: &mut Vec<T>, mut incoming: Vec<T>) {
        current.append(&mut incoming);
    }

    pub fn union_keys<K: Ord, V>(current: &mut BTreeMap<K, V>, incoming: BTreeMap<K, V>) {
        current.extend(incoming);
    }
}
