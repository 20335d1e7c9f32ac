//! The check seam: the trait every parallel check implements and the
//! registry the router's dispatch names resolve against.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::checks::{CheckKind, Evaluator, LlmCheck};
use crate::checks::empty_tag::EmptyTagCheck;
use crate::content::ContentSnapshot;
use crate::pipeline::state::StateUpdate;

/// Read-only context handed to a check alongside the content snapshot.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: String,
    pub url: String,
}

/// One parallel check. `execute` is total: implementations convert their
/// internal failures into a zero-score failed verdict plus an error entry
/// in the returned update, so one broken check never aborts its siblings.
#[async_trait]
pub trait CheckStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn execute(&self, content: Arc<ContentSnapshot>, ctx: &StepContext) -> StateUpdate;
}

/// Name-to-implementation table. Routing produces names; dispatch resolves
/// them here. A routed name missing from the registry is a routing bug and
/// surfaces as a synthesized failed verdict at fan-in.
pub struct StepRegistry {
    steps: HashMap<&'static str, Arc<dyn CheckStep>>,
}

impl StepRegistry {
    pub fn new() -> Self {
        Self {
            steps: HashMap::new(),
        }
    }

    /// The full production catalog: four evaluator-backed checks plus the
    /// deterministic markup-hygiene check.
    pub fn standard(evaluator: Arc<dyn Evaluator>) -> Self {
        let mut registry = Self::new();
        for kind in [
            CheckKind::Metadata,
            CheckKind::Editorial,
            CheckKind::Compliance,
            CheckKind::Accuracy,
        ] {
            registry.insert(Arc::new(LlmCheck::new(kind, evaluator.clone())));
        }
        registry.insert(Arc::new(EmptyTagCheck));
        registry
    }

    pub fn insert(&mut self, step: Arc<dyn CheckStep>) {
        self.steps.insert(step.name(), step);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn CheckStep>> {
        self.steps.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::new()
    }
}
