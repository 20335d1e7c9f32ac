//! End-to-end pipeline tests: real checks and HTTP API over a stubbed
//! evaluator and content source.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::json;
use tower::ServiceExt;

use verity::checks::judge::JudgeAdvisor;
use verity::checks::Evaluator;
use verity::content::{ContentSnapshot, ContentSource};
use verity::errors::PipelineError;
use verity::pipeline::events::RunEvent;
use verity::pipeline::orchestrator::Orchestrator;
use verity::pipeline::router::default_rules;
use verity::pipeline::state::LifecycleStatus;
use verity::pipeline::steps::StepRegistry;
use verity::server::build_router;
use verity::store::RunStore;

const PAGE: &str = r#"
<html><head>
<title>Healthy sleep habits for adults</title>
<meta name="description" content="Practical, evidence-based guidance for building healthy sleep habits.">
<link rel="canonical" href="https://example.org/healthy-lifestyle/sleep">
<meta property="og:title" content="Healthy sleep habits">
<meta property="og:type" content="article">
</head><body>
<h1>Healthy sleep habits</h1>
<h2>Why sleep matters</h2>
<p>Most adults need seven or more hours of sleep. Last reviewed: March 2, 2026.</p>
</body></html>
"#;

struct StubSource;

#[async_trait]
impl ContentSource for StubSource {
    async fn fetch(&self, url: &str) -> Result<ContentSnapshot, PipelineError> {
        Ok(verity::content::extract_snapshot(url, PAGE))
    }
}

/// Canned evaluator: passing verdicts for the checks, an approve
/// recommendation for the judge, and an optional hard failure for one
/// named check.
struct StubEvaluator {
    fail_check_containing: Option<&'static str>,
}

#[async_trait]
impl Evaluator for StubEvaluator {
    async fn evaluate(
        &self,
        system_prompt: &str,
        _user_prompt: &str,
    ) -> anyhow::Result<serde_json::Value> {
        if let Some(marker) = self.fail_check_containing {
            if system_prompt.contains(marker) {
                anyhow::bail!("evaluator exploded");
            }
        }
        if system_prompt.contains("recommendation") {
            return Ok(json!({
                "recommendation": "approve",
                "confidence": "high",
                "key_concerns": [],
                "strengths": ["well structured"],
                "rationale": "All checks passed."
            }));
        }
        Ok(json!({
            "passed": true,
            "score": 0.9,
            "observations": ["looks solid"],
            "issues": [],
            "recommendations": []
        }))
    }
}

fn build_orchestrator(
    fail_check_containing: Option<&'static str>,
    with_judge: bool,
) -> Arc<Orchestrator> {
    let evaluator = Arc::new(StubEvaluator {
        fail_check_containing,
    });
    let judge = with_judge.then(|| JudgeAdvisor::new(evaluator.clone()));
    Arc::new(Orchestrator::new(
        StepRegistry::standard(evaluator),
        default_rules(&["healthy-lifestyle".to_string()]),
        Arc::new(StubSource),
        judge,
        RunStore::in_memory().unwrap(),
    ))
}

async fn wait_for_status(orch: &Arc<Orchestrator>, run_id: &str, status: LifecycleStatus) {
    for _ in 0..300 {
        if let Ok(state) = orch.get_state(run_id).await {
            if state.status == status {
                return;
            }
            assert!(
                state.status != LifecycleStatus::Failed || status == LifecycleStatus::Failed,
                "run failed unexpectedly: {:?}",
                state.errors
            );
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("run {} never reached {}", run_id, status);
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn full_approval_flow() {
    let orch = build_orchestrator(None, true);
    let router = build_router(orch.clone());

    let run_id = orch
        .submit(
            "https://example.org/healthy-lifestyle/sleep",
            Some("editor".to_string()),
        )
        .await
        .unwrap();
    // Subscribe before yielding so no event is missed.
    let mut rx = orch.subscribe(&run_id).unwrap();
    wait_for_status(&orch, &run_id, LifecycleStatus::AwaitingDecision).await;

    let state = orch.get_state(&run_id).await.unwrap();
    // Lifestyle URL: four standard checks plus empty_tag.
    assert_eq!(state.verdicts.len(), 5);
    assert_eq!(state.overall_passed, Some(true));
    let judge = state.judge.unwrap();
    assert_eq!(judge.recommendation, "approve");

    let response = router
        .clone()
        .oneshot(
            Request::post(format!("/api/validate/{}/decide", run_id))
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"decision": "approve", "feedback": "ship it", "reviewer": "editor-1"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let mut statuses = Vec::new();
    let mut step_completes = Vec::new();
    let mut awaiting = 0;
    let mut done = Vec::new();
    let mut total = 0;
    while let Ok(event) = rx.try_recv() {
        total += 1;
        match event {
            RunEvent::Status { status } => statuses.push(status),
            RunEvent::StepComplete { step, .. } => step_completes.push(step),
            RunEvent::AwaitingDecision { overall_passed, .. } => {
                assert!(overall_passed);
                awaiting += 1;
            }
            RunEvent::Done { status } => {
                done.push((total, status));
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    // Status events arrive in lifecycle order.
    let expected_prefix = [
        LifecycleStatus::Fetching,
        LifecycleStatus::Routing,
        LifecycleStatus::Checking,
        LifecycleStatus::Aggregating,
        LifecycleStatus::AwaitingDecision,
        LifecycleStatus::Approved,
    ];
    assert_eq!(statuses, expected_prefix);

    let mut sorted = step_completes.clone();
    sorted.sort();
    sorted.dedup();
    assert_eq!(step_completes.len(), 5);
    assert_eq!(sorted.len(), 5, "duplicate step_complete events");

    assert_eq!(awaiting, 1);
    assert_eq!(done, vec![(total, LifecycleStatus::Approved)]);

    let state = orch.get_state(&run_id).await.unwrap();
    assert_eq!(state.status, LifecycleStatus::Approved);
    assert_eq!(state.decision.unwrap().feedback, "ship it");
}

#[tokio::test]
async fn failing_evaluator_does_not_abort_the_run() {
    let orch = build_orchestrator(Some("compliance reviewer"), false);
    let run_id = orch
        .submit("https://example.org/diseases/flu", Some("qa".to_string()))
        .await
        .unwrap();

    wait_for_status(&orch, &run_id, LifecycleStatus::AwaitingDecision).await;
    let state = orch.get_state(&run_id).await.unwrap();

    assert_eq!(state.verdicts.len(), 4);
    let compliance = state
        .verdicts
        .iter()
        .find(|v| v.step == "compliance")
        .unwrap();
    assert!(!compliance.passed);
    assert_eq!(compliance.score, 0.0);
    assert!(compliance.issues.iter().any(|i| i.contains("exploded")));

    // Siblings are untouched and the run still reached the gate.
    for step in ["metadata", "editorial", "accuracy"] {
        let v = state.verdicts.iter().find(|v| v.step == step).unwrap();
        assert!(v.passed, "{} should still pass", step);
    }
    assert_eq!(state.overall_passed, Some(false));
}

#[tokio::test]
async fn rejection_flow_records_decision() {
    let orch = build_orchestrator(None, false);
    let run_id = orch
        .submit("https://example.org/diseases/flu", None)
        .await
        .unwrap();
    wait_for_status(&orch, &run_id, LifecycleStatus::AwaitingDecision).await;

    let router = build_router(orch.clone());
    let response = router
        .oneshot(
            Request::post(format!("/api/validate/{}/decide", run_id))
                .header("content-type", "application/json")
                .body(Body::from(
                    r#"{"decision": "reject", "feedback": "outdated claims"}"#,
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "rejected");

    let state = orch.get_state(&run_id).await.unwrap();
    assert_eq!(state.status, LifecycleStatus::Rejected);
    assert_eq!(state.decision.unwrap().feedback, "outdated claims");
}

#[tokio::test]
async fn suspended_run_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("verity.db");

    let run_id = {
        let evaluator = Arc::new(StubEvaluator {
            fail_check_containing: None,
        });
        let orch = Arc::new(Orchestrator::new(
            StepRegistry::standard(evaluator),
            default_rules(&[]),
            Arc::new(StubSource),
            None,
            RunStore::open(&path).unwrap(),
        ));
        let run_id = orch
            .submit("https://example.org/diseases/flu", None)
            .await
            .unwrap();
        wait_for_status(&orch, &run_id, LifecycleStatus::AwaitingDecision).await;
        run_id
    };

    // Everything in-memory is gone; only the store remains.
    let evaluator = Arc::new(StubEvaluator {
        fail_check_containing: None,
    });
    let orch = Arc::new(Orchestrator::new(
        StepRegistry::standard(evaluator),
        default_rules(&[]),
        Arc::new(StubSource),
        None,
        RunStore::open(&path).unwrap(),
    ));

    let state = orch.get_state(&run_id).await.unwrap();
    assert_eq!(state.status, LifecycleStatus::AwaitingDecision);
    assert_eq!(state.verdicts.len(), 4);

    let resolved = orch
        .decide(
            &run_id,
            verity::pipeline::state::Decision::Approve,
            None,
            Some("editor-2".to_string()),
        )
        .await
        .unwrap();
    assert_eq!(resolved.status, LifecycleStatus::Approved);
}
