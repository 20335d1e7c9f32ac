//! Verdict aggregation: collapses per-check verdicts into one overall
//! score and pass/fail conjunction.

use crate::pipeline::state::VerdictRecord;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aggregate {
    pub overall_score: f64,
    pub overall_passed: bool,
}

/// Total over any input. An empty slice aggregates to score 0.0 and
/// passed false rather than an error, so a run with no dispatched checks
/// still reaches the human gate with a defined result.
pub fn aggregate(verdicts: &[VerdictRecord]) -> Aggregate {
    if verdicts.is_empty() {
        return Aggregate {
            overall_score: 0.0,
            overall_passed: false,
        };
    }

    let sum: f64 = verdicts.iter().map(|v| v.score).sum();
    let mean = sum / verdicts.len() as f64;

    Aggregate {
        overall_score: round3(mean),
        overall_passed: verdicts.iter().all(|v| v.passed),
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}
