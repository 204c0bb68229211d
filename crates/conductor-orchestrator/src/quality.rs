use serde_json::Value;

/// Task-specific quality of a competitive result, in [0, 1].
pub trait QualityScorer: Send + Sync {
    /// Score one result for the given task.
    fn score(&self, description: &str, result: &Value) -> f64;
}

/// Default quality heuristic.
///
/// An object result carrying a numeric `quality` field is trusted (clamped to
/// [0, 1]). Otherwise richness decides: empty results score 0, longer payloads
/// score higher on a log scale, and structured objects get a small bonus.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicQuality;

impl QualityScorer for HeuristicQuality {
    fn score(&self, _description: &str, result: &Value) -> f64 {
        if let Some(q) = result.get("quality").and_then(Value::as_f64) {
            return if q.is_finite() { q.clamp(0.0, 1.0) } else { 0.0 };
        }
        let text = match result {
            Value::Null => return 0.0,
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let len = text.trim().len();
        if len == 0 {
            return 0.0;
        }
        // ~1.0 at 10k characters.
        let richness = ((len as f64).ln_1p() / 10_000f64.ln_1p()).min(1.0) * 0.8;
        let structure = if result.is_object() { 0.2 } else { 0.0 };
        (richness + structure).min(1.0)
    }
}

/// Confidence in the best of several competitive results.
///
/// `0.5 + 0.5 × (best − second) / best`: 1.0 for a single result, 0.5 when
/// the best result scored zero.
pub fn selection_confidence(scores: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = scores.iter().copied().filter(|s| s.is_finite()).collect();
    sorted.sort_by(|a, b| b.total_cmp(a));
    match sorted.as_slice() {
        [] => 0.0,
        [_] => 1.0,
        [best, second, ..] if *best > 0.0 => (0.5 + 0.5 * (best - second) / best).clamp(0.5, 1.0),
        _ => 0.5,
    }
}
