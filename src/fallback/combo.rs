//! Combo Orchestrator (spec §4.6): walks an ordered model list, retrying the
//! next model on a retryable error and surfacing anything else immediately.

use std::future::Future;

use crate::error::{GatewayError, Result};

/// What one model's full per-account attempt loop (all its accounts
/// exhausted) produced.
pub enum ComboAttempt<T> {
    Success(T),
    /// Every account for this model failed with a retryable error; move on
    /// to the next model in the combo.
    Retryable(GatewayError),
    /// A fatal, non-retryable error — surfaced immediately without trying
    /// the remaining models.
    Fatal(GatewayError),
}

/// Runs `attempt` once per model in `models`, in order, stopping at the
/// first success or fatal error. If every model is exhausted, the last
/// retryable error is re-surfaced as [`GatewayError::ComboExhausted`].
pub async fn run<T, F, Fut>(models: &[String], mut attempt: F) -> Result<T>
where
    F: FnMut(&str) -> Fut,
    Fut: Future<Output = ComboAttempt<T>>,
{
    let mut last_error: Option<GatewayError> = None;
    for model in models {
        match attempt(model).await {
            ComboAttempt::Success(value) => return Ok(value),
            ComboAttempt::Retryable(err) => last_error = Some(err),
            ComboAttempt::Fatal(err) => return Err(err),
        }
    }
    Err(GatewayError::ComboExhausted(
        last_error.map(|e| e.to_string()).unwrap_or_else(|| "no models in combo".to_string()),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stops_at_first_success() {
        let models = vec!["a".to_string(), "b".to_string()];
        let mut calls = Vec::new();
        let result = run(&models, |model| {
            calls.push(model.to_string());
            async move {
                if model == "a" {
                    ComboAttempt::Retryable(GatewayError::RateLimited("429".to_string()))
                } else {
                    ComboAttempt::Success(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn fatal_error_stops_without_trying_remaining_models() {
        let models = vec!["a".to_string(), "b".to_string()];
        let mut calls = Vec::new();
        let result: Result<()> = run(&models, |model| {
            calls.push(model.to_string());
            async move { ComboAttempt::Fatal(GatewayError::MissingModel) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls, vec!["a"]);
    }

    #[tokio::test]
    async fn exhausting_every_model_surfaces_combo_exhausted() {
        let models = vec!["a".to_string()];
        let result: Result<()> = run(&models, |_| async { ComboAttempt::Retryable(GatewayError::Upstream("503".to_string())) }).await;
        assert!(matches!(result, Err(GatewayError::ComboExhausted(_))));
    }
}
