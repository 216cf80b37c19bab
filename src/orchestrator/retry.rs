//! Exponential backoff with optional jitter, generalized from the
//! circuit breaker's failure-window bookkeeping to a per-task retry verdict.

use rand::Rng;

use crate::config::RetryConfig;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq)]
pub enum RetryVerdict {
    /// Retry after this many milliseconds.
    RetryAfter(u64),
    /// `maxRetries` exhausted; the caller should escalate.
    Exhausted,
}

pub struct RetryHandler {
    config: RetryConfig,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// `delay_n = min(maxBackoffMs, initialBackoffMs * multiplier^(n-1))`,
    /// multiplied by a uniform `[0.5, 1.0)` jitter factor when enabled.
    /// `attempt` is 1-indexed: the first retry after an initial failure is `1`.
    pub fn next_delay_ms(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1) as i32;
        let raw = self.config.initial_backoff_ms as f64 * self.config.multiplier.powi(exponent);
        let capped = raw.min(self.config.max_backoff_ms as f64);

        let delay = if self.config.jitter {
            let factor = rand::thread_rng().gen_range(0.5..1.0);
            capped * factor
        } else {
            capped
        };

        delay.round() as u64
    }

    pub fn evaluate(&self, attempt: u32) -> RetryVerdict {
        if attempt >= self.config.max_retries {
            RetryVerdict::Exhausted
        } else {
            RetryVerdict::RetryAfter(self.next_delay_ms(attempt + 1))
        }
    }

    pub fn exhausted_error(&self, task_id: &str, attempts: u32, last_error: &str) -> OrchestratorError {
        OrchestratorError::RetriesExhausted {
            task_id: task_id.to_string(),
            attempts,
            last_error: last_error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            max_retries: 3,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            multiplier: 2.0,
            jitter: false,
        }
    }

    #[test]
    fn backoff_grows_geometrically_without_jitter() {
        let handler = RetryHandler::new(config());
        assert_eq!(handler.next_delay_ms(1), 100);
        assert_eq!(handler.next_delay_ms(2), 200);
        assert_eq!(handler.next_delay_ms(3), 400);
    }

    #[test]
    fn backoff_is_capped_at_max_backoff_ms() {
        let handler = RetryHandler::new(config());
        assert_eq!(handler.next_delay_ms(10), 1000);
    }

    #[test]
    fn jitter_stays_within_half_to_full_range() {
        let mut cfg = config();
        cfg.jitter = true;
        let handler = RetryHandler::new(cfg);
        for _ in 0..50 {
            let delay = handler.next_delay_ms(2);
            assert!(delay >= 100 && delay <= 200);
        }
    }

    #[test]
    fn evaluate_exhausts_after_max_retries() {
        let handler = RetryHandler::new(config());
        assert_eq!(handler.evaluate(0), RetryVerdict::RetryAfter(100));
        assert_eq!(handler.evaluate(2), RetryVerdict::RetryAfter(400));
        assert_eq!(handler.evaluate(3), RetryVerdict::Exhausted);
    }
}
