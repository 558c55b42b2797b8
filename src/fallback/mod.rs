//! Account Fallback Policy (spec §4.5): classifies an upstream outcome into
//! retry / try-next-account / fatal categories with a cooldown duration.
//! Generalized from the teacher's `ai/providers/reliable.rs::ReliableProvider`
//! retry-then-fallback shape — same idea (classify, then either retry in
//! place or hand off to the next candidate), but driven by the exact status
//! code table spec §4.5 lists rather than a generic retryable-error guess.

pub mod combo;

const RATE_LIMIT_BASE_MS: u64 = 1;
const RATE_LIMIT_CAP_MS: u64 = 120_000;
const AUTH_FAILURE_COOLDOWN_MS: u64 = 30 * 60_000;
const QUOTA_EXHAUSTED_COOLDOWN_MS: u64 = 24 * 60 * 60_000;
const UPSTREAM_ERROR_COOLDOWN_MS: u64 = 60_000;
const NETWORK_ERROR_COOLDOWN_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    RateLimited,
    AuthFailed,
    QuotaExhausted,
    UpstreamServerError,
    ClientDisconnected,
    NetworkError,
    /// 4xx other than 429/401/402/403/451 — fatal for this request, no
    /// fallback attempted.
    OtherClientError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Classification {
    pub should_fallback: bool,
    pub cooldown_ms: u64,
    pub category: ErrorCategory,
}

/// What happened on one upstream attempt, as seen by the classifier. A
/// `status` of `None` with `network_error = true` means the call never got
/// an HTTP response at all (connection refused, DNS failure, TLS error,
/// timeout).
pub struct Outcome {
    pub status: Option<u16>,
    pub retry_after_ms: Option<u64>,
    pub consecutive_failures: u32,
    /// Set once a 401/403 has already survived a refresh-and-retry attempt
    /// (spec §4.5: "401/403 *after one failed refresh*").
    pub refresh_already_attempted: bool,
    pub network_error: bool,
    pub client_disconnected: bool,
}

pub fn classify(outcome: &Outcome) -> Classification {
    if outcome.client_disconnected {
        return Classification {
            should_fallback: true,
            cooldown_ms: NETWORK_ERROR_COOLDOWN_MS,
            category: ErrorCategory::ClientDisconnected,
        };
    }
    let Some(status) = outcome.status else {
        return Classification {
            should_fallback: true,
            cooldown_ms: NETWORK_ERROR_COOLDOWN_MS,
            category: ErrorCategory::NetworkError,
        };
    };
    if outcome.network_error {
        return Classification {
            should_fallback: true,
            cooldown_ms: NETWORK_ERROR_COOLDOWN_MS,
            category: ErrorCategory::NetworkError,
        };
    }

    match status {
        429 => Classification {
            should_fallback: true,
            cooldown_ms: outcome.retry_after_ms.unwrap_or_else(|| exponential_backoff_ms(outcome.consecutive_failures)),
            category: ErrorCategory::RateLimited,
        },
        401 | 403 => {
            if outcome.refresh_already_attempted {
                Classification {
                    should_fallback: true,
                    cooldown_ms: AUTH_FAILURE_COOLDOWN_MS,
                    category: ErrorCategory::AuthFailed,
                }
            } else {
                // Not yet classified as terminal: the chat core retries the
                // refresh-and-re-execute path before this ever reaches the
                // fallback policy a second time.
                Classification {
                    should_fallback: false,
                    cooldown_ms: 0,
                    category: ErrorCategory::AuthFailed,
                }
            }
        }
        402 | 451 => Classification {
            should_fallback: true,
            cooldown_ms: QUOTA_EXHAUSTED_COOLDOWN_MS,
            category: ErrorCategory::QuotaExhausted,
        },
        s if (500..600).contains(&s) => Classification {
            should_fallback: true,
            cooldown_ms: UPSTREAM_ERROR_COOLDOWN_MS,
            category: ErrorCategory::UpstreamServerError,
        },
        _ => Classification {
            should_fallback: false,
            cooldown_ms: 0,
            category: ErrorCategory::OtherClientError,
        },
    }
}

fn exponential_backoff_ms(consecutive_failures: u32) -> u64 {
    let pow = RATE_LIMIT_BASE_MS.saturating_mul(1u64 << consecutive_failures.min(32));
    pow.min(RATE_LIMIT_CAP_MS)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Outcome {
        Outcome {
            status: None,
            retry_after_ms: None,
            consecutive_failures: 0,
            refresh_already_attempted: false,
            network_error: false,
            client_disconnected: false,
        }
    }

    #[test]
    fn rate_limit_honors_retry_after_header() {
        let outcome = Outcome {
            status: Some(429),
            retry_after_ms: Some(5_000),
            ..base()
        };
        let c = classify(&outcome);
        assert!(c.should_fallback);
        assert_eq!(c.cooldown_ms, 5_000);
    }

    #[test]
    fn rate_limit_without_header_uses_capped_exponential_backoff() {
        let outcome = Outcome {
            status: Some(429),
            consecutive_failures: 40,
            ..base()
        };
        assert_eq!(classify(&outcome).cooldown_ms, RATE_LIMIT_CAP_MS);
    }

    #[test]
    fn auth_failure_before_refresh_retry_does_not_fallback_yet() {
        let outcome = Outcome {
            status: Some(401),
            ..base()
        };
        let c = classify(&outcome);
        assert!(!c.should_fallback);
    }

    #[test]
    fn auth_failure_after_refresh_retry_falls_back_for_thirty_minutes() {
        let outcome = Outcome {
            status: Some(403),
            refresh_already_attempted: true,
            ..base()
        };
        let c = classify(&outcome);
        assert!(c.should_fallback);
        assert_eq!(c.cooldown_ms, AUTH_FAILURE_COOLDOWN_MS);
    }

    #[test]
    fn quota_exhausted_cools_down_for_a_day() {
        for status in [402, 451] {
            let outcome = Outcome { status: Some(status), ..base() };
            let c = classify(&outcome);
            assert_eq!(c.category, ErrorCategory::QuotaExhausted);
            assert_eq!(c.cooldown_ms, QUOTA_EXHAUSTED_COOLDOWN_MS);
        }
    }

    #[test]
    fn server_error_cools_down_for_a_minute() {
        let outcome = Outcome { status: Some(503), ..base() };
        let c = classify(&outcome);
        assert_eq!(c.cooldown_ms, UPSTREAM_ERROR_COOLDOWN_MS);
        assert!(c.should_fallback);
    }

    #[test]
    fn other_four_xx_is_fatal_not_fallback() {
        let outcome = Outcome { status: Some(400), ..base() };
        let c = classify(&outcome);
        assert!(!c.should_fallback);
        assert_eq!(c.category, ErrorCategory::OtherClientError);
    }

    #[test]
    fn network_error_falls_back_after_ten_seconds() {
        let outcome = Outcome {
            network_error: true,
            ..base()
        };
        let c = classify(&outcome);
        assert!(c.should_fallback);
        assert_eq!(c.cooldown_ms, NETWORK_ERROR_COOLDOWN_MS);
    }

    #[test]
    fn client_disconnect_is_classified_distinctly_from_network_error() {
        let outcome = Outcome {
            client_disconnected: true,
            ..base()
        };
        let c = classify(&outcome);
        assert_eq!(c.category, ErrorCategory::ClientDisconnected);
    }
}
