use std::time::Duration;

/// Which connection sequence a retry attempt belongs to.
///
/// Initial connections back off aggressively because the user is actively
/// waiting for the session to come up. Mid-stream reconnects stay fast-only:
/// a live conversation cannot absorb a multi-second gap, so we give up
/// quickly instead of stalling audio indefinitely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectContext {
    /// First connection for a new session.
    Initial,
    /// Re-establishing a handle after a mid-stream drop.
    Midstream,
}

/// Coarse classification of an upstream failure, used to pick a delay table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Provider returned a rate-limit response.
    RateLimited,
    /// Provider reported itself unavailable.
    ServiceUnavailable,
    /// Generic provider-side server error.
    Server,
    /// Transport-level failure or timeout.
    Network,
    /// No classification available; fall back to the context default.
    Unclassified,
}

// Delay tables in milliseconds, indexed by attempt. Table length is the
// attempt cap for that schedule.
const INITIAL_DELAYS_MS: &[u64] = &[0, 100, 1_000, 3_000, 5_000];
const MIDSTREAM_DELAYS_MS: &[u64] = &[0, 100, 500];
const RATE_LIMITED_DELAYS_MS: &[u64] = &[5_000, 10_000, 20_000];
const UNAVAILABLE_DELAYS_MS: &[u64] = &[1_000, 3_000, 5_000];
const SHORT_INITIAL_DELAYS_MS: &[u64] = &[0, 100, 1_000];
const SHORT_MIDSTREAM_DELAYS_MS: &[u64] = &[0, 500, 1_000];

/// Overall wall-clock budget for the initial-connection schedule.
pub const INITIAL_BUDGET: Duration = Duration::from_secs(10);

/// Overall wall-clock budget for mid-stream reconnection.
pub const MIDSTREAM_BUDGET: Duration = Duration::from_secs(1);

/// Stateless retry schedule lookup.
///
/// The caller tracks the attempt index and elapsed time; the policy only
/// answers "how long before attempt N, if it is allowed at all".
pub struct RetryPolicy;

impl RetryPolicy {
    /// Delay table for a given failure class and connection context.
    fn table(class: ErrorClass, context: ConnectContext) -> &'static [u64] {
        match (class, context) {
            (ErrorClass::RateLimited, _) => RATE_LIMITED_DELAYS_MS,
            (ErrorClass::ServiceUnavailable, _) => UNAVAILABLE_DELAYS_MS,
            (ErrorClass::Server | ErrorClass::Network, ConnectContext::Initial) => {
                SHORT_INITIAL_DELAYS_MS
            }
            (ErrorClass::Server | ErrorClass::Network, ConnectContext::Midstream) => {
                SHORT_MIDSTREAM_DELAYS_MS
            }
            (ErrorClass::Unclassified, ConnectContext::Initial) => INITIAL_DELAYS_MS,
            (ErrorClass::Unclassified, ConnectContext::Midstream) => MIDSTREAM_DELAYS_MS,
        }
    }

    /// Delay to wait before attempt `attempt` (0-indexed), or `None` once
    /// the schedule is exhausted.
    pub fn delay_for(
        class: ErrorClass,
        context: ConnectContext,
        attempt: u32,
    ) -> Option<Duration> {
        Self::table(class, context)
            .get(attempt as usize)
            .map(|ms| Duration::from_millis(*ms))
    }

    /// Maximum number of attempts for the selected schedule.
    pub fn max_attempts(class: ErrorClass, context: ConnectContext) -> u32 {
        Self::table(class, context).len() as u32
    }

    /// Wall-clock budget for the whole schedule in a given context.
    pub fn budget(context: ConnectContext) -> Duration {
        match context {
            ConnectContext::Initial => INITIAL_BUDGET,
            ConnectContext::Midstream => MIDSTREAM_BUDGET,
        }
    }
}
