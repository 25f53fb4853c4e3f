use crate::domain::types::{AbilityParams, CounterState, DenyCode, PolicyDenial, Verdict};
use crate::error::AbilityError;
use crate::policy::counter_store::{CounterStore, WriteOutcome};
use crate::policy::{Policy, PolicyContext};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;

pub const SEND_RATE_LIMIT_POLICY: &str = "send-rate-limit";

// Version conflicts mean another commit for the same address raced us; the
// retried read observes its increment, so a couple of attempts suffice.
const COMMIT_WRITE_ATTEMPTS: u32 = 3;

/// Caps how many sends a delegator may execute inside a rolling time window.
///
/// User params shape: `{ "maxSends": 3, "timeWindowSeconds": 60 }`.
///
/// The counter lives in an external [`CounterStore`]; reads happen at
/// precheck/evaluate, the increment (and the idempotent window reset) only
/// inside commit, after the on-chain effect succeeded.
pub struct SendRateLimitPolicy {
    store: Arc<dyn CounterStore>,
}

impl SendRateLimitPolicy {
    pub fn new(store: Arc<dyn CounterStore>) -> Self {
        Self { store }
    }
}

#[derive(Clone, Copy, Debug)]
struct RateLimitParams {
    max_sends: u32,
    time_window_seconds: u64,
}

fn parse_params(user_params: &Value) -> Result<RateLimitParams, AbilityError> {
    let max_sends = user_params
        .get("maxSends")
        .and_then(Value::as_u64)
        .and_then(|value| u32::try_from(value).ok())
        .filter(|value| *value > 0)
        .ok_or_else(|| {
            AbilityError::configuration(
                SEND_RATE_LIMIT_POLICY,
                "maxSends must be a positive integer",
            )
        })?;
    let time_window_seconds = user_params
        .get("timeWindowSeconds")
        .and_then(Value::as_u64)
        .filter(|value| *value > 0)
        .ok_or_else(|| {
            AbilityError::configuration(
                SEND_RATE_LIMIT_POLICY,
                "timeWindowSeconds must be a positive integer",
            )
        })?;
    Ok(RateLimitParams {
        max_sends,
        time_window_seconds,
    })
}

fn window_expired(state: &CounterState, now: u64, window_seconds: u64) -> bool {
    now.saturating_sub(state.window_start) >= window_seconds
}

impl SendRateLimitPolicy {
    async fn check(
        &self,
        user_params: &Value,
        ctx: &PolicyContext,
    ) -> Result<Verdict, AbilityError> {
        let limits = parse_params(user_params)?;
        let state = self.store.read(&ctx.delegator).await?;
        let effective_count = if window_expired(&state, ctx.now_unix, limits.time_window_seconds) {
            0
        } else {
            state.count
        };

        if effective_count >= limits.max_sends {
            let window_remaining = limits
                .time_window_seconds
                .saturating_sub(ctx.now_unix.saturating_sub(state.window_start));
            return Ok(Verdict::Deny(PolicyDenial {
                policy: SEND_RATE_LIMIT_POLICY.to_string(),
                code: DenyCode::RateLimited,
                message: format!(
                    "send limit of {} per {}s reached; window resets in {}s",
                    limits.max_sends, limits.time_window_seconds, window_remaining
                ),
                chain_id: None,
                contract: None,
                selector: None,
            }));
        }

        Ok(Verdict::Allow(json!({
            "count": effective_count,
            "maxSends": limits.max_sends,
            "windowStart": state.window_start,
        })))
    }
}

#[async_trait]
impl Policy for SendRateLimitPolicy {
    fn name(&self) -> &'static str {
        SEND_RATE_LIMIT_POLICY
    }

    async fn precheck(
        &self,
        _params: &AbilityParams,
        user_params: &Value,
        ctx: &PolicyContext,
    ) -> Result<Verdict, AbilityError> {
        self.check(user_params, ctx).await
    }

    async fn evaluate(
        &self,
        _params: &AbilityParams,
        user_params: &Value,
        ctx: &PolicyContext,
    ) -> Result<Verdict, AbilityError> {
        self.check(user_params, ctx).await
    }

    /// Record one send: reset the window first when it has elapsed, then
    /// increment. The version check on `write` keeps the read-modify-write
    /// atomic with respect to concurrent commits for the same address.
    async fn commit(
        &self,
        _eval_result: &Value,
        user_params: &Value,
        ctx: &PolicyContext,
    ) -> Result<Verdict, AbilityError> {
        let limits = parse_params(user_params)?;

        for _ in 0..COMMIT_WRITE_ATTEMPTS {
            let state = self.store.read(&ctx.delegator).await?;
            let next = if window_expired(&state, ctx.now_unix, limits.time_window_seconds) {
                CounterState {
                    count: 1,
                    window_start: ctx.now_unix,
                    version: state.version + 1,
                }
            } else {
                CounterState {
                    count: state.count.saturating_add(1),
                    window_start: state.window_start,
                    version: state.version + 1,
                }
            };
            match self.store.write(&ctx.delegator, next.clone()).await? {
                WriteOutcome::Ok => {
                    return Ok(Verdict::Allow(json!({
                        "count": next.count,
                        "windowStart": next.window_start,
                    })));
                }
                WriteOutcome::Conflict => continue,
            }
        }

        Err(AbilityError::CommitFailure {
            policy: SEND_RATE_LIMIT_POLICY.to_string(),
            message: format!(
                "counter write for {} conflicted {} times",
                ctx.delegator, COMMIT_WRITE_ATTEMPTS
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::counter_store::MemoryCounterStore;
    use serde_json::json;

    const DELEGATOR: &str = "0x1111111111111111111111111111111111111111";

    fn user_params() -> Value {
        json!({"maxSends": 3, "timeWindowSeconds": 60})
    }

    fn ctx_at(now_unix: u64) -> PolicyContext {
        PolicyContext {
            app_id: "app-1".to_string(),
            delegator: DELEGATOR.to_string(),
            now_unix,
        }
    }

    fn fixture_params() -> AbilityParams {
        AbilityParams::validate(&json!({
            "chainId": 8453,
            "rpcUrl": "https://mainnet.base.org",
            "delegator": DELEGATOR,
            "intent": {
                "type": "erc20Approval",
                "token": "0x2222222222222222222222222222222222222222",
                "spender": "0x3333333333333333333333333333333333333333",
                "amount": "100"
            }
        }))
        .expect("fixture params should validate")
    }

    fn policy() -> SendRateLimitPolicy {
        SendRateLimitPolicy::new(Arc::new(MemoryCounterStore::new()))
    }

    async fn commit(policy: &SendRateLimitPolicy, now: u64) -> Verdict {
        policy
            .commit(&json!({}), &user_params(), &ctx_at(now))
            .await
            .expect("commit should succeed")
    }

    #[tokio::test]
    async fn three_commits_fill_the_window_and_the_fourth_check_denies() {
        let policy = policy();
        let base = 1_700_000_000u64;

        for i in 0..3u64 {
            let verdict = commit(&policy, base + i).await;
            assert!(verdict.is_allow());
        }

        let verdict = policy
            .evaluate(&fixture_params(), &user_params(), &ctx_at(base + 10))
            .await
            .expect("evaluate should run");
        match verdict {
            Verdict::Deny(denial) => assert_eq!(denial.code, DenyCode::RateLimited),
            Verdict::Allow(_) => panic!("fourth send within the window must deny"),
        }
    }

    #[tokio::test]
    async fn commit_after_window_elapsed_resets_to_one_not_four() {
        let policy = policy();
        let base = 1_700_000_000u64;
        for i in 0..3u64 {
            commit(&policy, base + i).await;
        }

        let verdict = commit(&policy, base + 60).await;
        match verdict {
            Verdict::Allow(result) => {
                assert_eq!(result["count"], 1);
                assert_eq!(result["windowStart"], base + 60);
            }
            Verdict::Deny(_) => panic!("expired window must reset and allow"),
        }
    }

    #[tokio::test]
    async fn check_treats_expired_window_as_empty_without_mutating() {
        let store = Arc::new(MemoryCounterStore::new());
        let policy = SendRateLimitPolicy::new(store.clone());
        let base = 1_700_000_000u64;
        for i in 0..3u64 {
            commit(&policy, base + i).await;
        }

        // Past the window the precheck allows again, but reading must not
        // reset the stored counter.
        let verdict = policy
            .precheck(&fixture_params(), &user_params(), &ctx_at(base + 61))
            .await
            .expect("precheck should run");
        assert!(verdict.is_allow());

        let state = store.read(DELEGATOR).await.expect("read should succeed");
        assert_eq!(state.count, 3);
        assert_eq!(state.window_start, base);
    }

    #[tokio::test]
    async fn commit_reports_failure_when_every_write_conflicts() {
        struct AlwaysConflict;

        #[async_trait]
        impl CounterStore for AlwaysConflict {
            async fn read(&self, _address: &str) -> Result<CounterState, AbilityError> {
                Ok(CounterState::default())
            }
            async fn write(
                &self,
                _address: &str,
                _state: CounterState,
            ) -> Result<WriteOutcome, AbilityError> {
                Ok(WriteOutcome::Conflict)
            }
        }

        let policy = SendRateLimitPolicy::new(Arc::new(AlwaysConflict));
        let error = policy
            .commit(&json!({}), &user_params(), &ctx_at(1_700_000_000))
            .await
            .expect_err("exhausted conflicts must surface as commit failure");
        assert!(matches!(error, AbilityError::CommitFailure { .. }));
    }

    #[tokio::test]
    async fn missing_user_params_fail_fast_as_configuration() {
        let policy = policy();
        let error = policy
            .evaluate(&fixture_params(), &Value::Null, &ctx_at(1_700_000_000))
            .await
            .expect_err("missing params must be a configuration error");
        assert!(matches!(error, AbilityError::Configuration { .. }));
    }

    #[tokio::test]
    async fn fractional_max_sends_is_rejected() {
        let policy = policy();
        let error = policy
            .evaluate(
                &fixture_params(),
                &json!({"maxSends": 2.5, "timeWindowSeconds": 60}),
                &ctx_at(1_700_000_000),
            )
            .await
            .expect_err("fractional maxSends must be rejected");
        assert!(matches!(error, AbilityError::Configuration { .. }));
    }
}
