//! Policy composition. Policies are independently authored guards attached
//! to an ability; each one sees every phase and any single Deny stops the
//! pipeline before chain interaction. Assembly is a static list built at
//! runtime construction, not dynamic loading.

pub mod counter_store;
pub mod rate_limit;
pub mod whitelist;

use crate::domain::types::{
    AbilityParams, PolicyDenial, PolicyPhase, PolicyVerdictRecord, Verdict,
};
use crate::error::AbilityError;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::warn;

/// Per-invocation context threaded to every policy phase.
#[derive(Clone, Debug)]
pub struct PolicyContext {
    pub app_id: String,
    pub delegator: String,
    pub now_unix: u64,
}

/// One guard attached to an ability.
///
/// `precheck` and `evaluate` are read-only; `commit` is the only phase that
/// may mutate policy-owned state, and it runs only after a successful
/// execute, only for policies whose evaluate allowed.
#[async_trait]
pub trait Policy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn precheck(
        &self,
        params: &AbilityParams,
        user_params: &Value,
        ctx: &PolicyContext,
    ) -> Result<Verdict, AbilityError>;

    async fn evaluate(
        &self,
        params: &AbilityParams,
        user_params: &Value,
        ctx: &PolicyContext,
    ) -> Result<Verdict, AbilityError>;

    async fn commit(
        &self,
        eval_result: &Value,
        user_params: &Value,
        ctx: &PolicyContext,
    ) -> Result<Verdict, AbilityError>;
}

#[derive(Clone, Debug, Default)]
pub struct PhaseOutcome {
    pub records: Vec<PolicyVerdictRecord>,
    pub denial: Option<PolicyDenial>,
}

#[derive(Clone, Debug, Default)]
pub struct EvaluationOutcome {
    pub records: Vec<PolicyVerdictRecord>,
    pub denial: Option<PolicyDenial>,
    /// Evaluate-allow results per policy, in order; these are the inputs to
    /// the commit phase.
    pub allowed: Vec<(String, Value)>,
}

#[derive(Clone, Debug, Default)]
pub struct CommitOutcome {
    pub records: Vec<PolicyVerdictRecord>,
    pub warnings: Vec<String>,
}

/// Ordered composition of policies with first-Deny short-circuit.
pub struct PolicyEngine {
    policies: Vec<Arc<dyn Policy>>,
}

impl PolicyEngine {
    pub fn new(policies: Vec<Arc<dyn Policy>>) -> Self {
        Self { policies }
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Run every policy's precheck in order. The first Deny aborts: later
    /// policies are not invoked, and the denial is surfaced verbatim.
    pub async fn precheck(
        &self,
        params: &AbilityParams,
        user_params: &BTreeMap<String, Value>,
        ctx: &PolicyContext,
    ) -> Result<PhaseOutcome, AbilityError> {
        let mut outcome = PhaseOutcome::default();
        for policy in &self.policies {
            let verdict = policy
                .precheck(params, params_for(user_params, policy.name()), ctx)
                .await?;
            let denied = match &verdict {
                Verdict::Allow(_) => None,
                Verdict::Deny(denial) => Some(denial.clone()),
            };
            outcome.records.push(PolicyVerdictRecord {
                policy: policy.name().to_string(),
                phase: PolicyPhase::Precheck,
                verdict,
            });
            if let Some(denial) = denied {
                outcome.denial = Some(denial);
                break;
            }
        }
        Ok(outcome)
    }

    /// Same short-circuit rule as precheck, run immediately before execute.
    /// Allow results are collected for the commit phase.
    pub async fn evaluate(
        &self,
        params: &AbilityParams,
        user_params: &BTreeMap<String, Value>,
        ctx: &PolicyContext,
    ) -> Result<EvaluationOutcome, AbilityError> {
        let mut outcome = EvaluationOutcome::default();
        for policy in &self.policies {
            let verdict = policy
                .evaluate(params, params_for(user_params, policy.name()), ctx)
                .await?;
            match &verdict {
                Verdict::Allow(result) => {
                    outcome
                        .allowed
                        .push((policy.name().to_string(), result.clone()));
                }
                Verdict::Deny(denial) => {
                    outcome.denial = Some(denial.clone());
                }
            }
            let denied = outcome.denial.is_some();
            outcome.records.push(PolicyVerdictRecord {
                policy: policy.name().to_string(),
                phase: PolicyPhase::Evaluate,
                verdict,
            });
            if denied {
                break;
            }
        }
        Ok(outcome)
    }

    /// Run commit for every policy whose evaluate allowed. Commit problems
    /// never fail the invocation: the on-chain effect already stands, so
    /// they are demoted to warnings on the report.
    pub async fn commit(
        &self,
        allowed: &[(String, Value)],
        user_params: &BTreeMap<String, Value>,
        ctx: &PolicyContext,
    ) -> CommitOutcome {
        let mut outcome = CommitOutcome::default();
        for (name, eval_result) in allowed {
            let Some(policy) = self.policies.iter().find(|policy| policy.name() == name) else {
                continue;
            };
            match policy
                .commit(eval_result, params_for(user_params, name), ctx)
                .await
            {
                Ok(verdict) => {
                    if let Verdict::Deny(denial) = &verdict {
                        warn!(policy = name.as_str(), message = %denial.message, "commit denied");
                        outcome
                            .warnings
                            .push(format!("policy {name} commit denied: {}", denial.message));
                    }
                    outcome.records.push(PolicyVerdictRecord {
                        policy: name.clone(),
                        phase: PolicyPhase::Commit,
                        verdict,
                    });
                }
                Err(error) => {
                    warn!(policy = name.as_str(), error = %error, "commit failed");
                    outcome
                        .warnings
                        .push(format!("policy {name} commit failed: {error}"));
                }
            }
        }
        outcome
    }
}

fn params_for<'a>(user_params: &'a BTreeMap<String, Value>, name: &str) -> &'a Value {
    user_params.get(name).unwrap_or(&Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::DenyCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct StaticPolicy {
        name: &'static str,
        deny_at_evaluate: bool,
        evaluate_calls: AtomicU32,
    }

    impl StaticPolicy {
        fn new(name: &'static str, deny_at_evaluate: bool) -> Self {
            Self {
                name,
                deny_at_evaluate,
                evaluate_calls: AtomicU32::new(0),
            }
        }

        fn denial(&self) -> PolicyDenial {
            PolicyDenial {
                policy: self.name.to_string(),
                code: DenyCode::Other,
                message: "denied by fixture".to_string(),
                chain_id: None,
                contract: None,
                selector: None,
            }
        }
    }

    #[async_trait]
    impl Policy for StaticPolicy {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn precheck(
            &self,
            _params: &AbilityParams,
            _user_params: &Value,
            _ctx: &PolicyContext,
        ) -> Result<Verdict, AbilityError> {
            Ok(Verdict::Allow(json!({})))
        }

        async fn evaluate(
            &self,
            _params: &AbilityParams,
            _user_params: &Value,
            _ctx: &PolicyContext,
        ) -> Result<Verdict, AbilityError> {
            self.evaluate_calls.fetch_add(1, Ordering::SeqCst);
            if self.deny_at_evaluate {
                Ok(Verdict::Deny(self.denial()))
            } else {
                Ok(Verdict::Allow(json!({"ok": true})))
            }
        }

        async fn commit(
            &self,
            _eval_result: &Value,
            _user_params: &Value,
            _ctx: &PolicyContext,
        ) -> Result<Verdict, AbilityError> {
            Ok(Verdict::Allow(json!({})))
        }
    }

    fn fixture_params() -> AbilityParams {
        AbilityParams::validate(&json!({
            "chainId": 8453,
            "rpcUrl": "https://mainnet.base.org",
            "delegator": "0x1111111111111111111111111111111111111111",
            "intent": {
                "type": "erc20Approval",
                "token": "0x2222222222222222222222222222222222222222",
                "spender": "0x3333333333333333333333333333333333333333",
                "amount": "100"
            }
        }))
        .expect("fixture params should validate")
    }

    fn fixture_ctx() -> PolicyContext {
        PolicyContext {
            app_id: "app-1".to_string(),
            delegator: "0x1111111111111111111111111111111111111111".to_string(),
            now_unix: 1_700_000_000,
        }
    }

    #[test]
    fn first_deny_at_evaluate_stops_later_policies() {
        let first = Arc::new(StaticPolicy::new("first", true));
        let second = Arc::new(StaticPolicy::new("second", false));
        let engine = PolicyEngine::new(vec![first.clone(), second.clone()]);

        let outcome = tokio_test::block_on(engine.evaluate(
            &fixture_params(),
            &BTreeMap::new(),
            &fixture_ctx(),
        ))
        .expect("evaluate should run");

        assert!(outcome.denial.is_some());
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(first.evaluate_calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.evaluate_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn evaluate_collects_allow_results_for_commit() {
        let engine = PolicyEngine::new(vec![
            Arc::new(StaticPolicy::new("first", false)),
            Arc::new(StaticPolicy::new("second", false)),
        ]);
        let outcome = tokio_test::block_on(engine.evaluate(
            &fixture_params(),
            &BTreeMap::new(),
            &fixture_ctx(),
        ))
        .expect("evaluate should run");

        assert!(outcome.denial.is_none());
        assert_eq!(outcome.allowed.len(), 2);
        assert_eq!(outcome.allowed[0].0, "first");
    }

    #[test]
    fn empty_engine_allows_everything() {
        let engine = PolicyEngine::new(Vec::new());
        let outcome = tokio_test::block_on(engine.precheck(
            &fixture_params(),
            &BTreeMap::new(),
            &fixture_ctx(),
        ))
        .expect("precheck should run");
        assert!(outcome.denial.is_none());
        assert!(outcome.records.is_empty());
    }
}
