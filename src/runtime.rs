use crate::abilities::{ability_for, ExecuteOutcome, ExecutionContext};
use crate::domain::state_machine::transition;
use crate::domain::types::{
    AbilityParams, InvocationEvent, InvocationReport, InvocationState, PolicyVerdictRecord,
};
use crate::error::AbilityError;
use crate::policy::{Policy, PolicyContext, PolicyEngine};
use crate::rpc::EvmRpcClient;
use crate::signer::{SigningService, TransactionSigner};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, info_span, warn, Instrument};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvocationMode {
    Precheck,
    Execute,
}

/// One request from the surrounding API layer: validated ability params,
/// per-policy user params, and whether to stop after precheck.
#[derive(Clone, Debug)]
pub struct InvocationRequest {
    pub params: AbilityParams,
    pub user_params: BTreeMap<String, Value>,
    pub mode: InvocationMode,
}

#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    /// Application identity recorded against policy commits.
    pub app_id: String,
    /// Reference to the delegated key at the signing service.
    pub public_key_ref: String,
    /// Wait for a receipt after broadcast. When false, success is reported
    /// with `confirmation_pending: true` (fire-and-forget).
    pub wait_for_receipt: bool,
    pub confirmations: u64,
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), AbilityError> {
        if self.app_id.trim().is_empty() {
            return Err(AbilityError::configuration("appId", "app id cannot be empty"));
        }
        if self.public_key_ref.trim().is_empty() {
            return Err(AbilityError::configuration(
                "publicKeyRef",
                "public key reference cannot be empty",
            ));
        }
        if self.confirmations == 0 {
            return Err(AbilityError::configuration(
                "confirmations",
                "confirmation depth must be at least 1",
            ));
        }
        Ok(())
    }
}

/// Orchestrates the three-phase pipeline for one ability invocation:
/// policy precheck + ability precheck, policy evaluate, ability execute
/// (build -> sign -> broadcast), policy commit.
///
/// All collaborators are injected at construction; there is no ambient
/// execution context. The RPC client alone is per-invocation, because the
/// endpoint is part of the validated params.
pub struct AbilityRuntime {
    signing: Arc<dyn SigningService>,
    engine: PolicyEngine,
    config: RuntimeConfig,
}

impl AbilityRuntime {
    pub fn new(
        signing: Arc<dyn SigningService>,
        policies: Vec<Arc<dyn Policy>>,
        config: RuntimeConfig,
    ) -> Result<Self, AbilityError> {
        config.validate()?;
        Ok(Self {
            signing,
            engine: PolicyEngine::new(policies),
            config,
        })
    }

    pub async fn run(&self, request: &InvocationRequest) -> InvocationReport {
        let params = &request.params;
        let ability = ability_for(&params.intent);
        let span = info_span!(
            "ability_invocation",
            ability = ability.name(),
            chain_id = params.chain_id,
            mode = ?request.mode,
        );
        self.run_inner(request, ability.name()).instrument(span).await
    }

    async fn run_inner(&self, request: &InvocationRequest, ability_name: &str) -> InvocationReport {
        let params = &request.params;
        let mut verdicts: Vec<PolicyVerdictRecord> = Vec::new();
        let mut state = InvocationState::Created;

        let rpc = match EvmRpcClient::new(&params.rpc_url, params.fallback_rpc_url.as_deref()) {
            Ok(rpc) => rpc,
            Err(error) => {
                return failure_report(&mut state, verdicts, &error);
            }
        };
        let signer = TransactionSigner::new(self.signing.clone(), &self.config.public_key_ref);
        let ctx = ExecutionContext {
            rpc: &rpc,
            signer: &signer,
            wait_for_receipt: self.config.wait_for_receipt,
            confirmations: self.config.confirmations,
        };
        let policy_ctx = PolicyContext {
            app_id: self.config.app_id.clone(),
            delegator: params.delegator.clone(),
            now_unix: unix_now_secs(),
        };

        // Phase 1: precheck. Policies first so a denial costs no RPC reads,
        // then the ability's own read-only checks.
        match self
            .engine
            .precheck(params, &request.user_params, &policy_ctx)
            .await
        {
            Ok(outcome) => {
                verdicts.extend(outcome.records);
                if let Some(denial) = outcome.denial {
                    info!(policy = denial.policy.as_str(), "invocation denied at precheck");
                    return denial_report(&mut state, verdicts, &denial.message);
                }
            }
            Err(error) => return failure_report(&mut state, verdicts, &error),
        }

        let ability = ability_for(&params.intent);
        let precheck_result = match ability.precheck(params, &ctx).await {
            Ok(result) => result,
            Err(error) if error.is_denial() => {
                info!(error = %error, "invocation denied by ability precheck");
                return denial_report(&mut state, verdicts, &error.to_string());
            }
            Err(error) => return failure_report(&mut state, verdicts, &error),
        };
        state = advance(state, InvocationEvent::PrecheckPassed);

        if request.mode == InvocationMode::Precheck {
            return InvocationReport {
                phase: state,
                verdicts,
                tx_hash: None,
                confirmation_pending: false,
                result: Some(precheck_result),
                commit_warnings: Vec::new(),
                error: None,
            };
        }

        // Phase 2: evaluate, immediately before any chain mutation. State
        // may have moved since precheck, so every policy re-checks.
        let evaluation = match self
            .engine
            .evaluate(params, &request.user_params, &policy_ctx)
            .await
        {
            Ok(outcome) => {
                verdicts.extend(outcome.records.clone());
                if let Some(denial) = outcome.denial.clone() {
                    info!(policy = denial.policy.as_str(), "invocation denied at evaluate");
                    return denial_report(&mut state, verdicts, &denial.message);
                }
                outcome
            }
            Err(error) => return failure_report(&mut state, verdicts, &error),
        };
        state = advance(state, InvocationEvent::EvaluatePassed);

        // Phase 3: execute.
        let outcome = match ability.execute(params, &ctx).await {
            Ok(outcome) => outcome,
            Err(error) => return failure_report(&mut state, verdicts, &error),
        };
        state = advance(state, InvocationEvent::ExecuteSucceeded);
        info!(
            ability = ability_name,
            tx_hash = outcome.tx_hash.as_deref().unwrap_or("none"),
            "execute completed"
        );

        // Phase 4: commit, for every policy that allowed at evaluate. Runs
        // even when execute short-circuited without a broadcast, so policy
        // bookkeeping reflects every approved invocation. Problems here are
        // warnings on a successful report: the on-chain effect stands.
        let commit = self
            .engine
            .commit(&evaluation.allowed, &request.user_params, &policy_ctx)
            .await;
        verdicts.extend(commit.records);
        if commit.warnings.is_empty() {
            state = advance(state, InvocationEvent::CommitCompleted);
        } else {
            for warning in &commit.warnings {
                warn!(warning = warning.as_str(), "commit warning");
            }
        }

        success_report(state, verdicts, outcome, commit.warnings)
    }
}

fn advance(state: InvocationState, event: InvocationEvent) -> InvocationState {
    match transition(&state, &event) {
        Ok(next) => next,
        Err(error) => {
            warn!(from = ?error.from, event = error.event.as_str(), "invalid state transition");
            InvocationState::Failed
        }
    }
}

fn denial_report(
    state: &mut InvocationState,
    verdicts: Vec<PolicyVerdictRecord>,
    reason: &str,
) -> InvocationReport {
    *state = advance(
        state.clone(),
        InvocationEvent::Denied {
            reason: reason.to_string(),
        },
    );
    InvocationReport {
        phase: state.clone(),
        verdicts,
        tx_hash: None,
        confirmation_pending: false,
        result: None,
        commit_warnings: Vec::new(),
        error: Some(reason.to_string()),
    }
}

fn failure_report(
    state: &mut InvocationState,
    verdicts: Vec<PolicyVerdictRecord>,
    error: &AbilityError,
) -> InvocationReport {
    warn!(error = %error, "invocation failed");
    *state = advance(
        state.clone(),
        InvocationEvent::Failed {
            reason: error.to_string(),
        },
    );
    InvocationReport {
        phase: state.clone(),
        verdicts,
        tx_hash: None,
        confirmation_pending: false,
        result: None,
        commit_warnings: Vec::new(),
        error: Some(error.to_string()),
    }
}

fn success_report(
    state: InvocationState,
    verdicts: Vec<PolicyVerdictRecord>,
    outcome: ExecuteOutcome,
    commit_warnings: Vec<String>,
) -> InvocationReport {
    InvocationReport {
        phase: state,
        verdicts,
        tx_hash: outcome.tx_hash,
        confirmation_pending: outcome.confirmation_pending,
        result: Some(outcome.result),
        commit_warnings,
        error: None,
    }
}

fn unix_now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or_default()
}
