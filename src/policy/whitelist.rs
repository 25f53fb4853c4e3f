use crate::domain::types::{AbilityParams, DenyCode, PolicyDenial, Verdict};
use crate::error::AbilityError;
use crate::hexutil::normalize_address;
use crate::policy::{Policy, PolicyContext};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeMap, BTreeSet};

pub const CONTRACT_WHITELIST_POLICY: &str = "contract-whitelist";
pub const WILDCARD_SELECTOR: &str = "*";

/// Denies any transaction whose `(chain, contract, selector)` triple is not
/// explicitly whitelisted by the delegating user.
///
/// User params shape: a map of chain id to contract address to allowed
/// selectors, where a contract's selector set may contain the wildcard
/// `"*"`:
///
/// ```json
/// { "8453": { "0xtoken...": ["0x095ea7b3"], "0xrouter...": ["*"] } }
/// ```
pub struct ContractWhitelistPolicy;

type WhitelistMap = BTreeMap<u64, BTreeMap<String, BTreeSet<String>>>;

fn parse_whitelist(user_params: &Value) -> Result<WhitelistMap, AbilityError> {
    let object = user_params.as_object().ok_or_else(|| {
        AbilityError::configuration(
            CONTRACT_WHITELIST_POLICY,
            "whitelist user params must be an object keyed by chain id",
        )
    })?;

    let mut whitelist = WhitelistMap::new();
    for (chain_key, contracts) in object {
        let chain_id: u64 = chain_key.parse().map_err(|_| {
            AbilityError::configuration(
                CONTRACT_WHITELIST_POLICY,
                format!("chain key {chain_key} is not an integer chain id"),
            )
        })?;
        let contracts = contracts.as_object().ok_or_else(|| {
            AbilityError::configuration(
                CONTRACT_WHITELIST_POLICY,
                format!("chain {chain_key} must map contract addresses to selector lists"),
            )
        })?;

        let mut per_chain = BTreeMap::new();
        for (contract, selectors) in contracts {
            let contract = normalize_address(contract).map_err(|message| {
                AbilityError::configuration(CONTRACT_WHITELIST_POLICY, message)
            })?;
            let selectors = selectors.as_array().ok_or_else(|| {
                AbilityError::configuration(
                    CONTRACT_WHITELIST_POLICY,
                    format!("selectors for {contract} must be an array"),
                )
            })?;
            let mut allowed = BTreeSet::new();
            for selector in selectors {
                let selector = selector.as_str().ok_or_else(|| {
                    AbilityError::configuration(
                        CONTRACT_WHITELIST_POLICY,
                        format!("selectors for {contract} must be strings"),
                    )
                })?;
                allowed.insert(normalize_selector(selector)?);
            }
            per_chain.insert(contract, allowed);
        }
        whitelist.insert(chain_id, per_chain);
    }
    Ok(whitelist)
}

fn normalize_selector(raw: &str) -> Result<String, AbilityError> {
    let trimmed = raw.trim();
    if trimmed == WILDCARD_SELECTOR {
        return Ok(WILDCARD_SELECTOR.to_string());
    }
    let lowered = trimmed.to_ascii_lowercase();
    let valid = lowered.len() == 10
        && lowered.starts_with("0x")
        && lowered
            .as_bytes()
            .iter()
            .skip(2)
            .all(|byte| byte.is_ascii_hexdigit());
    if !valid {
        return Err(AbilityError::configuration(
            CONTRACT_WHITELIST_POLICY,
            format!("selector {raw} must be 0x-prefixed 4-byte hex or \"*\""),
        ));
    }
    Ok(lowered)
}

fn check(params: &AbilityParams, user_params: &Value) -> Result<Verdict, AbilityError> {
    let whitelist = parse_whitelist(user_params)?;
    let preview = &params.preview;

    let deny = |code: DenyCode, message: String| {
        Verdict::Deny(PolicyDenial {
            policy: CONTRACT_WHITELIST_POLICY.to_string(),
            code,
            message,
            chain_id: Some(preview.chain_id),
            contract: Some(preview.to.clone()),
            selector: preview.selector.clone(),
        })
    };

    let Some(contracts) = whitelist.get(&preview.chain_id) else {
        return Ok(deny(
            DenyCode::ChainNotAllowed,
            format!("chain {} is not whitelisted", preview.chain_id),
        ));
    };
    let Some(selectors) = contracts.get(&preview.to) else {
        return Ok(deny(
            DenyCode::ContractNotAllowed,
            format!("contract {} is not whitelisted on chain {}", preview.to, preview.chain_id),
        ));
    };
    if selectors.contains(WILDCARD_SELECTOR) {
        return Ok(Verdict::Allow(json!({
            "chainId": preview.chain_id,
            "contract": preview.to,
            "wildcard": true,
        })));
    }
    match &preview.selector {
        Some(selector) if selectors.contains(selector) => Ok(Verdict::Allow(json!({
            "chainId": preview.chain_id,
            "contract": preview.to,
            "selector": selector,
        }))),
        Some(selector) => Ok(deny(
            DenyCode::SelectorNotAllowed,
            format!(
                "selector {selector} is not allowed for contract {} on chain {}",
                preview.to, preview.chain_id
            ),
        )),
        None => Ok(deny(
            DenyCode::SelectorNotAllowed,
            format!(
                "calldata carries no selector and contract {} has no wildcard entry",
                preview.to
            ),
        )),
    }
}

#[async_trait]
impl Policy for ContractWhitelistPolicy {
    fn name(&self) -> &'static str {
        CONTRACT_WHITELIST_POLICY
    }

    async fn precheck(
        &self,
        params: &AbilityParams,
        user_params: &Value,
        _ctx: &PolicyContext,
    ) -> Result<Verdict, AbilityError> {
        check(params, user_params)
    }

    async fn evaluate(
        &self,
        params: &AbilityParams,
        user_params: &Value,
        _ctx: &PolicyContext,
    ) -> Result<Verdict, AbilityError> {
        check(params, user_params)
    }

    // Stateless policy: nothing to record.
    async fn commit(
        &self,
        _eval_result: &Value,
        _user_params: &Value,
        _ctx: &PolicyContext,
    ) -> Result<Verdict, AbilityError> {
        Ok(Verdict::Allow(json!({})))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const TOKEN: &str = "0x2222222222222222222222222222222222222222";
    const ROUTER: &str = "0x4444444444444444444444444444444444444444";

    fn params_for(chain_id: u64, to: &str, calldata: &str) -> AbilityParams {
        AbilityParams::validate(&json!({
            "chainId": chain_id,
            "rpcUrl": "https://mainnet.base.org",
            "delegator": "0x1111111111111111111111111111111111111111",
            "intent": {
                "type": "contractCall",
                "to": to,
                "calldata": calldata
            }
        }))
        .expect("fixture params should validate")
    }

    fn user_params() -> Value {
        json!({
            "8453": {
                TOKEN: ["0x095ea7b3"],
                ROUTER: ["*"]
            }
        })
    }

    fn run_check(params: &AbilityParams, user: &Value) -> Verdict {
        check(params, user).expect("check should not error")
    }

    #[test]
    fn whitelisted_triple_is_allowed() {
        let params = params_for(8453, TOKEN, "0x095ea7b3000000000000000000000000000000ff");
        assert!(run_check(&params, &user_params()).is_allow());
    }

    #[test]
    fn wildcard_allows_any_selector_for_that_contract() {
        let params = params_for(8453, ROUTER, "0x38ed1739000000000000000000000000000000ff");
        assert!(run_check(&params, &user_params()).is_allow());
    }

    #[test]
    fn unlisted_chain_denies_with_chain_code() {
        let params = params_for(1, TOKEN, "0x095ea7b3000000000000000000000000000000ff");
        match run_check(&params, &user_params()) {
            Verdict::Deny(denial) => {
                assert_eq!(denial.code, DenyCode::ChainNotAllowed);
                assert_eq!(denial.chain_id, Some(1));
            }
            Verdict::Allow(_) => panic!("unlisted chain must deny"),
        }
    }

    #[test]
    fn unlisted_contract_denies_with_contract_code() {
        let params = params_for(
            8453,
            "0x9999999999999999999999999999999999999999",
            "0x095ea7b3000000000000000000000000000000ff",
        );
        match run_check(&params, &user_params()) {
            Verdict::Deny(denial) => assert_eq!(denial.code, DenyCode::ContractNotAllowed),
            Verdict::Allow(_) => panic!("unlisted contract must deny"),
        }
    }

    #[test]
    fn unlisted_selector_denies_with_selector_code() {
        let params = params_for(8453, TOKEN, "0xa9059cbb000000000000000000000000000000ff");
        match run_check(&params, &user_params()) {
            Verdict::Deny(denial) => {
                assert_eq!(denial.code, DenyCode::SelectorNotAllowed);
                assert_eq!(denial.selector.as_deref(), Some("0xa9059cbb"));
            }
            Verdict::Allow(_) => panic!("unlisted selector must deny"),
        }
    }

    #[test]
    fn whitelist_round_trips_every_configured_entry() {
        let entries = [
            (8453u64, TOKEN, "0x095ea7b3"),
            (8453, ROUTER, "0x38ed1739"),
            (10, "0x5555555555555555555555555555555555555555", "0xa9059cbb"),
        ];
        let mut user: Value = json!({});
        for (chain, contract, selector) in &entries {
            user[chain.to_string()][*contract] = json!([selector]);
        }
        for (chain, contract, selector) in &entries {
            let params = params_for(*chain, contract, &format!("{selector}{}", "00".repeat(32)));
            assert!(
                run_check(&params, &user).is_allow(),
                "entry ({chain}, {contract}, {selector}) should round-trip to Allow"
            );
        }
    }

    #[test]
    fn malformed_user_params_are_a_configuration_error() {
        let params = params_for(8453, TOKEN, "0x095ea7b3000000000000000000000000000000ff");
        assert!(check(&params, &json!("not-a-map")).is_err());
        assert!(check(&params, &json!({"not-a-chain": {}})).is_err());
        assert!(check(&params, &json!({"8453": {TOKEN: ["0xzz"]}})).is_err());
    }
}
