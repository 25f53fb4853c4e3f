//! Policy-gated EVM ability execution pipeline.
//!
//! An *ability* (approve an ERC-20 spend, call a DEX router, re-sign a
//! serialized transaction) runs through three fixed phases:
//!
//! 1. **precheck** — read-only validation, no chain mutation;
//! 2. **execute** — gas planning, canonical serialization, delegated
//!    signing, broadcast;
//! 3. **commit** — post-hoc bookkeeping for the policies that allowed the
//!    execution.
//!
//! Independently-authored [`policy::Policy`] guards (contract whitelist,
//! send-rate limiter) can veto at precheck and evaluate; any single Deny
//! stops the pipeline before the chain is touched. A commit problem after a
//! successful broadcast is reported as a degraded success, never a failure,
//! because a confirmed transaction cannot be rolled back.
//!
//! The [`runtime::AbilityRuntime`] takes every collaborator — RPC transport,
//! signing service, policy set, counter store — as an explicit constructor
//! argument.

pub mod abi;
pub mod abilities;
pub mod broadcast;
pub mod domain;
pub mod error;
pub mod gas;
mod hexutil;
pub mod policy;
pub mod rpc;
pub mod runtime;
pub mod signer;
pub mod tx;

pub use domain::types::{
    AbilityParams, CounterState, GasPlan, InvocationReport, InvocationState, PolicyDenial,
    SignedTransaction, TxIntent, UnsignedTransaction, Verdict,
};
pub use error::AbilityError;
pub use policy::counter_store::{CounterStore, MemoryCounterStore};
pub use policy::rate_limit::SendRateLimitPolicy;
pub use policy::whitelist::ContractWhitelistPolicy;
pub use policy::{Policy, PolicyEngine};
pub use runtime::{AbilityRuntime, InvocationMode, InvocationRequest, RuntimeConfig};
pub use signer::{HttpSigningService, MockSigningService, SigningService};
