use crate::domain::types::CounterState;
use crate::error::AbilityError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    Ok,
    Conflict,
}

/// Address-keyed persistence for policy counters. May be backed by a chain
/// contract or an off-chain store; either way `write` must reject stale
/// versions, because a lost counter update silently grants more throughput
/// than configured.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn read(&self, address: &str) -> Result<CounterState, AbilityError>;

    /// Accepts the write only when `state.version` is exactly one ahead of
    /// the stored version.
    async fn write(&self, address: &str, state: CounterState) -> Result<WriteOutcome, AbilityError>;
}

/// In-memory store with compare-and-swap semantics. The single mutex makes
/// every write atomic with respect to concurrent commits for the same
/// address.
#[derive(Default)]
pub struct MemoryCounterStore {
    cells: Mutex<HashMap<String, CounterState>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn read(&self, address: &str) -> Result<CounterState, AbilityError> {
        let cells = self.cells.lock().await;
        Ok(cells.get(address).cloned().unwrap_or_default())
    }

    async fn write(&self, address: &str, state: CounterState) -> Result<WriteOutcome, AbilityError> {
        let mut cells = self.cells.lock().await;
        let current_version = cells.get(address).map(|cell| cell.version).unwrap_or(0);
        if state.version != current_version + 1 {
            return Ok(WriteOutcome::Conflict);
        }
        cells.insert(address.to_string(), state);
        Ok(WriteOutcome::Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDRESS: &str = "0x1111111111111111111111111111111111111111";

    #[test]
    fn unknown_address_reads_as_default_state() {
        let store = MemoryCounterStore::new();
        let state = tokio_test::block_on(store.read(ADDRESS)).expect("read should succeed");
        assert_eq!(state, CounterState::default());
    }

    #[test]
    fn write_requires_version_exactly_one_ahead() {
        let store = MemoryCounterStore::new();
        let accepted = tokio_test::block_on(store.write(
            ADDRESS,
            CounterState {
                count: 1,
                window_start: 100,
                version: 1,
            },
        ))
        .expect("write should succeed");
        assert_eq!(accepted, WriteOutcome::Ok);

        // Replaying the same version is a conflict, not an overwrite.
        let replay = tokio_test::block_on(store.write(
            ADDRESS,
            CounterState {
                count: 9,
                window_start: 100,
                version: 1,
            },
        ))
        .expect("write should succeed");
        assert_eq!(replay, WriteOutcome::Conflict);

        let state = tokio_test::block_on(store.read(ADDRESS)).expect("read should succeed");
        assert_eq!(state.count, 1);
    }

    #[test]
    fn skipping_versions_is_a_conflict() {
        let store = MemoryCounterStore::new();
        let outcome = tokio_test::block_on(store.write(
            ADDRESS,
            CounterState {
                count: 1,
                window_start: 100,
                version: 3,
            },
        ))
        .expect("write should succeed");
        assert_eq!(outcome, WriteOutcome::Conflict);
    }
}
