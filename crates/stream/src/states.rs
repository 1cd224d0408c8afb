use std::collections::HashMap;

use verdant_common::{ChunkId, ChunkState};

/// Authoritative lifecycle state per chunk id.
///
/// Entries are created on first query and default to [`ChunkState::None`], so
/// an id can be asked about before any chunk object is bound to it.
#[derive(Debug, Default)]
pub struct ChunkStates {
    states: HashMap<ChunkId, ChunkState>,
}

impl ChunkStates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state, recording `None` for ids seen for the first time.
    pub fn get(&mut self, id: ChunkId) -> ChunkState {
        *self.states.entry(id).or_default()
    }

    /// Current state without recording the query.
    pub fn peek(&self, id: ChunkId) -> ChunkState {
        self.states.get(&id).copied().unwrap_or_default()
    }

    pub fn set(&mut self, id: ChunkId, state: ChunkState) {
        let previous = self.states.insert(id, state).unwrap_or_default();
        if previous != state {
            tracing::debug!(%id, from = ?previous, to = ?state, "chunk state");
        }
    }

    /// Ids ever queried or set.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn count(&self, state: ChunkState) -> usize {
        self.states.values().filter(|s| **s == state).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ChunkId, ChunkState)> + '_ {
        self.states.iter().map(|(id, state)| (*id, *state))
    }
}
