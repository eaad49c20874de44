//! Scripted chain source.
//!
//! Serves a fixed, pre-decoded event log plus claimable/stream tables.
//! `tapd` uses it to replay a recorded log from a JSON file; tests program
//! it directly. A production RPC-backed reader implements the same trait
//! outside this crate.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::core::{Amount, BlockNumber};

use super::{ChainError, ChainReader, OnchainStream, SealedEvent};

/// On-disk shape of a recorded chain log.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChainScript {
    #[serde(default)]
    pub events: Vec<SealedEvent>,
    #[serde(default)]
    pub streams: Vec<OnchainStream>,
    #[serde(default)]
    pub claimable: Vec<(u64, Amount)>,
}

struct ScriptState {
    events: Vec<SealedEvent>,
    streams: Vec<OnchainStream>,
    claimable: Vec<(u64, Amount)>,
    head: BlockNumber,
}

/// A `ChainReader` over a scripted log. Interior mutability so tests can
/// append events and move claimable values while the engine runs.
pub struct ScriptedChain {
    state: Mutex<ScriptState>,
}

impl ScriptedChain {
    pub fn new(script: ChainScript) -> Self {
        let head = script
            .events
            .iter()
            .map(|e| e.block)
            .max()
            .unwrap_or_default();
        ScriptedChain {
            state: Mutex::new(ScriptState {
                events: script.events,
                streams: script.streams,
                claimable: script.claimable,
                head,
            }),
        }
    }

    pub fn empty() -> Self {
        Self::new(ChainScript::default())
    }

    pub fn from_path(path: &Path) -> Result<Self, ChainError> {
        let raw = fs::read_to_string(path).map_err(|e| ChainError::Unavailable {
            reason: format!("failed to read {}: {e}", path.display()),
        })?;
        let script: ChainScript =
            serde_json::from_str(&raw).map_err(|e| ChainError::Decode {
                reason: format!("failed to parse {}: {e}", path.display()),
            })?;
        Ok(Self::new(script))
    }

    /// Append a live event, advancing the head block.
    pub fn push_event(&self, event: SealedEvent) {
        let mut state = self.state.lock().expect("script lock");
        if event.block > state.head {
            state.head = event.block;
        }
        state.events.push(event);
    }

    pub fn set_claimable(&self, stream_id: u64, amount: Amount) {
        let mut state = self.state.lock().expect("script lock");
        if let Some(slot) = state.claimable.iter_mut().find(|(id, _)| *id == stream_id) {
            slot.1 = amount;
        } else {
            state.claimable.push((stream_id, amount));
        }
    }

    pub fn set_stream(&self, stream: OnchainStream) {
        let mut state = self.state.lock().expect("script lock");
        state.streams.retain(|s| s.stream_id != stream.stream_id);
        state.streams.push(stream);
    }

    pub fn advance_head(&self, block: BlockNumber) {
        let mut state = self.state.lock().expect("script lock");
        if block > state.head {
            state.head = block;
        }
    }
}

impl ChainReader for ScriptedChain {
    fn latest_block(&self) -> Result<BlockNumber, ChainError> {
        Ok(self.state.lock().expect("script lock").head)
    }

    fn get_stream(&self, stream_id: u64) -> Result<OnchainStream, ChainError> {
        let state = self.state.lock().expect("script lock");
        state
            .streams
            .iter()
            .find(|s| s.stream_id == stream_id)
            .cloned()
            .ok_or(ChainError::NotFound { stream_id })
    }

    fn get_claimable(&self, stream_id: u64) -> Result<Amount, ChainError> {
        let state = self.state.lock().expect("script lock");
        state
            .claimable
            .iter()
            .find(|(id, _)| *id == stream_id)
            .map(|(_, amount)| *amount)
            .ok_or(ChainError::NotFound { stream_id })
    }

    fn events_in(
        &self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<Vec<SealedEvent>, ChainError> {
        let state = self.state.lock().expect("script lock");
        let mut events: Vec<SealedEvent> = state
            .events
            .iter()
            .filter(|e| e.block >= from && e.block <= to)
            .cloned()
            .collect();
        events.sort_by(|a, b| {
            a.block
                .cmp(&b.block)
                .then_with(|| a.key.log_index.cmp(&b.key.log_index))
        });
        Ok(events)
    }
}
