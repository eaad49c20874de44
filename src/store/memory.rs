//! In-memory ledger store.
//!
//! Mutex-protected maps behind the `LedgerStore` trait. The default store
//! for the daemon and the only one the tests need; a database-backed
//! implementation slots in behind the same trait.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::core::{
    Address, Amount, Balance, BlockNumber, EventKey, LedgerEntry, Stream, StreamId, StreamStatus,
    TokenId,
};

use super::{LedgerStore, StoreError};

#[derive(Default)]
struct Inner {
    streams: HashMap<StreamId, Stream>,
    entries: Vec<LedgerEntry>,
    balances: HashMap<Address, Balance>,
    applied_events: HashSet<EventKey>,
    cursor: BlockNumber,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl LedgerStore for MemoryStore {
    fn insert_stream(&self, stream: Stream) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.streams.insert(stream.id.clone(), stream);
        Ok(())
    }

    fn stream(&self, id: &StreamId) -> Result<Stream, StoreError> {
        let inner = self.lock()?;
        inner.streams.get(id).cloned().ok_or(StoreError::NotFound {
            id: id.to_string(),
        })
    }

    fn update_stream(&self, stream: Stream) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.streams.contains_key(&stream.id) {
            return Err(StoreError::NotFound {
                id: stream.id.to_string(),
            });
        }
        inner.streams.insert(stream.id.clone(), stream);
        Ok(())
    }

    fn stream_by_onchain(&self, onchain_id: u64) -> Result<Option<Stream>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .streams
            .values()
            .find(|s| s.onchain_id == Some(onchain_id))
            .cloned())
    }

    fn active_streams(&self) -> Result<Vec<Stream>, StoreError> {
        let inner = self.lock()?;
        let mut streams: Vec<Stream> = inner
            .streams
            .values()
            .filter(|s| s.status == StreamStatus::Active && s.escrow_confirmed)
            .cloned()
            .collect();
        streams.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(streams)
    }

    fn streams_for(&self, recipient: &Address) -> Result<Vec<Stream>, StoreError> {
        let inner = self.lock()?;
        let mut streams: Vec<Stream> = inner
            .streams
            .values()
            .filter(|s| s.recipient == *recipient)
            .cloned()
            .collect();
        streams.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(streams)
    }

    fn find_pending_match(
        &self,
        payer: &Address,
        recipient: &Address,
        token: &TokenId,
        total_amount: Amount,
    ) -> Result<Option<Stream>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .streams
            .values()
            .find(|s| {
                s.status == StreamStatus::Pending
                    && s.payer == *payer
                    && s.recipient == *recipient
                    && s.token == *token
                    && s.total_amount == total_amount
            })
            .cloned())
    }

    fn add_withdrawn(
        &self,
        id: &StreamId,
        delta: Amount,
        expected_prior: Amount,
    ) -> Result<Amount, StoreError> {
        let mut inner = self.lock()?;
        let stream = inner.streams.get_mut(id).ok_or(StoreError::NotFound {
            id: id.to_string(),
        })?;
        if stream.withdrawn_amount != expected_prior {
            return Err(StoreError::CasConflict {
                id: id.to_string(),
                expected: expected_prior,
                actual: stream.withdrawn_amount,
            });
        }
        let next = stream
            .withdrawn_amount
            .checked_add(delta)
            .ok_or(StoreError::ExceedsTotal {
                id: id.to_string(),
            })?;
        if next > stream.total_amount {
            return Err(StoreError::ExceedsTotal {
                id: id.to_string(),
            });
        }
        stream.withdrawn_amount = next;
        Ok(next)
    }

    fn set_withdrawn(&self, id: &StreamId, value: Amount) -> Result<Amount, StoreError> {
        let mut inner = self.lock()?;
        let stream = inner.streams.get_mut(id).ok_or(StoreError::NotFound {
            id: id.to_string(),
        })?;
        if value > stream.total_amount {
            return Err(StoreError::ExceedsTotal {
                id: id.to_string(),
            });
        }
        let prev = stream.withdrawn_amount;
        stream.withdrawn_amount = value;
        Ok(prev)
    }

    fn append_entry(&self, entry: LedgerEntry) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.entries.push(entry);
        Ok(())
    }

    fn entries_for(&self, address: &Address) -> Result<Vec<LedgerEntry>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .entries
            .iter()
            .filter(|e| e.from == *address || e.to == *address)
            .cloned()
            .collect())
    }

    fn upsert_balance(&self, recipient: &Address, balance: Balance) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        inner.balances.insert(recipient.clone(), balance);
        Ok(())
    }

    fn balance(&self, recipient: &Address) -> Result<Option<Balance>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.balances.get(recipient).copied())
    }

    fn record_event(&self, key: EventKey) -> Result<bool, StoreError> {
        let mut inner = self.lock()?;
        Ok(inner.applied_events.insert(key))
    }

    fn event_applied(&self, key: &EventKey) -> Result<bool, StoreError> {
        let inner = self.lock()?;
        Ok(inner.applied_events.contains(key))
    }

    fn sync_cursor(&self) -> Result<BlockNumber, StoreError> {
        let inner = self.lock()?;
        Ok(inner.cursor)
    }

    fn set_sync_cursor(&self, block: BlockNumber) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if block > inner.cursor {
            inner.cursor = block;
        }
        Ok(())
    }
}
