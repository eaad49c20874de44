//! End-to-end engine tests: scripted chain in, projections and hub
//! messages out.

use std::sync::Arc;
use std::time::{Duration, Instant};

use moneytap::chain::{ChainEvent, ScriptedChain, SealedEvent};
use moneytap::config::EngineConfig;
use moneytap::core::{
    Address, Amount, BlockNumber, EntryKind, EventKey, StreamId, StreamStatus, TokenId, TxHash,
    UnixSeconds, WithdrawalLimiter,
};
use moneytap::engine::{BroadcastHub, Engine, ServerMessage, Topic};
use moneytap::store::{LedgerStore, MemoryStore};

fn addr(n: u8) -> Address {
    Address::parse(&format!("0x{:040x}", n)).unwrap()
}

fn token() -> TokenId {
    TokenId::parse(&format!("0x{:040x}", 0xee)).unwrap()
}

fn key(n: u64) -> EventKey {
    EventKey::new(TxHash::parse(&format!("0x{:064x}", n)).unwrap(), 0)
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        tick_interval_ms: 20,
        poll_interval_ms: 20,
        ..EngineConfig::default()
    }
}

fn created(stream_id: u64, block: u64, start: u64, end: u64, rate: u128) -> SealedEvent {
    SealedEvent {
        key: key(block * 100),
        block: BlockNumber(block),
        block_time: UnixSeconds(start),
        event: ChainEvent::StreamCreated {
            stream_id,
            payer: addr(1),
            recipient: addr(2),
            token: token(),
            total_amount: Amount(rate * u128::from(end - start)),
            rate_per_second: Amount(rate),
            start_time: UnixSeconds(start),
            end_time: Some(UnixSeconds(end)),
            max_withdrawals_per_day: 3,
        },
    }
}

fn withdraw(stream_id: u64, block: u64, amount: u128) -> SealedEvent {
    SealedEvent {
        key: key(block * 100 + 1),
        block: BlockNumber(block),
        block_time: UnixSeconds(block * 12),
        event: ChainEvent::Withdraw {
            stream_id,
            recipient: addr(2),
            amount: Amount(amount),
            day_index: 0,
            withdrawals_today: 1,
        },
    }
}

fn wait_for<F: Fn() -> bool>(what: &str, predicate: F) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if predicate() {
            return;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    panic!("timed out waiting for {what}");
}

#[test]
fn startup_replay_builds_the_projection_and_a_restart_adds_nothing() {
    let now = UnixSeconds::now().0;
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(ScriptedChain::empty());
    chain.push_event(created(1, 1, now - 100, now + 1_000, 10));
    chain.push_event(withdraw(1, 2, 500));

    let handle = Engine::start(
        Arc::clone(&store),
        Arc::clone(&chain),
        Arc::new(BroadcastHub::new(16)),
        Arc::new(WithdrawalLimiter::new()),
        &fast_config(),
    )
    .unwrap();

    wait_for("balance projection", || {
        store.balance(&addr(2)).unwrap().is_some()
    });
    let stream = store.stream_by_onchain(1).unwrap().unwrap();
    assert_eq!(stream.status, StreamStatus::Active);
    assert_eq!(stream.withdrawn_amount, Amount(500));
    assert_eq!(store.sync_cursor().unwrap(), BlockNumber(2));
    handle.shutdown();

    // Same store, same chain: the journal absorbs the whole replay.
    let handle = Engine::start(
        Arc::clone(&store),
        Arc::clone(&chain),
        Arc::new(BroadcastHub::new(16)),
        Arc::new(WithdrawalLimiter::new()),
        &fast_config(),
    )
    .unwrap();
    handle.shutdown();

    let stream = store.stream_by_onchain(1).unwrap().unwrap();
    assert_eq!(stream.withdrawn_amount, Amount(500), "replay must not double-apply");
    let withdrawals = store
        .entries_for(&addr(2))
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == EntryKind::Withdrawal)
        .count();
    assert_eq!(withdrawals, 1);
}

#[test]
fn live_withdraw_event_reaches_subscribers() {
    let now = UnixSeconds::now().0;
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(ScriptedChain::empty());
    let hub = Arc::new(BroadcastHub::new(16));
    chain.push_event(created(7, 1, now - 50, now + 1_000, 10));

    let handle = Engine::start(
        Arc::clone(&store),
        Arc::clone(&chain),
        Arc::clone(&hub),
        Arc::new(WithdrawalLimiter::new()),
        &fast_config(),
    )
    .unwrap();

    let sub = hub.subscribe(Topic::Withdrawals(addr(2))).unwrap();
    chain.push_event(withdraw(7, 3, 120));

    wait_for("withdraw applied", || {
        store
            .stream_by_onchain(7)
            .unwrap()
            .is_some_and(|s| s.withdrawn_amount == Amount(120))
    });

    let mut processed = None;
    while processed.is_none() {
        match sub.recv().unwrap() {
            ServerMessage::WithdrawalProcessed { amount, .. } => processed = Some(amount),
            _ => continue,
        }
    }
    assert_eq!(processed, Some(Amount(120)));
    handle.shutdown();
}

#[test]
fn ended_stream_completes_and_alerts_the_stream_topic() {
    let now = UnixSeconds::now().0;
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(ScriptedChain::empty());
    let hub = Arc::new(BroadcastHub::new(16));
    // Already past its end time when the engine starts.
    chain.push_event(created(3, 1, now - 100, now - 10, 1));

    let sub = hub.subscribe(Topic::Stream(StreamId::from_onchain(3))).unwrap();
    let handle = Engine::start(
        Arc::clone(&store),
        Arc::clone(&chain),
        Arc::clone(&hub),
        Arc::new(WithdrawalLimiter::new()),
        &fast_config(),
    )
    .unwrap();

    wait_for("completion", || {
        store
            .stream_by_onchain(3)
            .unwrap()
            .is_some_and(|s| s.status == StreamStatus::Completed)
    });

    let mut saw_alert = false;
    while let Ok(msg) = sub.try_recv() {
        if matches!(msg, ServerMessage::StreamCompletionAlert { .. }) {
            saw_alert = true;
        }
    }
    assert!(saw_alert);

    // Fully accrued at completion: 90 seconds at rate 1.
    let stream = store.stream_by_onchain(3).unwrap().unwrap();
    assert_eq!(stream.total_amount, Amount(90));
    handle.shutdown();
}

#[test]
fn cancelled_stream_freezes_and_stops_ticking() {
    let now = UnixSeconds::now().0;
    let store = Arc::new(MemoryStore::new());
    let chain = Arc::new(ScriptedChain::empty());
    chain.push_event(created(5, 1, now - 100, now + 10_000, 10));
    chain.push_event(SealedEvent {
        key: key(999),
        block: BlockNumber(2),
        block_time: UnixSeconds(now - 40),
        event: ChainEvent::StreamCancelled {
            stream_id: 5,
            payer: addr(1),
            refund_amount: Amount(100_400),
            claimable_amount: Amount(600),
        },
    });

    let handle = Engine::start(
        Arc::clone(&store),
        Arc::clone(&chain),
        Arc::new(BroadcastHub::new(16)),
        Arc::new(WithdrawalLimiter::new()),
        &fast_config(),
    )
    .unwrap();
    handle.shutdown();

    let stream = store.stream_by_onchain(5).unwrap().unwrap();
    assert_eq!(stream.status, StreamStatus::Stopped);
    assert_eq!(stream.end_time, Some(UnixSeconds(now - 40)));
    let stop_entries = store
        .entries_for(&addr(1))
        .unwrap()
        .into_iter()
        .filter(|e| e.kind == EntryKind::StreamStop)
        .count();
    assert_eq!(stop_entries, 1);
}
