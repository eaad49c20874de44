//! Daily withdrawal limiter.
//!
//! Per-recipient counters keyed by the UTC calendar day. An injected,
//! explicitly-owned component: no ambient global maps. Check-and-record
//! happens under one lock acquisition so two concurrent withdrawals for
//! the same recipient cannot both pass a limit only one should.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::core::error::CoreError;
use crate::core::types::{Address, DayIndex, UnixSeconds};

#[derive(Clone, Copy, Debug)]
struct DayCounter {
    day: DayIndex,
    count: u32,
}

/// Quota snapshot for a recipient.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LimitInfo {
    pub used_today: u32,
    pub remaining: u32,
    pub next_reset: UnixSeconds,
}

/// Tracks withdrawal counts within rolling UTC-day windows.
///
/// Counters reset implicitly when the stored day key rolls over; they are
/// never shared across recipients. All methods take `now` explicitly so
/// behavior is deterministic under test.
#[derive(Debug, Default)]
pub struct WithdrawalLimiter {
    counters: Mutex<HashMap<Address, DayCounter>>,
}

impl WithdrawalLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter entries stay valid even if a holder panicked mid-update,
    /// so a poisoned lock is recovered rather than propagated.
    fn lock(&self) -> MutexGuard<'_, HashMap<Address, DayCounter>> {
        self.counters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Would a withdrawal right now stay within the cap?
    pub fn can_withdraw(&self, recipient: &Address, max_per_day: u32, now: UnixSeconds) -> bool {
        self.used_today(recipient, now) < max_per_day
    }

    /// Count a withdrawal against the current day.
    pub fn record(&self, recipient: &Address, now: UnixSeconds) {
        let day = now.day_index();
        let mut counters = self.lock();
        let counter = counters
            .entry(recipient.clone())
            .or_insert(DayCounter { day, count: 0 });
        if counter.day != day {
            counter.day = day;
            counter.count = 0;
        }
        counter.count = counter.count.saturating_add(1);
    }

    /// Atomic check-then-record. Returns `DailyLimitExceeded` with the
    /// remaining-quota detail when the cap is already spent.
    pub fn check_and_record(
        &self,
        recipient: &Address,
        max_per_day: u32,
        now: UnixSeconds,
    ) -> Result<(), CoreError> {
        let day = now.day_index();
        let mut counters = self.lock();
        let counter = counters
            .entry(recipient.clone())
            .or_insert(DayCounter { day, count: 0 });
        if counter.day != day {
            counter.day = day;
            counter.count = 0;
        }
        if counter.count >= max_per_day {
            return Err(CoreError::DailyLimitExceeded {
                recipient: recipient.clone(),
                used: counter.count,
                max: max_per_day,
                next_reset: day.next_reset(),
            });
        }
        counter.count += 1;
        Ok(())
    }

    pub fn info(&self, recipient: &Address, max_per_day: u32, now: UnixSeconds) -> LimitInfo {
        let used = self.used_today(recipient, now);
        LimitInfo {
            used_today: used,
            remaining: max_per_day.saturating_sub(used),
            next_reset: now.day_index().next_reset(),
        }
    }

    fn used_today(&self, recipient: &Address, now: UnixSeconds) -> u32 {
        let day = now.day_index();
        let counters = self.lock();
        match counters.get(recipient) {
            Some(counter) if counter.day == day => counter.count,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipient() -> Address {
        Address::parse(&format!("0x{:040x}", 7)).unwrap()
    }

    #[test]
    fn two_records_exhaust_a_max_of_two() {
        let limiter = WithdrawalLimiter::new();
        let r = recipient();
        let now = UnixSeconds(1_000_000);

        assert!(limiter.can_withdraw(&r, 2, now));
        limiter.record(&r, now);
        assert!(limiter.can_withdraw(&r, 2, now));
        limiter.record(&r, now);
        assert!(!limiter.can_withdraw(&r, 2, now));
    }

    #[test]
    fn next_day_resets_the_count() {
        let limiter = WithdrawalLimiter::new();
        let r = recipient();
        let today = UnixSeconds(1_000_000);
        let tomorrow = today.plus(crate::core::types::SECONDS_PER_DAY);

        limiter.record(&r, today);
        limiter.record(&r, today);
        assert!(!limiter.can_withdraw(&r, 2, today));

        limiter.record(&r, tomorrow);
        let info = limiter.info(&r, 2, tomorrow);
        assert_eq!(info.used_today, 1);
        assert_eq!(info.remaining, 1);
    }

    #[test]
    fn check_and_record_reports_quota_detail() {
        let limiter = WithdrawalLimiter::new();
        let r = recipient();
        let now = UnixSeconds(2_000_000);

        limiter.check_and_record(&r, 1, now).unwrap();
        let err = limiter.check_and_record(&r, 1, now).unwrap_err();
        match err {
            CoreError::DailyLimitExceeded {
                used,
                max,
                next_reset,
                ..
            } => {
                assert_eq!(used, 1);
                assert_eq!(max, 1);
                assert_eq!(next_reset, now.day_index().next_reset());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn counters_are_not_shared_across_recipients() {
        let limiter = WithdrawalLimiter::new();
        let a = Address::parse(&format!("0x{:040x}", 1)).unwrap();
        let b = Address::parse(&format!("0x{:040x}", 2)).unwrap();
        let now = UnixSeconds(500_000);

        limiter.record(&a, now);
        limiter.record(&a, now);
        assert!(!limiter.can_withdraw(&a, 2, now));
        assert!(limiter.can_withdraw(&b, 2, now));
    }

    #[test]
    fn poisoned_lock_is_recovered() {
        use std::sync::Arc;

        let limiter = Arc::new(WithdrawalLimiter::new());
        let poisoner = Arc::clone(&limiter);
        let _ = std::thread::spawn(move || {
            let _guard = poisoner.counters.lock().unwrap();
            panic!("holder dies with the lock");
        })
        .join();

        let r = recipient();
        let now = UnixSeconds(1_000);
        limiter.record(&r, now);
        assert_eq!(limiter.info(&r, 2, now).used_today, 1);
    }

    #[test]
    fn concurrent_records_all_land() {
        use std::sync::Arc;

        let limiter = Arc::new(WithdrawalLimiter::new());
        let r = recipient();
        let now = UnixSeconds(3_000_000);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            let r = r.clone();
            handles.push(std::thread::spawn(move || {
                limiter.check_and_record(&r, 4, now).is_ok()
            }));
        }
        let passed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        // Exactly the cap passes, no matter the interleaving.
        assert_eq!(passed, 4);
        assert_eq!(limiter.info(&r, 4, now).used_today, 4);
    }
}
