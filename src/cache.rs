use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Days, NaiveTime, TimeZone};
use chrono_tz::Tz;
use log::{error, info};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::db::{BalanceSource, BreakdownRow};

/// The cashbox operation runs on Moscow wall-clock time.
pub const REFRESH_ZONE: Tz = chrono_tz::Europe::Moscow;

/// The daily refresh fires at local midnight.
const REFRESH_AT: NaiveTime = NaiveTime::MIN;

/// Cooldown after a failed scheduler tick before recomputing the target.
const RETRY_COOLDOWN: Duration = Duration::from_secs(5 * 60);

/// Point-in-time copy of the breakdown. Replaced wholesale, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheSnapshot {
    pub rows: Vec<BreakdownRow>,
    pub captured_at: DateTime<Tz>,
}

impl CacheSnapshot {
    pub fn total(&self) -> Decimal {
        self.rows.iter().map(|r| r.balance).sum()
    }
}

/// Mutex-guarded holder of the most recent [`CacheSnapshot`]. `refresh`
/// builds the new snapshot outside the lock and swaps it in whole, so a
/// concurrent `read` observes either the fully-old or fully-new value.
#[derive(Clone)]
pub struct BreakdownCache {
    source: Arc<dyn BalanceSource>,
    snapshot: Arc<Mutex<Option<CacheSnapshot>>>,
}

impl BreakdownCache {
    pub fn new(source: Arc<dyn BalanceSource>) -> Self {
        Self { source, snapshot: Arc::new(Mutex::new(None)) }
    }

    /// Re-query the breakdown and replace the snapshot.
    pub async fn refresh(&self) {
        let rows = self.source.fetch_breakdown().await;
        let fresh = CacheSnapshot { rows, captured_at: now_in_zone() };
        info!("breakdown cache refreshed: {} rows at {}", fresh.rows.len(), fresh.captured_at);
        let mut guard = self.snapshot.lock().await;
        *guard = Some(fresh);
    }

    /// Copy out the current snapshot, `None` if never refreshed.
    pub async fn read(&self) -> Option<CacheSnapshot> {
        self.snapshot.lock().await.clone()
    }
}

fn now_in_zone() -> DateTime<Tz> {
    chrono::Utc::now().with_timezone(&REFRESH_ZONE)
}

/// Next occurrence of the fixed refresh time after `now`. If today's slot is
/// already past, the target is tomorrow's.
fn next_refresh_after(now: DateTime<Tz>) -> DateTime<Tz> {
    let mut target = now.date_naive().and_time(REFRESH_AT);
    if target <= now.naive_local() {
        target = target + Days::new(1);
    }
    // A nonexistent local time (DST gap) resolves to the following hour.
    loop {
        if let Some(resolved) = REFRESH_ZONE.from_local_datetime(&target).earliest() {
            return resolved;
        }
        target += chrono::Duration::hours(1);
    }
}

/// Long-lived scheduling task: warm the cache eagerly, then refresh once per
/// day at the fixed local time. A failed tick backs off for a fixed cooldown
/// instead of killing the task; this loop is independent of the transport
/// supervisor and never exits.
pub async fn run_refresh_schedule(cache: BreakdownCache) {
    cache.refresh().await;

    loop {
        let tick = async {
            let now = now_in_zone();
            let target = next_refresh_after(now);
            let wait = (target - now)
                .to_std()
                .unwrap_or_else(|_| Duration::from_secs(1));
            info!("next breakdown refresh at {target} (in {}s)", wait.as_secs());
            sleep(wait).await;
            cache.refresh().await;
            anyhow::Ok(())
        };

        if let Err(err) = tick.await {
            error!("breakdown refresh tick failed: {err:#}; retrying in {}s", RETRY_COOLDOWN.as_secs());
            sleep(RETRY_COOLDOWN).await;
        }
    }
}
