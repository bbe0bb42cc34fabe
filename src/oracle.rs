//! Identifier and timestamp oracle.
//!
//! The oracle is the only safe source of entry ids, block ids and generation
//! stamps. Every value it hands out is strictly greater than every value the
//! same instance handed out before, and two concurrent callers never see the
//! same value. When the oracle cannot be reached the call fails; callers must
//! not mint ids locally as a fallback.

use crate::error::{Result, StoreError};
use async_trait::async_trait;
use metrics::counter;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Bits reserved for the logical counter below the physical milliseconds.
pub const LOGICAL_BITS: u32 = 18;

/// Value the in-process counter starts from.
pub const LOCAL_ORACLE_START: u64 = 1 << 20;

/// Source of unique, strictly increasing 64-bit values.
#[async_trait]
pub trait TimestampOracle: Send + Sync {
    /// Issue `n` values in increasing order. `n` must be at least 1.
    async fn next_batch(&self, n: usize) -> Result<Vec<u64>>;

    /// Issue a single value. Same as the first element of `next_batch(1)`.
    async fn next(&self) -> Result<u64> {
        let batch = self.next_batch(1).await?;
        batch
            .first()
            .copied()
            .ok_or_else(|| StoreError::ContractViolation("oracle returned an empty batch".into()))
    }
}

pub(crate) fn check_count(n: usize) -> Result<u64> {
    if n == 0 {
        return Err(StoreError::InvalidArgument(
            "batch size must be at least 1".into(),
        ));
    }
    Ok(n as u64)
}

/// Check a batch received from a remote oracle.
pub(crate) fn check_batch(batch: &[u64], n: usize) -> Result<()> {
    if batch.len() != n {
        return Err(StoreError::ContractViolation(format!(
            "oracle returned {} values, {} requested",
            batch.len(),
            n
        )));
    }
    if batch.windows(2).any(|w| w[0] >= w[1]) {
        return Err(StoreError::ContractViolation(
            "oracle batch is not strictly increasing".into(),
        ));
    }
    Ok(())
}

/// In-process counter. Unique within one process only.
#[derive(Debug)]
pub struct LocalOracle {
    next: AtomicU64,
}

impl LocalOracle {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    fn allocate(&self, n: usize) -> Result<Vec<u64>> {
        let n = check_count(n)?;
        let start = self
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |cur| cur.checked_add(n))
            .map_err(|_| StoreError::Internal("local oracle exhausted".into()))?;
        Ok((start..start + n).collect())
    }
}

impl Default for LocalOracle {
    fn default() -> Self {
        Self::new(LOCAL_ORACLE_START)
    }
}

#[async_trait]
impl TimestampOracle for LocalOracle {
    async fn next_batch(&self, n: usize) -> Result<Vec<u64>> {
        let batch = self.allocate(n)?;
        counter!("statestore_tso_issued_total").increment(n as u64);
        Ok(batch)
    }
}

/// Hybrid logical clock: physical milliseconds shifted left by
/// [`LOGICAL_BITS`] plus a logical counter.
///
/// Values track wall time when the clock is idle and fall back to plain
/// increments when issuance outruns the clock or the clock steps backwards.
#[derive(Debug, Default)]
pub struct HybridClock {
    last: Mutex<u64>,
}

impl HybridClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock that never issues a value below `floor`.
    pub fn with_floor(floor: u64) -> Self {
        Self {
            last: Mutex::new(floor.saturating_sub(1)),
        }
    }

    fn physical() -> u64 {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        millis << LOGICAL_BITS
    }

    /// Reserve `n` consecutive values.
    pub fn allocate(&self, n: usize) -> Result<Vec<u64>> {
        let n = check_count(n)?;
        let mut last = self.last.lock();
        let exhausted = || StoreError::Internal("hybrid clock exhausted".into());
        let base = Self::physical().max(last.checked_add(1).ok_or_else(exhausted)?);
        let end = base.checked_add(n - 1).ok_or_else(exhausted)?;
        *last = end;
        Ok((base..=end).collect())
    }

    /// Last value issued, or the floor before anything was issued.
    pub fn last(&self) -> u64 {
        *self.last.lock()
    }
}

#[async_trait]
impl TimestampOracle for HybridClock {
    async fn next_batch(&self, n: usize) -> Result<Vec<u64>> {
        let batch = self.allocate(n)?;
        counter!("statestore_tso_issued_total").increment(n as u64);
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_local_batch_is_increasing() {
        let oracle = LocalOracle::default();
        let batch = oracle.next_batch(4).await.unwrap();
        assert_eq!(batch, vec![1 << 20, (1 << 20) + 1, (1 << 20) + 2, (1 << 20) + 3]);
        let single = oracle.next().await.unwrap();
        assert!(single > batch[3]);
    }

    #[tokio::test]
    async fn test_zero_batch_rejected() {
        let oracle = LocalOracle::new(1);
        assert!(matches!(
            oracle.next_batch(0).await,
            Err(StoreError::InvalidArgument(_))
        ));
        assert!(HybridClock::new().allocate(0).is_err());
    }

    #[tokio::test]
    async fn test_local_exhaustion_is_error() {
        let oracle = LocalOracle::new(u64::MAX - 1);
        assert!(oracle.next_batch(4).await.is_err());
    }

    #[tokio::test]
    async fn test_local_concurrent_callers_distinct() {
        let oracle = Arc::new(LocalOracle::new(1));
        let mut handles = Vec::new();
        for _ in 0..8 {
            let oracle = oracle.clone();
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                for _ in 0..50 {
                    seen.extend(oracle.next_batch(3).await.unwrap());
                }
                seen
            }));
        }
        let mut all = HashSet::new();
        for handle in handles {
            for value in handle.await.unwrap() {
                assert!(all.insert(value));
            }
        }
        assert_eq!(all.len(), 8 * 50 * 3);
    }

    #[test]
    fn test_hybrid_clock_is_strictly_increasing() {
        let clock = HybridClock::new();
        let mut prev = 0;
        for _ in 0..1000 {
            let batch = clock.allocate(5).unwrap();
            assert_eq!(batch.len(), 5);
            assert!(batch[0] > prev);
            check_batch(&batch, 5).unwrap();
            prev = batch[4];
        }
        assert_eq!(clock.last(), prev);
    }

    #[test]
    fn test_hybrid_clock_tracks_wall_time() {
        let value = HybridClock::new().allocate(1).unwrap()[0];
        let millis = value >> LOGICAL_BITS;
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_millis() as u64;
        assert!(millis <= now && now - millis < 60_000);
    }

    #[test]
    fn test_hybrid_clock_floor() {
        let floor = u64::MAX >> 1;
        let clock = HybridClock::with_floor(floor);
        assert_eq!(clock.allocate(2).unwrap(), vec![floor, floor + 1]);
    }

    #[test]
    fn test_hybrid_clock_exhaustion_is_error() {
        let clock = HybridClock::with_floor(u64::MAX);
        assert_eq!(clock.allocate(1).unwrap(), vec![u64::MAX]);
        assert!(matches!(clock.allocate(1), Err(StoreError::Internal(_))));
        assert_eq!(clock.last(), u64::MAX);
    }

    #[test]
    fn test_check_batch() {
        assert!(check_batch(&[1, 2, 3], 3).is_ok());
        assert!(check_batch(&[1, 2], 3).unwrap_err().is_contract_violation());
        assert!(check_batch(&[1, 1, 2], 3).unwrap_err().is_contract_violation());
    }
}
