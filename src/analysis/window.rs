//! Fixed-duration time windows over a batch of records.

use chrono::{DateTime, Duration, TimeZone, Utc};
use tracing::warn;

use crate::record::ParsedRecord;

/// Upper bound on the number of windows in one grid. Wider spans keep only
/// the most recent windows; older records fall outside the grid and are not
/// counted.
pub const MAX_WINDOWS: usize = 100_000;

/// Contiguous grid of equal windows covering a span of records.
///
/// Windows are aligned to multiples of the window size since the Unix epoch
/// and empty windows between the first and last record are kept, so a quiet
/// hour shows up as a zero count rather than disappearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGrid {
    origin: i64,
    size_secs: i64,
    len: usize,
}

/// Per-window totals.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowCount {
    pub start: DateTime<Utc>,
    pub total: usize,
    pub blocked: usize,
}

impl WindowGrid {
    /// Build a grid spanning `records` (assumed sorted by timestamp), capped
    /// at [`MAX_WINDOWS`] windows ending at the latest record.
    /// Returns `None` for an empty slice or a non-positive window size.
    pub fn spanning(records: &[ParsedRecord], size: Duration) -> Option<Self> {
        let size_secs = size.num_seconds();
        if size_secs <= 0 {
            return None;
        }
        let first = records.first()?.timestamp.timestamp();
        let last = records.last()?.timestamp.timestamp();

        let first_slot = first.div_euclid(size_secs);
        let last_slot = last.div_euclid(size_secs);
        let span = (last_slot - first_slot).unsigned_abs().saturating_add(1);
        let len = usize::try_from(span).unwrap_or(usize::MAX).min(MAX_WINDOWS);
        if span > MAX_WINDOWS as u64 {
            warn!(
                windows = span,
                kept = MAX_WINDOWS,
                "record span too wide, keeping the most recent windows"
            );
        }
        let origin = (last_slot - (len as i64 - 1)) * size_secs;

        Some(Self {
            origin,
            size_secs,
            len,
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn size(&self) -> Duration {
        Duration::seconds(self.size_secs)
    }

    /// Index of the window containing `ts`, if it falls inside the grid.
    pub fn index_of(&self, ts: DateTime<Utc>) -> Option<usize> {
        let offset = ts.timestamp() - self.origin;
        if offset < 0 {
            return None;
        }
        let idx = (offset / self.size_secs) as usize;
        (idx < self.len).then_some(idx)
    }

    pub fn start_of(&self, index: usize) -> DateTime<Utc> {
        let secs = self.origin + index as i64 * self.size_secs;
        Utc.timestamp_opt(secs, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Start of the `steps`-th window after the last one in the grid.
    pub fn start_after_end(&self, steps: usize) -> DateTime<Utc> {
        self.start_of(self.len - 1 + steps)
    }

    /// Count records per window.
    pub fn counts<'a, I>(&self, records: I) -> Vec<WindowCount>
    where
        I: IntoIterator<Item = &'a ParsedRecord>,
    {
        let mut counts: Vec<WindowCount> = (0..self.len)
            .map(|i| WindowCount {
                start: self.start_of(i),
                total: 0,
                blocked: 0,
            })
            .collect();

        for record in records {
            if let Some(idx) = self.index_of(record.timestamp) {
                counts[idx].total += 1;
                if record.status.is_blocked() {
                    counts[idx].blocked += 1;
                }
            }
        }
        counts
    }

    /// Per-window totals as a plain series.
    pub fn series<'a, I>(&self, records: I) -> Vec<f64>
    where
        I: IntoIterator<Item = &'a ParsedRecord>,
    {
        let mut series = vec![0.0; self.len];
        for record in records {
            if let Some(idx) = self.index_of(record.timestamp) {
                series[idx] += 1.0;
            }
        }
        series
    }
}
