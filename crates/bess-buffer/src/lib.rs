//! Durable Buffer (C2, spec §4.2).
//!
//! A bounded, append-only queue of unacknowledged [`BufferEntry`] records,
//! persisted locally so they survive process restart and cloud outage.
//! Backed by `sled`, the same embedded store this corpus reaches for
//! whenever a component needs a durable local queue rather than a full
//! relational store.

#![warn(missing_docs)]

mod error;

pub use error::BufferError;

use bess_common::model::{BufferEntry, BufferEntryKind};
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Default capacity, in number of entries, before telemetry eviction
/// begins. Events are never evicted regardless of this limit.
pub const DEFAULT_CAPACITY: usize = 50_000;

/// Sequence numbers are stored as zero-padded big-endian keys so sled's
/// lexicographic iteration order is also sequence order.
fn key_for(seq: u64) -> [u8; 8] {
    seq.to_be_bytes()
}

fn seq_from_key(key: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(key);
    u64::from_be_bytes(buf)
}

/// Durable append-only buffer for one edge process.
///
/// Exclusive to a single process (spec §5: "The Durable Buffer is
/// exclusive to one edge process; no cross-process sharing"); opening
/// the same sled path from two processes will fail at the sled layer.
pub struct DurableBuffer {
    tree: sled::Tree,
    capacity: usize,
    next_seq: AtomicU64,
    dropped_telemetry_total: AtomicU64,
}

impl DurableBuffer {
    /// Open (or create) a buffer at `path` with `capacity` entries.
    pub fn open(path: &std::path::Path, capacity: usize) -> Result<Self, BufferError> {
        let db = sled::open(path).map_err(BufferError::Io)?;
        let tree = db.open_tree("buffer").map_err(BufferError::Io)?;
        let next_seq = tree
            .iter()
            .keys()
            .next_back()
            .transpose()
            .map_err(BufferError::Io)?
            .map(|k| seq_from_key(&k) + 1)
            .unwrap_or(0);
        Ok(Self {
            tree,
            capacity,
            next_seq: AtomicU64::new(next_seq),
            dropped_telemetry_total: AtomicU64::new(0),
        })
    }

    /// Append `kind`/`payload_bytes` as a new entry, assigning the next
    /// dense monotonic `seq`. Flushes to disk before returning (the sled
    /// analogue of fsync), matching the "fsync required before append
    /// returns" invariant.
    ///
    /// When at capacity:
    /// - telemetry entries trigger eviction of the oldest telemetry
    ///   entry first, recorded in [`Self::dropped_telemetry_total`];
    /// - event entries are never evicted for and never evict others;
    ///   if there is no telemetry left to evict, the caller gets
    ///   [`BufferError::BufferFull`].
    pub fn append(&self, kind: BufferEntryKind, payload_bytes: Vec<u8>) -> Result<u64, BufferError> {
        if self.size()? >= self.capacity {
            match kind {
                BufferEntryKind::Telemetry => {
                    self.evict_oldest_telemetry()?;
                }
                BufferEntryKind::Event => {
                    if !self.evict_oldest_telemetry_if_any()? {
                        return Err(BufferError::BufferFull);
                    }
                }
            }
        }

        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let entry = BufferEntry {
            seq,
            kind,
            payload_bytes,
            created_at: Utc::now(),
            attempts: 0,
        };
        let encoded = serde_json::to_vec(&entry).map_err(BufferError::Encode)?;
        self.tree.insert(key_for(seq), encoded).map_err(BufferError::Io)?;
        self.tree.flush().map_err(BufferError::Io)?;
        Ok(seq)
    }

    /// Return up to `n` oldest unacknowledged entries, in seq order.
    pub fn peek(&self, n: usize) -> Result<Vec<BufferEntry>, BufferError> {
        let mut out = Vec::with_capacity(n.min(1024));
        for item in self.tree.iter().take(n) {
            let (_, value) = item.map_err(BufferError::Io)?;
            out.push(serde_json::from_slice(&value).map_err(BufferError::Decode)?);
        }
        Ok(out)
    }

    /// Remove every entry with `seq <= up_to_seq`.
    pub fn ack(&self, up_to_seq: u64) -> Result<(), BufferError> {
        let mut batch = sled::Batch::default();
        for item in self.tree.range(..=key_for(up_to_seq)) {
            let (key, _) = item.map_err(BufferError::Io)?;
            batch.remove(key);
        }
        self.tree.apply_batch(batch).map_err(BufferError::Io)?;
        self.tree.flush().map_err(BufferError::Io)?;
        Ok(())
    }

    /// Number of unacknowledged entries currently buffered.
    pub fn size(&self) -> Result<usize, BufferError> {
        Ok(self.tree.len())
    }

    /// Age of the oldest unacknowledged entry, or `None` if empty.
    /// Used to decide whether re-entering ONLINE is blocked on a drain
    /// (spec §4.3: "requires ... C2 fully drained").
    pub fn oldest_age(&self) -> Result<Option<Duration>, BufferError> {
        let oldest = self.tree.iter().values().next().transpose().map_err(BufferError::Io)?;
        match oldest {
            None => Ok(None),
            Some(value) => {
                let entry: BufferEntry = serde_json::from_slice(&value).map_err(BufferError::Decode)?;
                Ok(Some(age_of(entry.created_at)))
            }
        }
    }

    /// Running count of telemetry entries dropped to eviction.
    pub fn dropped_telemetry_total(&self) -> u64 {
        self.dropped_telemetry_total.load(Ordering::Relaxed)
    }

    fn evict_oldest_telemetry(&self) -> Result<(), BufferError> {
        if !self.evict_oldest_telemetry_if_any()? {
            // Buffer is full of events only, which are never evicted.
            return Err(BufferError::BufferFull);
        }
        Ok(())
    }

    fn evict_oldest_telemetry_if_any(&self) -> Result<bool, BufferError> {
        for item in self.tree.iter() {
            let (key, value) = item.map_err(BufferError::Io)?;
            let entry: BufferEntry = serde_json::from_slice(&value).map_err(BufferError::Decode)?;
            if entry.kind == BufferEntryKind::Telemetry {
                self.tree.remove(key).map_err(BufferError::Io)?;
                self.dropped_telemetry_total.fetch_add(1, Ordering::Relaxed);
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn age_of(created_at: DateTime<Utc>) -> Duration {
    (Utc::now() - created_at).to_std().unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_tmp(capacity: usize) -> (DurableBuffer, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let buffer = DurableBuffer::open(dir.path(), capacity).unwrap();
        (buffer, dir)
    }

    #[test]
    fn seq_is_dense_and_monotonic() {
        let (buffer, _dir) = open_tmp(100);
        let s0 = buffer.append(BufferEntryKind::Telemetry, b"a".to_vec()).unwrap();
        let s1 = buffer.append(BufferEntryKind::Telemetry, b"b".to_vec()).unwrap();
        let s2 = buffer.append(BufferEntryKind::Event, b"c".to_vec()).unwrap();
        assert_eq!((s0, s1, s2), (0, 1, 2));
    }

    #[test]
    fn ack_removes_entries_at_or_below_seq() {
        let (buffer, _dir) = open_tmp(100);
        for i in 0..5 {
            buffer.append(BufferEntryKind::Telemetry, vec![i]).unwrap();
        }
        buffer.ack(2).unwrap();
        let remaining = buffer.peek(10).unwrap();
        assert_eq!(remaining.len(), 2);
        assert_eq!(remaining[0].seq, 3);
        assert_eq!(remaining[1].seq, 4);
    }

    #[test]
    fn telemetry_is_evicted_at_capacity_events_are_not() {
        let (buffer, _dir) = open_tmp(3);
        buffer.append(BufferEntryKind::Telemetry, vec![0]).unwrap();
        buffer.append(BufferEntryKind::Telemetry, vec![1]).unwrap();
        buffer.append(BufferEntryKind::Event, vec![2]).unwrap();
        // Fourth append at capacity must evict the oldest telemetry, not the event.
        buffer.append(BufferEntryKind::Telemetry, vec![3]).unwrap();
        assert_eq!(buffer.size().unwrap(), 3);
        assert_eq!(buffer.dropped_telemetry_total(), 1);
        let remaining = buffer.peek(10).unwrap();
        assert!(remaining.iter().any(|e| e.kind == BufferEntryKind::Event));
    }

    #[test]
    fn events_never_evicted_and_buffer_full_when_no_telemetry_to_drop() {
        let (buffer, _dir) = open_tmp(2);
        buffer.append(BufferEntryKind::Event, vec![0]).unwrap();
        buffer.append(BufferEntryKind::Event, vec![1]).unwrap();
        let result = buffer.append(BufferEntryKind::Event, vec![2]);
        assert!(matches!(result, Err(BufferError::BufferFull)));
    }

    #[test]
    fn oldest_age_is_none_when_empty() {
        let (buffer, _dir) = open_tmp(10);
        assert!(buffer.oldest_age().unwrap().is_none());
    }

    #[test]
    fn survives_reopen_with_seq_continuity() {
        let dir = tempfile::tempdir().unwrap();
        {
            let buffer = DurableBuffer::open(dir.path(), 100).unwrap();
            buffer.append(BufferEntryKind::Telemetry, vec![0]).unwrap();
            buffer.append(BufferEntryKind::Telemetry, vec![1]).unwrap();
        }
        let buffer = DurableBuffer::open(dir.path(), 100).unwrap();
        assert_eq!(buffer.size().unwrap(), 2);
        let next = buffer.append(BufferEntryKind::Event, vec![2]).unwrap();
        assert_eq!(next, 2);
    }

    proptest::proptest! {
        /// `ack(s)` must remove every entry with `seq <= s` and leave
        /// every entry with `seq > s` in place, for any append count and
        /// any ack point - the invariant scenario S4's "buffer republishes
        /// exactly the unacked tail" relies on.
        #[test]
        fn ack_removes_exactly_entries_at_or_below_seq(count in 1usize..50, ack_at in 0u64..50) {
            let (buffer, _dir) = open_tmp(count + 1);
            for i in 0..count {
                buffer.append(BufferEntryKind::Telemetry, vec![i as u8]).unwrap();
            }
            buffer.ack(ack_at).unwrap();
            let remaining = buffer.peek(count).unwrap();
            for entry in &remaining {
                proptest::prop_assert!(entry.seq > ack_at);
            }
            let expected_remaining = count.saturating_sub((ack_at + 1).min(count as u64) as usize);
            proptest::prop_assert_eq!(remaining.len(), expected_remaining);
        }
    }
}
