//! Reassembly of fragmented datagrams.
//!
//! Fragments are buffered per identifier until all pieces arrive, then
//! the reassembled datagram moves to a completed list. Entries that
//! never complete are expired after a deadline, following the cache
//! strategy of RFC 815 (IP Datagram Reassembly Algorithms).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::fragment::Fragment;

/// How long an incomplete reassembly entry is kept before being
/// discarded. See RFC 815, section 7, paragraph 2.
pub const CACHE_EXPIRATION: Duration = Duration::from_secs(60);

/// Buffered state for one in-flight datagram.
struct PacketTracker {
    /// Payloads indexed by fragment ordinal; `None` until arrival.
    pieces: Vec<Option<Bytes>>,
    /// Fragments still missing. Kept separately so arrival does not
    /// rescan `pieces`.
    remaining: u8,
    /// When this entry stops waiting for its missing fragments.
    deadline: Instant,
}

/// Gathers fragments and yields reassembled datagrams.
///
/// The tracker map is shared between the data path and the expiration
/// sweeper, so all mutation goes through internal locks; `&self`
/// methods are safe to call from both.
pub struct Defragmenter {
    /// In-flight datagrams, keyed by hex-encoded fragment id.
    trackers: Mutex<HashMap<String, PacketTracker>>,
    /// Fully reassembled datagrams awaiting collection.
    complete: Mutex<Vec<Bytes>>,
    /// Running count of duplicate fragments seen, for diagnostics.
    duplicates: AtomicU64,
    expiration: Duration,
}

impl Defragmenter {
    /// Create a defragmenter with the standard 60-second expiration.
    pub fn new() -> Self {
        Self::with_expiration(CACHE_EXPIRATION)
    }

    /// Create a defragmenter with a custom expiration window.
    pub fn with_expiration(expiration: Duration) -> Self {
        Self {
            trackers: Mutex::new(HashMap::new()),
            complete: Mutex::new(Vec::new()),
            duplicates: AtomicU64::new(0),
            expiration,
        }
    }

    /// Add a fragment received from the network.
    ///
    /// A fragment for a known id fills its slot; the fragment that
    /// fills the last slot moves the datagram to the completed list. A
    /// fragment for an unknown id opens a new entry (or completes
    /// immediately when `count == 1`). Duplicates are logged, counted,
    /// and dropped without touching existing state.
    pub fn add_fragment(&self, fragment: Fragment) -> Result<()> {
        if fragment.count == 0 || fragment.index >= fragment.count {
            return Err(Error::invalid(format!(
                "fragment index {} out of range for count {}",
                fragment.index, fragment.count
            )));
        }

        let hexid = hex::encode(fragment.id);
        let mut trackers = self.trackers.lock();

        // Lazy expiry: a stale entry is already dead even if the
        // sweeper has not run; a late fragment starts over.
        if let Some(tracked) = trackers.get(&hexid) {
            if tracked.deadline <= Instant::now() {
                trackers.remove(&hexid);
                tracing::debug!(id = %hexid, "reassembly entry expired");
            }
        }

        match trackers.get_mut(&hexid) {
            Some(tracked) => {
                let slot = fragment.index as usize;
                if tracked.pieces.len() != fragment.count as usize {
                    return Err(Error::invalid(format!(
                        "fragment count {} disagrees with existing entry of {}",
                        fragment.count,
                        tracked.pieces.len()
                    )));
                }

                if tracked.pieces[slot].is_some() {
                    // This protocol never retransmits, so a duplicate is
                    // unexpected. Recoverable: log it and keep going.
                    self.duplicates.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        id = %hexid,
                        index = fragment.index,
                        count = fragment.count,
                        "duplicate fragment dropped"
                    );
                    return Ok(());
                }

                tracked.pieces[slot] = Some(fragment.payload);
                tracked.remaining -= 1;

                if tracked.remaining == 0 {
                    if let Some(finished) = trackers.remove(&hexid) {
                        self.publish(finished.pieces);
                    }
                }
            }
            None => {
                let mut pieces = vec![None; fragment.count as usize];
                pieces[fragment.index as usize] = Some(fragment.payload);

                if fragment.count == 1 {
                    self.publish(pieces);
                } else {
                    trackers.insert(
                        hexid,
                        PacketTracker {
                            pieces,
                            remaining: fragment.count - 1,
                            deadline: Instant::now() + self.expiration,
                        },
                    );
                }
            }
        }

        Ok(())
    }

    /// Concatenate the pieces of a finished datagram and queue it.
    fn publish(&self, pieces: Vec<Option<Bytes>>) {
        let mut packet = BytesMut::new();
        for piece in pieces.into_iter().flatten() {
            packet.extend_from_slice(&piece);
        }
        self.complete.lock().push(packet.freeze());
    }

    /// The number of reassembled datagrams awaiting collection.
    pub fn complete_count(&self) -> usize {
        self.complete.lock().len()
    }

    /// Drain and return all reassembled datagrams, oldest first.
    pub fn get_complete(&self) -> Vec<Bytes> {
        std::mem::take(&mut *self.complete.lock())
    }

    /// The number of in-flight (incomplete) reassembly entries.
    pub fn pending_count(&self) -> usize {
        self.trackers.lock().len()
    }

    /// Duplicate fragments seen since construction.
    pub fn duplicate_count(&self) -> u64 {
        self.duplicates.load(Ordering::Relaxed)
    }

    /// Remove entries whose deadline has passed. Returns how many were
    /// dropped.
    pub fn expire_stale(&self) -> usize {
        let now = Instant::now();
        let mut trackers = self.trackers.lock();
        let before = trackers.len();
        trackers.retain(|_, tracked| tracked.deadline > now);
        let removed = before - trackers.len();
        drop(trackers);

        if removed > 0 {
            tracing::debug!("expired {removed} incomplete reassembly entries");
        }
        removed
    }

    /// Periodically drop expired entries. Run this on its own task; it
    /// never returns.
    pub async fn run_sweeper(&self) {
        loop {
            tokio::time::sleep(self.expiration).await;
            self.expire_stale();
        }
    }

    /// Drop all buffered state.
    pub fn clear(&self) {
        self.trackers.lock().clear();
        self.complete.lock().clear();
    }
}

impl Default for Defragmenter {
    fn default() -> Self {
        Self::new()
    }
}
