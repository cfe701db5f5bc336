//! UID Tracker
//!
//! Concurrent set of the UIDs currently issued by the server. Every operation
//! holds one exclusive lock over the whole set, which totally orders allocation
//! decisions across requests.

use std::collections::HashSet;
use std::time::Instant;

use parking_lot::Mutex;

/// Allocation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UidError {
    #[error("UID {requested} already used in the system, please retry with {suggested}")]
    Conflict { requested: u64, suggested: u64 },

    #[error("UID generation timed out")]
    Timeout,

    /// A single random draw hit an issued UID. The caller decides whether to draw again.
    #[error("Generated UID {0} is already in use")]
    Collision(u64),
}

/// Thread-safe set of issued UIDs
#[derive(Debug, Default)]
pub struct UidTracker {
    uids: Mutex<HashSet<u64>>,
}

impl UidTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tracker holding the given UIDs
    pub fn with_uids(initial: impl IntoIterator<Item = u64>) -> Self {
        let tracker = Self::new();
        tracker.init(initial);
        tracker
    }

    /// Reset the set to exactly the given UIDs. Duplicates are stored once.
    pub fn init(&self, initial: impl IntoIterator<Item = u64>) {
        let mut uids = self.uids.lock();
        *uids = initial.into_iter().collect();
    }

    /// Reserve `candidate`.
    ///
    /// If it is already issued, a fresh unused UID is drawn and returned inside
    /// [`UidError::Conflict`] as a suggestion. The suggestion is not reserved.
    pub fn add_suggested(&self, candidate: u64) -> Result<u64, UidError> {
        let mut uids = self.uids.lock();

        if uids.contains(&candidate) {
            // Terminates with overwhelming probability: the set is tiny next to 2^64
            let suggested = loop {
                let draw = rand::random::<u64>();
                if !uids.contains(&draw) {
                    break draw;
                }
            };
            return Err(UidError::Conflict {
                requested: candidate,
                suggested,
            });
        }

        uids.insert(candidate);
        Ok(candidate)
    }

    /// Draw one random UID and reserve it if unused.
    ///
    /// Makes a single draw per call. Fails with [`UidError::Timeout`] when
    /// `deadline` has already passed, and with [`UidError::Collision`] when the
    /// draw is taken; neither reserves anything.
    pub fn generate_unique(&self, deadline: Instant) -> Result<u64, UidError> {
        let mut uids = self.uids.lock();

        if Instant::now() >= deadline {
            return Err(UidError::Timeout);
        }

        let draw = rand::random::<u64>();
        if uids.insert(draw) {
            Ok(draw)
        } else {
            Err(UidError::Collision(draw))
        }
    }

    /// Check whether a UID is issued
    pub fn contains(&self, uid: u64) -> bool {
        self.uids.lock().contains(&uid)
    }

    /// Number of issued UIDs
    pub fn len(&self) -> usize {
        self.uids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.uids.lock().is_empty()
    }
}

// ============================================================================
// Tests
// ============================================================================
