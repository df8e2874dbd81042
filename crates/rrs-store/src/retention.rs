//! Per-sender pin retention.
//!
//! While a report is processed, every artifact republished to the archival
//! node is recorded against its sender. Once the sender's paid status is
//! known the whole set is taken in one step and either kept or evicted.
//! Nothing is persisted; the map only spans the reports in flight.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use rrs_core::{Address, ContentHash};

/// Hashes awaiting a retention decision, keyed by sender.
#[derive(Debug, Default)]
pub struct PinRetention {
    pending: Mutex<HashMap<Address, BTreeSet<ContentHash>>>,
}

impl PinRetention {
    /// Create an empty retention map.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Address, BTreeSet<ContentHash>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a republished hash for a sender.
    pub fn record(&self, sender: &Address, hash: ContentHash) {
        self.lock().entry(sender.clone()).or_default().insert(hash);
    }

    /// Take and clear a sender's hashes in one locked step.
    pub fn take(&self, sender: &Address) -> BTreeSet<ContentHash> {
        self.lock().remove(sender).unwrap_or_default()
    }

    /// Snapshot of a sender's pending hashes.
    pub fn hashes(&self, sender: &Address) -> BTreeSet<ContentHash> {
        self.lock().get(sender).cloned().unwrap_or_default()
    }

    /// Whether a sender has nothing pending.
    pub fn is_empty_for(&self, sender: &Address) -> bool {
        self.lock().get(sender).map_or(true, BTreeSet::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rrs_core::Keypair;
    use std::sync::Arc;

    #[test]
    fn test_record_and_take() {
        let retention = PinRetention::new();
        let alice = Keypair::from_seed(&[1; 32]).address();
        let bob = Keypair::from_seed(&[2; 32]).address();

        retention.record(&alice, ContentHash::from("h1"));
        retention.record(&alice, ContentHash::from("h2"));
        retention.record(&alice, ContentHash::from("h1"));
        retention.record(&bob, ContentHash::from("h3"));

        assert_eq!(retention.hashes(&alice).len(), 2);

        let taken = retention.take(&alice);
        assert_eq!(taken.len(), 2);
        assert!(retention.is_empty_for(&alice));
        assert!(retention.take(&alice).is_empty());
        assert!(!retention.is_empty_for(&bob));
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let retention = Arc::new(PinRetention::new());
        let sender = Keypair::from_seed(&[3; 32]).address();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let retention = Arc::clone(&retention);
                let sender = sender.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        retention.record(&sender, ContentHash::new(format!("h{t}-{i}")));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(retention.take(&sender).len(), 400);
    }
}
