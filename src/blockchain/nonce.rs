// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Nonce Sequencer
//!
//! Hands out nonces for the custodial address to concurrent withdrawals.
//!
//! Reading the pending transaction count per request is only correct while
//! a single withdrawal is in flight: two concurrent readers see the same
//! count, sign two transactions with the same nonce, and the node keeps
//! one of them. The sequencer instead seeds an in-memory counter from the
//! chain peer once and increments it under a mutex.
//!
//! ## Leases
//!
//! [`NonceSequencer::allocate`] returns a [`NonceLease`]. The nonce stays
//! in flight until the lease is settled:
//!
//! | Settlement | Meaning | Effect |
//! |------------|---------|--------|
//! | [`NonceLease::submitted`] | node accepted the transaction | nonce is spent |
//! | [`NonceLease::release`] or drop | never accepted | sequencer marked stale |
//!
//! A released nonce is handed out again only after a resync reports it
//! unused (at or above the chain's pending count). The fresh counter never
//! moves backwards, so a nonce still held by another lease or already
//! accepted by the node is never issued twice.
//!
//! ## Locking
//!
//! The state lives behind a `std::sync::Mutex` that is never held across
//! an `.await`. Seeding and resynchronization fetch the pending count
//! outside the lock and reconcile the result inside it: a fetch that
//! started before a newer resync or release is discarded.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

use alloy::primitives::Address;

use super::client::{ChainError, ChainPeer};

#[derive(Debug, Default)]
struct SequencerState {
    /// Next never-issued nonce; `None` until first seeded.
    next: Option<u64>,
    /// Set when a resync must happen before the next allocation.
    stale: bool,
    /// Bumped on every change a pending fetch must not overwrite.
    epoch: u64,
    /// Allocated and not yet settled.
    in_flight: BTreeSet<u64>,
    /// Released, waiting for a resync to confirm they are unused.
    released: BTreeSet<u64>,
    /// Confirmed unused; reissued lowest first.
    reusable: BTreeSet<u64>,
}

impl SequencerState {
    fn ready(&self) -> bool {
        self.next.is_some() && !self.stale
    }

    fn take_next(&mut self) -> Option<u64> {
        if !self.ready() {
            return None;
        }
        let nonce = match self.reusable.pop_first() {
            Some(nonce) => nonce,
            None => {
                let nonce = self.next?;
                self.next = Some(nonce + 1);
                nonce
            }
        };
        self.in_flight.insert(nonce);
        Some(nonce)
    }

    fn peek(&self) -> Option<u64> {
        if !self.ready() {
            return None;
        }
        self.reusable.first().copied().or(self.next)
    }

    fn invalidate(&mut self) {
        self.stale = true;
        self.epoch += 1;
    }

    /// Reconcile with the chain's pending count.
    fn adopt(&mut self, pending: u64) {
        let next = self.next.map_or(pending, |next| next.max(pending));
        let released = std::mem::take(&mut self.released);
        self.reusable.extend(released);
        self.reusable.retain(|&nonce| nonce >= pending && nonce < next);
        self.next = Some(next);
        self.stale = false;
        self.epoch += 1;
    }
}

/// Serialized nonce allocation for one custodial address.
pub struct NonceSequencer {
    chain: Arc<dyn ChainPeer>,
    address: Address,
    state: Mutex<SequencerState>,
}

impl NonceSequencer {
    pub fn new(chain: Arc<dyn ChainPeer>, address: Address) -> Self {
        Self {
            chain,
            address,
            state: Mutex::new(SequencerState::default()),
        }
    }

    /// The custodial address this sequencer serves.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Allocate the next nonce.
    ///
    /// Seeds from the chain peer on first use, and resyncs first after
    /// [`mark_stale`].
    ///
    /// [`mark_stale`]: Self::mark_stale
    pub async fn allocate(&self) -> Result<NonceLease<'_>, ChainError> {
        loop {
            let epoch = {
                let mut state = self.lock();
                if let Some(nonce) = state.take_next() {
                    return Ok(NonceLease {
                        sequencer: self,
                        nonce,
                        settled: false,
                    });
                }
                state.epoch
            };

            let fetched = self.chain.pending_nonce(self.address).await?;

            let mut state = self.lock();
            if state.epoch == epoch {
                tracing::debug!(address = %self.address, nonce = fetched, "Nonce sequencer seeded");
                state.adopt(fetched);
            }
            // Otherwise the state moved on while fetching; loop and retry.
        }
    }

    /// Require a resync before the next allocation.
    pub fn mark_stale(&self) {
        self.lock().invalidate();
    }

    /// Reseed from the chain peer's pending count now.
    ///
    /// Returns the nonce the next allocation will hand out. If the fetch
    /// fails the sequencer stays stale and the next allocation retries.
    pub async fn resync(&self) -> Result<u64, ChainError> {
        let epoch = {
            let mut state = self.lock();
            state.invalidate();
            state.epoch
        };

        let fetched = self.chain.pending_nonce(self.address).await?;

        let mut state = self.lock();
        if state.epoch == epoch {
            state.adopt(fetched);
            tracing::info!(
                address = %self.address,
                pending = fetched,
                in_flight = state.in_flight.len(),
                reusable = state.reusable.len(),
                "Nonce sequencer resynchronized"
            );
        }
        Ok(state.peek().unwrap_or(fetched))
    }

    /// The nonce the next allocation would return, if no resync is due.
    pub fn peek(&self) -> Option<u64> {
        self.lock().peek()
    }

    /// Number of allocated nonces not yet settled.
    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    fn settle(&self, nonce: u64, accepted: bool) {
        let mut state = self.lock();
        state.in_flight.remove(&nonce);
        if !accepted {
            state.released.insert(nonce);
            state.invalidate();
        }
    }

    fn lock(&self) -> MutexGuard<'_, SequencerState> {
        // Plain sets and counters; a panic elsewhere cannot corrupt them.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// An allocated nonce, in flight until settled.
///
/// Dropping an unsettled lease releases it.
#[must_use = "an unsettled lease is released on drop"]
pub struct NonceLease<'a> {
    sequencer: &'a NonceSequencer,
    nonce: u64,
    settled: bool,
}

impl NonceLease<'_> {
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// The node accepted the transaction carrying this nonce.
    pub fn submitted(mut self) -> u64 {
        self.settled = true;
        self.sequencer.settle(self.nonce, true);
        self.nonce
    }

    /// The transaction never reached the node's pool.
    pub fn release(mut self) {
        self.settled = true;
        self.sequencer.settle(self.nonce, false);
    }
}

impl Drop for NonceLease<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.sequencer.settle(self.nonce, false);
        }
    }
}

impl std::fmt::Debug for NonceLease<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceLease").field("nonce", &self.nonce).finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
    use std::time::Duration;

    use alloy::primitives::B256;
    use async_trait::async_trait;
    use tokio::sync::Notify;
    use tokio::task::JoinSet;

    /// Chain peer stub with a settable pending count.
    pub(crate) struct CountingPeer {
        pub pending: AtomicU64,
        pub nonce_queries: AtomicUsize,
        pub delay: Duration,
    }

    impl CountingPeer {
        pub(crate) fn new(pending: u64) -> Self {
            Self {
                pending: AtomicU64::new(pending),
                nonce_queries: AtomicUsize::new(0),
                delay: Duration::from_millis(5),
            }
        }
    }

    #[async_trait]
    impl ChainPeer for CountingPeer {
        async fn pending_nonce(&self, _address: Address) -> Result<u64, ChainError> {
            self.nonce_queries.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.pending.load(Ordering::SeqCst))
        }

        async fn gas_price(&self) -> Result<u128, ChainError> {
            Ok(1)
        }

        async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<B256, ChainError> {
            Ok(B256::ZERO)
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_are_contiguous_and_unique() {
        let peer = Arc::new(CountingPeer::new(42));
        let sequencer = Arc::new(NonceSequencer::new(peer.clone(), Address::ZERO));

        let mut tasks = JoinSet::new();
        for _ in 0..64 {
            let sequencer = sequencer.clone();
            tasks.spawn(async move { sequencer.allocate().await.unwrap().submitted() });
        }

        let mut seen = HashSet::new();
        while let Some(result) = tasks.join_next().await {
            assert!(seen.insert(result.unwrap()), "duplicate nonce allocated");
        }

        let expected: HashSet<u64> = (42..42 + 64).collect();
        assert_eq!(seen, expected);
        assert_eq!(sequencer.peek(), Some(42 + 64));
        assert_eq!(sequencer.in_flight(), 0);
    }

    #[tokio::test]
    async fn seeds_once_then_counts_locally() {
        let peer = Arc::new(CountingPeer::new(3));
        let sequencer = NonceSequencer::new(peer.clone(), Address::ZERO);

        assert_eq!(sequencer.peek(), None);
        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 3);
        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 4);
        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 5);
        assert_eq!(peer.nonce_queries.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn released_nonce_is_reissued_after_resync() {
        let peer = Arc::new(CountingPeer::new(10));
        let sequencer = NonceSequencer::new(peer.clone(), Address::ZERO);

        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 10);
        let rejected = sequencer.allocate().await.unwrap();
        assert_eq!(rejected.nonce(), 11);

        // Nonce 11 was rejected and never entered the pool.
        rejected.release();
        assert_eq!(sequencer.peek(), None);
        peer.pending.store(11, Ordering::SeqCst);
        assert_eq!(sequencer.resync().await.unwrap(), 11);
        assert_eq!(sequencer.peek(), Some(11));
        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 11);
        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 12);
    }

    #[tokio::test]
    async fn resync_skips_nonces_still_in_flight() {
        let peer = Arc::new(CountingPeer::new(5));
        let sequencer = NonceSequencer::new(peer.clone(), Address::ZERO);

        let first = sequencer.allocate().await.unwrap();
        let second = sequencer.allocate().await.unwrap();
        assert_eq!((first.nonce(), second.nonce()), (5, 6));

        // 5 is rejected while 6 has not reached the pool yet.
        first.release();
        assert_eq!(sequencer.resync().await.unwrap(), 5);

        let third = sequencer.allocate().await.unwrap();
        let fourth = sequencer.allocate().await.unwrap();
        assert_eq!(third.nonce(), 5);
        assert_eq!(fourth.nonce(), 7, "nonce 6 is still held by a lease");
        assert_eq!(second.submitted(), 6);
        assert_eq!(sequencer.in_flight(), 2);
    }

    #[tokio::test]
    async fn accepted_nonces_behind_a_gap_are_not_reissued() {
        let peer = Arc::new(CountingPeer::new(5));
        let sequencer = NonceSequencer::new(peer.clone(), Address::ZERO);

        let first = sequencer.allocate().await.unwrap();
        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 6);

        // 6 sits queued behind the gap at 5, so the pending count stays 5.
        first.release();
        sequencer.resync().await.unwrap();

        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 5);
        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 7);
    }

    #[tokio::test]
    async fn chain_ahead_of_counter_is_adopted() {
        let peer = Arc::new(CountingPeer::new(0));
        let sequencer = NonceSequencer::new(peer.clone(), Address::ZERO);

        let lease = sequencer.allocate().await.unwrap();
        assert_eq!(lease.nonce(), 0);
        drop(lease);

        // Dropping an unsettled lease marks the sequencer stale.
        assert_eq!(sequencer.peek(), None);
        peer.pending.store(5, Ordering::SeqCst);
        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 5);
        assert_eq!(peer.nonce_queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn mark_stale_reseeds_lazily() {
        let peer = Arc::new(CountingPeer::new(0));
        let sequencer = NonceSequencer::new(peer.clone(), Address::ZERO);

        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 0);
        sequencer.mark_stale();
        assert_eq!(sequencer.peek(), None);
        assert_eq!(sequencer.allocate().await.unwrap().submitted(), 1);
        assert_eq!(peer.nonce_queries.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn rejection_during_in_flight_submission_never_duplicates() {
        let peer = Arc::new(CountingPeer::new(20));
        let sequencer = Arc::new(NonceSequencer::new(peer.clone(), Address::ZERO));
        let holding = Arc::new(Notify::new());
        let finish = Arc::new(Notify::new());

        let in_flight = {
            let sequencer = sequencer.clone();
            let holding = holding.clone();
            let finish = finish.clone();
            tokio::spawn(async move {
                let lease = sequencer.allocate().await.unwrap();
                holding.notify_one();
                finish.notified().await;
                lease.submitted()
            })
        };
        holding.notified().await;

        let mut tasks = JoinSet::new();
        for i in 0..16u64 {
            let sequencer = sequencer.clone();
            tasks.spawn(async move {
                let lease = sequencer.allocate().await.unwrap();
                if i % 4 == 0 {
                    lease.release();
                    let _ = sequencer.resync().await;
                    None
                } else {
                    Some(lease.submitted())
                }
            });
        }

        let mut accepted = HashSet::new();
        while let Some(result) = tasks.join_next().await {
            if let Some(nonce) = result.unwrap() {
                assert!(accepted.insert(nonce), "nonce {nonce} accepted twice");
            }
        }

        finish.notify_one();
        let held = in_flight.await.unwrap();
        assert_eq!(held, 20);
        assert!(!accepted.contains(&held), "nonce {held} handed out while in flight");
    }

    #[tokio::test]
    async fn seed_failure_propagates_and_leaves_sequencer_unseeded() {
        struct DownPeer;

        #[async_trait]
        impl ChainPeer for DownPeer {
            async fn pending_nonce(&self, _address: Address) -> Result<u64, ChainError> {
                Err(ChainError::Unavailable("connection refused".into()))
            }
            async fn gas_price(&self) -> Result<u128, ChainError> {
                Err(ChainError::Unavailable("connection refused".into()))
            }
            async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<B256, ChainError> {
                Err(ChainError::Unavailable("connection refused".into()))
            }
        }

        let sequencer = NonceSequencer::new(Arc::new(DownPeer), Address::ZERO);
        let err = sequencer.allocate().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(sequencer.peek(), None);
    }
}
