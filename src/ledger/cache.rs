// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! LRU mirror of the last account value read from the ledger per user.
//!
//! Never authoritative: entries are only ever replaced by a fresh ledger
//! read, never edited locally.

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use lru::LruCache;

use crate::models::Account;

pub struct AccountCache {
    cache: Mutex<LruCache<String, Account>>,
}

impl AccountCache {
    /// Create a cache holding at most `capacity` users.
    pub fn new(capacity: usize) -> Self {
        Self {
            cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
            )),
        }
    }

    /// Last account seen for `user_id`.
    pub fn get(&self, user_id: &str) -> Option<Account> {
        self.lock().get(user_id).cloned()
    }

    /// Record a fresh read, returning the value it replaced.
    pub fn put(&self, user_id: &str, account: Account) -> Option<Account> {
        self.lock().put(user_id.to_string(), account)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<String, Account>> {
        self.cache.lock().unwrap_or_else(|p| p.into_inner())
    }
}
