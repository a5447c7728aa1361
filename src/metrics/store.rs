// SPDX-License-Identifier: Apache-2.0

//! Concurrency-safe store of in-flight metric records.
//!
//! Many tailer tasks fold into the store while the flush scheduler drains it.
//! Backed by a sharded map so contention is per-key, not global: a
//! read-modify-write on one key is atomic with respect to other writers of
//! the same key, while unrelated keys proceed in parallel. The store is
//! injected into its users rather than reached through a global, so tests
//! can run against an isolated instance.

use dashmap::DashMap;

use super::record::{MetricKey, MetricRecord};

#[derive(Debug, Default)]
pub struct MetricStore {
    records: DashMap<MetricKey, MetricRecord>,
}

impl MetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install a record for `key` if none exists. Never overwrites: the
    /// fill-empty pass uses this so a zero record cannot clobber live data.
    pub fn get_or_init(&self, key: MetricKey, init: impl FnOnce() -> MetricRecord) {
        self.records.entry(key).or_insert_with(init);
    }

    /// Atomically fold into the record for `key`, seeding it with `init` on
    /// first touch. The entry guard holds the key's shard for the duration
    /// of `fold`, which is what makes per-key updates atomic.
    pub fn fold(
        &self,
        key: MetricKey,
        init: impl FnOnce() -> MetricRecord,
        fold: impl FnOnce(&mut MetricRecord),
    ) {
        self.records.entry(key).and_modify(fold).or_insert_with(init);
    }

    /// Remove and return every record currently stored.
    ///
    /// Takes a snapshot of the keys present at call time; inserts racing
    /// with the drain either make the snapshot or stay behind for the next
    /// interval. No record is lost or returned twice.
    pub fn drain_all(&self) -> Vec<MetricRecord> {
        let keys: Vec<MetricKey> = self.records.iter().map(|e| e.key().clone()).collect();

        let mut drained = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, record)) = self.records.remove(&key) {
                drained.push(record);
            }
        }
        drained
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
