// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 wdds contributors

//! Thread-safe registry of matched readers for one writer.
//!
//! Shared between the data path (delivery marks sent state), the control
//! path (acknack handling) and the event loop (heartbeats). Uses DashMap
//! for concurrent access keyed by the reader GUID.

use std::sync::Arc;

use dashmap::DashMap;

use crate::core::types::Guid;
use crate::participant::Locator;

use super::proxy::ReaderProxy;

/// Registry of [`ReaderProxy`] entries, owned by the reliability engine and
/// discarded on un-match.
pub struct MatchedReaderRegistry {
    proxies: DashMap<[u8; 16], Arc<ReaderProxy>>,
}

impl Default for MatchedReaderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchedReaderRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            proxies: DashMap::new(),
        }
    }

    /// Insert or replace the proxy for a discovered reader.
    pub fn add(&self, proxy: Arc<ReaderProxy>) {
        self.proxies.insert(proxy.guid().to_bytes(), proxy);
    }

    /// Remove a reader (discovery reported it gone).
    pub fn remove(&self, reader: Guid) -> Option<Arc<ReaderProxy>> {
        self.proxies.remove(&reader.to_bytes()).map(|(_, p)| p)
    }

    #[must_use]
    pub fn get(&self, reader: Guid) -> Option<Arc<ReaderProxy>> {
        self.proxies.get(&reader.to_bytes()).map(|p| Arc::clone(&p))
    }

    /// Snapshot of all proxies.
    #[must_use]
    pub fn all(&self) -> Vec<Arc<ReaderProxy>> {
        self.proxies.iter().map(|p| Arc::clone(&p)).collect()
    }

    /// Snapshot of the reliable proxies only.
    #[must_use]
    pub fn reliable(&self) -> Vec<Arc<ReaderProxy>> {
        self.proxies
            .iter()
            .filter(|p| p.is_reliable())
            .map(|p| Arc::clone(&p))
            .collect()
    }

    /// Union of every matched reader's locators (delivery fan-out).
    #[must_use]
    pub fn all_locators(&self) -> Vec<Locator> {
        let mut out = Vec::new();
        for proxy in self.proxies.iter() {
            for locator in proxy.locators() {
                if !out.contains(locator) {
                    out.push(*locator);
                }
            }
        }
        out
    }

    /// True when every reliable reader acked `seq`. Vacuously true with no
    /// reliable readers matched.
    #[must_use]
    pub fn acked_by_all(&self, seq: u64) -> bool {
        self.proxies
            .iter()
            .filter(|p| p.is_reliable())
            .all(|p| p.has_acked(seq))
    }

    /// Lowest cumulative ack across reliable readers, `None` when none are
    /// matched.
    #[must_use]
    pub fn slowest_acked(&self) -> Option<u64> {
        self.proxies
            .iter()
            .filter(|p| p.is_reliable())
            .map(|p| p.highest_acked())
            .min()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    pub fn clear(&self) {
        self.proxies.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::qos::{ReliabilityKind, RequestedQos};
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn make_proxy(id: u8, reliability: ReliabilityKind, port: u16) -> Arc<ReaderProxy> {
        Arc::new(ReaderProxy::new(
            Guid::from_bytes([id; 16]),
            vec![SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)],
            RequestedQos {
                reliability,
                ..RequestedQos::default()
            },
        ))
    }

    #[test]
    fn test_add_get_remove() {
        let registry = MatchedReaderRegistry::new();
        let proxy = make_proxy(1, ReliabilityKind::Reliable, 7400);
        registry.add(Arc::clone(&proxy));

        assert_eq!(registry.len(), 1);
        assert!(registry.get(proxy.guid()).is_some());
        assert!(registry.remove(proxy.guid()).is_some());
        assert!(registry.is_empty());
        assert!(registry.remove(proxy.guid()).is_none());
    }

    #[test]
    fn test_acked_by_all_ignores_best_effort() {
        let registry = MatchedReaderRegistry::new();
        let reliable = make_proxy(1, ReliabilityKind::Reliable, 7400);
        let best_effort = make_proxy(2, ReliabilityKind::BestEffort, 7401);
        registry.add(Arc::clone(&reliable));
        registry.add(best_effort);

        assert!(!registry.acked_by_all(3));
        reliable.on_acknack(4, &[]);
        assert!(registry.acked_by_all(3));
    }

    #[test]
    fn test_acked_by_all_vacuous_without_reliable_readers() {
        let registry = MatchedReaderRegistry::new();
        assert!(registry.acked_by_all(100));
        registry.add(make_proxy(2, ReliabilityKind::BestEffort, 7401));
        assert!(registry.acked_by_all(100));
    }

    #[test]
    fn test_slowest_acked() {
        let registry = MatchedReaderRegistry::new();
        let a = make_proxy(1, ReliabilityKind::Reliable, 7400);
        let b = make_proxy(2, ReliabilityKind::Reliable, 7401);
        registry.add(Arc::clone(&a));
        registry.add(Arc::clone(&b));

        a.on_acknack(11, &[]);
        b.on_acknack(6, &[]);
        assert_eq!(registry.slowest_acked(), Some(5));
    }

    #[test]
    fn test_all_locators_deduplicated() {
        let registry = MatchedReaderRegistry::new();
        registry.add(make_proxy(1, ReliabilityKind::Reliable, 7400));
        registry.add(make_proxy(2, ReliabilityKind::Reliable, 7400));
        registry.add(make_proxy(3, ReliabilityKind::Reliable, 7402));

        assert_eq!(registry.all_locators().len(), 2);
    }
}
