// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Observer bookkeeping and notification fan-out.
//!
//! A subscriber is `(endpoint, token)` on exactly one resource path. Each
//! fan-out encodes the value once and sends one notification per subscriber.
//! A failed send bumps that subscriber's failure count; once the count reaches
//! the retry budget the subscriber is dropped. Any successful send resets it.

use crate::message::{ContentFormat, Notification, ResourcePath, Status, Token, SEQUENCE_MODULUS};
use crate::transport::Outbox;
use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Consecutive delivery failures tolerated before a subscriber is dropped.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// One observer of one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriber {
    pub endpoint: SocketAddr,
    pub token: Token,
    failures: u32,
}

impl Subscriber {
    /// Consecutive failed deliveries.
    pub fn failures(&self) -> u32 {
        self.failures
    }
}

/// Fan-out counters.
#[derive(Debug, Default, Clone)]
pub struct SubscriptionStats {
    /// Notifications handed to the transport.
    pub notifications_sent: u64,
    /// Failed sends.
    pub delivery_failures: u64,
    /// Subscribers removed after exhausting the retry budget.
    pub subscribers_dropped: u64,
}

/// Result of one [`SubscriptionManager::notify_all`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct NotifyReport {
    pub delivered: usize,
    pub failed: usize,
    pub dropped: Vec<SocketAddr>,
}

#[derive(Debug, Default)]
struct Observed {
    subscribers: Vec<Subscriber>,
    sequence: u32,
}

/// Subscribers per resource path.
#[derive(Debug)]
pub struct SubscriptionManager {
    resources: BTreeMap<ResourcePath, Observed>,
    retry_budget: u32,
    stats: SubscriptionStats,
}

impl SubscriptionManager {
    /// `retry_budget == 0` keeps failing subscribers forever.
    pub fn new(retry_budget: u32) -> Self {
        Self {
            resources: BTreeMap::new(),
            retry_budget,
            stats: SubscriptionStats::default(),
        }
    }

    /// Add an observer. Re-subscribing the same endpoint only updates its token.
    ///
    /// Returns `true` when a new entry was created.
    pub fn subscribe(&mut self, path: &ResourcePath, endpoint: SocketAddr, token: Token) -> bool {
        let observed = self.resources.entry(path.clone()).or_default();
        if let Some(existing) = observed
            .subscribers
            .iter_mut()
            .find(|s| s.endpoint == endpoint)
        {
            existing.token = token;
            existing.failures = 0;
            tracing::debug!("Re-subscribe {} on {} (token {})", endpoint, path, token);
            return false;
        }

        observed.subscribers.push(Subscriber {
            endpoint,
            token,
            failures: 0,
        });
        tracing::debug!("Subscribe {} on {} (token {})", endpoint, path, token);
        true
    }

    /// Remove `endpoint`'s observation of `path`.
    pub fn unsubscribe(&mut self, path: &ResourcePath, endpoint: SocketAddr) -> bool {
        let Some(observed) = self.resources.get_mut(path) else {
            return false;
        };
        let before = observed.subscribers.len();
        observed.subscribers.retain(|s| s.endpoint != endpoint);
        let removed = observed.subscribers.len() != before;
        self.prune(path);
        removed
    }

    /// Handle a reset from an observer: drop the subscription holding `token`.
    pub fn reset(&mut self, endpoint: SocketAddr, token: Token) -> Option<ResourcePath> {
        let path = self
            .resources
            .iter()
            .find(|(_, o)| {
                o.subscribers
                    .iter()
                    .any(|s| s.endpoint == endpoint && s.token == token)
            })
            .map(|(path, _)| path.clone())?;

        if let Some(observed) = self.resources.get_mut(&path) {
            observed
                .subscribers
                .retain(|s| !(s.endpoint == endpoint && s.token == token));
        }
        self.prune(&path);
        tracing::debug!("Reset from {} removed observation of {}", endpoint, path);
        Some(path)
    }

    /// Forget every observer of `path` (the resource was deleted).
    pub fn remove_resource(&mut self, path: &ResourcePath) -> usize {
        self.resources
            .remove(path)
            .map(|o| o.subscribers.len())
            .unwrap_or(0)
    }

    /// Forget every observer of `path` and of anything below it.
    pub fn remove_subtree(&mut self, path: &ResourcePath) -> usize {
        let doomed: Vec<ResourcePath> = self
            .resources
            .keys()
            .filter(|p| p.starts_with(path))
            .cloned()
            .collect();
        doomed.iter().map(|p| self.remove_resource(p)).sum()
    }

    pub fn subscribers(&self, path: &ResourcePath) -> &[Subscriber] {
        self.resources
            .get(path)
            .map(|o| o.subscribers.as_slice())
            .unwrap_or(&[])
    }

    pub fn subscriber_count(&self, path: &ResourcePath) -> usize {
        self.subscribers(path).len()
    }

    /// Paths with at least one observer.
    pub fn observed_paths(&self) -> impl Iterator<Item = &ResourcePath> {
        self.resources.keys()
    }

    /// Observed paths that are a prefix of (or equal to) `changed`.
    pub fn paths_covering(&self, changed: &ResourcePath) -> Vec<ResourcePath> {
        self.resources
            .keys()
            .filter(|observed| changed.starts_with(observed))
            .cloned()
            .collect()
    }

    /// Sequence number of the last notification for `path`.
    pub fn sequence(&self, path: &ResourcePath) -> u32 {
        self.resources.get(path).map(|o| o.sequence).unwrap_or(0)
    }

    pub fn stats(&self) -> &SubscriptionStats {
        &self.stats
    }

    /// Drop everything (shutdown).
    pub fn clear(&mut self) {
        self.resources.clear();
    }

    /// Send `payload` to every observer of `path`.
    pub fn notify_all(
        &mut self,
        path: &ResourcePath,
        status: Status,
        format: ContentFormat,
        payload: &[u8],
        outbox: &mut dyn Outbox,
    ) -> NotifyReport {
        let mut report = NotifyReport::default();
        let Some(observed) = self.resources.get_mut(path) else {
            return report;
        };

        observed.sequence = (observed.sequence + 1) % SEQUENCE_MODULUS;
        let sequence = observed.sequence;
        let budget = self.retry_budget;

        for subscriber in observed.subscribers.iter_mut() {
            let notification = Notification {
                token: subscriber.token,
                sequence,
                status,
                format: Some(format),
                payload: payload.to_vec(),
            };

            match outbox.send(subscriber.endpoint, notification.into()) {
                Ok(()) => {
                    subscriber.failures = 0;
                    report.delivered += 1;
                    self.stats.notifications_sent += 1;
                }
                Err(e) => {
                    subscriber.failures += 1;
                    report.failed += 1;
                    self.stats.delivery_failures += 1;
                    tracing::warn!(
                        "Notify {} -> {} failed ({}/{}): {}",
                        path,
                        subscriber.endpoint,
                        subscriber.failures,
                        budget,
                        e
                    );
                    if budget > 0 && subscriber.failures >= budget {
                        report.dropped.push(subscriber.endpoint);
                    }
                }
            }
        }

        if !report.dropped.is_empty() {
            observed
                .subscribers
                .retain(|s| budget == 0 || s.failures < budget);
            self.stats.subscribers_dropped += report.dropped.len() as u64;
            for endpoint in &report.dropped {
                tracing::info!("Dropped subscriber {} of {}", endpoint, path);
            }
            self.prune(path);
        }

        report
    }

    fn prune(&mut self, path: &ResourcePath) {
        if self
            .resources
            .get(path)
            .is_some_and(|o| o.subscribers.is_empty())
        {
            self.resources.remove(path);
        }
    }
}

impl Default for SubscriptionManager {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_BUDGET)
    }
}
