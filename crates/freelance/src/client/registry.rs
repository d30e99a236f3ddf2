//! Server registry: every server a client has connected to, plus the
//! queue of those currently believed alive.
//!
//! Records live in an arena indexed by position; the active queue holds
//! indices. The head of the active queue is the dispatch target. A record
//! only leaves the queue when it is found expired at the head.

use crate::config::Timing;
use crate::protocol::PING;
use freelance_wire::Message;
use std::collections::{HashMap, VecDeque};
use tokio::time::Instant;

/// One server the client talks to.
#[derive(Debug, Clone)]
pub(crate) struct ServerRecord {
    /// Server identity/endpoint.
    pub endpoint: String,
    /// True if known to be alive.
    pub alive: bool,
    /// Next ping at this time.
    pub ping_at: Instant,
    /// Expires at this time.
    pub expires: Instant,
}

impl ServerRecord {
    fn new(endpoint: String, now: Instant, timing: &Timing) -> Self {
        Self {
            endpoint,
            alive: true,
            ping_at: now + timing.ping_interval,
            expires: now + timing.server_ttl,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct ServerRegistry {
    records: Vec<ServerRecord>,
    by_endpoint: HashMap<String, usize>,
    actives: VecDeque<usize>,
}

impl ServerRegistry {
    /// Register a server and append it to the active queue.
    ///
    /// Returns `None` if the endpoint is already registered.
    pub fn register(&mut self, endpoint: String, now: Instant, timing: &Timing) -> Option<usize> {
        if self.by_endpoint.contains_key(&endpoint) {
            return None;
        }
        let id = self.records.len();
        self.by_endpoint.insert(endpoint.clone(), id);
        self.records.push(ServerRecord::new(endpoint, now, timing));
        self.actives.push_back(id);
        Some(id)
    }

    pub fn position(&self, endpoint: &str) -> Option<usize> {
        self.by_endpoint.get(endpoint).copied()
    }

    pub fn get(&self, id: usize) -> Option<&ServerRecord> {
        self.records.get(id)
    }

    /// Record traffic from a server: refresh its deadlines and bring it
    /// back into the active queue if it had been dropped.
    ///
    /// Returns true if the server rejoined the active queue.
    pub fn touch(&mut self, id: usize, now: Instant, timing: &Timing) -> bool {
        let Some(record) = self.records.get_mut(id) else {
            return false;
        };
        record.ping_at = now + timing.ping_interval;
        record.expires = now + timing.server_ttl;
        if record.alive {
            return false;
        }
        record.alive = true;
        self.actives.push_back(id);
        true
    }

    /// Pop expired servers off the head of the active queue.
    pub fn prune_expired(&mut self, now: Instant) -> Vec<usize> {
        let mut pruned = Vec::new();
        while let Some(&head) = self.actives.front() {
            let record = &mut self.records[head];
            if now < record.expires {
                break;
            }
            record.alive = false;
            self.actives.pop_front();
            pruned.push(head);
        }
        pruned
    }

    pub fn head(&self) -> Option<usize> {
        self.actives.front().copied()
    }

    /// Build a ping for every server whose heartbeat is due, alive or not.
    pub fn due_pings(&mut self, now: Instant, timing: &Timing) -> Vec<Message> {
        let mut pings = Vec::new();
        for record in &mut self.records {
            if now < record.ping_at {
                continue;
            }
            pings.push(Message::from_frames([record.endpoint.clone().into_bytes(), PING.to_vec()]));
            record.ping_at += timing.ping_interval;
            if record.ping_at <= now {
                // Fell more than one interval behind; do not burst.
                record.ping_at = now + timing.ping_interval;
            }
        }
        pings
    }

    /// Earliest heartbeat deadline across all servers.
    pub fn next_ping(&self) -> Option<Instant> {
        self.records.iter().map(|r| r.ping_at).min()
    }

    #[cfg(test)]
    pub fn active_endpoints(&self) -> Vec<&str> {
        self.actives
            .iter()
            .map(|&id| self.records[id].endpoint.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn timing() -> Timing {
        Timing::default()
    }

    fn registry_with(endpoints: &[&str], now: Instant) -> ServerRegistry {
        let mut registry = ServerRegistry::default();
        for ep in endpoints {
            registry.register(ep.to_string(), now, &timing()).unwrap();
        }
        registry
    }

    #[test]
    fn test_register_appends_in_connect_order() {
        let now = Instant::now();
        let registry = registry_with(&["tcp://a:1", "tcp://b:1", "tcp://c:1"], now);
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.active_endpoints(),
            vec!["tcp://a:1", "tcp://b:1", "tcp://c:1"]
        );
        assert_eq!(registry.head(), registry.position("tcp://a:1"));
    }

    #[test]
    fn test_duplicate_register_ignored() {
        let now = Instant::now();
        let mut registry = registry_with(&["tcp://a:1"], now);
        assert!(registry.register("tcp://a:1".into(), now, &timing()).is_none());
        assert_eq!(registry.active_endpoints(), vec!["tcp://a:1"]);
    }

    #[test]
    fn test_prune_only_expired_head() {
        let t0 = Instant::now();
        let mut registry = registry_with(&["tcp://a:1", "tcp://b:1"], t0);
        let b = registry.position("tcp://b:1").unwrap();

        // B is refreshed, A is not; both expire at t0 + ttl otherwise.
        registry.touch(b, t0 + Duration::from_secs(3), &timing());

        assert!(registry.prune_expired(t0 + Duration::from_millis(5999)).is_empty());
        let pruned = registry.prune_expired(t0 + Duration::from_secs(6));
        assert_eq!(pruned, vec![registry.position("tcp://a:1").unwrap()]);
        assert_eq!(registry.active_endpoints(), vec!["tcp://b:1"]);
        assert!(!registry.get(pruned[0]).unwrap().alive);
    }

    #[test]
    fn test_expired_record_behind_live_head_stays_queued() {
        let t0 = Instant::now();
        let mut registry = registry_with(&["tcp://a:1", "tcp://b:1"], t0);
        let a = registry.position("tcp://a:1").unwrap();
        registry.touch(a, t0 + Duration::from_secs(5), &timing());

        // B has expired but is not at the head, so it is left alone.
        assert!(registry.prune_expired(t0 + Duration::from_secs(7)).is_empty());
        assert_eq!(registry.active_endpoints().len(), 2);
    }

    #[test]
    fn test_touch_rejoins_at_tail_once() {
        let t0 = Instant::now();
        let mut registry = registry_with(&["tcp://a:1", "tcp://b:1"], t0);
        let a = registry.position("tcp://a:1").unwrap();
        let b = registry.position("tcp://b:1").unwrap();
        registry.touch(b, t0 + Duration::from_secs(5), &timing());
        registry.prune_expired(t0 + Duration::from_secs(6));

        assert!(registry.touch(a, t0 + Duration::from_secs(7), &timing()));
        assert!(!registry.touch(a, t0 + Duration::from_secs(8), &timing()));
        assert_eq!(registry.active_endpoints(), vec!["tcp://b:1", "tcp://a:1"]);
    }

    #[test]
    fn test_due_pings_advance_by_interval() {
        let t0 = Instant::now();
        let mut registry = registry_with(&["tcp://a:1"], t0);

        assert!(registry.due_pings(t0 + Duration::from_millis(1999), &timing()).is_empty());
        let pings = registry.due_pings(t0 + Duration::from_millis(2000), &timing());
        assert_eq!(pings, vec![Message::from_frames(["tcp://a:1", "PING"])]);
        assert_eq!(registry.next_ping(), Some(t0 + Duration::from_millis(4000)));
    }

    #[test]
    fn test_due_pings_do_not_burst_after_stall() {
        let t0 = Instant::now();
        let mut registry = registry_with(&["tcp://a:1"], t0);
        let late = t0 + Duration::from_secs(30);
        assert_eq!(registry.due_pings(late, &timing()).len(), 1);
        assert!(registry.due_pings(late, &timing()).is_empty());
        assert_eq!(registry.next_ping(), Some(late + Duration::from_secs(2)));
    }
}
