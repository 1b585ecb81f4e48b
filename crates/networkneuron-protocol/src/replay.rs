//! Replay protection
//!
//! A sliding window per peer over `(source, msg_id)`. A message id seen a
//! second time within the window is rejected with [`WireError::Replay`].

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{Result, WireError};
use crate::types::{MessageId, NodeId};

/// Default replay window length (5 minutes, matching timestamp freshness)
pub const DEFAULT_WINDOW_MS: u64 = 300_000;

struct PeerWindow {
    seen: HashSet<MessageId>,
    order: VecDeque<(MessageId, u64)>,
}

impl PeerWindow {
    fn new() -> Self {
        PeerWindow {
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    fn prune(&mut self, now_ms: u64, window_ms: u64) {
        while let Some(&(id, seen_at)) = self.order.front() {
            if now_ms.saturating_sub(seen_at) < window_ms {
                break;
            }
            self.order.pop_front();
            self.seen.remove(&id);
        }
    }
}

/// Sliding replay window over message ids, tracked per source peer
pub struct ReplayWindow {
    window_ms: u64,
    peers: HashMap<NodeId, PeerWindow>,
}

impl ReplayWindow {
    pub fn new(window_ms: u64) -> Self {
        ReplayWindow {
            window_ms,
            peers: HashMap::new(),
        }
    }

    /// Record a sighting of `(source, msg_id)` at `now_ms`.
    ///
    /// Returns `WireError::Replay` if the pair was already seen within the
    /// window; the rejected sighting does not refresh the entry.
    pub fn check(&mut self, source: NodeId, msg_id: MessageId, now_ms: u64) -> Result<()> {
        let peer = self.peers.entry(source).or_insert_with(PeerWindow::new);
        peer.prune(now_ms, self.window_ms);

        if peer.seen.contains(&msg_id) {
            return Err(WireError::Replay {
                peer: source.to_string(),
                msg_id: msg_id.to_string(),
            });
        }

        peer.seen.insert(msg_id);
        peer.order.push_back((msg_id, now_ms));
        Ok(())
    }

    /// Drop expired entries and peers with no recent traffic.
    pub fn cleanup(&mut self, now_ms: u64) {
        let window_ms = self.window_ms;
        self.peers.retain(|_, peer| {
            peer.prune(now_ms, window_ms);
            !peer.order.is_empty()
        });
    }

    /// Forget everything about a peer (e.g. on drop).
    pub fn forget(&mut self, peer: &NodeId) {
        self.peers.remove(peer);
    }

    /// Total tracked entries across all peers.
    pub fn len(&self) -> usize {
        self.peers.values().map(|p| p.order.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}
