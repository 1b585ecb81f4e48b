//! Peer reputation
//!
//! Reputation is a pure function of recent heartbeat regularity and
//! served-session outcomes. The Router reports forwarding outcomes; peers
//! never report their own score.

use serde::{Deserialize, Serialize};

/// Reputation tracking for one peer, scored in [0, 1]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerReputation {
    /// Sessions this peer served to completion
    pub successful_sessions: u64,

    /// Forwarding failures attributed to this peer
    pub failed_sessions: u64,

    /// Heartbeats received on schedule
    pub heartbeats_on_time: u64,

    /// Keepalive windows the peer missed
    pub heartbeats_missed: u64,

    score: f64,
}

impl PeerReputation {
    /// Below this the peer is not considered for routing
    pub const MIN_TRUSTWORTHY: f64 = 0.3;

    pub fn new() -> Self {
        PeerReputation {
            successful_sessions: 0,
            failed_sessions: 0,
            heartbeats_on_time: 0,
            heartbeats_missed: 0,
            score: 0.5, // neutral until there is history
        }
    }

    /// Record a session this peer served successfully.
    pub fn record_session_success(&mut self) {
        self.successful_sessions += 1;
        self.update_score();
    }

    /// Record a forwarding failure attributed to this peer.
    pub fn record_session_failure(&mut self) {
        self.failed_sessions += 1;
        self.update_score();
    }

    /// Record an on-schedule heartbeat.
    pub fn record_heartbeat(&mut self) {
        self.heartbeats_on_time += 1;
        self.update_score();
    }

    /// Record a missed keepalive window.
    pub fn record_missed_heartbeat(&mut self) {
        self.heartbeats_missed += 1;
        self.update_score();
    }

    fn update_score(&mut self) {
        // Session success rate (60% weight)
        let total_sessions = self.successful_sessions + self.failed_sessions;
        let session_rate = if total_sessions > 0 {
            self.successful_sessions as f64 / total_sessions as f64
        } else {
            0.5
        };

        // Heartbeat regularity (40% weight)
        let total_beats = self.heartbeats_on_time + self.heartbeats_missed;
        let beat_rate = if total_beats > 0 {
            self.heartbeats_on_time as f64 / total_beats as f64
        } else {
            0.5
        };

        self.score = session_rate * 0.6 + beat_rate * 0.4;
    }

    /// Current score in [0, 1].
    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn is_trustworthy(&self) -> bool {
        self.score >= Self::MIN_TRUSTWORTHY
    }
}

impl Default for PeerReputation {
    fn default() -> Self {
        Self::new()
    }
}
