//! Route metadata shared across the routing plane and the wire
//!
//! Routes and route requirements travel inside `RouteResponse` /
//! `RouteRequest` payloads, so they live here with the other wire types.

use blake2::{Blake2b512, Digest};
use serde::{Deserialize, Serialize};

use crate::types::{NodeId, RouteId};

/// Path selection algorithm requested by a client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouteAlgorithm {
    /// Single hop maximizing `bandwidth - latency`
    Shortest,
    /// Single hop with minimum latency
    LowestLatency,
    /// Single hop with maximum bandwidth
    HighestBandwidth,
    /// Weighted blend of bandwidth, latency, reputation and uptime
    #[default]
    Balanced,
}

/// Optional constraints a returned route must satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RouteRequirements {
    pub min_bandwidth: Option<f64>,
    pub max_latency: Option<f64>,
    pub max_cost: Option<f64>,
    /// When non-empty, every hop must sit in one of these regions
    pub regions: Vec<String>,
    pub require_encryption: bool,
    pub algorithm: RouteAlgorithm,
}

impl RouteRequirements {
    /// Deterministic 16-byte digest used as the route-cache key component.
    ///
    /// Floats are hashed through their bit patterns so equal requirement
    /// values always collide and nothing else does.
    pub fn canonical_hash(&self) -> [u8; 16] {
        let mut hasher = Blake2b512::new();

        for opt in [self.min_bandwidth, self.max_latency, self.max_cost] {
            match opt {
                Some(v) => {
                    hasher.update([1u8]);
                    hasher.update(v.to_bits().to_be_bytes());
                }
                None => hasher.update([0u8]),
            }
        }
        hasher.update((self.regions.len() as u32).to_be_bytes());
        for region in &self.regions {
            hasher.update((region.len() as u32).to_be_bytes());
            hasher.update(region.as_bytes());
        }
        hasher.update([self.require_encryption as u8]);
        hasher.update([self.algorithm as u8]);

        let hash = hasher.finalize();
        let mut out = [0u8; 16];
        out.copy_from_slice(&hash[..16]);
        out
    }
}

/// An ordered sequence of relay hops with its computed characteristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    pub route_id: RouteId,
    /// Ordered hops, length >= 1
    pub hops: Vec<NodeId>,
    pub latency_ms: f64,
    pub bandwidth_mbps: f64,
    pub cost: f64,
    pub encrypted: bool,
    /// Unix time in milliseconds after which the route is invalid
    pub expires_at: u64,
    pub bytes_used: u64,
}

impl Route {
    /// A route whose deadline has passed is invalid; `expires_at == now`
    /// counts as expired.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.expires_at <= now_ms
    }

    /// Whether the route references the given node as a hop.
    pub fn contains_hop(&self, node: &NodeId) -> bool {
        self.hops.contains(node)
    }
}
