//! Path optimizer
//!
//! A pure function from candidate relays and requirements to a chosen hop.
//! All four algorithms are deterministic for the same input; score ties
//! break toward the lexicographically lower node id.

use networkneuron_protocol::route::{RouteAlgorithm, RouteRequirements};
use networkneuron_protocol::types::BandwidthProfile;
use networkneuron_protocol::NodeId;

use crate::error::{Result, RouteError};

/// A relay considered for routing
#[derive(Debug, Clone)]
pub struct Candidate {
    pub node_id: NodeId,
    pub bandwidth: BandwidthProfile,
    /// Reputation score in [0, 1]
    pub reputation: f64,
    pub region: Option<String>,
}

impl Candidate {
    /// The bandwidth figure used for scoring and filtering.
    fn bandwidth_mbps(&self) -> f64 {
        self.bandwidth.download_mbps
    }

    /// Per-hop cost used for the route's cost field and `max_cost` filter.
    pub fn cost(&self) -> f64 {
        1.0 + self.bandwidth.latency_ms / 1000.0
    }
}

fn passes_filters(candidate: &Candidate, req: &RouteRequirements) -> bool {
    if let Some(min_bw) = req.min_bandwidth {
        if candidate.bandwidth_mbps() < min_bw {
            return false;
        }
    }
    if let Some(max_lat) = req.max_latency {
        if candidate.bandwidth.latency_ms > max_lat {
            return false;
        }
    }
    if let Some(max_cost) = req.max_cost {
        if candidate.cost() > max_cost {
            return false;
        }
    }
    if !req.regions.is_empty() {
        match &candidate.region {
            Some(region) if req.regions.contains(region) => {}
            _ => return false,
        }
    }
    true
}

fn score(candidate: &Candidate, algorithm: RouteAlgorithm) -> f64 {
    let bw = candidate.bandwidth_mbps();
    let lat = candidate.bandwidth.latency_ms;

    match algorithm {
        RouteAlgorithm::Shortest => bw - lat,
        RouteAlgorithm::LowestLatency => -lat,
        RouteAlgorithm::HighestBandwidth => bw,
        RouteAlgorithm::Balanced => {
            let bw_norm = (bw / 100.0).min(1.0);
            let lat_norm = (lat / 1000.0).min(1.0);
            let rep_norm = candidate.reputation.clamp(0.0, 1.0);
            let uptime_norm = (candidate.bandwidth.uptime_pct / 100.0).clamp(0.0, 1.0);

            0.4 * bw_norm + 0.3 * (1.0 - lat_norm) + 0.2 * rep_norm + 0.1 * uptime_norm
        }
    }
}

/// Select the best single-hop relay for the given requirements.
///
/// Returns `RouteError::NotFound` when no candidate survives the hard
/// filters (or none were offered).
pub fn select_route(candidates: &[Candidate], req: &RouteRequirements) -> Result<Candidate> {
    let mut eligible: Vec<&Candidate> = candidates
        .iter()
        .filter(|c| passes_filters(c, req))
        .collect();

    if eligible.is_empty() {
        return Err(RouteError::NotFound);
    }

    // Deterministic tie-break: walk in ascending node-id order and only
    // replace the best on a strictly higher score.
    eligible.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    let mut best = eligible[0];
    let mut best_score = score(best, req.algorithm);
    for candidate in &eligible[1..] {
        let s = score(candidate, req.algorithm);
        if s > best_score {
            best = candidate;
            best_score = s;
        }
    }

    Ok(best.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use networkneuron_protocol::types::NODE_ID_SIZE;

    fn node(byte: u8) -> NodeId {
        NodeId::from_bytes([byte; NODE_ID_SIZE])
    }

    fn candidate(byte: u8, bw: f64, lat: f64, rep: f64) -> Candidate {
        Candidate {
            node_id: node(byte),
            bandwidth: BandwidthProfile {
                upload_mbps: bw,
                download_mbps: bw,
                latency_ms: lat,
                uptime_pct: 99.0,
                capacity_mbps: bw,
            },
            reputation: rep,
            region: Some("eu-west".to_string()),
        }
    }

    #[test]
    fn test_empty_candidate_set() {
        let result = select_route(&[], &RouteRequirements::default());
        assert_eq!(result.unwrap_err(), RouteError::NotFound);
    }

    #[test]
    fn test_balanced_picks_best_blend() {
        // The worked example: bw 200 / lat 25 / rep .98 must win over
        // bw 100 / lat 50 / rep .95 and bw 50 / lat 100 / rep .85
        let candidates = vec![
            candidate(1, 100.0, 50.0, 0.95),
            candidate(2, 50.0, 100.0, 0.85),
            candidate(3, 200.0, 25.0, 0.98),
        ];

        let chosen = select_route(&candidates, &RouteRequirements::default()).unwrap();
        assert_eq!(chosen.node_id, node(3));
    }

    #[test]
    fn test_lowest_latency() {
        let candidates = vec![
            candidate(1, 500.0, 40.0, 0.9),
            candidate(2, 10.0, 5.0, 0.5),
        ];

        let req = RouteRequirements {
            algorithm: RouteAlgorithm::LowestLatency,
            ..Default::default()
        };
        assert_eq!(select_route(&candidates, &req).unwrap().node_id, node(2));
    }

    #[test]
    fn test_highest_bandwidth() {
        let candidates = vec![
            candidate(1, 500.0, 400.0, 0.2),
            candidate(2, 10.0, 5.0, 1.0),
        ];

        let req = RouteRequirements {
            algorithm: RouteAlgorithm::HighestBandwidth,
            ..Default::default()
        };
        assert_eq!(select_route(&candidates, &req).unwrap().node_id, node(1));
    }

    #[test]
    fn test_shortest_maximizes_bandwidth_minus_latency() {
        let candidates = vec![
            candidate(1, 100.0, 90.0, 0.9), // 10
            candidate(2, 60.0, 10.0, 0.9),  // 50
        ];

        let req = RouteRequirements {
            algorithm: RouteAlgorithm::Shortest,
            ..Default::default()
        };
        assert_eq!(select_route(&candidates, &req).unwrap().node_id, node(2));
    }

    #[test]
    fn test_min_bandwidth_filter() {
        let candidates = vec![
            candidate(1, 30.0, 5.0, 1.0),
            candidate(2, 80.0, 200.0, 0.4),
        ];

        let req = RouteRequirements {
            min_bandwidth: Some(50.0),
            algorithm: RouteAlgorithm::LowestLatency,
            ..Default::default()
        };
        // Node 1 is faster but filtered out
        assert_eq!(select_route(&candidates, &req).unwrap().node_id, node(2));
    }

    #[test]
    fn test_max_latency_filter_excludes_all() {
        let candidates = vec![candidate(1, 100.0, 500.0, 0.9)];

        let req = RouteRequirements {
            max_latency: Some(100.0),
            ..Default::default()
        };
        assert_eq!(
            select_route(&candidates, &req).unwrap_err(),
            RouteError::NotFound
        );
    }

    #[test]
    fn test_region_filter() {
        let mut us_east = candidate(1, 300.0, 10.0, 1.0);
        us_east.region = Some("us-east".to_string());
        let eu = candidate(2, 50.0, 80.0, 0.8);

        let req = RouteRequirements {
            regions: vec!["eu-west".to_string()],
            ..Default::default()
        };
        assert_eq!(
            select_route(&[us_east, eu], &req).unwrap().node_id,
            node(2)
        );
    }

    #[test]
    fn test_no_region_excluded_when_regions_required() {
        let mut unknown = candidate(1, 300.0, 10.0, 1.0);
        unknown.region = None;

        let req = RouteRequirements {
            regions: vec!["eu-west".to_string()],
            ..Default::default()
        };
        assert_eq!(
            select_route(&[unknown], &req).unwrap_err(),
            RouteError::NotFound
        );
    }

    #[test]
    fn test_tie_breaks_to_lower_node_id() {
        // Identical profiles: equal scores under every algorithm
        let a = candidate(7, 100.0, 50.0, 0.9);
        let b = candidate(3, 100.0, 50.0, 0.9);

        for algorithm in [
            RouteAlgorithm::Shortest,
            RouteAlgorithm::LowestLatency,
            RouteAlgorithm::HighestBandwidth,
            RouteAlgorithm::Balanced,
        ] {
            let req = RouteRequirements {
                algorithm,
                ..Default::default()
            };
            let chosen = select_route(&[a.clone(), b.clone()], &req).unwrap();
            assert_eq!(chosen.node_id, node(3), "algorithm {:?}", algorithm);
        }
    }

    #[test]
    fn test_deterministic_given_same_input() {
        let candidates = vec![
            candidate(1, 100.0, 50.0, 0.95),
            candidate(2, 50.0, 100.0, 0.85),
            candidate(3, 200.0, 25.0, 0.98),
        ];
        let req = RouteRequirements::default();

        let first = select_route(&candidates, &req).unwrap();
        for _ in 0..10 {
            assert_eq!(select_route(&candidates, &req).unwrap().node_id, first.node_id);
        }
    }

    #[test]
    fn test_balanced_normalization_caps() {
        // Bandwidth over 100 and latency over 1000 are capped, so a huge
        // bandwidth cannot dominate reputation forever
        let monster = candidate(9, 10_000.0, 2_000.0, 0.0);
        let steady = candidate(1, 100.0, 10.0, 1.0);

        let chosen = select_route(&[monster, steady], &RouteRequirements::default()).unwrap();
        assert_eq!(chosen.node_id, node(1));
    }
}
