//! Zone partitioning and capacity checks over ranked hosts.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::{PlacementError, PlacementResult};
use crate::request::PlacementRequest;
use crate::weight::HostWeight;

/// Ranked hosts of one zone and their summed free slots.
#[derive(Debug, Clone, PartialEq)]
pub struct ZonePlan {
    pub zone: String,
    /// Preference order; lower weight first.
    pub hosts: Vec<HostWeight>,
    pub free: u64,
}

impl ZonePlan {
    pub fn host_names(&self) -> Vec<&str> {
        self.hosts.iter().map(|h| h.host.as_str()).collect()
    }
}

/// The scheduler's answer: one plan per requested zone, in request order.
#[derive(Debug, Clone, PartialEq)]
pub struct HostSelection {
    pub zones: Vec<ZonePlan>,
}

impl HostSelection {
    pub fn zone(&self, name: &str) -> Option<&ZonePlan> {
        self.zones.iter().find(|z| z.zone == name)
    }
}

/// Group ranked hosts by zone, keeping their relative order.
pub fn partition(ranked: Vec<HostWeight>) -> BTreeMap<String, ZonePlan> {
    let mut zones: BTreeMap<String, ZonePlan> = BTreeMap::new();
    for host in ranked {
        let plan = zones.entry(host.zone.clone()).or_insert_with(|| ZonePlan {
            zone: host.zone.clone(),
            hosts: Vec::new(),
            free: 0,
        });
        plan.free = plan.free.saturating_add(host.free);
        plan.hosts.push(host);
    }
    zones
}

/// Pick the requested zones out of `zones`, failing on the first zone that
/// is missing or cannot hold `req.instances`.
pub fn check(req: &PlacementRequest, mut zones: BTreeMap<String, ZonePlan>) -> PlacementResult<HostSelection> {
    if req.zones.is_empty() {
        return Err(PlacementError::NoZones { app: req.app.clone() });
    }

    let requested = u64::from(req.instances);
    let mut selected = Vec::with_capacity(req.zones.len());
    for zone in &req.zones {
        let Some(plan) = zones.remove(zone) else {
            return Err(PlacementError::NoHostsInZone {
                app: req.app.clone(),
                zone: zone.clone(),
            });
        };
        if plan.free < requested {
            return Err(PlacementError::InsufficientCapacity {
                app: req.app.clone(),
                zone: zone.clone(),
                requested,
                available: plan.free,
            });
        }
        debug!(app = %req.app, %zone, hosts = plan.hosts.len(), free = plan.free, "zone has capacity");
        selected.push(plan);
    }
    Ok(HostSelection { zones: selected })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hw(host: &str, zone: &str, free: u64, weight: f64) -> HostWeight {
        HostWeight {
            host: host.to_string(),
            zone: zone.to_string(),
            free,
            weight,
        }
    }

    fn req(instances: u32, zones: &[&str]) -> PlacementRequest {
        PlacementRequest {
            app: "web".to_string(),
            sha: "abc".to_string(),
            env: "prod".to_string(),
            instances,
            cpu_shares: 1,
            memory_mb: 1,
            zones: zones.iter().map(|z| z.to_string()).collect(),
            exclude: Default::default(),
        }
    }

    fn ranked() -> Vec<HostWeight> {
        vec![
            hw("b1", "zone-b", 2, 0.1),
            hw("a1", "zone-a", 1, 0.2),
            hw("b2", "zone-b", 4, 0.3),
            hw("a2", "zone-a", 1, 0.4),
        ]
    }

    #[test]
    fn partition_keeps_order_and_sums_free() {
        let zones = partition(ranked());
        assert_eq!(zones["zone-a"].host_names(), vec!["a1", "a2"]);
        assert_eq!(zones["zone-a"].free, 2);
        assert_eq!(zones["zone-b"].host_names(), vec!["b1", "b2"]);
        assert_eq!(zones["zone-b"].free, 6);
    }

    #[test]
    fn check_returns_zones_in_request_order() {
        let selection = check(&req(2, &["zone-b", "zone-a"]), partition(ranked())).unwrap();
        let order: Vec<&str> = selection.zones.iter().map(|z| z.zone.as_str()).collect();
        assert_eq!(order, vec!["zone-b", "zone-a"]);
        assert!(selection.zone("zone-a").is_some());
    }

    #[test]
    fn check_names_short_zone() {
        let err = check(&req(3, &["zone-b", "zone-a"]), partition(ranked())).unwrap_err();
        match err {
            PlacementError::InsufficientCapacity {
                app,
                zone,
                requested,
                available,
            } => {
                assert_eq!(app, "web");
                assert_eq!(zone, "zone-a");
                assert_eq!(requested, 3);
                assert_eq!(available, 2);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn check_rejects_zone_without_hosts() {
        let err = check(&req(1, &["zone-a", "zone-c"]), partition(ranked())).unwrap_err();
        assert!(matches!(err, PlacementError::NoHostsInZone { ref zone, .. } if zone == "zone-c"));
    }

    #[test]
    fn check_rejects_empty_zone_list() {
        assert!(matches!(
            check(&req(1, &[]), partition(ranked())),
            Err(PlacementError::NoZones { .. })
        ));
    }
}
