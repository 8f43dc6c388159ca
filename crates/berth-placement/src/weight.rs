//! Host weighting for placement decisions.
//!
//! Each candidate host gets:
//! - **free**: how many more same-sized instances it could accept
//!   (floor of the tightest resource);
//! - **weight**: `2 × existing instances of this release on the host` plus
//!   projected memory and CPU utilization after one more instance.
//!
//! Lower weight is preferred. The density term spreads a release across
//! hosts; the utilization terms favour idle hosts.

use std::cmp::Ordering;

use berth_agent::{Capacity, HostHealth};

use crate::request::PlacementRequest;

/// Live data for one candidate host, as gathered by the scheduler.
#[derive(Debug, Clone)]
pub struct HostSnapshot {
    pub host: String,
    /// Instances of the requested app/sha/env already on this host.
    pub existing: u32,
    pub health: HostHealth,
}

/// Weighted candidate. Computed per scheduling call, never stored.
#[derive(Debug, Clone, PartialEq)]
pub struct HostWeight {
    pub host: String,
    pub zone: String,
    /// Additional instances this host can accept.
    pub free: u64,
    /// Lower sorts first.
    pub weight: f64,
}

/// Why a host was left out of the candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    Unhealthy,
    NoContainerSlots,
    NoMemory,
    NoCpu,
}

/// `available / per_instance`, floored. A zero requirement imposes no bound.
fn fits(available: u64, per_instance: u64) -> u64 {
    if per_instance == 0 {
        u64::MAX
    } else {
        available / per_instance
    }
}

/// Projected utilization of `capacity` after adding `per_instance`.
fn projected(capacity: &Capacity, per_instance: u64) -> f64 {
    if capacity.total == 0 {
        1.0
    } else {
        (capacity.used + per_instance) as f64 / capacity.total as f64
    }
}

/// Number of additional instances of `req`'s size that fit in `health`.
pub fn free_slots(health: &HostHealth, req: &PlacementRequest) -> u64 {
    health
        .containers
        .free
        .min(fits(health.memory.free, u64::from(req.memory_mb)))
        .min(fits(health.cpu.free, u64::from(req.cpu_shares)))
}

/// Weigh one host, or say why it cannot take even one instance.
pub fn weigh(snapshot: &HostSnapshot, req: &PlacementRequest) -> Result<HostWeight, Rejection> {
    let health = &snapshot.health;
    let memory = u64::from(req.memory_mb);
    let cpu = u64::from(req.cpu_shares);

    if !health.status.is_ok() {
        return Err(Rejection::Unhealthy);
    }
    if health.containers.free == 0 {
        return Err(Rejection::NoContainerSlots);
    }
    if health.memory.free < memory {
        return Err(Rejection::NoMemory);
    }
    if health.cpu.free < cpu {
        return Err(Rejection::NoCpu);
    }

    let weight = 2.0 * f64::from(snapshot.existing)
        + projected(&health.memory, memory)
        + projected(&health.cpu, cpu);

    Ok(HostWeight {
        host: snapshot.host.clone(),
        zone: health.zone.clone(),
        free: free_slots(health, req),
        weight,
    })
}

/// Sort candidates ascending by weight; equal weights fall back to host name.
pub fn rank(mut hosts: Vec<HostWeight>) -> Vec<HostWeight> {
    hosts.sort_by(|a, b| match a.weight.total_cmp(&b.weight) {
        Ordering::Equal => a.host.cmp(&b.host),
        other => other,
    });
    hosts
}
