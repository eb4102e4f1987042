//! DBSCAN over haversine distance. A neighborhood includes the point itself.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::candidates::CandidateOffset;
use crate::geo::Coordinate;

pub const DEFAULT_EPSILON_KM: f64 = 1.0;
pub const DEFAULT_MIN_POINTS: usize = 2;

/// One observed coordinate, tagged with the offset of the BSSID that
/// produced it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationHit {
    pub latitude: f64,
    pub longitude: f64,
    pub offset: CandidateOffset,
}

impl LocationHit {
    pub fn new(coord: Coordinate, offset: CandidateOffset) -> Self {
        Self {
            latitude: coord.latitude,
            longitude: coord.longitude,
            offset,
        }
    }

    pub fn coordinate(&self) -> Coordinate {
        Coordinate::new(self.latitude, self.longitude)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClusterParams {
    pub epsilon_km: f64,
    pub min_points: usize,
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self {
            epsilon_km: DEFAULT_EPSILON_KM,
            min_points: DEFAULT_MIN_POINTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Label {
    Unvisited,
    Noise,
    Member,
}

/// Returns clusters as index lists into `hits`, in discovery order.
/// Noise points appear in no cluster.
pub fn cluster(hits: &[LocationHit], params: ClusterParams) -> Vec<Vec<usize>> {
    let mut labels = vec![Label::Unvisited; hits.len()];
    let mut clusters = Vec::new();

    for i in 0..hits.len() {
        if labels[i] != Label::Unvisited {
            continue;
        }
        let neighbors = region(hits, i, params.epsilon_km);
        if neighbors.len() < params.min_points {
            labels[i] = Label::Noise;
            continue;
        }

        labels[i] = Label::Member;
        let mut members = vec![i];
        let mut queue: VecDeque<usize> = neighbors.into_iter().filter(|&j| j != i).collect();

        while let Some(j) = queue.pop_front() {
            match labels[j] {
                Label::Member => {}
                // Border point: reachable, but does not expand the cluster.
                Label::Noise => {
                    labels[j] = Label::Member;
                    members.push(j);
                }
                Label::Unvisited => {
                    labels[j] = Label::Member;
                    members.push(j);
                    let next = region(hits, j, params.epsilon_km);
                    if next.len() >= params.min_points {
                        queue.extend(next);
                    }
                }
            }
        }
        clusters.push(members);
    }
    clusters
}

/// Pick one trusted hit.
///
/// 1. Largest cluster, first discovered on ties.
/// 2. Without clusters, the first raw hit with offset `0`, if any.
/// 3. Inside the chosen cluster, the smallest `|offset|`, first found on ties.
pub fn cluster_and_select(hits: &[LocationHit], params: ClusterParams) -> Option<LocationHit> {
    if hits.is_empty() {
        return None;
    }

    let clusters = cluster(hits, params);
    let mut best: Option<&Vec<usize>> = None;
    for c in &clusters {
        if best.map_or(true, |b| c.len() > b.len()) {
            best = Some(c);
        }
    }

    let Some(best) = best else {
        return hits.iter().find(|h| h.offset == 0).copied();
    };

    let mut selected: Option<&LocationHit> = None;
    for &idx in best {
        let hit = &hits[idx];
        if selected.map_or(true, |s| hit.offset.unsigned_abs() < s.offset.unsigned_abs()) {
            selected = Some(hit);
        }
    }
    selected.copied()
}

fn region(hits: &[LocationHit], idx: usize, epsilon_km: f64) -> Vec<usize> {
    let center = hits[idx].coordinate();
    hits.iter()
        .enumerate()
        .filter(|(_, h)| center.distance_km(&h.coordinate()) <= epsilon_km)
        .map(|(j, _)| j)
        .collect()
}
