//! Beacon preprocessing: strongest-K filtering, the known-beacon
//! table, and the two mutually-exclusive temporal smoothing modes.

use crate::geometry::Location;
use crate::sensors::{Beacon, BeaconScan};
use std::collections::HashMap;
use std::collections::VecDeque;

/// A known beacon: its packed id and surveyed [`Location`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BleBeacon {
    pub id: u32,
    pub location: Location,
}

impl BleBeacon {
    pub fn new(major: u16, minor: u16, location: Location) -> Self {
        Self { id: crate::sensors::beacon_id(major, minor), location }
    }
}

/// The fixed-after-load set of known beacons, indexed by packed id.
#[derive(Debug, Clone, Default)]
pub struct BleBeaconTable {
    by_id: HashMap<u32, BleBeacon>,
}

impl BleBeaconTable {
    pub fn new(beacons: Vec<BleBeacon>) -> Self {
        Self { by_id: beacons.into_iter().map(|b| (b.id, b)).collect() }
    }

    pub fn get(&self, id: u32) -> Option<&BleBeacon> {
        self.by_id.get(&id)
    }

    pub fn is_known(&self, id: u32) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &BleBeacon> {
        self.by_id.values()
    }
}

/// Strongest-K beacon filter: drops the RSSI-unknown sentinel, then keeps
/// the `k` beacons with the highest (least negative) RSSI.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BeaconFilterParameters {
    pub n_strongest: usize,
}

impl Default for BeaconFilterParameters {
    fn default() -> Self {
        Self { n_strongest: 10 }
    }
}

#[derive(Debug, Clone)]
pub struct BeaconFilter {
    params: BeaconFilterParameters,
}

impl BeaconFilter {
    pub fn new(params: BeaconFilterParameters) -> Self {
        Self { params }
    }

    /// Returns the filtered scan. An empty result means the caller must
    /// skip the update entirely and report [`crate::error::Diagnostic::EmptyScan`].
    pub fn filter(&self, scan: &BeaconScan) -> BeaconScan {
        let mut beacons: Vec<Beacon> = scan.beacons.iter().copied().filter(|b| !b.is_sentinel()).collect();
        beacons.sort_by(|a, b| b.rssi.partial_cmp(&a.rssi).unwrap_or(std::cmp::Ordering::Equal));
        beacons.truncate(self.params.n_strongest);
        BeaconScan::new(beacons, scan.timestamp)
    }
}

/// Which of the two mutually-exclusive smoothing modes is active.
/// `RssiSmoothing` carries the ring of raw scans; `LocationSmoothing`
/// is a marker since its ring lives on particle states in [`crate::frontend`].
#[derive(Debug, Clone, PartialEq)]
pub enum SmoothingMode {
    RssiSmoothing { ring: VecDeque<BeaconScan>, capacity: usize },
    LocationSmoothing,
}

impl SmoothingMode {
    pub fn rssi_smoothing(capacity: usize) -> Self {
        SmoothingMode::RssiSmoothing { ring: VecDeque::new(), capacity: capacity.min(10) }
    }

    pub fn location_smoothing() -> Self {
        SmoothingMode::LocationSmoothing
    }

    /// For RSSI smoothing, folds `scan` into the ring and returns the
    /// synthesized scan (mean RSSI per beacon id across the ring) to submit
    /// to the filter. For location smoothing, returns `scan` unchanged — the
    /// averaging happens downstream over particle-state snapshots instead.
    pub fn submit(&mut self, scan: BeaconScan) -> BeaconScan {
        match self {
            SmoothingMode::RssiSmoothing { ring, capacity } => {
                ring.push_back(scan.clone());
                while ring.len() > *capacity {
                    ring.pop_front();
                }

                let mut sums: HashMap<u32, (f64, u32, u16, u16)> = HashMap::new();
                for s in ring.iter() {
                    for b in &s.beacons {
                        if b.is_sentinel() {
                            continue;
                        }
                        let entry = sums.entry(b.id()).or_insert((0.0, 0, b.major, b.minor));
                        entry.0 += b.rssi;
                        entry.1 += 1;
                    }
                }

                let beacons = sums
                    .into_values()
                    .map(|(sum, count, major, minor)| Beacon::new(major, minor, sum / count as f64))
                    .collect();
                BeaconScan::new(beacons, scan.timestamp)
            }
            SmoothingMode::LocationSmoothing => scan,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(pairs: &[(u16, u16, f64)], ts: i64) -> BeaconScan {
        BeaconScan::new(pairs.iter().map(|&(ma, mi, r)| Beacon::new(ma, mi, r)).collect(), ts)
    }

    #[test]
    fn filter_drops_sentinel_and_keeps_strongest_k() {
        let filter = BeaconFilter::new(BeaconFilterParameters { n_strongest: 2 });
        let s = scan(&[(1, 1, -80.0), (2, 1, 0.0), (3, 1, -40.0), (4, 1, -60.0)], 0);
        let filtered = filter.filter(&s);
        assert_eq!(filtered.beacons.len(), 2);
        assert_eq!(filtered.beacons[0].major, 3);
        assert_eq!(filtered.beacons[1].major, 4);
    }

    #[test]
    fn empty_after_filtering_when_all_sentinel() {
        let filter = BeaconFilter::new(BeaconFilterParameters::default());
        let s = scan(&[(1, 1, 0.0)], 0);
        assert!(filter.filter(&s).beacons.is_empty());
    }

    #[test]
    fn rssi_smoothing_averages_across_ring() {
        let mut mode = SmoothingMode::rssi_smoothing(2);
        mode.submit(scan(&[(1, 1, -60.0)], 0));
        let synthesized = mode.submit(scan(&[(1, 1, -40.0)], 1));
        let b = synthesized.beacons.iter().find(|b| b.major == 1).unwrap();
        assert!((b.rssi - (-50.0)).abs() < 1e-9);
    }

    #[test]
    fn rssi_smoothing_ring_is_bounded() {
        let mut mode = SmoothingMode::rssi_smoothing(1);
        mode.submit(scan(&[(1, 1, -80.0)], 0));
        let synthesized = mode.submit(scan(&[(1, 1, -40.0)], 1));
        let b = synthesized.beacons.iter().find(|b| b.major == 1).unwrap();
        assert!((b.rssi - (-40.0)).abs() < 1e-9, "ring of capacity 1 must drop the older scan");
    }

    #[test]
    fn known_beacon_table_resolves_by_id() {
        let table = BleBeaconTable::new(vec![BleBeacon::new(10, 1, Location::new(5.0, 5.0, 0.0, 1.0))]);
        assert!(table.is_known(crate::sensors::beacon_id(10, 1)));
        assert!(!table.is_known(crate::sensors::beacon_id(99, 99)));
    }
}
