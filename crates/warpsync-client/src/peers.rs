//! What this client knows about the other players

use std::collections::{BTreeMap, BTreeSet};

use warpsync_core::SubspaceId;
use warpsync_wire::WarpRate;

/// Last warp announcement of a peer
pub type PeerWarpRate = WarpRate;

/// Peer warp rates, reported skew rates, and subspace membership, keyed by
/// player name
#[derive(Debug, Default)]
pub struct PeerTable {
    names: BTreeSet<String>,
    warp_rates: BTreeMap<String, PeerWarpRate>,
    skews: BTreeMap<String, f32>,
    subspaces: BTreeMap<String, SubspaceId>,
}

impl PeerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Note a connected peer
    pub fn peer_joined(&mut self, name: &str) {
        if !self.names.contains(name) {
            self.names.insert(name.to_string());
        }
    }

    /// Forget a departed peer everywhere
    pub fn remove(&mut self, name: &str) {
        self.names.remove(name);
        self.warp_rates.remove(name);
        self.skews.remove(name);
        self.subspaces.remove(name);
    }

    /// Number of other connected players
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    /// Replace a peer's warp announcement. Every field is overwritten, so
    /// applying the same announcement twice changes nothing.
    pub fn apply_warp(&mut self, name: &str, rate: PeerWarpRate) {
        self.peer_joined(name);
        self.warp_rates.insert(name.to_string(), rate);
    }

    pub fn warp_rate(&self, name: &str) -> Option<&PeerWarpRate> {
        self.warp_rates.get(name)
    }

    pub fn set_skew(&mut self, name: &str, rate: f32) {
        self.peer_joined(name);
        self.skews.insert(name.to_string(), rate);
    }

    pub fn skew(&self, name: &str) -> Option<f32> {
        self.skews.get(name).copied()
    }

    pub fn set_subspace(&mut self, name: &str, subspace: SubspaceId) {
        self.peer_joined(name);
        self.subspaces.insert(name.to_string(), subspace);
    }

    pub fn subspace_of(&self, name: &str) -> Option<SubspaceId> {
        self.subspaces.get(name).copied()
    }

    pub fn subspaces(&self) -> impl Iterator<Item = (&str, SubspaceId)> {
        self.subspaces.iter().map(|(n, s)| (n.as_str(), *s))
    }

    /// Lowest announced rate index among physics-warp peers and among
    /// regular-warp peers. A peer that has not announced yet counts as
    /// regular warp at index 0.
    pub fn lowest_rate_indices(&self) -> (Option<i32>, Option<i32>) {
        let mut physics: Option<i32> = None;
        let mut regular: Option<i32> = None;
        for name in &self.names {
            let (is_physics, index) = match self.warp_rates.get(name) {
                Some(rate) => (rate.is_physics_warp, rate.rate_index),
                None => (false, 0),
            };
            let bucket = if is_physics { &mut physics } else { &mut regular };
            *bucket = Some(bucket.map_or(index, |m| m.min(index)));
        }
        (physics, regular)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use warpsync_core::ClockTicks;

    fn rate(physics: bool, index: i32) -> PeerWarpRate {
        WarpRate {
            is_physics_warp: physics,
            rate_index: index,
            epoch_clock: ClockTicks::new(10),
            epoch_time: 20.0,
        }
    }

    #[test]
    fn test_replayed_warp_is_idempotent() {
        let mut peers = PeerTable::new();
        peers.apply_warp("bob", rate(false, 4));
        let first = *peers.warp_rate("bob").unwrap();
        peers.apply_warp("bob", rate(false, 4));
        peers.apply_warp("bob", rate(false, 4));
        assert_eq!(*peers.warp_rate("bob").unwrap(), first);
        assert_eq!(peers.len(), 1);
    }

    #[test]
    fn test_lowest_buckets_are_separate() {
        let mut peers = PeerTable::new();
        assert_eq!(peers.lowest_rate_indices(), (None, None));
        peers.apply_warp("a", rate(false, 5));
        peers.apply_warp("b", rate(false, 2));
        peers.apply_warp("c", rate(true, 3));
        peers.apply_warp("d", rate(true, 1));
        assert_eq!(peers.lowest_rate_indices(), (Some(1), Some(2)));
    }

    #[test]
    fn test_silent_peer_counts_as_real_time() {
        let mut peers = PeerTable::new();
        peers.peer_joined("quiet");
        assert!(peers.contains("quiet"));
        assert_eq!(peers.lowest_rate_indices(), (None, Some(0)));

        peers.apply_warp("fast", rate(false, 3));
        peers.apply_warp("phys", rate(true, 2));
        assert_eq!(peers.lowest_rate_indices(), (Some(2), Some(0)));

        peers.apply_warp("quiet", rate(false, 5));
        assert_eq!(peers.lowest_rate_indices(), (Some(2), Some(3)));
    }

    #[test]
    fn test_remove_clears_everything() {
        let mut peers = PeerTable::new();
        peers.apply_warp("bob", rate(true, 1));
        peers.set_skew("bob", 0.9);
        peers.set_subspace("bob", SubspaceId::new(2));
        peers.remove("bob");
        assert!(peers.is_empty());
        assert!(peers.warp_rate("bob").is_none());
        assert!(peers.skew("bob").is_none());
        assert!(peers.subspace_of("bob").is_none());
    }

    proptest! {
        #[test]
        fn prop_lowest_matches_bucket_minimum(
            announced in proptest::collection::vec((any::<bool>(), 0i32..8), 0..12)
        ) {
            let mut peers = PeerTable::new();
            for (i, (physics, index)) in announced.iter().enumerate() {
                peers.apply_warp(&format!("p{i}"), rate(*physics, *index));
            }
            let physics = announced.iter().filter(|(p, _)| *p).map(|(_, i)| *i).min();
            let regular = announced.iter().filter(|(p, _)| !*p).map(|(_, i)| *i).min();
            prop_assert_eq!(peers.lowest_rate_indices(), (physics, regular));
        }
    }
}
