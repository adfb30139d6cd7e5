//! Fixed-size slot assignment for controlled vehicles

use std::collections::VecDeque;

use crate::vehicles::VehicleRegistry;

/// Maps a variable population of controlled vehicles onto `num_rl` slots.
///
/// An occupant keeps its slot until it leaves the network. Vehicles that
/// arrive while every slot is taken wait in a FIFO queue and fill slots as
/// they open up.
#[derive(Debug, Clone)]
pub struct ControlledAgentTracker {
    slots: Vec<Option<String>>,
    queue: VecDeque<String>,
    by_position: bool,
}

impl ControlledAgentTracker {
    /// Tracker with `num_rl` empty slots
    #[must_use]
    pub fn new(num_rl: usize) -> Self {
        Self {
            slots: vec![None; num_rl],
            queue: VecDeque::new(),
            by_position: false,
        }
    }

    /// Admit vehicles that appear in the same step rearmost first instead
    /// of in readback order
    #[must_use]
    pub fn with_position_order(mut self, by_position: bool) -> Self {
        self.by_position = by_position;
        self
    }

    /// Number of slots
    #[must_use]
    pub fn num_rl(&self) -> usize {
        self.slots.len()
    }

    /// Queue a newly seen vehicle; no-op if it is already tracked
    pub fn admit(&mut self, id: &str) {
        if self.slot_of(id).is_none() && !self.queue.iter().any(|q| q == id) {
            self.queue.push_back(id.to_string());
        }
    }

    /// Forget a vehicle that left the network
    pub fn evict(&mut self, id: &str) {
        self.queue.retain(|q| q != id);
        for slot in &mut self.slots {
            if slot.as_deref() == Some(id) {
                *slot = None;
            }
        }
    }

    /// Move queued vehicles into free slots, lowest slot first
    pub fn rebalance(&mut self) {
        for slot in self.slots.iter_mut().filter(|s| s.is_none()) {
            match self.queue.pop_front() {
                Some(id) => *slot = Some(id),
                None => break,
            }
        }
    }

    /// Bring the tracker in line with the registry's controlled vehicles and
    /// mark the occupants' neighbours as observed
    pub fn sync(&mut self, registry: &mut VehicleRegistry) {
        let present: Vec<String> = if self.by_position {
            registry
                .ids_by_position()
                .into_iter()
                .filter(|id| registry.get(id).is_ok_and(|v| v.is_rl()))
                .map(str::to_string)
                .collect()
        } else {
            registry.rl_ids().map(str::to_string).collect()
        };
        for id in &present {
            self.admit(id);
        }
        let gone: Vec<String> = self
            .slots
            .iter()
            .flatten()
            .chain(self.queue.iter())
            .filter(|id| !registry.contains(id))
            .cloned()
            .collect();
        for id in &gone {
            self.evict(id);
        }
        self.rebalance();
        self.mark_neighbors(registry);
    }

    fn mark_neighbors(&self, registry: &mut VehicleRegistry) {
        let seen: Vec<String> = self
            .slots
            .iter()
            .flatten()
            .filter_map(|id| registry.get(id).ok())
            .flat_map(|v| [v.leader.clone(), v.follower.clone()])
            .flatten()
            .collect();
        for id in &seen {
            registry.set_observed(id);
        }
    }

    /// Empty every slot and the queue
    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.queue.clear();
    }

    /// Vehicle in `slot`
    #[must_use]
    pub fn occupant(&self, slot: usize) -> Option<&str> {
        self.slots.get(slot).and_then(|s| s.as_deref())
    }

    /// Slot held by `id`
    #[must_use]
    pub fn slot_of(&self, id: &str) -> Option<usize> {
        self.slots.iter().position(|s| s.as_deref() == Some(id))
    }

    /// `(slot, id)` pairs of occupied slots in slot order
    pub fn occupied(&self) -> impl Iterator<Item = (usize, &str)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_deref().map(|id| (i, id)))
    }

    /// Number of occupied slots
    #[must_use]
    pub fn active(&self) -> usize {
        self.slots.iter().flatten().count()
    }

    /// Vehicles waiting for a slot, oldest first
    pub fn queued(&self) -> impl Iterator<Item = &str> {
        self.queue.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vehicles::testing::snapshot;
    use crate::vehicles::VehicleKind;
    use proptest::prelude::*;

    #[test]
    fn fills_slots_in_arrival_order() {
        let mut tracker = ControlledAgentTracker::new(2);
        tracker.admit("a");
        tracker.admit("b");
        tracker.admit("c");
        tracker.admit("a");
        tracker.rebalance();
        assert_eq!(tracker.occupied().collect::<Vec<_>>(), vec![(0, "a"), (1, "b")]);
        assert_eq!(tracker.queued().collect::<Vec<_>>(), vec!["c"]);
    }

    #[test]
    fn backfills_without_moving_others() {
        let mut tracker = ControlledAgentTracker::new(3);
        for id in ["a", "b", "c", "d"] {
            tracker.admit(id);
        }
        tracker.rebalance();
        tracker.evict("a");
        tracker.rebalance();
        assert_eq!(tracker.occupant(0), Some("d"));
        assert_eq!(tracker.slot_of("b"), Some(1));
        assert_eq!(tracker.slot_of("c"), Some(2));
    }

    #[test]
    fn missing_and_duplicate_ids_are_noops() {
        let mut tracker = ControlledAgentTracker::new(1);
        tracker.evict("ghost");
        tracker.rebalance();
        assert_eq!(tracker.active(), 0);
    }

    #[test]
    fn sync_follows_registry_and_marks_neighbors() {
        let mut registry = VehicleRegistry::new(1);
        registry.refresh(
            vec![
                snapshot("h0", VehicleKind::Human, "1", 0.0, 5.0, 0),
                snapshot("rl0", VehicleKind::Rl, "1", 20.0, 5.0, 0),
                snapshot("h1", VehicleKind::Human, "1", 40.0, 5.0, 0),
                snapshot("h2", VehicleKind::Human, "1", 80.0, 5.0, 0),
            ],
            0,
        );
        let mut tracker = ControlledAgentTracker::new(2);
        tracker.sync(&mut registry);
        assert_eq!(tracker.occupant(0), Some("rl0"));
        assert!(registry.is_observed("h0"));
        assert!(registry.is_observed("h1"));
        assert!(!registry.is_observed("h2"));

        registry.refresh(vec![snapshot("h2", VehicleKind::Human, "1", 85.0, 5.0, 0)], 1);
        tracker.sync(&mut registry);
        assert_eq!(tracker.active(), 0);
    }

    #[test]
    fn position_order_admits_rearmost_first() {
        let mut registry = VehicleRegistry::new(1);
        registry.refresh(
            vec![
                snapshot("front", VehicleKind::Rl, "1", 50.0, 5.0, 0),
                snapshot("back", VehicleKind::Rl, "1", 10.0, 5.0, 0),
            ],
            0,
        );
        let mut tracker = ControlledAgentTracker::new(2).with_position_order(true);
        tracker.sync(&mut registry);
        assert_eq!(tracker.occupant(0), Some("back"));
        assert_eq!(tracker.occupant(1), Some("front"));
    }

    proptest! {
        #[test]
        fn occupants_keep_their_slot_until_exit(
            events in prop::collection::vec((0usize..8, any::<bool>()), 1..60),
        ) {
            let mut tracker = ControlledAgentTracker::new(3);
            for (vehicle, arrive) in events {
                let id = format!("rl_{vehicle}");
                let before: Vec<(usize, String)> = tracker
                    .occupied()
                    .map(|(s, v)| (s, v.to_string()))
                    .collect();
                if arrive {
                    tracker.admit(&id);
                } else {
                    tracker.evict(&id);
                }
                tracker.rebalance();
                for (slot, occupant) in before {
                    if occupant != id || arrive {
                        prop_assert_eq!(tracker.occupant(slot), Some(occupant.as_str()));
                    }
                }
                prop_assert!(tracker.active() <= 3);
            }
        }
    }
}
