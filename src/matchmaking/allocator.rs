//! Atomic pair-room allocation
//!
//! The store executes the allocation as one indivisible operation, so any
//! two players and room handed out here are never handed out again by a
//! concurrent worker. Entries come off the tail of each queue (most recently
//! enqueued first); that order is part of the observable behavior and is
//! pinned by tests rather than silently turned into FIFO.

use crate::error::Result;
use crate::metrics::MetricsCollector;
use crate::store::CoordinationStore;
use crate::types::PairAllocation;
use std::sync::Arc;
use tracing::{debug, trace};

/// Removes two waiting players and one available room together, or nothing
#[derive(Clone)]
pub struct PairRoomAllocator {
    store: Arc<dyn CoordinationStore>,
    metrics: Arc<MetricsCollector>,
}

impl PairRoomAllocator {
    pub fn new(store: Arc<dyn CoordinationStore>, metrics: Arc<MetricsCollector>) -> Self {
        Self { store, metrics }
    }

    /// Try to take a pair and a room; `Ok(None)` means not enough supply yet
    pub async fn allocate(&self) -> Result<Option<PairAllocation>> {
        let timer = self.metrics.start_timer();
        let allocation = self.store.allocate_pair_room().await?;
        let duration = timer.stop();

        self.metrics
            .record_allocation(allocation.is_some(), duration);

        match &allocation {
            Some(a) => debug!(
                "Allocated players '{}' and '{}' to room '{}' in {:.2}ms",
                a.player1,
                a.player2,
                a.room_id,
                duration.as_secs_f64() * 1000.0
            ),
            None => trace!("Not enough waiting players or rooms"),
        }

        Ok(allocation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryStore;

    fn allocator_for(store: Arc<InMemoryStore>) -> PairRoomAllocator {
        PairRoomAllocator::new(store, Arc::new(MetricsCollector::new().unwrap()))
    }

    #[tokio::test]
    async fn test_allocation_shrinks_queues_by_two_and_one() {
        let store = Arc::new(InMemoryStore::seeded(["p1", "p2", "p3"], ["r1", "r2"]));
        let allocator = allocator_for(store.clone());

        let allocation = allocator.allocate().await.unwrap().unwrap();

        assert_eq!(allocation, PairAllocation::new("p3", "p2", "r2"));
        assert_eq!(store.waiting_players(), vec!["p1"]);
        assert_eq!(store.available_rooms(), vec!["r1"]);
    }

    #[tokio::test]
    async fn test_starvation_is_not_an_error() {
        let store = Arc::new(InMemoryStore::seeded(["p1"], ["r1"]));
        let allocator = allocator_for(store.clone());

        assert!(allocator.allocate().await.unwrap().is_none());
        assert_eq!(store.waiting_players(), vec!["p1"]);
        assert_eq!(store.available_rooms(), vec!["r1"]);
        assert_eq!(store.mutation_count(), 0);
    }
}
