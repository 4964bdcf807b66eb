use std::{num::NonZeroUsize, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::Barrier;

use super::{ProcessGroup, check_rank};
use crate::error::{Result, TrainErr};

struct Shared {
    barrier: Barrier,
    slots: Vec<Mutex<Vec<f32>>>,
}

/// Ranks living in the same process, one handle per tokio task.
///
/// Every rank publishes its contribution into its own slot, the destination
/// sums the slots in rank order between two barrier waits, so results don't
/// depend on scheduling.
pub struct LocalGroup {
    rank: usize,
    shared: Arc<Shared>,
}

impl LocalGroup {
    /// Creates a group of `world_size` ranks.
    ///
    /// # Returns
    /// One handle per rank, the handle at index `i` is rank `i`.
    pub fn new(world_size: NonZeroUsize) -> Vec<Self> {
        let n = world_size.get();
        let shared = Arc::new(Shared {
            barrier: Barrier::new(n),
            slots: (0..n).map(|_| Mutex::new(Vec::new())).collect(),
        });

        (0..n)
            .map(|rank| Self {
                rank,
                shared: Arc::clone(&shared),
            })
            .collect()
    }

    fn publish(&self, buf: &[f32]) {
        let mut slot = self.shared.slots[self.rank].lock();
        slot.clear();
        slot.extend_from_slice(buf);
    }

    fn mismatched_len(&self, expected: usize) -> Option<usize> {
        self.shared
            .slots
            .iter()
            .map(|slot| slot.lock().len())
            .find(|&len| len != expected)
    }

    fn sum_into(&self, buf: &mut [f32]) {
        buf.fill(0.0);

        for slot in &self.shared.slots {
            let slot = slot.lock();
            for (acc, v) in buf.iter_mut().zip(slot.iter()) {
                *acc += v;
            }
        }
    }
}

impl ProcessGroup for LocalGroup {
    fn world_size(&self) -> usize {
        self.shared.slots.len()
    }

    fn rank(&self) -> usize {
        self.rank
    }

    async fn barrier(&mut self) -> Result<()> {
        self.shared.barrier.wait().await;
        Ok(())
    }

    async fn reduce_sum(&mut self, buf: &mut [f32], dst: usize) -> Result<()> {
        check_rank(dst, self.world_size())?;

        self.publish(buf);
        self.shared.barrier.wait().await;

        let mismatch = self.mismatched_len(buf.len());
        if mismatch.is_none() && self.rank == dst {
            self.sum_into(buf);
        }

        // Nobody overwrites a slot before the destination is done reading.
        self.shared.barrier.wait().await;

        match mismatch {
            Some(got) => Err(TrainErr::SizeMismatch {
                what: "reduce buffer",
                got,
                expected: buf.len(),
            }),
            None => Ok(()),
        }
    }
}
