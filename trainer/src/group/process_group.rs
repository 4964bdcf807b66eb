use crate::error::Result;

/// The collective operations a rank needs from its process group.
///
/// Every rank must call the collectives the same number of times and in the
/// same order, a rank that skips one leaves the others blocked forever.
#[allow(unused)]
#[trait_variant::make(ProcessGroup: Send)]
pub trait ProcessGroupTemplate {
    /// Returns the number of cooperating ranks.
    fn world_size(&self) -> usize;

    /// Returns this rank's id, in `0..world_size`.
    fn rank(&self) -> usize;

    /// Blocks until every rank has reached the barrier.
    async fn barrier(&mut self) -> Result<()>;

    /// Sums `buf` element-wise across every rank into `buf` on rank `dst`.
    ///
    /// # Arguments
    /// * `buf` - This rank's contribution. Holds the sum afterwards on `dst`,
    ///           its content on any other rank is unspecified.
    /// * `dst` - The destination rank.
    ///
    /// # Returns
    /// An error if `dst` is out of range or the ranks disagree on `buf`'s length.
    async fn reduce_sum(&mut self, buf: &mut [f32], dst: usize) -> Result<()>;
}
