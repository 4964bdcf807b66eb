//! Collective communication between the ranks of a training job.

mod local;
mod process_group;
mod single;
mod tcp;

pub use local::LocalGroup;
pub use process_group::ProcessGroup;
pub use single::SingleProcess;
pub use tcp::TcpGroup;

use crate::error::{Result, TrainErr};

/// The rank whose reduced values are authoritative.
pub const COORDINATOR: usize = 0;

fn check_rank(rank: usize, world_size: usize) -> Result<()> {
    if rank >= world_size {
        return Err(TrainErr::InvalidRank { rank, world_size });
    }

    Ok(())
}
