use crate::{
    error::Result,
    group::{COORDINATOR, ProcessGroup},
    loss::{LossTerms, ReducedLossTerms},
};

/// Averages the loss terms of every rank onto the coordinator.
///
/// The result is meant for logging only, it never feeds back into the update.
/// Every rank must call this the same number of times with the same term names.
///
/// # Arguments
/// * `group` - The process group to reduce over.
/// * `terms` - This rank's loss terms, left untouched.
///
/// # Returns
/// The terms sorted by name and averaged over the group. With a single rank the
/// input is returned as is, in its original order, without any collective call.
///
/// # Errors
/// Propagates the group's errors, `SizeMismatch` if ranks disagree on the amount of terms.
pub async fn reduce_loss_terms<G: ProcessGroup>(
    group: &mut G,
    terms: &LossTerms,
) -> Result<ReducedLossTerms> {
    let world_size = group.world_size();
    if world_size < 2 {
        return Ok(ReducedLossTerms::new(terms.clone(), true));
    }

    let sorted = terms.sorted();
    let mut values: Vec<f32> = sorted.iter().map(|(_, v)| v).collect();
    group.reduce_sum(&mut values, COORDINATOR).await?;

    let authoritative = group.rank() == COORDINATOR;
    if authoritative {
        let n = world_size as f32;
        values.iter_mut().for_each(|v| *v /= n);
    }

    let reduced = sorted.names().zip(values).collect();
    Ok(ReducedLossTerms::new(reduced, authoritative))
}
