use std::{iter, num::NonZeroUsize};

use crate::{
    data::DataSource,
    error::Result,
    group::ProcessGroup,
    loss::ReducedLossTerms,
    meters::Meters,
    model::Model,
    reduce::reduce_loss_terms,
};

/// Runs the model over a held-out source without touching its parameters.
///
/// The caller puts the model in evaluation mode beforehand. Every rank must
/// validate over the same amount of batches since each one is reduced.
///
/// # Arguments
/// * `model` - The model under evaluation.
/// * `source` - The held-out batches, walked from the start.
/// * `group` - The process group the losses are reduced over.
/// * `window_size` - Window of the returned meters.
///
/// # Returns
/// Fresh meters with `loss` and every loss term of the pass.
pub async fn validate<M, V, G>(
    model: &mut M,
    source: &mut V,
    group: &mut G,
    window_size: NonZeroUsize,
) -> Result<Meters>
where
    M: Model,
    V: DataSource<Inputs = M::Inputs, Targets = M::Targets>,
    G: ProcessGroup,
{
    let mut meters = Meters::new(window_size);

    for batch in source.batches(0) {
        let terms = {
            let batch = model.to_device(batch?)?;
            model.forward(&batch.inputs, &batch.targets)?
        };
        terms.total()?;

        let reduced = reduce_loss_terms(group, &terms).await?;
        record_losses(&mut meters, &reduced);
    }

    Ok(meters)
}

/// Records the summed `loss` followed by every reduced term.
pub(crate) fn record_losses(meters: &mut Meters, reduced: &ReducedLossTerms) {
    let total = iter::once(("loss", reduced.sum()));
    meters.update(total.chain(reduced.terms().iter()));
}
