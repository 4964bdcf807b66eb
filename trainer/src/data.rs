use crate::{
    error::{Result, TrainErr},
    model::Batch,
};

/// A source of batches whose length is the amount of iterations it drives.
pub trait DataSource {
    type Inputs: Send;
    type Targets: Send;

    /// The total amount of batches, i.e. the last iteration of a run.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Yields the batches of iterations `start + 1..=len`.
    ///
    /// # Arguments
    /// * `start` - The amount of iterations already done, e.g. by a resumed run.
    fn batches(
        &mut self,
        start: usize,
    ) -> impl Iterator<Item = Result<Batch<Self::Inputs, Self::Targets>>> + Send + '_;
}

/// Batches held in memory, cycled over until the declared length is reached.
#[derive(Debug, Clone)]
pub struct InMemorySource<I, T> {
    batches: Vec<Batch<I, T>>,
    len: usize,
}

impl<I, T> InMemorySource<I, T> {
    /// Creates a source that goes through `batches` exactly once.
    pub fn once(batches: Vec<Batch<I, T>>) -> Self {
        let len = batches.len();
        Self { batches, len }
    }

    /// Creates a source that cycles over `batches` for `iterations` iterations.
    ///
    /// # Errors
    /// `InvalidConfig` if there are iterations to run but no batches.
    pub fn cycling(batches: Vec<Batch<I, T>>, iterations: usize) -> Result<Self> {
        if batches.is_empty() && iterations > 0 {
            return Err(TrainErr::InvalidConfig(
                "can't cycle over an empty set of batches".into(),
            ));
        }

        Ok(Self {
            batches,
            len: iterations,
        })
    }
}

impl<I, T> DataSource for InMemorySource<I, T>
where
    I: Clone + Send + Sync,
    T: Clone + Send + Sync,
{
    type Inputs = I;
    type Targets = T;

    fn len(&self) -> usize {
        self.len
    }

    fn batches(&mut self, start: usize) -> impl Iterator<Item = Result<Batch<I, T>>> + Send + '_ {
        let n = self.batches.len();
        (start..self.len).map(move |i| Ok(self.batches[i % n].clone()))
    }
}
