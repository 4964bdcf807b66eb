//! Named loss components produced by a forward pass.

use crate::error::{Result, TrainErr};

/// Names the trainer itself records in its meters, a model can't use them.
pub const RESERVED_NAMES: [&str; 3] = ["loss", "time", "data"];

/// An insertion-ordered mapping from loss-component name to its value.
///
/// Values are plain numbers, detached from whatever graph produced them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LossTerms {
    terms: Vec<(String, f32)>,
}

impl LossTerms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the value of `name`, replacing a previous value in place.
    pub fn insert<S: Into<String>>(&mut self, name: S, value: f32) {
        let name = name.into();

        match self.terms.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.terms.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<f32> {
        self.terms
            .iter()
            .find_map(|(n, v)| (n == name).then_some(*v))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.terms.iter().map(|(n, _)| n.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f32)> {
        self.terms.iter().map(|(n, v)| (n.as_str(), *v))
    }

    /// Returns a copy with the terms sorted by name.
    pub fn sorted(&self) -> Self {
        let mut terms = self.terms.clone();
        terms.sort_by(|(a, _), (b, _)| a.cmp(b));
        Self { terms }
    }

    /// Sums every term into the scalar objective.
    ///
    /// # Errors
    /// * `EmptyLossTerms` if there is nothing to sum.
    /// * `ReservedLossTerm` if a term collides with a trainer metric name.
    /// * `NonFiniteLoss` if any term is NaN or infinite.
    pub fn total(&self) -> Result<f32> {
        if self.terms.is_empty() {
            return Err(TrainErr::EmptyLossTerms);
        }

        let mut total = 0.0;

        for (name, value) in &self.terms {
            if RESERVED_NAMES.contains(&name.as_str()) {
                return Err(TrainErr::ReservedLossTerm { term: name.clone() });
            }

            if !value.is_finite() {
                return Err(TrainErr::NonFiniteLoss {
                    term: name.clone(),
                    value: *value,
                });
            }

            total += value;
        }

        Ok(total)
    }
}

impl<S: Into<String>> FromIterator<(S, f32)> for LossTerms {
    fn from_iter<I: IntoIterator<Item = (S, f32)>>(iter: I) -> Self {
        let mut terms = Self::new();

        for (name, value) in iter {
            terms.insert(name, value);
        }

        terms
    }
}

/// Loss terms combined across every rank of the process group.
///
/// Only `authoritative` values are averages; on the other ranks they hold an
/// undivided sum, or nothing meaningful, and must not be displayed.
#[derive(Debug, Clone, PartialEq)]
pub struct ReducedLossTerms {
    terms: LossTerms,
    authoritative: bool,
}

impl ReducedLossTerms {
    pub(crate) fn new(terms: LossTerms, authoritative: bool) -> Self {
        Self {
            terms,
            authoritative,
        }
    }

    #[inline]
    pub fn is_authoritative(&self) -> bool {
        self.authoritative
    }

    #[inline]
    pub fn terms(&self) -> &LossTerms {
        &self.terms
    }

    /// Plain sum of the reduced terms, the `loss` the trainer reports.
    pub fn sum(&self) -> f32 {
        self.terms.iter().map(|(_, v)| v).sum()
    }

    pub fn into_terms(self) -> LossTerms {
        self.terms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_keeps_first_position() {
        let mut terms = LossTerms::new();
        terms.insert("loss_reg", 1.0);
        terms.insert("loss_cls", 2.0);
        terms.insert("loss_reg", 3.0);

        let names: Vec<_> = terms.names().collect();
        assert_eq!(names, ["loss_reg", "loss_cls"]);
        assert_eq!(terms.get("loss_reg"), Some(3.0));
        assert_eq!(terms.get("loss_centerness"), None);
    }

    #[test]
    fn sorted_orders_by_name() {
        let terms: LossTerms = [("loss_reg", 1.0), ("loss_cls", 2.0), ("loss_centerness", 3.0)]
            .into_iter()
            .collect();

        let names: Vec<_> = terms.sorted().names().map(str::to_owned).collect();
        assert_eq!(names, ["loss_centerness", "loss_cls", "loss_reg"]);
    }

    #[test]
    fn total_sums_terms() {
        let terms: LossTerms = [("a", 1.5), ("b", 2.5)].into_iter().collect();
        assert_eq!(terms.total().unwrap(), 4.0);
    }

    #[test]
    fn total_rejects_malformed_terms() {
        assert!(matches!(
            LossTerms::new().total(),
            Err(TrainErr::EmptyLossTerms)
        ));

        let terms: LossTerms = [("a", 1.0), ("b", f32::NAN)].into_iter().collect();
        assert!(matches!(
            terms.total(),
            Err(TrainErr::NonFiniteLoss { term, .. }) if term == "b"
        ));

        let terms: LossTerms = [("loss", 1.0)].into_iter().collect();
        assert!(matches!(
            terms.total(),
            Err(TrainErr::ReservedLossTerm { .. })
        ));
    }
}
