use std::collections::BTreeMap;

use crate::{MlErr, Result, arch::loss::LossFn};

/// A weighted combination of named loss terms.
///
/// Both maps are keyed by the term's name and must hold the same keys, this is checked when an
/// `Actor` is built.
#[derive(Default)]
pub struct Objective {
    losses: BTreeMap<String, Box<dyn LossFn>>,
    weights: BTreeMap<String, f32>,
}

impl Objective {
    /// Creates an empty `Objective`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a loss term.
    pub fn with_loss<L>(mut self, name: &str, loss: L) -> Self
    where
        L: LossFn + 'static,
    {
        self.losses.insert(name.to_string(), Box::new(loss));
        self
    }

    /// Sets the weight of a loss term.
    pub fn with_weight(mut self, name: &str, weight: f32) -> Self {
        self.weights.insert(name.to_string(), weight);
        self
    }

    /// Checks every loss has a finite, non negative weight and every weight has a loss.
    ///
    /// # Returns
    /// An `InvalidObjective` error listing every offending key.
    pub fn validate(&self) -> Result<()> {
        let missing_weights: Vec<_> = self
            .losses
            .keys()
            .filter(|name| !self.weights.contains_key(*name))
            .cloned()
            .collect();

        let missing_losses: Vec<_> = self
            .weights
            .keys()
            .filter(|name| !self.losses.contains_key(*name))
            .cloned()
            .collect();

        let invalid_weights: Vec<_> = self
            .weights
            .iter()
            .filter(|(_, w)| !w.is_finite() || **w < 0.)
            .map(|(name, _)| name.clone())
            .collect();

        if missing_weights.is_empty() && missing_losses.is_empty() && invalid_weights.is_empty() {
            return Ok(());
        }

        Err(MlErr::InvalidObjective {
            missing_weights,
            missing_losses,
            invalid_weights,
        })
    }

    /// Iterates over every `(name, loss, weight)` term, in name order.
    pub(crate) fn terms(&self) -> impl Iterator<Item = (&str, &dyn LossFn, f32)> {
        self.losses.iter().filter_map(|(name, loss)| {
            let weight = *self.weights.get(name)?;
            Some((name.as_str(), loss.as_ref(), weight))
        })
    }

    /// The names of the loss terms.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.losses.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::loss::{GIoU, L1};

    #[test]
    fn matching_keys_are_valid() {
        let objective = Objective::new()
            .with_loss("giou", GIoU)
            .with_loss("l1", L1)
            .with_weight("giou", 2.0)
            .with_weight("l1", 5.0);

        assert!(objective.validate().is_ok());
        assert_eq!(objective.names().collect::<Vec<_>>(), ["giou", "l1"]);
    }

    #[test]
    fn reports_every_mismatch() {
        let objective = Objective::new()
            .with_loss("giou", GIoU)
            .with_loss("l1", L1)
            .with_weight("l1", -1.0)
            .with_weight("iou", 1.0);

        let err = objective.validate().unwrap_err();
        assert_eq!(
            err,
            MlErr::InvalidObjective {
                missing_weights: vec!["giou".to_string()],
                missing_losses: vec!["iou".to_string()],
                invalid_weights: vec!["l1".to_string()],
            }
        );
    }
}
