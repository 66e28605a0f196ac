//! Built-in simulation kinds.
//!
//! These are small kinematic models that sit behind the same [`Simulation`]
//! interface as an external physics engine would.
//!
//! [`Simulation`]: crate::env::Simulation

pub mod canvas;
pub mod gather;
pub mod mountain_car;
pub mod point;

pub use gather::SpGather;
pub use mountain_car::SpMountainCar;
pub use point::PointBot;

use crate::env::{EnvError, Step};
use crate::options::EnvOptions;

/// A controllable body that a gather arena can drive.
pub trait Locomotor: Send {
    /// Complete simulator state, enough to put the body back exactly.
    type State: Clone + Send;

    /// Reset to a fresh start, or to `state` when given.
    fn reset(&mut self, state: Option<&Self::State>) -> Vec<f64>;

    fn step(&mut self, action: &[f64]) -> Result<Step, EnvError>;

    fn observation(&self) -> Vec<f64>;

    fn observation_dim(&self) -> usize;

    /// Leading observation components that describe position.
    fn position_dim(&self) -> usize;

    fn full_state(&self) -> Self::State;

    fn body_position(&self) -> [f64; 2];

    /// Heading in radians.
    fn orientation(&self) -> f64;

    fn action_bounds(&self) -> (Vec<f64>, Vec<f64>);

    fn action_from_key(&self, _key: &str) -> Option<Vec<f64>> {
        None
    }
}

/// Check the controller's action-head options against a kind whose action
/// has `arity` components and whose continuous part is bounded by `bound`.
pub(crate) fn check_action_options(
    opts: &EnvOptions,
    arity: usize,
    bound: f64,
) -> Result<(), EnvError> {
    if let Some(heads) = opts.naction_heads {
        if heads != arity {
            return Err(EnvError::Configuration(format!(
                "naction_heads is {heads}, this kind takes {arity} action components"
            )));
        }
    }
    if !opts.rllab_cont_action {
        return Err(EnvError::Configuration(
            "rllab_cont_action must be true".to_string(),
        ));
    }
    if let Some(limit) = opts.rllab_cont_limit {
        if limit != bound {
            return Err(EnvError::Configuration(format!(
                "rllab_cont_limit is {limit}, action bound is {bound}"
            )));
        }
    }
    Ok(())
}

/// Distance weights for target scoring: ones, with everything after the
/// positional prefix zeroed when `loc_only` is set.
pub(crate) fn target_weights(dim: usize, position_dim: usize, loc_only: bool) -> Vec<f64> {
    (0..dim)
        .map(|i| if loc_only && i >= position_dim { 0.0 } else { 1.0 })
        .collect()
}

/// Whether the switch component of an action is set.
pub(crate) fn switch_bit(action: &[f64]) -> bool {
    action.last().is_some_and(|&s| s >= 0.5)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_options_must_match_the_kind() {
        let mut opts = EnvOptions::default();
        assert!(check_action_options(&opts, 3, 1.0).is_ok());
        opts.naction_heads = Some(3);
        opts.rllab_cont_limit = Some(1.0);
        assert!(check_action_options(&opts, 3, 1.0).is_ok());
        opts.naction_heads = Some(2);
        assert!(matches!(
            check_action_options(&opts, 3, 1.0),
            Err(EnvError::Configuration(_))
        ));
        opts.naction_heads = None;
        opts.rllab_cont_action = false;
        assert!(check_action_options(&opts, 3, 1.0).is_err());
        opts.rllab_cont_action = true;
        opts.rllab_cont_limit = Some(2.0);
        assert!(check_action_options(&opts, 3, 1.0).is_err());
    }

    #[test]
    fn loc_only_zeroes_non_positional_weights() {
        assert_eq!(target_weights(4, 2, false), vec![1.0; 4]);
        assert_eq!(target_weights(4, 2, true), vec![1.0, 1.0, 0.0, 0.0]);
    }
}
