//! Observation normalization adapter.

use crate::env::{Capabilities, EnvError, Frame, Mind, Record, Simulation, Step};

pub const DEFAULT_ALPHA: f64 = 0.001;

const EPS: f64 = 1e-8;

/// Wraps a simulation and whitens its observations with an exponential
/// moving estimate of their mean and variance.
pub struct NormalizedEnv<S> {
    inner: S,
    alpha: f64,
    mean: Vec<f64>,
    var: Vec<f64>,
}

impl<S: Simulation> NormalizedEnv<S> {
    pub fn new(inner: S) -> Self {
        Self::with_alpha(inner, DEFAULT_ALPHA)
    }

    pub fn with_alpha(inner: S, alpha: f64) -> Self {
        let dim = inner.observation_dim();
        Self {
            inner,
            alpha,
            mean: vec![0.0; dim],
            var: vec![1.0; dim],
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    fn update(&mut self, obs: &[f64]) {
        if self.mean.len() != obs.len() {
            self.mean = vec![0.0; obs.len()];
            self.var = vec![1.0; obs.len()];
        }
        let a = self.alpha;
        for ((m, v), &x) in self.mean.iter_mut().zip(self.var.iter_mut()).zip(obs) {
            *m = (1.0 - a) * *m + a * x;
            *v = (1.0 - a) * *v + a * (x - *m).powi(2);
        }
    }

    fn apply(&self, obs: &[f64]) -> Vec<f64> {
        obs.iter()
            .zip(self.mean.iter().zip(&self.var))
            .map(|(&x, (&m, &v))| (x - m) / (v.sqrt() + EPS))
            .collect()
    }

    fn normalize(&mut self, obs: Vec<f64>) -> Vec<f64> {
        self.update(&obs);
        self.apply(&obs)
    }
}

impl<S: Simulation> Simulation for NormalizedEnv<S> {
    fn reset(&mut self) -> Result<Vec<f64>, EnvError> {
        let obs = self.inner.reset()?;
        Ok(self.normalize(obs))
    }

    fn step(&mut self, action: &[f64]) -> Result<Step, EnvError> {
        let mut step = self.inner.step(action)?;
        step.observation = self.normalize(step.observation);
        Ok(step)
    }

    fn observation(&self) -> Vec<f64> {
        self.apply(&self.inner.observation())
    }

    fn observation_dim(&self) -> usize {
        self.inner.observation_dim()
    }

    fn action_dim(&self) -> usize {
        self.inner.action_dim()
    }

    fn action_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        self.inner.action_bounds()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    fn reward_terminal(&self) -> f64 {
        self.inner.reward_terminal()
    }

    fn stat(&mut self) -> Record {
        self.inner.stat()
    }

    fn reward_terminal_mind(&self, mind: Mind) -> f64 {
        self.inner.reward_terminal_mind(mind)
    }

    fn current_mind(&self) -> Option<Mind> {
        self.inner.current_mind()
    }

    fn render(&mut self) -> Result<(), EnvError> {
        self.inner.render()
    }

    fn image(&self) -> Option<Frame> {
        self.inner.image()
    }

    fn action_from_key(&self, key: &str) -> Option<Vec<f64>> {
        self.inner.action_from_key(key)
    }
}
