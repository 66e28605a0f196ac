//! Homogeneous pool of simulation instances driven in lockstep.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing::{debug, info};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::env::{EnvError, Mind, Record, Simulation, Step};
use crate::envs::{PointBot, SpGather, SpMountainCar};
use crate::normalize::NormalizedEnv;
use crate::options::EnvOptions;
use crate::prng::Prng;
use crate::wire::{Tensor, Value, WireError};

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("unknown environment kind '{0}'")]
    UnknownKind(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("{what} has {got} entries, pool has {expected}")]
    BatchShape {
        what: &'static str,
        expected: usize,
        got: usize,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("pool is empty")]
    EmptyPool,
    #[error(transparent)]
    Env(#[from] EnvError),
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Largest pool `EnvPool::new` builds.
pub const MAX_POOL_SIZE: usize = 4096;

/// Largest per-call sub-step count `step_all` accepts.
pub const MAX_REPEAT: usize = 10_000;

/// Closed registry of simulation kinds, resolved by name at `init`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvKind {
    SpMountainCar,
    SpPointGather,
    Point,
}

impl EnvKind {
    pub const ALL: [EnvKind; 3] = [EnvKind::SpMountainCar, EnvKind::SpPointGather, EnvKind::Point];

    pub fn name(self) -> &'static str {
        match self {
            EnvKind::SpMountainCar => "SPMountainCar",
            EnvKind::SpPointGather => "SPPointGather",
            EnvKind::Point => "Point",
        }
    }

    fn build(self, opts: &EnvOptions, rng: Prng) -> Result<Box<dyn Simulation>, EnvError> {
        let sim: Box<dyn Simulation> = match (self, opts.rllab_normalize_rllab) {
            (EnvKind::SpMountainCar, false) => Box::new(SpMountainCar::new(opts, rng)?),
            (EnvKind::SpMountainCar, true) => {
                Box::new(NormalizedEnv::new(SpMountainCar::new(opts, rng)?))
            }
            (EnvKind::SpPointGather, false) => Box::new(SpGather::point(opts, rng)?),
            (EnvKind::SpPointGather, true) => {
                Box::new(NormalizedEnv::new(SpGather::point(opts, rng)?))
            }
            (EnvKind::Point, false) => Box::new(PointBot::new(opts.activity_range + 1.0)),
            (EnvKind::Point, true) => {
                Box::new(NormalizedEnv::new(PointBot::new(opts.activity_range + 1.0)))
            }
        };
        Ok(sim)
    }
}

impl fmt::Display for EnvKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EnvKind {
    type Err = PoolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EnvKind::ALL
            .into_iter()
            .find(|k| k.name() == s)
            .ok_or_else(|| PoolError::UnknownKind(s.to_string()))
    }
}

/// Per-index results of one batched step. Inactive members report `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepBatch {
    pub observations: Vec<Option<Vec<f64>>>,
    pub rewards: Vec<f64>,
    pub dones: Vec<bool>,
    pub infos: Vec<Record>,
}

impl StepBatch {
    fn push(&mut self, step: Option<Step>) {
        match step {
            Some(s) => {
                self.observations.push(Some(s.observation));
                self.rewards.push(s.reward);
                self.dones.push(s.done);
                self.infos.push(s.info);
            }
            None => {
                self.observations.push(None);
                self.rewards.push(0.0);
                self.dones.push(true);
                self.infos.push(Record::new());
            }
        }
    }

    pub fn len(&self) -> usize {
        self.rewards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rewards.is_empty()
    }
}

/// `{observations, rewards, dones, infos}`; an inactive member's observation
/// is the number `0`.
impl From<StepBatch> for Value {
    fn from(b: StepBatch) -> Self {
        let obs: Value = b
            .observations
            .into_iter()
            .map(|o| match o {
                Some(v) => Value::from(v),
                None => Value::from(0i64),
            })
            .collect();
        let rewards: Value = b.rewards.into_iter().map(Value::from).collect();
        let dones: Value = b.dones.into_iter().map(Value::Bool).collect();
        let infos: Value = b.infos.into_iter().map(Value::from).collect();
        Value::Seq(vec![obs, rewards, dones, infos])
    }
}

/// Run one member for up to `repeat` sub-steps, stopping at the first `done`.
fn step_member(sim: &mut dyn Simulation, action: &[f64], repeat: usize) -> Result<Step, EnvError> {
    let mut last = sim.step(action)?;
    for _ in 1..repeat {
        if last.done {
            break;
        }
        last = sim.step(action)?;
    }
    Ok(last)
}

pub struct EnvPool {
    kind: EnvKind,
    envs: Vec<Box<dyn Simulation>>,
}

impl EnvPool {
    pub fn new(kind: EnvKind, count: usize, opts: &EnvOptions) -> Result<Self, PoolError> {
        if count > MAX_POOL_SIZE {
            return Err(PoolError::InvalidArgument(format!(
                "pool size {count} exceeds {MAX_POOL_SIZE}"
            )));
        }
        let envs = (0..count)
            .map(|i| kind.build(opts, Prng::for_member(opts.seed, i)))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| match e {
                EnvError::Configuration(msg) => PoolError::Configuration(msg),
                other => PoolError::Env(other),
            })?;
        info!(kind = %kind, count, normalized = opts.rllab_normalize_rllab, "environment pool ready");
        Ok(Self { kind, envs })
    }

    /// Build a pool from caller-supplied simulations.
    pub fn from_simulations(kind: EnvKind, envs: Vec<Box<dyn Simulation>>) -> Self {
        Self { kind, envs }
    }

    pub fn kind(&self) -> EnvKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.envs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.envs.is_empty()
    }

    fn first(&self) -> Result<&dyn Simulation, PoolError> {
        self.envs.first().map(|e| e.as_ref()).ok_or(PoolError::EmptyPool)
    }

    fn check_len(&self, what: &'static str, got: usize) -> Result<(), PoolError> {
        if got != self.envs.len() {
            return Err(PoolError::BatchShape {
                what,
                expected: self.envs.len(),
                got,
            });
        }
        Ok(())
    }

    pub fn reset_all(&mut self) -> Result<Vec<Vec<f64>>, PoolError> {
        let obs = self
            .envs
            .iter_mut()
            .map(|e| e.reset())
            .collect::<Result<Vec<_>, _>>()?;
        debug!(count = obs.len(), "pool reset");
        Ok(obs)
    }

    pub fn step_all(
        &mut self,
        actions: &[Vec<f64>],
        active: &[bool],
        repeat: usize,
    ) -> Result<StepBatch, PoolError> {
        self.check_len("actions", actions.len())?;
        self.check_len("active mask", active.len())?;
        if repeat == 0 || repeat > MAX_REPEAT {
            return Err(PoolError::InvalidArgument(format!(
                "repeat count must be in 1..={MAX_REPEAT}, got {repeat}"
            )));
        }

        let steps = self.run_steps(actions, active, repeat)?;
        let mut batch = StepBatch::default();
        for step in steps {
            batch.push(step);
        }
        Ok(batch)
    }

    #[cfg(not(feature = "parallel"))]
    fn run_steps(
        &mut self,
        actions: &[Vec<f64>],
        active: &[bool],
        repeat: usize,
    ) -> Result<Vec<Option<Step>>, EnvError> {
        self.envs
            .iter_mut()
            .zip(actions.iter().zip(active))
            .map(|(env, (action, &on))| {
                on.then(|| step_member(env.as_mut(), action, repeat))
                    .transpose()
            })
            .collect()
    }

    /// Members are independent, so they step on the rayon pool; `collect`
    /// keeps index order.
    #[cfg(feature = "parallel")]
    fn run_steps(
        &mut self,
        actions: &[Vec<f64>],
        active: &[bool],
        repeat: usize,
    ) -> Result<Vec<Option<Step>>, EnvError> {
        self.envs
            .par_iter_mut()
            .zip(actions.par_iter().zip(active.par_iter()))
            .map(|(env, (action, &on))| {
                on.then(|| step_member(env.as_mut(), action, repeat))
                    .transpose()
            })
            .collect()
    }

    pub fn reward_terminal_all(&self) -> Vec<f64> {
        self.envs
            .iter()
            .map(|e| {
                if e.capabilities().terminal_reward {
                    e.reward_terminal()
                } else {
                    0.0
                }
            })
            .collect()
    }

    pub fn get_stat_all(&mut self) -> Vec<Record> {
        self.envs
            .iter_mut()
            .map(|e| {
                if e.capabilities().stats {
                    e.stat()
                } else {
                    Record::new()
                }
            })
            .collect()
    }

    pub fn reward_terminal_mind_all(&self, minds: &[Mind]) -> Result<Vec<f64>, PoolError> {
        self.check_len("minds", minds.len())?;
        Ok(self
            .envs
            .iter()
            .zip(minds)
            .map(|(e, &m)| {
                if e.capabilities().terminal_reward {
                    e.reward_terminal_mind(m)
                } else {
                    0.0
                }
            })
            .collect())
    }

    pub fn current_mind_all(&self) -> Vec<Option<Mind>> {
        self.envs
            .iter()
            .map(|e| {
                if e.capabilities().minds {
                    e.current_mind()
                } else {
                    None
                }
            })
            .collect()
    }

    /// Render member 0. With `want_image`, return its frame as a
    /// `[height, width, 3]` tensor in top-to-bottom row order.
    pub fn render_first(&mut self, want_image: bool) -> Result<Option<Tensor>, PoolError> {
        let env = self.envs.first_mut().ok_or(PoolError::EmptyPool)?;
        env.render()?;
        if !want_image {
            return Ok(None);
        }
        if !env.capabilities().image {
            return Ok(None);
        }
        let Some(frame) = env.image() else {
            return Ok(None);
        };
        let row = frame.width * 3;
        let data: Vec<f64> = frame
            .data
            .chunks_exact(row.max(1))
            .rev()
            .flatten()
            .map(|&b| f64::from(b))
            .collect();
        Ok(Some(Tensor::new(vec![frame.height, frame.width, 3], data)?))
    }

    pub fn observation_shape(&self) -> Result<Vec<usize>, PoolError> {
        Ok(vec![self.first()?.observation_dim()])
    }

    pub fn action_count(&self) -> Result<usize, PoolError> {
        Ok(self.first()?.action_dim())
    }

    pub fn action_from_key(&self, key: &str) -> Result<Option<Vec<f64>>, PoolError> {
        let env = self.first()?;
        if !env.capabilities().keyboard {
            return Ok(None);
        }
        Ok(env.action_from_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Capabilities, Frame};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Counts step calls and reports `done` on sub-step `done_at` (1-based).
    struct Counting {
        calls: Arc<AtomicUsize>,
        done_at: usize,
        taken: usize,
        shows_image: bool,
    }

    impl Simulation for Counting {
        fn reset(&mut self) -> Result<Vec<f64>, EnvError> {
            self.taken = 0;
            Ok(vec![0.0])
        }

        fn step(&mut self, action: &[f64]) -> Result<Step, EnvError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.taken += 1;
            let mut info = Record::new();
            info.insert("n", self.taken);
            Ok(Step {
                observation: vec![self.taken as f64],
                reward: action[0],
                done: self.taken == self.done_at,
                info,
            })
        }

        fn observation(&self) -> Vec<f64> {
            vec![self.taken as f64]
        }

        fn observation_dim(&self) -> usize {
            1
        }

        fn action_dim(&self) -> usize {
            1
        }

        fn action_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![-1.0], vec![1.0])
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                image: self.shows_image,
                ..Capabilities::NONE
            }
        }

        fn render(&mut self) -> Result<(), EnvError> {
            Ok(())
        }

        fn image(&self) -> Option<Frame> {
            // 2 wide, 2 high; bottom row 1s, top row 2s.
            Some(Frame {
                width: 2,
                height: 2,
                data: vec![1, 1, 1, 1, 1, 1, 2, 2, 2, 2, 2, 2],
            })
        }
    }

    fn counting_pool(n: usize, done_at: usize) -> (EnvPool, Vec<Arc<AtomicUsize>>) {
        let counters: Vec<_> = (0..n).map(|_| Arc::new(AtomicUsize::new(0))).collect();
        let envs = counters
            .iter()
            .map(|c| {
                Box::new(Counting {
                    calls: Arc::clone(c),
                    done_at,
                    taken: 0,
                    shows_image: true,
                }) as Box<dyn Simulation>
            })
            .collect();
        (EnvPool::from_simulations(EnvKind::Point, envs), counters)
    }

    #[test]
    fn masked_members_are_not_stepped() {
        let (mut pool, calls) = counting_pool(3, 100);
        pool.reset_all().unwrap();
        let actions = vec![vec![0.1], vec![0.2], vec![0.3]];
        let batch = pool.step_all(&actions, &[true, false, true], 1).unwrap();
        assert_eq!(batch.len(), 3);
        assert_eq!(calls[1].load(Ordering::SeqCst), 0);
        assert_eq!(batch.observations[1], None);
        assert_eq!(batch.rewards, vec![0.1, 0.0, 0.3]);
        assert_eq!(batch.dones, vec![false, true, false]);
        assert!(batch.infos[1].is_empty());

        let encoded = Value::from(batch);
        let Value::Seq(parts) = encoded else {
            panic!("step reply should be a sequence");
        };
        assert_eq!(parts.len(), 4);
        let Value::Seq(obs) = &parts[0] else {
            panic!("observations should be a sequence");
        };
        assert_eq!(obs[1], Value::from(0i64));
    }

    #[test]
    fn repeat_stops_at_first_done() {
        let (mut pool, calls) = counting_pool(2, 2);
        pool.reset_all().unwrap();
        let batch = pool
            .step_all(&[vec![1.0], vec![1.0]], &[true, true], 5)
            .unwrap();
        assert_eq!(calls[0].load(Ordering::SeqCst), 2);
        assert_eq!(batch.dones, vec![true, true]);
        assert_eq!(batch.observations[0], Some(vec![2.0]));
        assert_eq!(batch.infos[0].get("n"), Some(&Value::from(2usize)));
    }

    #[test]
    fn repeat_runs_all_sub_steps_without_done() {
        let (mut pool, calls) = counting_pool(1, 100);
        pool.reset_all().unwrap();
        let batch = pool.step_all(&[vec![0.5]], &[true], 4).unwrap();
        assert_eq!(calls[0].load(Ordering::SeqCst), 4);
        assert_eq!(batch.observations[0], Some(vec![4.0]));
        assert_eq!(batch.rewards, vec![0.5]);
    }

    #[test]
    fn batch_shape_and_repeat_are_checked() {
        let (mut pool, calls) = counting_pool(2, 100);
        assert!(matches!(
            pool.step_all(&[vec![0.0]], &[true, true], 1),
            Err(PoolError::BatchShape { what: "actions", expected: 2, got: 1 })
        ));
        assert!(matches!(
            pool.step_all(&[vec![0.0], vec![0.0]], &[true], 1),
            Err(PoolError::BatchShape { .. })
        ));
        assert!(matches!(
            pool.step_all(&[vec![0.0], vec![0.0]], &[true, true], 0),
            Err(PoolError::InvalidArgument(_))
        ));
        assert_eq!(calls[0].load(Ordering::SeqCst), 0);
    }

    #[test]
    fn missing_capabilities_use_neutral_defaults() {
        let (mut pool, _) = counting_pool(2, 100);
        assert_eq!(pool.reward_terminal_all(), vec![0.0, 0.0]);
        assert!(pool.get_stat_all().iter().all(Record::is_empty));
        assert_eq!(
            pool.reward_terminal_mind_all(&[Mind::SelfPlay, Mind::Target])
                .unwrap(),
            vec![0.0, 0.0]
        );
        assert_eq!(pool.current_mind_all(), vec![None, None]);
        assert_eq!(pool.action_from_key("left").unwrap(), None);
        assert_eq!(pool.observation_shape().unwrap(), vec![1]);
        assert_eq!(pool.action_count().unwrap(), 1);
    }

    #[test]
    fn render_flips_rows_top_to_bottom() {
        let (mut pool, _) = counting_pool(1, 100);
        assert_eq!(pool.render_first(false).unwrap(), None);
        let img = pool.render_first(true).unwrap().unwrap();
        assert_eq!(img.shape(), &[2, 2, 3]);
        assert!(img.data()[..6].iter().all(|&v| v == 2.0));
        assert!(img.data()[6..].iter().all(|&v| v == 1.0));
    }

    #[test]
    fn image_needs_the_capability() {
        let blind = Counting {
            calls: Arc::new(AtomicUsize::new(0)),
            done_at: 100,
            taken: 0,
            shows_image: false,
        };
        let mut pool = EnvPool::from_simulations(EnvKind::Point, vec![Box::new(blind)]);
        assert_eq!(pool.render_first(true).unwrap(), None);
    }

    #[test]
    fn pool_size_and_repeat_are_capped() {
        assert!(matches!(
            EnvPool::new(EnvKind::Point, MAX_POOL_SIZE + 1, &EnvOptions::default()),
            Err(PoolError::InvalidArgument(_))
        ));
        let (mut pool, calls) = counting_pool(1, usize::MAX);
        assert!(matches!(
            pool.step_all(&[vec![0.0]], &[true], MAX_REPEAT + 1),
            Err(PoolError::InvalidArgument(_))
        ));
        assert_eq!(calls[0].load(Ordering::SeqCst), 0);
        pool.step_all(&[vec![0.0]], &[true], MAX_REPEAT).unwrap();
        assert_eq!(calls[0].load(Ordering::SeqCst), MAX_REPEAT);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        assert!(matches!(
            "Swimmer".parse::<EnvKind>(),
            Err(PoolError::UnknownKind(name)) if name == "Swimmer"
        ));
        for kind in EnvKind::ALL {
            assert_eq!(kind.name().parse::<EnvKind>().unwrap(), kind);
        }
    }

    #[test]
    fn empty_pool_queries_fail() {
        let mut pool = EnvPool::from_simulations(EnvKind::Point, Vec::new());
        assert!(matches!(pool.observation_shape(), Err(PoolError::EmptyPool)));
        assert!(matches!(pool.render_first(true), Err(PoolError::EmptyPool)));
        assert!(pool.reset_all().unwrap().is_empty());
    }

    #[test]
    fn built_in_kinds_construct_with_defaults() {
        let opts = EnvOptions {
            seed: Some(42),
            ..EnvOptions::default()
        };
        let mut pool = EnvPool::new(EnvKind::SpMountainCar, 3, &opts).unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(pool.observation_shape().unwrap(), vec![6]);
        assert_eq!(pool.action_count().unwrap(), 2);
        assert_eq!(pool.reset_all().unwrap().len(), 3);
        assert_eq!(pool.current_mind_all(), vec![Some(Mind::SelfPlay); 3]);
        let img = pool.render_first(true).unwrap().unwrap();
        assert_eq!(img.shape()[2], 3);

        let mut gather = EnvPool::new(EnvKind::SpPointGather, 2, &opts).unwrap();
        assert_eq!(gather.observation_shape().unwrap(), vec![32]);
        gather.reset_all().unwrap();
        let batch = gather
            .step_all(&[vec![1.0, 0.0, 0.0], vec![1.0, 0.0, 0.0]], &[true, true], 3)
            .unwrap();
        assert_eq!(batch.observations[0].as_ref().map(Vec::len), Some(32));
        assert_eq!(batch.infos[0].get("current_mind"), Some(&Value::from(1u32)));
    }

    #[test]
    fn configuration_errors_abort_the_pool() {
        let opts = EnvOptions {
            naction_heads: Some(7),
            ..EnvOptions::default()
        };
        assert!(matches!(
            EnvPool::new(EnvKind::SpPointGather, 2, &opts),
            Err(PoolError::Configuration(_))
        ));
    }

    #[test]
    fn normalized_pool_keeps_capabilities() {
        let opts = EnvOptions {
            rllab_normalize_rllab: true,
            seed: Some(1),
            ..EnvOptions::default()
        };
        let mut pool = EnvPool::new(EnvKind::SpMountainCar, 1, &opts).unwrap();
        pool.reset_all().unwrap();
        assert_eq!(pool.current_mind_all(), vec![Some(Mind::SelfPlay)]);
        assert_eq!(pool.get_stat_all()[0].get("type"), Some(&Value::from("self_play")));
    }
}
