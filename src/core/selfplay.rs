//! Two-phase self-play episode bookkeeping.
//!
//! A self-play episode starts in [`Mind::SelfPlay`]: the first mind wanders
//! and eventually emits the switch bit, which fixes a target state. The
//! second mind ([`Mind::Target`]) is then scored on reaching that target.
//! Test episodes skip the first phase and run the underlying task directly.
//!
//! The simulation kinds own their physics; this type owns everything that is
//! shared between them (clock, phase, target snapshot, terminal rewards,
//! observation features and the stats record).

use crate::env::{Mind, Record};
use crate::options::{EnvOptions, SwitchMode};
use crate::prng::Prng;
use crate::wire::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct SelfPlayConfig {
    pub nminds: u32,
    pub test_rate: f64,
    pub test_rate_by_steps: bool,
    pub state_threshold: f64,
    pub reward_coeff: f64,
    pub max_steps: u32,
    pub loc_only: bool,
    pub per_step_cost: bool,
    pub mode: SwitchMode,
    /// 0 disables the test-task step budget.
    pub test_max_steps: u32,
}

impl From<&EnvOptions> for SelfPlayConfig {
    fn from(o: &EnvOptions) -> Self {
        Self {
            nminds: o.nminds,
            test_rate: o.sp_test_rate,
            test_rate_by_steps: o.sp_test_rate_bysteps,
            state_threshold: o.sp_state_thres,
            reward_coeff: o.sp_reward_coeff,
            max_steps: o.max_steps,
            loc_only: o.sp_loc_only,
            per_step_cost: o.sp_reward_bob_step,
            mode: o.sp_mode,
            test_max_steps: o.sp_test_max_steps,
        }
    }
}

/// Weighted Euclidean distance over the common prefix of `a` and `b`.
pub fn weighted_distance(a: &[f64], b: &[f64], weights: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .zip(weights)
        .map(|((x, y), w)| w * (x - y).powi(2))
        .sum::<f64>()
        .sqrt()
}

fn euclidean(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| (x - y).powi(2)).sum::<f64>().sqrt()
}

#[derive(Debug, Clone)]
pub struct SelfPlayEpisode {
    cfg: SelfPlayConfig,
    current_time: u32,
    mind: Mind,
    test_mode: bool,
    target: Vec<f64>,
    switched: bool,
    switch_time: u32,
    switch_position: Vec<f64>,
    switch_distance: f64,
    initial_position: Vec<f64>,
    success: bool,

    // Lifetime counters, kept across episodes.
    total_steps: u64,
    total_test_steps: u64,
    episodes: u64,
    test_episodes: u64,
}

impl SelfPlayEpisode {
    pub fn new(cfg: SelfPlayConfig) -> Self {
        Self {
            cfg,
            current_time: 0,
            mind: Mind::SelfPlay,
            test_mode: false,
            target: Vec::new(),
            switched: false,
            switch_time: 0,
            switch_position: Vec::new(),
            switch_distance: 0.0,
            initial_position: Vec::new(),
            success: false,
            total_steps: 0,
            total_test_steps: 0,
            episodes: 0,
            test_episodes: 0,
        }
    }

    pub fn config(&self) -> &SelfPlayConfig {
        &self.cfg
    }

    /// Start a new episode: clear per-episode state and choose test or
    /// self-play mode. Returns whether this is a test episode.
    pub fn begin(&mut self, rng: &mut Prng) -> bool {
        self.test_mode = self.choose_test_mode(rng);
        self.mind = if self.test_mode {
            Mind::Target
        } else {
            Mind::SelfPlay
        };
        self.current_time = 0;
        self.target.clear();
        self.switched = false;
        self.switch_time = 0;
        self.switch_position.clear();
        self.switch_distance = 0.0;
        self.initial_position.clear();
        self.success = false;
        self.episodes += 1;
        if self.test_mode {
            self.test_episodes += 1;
        }
        self.test_mode
    }

    fn choose_test_mode(&self, rng: &mut Prng) -> bool {
        if self.cfg.nminds == 1 {
            return true;
        }
        if self.cfg.test_rate_by_steps {
            (self.total_test_steps as f64) < self.total_steps as f64 * self.cfg.test_rate
        } else {
            rng.next_f64_01() < self.cfg.test_rate
        }
    }

    /// Record the episode's starting point. The start observation is the
    /// initial target; a switch in repeat mode replaces it.
    pub fn set_start(&mut self, observation: Vec<f64>, position: Vec<f64>) {
        self.target = observation;
        self.initial_position = position;
    }

    /// Advance the episode clock by one step.
    pub fn tick(&mut self) {
        self.current_time += 1;
        self.total_steps += 1;
        if self.test_mode {
            self.total_test_steps += 1;
        }
    }

    /// Hand control to the target mind. Returns true when the simulation must
    /// be restored to its initial state (repeat mode).
    pub fn switch(&mut self, position: Vec<f64>, observation: Vec<f64>) -> bool {
        self.mind = Mind::Target;
        self.switched = true;
        self.switch_time = self.current_time;
        self.switch_distance = euclidean(&position, &self.initial_position);
        self.switch_position = position;
        match self.cfg.mode {
            SwitchMode::Repeat => {
                self.target = observation;
                true
            }
            SwitchMode::Reverse => false,
        }
    }

    /// Score `current` against the target; sets `success` on a hit.
    pub fn target_reached(&mut self, current: &[f64], weights: &[f64]) -> bool {
        let dist = weighted_distance(&self.target, current, weights);
        self.success = dist < self.cfg.state_threshold;
        self.success
    }

    /// Per-step reward adjustment applied during the target phase.
    pub fn step_cost(&self) -> f64 {
        if self.cfg.per_step_cost && self.mind == Mind::Target && !self.test_mode {
            -self.cfg.reward_coeff
        } else {
            0.0
        }
    }

    pub fn reward_terminal_mind(&self, mind: Mind) -> f64 {
        if self.test_mode {
            return 0.0;
        }
        let coeff = self.cfg.reward_coeff;
        let t = self.current_time as f64;
        let s = self.switch_time as f64;
        match mind {
            Mind::SelfPlay if self.switched => coeff * (t - 2.0 * s).max(0.0),
            Mind::SelfPlay => 0.0,
            Mind::Target if self.cfg.per_step_cost => 0.0,
            Mind::Target => coeff * (s - t),
        }
    }

    /// Whether a test episode ran out of its step budget.
    pub fn test_budget_exhausted(&self) -> bool {
        self.test_mode
            && self.cfg.test_max_steps > 0
            && self.current_time > self.cfg.test_max_steps
    }

    /// `[mode, time]`: mode is 1 for test episodes and -1 otherwise; time is
    /// the normalized clock, always 0 in test episodes.
    pub fn features(&self) -> [f64; 2] {
        if self.test_mode {
            [1.0, 0.0]
        } else {
            let max = self.cfg.max_steps.max(1) as f64;
            [-1.0, self.current_time as f64 / max]
        }
    }

    /// `base ++ features ++ target`. Test episodes expose a zero target.
    pub fn augment(&self, mut base: Vec<f64>, target_dim: usize) -> Vec<f64> {
        base.extend_from_slice(&self.features());
        if self.test_mode || self.target.len() != target_dim {
            base.extend(std::iter::repeat(0.0).take(target_dim));
        } else {
            base.extend_from_slice(&self.target);
        }
        base
    }

    /// Episode statistics for the controller's logs.
    pub fn stat(&self, final_position: &[f64]) -> Record {
        let mut r = Record::new();
        r.insert("switch_t", self.switch_time);
        r.insert("switch_count", u32::from(self.switched));
        r.insert("switch_dist", self.switch_distance);
        if self.test_mode {
            r.insert("type", "test_task");
            r.insert("test_task_count", 1u32);
            r.insert("test_pos", final_position.to_vec());
            r.insert("test_steps", self.current_time);
        } else {
            r.insert("type", "self_play");
            r.insert("self_play_count", 1u32);
            r.insert("return_t", self.current_time.saturating_sub(self.switch_time));
            r.insert("switch_pos", self.switch_position.clone());
            r.insert("final_pos", final_position.to_vec());
        }
        r.insert("success", Value::Bool(self.success));
        r
    }

    pub fn current_time(&self) -> u32 {
        self.current_time
    }

    pub fn mind(&self) -> Mind {
        self.mind
    }

    pub fn test_mode(&self) -> bool {
        self.test_mode
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn set_success(&mut self, success: bool) {
        self.success = success;
    }

    pub fn switched(&self) -> bool {
        self.switched
    }

    pub fn switch_time(&self) -> u32 {
        self.switch_time
    }

    pub fn target(&self) -> &[f64] {
        &self.target
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    pub fn total_test_steps(&self) -> u64 {
        self.total_test_steps
    }

    pub fn episodes(&self) -> u64 {
        self.episodes
    }

    pub fn test_episodes(&self) -> u64 {
        self.test_episodes
    }
}
