//! Self-play mountain car.
//!
//! A car in a `sin(3x)` valley, too weak to drive straight up the right hill.
//! The action is `[force, switch]`; the switch component hands control from
//! the self-play mind to the target mind.

use crate::env::{
    check_action, Capabilities, EnvError, Frame, Mind, Record, Simulation, Step,
};
use crate::envs::canvas::{self, Canvas, Viewport};
use crate::envs::{check_action_options, switch_bit, target_weights};
use crate::options::EnvOptions;
use crate::prng::Prng;
use crate::selfplay::{SelfPlayConfig, SelfPlayEpisode};

const FORCE: f64 = 0.001;
const GRAVITY: f64 = 0.0025;
const MAX_SPEED: f64 = 0.07;
const MAX_CART_POS: f64 = 2.0;
/// Bottom of the valley.
const START_POS: f64 = -std::f64::consts::FRAC_PI_6;
const START_SPEED: f64 = MAX_SPEED * 0.5;

const STATE_DIM: usize = 2;
const ACTION_DIM: usize = 2;

const RENDER_W: usize = 160;
const RENDER_H: usize = 100;

pub struct SpMountainCar {
    goal: f64,
    pos: f64,
    vel: f64,
    initial: (f64, f64),
    weights: Vec<f64>,
    episode: SelfPlayEpisode,
    rng: Prng,
    frame: Option<Frame>,
}

impl SpMountainCar {
    pub fn new(opts: &EnvOptions, rng: Prng) -> Result<Self, EnvError> {
        check_action_options(opts, ACTION_DIM, 1.0)?;
        Ok(Self {
            goal: opts.goal_cart_pos,
            pos: START_POS,
            vel: 0.0,
            initial: (START_POS, 0.0),
            weights: target_weights(STATE_DIM, 1, opts.sp_loc_only),
            episode: SelfPlayEpisode::new(SelfPlayConfig::from(opts)),
            rng,
            frame: None,
        })
    }

    pub fn episode(&self) -> &SelfPlayEpisode {
        &self.episode
    }

    pub fn state(&self) -> (f64, f64) {
        (self.pos, self.vel)
    }

    fn raw(&self) -> Vec<f64> {
        vec![self.pos, self.vel]
    }

    fn integrate(&mut self, force: f64) {
        self.vel += force * FORCE - GRAVITY * (3.0 * self.pos).cos();
        self.vel = self.vel.clamp(-MAX_SPEED, MAX_SPEED);
        self.pos += self.vel;
    }

    fn height(x: f64) -> f64 {
        (3.0 * x).sin() * 0.45 + 0.55
    }
}

impl Simulation for SpMountainCar {
    fn reset(&mut self) -> Result<Vec<f64>, EnvError> {
        self.episode.begin(&mut self.rng);
        self.pos = START_POS;
        self.vel = self.rng.gen_range_f64(-START_SPEED, START_SPEED);
        self.initial = (self.pos, self.vel);
        self.episode.set_start(self.raw(), vec![self.pos]);
        Ok(self.observation())
    }

    fn step(&mut self, action: &[f64]) -> Result<Step, EnvError> {
        check_action(action, ACTION_DIM)?;
        self.episode.tick();
        self.integrate(action[0].clamp(-1.0, 1.0));

        let at_goal = self.pos >= self.goal;
        let out_of_bounds = self.pos.abs() >= MAX_CART_POS;
        let mut reward = 0.0;
        let mut done = false;

        if self.episode.test_mode() {
            done = at_goal || out_of_bounds;
            if at_goal {
                reward = 1.0;
            }
            self.episode.set_success(at_goal);
        } else if at_goal || out_of_bounds {
            done = true;
            self.episode.set_success(false);
        } else if self.episode.mind() == Mind::SelfPlay {
            if switch_bit(action) && self.episode.switch(vec![self.pos], self.raw()) {
                (self.pos, self.vel) = self.initial;
            }
        } else {
            done = self.episode.target_reached(&self.raw(), &self.weights);
        }
        reward += self.episode.step_cost();

        let mut info = Record::new();
        info.insert("current_mind", u32::from(self.episode.mind().index()));
        Ok(Step {
            observation: self.observation(),
            reward,
            done,
            info,
        })
    }

    fn observation(&self) -> Vec<f64> {
        self.episode.augment(self.raw(), STATE_DIM)
    }

    fn observation_dim(&self) -> usize {
        STATE_DIM + 2 + STATE_DIM
    }

    fn action_dim(&self) -> usize {
        ACTION_DIM
    }

    fn action_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        (vec![-1.0], vec![1.0])
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SELF_PLAY
    }

    fn stat(&mut self) -> Record {
        self.episode.stat(&[self.pos])
    }

    fn reward_terminal_mind(&self, mind: Mind) -> f64 {
        self.episode.reward_terminal_mind(mind)
    }

    fn current_mind(&self) -> Option<Mind> {
        Some(self.episode.mind())
    }

    fn render(&mut self) -> Result<(), EnvError> {
        let mut c = Canvas::new(
            RENDER_W,
            RENDER_H,
            Viewport {
                x_min: -MAX_CART_POS,
                x_max: MAX_CART_POS,
                y_min: 0.0,
                y_max: RENDER_H as f64 / RENDER_W as f64 * 2.0 * MAX_CART_POS,
            },
        );
        let n = RENDER_W * 2;
        for i in 0..n {
            let x0 = -MAX_CART_POS + 2.0 * MAX_CART_POS * i as f64 / n as f64;
            let x1 = -MAX_CART_POS + 2.0 * MAX_CART_POS * (i + 1) as f64 / n as f64;
            c.line((x0, Self::height(x0)), (x1, Self::height(x1)), canvas::WALL);
        }
        c.line(
            (self.goal, Self::height(self.goal)),
            (self.goal, Self::height(self.goal) + 0.3),
            canvas::TARGET,
        );
        if !self.episode.test_mode() && self.episode.switched() {
            if let Some(&tx) = self.episode.target().first() {
                c.disc(tx, Self::height(tx), 0.04, canvas::TARGET);
            }
        }
        c.disc(self.pos, Self::height(self.pos) + 0.05, 0.06, canvas::BODY);
        self.frame = Some(c.into_frame());
        Ok(())
    }

    fn image(&self) -> Option<Frame> {
        self.frame.clone()
    }

    fn action_from_key(&self, key: &str) -> Option<Vec<f64>> {
        match key {
            "left" => Some(vec![-1.0, 0.0]),
            "right" => Some(vec![1.0, 0.0]),
            "space" | "switch" => Some(vec![0.0, 1.0]),
            _ => Some(vec![0.0, 0.0]),
        }
    }
}
