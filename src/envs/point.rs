//! Planar point robot (kinematic unicycle).
//!
//! Observation `[x, y, heading, vx, vy]`, action `[forward, turn]` in
//! `[-1, 1]`. Used as the body inside the gather arena and, on its own, as
//! the plain `Point` kind.

use crate::env::{check_action, EnvError, Frame, Record, Simulation, Step};
use crate::envs::canvas::{self, Canvas, Viewport};
use crate::envs::Locomotor;
use crate::sensor::normalize_angle;

pub const OBS_DIM: usize = 5;
pub const ACTION_DIM: usize = 2;
pub const ACTION_BOUND: f64 = 1.0;

/// Distance covered per step at full forward command.
const SPEED: f64 = 0.5;
/// Heading change per step at full turn command.
const TURN_RATE: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PointState {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub vx: f64,
    pub vy: f64,
}

pub struct PointBot {
    state: PointState,
    /// Walls sit at `±wall` on both axes.
    wall: f64,
    frame: Option<Frame>,
}

impl PointBot {
    pub fn new(wall: f64) -> Self {
        Self {
            state: PointState::default(),
            wall,
            frame: None,
        }
    }

    pub fn state(&self) -> PointState {
        self.state
    }

    fn advance(&mut self, action: &[f64]) -> Result<(), EnvError> {
        check_action(action, ACTION_DIM)?;
        let forward = action[0].clamp(-ACTION_BOUND, ACTION_BOUND);
        let turn = action[1].clamp(-ACTION_BOUND, ACTION_BOUND);
        let s = &mut self.state;
        s.heading = normalize_angle(s.heading + turn * TURN_RATE);
        let (x0, y0) = (s.x, s.y);
        s.x = (s.x + s.heading.cos() * forward * SPEED).clamp(-self.wall, self.wall);
        s.y = (s.y + s.heading.sin() * forward * SPEED).clamp(-self.wall, self.wall);
        s.vx = s.x - x0;
        s.vy = s.y - y0;
        Ok(())
    }
}

impl Locomotor for PointBot {
    type State = PointState;

    fn reset(&mut self, state: Option<&PointState>) -> Vec<f64> {
        self.state = state.copied().unwrap_or_default();
        Locomotor::observation(self)
    }

    fn step(&mut self, action: &[f64]) -> Result<Step, EnvError> {
        self.advance(action)?;
        Ok(Step {
            observation: Locomotor::observation(self),
            reward: self.state.vx,
            done: false,
            info: Record::new(),
        })
    }

    fn observation(&self) -> Vec<f64> {
        let s = &self.state;
        vec![s.x, s.y, s.heading, s.vx, s.vy]
    }

    fn observation_dim(&self) -> usize {
        OBS_DIM
    }

    fn position_dim(&self) -> usize {
        2
    }

    fn full_state(&self) -> PointState {
        self.state
    }

    fn body_position(&self) -> [f64; 2] {
        [self.state.x, self.state.y]
    }

    fn orientation(&self) -> f64 {
        self.state.heading
    }

    fn action_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        (vec![-ACTION_BOUND; ACTION_DIM], vec![ACTION_BOUND; ACTION_DIM])
    }

    fn action_from_key(&self, key: &str) -> Option<Vec<f64>> {
        match key {
            "up" => Some(vec![1.0, 0.0]),
            "down" => Some(vec![-1.0, 0.0]),
            "left" => Some(vec![0.0, 1.0]),
            "right" => Some(vec![0.0, -1.0]),
            _ => Some(vec![0.0, 0.0]),
        }
    }
}

impl Simulation for PointBot {
    fn reset(&mut self) -> Result<Vec<f64>, EnvError> {
        Ok(Locomotor::reset(self, None))
    }

    fn step(&mut self, action: &[f64]) -> Result<Step, EnvError> {
        Locomotor::step(self, action)
    }

    fn observation(&self) -> Vec<f64> {
        Locomotor::observation(self)
    }

    fn observation_dim(&self) -> usize {
        OBS_DIM
    }

    fn action_dim(&self) -> usize {
        ACTION_DIM
    }

    fn action_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        Locomotor::action_bounds(self)
    }

    fn render(&mut self) -> Result<(), EnvError> {
        let w = self.wall + 1.0;
        let mut c = Canvas::new(
            120,
            120,
            Viewport {
                x_min: -w,
                x_max: w,
                y_min: -w,
                y_max: w,
            },
        );
        draw_body(&mut c, [self.state.x, self.state.y], self.state.heading, self.wall);
        self.frame = Some(c.into_frame());
        Ok(())
    }

    fn image(&self) -> Option<Frame> {
        self.frame.clone()
    }
}

/// Walls, body and a heading tick.
pub(crate) fn draw_body(c: &mut Canvas, [x, y]: [f64; 2], heading: f64, wall: f64) {
    c.outline(-wall, -wall, wall, wall, canvas::WALL);
    c.disc(x, y, 0.3, canvas::BODY);
    c.line(
        (x, y),
        (x + heading.cos() * 0.6, y + heading.sin() * 0.6),
        canvas::WALL,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::FRAC_PI_2;

    #[test]
    fn drives_forward_along_heading() {
        let mut bot = PointBot::new(7.0);
        Simulation::reset(&mut bot).unwrap();
        let step = Simulation::step(&mut bot, &[1.0, 0.0]).unwrap();
        assert_eq!(step.observation, vec![0.5, 0.0, 0.0, 0.5, 0.0]);
        assert_eq!(step.reward, 0.5);
        assert!(!step.done);
    }

    #[test]
    fn turning_changes_direction_and_walls_clamp() {
        let mut bot = PointBot::new(1.0);
        Simulation::reset(&mut bot).unwrap();
        for _ in 0..5 {
            Simulation::step(&mut bot, &[0.0, 1.0]).unwrap();
        }
        assert!((bot.orientation() - 1.5).abs() < 1e-12);
        for _ in 0..10 {
            Simulation::step(&mut bot, &[1.0, 0.0]).unwrap();
        }
        let [_, y] = bot.body_position();
        assert_eq!(y, 1.0);
    }

    #[test]
    fn full_state_restores_exactly() {
        let mut bot = PointBot::new(7.0);
        Simulation::reset(&mut bot).unwrap();
        Simulation::step(&mut bot, &[1.0, 0.5]).unwrap();
        let snap = bot.full_state();
        Simulation::step(&mut bot, &[-1.0, -1.0]).unwrap();
        let obs = Locomotor::reset(&mut bot, Some(&snap));
        assert_eq!(bot.full_state(), snap);
        assert_eq!(obs, vec![snap.x, snap.y, snap.heading, snap.vx, snap.vy]);
    }

    #[test]
    fn plain_kind_uses_neutral_defaults() {
        let mut bot = PointBot::new(7.0);
        assert!(Simulation::step(&mut bot, &[1.0]).is_err());
        assert_eq!(bot.capabilities(), crate::env::Capabilities::NONE);
        assert_eq!(bot.current_mind(), None);
        assert!(Simulation::action_from_key(&bot, "up").is_none());
        bot.state.heading = FRAC_PI_2;
        bot.render().unwrap();
        assert!(bot.image().is_some());
    }
}
