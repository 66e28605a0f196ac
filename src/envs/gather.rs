//! Self-play gather arena.
//!
//! A [`Locomotor`] body in a walled arena with apples and bombs. Test episodes
//! score the gather task (+1 apple, -1 bomb). Self-play episodes carry no
//! objects: the self-play mind picks a target state and the target mind has to
//! get the body back to it.

use hashbrown::HashSet;
use tracing::debug;

use crate::env::{Capabilities, EnvError, Frame, Mind, Record, Simulation, Step};
use crate::envs::canvas::{self, Canvas, Viewport};
use crate::envs::point::{draw_body, PointBot};
use crate::envs::{check_action_options, switch_bit, target_weights, Locomotor};
use crate::options::EnvOptions;
use crate::prng::Prng;
use crate::selfplay::{SelfPlayConfig, SelfPlayEpisode};
use crate::sensor::{self, GatherObject, ObjectKind, SensorConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct GatherConfig {
    pub n_apples: usize,
    pub n_bombs: usize,
    pub activity_range: f64,
    pub robot_object_spacing: f64,
    pub catch_range: f64,
    pub sensor: SensorConfig,
}

impl From<&EnvOptions> for GatherConfig {
    fn from(o: &EnvOptions) -> Self {
        Self {
            n_apples: o.n_apples,
            n_bombs: o.n_bombs,
            activity_range: o.activity_range,
            robot_object_spacing: o.robot_object_spacing,
            catch_range: o.catch_range,
            sensor: SensorConfig {
                range: o.sensor_range,
                span: o.sensor_span,
                n_bins: o.n_bins,
            },
        }
    }
}

impl GatherConfig {
    fn half_grid(&self) -> i64 {
        (self.activity_range / 2.0) as i64
    }

    /// Grid cells that are far enough from the origin to hold an object.
    fn free_cells(&self) -> usize {
        let h = self.half_grid();
        let min_sq = self.robot_object_spacing.powi(2);
        (-h..h)
            .flat_map(|i| (-h..h).map(move |j| (i * 2, j * 2)))
            .filter(|&(x, y)| ((x * x + y * y) as f64) >= min_sq)
            .count()
    }
}

/// Rejection-sample apples then bombs onto distinct even grid cells at least
/// `robot_object_spacing` from the origin. The caller guarantees enough cells.
pub fn place_objects(cfg: &GatherConfig, rng: &mut Prng) -> Vec<GatherObject> {
    let h = cfg.half_grid();
    let min_sq = cfg.robot_object_spacing.powi(2);
    let mut taken: HashSet<(i64, i64)> = HashSet::new();
    let mut objects = Vec::with_capacity(cfg.n_apples + cfg.n_bombs);

    let kinds = std::iter::repeat(ObjectKind::Apple)
        .take(cfg.n_apples)
        .chain(std::iter::repeat(ObjectKind::Bomb).take(cfg.n_bombs));
    for kind in kinds {
        loop {
            let x = rng.gen_range_i64(-h, h) * 2;
            let y = rng.gen_range_i64(-h, h) * 2;
            if ((x * x + y * y) as f64) < min_sq || taken.contains(&(x, y)) {
                continue;
            }
            taken.insert((x, y));
            objects.push(GatherObject::new(x as f64, y as f64, kind));
            break;
        }
    }
    objects
}

pub struct SpGather<L: Locomotor> {
    body: L,
    cfg: GatherConfig,
    episode: SelfPlayEpisode,
    rng: Prng,
    objects: Vec<GatherObject>,
    init_state: Option<L::State>,
    weights: Vec<f64>,
    frame: Option<Frame>,
}

impl SpGather<PointBot> {
    /// The `SPPointGather` kind.
    pub fn point(opts: &EnvOptions, rng: Prng) -> Result<Self, EnvError> {
        Self::new(PointBot::new(opts.activity_range + 1.0), opts, rng)
    }
}

impl<L: Locomotor> SpGather<L> {
    pub fn new(body: L, opts: &EnvOptions, rng: Prng) -> Result<Self, EnvError> {
        let (_, high) = body.action_bounds();
        let bound = high.first().copied().unwrap_or(1.0);
        check_action_options(opts, high.len() + 1, bound)?;

        let cfg = GatherConfig::from(opts);
        let needed = cfg.n_apples + cfg.n_bombs;
        let free = cfg.free_cells();
        if needed > free {
            return Err(EnvError::Configuration(format!(
                "{needed} objects do not fit on {free} free grid cells"
            )));
        }

        let weights = target_weights(body.observation_dim(), body.position_dim(), opts.sp_loc_only);
        Ok(Self {
            body,
            cfg,
            episode: SelfPlayEpisode::new(SelfPlayConfig::from(opts)),
            rng,
            objects: Vec::new(),
            init_state: None,
            weights,
            frame: None,
        })
    }

    pub fn objects(&self) -> &[GatherObject] {
        &self.objects
    }

    pub fn episode(&self) -> &SelfPlayEpisode {
        &self.episode
    }

    pub fn body(&self) -> &L {
        &self.body
    }

    fn body_action_dim(&self) -> usize {
        self.body.action_bounds().1.len()
    }

    /// Remove objects within catch range and return their reward.
    fn catch_objects(&mut self) -> f64 {
        let [x, y] = self.body.body_position();
        let r_sq = self.cfg.catch_range.powi(2);
        let mut reward = 0.0;
        self.objects.retain(|o| {
            if o.distance_sq(x, y) < r_sq {
                reward += match o.kind {
                    ObjectKind::Apple => 1.0,
                    ObjectKind::Bomb => -1.0,
                };
                false
            } else {
                true
            }
        });
        reward
    }

    fn mind_info(&self) -> Record {
        let mut info = Record::new();
        info.insert("current_mind", u32::from(self.episode.mind().index()));
        info
    }
}

impl<L: Locomotor> Simulation for SpGather<L> {
    fn reset(&mut self) -> Result<Vec<f64>, EnvError> {
        let test = self.episode.begin(&mut self.rng);
        self.objects = if test {
            place_objects(&self.cfg, &mut self.rng)
        } else {
            Vec::new()
        };
        let start = self.body.reset(None);
        self.init_state = Some(self.body.full_state());
        self.episode.set_start(start, self.body.body_position().to_vec());
        debug!(test, objects = self.objects.len(), "gather episode reset");
        Ok(self.observation())
    }

    fn step(&mut self, action: &[f64]) -> Result<Step, EnvError> {
        let n = self.body_action_dim();
        crate::env::check_action(action, n + 1)?;
        self.episode.tick();

        let inner = self.body.step(&action[..n])?;
        if inner.done {
            return Err(EnvError::Precondition(
                "body simulation terminated inside a gather step".to_string(),
            ));
        }

        let mut reward = 0.0;
        let mut done = false;
        if self.episode.test_mode() {
            reward = self.catch_objects();
            done = self.objects.is_empty();
            self.episode.set_success(done);
            if self.episode.test_budget_exhausted() {
                done = true;
                self.episode.set_success(false);
            }
        } else if self.episode.mind() == Mind::SelfPlay {
            if switch_bit(action) {
                let position = self.body.body_position().to_vec();
                let snapshot = self.body.observation();
                if self.episode.switch(position, snapshot) {
                    self.body.reset(self.init_state.as_ref());
                }
            }
        } else {
            done = self
                .episode
                .target_reached(&self.body.observation(), &self.weights);
        }
        reward += self.episode.step_cost();

        Ok(Step {
            observation: self.observation(),
            reward,
            done,
            info: self.mind_info(),
        })
    }

    fn observation(&self) -> Vec<f64> {
        let (apples, bombs) = sensor::readings(
            &self.objects,
            self.body.body_position(),
            self.body.orientation(),
            &self.cfg.sensor,
        );
        let mut base = self.body.observation();
        base.extend(apples);
        base.extend(bombs);
        self.episode.augment(base, self.body.observation_dim())
    }

    fn observation_dim(&self) -> usize {
        2 * self.body.observation_dim() + 2 * self.cfg.sensor.n_bins + 2
    }

    fn action_dim(&self) -> usize {
        self.body_action_dim() + 1
    }

    fn action_bounds(&self) -> (Vec<f64>, Vec<f64>) {
        self.body.action_bounds()
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::SELF_PLAY
    }

    fn stat(&mut self) -> Record {
        self.episode.stat(&self.body.body_position())
    }

    fn reward_terminal_mind(&self, mind: Mind) -> f64 {
        self.episode.reward_terminal_mind(mind)
    }

    fn current_mind(&self) -> Option<Mind> {
        Some(self.episode.mind())
    }

    fn render(&mut self) -> Result<(), EnvError> {
        let wall = self.cfg.activity_range + 1.0;
        let w = wall + 1.0;
        let mut c = Canvas::new(
            160,
            160,
            Viewport {
                x_min: -w,
                x_max: w,
                y_min: -w,
                y_max: w,
            },
        );
        for o in &self.objects {
            let color = match o.kind {
                ObjectKind::Apple => canvas::APPLE,
                ObjectKind::Bomb => canvas::BOMB,
            };
            c.disc(o.x, o.y, 0.25, color);
        }
        if !self.episode.test_mode() {
            if let [tx, ty, ..] = *self.episode.target() {
                c.disc(tx, ty, 0.2, canvas::TARGET);
            }
        }
        draw_body(
            &mut c,
            self.body.body_position(),
            self.body.orientation(),
            wall,
        );
        self.frame = Some(c.into_frame());
        Ok(())
    }

    fn image(&self) -> Option<Frame> {
        self.frame.clone()
    }

    fn action_from_key(&self, key: &str) -> Option<Vec<f64>> {
        if key == "space" || key == "switch" {
            let mut a = vec![0.0; self.body_action_dim()];
            a.push(1.0);
            return Some(a);
        }
        let mut a = self.body.action_from_key(key)?;
        a.push(0.0);
        Some(a)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::Value;

    fn test_opts() -> EnvOptions {
        EnvOptions {
            nminds: 1,
            ..EnvOptions::default()
        }
    }

    #[test]
    fn placement_avoids_origin_and_duplicate_cells() {
        let cfg = GatherConfig::from(&EnvOptions::default());
        for seed in 1..200 {
            let mut rng = Prng::new(seed);
            let objects = place_objects(&cfg, &mut rng);
            assert_eq!(objects.len(), 16);
            let mut cells = HashSet::new();
            for o in &objects {
                assert!(o.x * o.x + o.y * o.y >= 4.0);
                assert_eq!(o.x.rem_euclid(2.0), 0.0);
                assert_eq!(o.y.rem_euclid(2.0), 0.0);
                assert!((-6.0..=4.0).contains(&o.x));
                assert!(cells.insert((o.x as i64, o.y as i64)));
            }
            let apples = objects.iter().filter(|o| o.kind == ObjectKind::Apple).count();
            assert_eq!(apples, 8);
        }
    }

    #[test]
    fn too_many_objects_is_a_configuration_error() {
        let opts = EnvOptions {
            n_apples: 40,
            ..EnvOptions::default()
        };
        assert!(matches!(
            SpGather::point(&opts, Prng::new(1)),
            Err(EnvError::Configuration(_))
        ));
        let opts = EnvOptions {
            naction_heads: Some(2),
            ..EnvOptions::default()
        };
        assert!(SpGather::point(&opts, Prng::new(1)).is_err());
    }

    #[test]
    fn observation_layout() {
        let mut env = SpGather::point(&test_opts(), Prng::new(7)).unwrap();
        let obs = env.reset().unwrap();
        assert_eq!(obs.len(), env.observation_dim());
        assert_eq!(obs.len(), 5 + 10 + 10 + 2 + 5);
        assert_eq!(&obs[25..27], &[1.0, 0.0]);
        assert!(obs[27..].iter().all(|&v| v == 0.0));
        assert_eq!(env.objects().len(), 16);
        assert_eq!(env.action_dim(), 3);
    }

    #[test]
    fn catching_an_apple_scores_and_removes_it() {
        let opts = EnvOptions {
            n_apples: 1,
            n_bombs: 1,
            ..test_opts()
        };
        let mut env = SpGather::point(&opts, Prng::new(3)).unwrap();
        env.reset().unwrap();
        env.objects = vec![
            GatherObject::new(0.5, 0.0, ObjectKind::Apple),
            GatherObject::new(-4.0, 0.0, ObjectKind::Bomb),
        ];
        let step = env.step(&[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(step.reward, 1.0);
        assert!(!step.done);
        assert_eq!(env.objects().len(), 1);
        env.objects[0] = GatherObject::new(1.0, 0.0, ObjectKind::Bomb);
        let step = env.step(&[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(step.reward, -1.0);
        assert!(step.done);
        assert_eq!(env.stat().get("success"), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_step_budget_forces_failure() {
        let opts = EnvOptions {
            sp_test_max_steps: 2,
            ..test_opts()
        };
        let mut env = SpGather::point(&opts, Prng::new(5)).unwrap();
        env.reset().unwrap();
        env.objects = vec![GatherObject::new(6.0, 6.0, ObjectKind::Apple)];
        assert!(!env.step(&[0.0, 0.0, 0.0]).unwrap().done);
        assert!(!env.step(&[0.0, 0.0, 0.0]).unwrap().done);
        let step = env.step(&[0.0, 0.0, 0.0]).unwrap();
        assert!(step.done);
        assert_eq!(env.stat().get("success"), Some(&Value::Bool(false)));
    }

    #[test]
    fn self_play_round_trip() {
        let mut env = SpGather::point(&EnvOptions::default(), Prng::new(11)).unwrap();
        env.reset().unwrap();
        assert!(env.objects().is_empty());
        env.step(&[1.0, 0.0, 0.0]).unwrap();
        env.step(&[1.0, 0.0, 0.0]).unwrap();
        // Switch at (1.5, 0): body goes back to the origin.
        let step = env.step(&[1.0, 0.0, 1.0]).unwrap();
        assert!(!step.done);
        assert_eq!(env.current_mind(), Some(Mind::Target));
        assert_eq!(env.body().body_position(), [0.0, 0.0]);
        assert_eq!(env.episode().target()[0], 1.5);
        for _ in 0..3 {
            let step = env.step(&[1.0, 0.0, 0.0]).unwrap();
            if step.done {
                break;
            }
        }
        assert!(env.episode().success());
        let stat = env.stat();
        assert_eq!(stat.get("switch_t"), Some(&Value::from(3u32)));
        assert_eq!(stat.get("switch_dist"), Some(&Value::from(1.5)));
        // Returned at T = 6: 0.01 * max(0, 6 - 6) and 0.01 * (3 - 6).
        assert_eq!(env.reward_terminal_mind(Mind::SelfPlay), 0.0);
        assert!((env.reward_terminal_mind(Mind::Target) + 0.03).abs() < 1e-12);
    }

    #[test]
    fn key_mapping_appends_switch_bit() {
        let env = SpGather::point(&EnvOptions::default(), Prng::new(1)).unwrap();
        assert_eq!(env.action_from_key("up"), Some(vec![1.0, 0.0, 0.0]));
        assert_eq!(env.action_from_key("space"), Some(vec![0.0, 0.0, 1.0]));
    }

    struct Collapsing;

    impl Locomotor for Collapsing {
        type State = ();

        fn reset(&mut self, _state: Option<&()>) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn step(&mut self, _action: &[f64]) -> Result<Step, EnvError> {
            Ok(Step {
                observation: vec![0.0, 0.0],
                reward: 0.0,
                done: true,
                info: Record::new(),
            })
        }

        fn observation(&self) -> Vec<f64> {
            vec![0.0, 0.0]
        }

        fn observation_dim(&self) -> usize {
            2
        }

        fn position_dim(&self) -> usize {
            2
        }

        fn full_state(&self) {}

        fn body_position(&self) -> [f64; 2] {
            [0.0, 0.0]
        }

        fn orientation(&self) -> f64 {
            0.0
        }

        fn action_bounds(&self) -> (Vec<f64>, Vec<f64>) {
            (vec![-1.0], vec![1.0])
        }
    }

    #[test]
    fn inner_termination_is_a_precondition_violation() {
        let mut env = SpGather::new(Collapsing, &EnvOptions::default(), Prng::new(1)).unwrap();
        env.reset().unwrap();
        assert!(matches!(
            env.step(&[0.0, 0.0]),
            Err(EnvError::Precondition(_))
        ));
    }

    #[test]
    fn point_body_draws_into_a_frame() {
        let mut env = SpGather::point(&test_opts(), Prng::new(2)).unwrap();
        env.reset().unwrap();
        env.render().unwrap();
        let frame = env.image().unwrap();
        assert_eq!((frame.width, frame.height), (160, 160));
    }
}
