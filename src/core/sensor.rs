//! Range-limited angular sensor for gatherable objects.
//!
//! The field of view (`span`, centred on the robot heading) is cut into
//! `n_bins` equal sectors. Each sector reports `1 - distance / range` for the
//! nearest object of each kind that falls inside it, and 0 when empty.

use std::f64::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Apple,
    Bomb,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GatherObject {
    pub x: f64,
    pub y: f64,
    pub kind: ObjectKind,
}

impl GatherObject {
    pub fn new(x: f64, y: f64, kind: ObjectKind) -> Self {
        Self { x, y, kind }
    }

    pub fn distance_sq(&self, x: f64, y: f64) -> f64 {
        (self.x - x).powi(2) + (self.y - y).powi(2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorConfig {
    pub range: f64,
    /// Total angular field of view, radians.
    pub span: f64,
    pub n_bins: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            range: 6.0,
            span: PI,
            n_bins: 10,
        }
    }
}

/// Wrap an angle into (-pi, pi].
pub fn normalize_angle(angle: f64) -> f64 {
    let mut a = angle.rem_euclid(2.0 * PI);
    if a > PI {
        a -= 2.0 * PI;
    }
    a
}

/// Apple and bomb intensities seen from `robot` facing `heading`.
pub fn readings(
    objects: &[GatherObject],
    robot: [f64; 2],
    heading: f64,
    cfg: &SensorConfig,
) -> (Vec<f64>, Vec<f64>) {
    let mut apples = vec![0.0; cfg.n_bins];
    let mut bombs = vec![0.0; cfg.n_bins];
    if cfg.n_bins == 0 {
        return (apples, bombs);
    }

    // Farthest first: nearer objects overwrite the bins of farther ones.
    let mut sorted: Vec<&GatherObject> = objects.iter().collect();
    sorted.sort_by(|a, b| {
        let da = a.distance_sq(robot[0], robot[1]);
        let db = b.distance_sq(robot[0], robot[1]);
        db.total_cmp(&da)
    });

    let half_span = cfg.span * 0.5;
    let bin_res = cfg.span / cfg.n_bins as f64;

    for obj in sorted {
        let dist = obj.distance_sq(robot[0], robot[1]).sqrt();
        if dist > cfg.range {
            continue;
        }
        let bearing = normalize_angle((obj.y - robot[1]).atan2(obj.x - robot[0]) - heading);
        if bearing.abs() > half_span {
            continue;
        }
        let bin = (((bearing + half_span) / bin_res).floor().max(0.0) as usize).min(cfg.n_bins - 1);
        let intensity = 1.0 - dist / cfg.range;
        match obj.kind {
            ObjectKind::Apple => apples[bin] = intensity,
            ObjectKind::Bomb => bombs[bin] = intensity,
        }
    }

    (apples, bombs)
}
