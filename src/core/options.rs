//! Pool options as sent by the controller in `init(kind, count, options)`.

use serde::Deserialize;

use crate::wire::{Number, Value, WireError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SwitchMode {
    /// Snapshot the target at the switch and restart the simulation from the
    /// episode's initial state.
    #[default]
    Repeat,
    /// Keep going from the switch point; the episode start stays the target.
    Reverse,
}

fn default_nminds() -> u32 {
    2
}

fn default_state_thres() -> f64 {
    0.2
}

fn default_reward_coeff() -> f64 {
    0.01
}

fn default_max_steps() -> u32 {
    100
}

fn default_true() -> bool {
    true
}

fn default_n_objects() -> usize {
    8
}

fn default_activity_range() -> f64 {
    6.0
}

fn default_object_spacing() -> f64 {
    2.0
}

fn default_catch_range() -> f64 {
    1.0
}

fn default_n_bins() -> usize {
    10
}

fn default_sensor_range() -> f64 {
    6.0
}

fn default_sensor_span() -> f64 {
    std::f64::consts::PI
}

fn default_goal_cart_pos() -> f64 {
    0.6
}

/// Every field has a default; unknown keys are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EnvOptions {
    /// 1 means every episode is a test task.
    #[serde(default = "default_nminds")]
    pub nminds: u32,
    #[serde(default)]
    pub sp_test_rate: f64,
    /// Gate test episodes on the step ratio instead of per-episode sampling.
    #[serde(default)]
    pub sp_test_rate_bysteps: bool,
    #[serde(default = "default_state_thres")]
    pub sp_state_thres: f64,
    #[serde(default = "default_reward_coeff")]
    pub sp_reward_coeff: f64,
    /// Normalizer for the time feature in observations.
    #[serde(default = "default_max_steps")]
    pub max_steps: u32,
    /// Compare only the positional prefix when scoring the target phase.
    #[serde(default)]
    pub sp_loc_only: bool,
    /// Charge the target phase per step instead of at episode end.
    #[serde(default)]
    pub sp_reward_bob_step: bool,
    #[serde(default)]
    pub sp_mode: SwitchMode,
    /// Step budget for test tasks; 0 disables it.
    #[serde(default)]
    pub sp_test_max_steps: u32,

    /// Expected action arity, checked against the simulation kind.
    #[serde(default)]
    pub naction_heads: Option<usize>,
    #[serde(default = "default_true")]
    pub rllab_cont_action: bool,
    #[serde(default)]
    pub rllab_cont_limit: Option<f64>,
    #[serde(default)]
    pub rllab_normalize_rllab: bool,

    /// Base seed; member `i` derives its own stream from it.
    #[serde(default)]
    pub seed: Option<u64>,

    #[serde(default = "default_n_objects")]
    pub n_apples: usize,
    #[serde(default = "default_n_objects")]
    pub n_bombs: usize,
    #[serde(default = "default_activity_range")]
    pub activity_range: f64,
    #[serde(default = "default_object_spacing")]
    pub robot_object_spacing: f64,
    #[serde(default = "default_catch_range")]
    pub catch_range: f64,
    #[serde(default = "default_n_bins")]
    pub n_bins: usize,
    #[serde(default = "default_sensor_range")]
    pub sensor_range: f64,
    #[serde(default = "default_sensor_span")]
    pub sensor_span: f64,

    #[serde(default = "default_goal_cart_pos")]
    pub goal_cart_pos: f64,
}

impl Default for EnvOptions {
    fn default() -> Self {
        Self {
            nminds: default_nminds(),
            sp_test_rate: 0.0,
            sp_test_rate_bysteps: false,
            sp_state_thres: default_state_thres(),
            sp_reward_coeff: default_reward_coeff(),
            max_steps: default_max_steps(),
            sp_loc_only: false,
            sp_reward_bob_step: false,
            sp_mode: SwitchMode::default(),
            sp_test_max_steps: 0,
            naction_heads: None,
            rllab_cont_action: true,
            rllab_cont_limit: None,
            rllab_normalize_rllab: false,
            seed: None,
            n_apples: default_n_objects(),
            n_bombs: default_n_objects(),
            activity_range: default_activity_range(),
            robot_object_spacing: default_object_spacing(),
            catch_range: default_catch_range(),
            n_bins: default_n_bins(),
            sensor_range: default_sensor_range(),
            sensor_span: default_sensor_span(),
            goal_cart_pos: default_goal_cart_pos(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OptionsError {
    #[error("options must be a table with string keys: {0}")]
    Shape(#[from] WireError),
    #[error("invalid option: {0}")]
    Invalid(#[from] serde_json::Error),
}

impl EnvOptions {
    /// Build from the controller's options table (`nil` means all defaults).
    pub fn from_value(value: &Value) -> Result<Self, OptionsError> {
        if is_empty_table(value) {
            return Ok(Self::default());
        }
        Ok(serde_json::from_value(to_json(value)?)?)
    }

    pub fn from_json_str(text: &str) -> Result<Self, OptionsError> {
        Ok(serde_json::from_str(text)?)
    }
}

fn is_empty_table(value: &Value) -> bool {
    match value {
        Value::Nil => true,
        Value::Seq(items) => items.is_empty(),
        _ => false,
    }
}

/// Convert a wire value to JSON. Integral doubles become integers so that
/// controllers whose only number type is a double can set integer options.
pub fn to_json(value: &Value) -> Result<serde_json::Value, WireError> {
    use serde_json::Value as J;
    Ok(match value {
        Value::Nil => J::Null,
        Value::Bool(b) => J::Bool(*b),
        Value::Str(s) => J::String(s.clone()),
        Value::Number(n) => match n.as_i64() {
            Some(i) => J::from(i),
            None => match n {
                Number::Float(f) => serde_json::Number::from_f64(*f).map_or(J::Null, J::Number),
                Number::Int(i) => J::from(*i),
            },
        },
        Value::Tensor(t) => J::Array(t.data().iter().map(|&x| J::from(x)).collect()),
        Value::Seq(items) => J::Array(items.iter().map(to_json).collect::<Result<_, _>>()?),
        Value::Map(entries) => {
            let mut obj = serde_json::Map::new();
            for (k, v) in entries {
                let key = match k {
                    Value::Str(s) => s.clone(),
                    Value::Number(n) => n.as_f64().to_string(),
                    _ => return Err(WireError::UnsupportedType("non-scalar option key")),
                };
                obj.insert(key, to_json(v)?);
            }
            J::Object(obj)
        }
    })
}
