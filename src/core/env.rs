//! The simulation interface the pool drives.

use thiserror::Error;

use crate::wire::Value;

#[derive(Debug, Error)]
pub enum EnvError {
    /// A state-machine invariant broke; the episode cannot continue.
    #[error("precondition violated: {0}")]
    Precondition(String),
    #[error("invalid action: expected {expected} components, got {got}")]
    InvalidAction { expected: usize, got: usize },
    /// Options that do not fit this simulation kind.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// The underlying simulation failed.
    #[error("simulation failure: {0}")]
    Collaborator(String),
}

/// Ordered string-keyed record used for step info and episode stats.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping first-insertion order.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, v)) => *v = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

impl From<Record> for Value {
    fn from(r: Record) -> Self {
        Value::map(r.entries)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    pub observation: Vec<f64>,
    pub reward: f64,
    pub done: bool,
    pub info: Record,
}

/// Which self-play phase an episode is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mind {
    /// Exploration phase that sets the task.
    SelfPlay = 1,
    /// Target-seeking phase (also used for test tasks).
    Target = 2,
}

impl Mind {
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn from_index(i: i64) -> Option<Mind> {
        match i {
            1 => Some(Mind::SelfPlay),
            2 => Some(Mind::Target),
            _ => None,
        }
    }
}

/// Raw RGB frame, rows stored bottom-to-top like a GL read-back.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: usize,
    pub height: usize,
    pub data: Vec<u8>,
}

/// Optional operations a simulation kind supports. The pool substitutes
/// neutral defaults for anything missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub terminal_reward: bool,
    pub stats: bool,
    pub minds: bool,
    pub image: bool,
    pub keyboard: bool,
}

impl Capabilities {
    pub const NONE: Capabilities = Capabilities {
        terminal_reward: false,
        stats: false,
        minds: false,
        image: false,
        keyboard: false,
    };

    pub const SELF_PLAY: Capabilities = Capabilities {
        terminal_reward: true,
        stats: true,
        minds: true,
        image: true,
        keyboard: true,
    };
}

pub trait Simulation: Send {
    fn reset(&mut self) -> Result<Vec<f64>, EnvError>;

    fn step(&mut self, action: &[f64]) -> Result<Step, EnvError>;

    fn observation(&self) -> Vec<f64>;

    fn observation_dim(&self) -> usize;

    /// Number of action components per step, including any switch bit.
    fn action_dim(&self) -> usize;

    /// Per-component (low, high) bounds of the continuous action part.
    fn action_bounds(&self) -> (Vec<f64>, Vec<f64>);

    fn capabilities(&self) -> Capabilities {
        Capabilities::NONE
    }

    fn reward_terminal(&self) -> f64 {
        0.0
    }

    fn stat(&mut self) -> Record {
        Record::new()
    }

    fn reward_terminal_mind(&self, _mind: Mind) -> f64 {
        0.0
    }

    fn current_mind(&self) -> Option<Mind> {
        None
    }

    fn render(&mut self) -> Result<(), EnvError> {
        Ok(())
    }

    fn image(&self) -> Option<Frame> {
        None
    }

    fn action_from_key(&self, _key: &str) -> Option<Vec<f64>> {
        None
    }
}

pub(crate) fn check_action(action: &[f64], expected: usize) -> Result<(), EnvError> {
    if action.len() != expected {
        return Err(EnvError::InvalidAction {
            expected,
            got: action.len(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_keeps_insertion_order_and_replaces() {
        let mut r = Record::new();
        r.insert("switch_t", 0u32);
        r.insert("type", "self_play");
        r.insert("switch_t", 4u32);
        assert_eq!(r.len(), 2);
        assert_eq!(r.get("switch_t"), Some(&Value::from(4u32)));
        assert_eq!(
            Value::from(r),
            Value::map([
                ("switch_t", Value::from(4u32)),
                ("type", Value::from("self_play")),
            ])
        );
    }
}
