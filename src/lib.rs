//! spworker: a batched reinforcement-learning simulation worker.
//!
//! A remote controller sends framed requests; the [`dispatch::Dispatcher`]
//! decodes them with the [`wire`] codec and runs them against a
//! [`script::ScriptHost`], which owns an [`pool::EnvPool`] of simulations.
//! The built-in simulation kinds live in [`envs`] and share the two-phase
//! [`selfplay`] episode machinery and the angular [`sensor`] model.

#[path = "core/wire.rs"]
pub mod wire;

#[path = "core/frame.rs"]
pub mod frame;

#[path = "core/dispatch.rs"]
pub mod dispatch;

#[path = "core/script.rs"]
pub mod script;

#[path = "core/pool.rs"]
pub mod pool;

#[path = "core/env.rs"]
pub mod env;

#[path = "core/options.rs"]
pub mod options;

#[path = "core/selfplay.rs"]
pub mod selfplay;

#[path = "core/sensor.rs"]
pub mod sensor;

#[path = "core/normalize.rs"]
pub mod normalize;

#[path = "core/prng.rs"]
pub mod prng;

pub mod envs;

pub use dispatch::{Dispatcher, Handler, Reply};
pub use pool::{EnvKind, EnvPool, PoolError};
pub use script::ScriptHost;
pub use wire::{Tensor, Value, WireError};
