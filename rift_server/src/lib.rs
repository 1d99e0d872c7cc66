#[macro_use]
extern crate log;

use rand::rngs::ThreadRng;
use std::cell::RefCell;

pub mod combat;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod extraction;
pub mod input;
pub mod item;
pub mod lobby;
pub mod loot;
pub mod mob;
pub mod net;
pub mod player;
pub mod session;
pub mod snapshot;
pub mod world;

thread_local!(pub(crate) static RNG: RefCell<ThreadRng> = RefCell::new(rand::thread_rng()));

/// Runs `f` with the thread local rng. All game rolls (damage variance,
/// crits, loot tables) go through here, so tests can at least rely on not
/// sharing an rng between threads.
pub(crate) fn with_rng<R>(f: impl FnOnce(&mut ThreadRng) -> R) -> R {
  RNG.with(|rng| f(&mut rng.borrow_mut()))
}
