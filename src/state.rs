//! Shared mutable core: one mutex over the accumulator and the limit
//! store, so usage reads, breach evaluation, and grant application are
//! serialized against each other.

use std::sync::Arc;

use tokio::sync::Mutex;

use crate::limits::LimitStore;
use crate::usage::SessionAccumulator;

#[derive(Debug, Default)]
pub struct GovernorState {
    pub usage: SessionAccumulator,
    pub limits: LimitStore,
}

pub type SharedState = Arc<Mutex<GovernorState>>;

pub fn shared_state() -> SharedState {
    Arc::new(Mutex::new(GovernorState {
        usage: SessionAccumulator::new(),
        limits: LimitStore::new(),
    }))
}
