//! Container deployment module

pub mod compose;
pub mod deployer;
pub mod fsm;
pub mod health;
