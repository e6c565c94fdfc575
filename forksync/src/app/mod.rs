//! Application wiring

pub mod locks;
pub mod options;
pub mod run;
pub mod shutdown;
pub mod state;
