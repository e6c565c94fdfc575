pub mod git;
pub mod hooks;
pub mod state;
pub mod syncer;
