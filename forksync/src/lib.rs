//! forksync Library
//!
//! Fork synchronisation, checkpoints and rollback, and compose redeployment.

pub mod app;
pub mod cache;
pub mod cli;
pub mod commands;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod logs;
pub mod maintenance;
pub mod models;
pub mod process;
pub mod registry;
pub mod rollback;
pub mod storage;
pub mod sync;
pub mod utils;
