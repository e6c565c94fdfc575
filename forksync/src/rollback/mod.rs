//! Rollback module

pub mod engine;
