//! Maintenance jobs

pub mod cleanup;
