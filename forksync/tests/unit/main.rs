//! Integration tests against real git repositories

mod support;
mod test_orchestrator;
mod test_rollback;
mod test_sync;
