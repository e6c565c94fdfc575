pub mod checkpoints;
pub mod layout;
pub mod lock;
pub mod runs;
pub mod settings;
pub mod template;
