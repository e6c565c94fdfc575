pub mod checkpoint;
pub mod run;
