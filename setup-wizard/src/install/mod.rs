pub mod command;
pub mod progress;
pub mod runner;
