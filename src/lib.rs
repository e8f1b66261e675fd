//! Black-box acceptance testing: run recipes of commands and assertions
//! against programs and the system they run on.

pub mod action;
pub mod cli;
pub mod commands;
pub mod config;
pub mod engine;
pub mod paths;
pub mod render;
pub mod runner;
pub mod ui;

/// Global context for the application
pub struct Context {
    pub verbose: u8,
    pub quiet: bool,
}
