// Core commands
pub mod actions;
pub mod run;
