// Library surface: diff compilation, session model and the replay engine.
// The binary in main.rs only wires these together.
pub mod actuator;
pub mod app_dirs;
pub mod compiler;
pub mod config;
pub mod diff;
pub mod engine;
pub mod error;
pub mod git;
pub mod grouping;
pub mod keyboard;
pub mod overrides;
pub mod runtime;
pub mod session;
pub mod terminal;
pub mod typing;
pub mod util;
