//! Command-line interface module.
//!
//! This module provides the CLI functionality for:
//! - Running a relay link
//! - Inspecting the effective configuration

pub mod commands;
pub mod handlers;
pub mod logging;
pub mod processors;

pub use handlers::{handle_config, handle_serve};
pub use processors::BuiltinProcessor;
