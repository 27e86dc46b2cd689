//! termpilot - a headless terminal supervisor
//!
//! Launches child programs under a pseudo-terminal, interprets their VT/ANSI
//! output into an in-memory screen model with scrollback, accepts synthetic
//! keyboard input, and exposes the terminal state to an out-of-process
//! controller over a JSON-over-stdio protocol.
//!
//! The crate is organized around a small set of components:
//!
//! - [`core::keymap`] - symbolic key names to VT byte sequences
//! - [`core::term`] - the VT parser and the screen model it drives
//! - [`core::pty`] - the PTY-backed child process channel
//! - [`core::session`] - one child + one terminal + one reader task
//! - [`core::registry`] - keyed session map with capacity and idle eviction
//! - [`server`] - the typed operations the controller invokes

pub mod config;
pub mod core;
pub mod server;
