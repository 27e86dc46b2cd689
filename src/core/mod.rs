//! Core terminal engine components.
//!
//! - **keymap**: symbolic key names to VT byte sequences
//! - **pty**: PTY-backed child process channel
//! - **term**: VT/ANSI parser and the screen model it drives
//! - **session**: one child + one terminal + one reader task
//! - **registry**: keyed session map with capacity and idle eviction
//!
//! # Architecture
//!
//! ```text
//! Registry
//! └── Session (one per child)
//!     ├── PtyChannel (spawn / read / write / resize / stop)
//!     └── Terminal
//!         ├── Screen (cell grid + scrollback + raw log)
//!         └── VtParser (escape-sequence state machine)
//! ```

pub mod keymap;
pub mod pty;
pub mod registry;
pub mod session;
pub mod term;
