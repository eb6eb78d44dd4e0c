//! TUI debugger.
//!
//! Provides an interactive terminal-based debugger with:
//! - Disassembly from the current PC
//! - Registers, stack and cache counters
//! - A live view of the 32 cache lines
//! - Step/run/breakpoint controls

mod app;
mod ui;

pub use app::{DebuggerApp, run_debugger};
