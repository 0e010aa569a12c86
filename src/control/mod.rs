//! Control layer exposing driver state to external tooling.

/// High-level control API for the relay driver.
pub mod api;
/// Ratatui-based developer console.
pub mod ui;
