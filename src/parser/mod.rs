//! Terminal escape sequence parser
//!
//! A stateful parser that converts bytes from the child process into terminal
//! actions. Based on the VT500-series parser model from
//! <https://vt100.net/emu/dec_ansi_parser>

mod actions;
mod state;

pub use actions::{Action, CsiAction, DynamicColor, EscAction, OscAction, MAX_PARAMS};
pub use state::Parser;
