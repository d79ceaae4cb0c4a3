//! Terminal Core Module
//!
//! Platform-independent screen state. This module contains:
//! - Screen model (primary and alternate buffers, reflowing resize)
//! - Cell representation with attributes
//! - Cursor state and positioning
//! - Scrollback transcript
//! - Deterministic snapshot generation
//!
//! Given the same sequence of operations the core always produces the same
//! state.

mod cell;
mod cursor;
mod screen;
mod scrollback;
mod snapshot;

pub use cell::{Cell, Color, Pen, Style};
pub use cursor::{Cursor, SavedCursor};
pub use screen::{Modes, Screen};
pub use scrollback::{Line, Scrollback};
pub use snapshot::{CellSnapshot, CursorSnapshot, Snapshot};
