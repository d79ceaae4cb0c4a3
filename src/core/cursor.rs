//! Cursor state
//!
//! Position, the pen stamped onto new characters, and the modes that travel
//! with the cursor through DECSC/DECRC and CSI s/u.

use serde::{Deserialize, Serialize};

use super::Pen;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// 0-indexed column
    pub col: usize,
    /// 0-indexed row
    pub row: usize,
    /// DECTCEM
    pub visible: bool,
    pub pen: Pen,
    /// DECOM: row addressing relative to the scroll region
    pub origin_mode: bool,
    /// DECAWM
    pub autowrap: bool,
    /// The last column was written; the next printable character wraps first
    pub pending_wrap: bool,
    /// IRM
    pub insert_mode: bool,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            col: 0,
            row: 0,
            visible: true,
            pen: Pen::default(),
            origin_mode: false,
            autowrap: true,
            pending_wrap: false,
            insert_mode: false,
        }
    }
}

/// What DECSC remembers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SavedCursor {
    pub col: usize,
    pub row: usize,
    pub pen: Pen,
    pub origin_mode: bool,
    pub autowrap: bool,
}

impl Default for SavedCursor {
    fn default() -> Self {
        Cursor::default().save()
    }
}

impl Cursor {
    pub fn new() -> Self {
        Self::default()
    }

    fn place(&mut self, col: usize, row: usize) {
        self.col = col;
        self.row = row;
        self.pending_wrap = false;
    }

    /// CUU: stops at the top margin when starting inside the scroll region,
    /// at row 0 otherwise
    pub fn move_up(&mut self, n: usize, top: usize) {
        let floor = if self.row < top { 0 } else { top };
        self.place(self.col, self.row.saturating_sub(n).max(floor));
    }

    /// CUD: stops at the bottom margin when starting inside the scroll
    /// region, at the last row otherwise
    pub fn move_down(&mut self, n: usize, bottom: usize, rows: usize) {
        let ceiling = if self.row > bottom {
            rows.saturating_sub(1)
        } else {
            bottom
        };
        self.place(self.col, self.row.saturating_add(n).min(ceiling));
    }

    pub fn move_left(&mut self, n: usize) {
        self.place(self.col.saturating_sub(n), self.row);
    }

    pub fn move_right(&mut self, n: usize, cols: usize) {
        let last = cols.saturating_sub(1);
        self.place(self.col.saturating_add(n).min(last), self.row);
    }

    pub fn carriage_return(&mut self) {
        self.place(0, self.row);
    }

    /// Pull the cursor back inside a `cols` x `rows` grid
    pub fn clamp(&mut self, cols: usize, rows: usize) {
        if self.col >= cols {
            self.place(cols.saturating_sub(1), self.row);
        }
        self.row = self.row.min(rows.saturating_sub(1));
    }

    pub fn save(&self) -> SavedCursor {
        SavedCursor {
            col: self.col,
            row: self.row,
            pen: self.pen,
            origin_mode: self.origin_mode,
            autowrap: self.autowrap,
        }
    }

    /// DECRC, clamped to the current grid
    pub fn restore(&mut self, saved: &SavedCursor, cols: usize, rows: usize) {
        self.place(
            saved.col.min(cols.saturating_sub(1)),
            saved.row.min(rows.saturating_sub(1)),
        );
        self.pen = saved.pen;
        self.origin_mode = saved.origin_mode;
        self.autowrap = saved.autowrap;
    }
}
