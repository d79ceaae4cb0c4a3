//! The emulated display
//!
//! The screen is the visible terminal grid plus the state that shapes how
//! text lands in it: cursor, scroll region, tab stops and mode flags. It has
//! a primary buffer backed by the scrollback transcript and an alternate
//! buffer without one.
//!
//! Resizing reflows the primary buffer: rows joined by soft wraps are treated
//! as one logical line and re-wrapped at the new width, for the scrollback as
//! well as the visible rows.

use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthChar;

use super::cell::Cell;
use super::cursor::{Cursor, SavedCursor};
use super::scrollback::{Line, Scrollback};

/// Distance between default tab stops
const TAB_WIDTH: usize = 8;

/// Terminal mode flags that live outside the cursor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Modes {
    /// DECCKM: arrows send SS3 sequences
    pub application_cursor: bool,
    /// DECKPAM set, DECKPNM cleared
    pub application_keypad: bool,
    /// Mode 2004: pastes are wrapped in markers
    pub bracketed_paste: bool,
    /// LNM: LF also returns the carriage
    pub linefeed_mode: bool,
    /// DECSCNM: whole screen drawn inverted
    pub reverse_video: bool,
}

/// Primary and alternate grids plus everything addressing them
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Screen {
    cols: usize,
    rows: usize,
    primary_grid: Vec<Line>,
    alternate_grid: Vec<Line>,
    /// Rows scrolled off the primary grid
    scrollback: Scrollback,
    cursor: Cursor,
    /// DECSC slot used while the primary grid is shown
    primary_saved_cursor: SavedCursor,
    /// DECSC slot used while the alternate grid is shown
    alternate_saved_cursor: SavedCursor,
    /// First row of the scroll region
    scroll_top: usize,
    /// Last row of the scroll region, inclusive
    scroll_bottom: usize,
    tab_stops: Vec<bool>,
    pub modes: Modes,
    on_alternate: bool,
}

impl Screen {
    /// Create a new screen; zero dimensions are raised to 1
    pub fn new(cols: usize, rows: usize, scrollback_capacity: usize) -> Self {
        let cols = cols.max(1);
        let rows = rows.max(1);

        Self {
            cols,
            rows,
            primary_grid: blank_grid(cols, rows),
            alternate_grid: blank_grid(cols, rows),
            scrollback: Scrollback::new(scrollback_capacity),
            cursor: Cursor::new(),
            primary_saved_cursor: SavedCursor::default(),
            alternate_saved_cursor: SavedCursor::default(),
            scroll_top: 0,
            scroll_bottom: rows - 1,
            tab_stops: default_tab_stops(cols),
            modes: Modes::default(),
            on_alternate: false,
        }
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    fn grid(&self) -> &Vec<Line> {
        if self.on_alternate {
            &self.alternate_grid
        } else {
            &self.primary_grid
        }
    }

    fn grid_mut(&mut self) -> &mut Vec<Line> {
        if self.on_alternate {
            &mut self.alternate_grid
        } else {
            &mut self.primary_grid
        }
    }

    pub fn cursor(&self) -> &Cursor {
        &self.cursor
    }

    pub fn cursor_mut(&mut self) -> &mut Cursor {
        &mut self.cursor
    }

    pub fn scrollback(&self) -> &Scrollback {
        &self.scrollback
    }

    pub fn scroll_top(&self) -> usize {
        self.scroll_top
    }

    pub fn scroll_bottom(&self) -> usize {
        self.scroll_bottom
    }

    /// Whether the alternate buffer is displayed
    pub fn is_alternate(&self) -> bool {
        self.on_alternate
    }

    /// Cell at `col`, `row` of the grid on display
    pub fn get_cell(&self, col: usize, row: usize) -> Option<&Cell> {
        self.grid().get(row).and_then(|line| line.get(col))
    }

    fn get_cell_mut(&mut self, col: usize, row: usize) -> Option<&mut Cell> {
        self.grid_mut()
            .get_mut(row)
            .and_then(|line| line.get_mut(col))
    }

    /// Get a visible line
    pub fn get_line(&self, row: usize) -> Option<&Line> {
        self.grid().get(row)
    }

    /// Visible rows as text, trailing blanks trimmed per row
    pub fn screen_text(&self) -> String {
        self.grid()
            .iter()
            .map(Line::to_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Scrollback plus the primary screen as text, soft-wrapped rows joined
    /// and trailing blank rows dropped
    pub fn transcript_text(&self) -> String {
        let mut text = String::new();
        for line in self.scrollback.iter().chain(self.primary_grid.iter()) {
            if line.wrapped {
                text.push_str(&line.untrimmed_text());
            } else {
                text.push_str(&line.to_text());
                text.push('\n');
            }
        }
        text.truncate(text.trim_end().len());
        text
    }

    /// Write `c` at the cursor with the current pen, wrapping first if a
    /// wrap is pending
    pub fn print_char(&mut self, c: char) {
        let width = c.width().unwrap_or(0);

        if width == 0 {
            self.append_combining(c);
            return;
        }

        if self.cursor.pending_wrap && self.cursor.autowrap {
            self.wrap_cursor();
        }

        let cols = self.cols;
        if width == 2 && self.cursor.col + 1 >= cols {
            if !self.cursor.autowrap || cols < 2 {
                // No room for the character
                return;
            }
            let (col, row) = (self.cursor.col, self.cursor.row);
            if let Some(cell) = self.get_cell_mut(col, row) {
                cell.clear();
            }
            self.wrap_cursor();
        }

        let (col, row) = (self.cursor.col, self.cursor.row);
        if self.cursor.insert_mode {
            self.insert_blank_cells(col, row, width);
        }

        self.clear_wide_fragments(col, row);
        if width == 2 {
            self.clear_wide_fragments(col + 1, row);
        }

        let pen = self.cursor.pen;
        if let Some(cell) = self.get_cell_mut(col, row) {
            *cell = Cell::written(c, pen);
        }
        if width == 2 {
            if let Some(cell) = self.get_cell_mut(col + 1, row) {
                *cell = Cell::wide_tail(pen);
            }
        }

        let next = col + width;
        if next >= cols {
            self.cursor.col = cols - 1;
            self.cursor.pending_wrap = self.cursor.autowrap;
        } else {
            self.cursor.col = next;
        }
    }

    /// Attach a zero-width character to the previously written cell
    fn append_combining(&mut self, c: char) {
        let row = self.cursor.row;
        let mut col = if self.cursor.pending_wrap {
            self.cursor.col
        } else if self.cursor.col > 0 {
            self.cursor.col - 1
        } else {
            return;
        };

        if col > 0 && self.get_cell(col, row).is_some_and(Cell::is_wide_continuation) {
            col -= 1;
        }
        if let Some(cell) = self.get_cell_mut(col, row) {
            cell.append_combining(c);
        }
    }

    /// Blank out the other half of a wide character about to be overwritten
    fn clear_wide_fragments(&mut self, col: usize, row: usize) {
        let Some(cell) = self.get_cell(col, row) else {
            return;
        };

        if cell.is_wide_continuation() && col > 0 {
            if let Some(head) = self.get_cell_mut(col - 1, row) {
                head.clear();
            }
        } else if cell.width() > 1 {
            if let Some(tail) = self.get_cell_mut(col + 1, row) {
                tail.clear();
            }
        }
    }

    /// Move to the start of the next row, marking the current row as soft-wrapped
    fn wrap_cursor(&mut self) {
        let row = self.cursor.row;
        if let Some(line) = self.grid_mut().get_mut(row) {
            line.wrapped = true;
        }

        self.cursor.pending_wrap = false;
        self.cursor.col = 0;
        self.advance_row();
    }

    /// Move down one row, scrolling at the bottom margin
    fn advance_row(&mut self) {
        if self.cursor.row == self.scroll_bottom {
            self.scroll_up(1);
        } else if self.cursor.row + 1 < self.rows {
            self.cursor.row += 1;
        }
    }

    /// Open `n` blank cells at `col`; cells pushed past the edge are lost
    fn insert_blank_cells(&mut self, col: usize, row: usize, count: usize) {
        let cols = self.cols;
        if col >= cols {
            return;
        }
        self.clear_wide_fragments(col, row);

        if let Some(line) = self.grid_mut().get_mut(row) {
            let count = count.min(cols - col);
            line.cells[col..].rotate_right(count);
            line.cells[col..col + count]
                .iter_mut()
                .for_each(Cell::clear);
            if line.cells[cols - 1].width() > 1 {
                line.cells[cols - 1].clear();
            }
        }
    }

    /// Handle linefeed (LF, VT, FF)
    pub fn linefeed(&mut self) {
        self.cursor.pending_wrap = false;
        self.advance_row();

        if self.modes.linefeed_mode {
            self.cursor.col = 0;
        }
    }

    /// CR
    pub fn carriage_return(&mut self) {
        self.cursor.carriage_return();
    }

    /// BS
    pub fn backspace(&mut self) {
        self.cursor.move_left(1);
    }

    /// Move to the next tab stop, or the last column
    pub fn tab(&mut self) {
        self.tab_forward(1);
    }

    /// Cursor forward n tab stops (HT, CHT)
    pub fn tab_forward(&mut self, n: usize) {
        let mut col = self.cursor.col;
        for _ in 0..n {
            col = (col + 1..self.cols)
                .find(|&i| self.tab_stops[i])
                .unwrap_or(self.cols - 1);
        }
        self.cursor.col = col;
        self.cursor.pending_wrap = false;
    }

    /// Cursor backward n tab stops (CBT)
    pub fn tab_backward(&mut self, n: usize) {
        let mut col = self.cursor.col;
        for _ in 0..n {
            col = (0..col).rev().find(|&i| self.tab_stops[i]).unwrap_or(0);
        }
        self.cursor.col = col;
        self.cursor.pending_wrap = false;
    }

    /// Reverse index (RI) - move cursor up, scroll down at the top margin
    pub fn reverse_index(&mut self) {
        self.cursor.pending_wrap = false;
        if self.cursor.row == self.scroll_top {
            self.scroll_down(1);
        } else if self.cursor.row > 0 {
            self.cursor.row -= 1;
        }
    }

    /// Index (IND)
    pub fn index(&mut self) {
        self.cursor.pending_wrap = false;
        self.advance_row();
    }

    /// Next line (NEL)
    pub fn next_line(&mut self) {
        self.index();
        self.cursor.col = 0;
    }

    /// Scroll the region up by n lines (content moves up, new lines at bottom).
    /// Lines leaving the top of the full primary screen go to scrollback.
    pub fn scroll_up(&mut self, n: usize) {
        let (top, bottom, cols) = (self.scroll_top, self.scroll_bottom, self.cols);
        let n = n.min(bottom - top + 1);
        if n == 0 {
            return;
        }

        let keep = !self.on_alternate && top == 0;
        let grid = if self.on_alternate {
            &mut self.alternate_grid
        } else {
            &mut self.primary_grid
        };

        for line in &mut grid[top..top + n] {
            let line = std::mem::replace(line, Line::new(cols));
            if keep {
                self.scrollback.push(line);
            }
        }
        grid[top..=bottom].rotate_left(n);
    }

    /// Scroll the region down by n lines (content moves down, new lines at top)
    pub fn scroll_down(&mut self, n: usize) {
        let (top, bottom, cols) = (self.scroll_top, self.scroll_bottom, self.cols);
        let n = n.min(bottom - top + 1);
        if n == 0 {
            return;
        }

        let grid = self.grid_mut();
        grid[top..=bottom].rotate_right(n);
        grid[top..top + n]
            .iter_mut()
            .for_each(|line| *line = Line::new(cols));
        // The row above the region no longer continues into it
        if top > 0 {
            grid[top - 1].wrapped = false;
        }
    }

    /// Set scroll region (DECSTBM), 0-indexed inclusive. Homes the cursor.
    pub fn set_scroll_region(&mut self, top: usize, bottom: usize) {
        let bottom = bottom.min(self.rows - 1);
        if top < bottom {
            self.scroll_top = top;
            self.scroll_bottom = bottom;
        } else {
            self.scroll_top = 0;
            self.scroll_bottom = self.rows - 1;
        }
        self.move_cursor_to(0, 0);
    }

    /// DECSTBM with no arguments
    pub fn reset_scroll_region(&mut self) {
        self.scroll_top = 0;
        self.scroll_bottom = self.rows - 1;
    }

    /// Set a tab stop at the current column (HTS)
    pub fn set_tab_stop(&mut self) {
        let col = self.cursor.col;
        self.tab_stops[col] = true;
    }

    /// TBC 0
    pub fn clear_tab_stop(&mut self) {
        let col = self.cursor.col;
        self.tab_stops[col] = false;
    }

    pub fn clear_all_tab_stops(&mut self) {
        self.tab_stops.iter_mut().for_each(|t| *t = false);
    }

    /// ED
    pub fn erase_in_display(&mut self, mode: u16) {
        let (col, row) = (self.cursor.col, self.cursor.row);
        match mode {
            0 => {
                self.erase_cells(row, col, self.cols);
                for r in row + 1..self.rows {
                    self.erase_cells(r, 0, self.cols);
                }
            },
            1 => {
                for r in 0..row {
                    self.erase_cells(r, 0, self.cols);
                }
                self.erase_cells(row, 0, col + 1);
            },
            2 => {
                for r in 0..self.rows {
                    self.erase_cells(r, 0, self.cols);
                }
            },
            3 => {
                self.scrollback.clear();
            },
            _ => {
                tracing::debug!("Unknown ED mode: {}", mode);
            },
        }
    }

    /// EL
    pub fn erase_in_line(&mut self, mode: u16) {
        let (col, row) = (self.cursor.col, self.cursor.row);
        match mode {
            0 => self.erase_cells(row, col, self.cols),
            1 => self.erase_cells(row, 0, col + 1),
            2 => self.erase_cells(row, 0, self.cols),
            _ => {
                tracing::debug!("Unknown EL mode: {}", mode);
            },
        }
    }

    /// ECH: blank `n` cells from the cursor without moving it
    pub fn erase_chars(&mut self, n: usize) {
        let (col, row) = (self.cursor.col, self.cursor.row);
        self.erase_cells(row, col, col.saturating_add(n));
    }

    /// Erase `[start, end)` of a row with the current background color
    fn erase_cells(&mut self, row: usize, start: usize, end: usize) {
        let cols = self.cols;
        let end = end.min(cols);
        if start >= end {
            return;
        }

        self.cursor.pending_wrap = false;
        self.clear_wide_fragments(start, row);
        self.clear_wide_fragments(end - 1, row);

        let bg = self.cursor.pen.bg;
        if let Some(line) = self.grid_mut().get_mut(row) {
            line.cells[start..end].iter_mut().for_each(|c| c.erase(bg));
            if end == cols {
                line.wrapped = false;
            }
        }
    }

    /// Insert lines at the cursor row (IL)
    pub fn insert_lines(&mut self, n: usize) {
        let (row, bottom, cols) = (self.cursor.row, self.scroll_bottom, self.cols);
        if row < self.scroll_top || row > bottom {
            return;
        }

        let n = n.min(bottom - row + 1);
        let grid = self.grid_mut();
        grid[row..=bottom].rotate_right(n);
        grid[row..row + n]
            .iter_mut()
            .for_each(|line| *line = Line::new(cols));
        self.cursor.carriage_return();
    }

    /// Delete lines at the cursor row (DL)
    pub fn delete_lines(&mut self, n: usize) {
        let (row, bottom, cols) = (self.cursor.row, self.scroll_bottom, self.cols);
        if row < self.scroll_top || row > bottom {
            return;
        }

        let n = n.min(bottom - row + 1);
        let grid = self.grid_mut();
        grid[row..=bottom].rotate_left(n);
        grid[bottom + 1 - n..=bottom]
            .iter_mut()
            .for_each(|line| *line = Line::new(cols));
        self.cursor.carriage_return();
    }

    /// ICH
    pub fn insert_chars(&mut self, n: usize) {
        let (col, row) = (self.cursor.col, self.cursor.row);
        self.insert_blank_cells(col, row, n);
        self.cursor.pending_wrap = false;
    }

    /// DCH: pull the rest of the row left, blanking the end
    pub fn delete_chars(&mut self, n: usize) {
        let (col, row, cols) = (self.cursor.col, self.cursor.row, self.cols);
        self.clear_wide_fragments(col, row);

        if let Some(line) = self.grid_mut().get_mut(row) {
            let n = n.min(cols - col);
            line.cells[col..].rotate_left(n);
            line.cells[cols - n..].iter_mut().for_each(Cell::clear);
            if line.cells[col].is_wide_continuation() {
                line.cells[col].clear();
            }
        }
        self.cursor.pending_wrap = false;
    }

    /// Move cursor to position (CUP/HVP), 0-indexed, honoring origin mode
    pub fn move_cursor_to(&mut self, row: usize, col: usize) {
        self.cursor.row = if self.cursor.origin_mode {
            self.scroll_top.saturating_add(row).min(self.scroll_bottom)
        } else {
            row.min(self.rows - 1)
        };
        self.cursor.col = col.min(self.cols - 1);
        self.cursor.pending_wrap = false;
    }

    /// Cursor up (CUU)
    pub fn move_cursor_up(&mut self, n: usize) {
        let top = self.scroll_top;
        self.cursor.move_up(n, top);
    }

    /// Cursor down (CUD)
    pub fn move_cursor_down(&mut self, n: usize) {
        let (bottom, rows) = (self.scroll_bottom, self.rows);
        self.cursor.move_down(n, bottom, rows);
    }

    /// Cursor forward (CUF)
    pub fn move_cursor_forward(&mut self, n: usize) {
        let cols = self.cols;
        self.cursor.move_right(n, cols);
    }

    /// Cursor backward (CUB)
    pub fn move_cursor_backward(&mut self, n: usize) {
        self.cursor.move_left(n);
    }

    /// Cursor to column (CHA/HPA), 0-indexed
    pub fn move_cursor_to_col(&mut self, col: usize) {
        self.cursor.col = col.min(self.cols - 1);
        self.cursor.pending_wrap = false;
    }

    /// Cursor to row (VPA), 0-indexed, honoring origin mode
    pub fn move_cursor_to_row(&mut self, row: usize) {
        let col = self.cursor.col;
        self.move_cursor_to(row, col);
    }

    /// DECSC, into the slot of the grid on display
    pub fn save_cursor(&mut self) {
        let saved = self.cursor.save();
        if self.on_alternate {
            self.alternate_saved_cursor = saved;
        } else {
            self.primary_saved_cursor = saved;
        }
    }

    /// DECRC from the slot of the grid on display
    pub fn restore_cursor(&mut self) {
        let saved = if self.on_alternate {
            &self.alternate_saved_cursor
        } else {
            &self.primary_saved_cursor
        };
        self.cursor.restore(saved, self.cols, self.rows);
    }

    /// Switch to the alternate buffer, optionally clearing it
    pub fn enter_alternate_screen(&mut self, clear: bool) {
        if self.on_alternate {
            return;
        }
        self.on_alternate = true;
        if clear {
            self.alternate_grid.iter_mut().for_each(Line::clear);
        }
    }

    /// Switch back to the primary buffer, optionally clearing the alternate one
    pub fn exit_alternate_screen(&mut self, clear: bool) {
        if !self.on_alternate {
            return;
        }
        if clear {
            self.alternate_grid.iter_mut().for_each(Line::clear);
        }
        self.on_alternate = false;
    }

    /// Fill the screen with 'E' (DECALN)
    pub fn alignment_test(&mut self) {
        for line in self.grid_mut() {
            line.cells.iter_mut().for_each(|c| *c = Cell::new('E'));
            line.wrapped = false;
        }
        self.reset_scroll_region();
        self.move_cursor_to(0, 0);
    }

    /// Resize the screen; zero dimensions are raised to 1.
    ///
    /// The primary buffer and its scrollback are reflowed, the alternate
    /// buffer is truncated or padded. The scroll region and tab stops are
    /// reset. Resizing to the current size does nothing.
    pub fn resize(&mut self, new_cols: usize, new_rows: usize) {
        let new_cols = new_cols.max(1);
        let new_rows = new_rows.max(1);
        if new_cols == self.cols && new_rows == self.rows {
            return;
        }

        let mut lines = self.scrollback.take_all();
        let scrollback_len = lines.len();
        lines.append(&mut self.primary_grid);

        let tracked = (!self.on_alternate).then(|| {
            (
                scrollback_len + self.cursor.row,
                self.cursor.col,
                self.cursor.pending_wrap,
            )
        });
        let (mut rows, cursor) = reflow(lines, new_cols, tracked);

        // Keep the cursor row on screen, overflow goes to the scrollback
        let mut start = rows.len().saturating_sub(new_rows);
        if let Some((row, _, _)) = cursor {
            start = start.min(row);
        }
        if rows.len() > start + new_rows {
            tracing::debug!(
                "Dropping {} rows below the cursor on resize",
                rows.len() - start - new_rows
            );
            rows.truncate(start + new_rows);
        }
        let mut visible = rows.split_off(start);
        for line in rows {
            self.scrollback.push(line);
        }
        visible.resize_with(new_rows, || Line::new(new_cols));
        self.primary_grid = visible;

        for line in &mut self.alternate_grid {
            line.resize(new_cols);
        }
        self.alternate_grid.resize_with(new_rows, || Line::new(new_cols));

        self.cols = new_cols;
        self.rows = new_rows;
        self.scroll_top = 0;
        self.scroll_bottom = new_rows - 1;
        self.tab_stops = default_tab_stops(new_cols);

        if let Some((row, col, pending_wrap)) = cursor {
            self.cursor.row = row - start;
            self.cursor.col = col;
            self.cursor.pending_wrap = pending_wrap;
        }
        self.cursor.clamp(new_cols, new_rows);
    }

    /// Clear everything back to the initial state, keeping dimensions
    pub fn reset(&mut self) {
        self.primary_grid.iter_mut().for_each(Line::clear);
        self.alternate_grid.iter_mut().for_each(Line::clear);
        self.scrollback.clear();
        self.cursor = Cursor::new();
        self.primary_saved_cursor = SavedCursor::default();
        self.alternate_saved_cursor = SavedCursor::default();
        self.reset_scroll_region();
        self.tab_stops = default_tab_stops(self.cols);
        self.modes = Modes::default();
        self.on_alternate = false;
    }

    /// Soft reset (DECSTR): modes, margins and pen, content untouched
    pub fn soft_reset(&mut self) {
        self.cursor.pen.reset();
        self.cursor.visible = true;
        self.cursor.origin_mode = false;
        self.cursor.autowrap = true;
        self.cursor.insert_mode = false;
        self.cursor.pending_wrap = false;
        self.modes.application_cursor = false;
        self.modes.application_keypad = false;
        self.reset_scroll_region();
        self.primary_saved_cursor = SavedCursor::default();
        self.alternate_saved_cursor = SavedCursor::default();
    }
}

fn blank_grid(cols: usize, rows: usize) -> Vec<Line> {
    (0..rows).map(|_| Line::new(cols)).collect()
}

fn default_tab_stops(cols: usize) -> Vec<bool> {
    (0..cols).map(|i| i > 0 && i % TAB_WIDTH == 0).collect()
}

/// Re-wrap rows at `new_cols`.
///
/// `cursor` is `(row, col, pending_wrap)` in `lines`; the returned cursor is
/// its position in the output rows. Blank rows after the cursor (or at the end
/// when there is no cursor) are dropped.
fn reflow(
    mut lines: Vec<Line>,
    new_cols: usize,
    cursor: Option<(usize, usize, bool)>,
) -> (Vec<Line>, Option<(usize, usize, bool)>) {
    let keep_from = cursor.map_or(0, |(row, _, _)| row + 1);
    while lines.len() > keep_from && lines.last().is_some_and(Line::is_blank) {
        lines.pop();
    }

    let mut out = Vec::with_capacity(lines.len());
    let mut new_cursor = None;
    let mut logical: Vec<Cell> = Vec::new();
    let mut target = None;

    for (index, mut line) in lines.into_iter().enumerate() {
        let wrapped = line.wrapped;
        // Cells past the content of a soft-wrapped row are wide-char padding
        let len = if wrapped {
            line.content_len()
        } else {
            line.cells.len()
        };

        if let Some((row, col, _)) = cursor {
            if row == index {
                target = Some(logical.len() + col);
            }
        }

        line.cells.truncate(len);
        logical.append(&mut line.cells);

        if !wrapped {
            let first_row = out.len();
            let placed = rewrap(&mut logical, new_cols, target.take(), &mut out);
            if let (Some(found), Some((_, _, pending))) = (placed, cursor) {
                new_cursor = Some(place_cursor(first_row, found, pending, new_cols));
            }
        }
    }

    // Trailing rows that all wrapped
    if !logical.is_empty() || target.is_some() {
        let first_row = out.len();
        let placed = rewrap(&mut logical, new_cols, target.take(), &mut out);
        if let (Some(found), Some((_, _, pending))) = (placed, cursor) {
            new_cursor = Some(place_cursor(first_row, found, pending, new_cols));
        }
    }

    if let Some((row, _, _)) = new_cursor {
        out.resize_with(out.len().max(row + 1), || Line::new(new_cols));
    }

    (out, new_cursor)
}

/// A cursor with a pending wrap sits on the last written cell; keep that
/// relationship when the cell moves
fn place_cursor(
    first_row: usize,
    (row, col, at_row_end): (usize, usize, bool),
    pending_wrap: bool,
    cols: usize,
) -> (usize, usize, bool) {
    let row = first_row + row;
    if at_row_end {
        (row, col, true)
    } else if pending_wrap && col + 1 < cols {
        (row, col + 1, false)
    } else {
        (row, col, pending_wrap)
    }
}

/// Lay out one logical line into rows of `cols` cells, appending to `out`.
///
/// Trailing blank cells are trimmed first. Returns where cell `target` ended
/// up as `(row, col, pending_wrap)`, relative to the first emitted row.
fn rewrap(
    logical: &mut Vec<Cell>,
    cols: usize,
    target: Option<usize>,
    out: &mut Vec<Line>,
) -> Option<(usize, usize, bool)> {
    let content = logical
        .iter()
        .rposition(|c| !c.is_blank())
        .map_or(0, |i| i + 1);
    logical.truncate(content);

    let first_row = out.len();
    let mut found = None;
    let mut current: Vec<Cell> = Vec::with_capacity(cols);
    let mut cells = std::mem::take(logical).into_iter().enumerate().peekable();

    while let Some((index, cell)) = cells.next() {
        let continuation = cells
            .peek()
            .is_some_and(|(_, next)| next.is_wide_continuation());
        let width = if continuation { 2 } else { 1 };

        if current.len() + width > cols && !current.is_empty() {
            current.resize(cols, Cell::default());
            out.push(Line::from_cells(std::mem::take(&mut current), true));
        }

        if target == Some(index) || (continuation && target == Some(index + 1)) {
            found = Some((out.len() - first_row, current.len()));
        }

        current.push(cell);
        if continuation {
            if let Some((_, tail)) = cells.next() {
                // A wide character cannot be shown in a single column
                if cols >= 2 {
                    current.push(tail);
                }
            }
        }
    }

    let mut placed = found.map(|(row, col)| (row, col, false));
    if let (None, Some(target)) = (found, target) {
        // Cursor sits past the end of the text
        let past_end = target.saturating_sub(content);
        let row = out.len() - first_row;
        placed = if past_end == 0 && current.len() == cols {
            // Right after a full row: keep it there with a pending wrap
            Some((row, cols - 1, true))
        } else {
            let col = current.len() + past_end;
            Some((row + col / cols, col % cols, false))
        };
    }

    current.resize(cols, Cell::default());
    out.push(Line::from_cells(current, false));
    placed
}
