//! Grid rows and the transcript of rows scrolled off the primary screen
//!
//! The transcript is bounded; past its capacity each new row pushes out the
//! oldest one.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use super::cell::Cell;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Line {
    pub cells: Vec<Cell>,
    /// Soft wrap: the text runs on into the next row
    pub wrapped: bool,
}

impl Line {
    pub fn new(cols: usize) -> Self {
        Self::from_cells(vec![Cell::default(); cols], false)
    }

    pub fn from_cells(cells: Vec<Cell>, wrapped: bool) -> Self {
        Self { cells, wrapped }
    }

    /// Pad or cut to `cols` cells. A wide character losing its right half
    /// is blanked.
    pub fn resize(&mut self, cols: usize) {
        self.cells.resize(cols, Cell::default());
        let split = self.cells.last().is_some_and(|cell| cell.width() > 1);
        if split {
            if let Some(last) = self.cells.last_mut() {
                last.clear();
            }
            self.wrapped = false;
        }
    }

    /// Blank every cell and drop the soft wrap
    pub fn clear(&mut self) {
        self.cells.iter_mut().for_each(Cell::clear);
        self.wrapped = false;
    }

    pub fn get(&self, col: usize) -> Option<&Cell> {
        self.cells.get(col)
    }

    pub fn get_mut(&mut self, col: usize) -> Option<&mut Cell> {
        self.cells.get_mut(col)
    }

    pub fn is_blank(&self) -> bool {
        !self.wrapped && self.content_len() == 0
    }

    /// Cells up to and including the last non-blank one
    pub fn content_len(&self) -> usize {
        self.cells
            .iter()
            .rposition(|cell| !cell.is_blank())
            .map_or(0, |last| last + 1)
    }

    /// Row text without trailing spaces
    pub fn to_text(&self) -> String {
        let text = self.untrimmed_text();
        text.trim_end_matches(' ').to_string()
    }

    /// Row text covering every column; unwritten cells read as spaces
    pub fn untrimmed_text(&self) -> String {
        self.cells
            .iter()
            .filter(|cell| !cell.is_wide_continuation())
            .map(|cell| if cell.is_empty() { " " } else { cell.content.as_str() })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scrollback {
    lines: VecDeque<Line>,
    capacity: usize,
}

impl Scrollback {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Append a row; with zero capacity rows are discarded
    pub fn push(&mut self, line: Line) {
        if self.capacity == 0 {
            return;
        }
        while self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    /// 0 is the oldest row
    pub fn get(&self, index: usize) -> Option<&Line> {
        self.lines.get(index)
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Line> + ExactSizeIterator {
        self.lines.iter()
    }

    /// Empty the transcript, handing back its rows oldest first
    pub fn take_all(&mut self) -> Vec<Line> {
        self.lines.drain(..).collect()
    }
}
