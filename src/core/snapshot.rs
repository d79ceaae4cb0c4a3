//! Serializable copies of the visible screen
//!
//! A snapshot is plain data: hosts render from it, tests compare it, and the
//! headless runner prints it as text or JSON. The same byte stream always
//! yields the same snapshot.

use serde::{Deserialize, Serialize};

use super::cell::{Cell, Pen};
use super::screen::Screen;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub cols: usize,
    pub rows: usize,
    pub title: String,
    pub cursor: CursorSnapshot,
    pub alternate_screen: bool,
    /// Rows currently held in the transcript above the screen
    pub scrollback_lines: usize,
    /// Row-major
    pub grid: Vec<Vec<CellSnapshot>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellSnapshot {
    pub content: String,
    #[serde(flatten)]
    pub pen: Pen,
    /// 0 for the right half of a wide character, otherwise 1 or 2
    pub width: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CursorSnapshot {
    pub col: usize,
    pub row: usize,
    pub visible: bool,
}

impl From<&Cell> for CellSnapshot {
    fn from(cell: &Cell) -> Self {
        Self {
            content: cell.content.clone(),
            pen: cell.pen,
            width: if cell.is_wide_continuation() {
                0
            } else {
                cell.width().clamp(1, 2) as u8
            },
        }
    }
}

impl Snapshot {
    pub fn from_screen(screen: &Screen, title: &str) -> Self {
        let cursor = screen.cursor();
        Self {
            cols: screen.cols(),
            rows: screen.rows(),
            title: title.to_string(),
            cursor: CursorSnapshot {
                col: cursor.col,
                row: cursor.row,
                visible: cursor.visible,
            },
            alternate_screen: screen.is_alternate(),
            scrollback_lines: screen.scrollback().len(),
            grid: (0..screen.rows())
                .map(|row| {
                    screen
                        .get_line(row)
                        .map(|line| line.cells.iter().map(CellSnapshot::from).collect())
                        .unwrap_or_default()
                })
                .collect(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Rows as text, trailing spaces and trailing empty rows dropped, each
    /// row ending in a newline. A blank screen is a single newline.
    pub fn to_text(&self) -> String {
        let rows: Vec<String> = self.grid.iter().map(|row| row_text(row)).collect();
        let used = rows.iter().rposition(|row| !row.is_empty()).map_or(1, |last| last + 1);

        let mut text = String::new();
        for row in rows.iter().take(used) {
            text.push_str(row);
            text.push('\n');
        }
        text
    }
}

fn row_text(cells: &[CellSnapshot]) -> String {
    let text: String = cells
        .iter()
        .filter(|cell| cell.width != 0)
        .map(|cell| if cell.content.is_empty() { " " } else { cell.content.as_str() })
        .collect();
    text.trim_end_matches(' ').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Color;

    fn screen_with(cols: usize, rows: usize, text: &str) -> Screen {
        let mut screen = Screen::new(cols, rows, 10);
        for c in text.chars() {
            match c {
                '\n' => {
                    screen.linefeed();
                    screen.carriage_return();
                },
                c => screen.print_char(c),
            }
        }
        screen
    }

    #[test]
    fn test_captures_grid_and_cursor() {
        let screen = screen_with(6, 2, "ok");
        let snapshot = Snapshot::from_screen(&screen, "demo");

        assert_eq!((snapshot.cols, snapshot.rows), (6, 2));
        assert_eq!(snapshot.grid.len(), 2);
        assert_eq!(snapshot.grid[0][1].content, "k");
        assert_eq!((snapshot.cursor.col, snapshot.cursor.row), (2, 0));
        assert_eq!(snapshot.title, "demo");
        assert!(!snapshot.alternate_screen);
    }

    #[test]
    fn test_wide_cells() {
        let snapshot = Snapshot::from_screen(&screen_with(6, 1, "a字"), "");
        let widths: Vec<u8> = snapshot.grid[0][..4].iter().map(|c| c.width).collect();
        assert_eq!(widths, [1, 2, 0, 1]);
    }

    #[test]
    fn test_text_drops_trailing_blanks() {
        let snapshot = Snapshot::from_screen(&screen_with(8, 4, "a字 \n\nb"), "");
        assert_eq!(snapshot.to_text(), "a字\n\nb\n");

        let blank = Snapshot::from_screen(&Screen::new(8, 4, 0), "");
        assert_eq!(blank.to_text(), "\n");
    }

    #[test]
    fn test_json_keeps_pen() {
        let mut screen = screen_with(4, 1, "x");
        screen.cursor_mut().pen.fg = Color::Rgb(1, 2, 3);
        screen.cursor_mut().pen.style.inverse = true;
        screen.print_char('y');

        let snapshot = Snapshot::from_screen(&screen, "");
        let restored = Snapshot::from_json(&snapshot.to_json().unwrap()).unwrap();
        assert_eq!(restored, snapshot);
        assert_eq!(restored.grid[0][1].pen.fg, Color::Rgb(1, 2, 3));
        assert!(restored.grid[0][1].pen.style.inverse);
    }

    #[test]
    fn test_same_input_same_snapshot() {
        let take = || Snapshot::from_screen(&screen_with(5, 3, "wrap around\nend"), "");
        assert_eq!(take(), take());
    }
}
