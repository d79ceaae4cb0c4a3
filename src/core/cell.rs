//! Grid cells and their colors
//!
//! A single cell of the grid: its text (a base character plus any combining
//! marks) and the colors and attributes it was written with.

use serde::{Deserialize, Serialize};
use unicode_width::UnicodeWidthStr;

/// Colors and attributes selected by SGR, stamped onto every written cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pen {
    pub fg: Color,
    pub bg: Color,
    pub style: Style,
}

impl Pen {
    /// Back to default colors and no attributes (SGR 0)
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    pub fn is_default(&self) -> bool {
        *self == Self::default()
    }
}

/// One grid position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cell {
    /// Base character plus combining marks; empty when never written and for
    /// the right half of a wide character
    pub content: String,
    pub pen: Pen,
    /// Right half of the double-width character to the left
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub wide_tail: bool,
}

impl Cell {
    /// A cell showing `c` with the default pen
    pub fn new(c: char) -> Self {
        Self::written(c, Pen::default())
    }

    /// A cell showing `c` as drawn with `pen`
    pub fn written(c: char, pen: Pen) -> Self {
        Self {
            content: c.into(),
            pen,
            wide_tail: false,
        }
    }

    /// The placeholder right of a wide character
    pub fn wide_tail(pen: Pen) -> Self {
        Self {
            content: String::new(),
            pen,
            wide_tail: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn is_wide_continuation(&self) -> bool {
        self.wide_tail
    }

    /// Whether the cell carries neither text nor a non-default background
    pub fn is_blank(&self) -> bool {
        self.content.is_empty() && !self.wide_tail && self.pen.bg == Color::Default
    }

    /// Columns taken by the content
    pub fn width(&self) -> usize {
        self.content.width()
    }

    /// Attach a zero-width combining character; ignored on empty cells
    pub fn append_combining(&mut self, c: char) {
        if !self.content.is_empty() {
            self.content.push(c);
        }
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Erase to a blank cell painted with `bg` (ED, EL, ECH and friends)
    pub fn erase(&mut self, bg: Color) {
        *self = Self {
            pen: Pen {
                bg,
                ..Pen::default()
            },
            ..Self::default()
        };
    }
}

/// A foreground or background color as the child asked for it
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Color {
    /// Whatever the host's default is for this role
    #[default]
    Default,
    /// 256-color palette index
    Indexed(u8),
    /// Direct color from `38;2;r;g;b` style SGR
    Rgb(u8, u8, u8),
}

impl Color {
    pub const RED: Color = Color::Indexed(1);
    pub const GREEN: Color = Color::Indexed(2);
    pub const BLUE: Color = Color::Indexed(4);
    pub const CYAN: Color = Color::Indexed(6);

    /// RGB value of a 256-color index under the xterm defaults
    pub fn indexed_to_rgb(index: u8) -> (u8, u8, u8) {
        match index {
            0..=15 => XTERM_ANSI[index as usize],
            16..=231 => {
                let cube = index - 16;
                let level = |step: u8| if step == 0 { 0 } else { 55 + 40 * step };
                (level(cube / 36), level(cube / 6 % 6), level(cube % 6))
            },
            232..=255 => {
                let gray = 8 + 10 * (index - 232);
                (gray, gray, gray)
            },
        }
    }
}

/// The 16 ANSI colors as xterm draws them
const XTERM_ANSI: [(u8, u8, u8); 16] = [
    (0, 0, 0),
    (205, 0, 0),
    (0, 205, 0),
    (205, 205, 0),
    (0, 0, 238),
    (205, 0, 205),
    (0, 205, 205),
    (229, 229, 229),
    (127, 127, 127),
    (255, 0, 0),
    (0, 255, 0),
    (255, 255, 0),
    (92, 92, 255),
    (255, 0, 255),
    (0, 255, 255),
    (255, 255, 255),
];

/// SGR rendition flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Style {
    pub bold: bool,
    pub faint: bool,
    pub italic: bool,
    pub underline: bool,
    pub blink: bool,
    pub inverse: bool,
    pub hidden: bool,
    pub strikethrough: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_cell_is_blank() {
        let cell = Cell::default();
        assert!(cell.is_empty());
        assert!(cell.is_blank());
        assert!(cell.pen.is_default());
    }

    #[test]
    fn test_written_cell_keeps_pen() {
        let pen = Pen {
            fg: Color::GREEN,
            style: Style {
                italic: true,
                ..Style::default()
            },
            ..Pen::default()
        };
        let cell = Cell::written('A', pen);
        assert_eq!(cell.content, "A");
        assert_eq!(cell.pen, pen);
        assert!(!cell.is_blank());
    }

    #[test]
    fn test_erase_paints_background_only() {
        let mut cell = Cell::written('A', Pen { fg: Color::RED, ..Pen::default() });
        cell.pen.style.bold = true;
        cell.erase(Color::BLUE);

        assert!(cell.is_empty());
        assert!(!cell.is_blank());
        assert_eq!(cell.pen, Pen { bg: Color::BLUE, ..Pen::default() });
    }

    #[test]
    fn test_combining_marks() {
        let mut cell = Cell::new('e');
        cell.append_combining('\u{301}');
        assert_eq!(cell.content, "e\u{301}");
        assert_eq!(cell.width(), 1);

        let mut empty = Cell::default();
        empty.append_combining('\u{301}');
        assert!(empty.is_empty());
    }

    #[test]
    fn test_wide_tail() {
        let tail = Cell::wide_tail(Pen::default());
        assert!(tail.is_wide_continuation());
        assert!(!tail.is_blank());
        assert_eq!(Cell::new('中').width(), 2);
    }

    #[test]
    fn test_palette_ranges() {
        assert_eq!(Color::indexed_to_rgb(1), (205, 0, 0));
        assert_eq!(Color::indexed_to_rgb(15), (255, 255, 255));
        // First and last entries of the cube and the gray ramp
        assert_eq!(Color::indexed_to_rgb(16), (0, 0, 0));
        assert_eq!(Color::indexed_to_rgb(196), (255, 0, 0));
        assert_eq!(Color::indexed_to_rgb(231), (255, 255, 255));
        assert_eq!(Color::indexed_to_rgb(232), (8, 8, 8));
        assert_eq!(Color::indexed_to_rgb(255), (238, 238, 238));
    }
}
