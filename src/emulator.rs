//! Screen Emulator
//!
//! Ties together the parser and the screen model. Process output enters
//! through [`Emulator::append`]; parsed actions mutate the screen
//! synchronously. Side effects meant for the host (title changes, bell,
//! clipboard writes, palette changes) are queued as [`TerminalEvent`]s and
//! replies meant for the child (device status and attribute reports) are
//! queued as bytes. The session drains both after each input batch.

use base64::Engine;

use crate::core::{Color, Screen, Snapshot};
use crate::parser::{Action, CsiAction, DynamicColor, EscAction, OscAction, Parser};

/// Primary device attributes: VT420 class with the usual xterm feature set
const PRIMARY_DA: &[u8] = b"\x1b[?64;1;2;6;9;15;18;21;22c";
/// Secondary device attributes
const SECONDARY_DA: &[u8] = b"\x1b[>41;320;0c";

/// A side effect for the host, delivered after an input batch is applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalEvent {
    /// The window title changed (OSC 0/2)
    TitleChanged { old: String, new: String },
    /// BEL was received
    Bell,
    /// The child wrote to the clipboard (OSC 52)
    ClipboardText(String),
    /// Palette or default colors were set or reset (OSC 4/10-12/104/110-112)
    ColorsChanged,
}

/// An RGB triple
pub type Rgb = (u8, u8, u8);

/// The color table: 256 indexed colors plus the dynamic colors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Palette {
    pub indexed: [Rgb; 256],
    pub foreground: Rgb,
    pub background: Rgb,
    pub cursor: Rgb,
}

impl Default for Palette {
    fn default() -> Self {
        let mut indexed = [(0, 0, 0); 256];
        for (i, color) in indexed.iter_mut().enumerate() {
            *color = Color::indexed_to_rgb(i as u8);
        }
        Self {
            indexed,
            foreground: DEFAULT_FOREGROUND,
            background: DEFAULT_BACKGROUND,
            cursor: DEFAULT_FOREGROUND,
        }
    }
}

const DEFAULT_FOREGROUND: Rgb = (229, 229, 229);
const DEFAULT_BACKGROUND: Rgb = (0, 0, 0);

impl Palette {
    /// Resolve a cell color to RGB
    pub fn resolve(&self, color: Color, is_foreground: bool) -> Rgb {
        match color {
            Color::Default if is_foreground => self.foreground,
            Color::Default => self.background,
            Color::Indexed(i) => self.indexed[i as usize],
            Color::Rgb(r, g, b) => (r, g, b),
        }
    }

    fn dynamic_mut(&mut self, which: DynamicColor) -> &mut Rgb {
        match which {
            DynamicColor::Foreground => &mut self.foreground,
            DynamicColor::Background => &mut self.background,
            DynamicColor::Cursor => &mut self.cursor,
        }
    }

    fn reset_dynamic(&mut self, which: DynamicColor) {
        *self.dynamic_mut(which) = match which {
            DynamicColor::Background => DEFAULT_BACKGROUND,
            DynamicColor::Foreground | DynamicColor::Cursor => DEFAULT_FOREGROUND,
        };
    }
}

/// Parse an X11 color spec: `rgb:R/G/B` (1-4 hex digits per channel) or
/// `#RGB`, `#RRGGBB`, `#RRRGGGBBB`, `#RRRRGGGGBBBB`
pub fn parse_color_spec(spec: &str) -> Option<Rgb> {
    fn channel(hex: &str) -> Option<u8> {
        if hex.is_empty() || hex.len() > 4 {
            return None;
        }
        let value = u32::from_str_radix(hex, 16).ok()?;
        let max = (1u32 << (4 * hex.len())) - 1;
        Some((value * 255 / max) as u8)
    }

    if let Some(rest) = spec.strip_prefix("rgb:") {
        let mut parts = rest.split('/');
        let rgb = (
            channel(parts.next()?)?,
            channel(parts.next()?)?,
            channel(parts.next()?)?,
        );
        return parts.next().is_none().then_some(rgb);
    }

    let hex = spec.strip_prefix('#')?;
    if hex.is_empty() || hex.len() % 3 != 0 || !hex.is_ascii() {
        return None;
    }
    let n = hex.len() / 3;
    Some((
        channel(&hex[..n])?,
        channel(&hex[n..2 * n])?,
        channel(&hex[2 * n..])?,
    ))
}

/// Terminal emulator: parser plus screen plus host-facing queues
#[derive(Debug)]
pub struct Emulator {
    screen: Screen,
    parser: Parser,
    title: String,
    palette: Palette,
    events: Vec<TerminalEvent>,
    responses: Vec<u8>,
    /// Last printed character, for REP
    last_printed: Option<char>,
}

impl Emulator {
    /// Create an emulator with `transcript_rows` lines of scrollback
    pub fn new(cols: usize, rows: usize, transcript_rows: usize) -> Self {
        Self {
            screen: Screen::new(cols, rows, transcript_rows),
            parser: Parser::new(),
            title: String::new(),
            palette: Palette::default(),
            events: Vec::new(),
            responses: Vec::new(),
            last_printed: None,
        }
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn cols(&self) -> usize {
        self.screen.cols()
    }

    pub fn rows(&self) -> usize {
        self.screen.rows()
    }

    /// Current window title, empty until the child sets one
    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    /// Capture the visible state
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from_screen(&self.screen, &self.title)
    }

    /// Drain queued host events, oldest first
    pub fn take_events(&mut self) -> Vec<TerminalEvent> {
        std::mem::take(&mut self.events)
    }

    /// Drain bytes to be written back to the child
    pub fn take_responses(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.responses)
    }

    /// Feed process output
    pub fn append(&mut self, data: &[u8]) {
        for action in self.parser.parse(data) {
            self.apply_action(action);
        }
    }

    /// Resize the screen, reflowing the primary buffer
    pub fn resize(&mut self, cols: usize, rows: usize) {
        self.screen.resize(cols, rows);
    }

    /// Back to the initial state, keeping the dimensions and the title
    pub fn reset(&mut self) {
        self.screen.reset();
        self.parser.reset();
        self.last_printed = None;
        if self.palette != Palette::default() {
            self.palette = Palette::default();
            self.events.push(TerminalEvent::ColorsChanged);
        }
    }

    fn apply_action(&mut self, action: Action) {
        match action {
            Action::Print(c) => {
                self.screen.print_char(c);
                self.last_printed = Some(c);
            },
            Action::Execute(byte) => self.execute_c0(byte),
            Action::CsiDispatch(csi) => self.execute_csi(&csi),
            Action::EscDispatch(esc) => self.execute_esc(esc),
            Action::OscDispatch(osc) => self.execute_osc(osc),
        }
    }

    /// Execute a C0 control character
    fn execute_c0(&mut self, byte: u8) {
        match byte {
            0x07 => self.events.push(TerminalEvent::Bell),
            0x08 => self.screen.backspace(),
            0x09 => self.screen.tab(),
            // LF, VT, FF
            0x0A..=0x0C => self.screen.linefeed(),
            0x0D => self.screen.carriage_return(),
            // SO/SI charset shifts are accepted but not applied
            0x0E | 0x0F => {},
            _ => {
                tracing::trace!("Ignoring C0 control {:#04x}", byte);
            },
        }
    }

    fn execute_esc(&mut self, esc: EscAction) {
        match esc {
            EscAction::SaveCursor => self.screen.save_cursor(),
            EscAction::RestoreCursor => self.screen.restore_cursor(),
            EscAction::Index => self.screen.index(),
            EscAction::ReverseIndex => self.screen.reverse_index(),
            EscAction::NextLine => self.screen.next_line(),
            EscAction::HorizontalTabSet => self.screen.set_tab_stop(),
            EscAction::FullReset => self.reset(),
            EscAction::ApplicationKeypad => self.screen.modes.application_keypad = true,
            EscAction::NormalKeypad => self.screen.modes.application_keypad = false,
            EscAction::AlignmentTest => self.screen.alignment_test(),
            EscAction::DesignateCharset { slot, charset } => {
                tracing::trace!("Charset {} -> G{}", charset as char, slot as char);
            },
            EscAction::StringTerminator => {},
            EscAction::Unknown(bytes) => {
                tracing::debug!("Unhandled ESC sequence: {:?}", bytes);
            },
        }
    }

    /// Execute a CSI sequence
    fn execute_csi(&mut self, csi: &CsiAction) {
        match csi.private_marker {
            None => {},
            Some(b'?') => return self.execute_csi_private(csi),
            Some(b'>') if csi.final_byte == b'c' => {
                self.responses.extend_from_slice(SECONDARY_DA);
                return;
            },
            Some(_) => {
                tracing::debug!("Unhandled CSI: {:?}", csi);
                return;
            },
        }

        // Counts default to 1, positions are 1-based
        let count = |i| csi.param_or_default(i, 1) as usize;
        let position = |i| count(i) - 1;

        if !csi.intermediates.is_empty() {
            if csi.intermediates == [b'!'] && csi.final_byte == b'p' {
                self.screen.soft_reset();
            } else {
                tracing::debug!("Unhandled CSI: {:?}", csi);
            }
            return;
        }

        match csi.final_byte {
            b'A' => self.screen.move_cursor_up(count(0)),
            b'B' | b'e' => self.screen.move_cursor_down(count(0)),
            b'C' | b'a' => self.screen.move_cursor_forward(count(0)),
            b'D' => self.screen.move_cursor_backward(count(0)),
            b'E' => {
                self.screen.move_cursor_down(count(0));
                self.screen.carriage_return();
            },
            b'F' => {
                self.screen.move_cursor_up(count(0));
                self.screen.carriage_return();
            },
            b'G' | b'`' => self.screen.move_cursor_to_col(position(0)),
            b'H' | b'f' => self.screen.move_cursor_to(position(0), position(1)),
            b'd' => self.screen.move_cursor_to_row(position(0)),
            b'I' => self.screen.tab_forward(count(0)),
            b'Z' => self.screen.tab_backward(count(0)),

            b'J' => self.screen.erase_in_display(csi.param(0, 0)),
            b'K' => self.screen.erase_in_line(csi.param(0, 0)),
            b'X' => self.screen.erase_chars(count(0)),

            b'L' => self.screen.insert_lines(count(0)),
            b'M' => self.screen.delete_lines(count(0)),
            b'@' => self.screen.insert_chars(count(0)),
            b'P' => self.screen.delete_chars(count(0)),

            b'S' => self.screen.scroll_up(count(0)),
            b'T' => self.screen.scroll_down(count(0)),

            b'r' => {
                let rows = self.screen.rows();
                let top = position(0);
                let bottom = match csi.param(1, 0) {
                    0 => rows,
                    n => n as usize,
                };
                self.screen.set_scroll_region(top, bottom - 1);
            },

            b'm' => self.execute_sgr(csi),

            b'g' => match csi.param(0, 0) {
                0 => self.screen.clear_tab_stop(),
                3 => self.screen.clear_all_tab_stops(),
                _ => {},
            },

            b's' => self.screen.save_cursor(),
            b'u' => self.screen.restore_cursor(),

            b'h' => self.set_mode(csi, true),
            b'l' => self.set_mode(csi, false),

            b'n' => match csi.param(0, 0) {
                5 => self.responses.extend_from_slice(b"\x1b[0n"),
                6 => {
                    let cursor = self.screen.cursor();
                    let report = format!("\x1b[{};{}R", cursor.row + 1, cursor.col + 1);
                    self.responses.extend_from_slice(report.as_bytes());
                },
                other => {
                    tracing::debug!("Unhandled DSR: {}", other);
                },
            },

            b'c' if csi.param(0, 0) == 0 => self.responses.extend_from_slice(PRIMARY_DA),

            b'b' => {
                if let Some(c) = self.last_printed {
                    for _ in 0..count(0).min(self.screen.cols() * self.screen.rows()) {
                        self.screen.print_char(c);
                    }
                }
            },

            _ => {
                tracing::debug!("Unhandled CSI: {:?}", csi);
            },
        }
    }

    /// Execute a DEC private CSI sequence (CSI ? ...)
    fn execute_csi_private(&mut self, csi: &CsiAction) {
        match csi.final_byte {
            b'h' => csi.params.iter().for_each(|&mode| self.set_dec_mode(mode, true)),
            b'l' => csi.params.iter().for_each(|&mode| self.set_dec_mode(mode, false)),
            _ => {
                tracing::debug!("Unhandled private CSI: {:?}", csi);
            },
        }
    }

    /// Set or reset a DEC private mode
    fn set_dec_mode(&mut self, mode: u16, enable: bool) {
        match mode {
            1 => self.screen.modes.application_cursor = enable,
            5 => self.screen.modes.reverse_video = enable,
            6 => {
                self.screen.cursor_mut().origin_mode = enable;
                self.screen.move_cursor_to(0, 0);
            },
            7 => self.screen.cursor_mut().autowrap = enable,
            25 => self.screen.cursor_mut().visible = enable,
            47 => {
                if enable {
                    self.screen.enter_alternate_screen(false);
                } else {
                    self.screen.exit_alternate_screen(false);
                }
            },
            66 => self.screen.modes.application_keypad = enable,
            1047 => {
                if enable {
                    self.screen.enter_alternate_screen(false);
                } else {
                    self.screen.exit_alternate_screen(true);
                }
            },
            1048 => {
                if enable {
                    self.screen.save_cursor();
                } else {
                    self.screen.restore_cursor();
                }
            },
            1049 => {
                if enable {
                    self.screen.save_cursor();
                    self.screen.enter_alternate_screen(true);
                } else {
                    self.screen.exit_alternate_screen(false);
                    self.screen.restore_cursor();
                }
            },
            2004 => self.screen.modes.bracketed_paste = enable,
            _ => {
                tracing::debug!("Unknown DEC mode: {} = {}", mode, enable);
            },
        }
    }

    /// Set or reset an ANSI mode
    fn set_mode(&mut self, csi: &CsiAction, enable: bool) {
        for &param in &csi.params {
            match param {
                4 => self.screen.cursor_mut().insert_mode = enable,
                20 => self.screen.modes.linefeed_mode = enable,
                _ => {
                    tracing::debug!("Unknown ANSI mode: {} = {}", param, enable);
                },
            }
        }
    }

    /// Execute SGR (Select Graphic Rendition)
    fn execute_sgr(&mut self, csi: &CsiAction) {
        let pen = &mut self.screen.cursor_mut().pen;
        if csi.params.is_empty() {
            pen.reset();
            return;
        }

        let mut groups = csi.groups().into_iter();
        while let Some(group) = groups.next() {
            let param = group[0];
            match param {
                0 => pen.reset(),
                1 => pen.style.bold = true,
                2 => pen.style.faint = true,
                3 => pen.style.italic = true,
                4 => pen.style.underline = true,
                5 | 6 => pen.style.blink = true,
                7 => pen.style.inverse = true,
                8 => pen.style.hidden = true,
                9 => pen.style.strikethrough = true,
                22 => {
                    pen.style.bold = false;
                    pen.style.faint = false;
                },
                23 => pen.style.italic = false,
                24 => pen.style.underline = false,
                25 => pen.style.blink = false,
                27 => pen.style.inverse = false,
                28 => pen.style.hidden = false,
                29 => pen.style.strikethrough = false,
                30..=37 => pen.fg = Color::Indexed((param - 30) as u8),
                38 => {
                    if let Some(color) = extended_color(group, &mut groups) {
                        pen.fg = color;
                    }
                },
                39 => pen.fg = Color::Default,
                40..=47 => pen.bg = Color::Indexed((param - 40) as u8),
                48 => {
                    if let Some(color) = extended_color(group, &mut groups) {
                        pen.bg = color;
                    }
                },
                49 => pen.bg = Color::Default,
                90..=97 => pen.fg = Color::Indexed((param - 90 + 8) as u8),
                100..=107 => pen.bg = Color::Indexed((param - 100 + 8) as u8),
                _ => {
                    tracing::debug!("Unknown SGR parameter: {}", param);
                },
            }
        }
    }

    fn execute_osc(&mut self, osc: OscAction) {
        match osc {
            OscAction::SetTitle(title) => self.set_title(title),
            OscAction::SetIconName(_) => {},
            OscAction::SetColor(pairs) => {
                let mut changed = false;
                for (index, spec) in pairs {
                    let Some(slot) = self.palette.indexed.get_mut(index as usize) else {
                        continue;
                    };
                    match parse_color_spec(&spec) {
                        Some(rgb) => {
                            *slot = rgb;
                            changed = true;
                        },
                        None => {
                            tracing::debug!("Ignoring color spec {:?} for index {}", spec, index);
                        },
                    }
                }
                if changed {
                    self.events.push(TerminalEvent::ColorsChanged);
                }
            },
            OscAction::SetDynamicColor { which, spec } => match parse_color_spec(&spec) {
                Some(rgb) => {
                    *self.palette.dynamic_mut(which) = rgb;
                    self.events.push(TerminalEvent::ColorsChanged);
                },
                None => {
                    tracing::debug!("Ignoring {:?} color spec {:?}", which, spec);
                },
            },
            OscAction::ResetColor(indices) => {
                if indices.is_empty() {
                    self.palette.indexed = Palette::default().indexed;
                } else {
                    for index in indices.into_iter().filter(|&i| i < 256) {
                        self.palette.indexed[index as usize] = Color::indexed_to_rgb(index as u8);
                    }
                }
                self.events.push(TerminalEvent::ColorsChanged);
            },
            OscAction::ResetDynamicColor(which) => {
                self.palette.reset_dynamic(which);
                self.events.push(TerminalEvent::ColorsChanged);
            },
            OscAction::Clipboard { data, .. } => {
                // "?" asks to read the clipboard, which is not offered to the child
                if data == "?" {
                    return;
                }
                match base64::engine::general_purpose::STANDARD.decode(data.as_bytes()) {
                    Ok(bytes) => {
                        let text = String::from_utf8_lossy(&bytes).into_owned();
                        self.events.push(TerminalEvent::ClipboardText(text));
                    },
                    Err(e) => {
                        tracing::debug!("Invalid OSC 52 payload: {}", e);
                    },
                }
            },
            OscAction::Unknown { command, .. } => {
                tracing::debug!("Unhandled OSC {}", command);
            },
        }
    }

    fn set_title(&mut self, title: String) {
        if title != self.title {
            let old = std::mem::replace(&mut self.title, title);
            self.events.push(TerminalEvent::TitleChanged {
                old,
                new: self.title.clone(),
            });
        }
    }
}

/// Parse the color selector of SGR 38/48
///
/// The colon form keeps everything in `group`: `38:5:n`, `38:2:r:g:b`, or the
/// ITU `38:2:id:r:g:b` with a color space id (often left empty). The
/// semicolon form `38;5;n` or `38;2;r;g;b` spreads over the following groups.
fn extended_color<'a>(group: &[u16], rest: &mut impl Iterator<Item = &'a [u16]>) -> Option<Color> {
    if group.len() > 1 {
        return match group[1..] {
            [5, index, ..] => u8::try_from(index).ok().map(Color::Indexed),
            [2, _, r, g, b, ..] | [2, r, g, b] => Some(rgb(r, g, b)),
            _ => {
                tracing::debug!("Malformed extended color: {:?}", group);
                None
            },
        };
    }

    let mut next = || rest.next().map(|following| following[0]);
    match next()? {
        5 => u8::try_from(next()?).ok().map(Color::Indexed),
        2 => Some(rgb(next()?, next()?, next()?)),
        other => {
            tracing::debug!("Unknown extended color mode: {}", other);
            None
        },
    }
}

fn rgb(r: u16, g: u16, b: u16) -> Color {
    Color::Rgb(r.min(255) as u8, g.min(255) as u8, b.min(255) as u8)
}
