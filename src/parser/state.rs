//! VT500-style byte state machine
//!
//! Bytes go in, [`Action`]s come out. Chunk boundaries carry no meaning: a
//! sequence or UTF-8 character split across calls to [`Parser::parse`] comes
//! out exactly as if it had arrived whole.
//!
//! Malformed input is dropped and the machine falls back to ground. Nothing
//! the child writes can wedge it.

use super::actions::{Action, CsiAction, DynamicColor, EscAction, OscAction, MAX_PARAMS};

/// Longest OSC payload kept; longer commands are dropped
const MAX_OSC_LENGTH: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Ground,
    Escape,
    EscapeIntermediate,
    CsiEntry,
    CsiParam,
    CsiIntermediate,
    CsiIgnore,
    OscString,
    SosPmApcString,
}

#[derive(Debug)]
pub struct Parser {
    state: State,
    intermediates: Vec<u8>,
    params: Vec<u16>,
    subparams: Vec<bool>,
    /// The parameter being read follows a `:`
    in_subparam: bool,
    /// Digits of the parameter being read
    param_acc: u16,
    /// A digit or separator was seen for the current parameter
    param_started: bool,
    private_marker: Option<u8>,
    /// Everything between `ESC ]` and the terminator
    osc_payload: Vec<u8>,
    /// The payload outgrew [`MAX_OSC_LENGTH`] and will be dropped
    osc_overflow: bool,
    /// The last ESC closed a string, so a following `\` is the rest of ST
    string_terminated: bool,
    /// Partial UTF-8 character
    utf8_buffer: [u8; 4],
    utf8_len: usize,
    utf8_needed: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    pub fn new() -> Self {
        Self {
            state: State::Ground,
            intermediates: Vec::with_capacity(4),
            params: Vec::with_capacity(16),
            subparams: Vec::with_capacity(16),
            in_subparam: false,
            param_acc: 0,
            param_started: false,
            private_marker: None,
            osc_payload: Vec::with_capacity(256),
            osc_overflow: false,
            string_terminated: false,
            utf8_buffer: [0; 4],
            utf8_len: 0,
            utf8_needed: 0,
        }
    }

    /// Drop any partial sequence or character
    pub fn reset(&mut self) {
        self.state = State::Ground;
        self.begin_sequence();
        self.osc_payload.clear();
        self.osc_overflow = false;
        self.string_terminated = false;
        self.utf8_len = 0;
        self.utf8_needed = 0;
    }

    /// Nothing is half-parsed
    pub fn is_ground(&self) -> bool {
        self.state == State::Ground && self.utf8_needed == 0
    }

    fn begin_sequence(&mut self) {
        self.intermediates.clear();
        self.params.clear();
        self.subparams.clear();
        self.in_subparam = false;
        self.param_acc = 0;
        self.param_started = false;
        self.private_marker = None;
    }

    /// Feed `data`, collecting the actions it completes
    pub fn parse(&mut self, data: &[u8]) -> Vec<Action> {
        let mut actions = Vec::new();
        for &byte in data {
            self.advance(byte, &mut actions);
        }
        actions
    }

    fn advance(&mut self, byte: u8, actions: &mut Vec<Action>) {
        if self.utf8_needed > 0 {
            if (0x80..=0xBF).contains(&byte) {
                self.push_utf8_continuation(byte, actions);
                return;
            }
            // Truncated sequence: replace it, then handle this byte normally
            self.utf8_len = 0;
            self.utf8_needed = 0;
            actions.push(Action::Print(char::REPLACEMENT_CHARACTER));
        }

        if byte < 0x20 {
            self.control_byte(byte, actions);
            return;
        }

        match self.state {
            State::Ground => self.ground_byte(byte, actions),
            State::Escape => self.escape_byte(byte, actions),
            State::EscapeIntermediate => self.escape_intermediate_byte(byte, actions),
            State::CsiEntry => self.csi_entry_byte(byte, actions),
            State::CsiParam => self.csi_param_byte(byte, actions),
            State::CsiIntermediate => self.csi_intermediate_byte(byte, actions),
            State::CsiIgnore => self.csi_ignore_byte(byte),
            State::OscString => self.osc_byte(byte),
            State::SosPmApcString => {},
        }
    }

    /// C0 controls act the same in almost every state
    fn control_byte(&mut self, byte: u8, actions: &mut Vec<Action>) {
        match byte {
            0x18 | 0x1A => {
                // CAN and SUB abort the sequence
                self.state = State::Ground;
            },
            0x1B => {
                // ESC inside a string is the first half of ST (ESC \)
                self.string_terminated = match self.state {
                    State::OscString => {
                        self.dispatch_osc(actions);
                        true
                    },
                    State::SosPmApcString => true,
                    _ => false,
                };
                self.state = State::Escape;
                self.begin_sequence();
            },
            _ => match self.state {
                State::OscString => {
                    // BEL terminates OSC (xterm extension), other controls are ignored
                    if byte == 0x07 {
                        self.dispatch_osc(actions);
                        self.state = State::Ground;
                    }
                },
                State::SosPmApcString => {},
                _ => actions.push(Action::Execute(byte)),
            },
        }
    }

    fn ground_byte(&mut self, byte: u8, actions: &mut Vec<Action>) {
        match byte {
            0x20..=0x7E => actions.push(Action::Print(byte as char)),
            // DEL is ignored
            0x7F => {},
            0xC2..=0xDF => self.start_utf8(byte, 1),
            0xE0..=0xEF => self.start_utf8(byte, 2),
            0xF0..=0xF4 => self.start_utf8(byte, 3),
            // Stray continuation or invalid lead byte
            _ => actions.push(Action::Print(char::REPLACEMENT_CHARACTER)),
        }
    }

    fn start_utf8(&mut self, byte: u8, continuation_bytes: usize) {
        self.utf8_buffer[0] = byte;
        self.utf8_len = 1;
        self.utf8_needed = continuation_bytes;
    }

    fn push_utf8_continuation(&mut self, byte: u8, actions: &mut Vec<Action>) {
        self.utf8_buffer[self.utf8_len] = byte;
        self.utf8_len += 1;
        self.utf8_needed -= 1;

        if self.utf8_needed == 0 {
            // from_utf8 rejects overlong forms and surrogates
            let c = std::str::from_utf8(&self.utf8_buffer[..self.utf8_len])
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or(char::REPLACEMENT_CHARACTER);
            self.utf8_len = 0;
            actions.push(Action::Print(c));
        }
    }

    fn escape_byte(&mut self, byte: u8, actions: &mut Vec<Action>) {
        let terminated_string = std::mem::take(&mut self.string_terminated);
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
                self.state = State::EscapeIntermediate;
            },
            b'[' => {
                self.state = State::CsiEntry;
                self.begin_sequence();
            },
            b']' => {
                self.state = State::OscString;
                self.osc_payload.clear();
                self.osc_overflow = false;
            },
            // DCS (ESC P), SOS (ESC X), PM (ESC ^), APC (ESC _)
            b'P' | b'X' | b'^' | b'_' => {
                self.state = State::SosPmApcString;
            },
            b'\\' if terminated_string => {
                // Second half of ST, the string was already dispatched
                self.state = State::Ground;
            },
            0x30..=0x7E => {
                self.state = State::Ground;
                self.dispatch_esc(byte, actions);
            },
            _ => {
                self.state = State::Ground;
            },
        }
    }

    fn escape_intermediate_byte(&mut self, byte: u8, actions: &mut Vec<Action>) {
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
            },
            0x30..=0x7E => {
                self.state = State::Ground;
                self.dispatch_esc(byte, actions);
            },
            _ => {
                self.state = State::Ground;
            },
        }
    }

    fn dispatch_esc(&mut self, final_byte: u8, actions: &mut Vec<Action>) {
        let action = match (self.intermediates.as_slice(), final_byte) {
            ([], b'7') => EscAction::SaveCursor,
            ([], b'8') => EscAction::RestoreCursor,
            ([], b'D') => EscAction::Index,
            ([], b'M') => EscAction::ReverseIndex,
            ([], b'E') => EscAction::NextLine,
            ([], b'H') => EscAction::HorizontalTabSet,
            ([], b'c') => EscAction::FullReset,
            ([], b'=') => EscAction::ApplicationKeypad,
            ([], b'>') => EscAction::NormalKeypad,
            ([], b'\\') => EscAction::StringTerminator,
            ([b'#'], b'8') => EscAction::AlignmentTest,
            ([slot @ (b'(' | b')' | b'*' | b'+')], charset) => EscAction::DesignateCharset {
                slot: *slot,
                charset,
            },
            (intermediates, _) => {
                let mut seq = intermediates.to_vec();
                seq.push(final_byte);
                EscAction::Unknown(seq)
            },
        };

        actions.push(Action::EscDispatch(action));
    }

    fn csi_entry_byte(&mut self, byte: u8, actions: &mut Vec<Action>) {
        match byte {
            b'?' | b'>' | b'<' | b'=' => {
                self.private_marker = Some(byte);
                self.state = State::CsiParam;
            },
            _ => {
                self.state = State::CsiParam;
                self.csi_param_byte(byte, actions);
            },
        }
    }

    fn csi_param_byte(&mut self, byte: u8, actions: &mut Vec<Action>) {
        match byte {
            b'0'..=b'9' => {
                self.param_acc = self
                    .param_acc
                    .saturating_mul(10)
                    .saturating_add((byte - b'0') as u16);
                self.param_started = true;
            },
            // An explicit separator means the next parameter exists
            b';' => {
                self.finish_param();
                self.param_started = true;
            },
            b':' => {
                self.finish_param();
                self.param_started = true;
                self.in_subparam = true;
            },
            0x20..=0x2F => {
                if self.param_started {
                    self.finish_param();
                }
                self.intermediates.push(byte);
                self.state = State::CsiIntermediate;
            },
            0x40..=0x7E => {
                if self.param_started {
                    self.finish_param();
                }
                self.state = State::Ground;
                self.dispatch_csi(byte, actions);
            },
            // Private markers in wrong position, or non-ASCII
            _ => {
                self.state = State::CsiIgnore;
            },
        }
    }

    fn finish_param(&mut self) {
        if self.params.len() < MAX_PARAMS {
            self.params.push(self.param_acc);
            self.subparams.push(self.in_subparam);
        }
        self.in_subparam = false;
        self.param_acc = 0;
        self.param_started = false;
    }

    fn csi_intermediate_byte(&mut self, byte: u8, actions: &mut Vec<Action>) {
        match byte {
            0x20..=0x2F => {
                self.intermediates.push(byte);
            },
            0x40..=0x7E => {
                self.state = State::Ground;
                self.dispatch_csi(byte, actions);
            },
            _ => {
                self.state = State::CsiIgnore;
            },
        }
    }

    /// Swallow a malformed CSI through its final byte
    fn csi_ignore_byte(&mut self, byte: u8) {
        if (0x40..=0x7E).contains(&byte) {
            self.state = State::Ground;
        }
    }

    fn dispatch_csi(&mut self, final_byte: u8, actions: &mut Vec<Action>) {
        actions.push(Action::CsiDispatch(CsiAction {
            params: std::mem::take(&mut self.params),
            subparams: std::mem::take(&mut self.subparams),
            intermediates: std::mem::take(&mut self.intermediates),
            private_marker: self.private_marker.take(),
            final_byte,
        }));
        self.param_acc = 0;
        self.param_started = false;
        self.in_subparam = false;
    }

    fn osc_byte(&mut self, byte: u8) {
        if self.osc_payload.len() >= MAX_OSC_LENGTH {
            self.osc_overflow = true;
            return;
        }
        self.osc_payload.push(byte);
    }

    /// Split the payload into its command number and text
    fn dispatch_osc(&mut self, actions: &mut Vec<Action>) {
        let raw = std::mem::take(&mut self.osc_payload);
        if std::mem::take(&mut self.osc_overflow) {
            tracing::debug!("Dropping oversized OSC sequence");
            return;
        }

        let text = String::from_utf8_lossy(&raw);
        let (command, payload) = match text.split_once(';') {
            Some((command, payload)) => (command, payload),
            None => (text.as_ref(), ""),
        };

        let Ok(command) = command.parse::<u32>() else {
            tracing::debug!("Malformed OSC command: {:?}", command);
            return;
        };

        actions.push(Action::OscDispatch(parse_osc(command, payload)));
    }
}

/// Interpret an OSC command number and its payload
fn parse_osc(command: u32, payload: &str) -> OscAction {
    let unknown = || OscAction::Unknown {
        command,
        data: payload.to_string(),
    };

    match command {
        0 | 2 => OscAction::SetTitle(payload.to_string()),
        1 => OscAction::SetIconName(payload.to_string()),
        4 => {
            // OSC 4 ; index ; spec [; index ; spec ...]
            let parts: Vec<&str> = payload.split(';').collect();
            let pairs: Vec<(u16, String)> = parts
                .chunks_exact(2)
                .filter_map(|pair| Some((pair[0].parse().ok()?, pair[1].to_string())))
                .collect();
            if pairs.is_empty() {
                unknown()
            } else {
                OscAction::SetColor(pairs)
            }
        },
        10..=12 => OscAction::SetDynamicColor {
            which: dynamic_color(command - 10),
            spec: payload.to_string(),
        },
        52 => match payload.split_once(';') {
            Some((selection, data)) => OscAction::Clipboard {
                selection: selection.to_string(),
                data: data.to_string(),
            },
            None => unknown(),
        },
        104 => OscAction::ResetColor(
            payload
                .split(';')
                .filter_map(|index| index.parse().ok())
                .collect(),
        ),
        110..=112 => OscAction::ResetDynamicColor(dynamic_color(command - 110)),
        _ => unknown(),
    }
}

fn dynamic_color(offset: u32) -> DynamicColor {
    match offset {
        0 => DynamicColor::Foreground,
        1 => DynamicColor::Background,
        _ => DynamicColor::Cursor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn single_csi(input: &[u8]) -> CsiAction {
        let mut parser = Parser::new();
        let mut actions = parser.parse(input);
        assert_eq!(actions.len(), 1, "actions: {:?}", actions);
        match actions.remove(0) {
            Action::CsiDispatch(csi) => csi,
            other => panic!("Expected CsiDispatch, got {:?}", other),
        }
    }

    #[test]
    fn test_ascii_prints() {
        let actions = Parser::new().parse(b"ok~");
        assert_eq!(
            actions,
            vec![Action::Print('o'), Action::Print('k'), Action::Print('~')]
        );
    }

    #[test]
    fn test_controls_execute() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"A\nB\rC\x07");

        assert_eq!(
            actions,
            vec![
                Action::Print('A'),
                Action::Execute(b'\n'),
                Action::Print('B'),
                Action::Execute(b'\r'),
                Action::Print('C'),
                Action::Execute(0x07),
            ]
        );
    }

    #[test]
    fn test_csi_single_param() {
        let csi = single_csi(b"\x1b[5A");
        assert_eq!(csi.params, vec![5]);
        assert_eq!(csi.final_byte, b'A');
        assert!(!csi.is_private());
    }

    #[test]
    fn test_csi_two_params() {
        let csi = single_csi(b"\x1b[10;20H");
        assert_eq!(csi.params, vec![10, 20]);
        assert_eq!(csi.final_byte, b'H');
    }

    #[test]
    fn test_csi_without_params() {
        let csi = single_csi(b"\x1b[H");
        assert!(csi.params.is_empty());

        let csi = single_csi(b"\x1b[;5H");
        assert_eq!(csi.params, vec![0, 5]);

        let csi = single_csi(b"\x1b[5;H");
        assert_eq!(csi.params, vec![5, 0]);
    }

    #[test]
    fn test_csi_private_marker() {
        let csi = single_csi(b"\x1b[?25h");
        assert_eq!(csi.params, vec![25]);
        assert_eq!(csi.final_byte, b'h');
        assert!(csi.is_private());
    }

    #[test]
    fn test_csi_intermediate() {
        let csi = single_csi(b"\x1b[!p");
        assert_eq!(csi.intermediates, vec![b'!']);
        assert_eq!(csi.final_byte, b'p');
    }

    #[test]
    fn test_csi_semicolon_params() {
        let csi = single_csi(b"\x1b[1;31;48;2;255;128;0m");
        assert_eq!(csi.params, vec![1, 31, 48, 2, 255, 128, 0]);
        assert!(csi.subparams.iter().all(|&sub| !sub));
        assert_eq!(csi.final_byte, b'm');
    }

    #[test]
    fn test_csi_colon_subparams() {
        let csi = single_csi(b"\x1b[4;38:2::9:8:7m");
        assert_eq!(csi.params, vec![4, 38, 2, 0, 9, 8, 7]);
        assert_eq!(csi.subparams, vec![false, false, true, true, true, true, true]);
        assert_eq!(csi.groups(), [&[4][..], &[38, 2, 0, 9, 8, 7]]);
    }

    #[test]
    fn test_param_saturates() {
        let csi = single_csi(b"\x1b[99999999A");
        assert_eq!(csi.params, vec![u16::MAX]);
    }

    #[test]
    fn test_malformed_csi_is_dropped() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b[1?2hX");
        assert_eq!(actions, vec![Action::Print('X')]);
    }

    #[test]
    fn test_esc_decsc_decrc() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b7\x1b8");

        assert_eq!(
            actions,
            vec![
                Action::EscDispatch(EscAction::SaveCursor),
                Action::EscDispatch(EscAction::RestoreCursor),
            ]
        );
    }

    #[test]
    fn test_esc_charset_designation() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b(B\x1b)0");

        assert_eq!(
            actions,
            vec![
                Action::EscDispatch(EscAction::DesignateCharset {
                    slot: b'(',
                    charset: b'B'
                }),
                Action::EscDispatch(EscAction::DesignateCharset {
                    slot: b')',
                    charset: b'0'
                }),
            ]
        );
    }

    #[test]
    fn test_osc_title_bel() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b]0;My Title\x07");
        assert_eq!(
            actions,
            vec![Action::OscDispatch(OscAction::SetTitle("My Title".into()))]
        );
    }

    #[test]
    fn test_osc_title_st() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b]2;42 is the answer\x1b\\after");

        assert_eq!(
            actions[0],
            Action::OscDispatch(OscAction::SetTitle("42 is the answer".into()))
        );
        // ST is consumed silently, text resumes
        assert_eq!(actions[1], Action::Print('a'));
        assert_eq!(actions.len(), 6);
    }

    #[test]
    fn test_osc_colors() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b]4;1;rgb:ff/00/00;2;#00ff00\x07\x1b]104\x07\x1b]11;#000000\x07");

        assert_eq!(
            actions,
            vec![
                Action::OscDispatch(OscAction::SetColor(vec![
                    (1, "rgb:ff/00/00".into()),
                    (2, "#00ff00".into()),
                ])),
                Action::OscDispatch(OscAction::ResetColor(vec![])),
                Action::OscDispatch(OscAction::SetDynamicColor {
                    which: DynamicColor::Background,
                    spec: "#000000".into(),
                }),
            ]
        );
    }

    #[test]
    fn test_osc_clipboard() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b]52;c;aGVsbG8=\x07");
        assert_eq!(
            actions,
            vec![Action::OscDispatch(OscAction::Clipboard {
                selection: "c".into(),
                data: "aGVsbG8=".into(),
            })]
        );
    }

    #[test]
    fn test_osc_garbage_is_dropped() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1b]abc;def\x07Z");
        assert_eq!(actions, vec![Action::Print('Z')]);
    }

    #[test]
    fn test_dcs_is_consumed() {
        let mut parser = Parser::new();
        let actions = parser.parse(b"\x1bPq#0;2;0;0;0\x1b\\ok");
        assert_eq!(actions, vec![Action::Print('o'), Action::Print('k')]);
    }

    #[test]
    fn test_multibyte_text() {
        let printed: String = Parser::new()
            .parse("né 字 🦀".as_bytes())
            .into_iter()
            .map(|action| match action {
                Action::Print(c) => c,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(printed, "né 字 🦀");
    }

    #[test]
    fn test_utf8_split_across_chunks() {
        let mut parser = Parser::new();

        // '字' is E5 AD 97
        assert!(parser.parse(&[0xE5]).is_empty());
        assert!(!parser.is_ground());
        assert!(parser.parse(&[0xAD]).is_empty());
        assert_eq!(parser.parse(&[0x97]), vec![Action::Print('字')]);
        assert!(parser.is_ground());
    }

    #[test]
    fn test_truncated_utf8_keeps_next_byte() {
        let mut parser = Parser::new();
        let actions = parser.parse(&[0xE4, b'A']);
        assert_eq!(
            actions,
            vec![Action::Print(char::REPLACEMENT_CHARACTER), Action::Print('A')]
        );
    }

    #[test]
    fn test_invalid_utf8() {
        let mut parser = Parser::new();
        // Stray continuation, overlong lead and an encoded surrogate
        let actions = parser.parse(&[0x80, 0xC0, 0xED, 0xA0, 0x80]);
        assert!(actions
            .iter()
            .all(|a| *a == Action::Print(char::REPLACEMENT_CHARACTER)));
        assert_eq!(actions.len(), 3);
    }

    #[test]
    fn test_csi_split_across_chunks() {
        let mut parser = Parser::new();

        assert!(parser.parse(b"\x1b[").is_empty());
        assert!(parser.parse(b"5").is_empty());
        let actions = parser.parse(b"A");

        assert_eq!(actions.len(), 1);
        match &actions[0] {
            Action::CsiDispatch(csi) => {
                assert_eq!(csi.params, vec![5]);
                assert_eq!(csi.final_byte, b'A');
            },
            other => panic!("Expected CsiDispatch, got {:?}", other),
        }
    }

    #[test]
    fn test_can_aborts_sequence() {
        let mut parser = Parser::new();

        // CAN cancels the sequence, 'A' is printed
        let actions = parser.parse(b"\x1b[5\x18A");
        assert_eq!(actions, vec![Action::Print('A')]);
    }

    #[test]
    fn test_reset_discards_partial_sequence() {
        let mut parser = Parser::new();
        parser.parse(b"\x1b[12");
        assert!(!parser.is_ground());

        parser.reset();
        assert!(parser.is_ground());
        assert_eq!(parser.parse(b"A"), vec![Action::Print('A')]);
    }

    proptest! {
        #[test]
        fn prop_chunking_does_not_change_actions(
            data in prop::collection::vec(any::<u8>(), 0..256),
            split in 0usize..256,
        ) {
            let split = split.min(data.len());

            let mut whole = Parser::new();
            let expected = whole.parse(&data);

            let mut chunked = Parser::new();
            let mut actual = chunked.parse(&data[..split]);
            actual.extend(chunked.parse(&data[split..]));

            prop_assert_eq!(actual, expected);
        }
    }
}
