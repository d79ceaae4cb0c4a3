//! What the parser hands to the emulator
//!
//! Every complete sequence becomes one value here. The emulator decides what
//! each means for the screen; the parser only classifies bytes.

use serde::{Deserialize, Serialize};

/// CSI parameters past this count are dropped
pub const MAX_PARAMS: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// A decoded printable character
    Print(char),

    /// C0 control other than ESC, CAN and SUB
    Execute(u8),

    CsiDispatch(CsiAction),

    EscDispatch(EscAction),

    /// OSC terminated by BEL or ST
    OscDispatch(OscAction),
}

/// `ESC [ marker? params intermediates final`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsiAction {
    /// Omitted parameters read as 0
    pub params: Vec<u16>,
    /// Parallel to `params`: set where the parameter followed a `:`, making
    /// it a sub-parameter of the one before
    #[serde(default)]
    pub subparams: Vec<bool>,
    /// 0x20..=0x2F
    pub intermediates: Vec<u8>,
    /// `?`, `>`, `<` or `=` right after the introducer
    pub private_marker: Option<u8>,
    /// 0x40..=0x7E
    pub final_byte: u8,
}

impl CsiAction {
    pub fn new(final_byte: u8) -> Self {
        Self {
            params: Vec::new(),
            subparams: Vec::new(),
            intermediates: Vec::new(),
            private_marker: None,
            final_byte,
        }
    }

    /// Parameter `index`, or `default` when it was not sent
    pub fn param(&self, index: usize, default: u16) -> u16 {
        self.params.get(index).copied().unwrap_or(default)
    }

    /// Like [`param`](Self::param), but an explicit 0 also means `default`
    pub fn param_or_default(&self, index: usize, default: u16) -> u16 {
        match self.param(index, 0) {
            0 => default,
            value => value,
        }
    }

    pub fn is_subparam(&self, index: usize) -> bool {
        self.subparams.get(index).copied().unwrap_or(false)
    }

    /// Parameters split at `;`, each group holding a parameter followed by
    /// its `:` sub-parameters
    pub fn groups(&self) -> Vec<&[u16]> {
        let mut groups = Vec::new();
        let mut start = 0;
        for end in 1..=self.params.len() {
            if end == self.params.len() || !self.is_subparam(end) {
                groups.push(&self.params[start..end]);
                start = end;
            }
        }
        groups
    }

    /// DEC private (`CSI ? ...`)
    pub fn is_private(&self) -> bool {
        self.private_marker == Some(b'?')
    }
}

/// Escape sequences other than CSI, OSC and the string introducers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EscAction {
    /// DECSC, `ESC 7`
    SaveCursor,
    /// DECRC, `ESC 8`
    RestoreCursor,
    /// IND, `ESC D`
    Index,
    /// RI, `ESC M`
    ReverseIndex,
    /// NEL, `ESC E`
    NextLine,
    /// HTS, `ESC H`
    HorizontalTabSet,
    /// RIS, `ESC c`
    FullReset,
    /// DECKPAM, `ESC =`
    ApplicationKeypad,
    /// DECKPNM, `ESC >`
    NormalKeypad,
    /// DECALN, `ESC # 8`
    AlignmentTest,
    /// SCS (`ESC ( B` and friends); accepted and ignored
    DesignateCharset { slot: u8, charset: u8 },
    /// A stray ST
    StringTerminator,
    /// Intermediates and final byte of anything unrecognized
    Unknown(Vec<u8>),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OscAction {
    /// OSC 0 and 2
    SetTitle(String),

    /// OSC 1
    SetIconName(String),

    /// OSC 4: (palette index, color spec) pairs
    SetColor(Vec<(u16, String)>),

    /// OSC 10, 11 and 12
    SetDynamicColor { which: DynamicColor, spec: String },

    /// OSC 104; no indices resets the whole palette
    ResetColor(Vec<u16>),

    /// OSC 110, 111 and 112
    ResetDynamicColor(DynamicColor),

    /// OSC 52; `data` is base64 text or `?` for a query
    Clipboard { selection: String, data: String },

    Unknown { command: u32, data: String },
}

/// Colors outside the 256-entry palette
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DynamicColor {
    Foreground,
    Background,
    Cursor,
}
