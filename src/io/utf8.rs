//! UTF-8 encoding of user input
//!
//! Keystrokes arrive as Unicode code points and are forwarded to the child
//! process encoded as UTF-8, optionally prefixed with ESC for Alt/Meta.

/// ESC byte prepended for Alt/Meta-modified input
pub const ESC: u8 = 0x1B;

/// Highest valid Unicode scalar value
pub const MAX_CODE_POINT: u32 = 0x10FFFF;

/// Rejected input: above [`MAX_CODE_POINT`] or a UTF-16 surrogate
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid code point: {0:#X}")]
pub struct InvalidCodePoint(pub u32);

/// Encoded bytes for one code point (at most ESC + 4 bytes)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodedInput {
    bytes: [u8; 5],
    len: usize,
}

impl EncodedInput {
    /// The encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl AsRef<[u8]> for EncodedInput {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Encode a code point as UTF-8, optionally prefixed with ESC
pub fn encode_code_point(
    prepend_escape: bool,
    code_point: u32,
) -> Result<EncodedInput, InvalidCodePoint> {
    // char::from_u32 rejects surrogates and values above 0x10FFFF
    let c = char::from_u32(code_point).ok_or(InvalidCodePoint(code_point))?;

    let mut bytes = [0u8; 5];
    let mut len = 0;
    if prepend_escape {
        bytes[0] = ESC;
        len = 1;
    }
    len += c.encode_utf8(&mut bytes[len..]).len();

    Ok(EncodedInput { bytes, len })
}
