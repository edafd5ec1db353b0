//! Concise (Flexowriter) ↔ ASCII translation.
//!
//! Concise is a 6-bit code with two cases selected by explicit shift characters, so both
//! directions carry a [`Shift`] state. Translating into Concise may have to emit a shift code
//! before the character itself; in that case the character is *not* consumed and the caller
//! must translate it again.

/// Shift into lower case.
pub const LOWER_SHIFT: u8 = 0o72;
/// Shift into upper case.
pub const UPPER_SHIFT: u8 = 0o74;
/// Concise value reported when no character is available.
pub const FLEX_NO_CHAR: u8 = 0o13;
/// Concise value reported when the connection failed; not a valid Concise character.
pub const FLEX_ERROR: u8 = 0o76;
/// ASCII value reported by RXL when a Concise code has no ASCII equivalent.
pub const ASCII_NO_CHAR: u8 = 0o77;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Shift {
    #[default]
    Lower,
    Upper,
}

pub fn is_shift(code: u8) -> bool {
    code == LOWER_SHIFT || code == UPPER_SHIFT
}

// Table markers. ASCII never exceeds 0177, so these cannot collide with a character.
const NO: u8 = 0xFF;
const LCS: u8 = 0xFE;
const UCS: u8 = 0xFD;

// Concise has no line feed and no colour shifts on a socket; their slots stay unmapped.
// Glyphs with no ASCII counterpart use a stand-in: middle dot '@', overline '`', implies '#',
// or '!', and '&', up arrow '^', right arrow '\\', times '*'.
#[rustfmt::skip]
const CONCISE_TO_ASCII: [u8; 128] = [
    // lower case
    b' ', b'1', b'2', b'3', b'4', b'5', b'6', b'7',
    b'8', b'9', NO,   NO,   NO,   NO,   NO,   NO,
    b'0', b'/', b's', b't', b'u', b'v', b'w', b'x',
    b'y', b'z', NO,   b',', NO,   NO,   b'\t', NO,
    b'@', b'j', b'k', b'l', b'm', b'n', b'o', b'p',
    b'q', b'r', NO,   NO,   b'-', b')', b'`', b'(',
    NO,   b'a', b'b', b'c', b'd', b'e', b'f', b'g',
    b'h', b'i', LCS,  b'.', UCS,  0x08, NO,   b'\n',
    // upper case
    b' ', b'"', b'\'', b'~', b'#', b'!', b'&', b'<',
    b'>', b'^', NO,   NO,   NO,   NO,   NO,   NO,
    b'\\', b'?', b'S', b'T', b'U', b'V', b'W', b'X',
    b'Y', b'Z', NO,   b'=', NO,   NO,   b'\t', NO,
    b'_', b'J', b'K', b'L', b'M', b'N', b'O', b'P',
    b'Q', b'R', NO,   NO,   b'+', b']', b'|', b'[',
    NO,   b'A', b'B', b'C', b'D', b'E', b'F', b'G',
    b'H', b'I', LCS,  b'*', UCS,  0x08, NO,   b'\n',
];

const LOWER: u8 = 0o100;
const UPPER: u8 = 0o200;

// Concise code in the low 6 bits, tagged with the case it lives in (neither tag: both cases).
#[rustfmt::skip]
const ASCII_TO_CONCISE: [u8; 128] = [
    NO,   NO,   NO,   NO,   NO,   NO,   NO,   NO,
    0o075, 0o036, NO,  NO,   NO,   0o077, NO,  NO,
    NO,   NO,   NO,   NO,   NO,   NO,   NO,   NO,
    NO,   NO,   NO,   NO,   NO,   NO,   NO,   NO,
    // ' ' .. '/'
    0o000, 0o205, 0o201, 0o204, NO,  NO,   0o206, 0o202,
    0o157, 0o155, 0o273, 0o254, 0o133, 0o154, 0o173, 0o121,
    // '0' .. '?'
    0o120, 0o101, 0o102, 0o103, 0o104, 0o105, 0o106, 0o107,
    0o110, 0o111, NO,   NO,   0o207, 0o233, 0o210, 0o221,
    // '@' .. 'O'
    0o140, 0o261, 0o262, 0o263, 0o264, 0o265, 0o266, 0o267,
    0o270, 0o271, 0o241, 0o242, 0o243, 0o244, 0o245, 0o246,
    // 'P' .. '_'
    0o247, 0o250, 0o251, 0o222, 0o223, 0o224, 0o225, 0o226,
    0o227, 0o230, 0o231, 0o257, 0o220, 0o255, 0o211, 0o240,
    // '`' .. 'o'
    0o156, 0o161, 0o162, 0o163, 0o164, 0o165, 0o166, 0o167,
    0o170, 0o171, 0o141, 0o142, 0o143, 0o144, 0o145, 0o146,
    // 'p' .. DEL
    0o147, 0o150, 0o151, 0o122, 0o123, 0o124, 0o125, 0o126,
    0o127, 0o130, 0o131, NO,   0o256, NO,   0o203, NO,
];

/// Translate a Concise code to ASCII.
///
/// Shift codes update `shift` and produce nothing, as do codes with no ASCII equivalent.
/// Carriage return (077) comes out as `\n`.
pub fn decode(code: u8, shift: &mut Shift) -> Option<u8> {
    let mut idx = code & 0o177;
    if *shift == Shift::Upper {
        idx |= 0o100;
    }

    match CONCISE_TO_ASCII[usize::from(idx)] {
        NO => None,
        LCS => {
            *shift = Shift::Lower;
            None
        }
        UCS => {
            *shift = Shift::Upper;
            None
        }
        ascii => Some(ascii),
    }
}

/// Translate an ASCII byte to Concise.
///
/// When the character lives in the other case, the matching shift code is returned and
/// `shift` flips; the character itself is produced by the next call.
pub fn encode(ascii: u8, shift: &mut Shift) -> Option<u8> {
    let tagged = *ASCII_TO_CONCISE.get(usize::from(ascii))?;
    if tagged == NO {
        return None;
    }

    if tagged & UPPER != 0 && *shift == Shift::Lower {
        *shift = Shift::Upper;
        return Some(UPPER_SHIFT);
    }
    if tagged & LOWER != 0 && *shift == Shift::Upper {
        *shift = Shift::Lower;
        return Some(LOWER_SHIFT);
    }

    Some(tagged & 0o77)
}
