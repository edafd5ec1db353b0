//! Command field of a device 22 IOT.

use crate::DEVICE;

/// "Clear IO before executing" modifier in the command field.
pub const CLEAR_IO: u32 = 0o20;

const OPCODE_IOT: u32 = 0o720_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Receive a character from the current channel.
    Rch,
    /// Read the current channel number.
    Rrc,
    /// Receive a character and release the current channel.
    Rcr,
    /// Release the current channel.
    Rsc,
    /// Transmit on the send channel (or the current one).
    Tcb,
    /// Select the send channel.
    Ssb,
    /// Transmit on the current channel.
    Tcc,
    /// Set channel configuration (see [`crate::scb`]).
    Scb,
    /// Read and clear the last error.
    Rle,
    /// Count pending input on the current channel.
    Rpc,
    /// Clear a channel's interrupt state.
    Rci,
    /// Read the last interrupting channel.
    Ric,
    /// Read a channel's status word.
    Rcs,
    /// Wait for any channel event.
    Rwe,
    /// Open (select and lock) a channel.
    Roc,
    /// Read and set the priority enable bit.
    Res,
    /// Translate between Concise and ASCII.
    Rxl,
}

impl Command {
    /// Decode the command field (`(mb >> 6) & 077`) with [`CLEAR_IO`] already stripped.
    pub fn decode(code: u32) -> Option<Self> {
        Some(match code {
            0o00 => Command::Rch,
            0o01 => Command::Rrc,
            0o10 => Command::Rcr,
            0o11 => Command::Rsc,
            0o40 => Command::Tcb,
            0o41 => Command::Ssb,
            0o42 => Command::Scb,
            0o43 => Command::Rle,
            0o44 => Command::Rpc,
            0o45 => Command::Rci,
            0o46 => Command::Ric,
            0o47 => Command::Rcs,
            0o50 => Command::Tcc,
            0o51 => Command::Rwe,
            0o52 => Command::Roc,
            0o53 => Command::Res,
            0o54 => Command::Rxl,
            _ => return None,
        })
    }

    pub fn code(self) -> u32 {
        match self {
            Command::Rch => 0o00,
            Command::Rrc => 0o01,
            Command::Rcr => 0o10,
            Command::Rsc => 0o11,
            Command::Tcb => 0o40,
            Command::Ssb => 0o41,
            Command::Scb => 0o42,
            Command::Rle => 0o43,
            Command::Rpc => 0o44,
            Command::Rci => 0o45,
            Command::Ric => 0o46,
            Command::Rcs => 0o47,
            Command::Tcc => 0o50,
            Command::Rwe => 0o51,
            Command::Roc => 0o52,
            Command::Res => 0o53,
            Command::Rxl => 0o54,
        }
    }

    /// Split an instruction word into command and clear-IO flag.
    pub fn from_instruction(mb: u32) -> (u32, bool) {
        let field = (mb >> 6) & 0o77;
        (field & !CLEAR_IO, field & CLEAR_IO != 0)
    }
}

/// Assemble the IOT instruction that issues `cmd`.
pub fn instruction(cmd: Command, clear: bool) -> u32 {
    let field = cmd.code() | if clear { CLEAR_IO } else { 0 };
    OPCODE_IOT | (field << 6) | u32::from(DEVICE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_modifier_is_stripped() {
        let (code, clear) = Command::from_instruction(instruction(Command::Rch, true));
        assert!(clear);
        assert_eq!(Command::decode(code), Some(Command::Rch));

        let (code, clear) = Command::from_instruction(instruction(Command::Tcc, false));
        assert!(!clear);
        assert_eq!(Command::decode(code), Some(Command::Tcc));
    }

    #[test]
    fn every_command_decodes_to_itself() {
        let all = (0..0o100)
            .filter_map(Command::decode)
            .collect::<Vec<_>>();
        assert_eq!(all.len(), 17);
        for cmd in all {
            assert_eq!(Command::decode(cmd.code()), Some(cmd));
        }
    }

    #[test]
    fn device_number_is_in_the_low_bits() {
        assert_eq!(instruction(Command::Rrc, false), 0o720_122);
        assert_eq!(instruction(Command::Rch, true), 0o722_022);
    }
}
