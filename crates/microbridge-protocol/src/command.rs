//! Outbound command bytes.

use microbridge_core::LedState;
use thiserror::Error;

/// Errors decoding command bytes on the board side.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Unknown command byte {byte:#04x} at offset {offset}")]
    UnknownByte { byte: u8, offset: usize },
}

/// Encodes an LED state as the single-byte command payload.
pub fn encode_led(state: LedState) -> [u8; 1] {
    [state.command_byte()]
}

/// Decodes every command byte in a chunk received from the hub.
///
/// Commands are one byte each, so a chunk may carry several of them if
/// broadcasts were sent back to back. Invalid bytes are reported in place
/// without stopping the decode.
pub fn decode_commands(chunk: &[u8]) -> Vec<Result<LedState, CommandError>> {
    chunk
        .iter()
        .enumerate()
        .map(|(offset, byte)| {
            LedState::from_command_byte(*byte)
                .map_err(|_| CommandError::UnknownByte { byte: *byte, offset })
        })
        .collect()
}
