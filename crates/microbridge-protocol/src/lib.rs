//! microbridge Protocol - Wire format for board communication
//!
//! The board firmware speaks a fixed, unframed binary protocol over TCP:
//!
//! - Board → hub: sensor readings as unsigned 16-bit little-endian values.
//!   Only the first two bytes of each received chunk are meaningful in the
//!   default framing mode.
//! - Hub → board: one command byte per send, `0x00` (LED off) or `0x01`
//!   (LED on), broadcast to every connected board.

pub mod command;
pub mod frame;

pub use command::{decode_commands, encode_led, CommandError};
pub use frame::{decode_sensor_chunk, FrameMode, SensorDecoder, SENSOR_FRAME_LEN};
