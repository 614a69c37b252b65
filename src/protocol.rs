// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

//! RM link protocol constants

use std::time::Duration;

/// Start of header - sync marker that opens every frame
pub const SYNC: u8 = 0x01;

/// End of transmission - peer has nothing further to send
pub const EOT: u8 = 0x04;

/// Enquiry - request for the line before a frame is sent
pub const ENQ: u8 = 0x05;

/// Acknowledge - line granted, or frame accepted
pub const ACK: u8 = 0x06;

/// Fill byte used to pad the data region of the last frame.
/// NUL cannot be used because it terminates transmission on the legacy peers.
pub const FILL: u8 = 0x14;

/// Null byte, never carried as frame data
pub const NUL: u8 = 0x00;

/// Bytes of payload carried by one frame
pub const DATA_SIZE: usize = 1024;

/// Sync + data + two CRC bytes
pub const FRAME_SIZE: usize = 1 + DATA_SIZE + 2;

/// Offset of the first data byte inside a frame
pub const DATA_INDEX: usize = 1;

/// Wait for the ACK answering a line-confirming ENQ
pub const CONFIRM_TIMEOUT: Duration = Duration::from_millis(500);

/// Bounded wait for the peer's ENQ after an exchange
pub const ENQ_WAIT_TIMEOUT: Duration = Duration::from_millis(200);

/// Wait for a full frame, or for the ACK that answers one
pub const PACKET_TIMEOUT: Duration = Duration::from_millis(2000);

/// Slice used by the idle listener between checks of the session flags
pub const IDLE_POLL: Duration = Duration::from_millis(50);

/// Attempts to confirm the line before a frame set is abandoned
pub const LINE_TRIES: u32 = 1;

/// Attempts to deliver one frame before it is counted as lost
pub const SEND_TRIES: u32 = 1;

/// Printable name for a byte seen on the line
pub fn byte_name(byte: u8) -> String {
    match byte {
        SYNC => "SYNC".to_string(),
        EOT => "EOT".to_string(),
        ENQ => "ENQ".to_string(),
        ACK => "ACK".to_string(),
        _ => format!("0x{:02X}", byte),
    }
}
