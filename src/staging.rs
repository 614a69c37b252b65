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

//! Text staging for outbound transfers.

use crate::protocol::{FILL, NUL};

/// Whether a byte can travel as frame data. NUL terminates transmission on
/// legacy peers and FILL is stripped by every receiver.
pub fn is_carried(byte: u8) -> bool {
    byte != NUL && byte != FILL
}

/// Turn staged text into a payload the codec can frame losslessly.
///
/// Line endings are normalised to LF and uncarriable bytes are dropped. UTF-8
/// continuation bytes are never NUL or FILL, so the result stays valid UTF-8.
pub fn stage_text(text: &str) -> Vec<u8> {
    text.replace("\r\n", "\n")
        .bytes()
        .filter(|&b| is_carried(b))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{packetize, reassemble};

    #[test]
    fn test_stage_plain_text() {
        assert_eq!(stage_text("HELLO"), b"HELLO".to_vec());
    }

    #[test]
    fn test_stage_drops_reserved_bytes() {
        assert_eq!(stage_text("a\u{0}b\u{14}c"), b"abc".to_vec());
    }

    #[test]
    fn test_stage_normalises_crlf() {
        assert_eq!(stage_text("one\r\ntwo\nthree\r"), b"one\ntwo\nthree\r".to_vec());
    }

    #[test]
    fn test_staged_unicode_survives_framing() {
        let text = "Grüße aus Köln, ñandú, 漢字\n".repeat(80);
        let payload = stage_text(&text);
        let frames = packetize(&payload);
        assert!(frames.len() > 1);

        let bytes = reassemble(&frames).unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), text);
    }
}
