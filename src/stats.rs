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

use std::fmt;

/// Link counters shared by both engines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Statistics {
    pub sent: u32,
    pub lost: u32,
    pub received: u32,
    pub corrupted: u32,
    pub acks_received: u32,
}

impl Statistics {
    /// Percentage of corrupted frames among all frames judged so far.
    /// Zero until the first frame is judged.
    pub fn bit_error_rate(&self) -> u32 {
        let judged = u64::from(self.received) + u64::from(self.corrupted);
        if judged == 0 {
            return 0;
        }
        (100 * u64::from(self.corrupted) / judged) as u32
    }
}

impl fmt::Display for Statistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "sent {}  lost {}  received {}  corrupted {}  acks {}  error rate {}%",
            self.sent,
            self.lost,
            self.received,
            self.corrupted,
            self.acks_received,
            self.bit_error_rate()
        )
    }
}

/// Checksum of the last accepted frame.
///
/// A distinct frame whose CRC happens to equal the previous one is dropped as
/// a duplicate. That is inherent to CRC16-based dedup.
#[derive(Debug, Clone, Copy, Default)]
pub struct DuplicateGuard {
    last: Option<u16>,
}

impl DuplicateGuard {
    pub fn is_duplicate(&self, checksum: u16) -> bool {
        self.last == Some(checksum)
    }

    pub fn accept(&mut self, checksum: u16) {
        self.last = Some(checksum);
    }
}
