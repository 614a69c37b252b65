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

//! Line arbitration after an exchange.
//!
//! Both flags default to false. A receiver only re-polls when the sending role
//! holds priority alone; a sender waits for the peer's ENQ unless the
//! receiving role holds priority alone.

/// Collision-avoidance flags, fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PriorityConfig {
    pub sender_priority: bool,
    pub receiver_priority: bool,
}

impl PriorityConfig {
    fn exclusive_sender(&self) -> bool {
        self.sender_priority && !self.receiver_priority
    }

    fn exclusive_receiver(&self) -> bool {
        self.receiver_priority && !self.sender_priority
    }
}

/// Direction of the exchange that just finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Sender,
    Receiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    GoIdle,
    ActivelyWaitForEnq,
}

pub fn decide(priority: PriorityConfig, finished_as: Role) -> Decision {
    let wait = match finished_as {
        Role::Receiver => priority.exclusive_sender(),
        Role::Sender => !priority.exclusive_receiver(),
    };

    if wait {
        Decision::ActivelyWaitForEnq
    } else {
        Decision::GoIdle
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(sender_priority: bool, receiver_priority: bool) -> PriorityConfig {
        PriorityConfig { sender_priority, receiver_priority }
    }

    #[test]
    fn test_receiver_waits_when_sender_has_priority() {
        assert_eq!(decide(flags(true, false), Role::Receiver), Decision::ActivelyWaitForEnq);
    }

    #[test]
    fn test_receiver_idles_by_default() {
        assert_eq!(decide(flags(false, false), Role::Receiver), Decision::GoIdle);
        assert_eq!(decide(PriorityConfig::default(), Role::Receiver), Decision::GoIdle);
    }

    #[test]
    fn test_receiver_idles_with_symmetric_or_receiver_priority() {
        assert_eq!(decide(flags(true, true), Role::Receiver), Decision::GoIdle);
        assert_eq!(decide(flags(false, true), Role::Receiver), Decision::GoIdle);
    }

    #[test]
    fn test_sender_idles_only_with_exclusive_receiver_priority() {
        assert_eq!(decide(flags(false, true), Role::Sender), Decision::GoIdle);
        assert_eq!(decide(flags(false, false), Role::Sender), Decision::ActivelyWaitForEnq);
        assert_eq!(decide(flags(true, false), Role::Sender), Decision::ActivelyWaitForEnq);
        assert_eq!(decide(flags(true, true), Role::Sender), Decision::ActivelyWaitForEnq);
    }
}
