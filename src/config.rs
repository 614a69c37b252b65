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

use std::time::Duration;
use crate::arbiter::PriorityConfig;
use crate::error::LinkError;
use crate::protocol::*;

/// Timing, retry and priority settings for one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    pub priority: PriorityConfig,
    /// Attempts to confirm the line per frame
    pub line_tries: u32,
    /// Attempts to deliver one frame
    pub send_tries: u32,
    pub confirm_timeout: Duration,
    pub enq_wait_timeout: Duration,
    pub packet_timeout: Duration,
    pub idle_poll: Duration,
    /// Delay in milliseconds between frame bytes, 0 writes the frame at once
    pub byte_delay: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            priority: PriorityConfig::default(),
            line_tries: LINE_TRIES,
            send_tries: SEND_TRIES,
            confirm_timeout: CONFIRM_TIMEOUT,
            enq_wait_timeout: ENQ_WAIT_TIMEOUT,
            packet_timeout: PACKET_TIMEOUT,
            idle_poll: IDLE_POLL,
            byte_delay: 0,
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<(), LinkError> {
        if self.line_tries == 0 {
            return Err(LinkError::Config("line tries must be at least 1".to_string()));
        }
        if self.send_tries == 0 {
            return Err(LinkError::Config("send tries must be at least 1".to_string()));
        }

        let timeouts = [
            ("confirm", self.confirm_timeout),
            ("ENQ wait", self.enq_wait_timeout),
            ("packet", self.packet_timeout),
            ("idle poll", self.idle_poll),
        ];
        for (name, timeout) in timeouts {
            if timeout < Duration::from_millis(1) {
                return Err(LinkError::Config(format!("{} timeout must be at least 1 ms", name)));
            }
        }

        if self.idle_poll >= self.packet_timeout {
            return Err(LinkError::Config(format!(
                "idle poll ({:?}) must be shorter than the packet timeout ({:?})",
                self.idle_poll, self.packet_timeout
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = LinkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.line_tries, 1);
        assert_eq!(config.send_tries, 1);
        assert_eq!(config.packet_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_zero_tries_rejected() {
        let config = LinkConfig { send_tries: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(LinkError::Config(_))));

        let config = LinkConfig { line_tries: 0, ..Default::default() };
        assert!(matches!(config.validate(), Err(LinkError::Config(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = LinkConfig { confirm_timeout: Duration::ZERO, ..Default::default() };
        assert!(matches!(config.validate(), Err(LinkError::Config(_))));
    }

    #[test]
    fn test_idle_poll_must_be_shorter_than_packet_timeout() {
        let config = LinkConfig {
            idle_poll: Duration::from_secs(3),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(LinkError::Config(_))));
    }
}
