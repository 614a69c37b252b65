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

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use log::{debug, info, warn};
use thiserror::Error;
use crate::arbiter::{self, Decision, Role};
use crate::codec::Frame;
use crate::config::LinkConfig;
use crate::protocol::*;
use crate::serial::{is_timeout, lock_line, Line, SerialPort};
use crate::session::{SessionEvent, SessionState, TransferReport};

// ============================================================================
// Error Types
// ============================================================================

/// How one frame's exchange ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Acked,
    Lost,
}

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("line not confirmed after {0} attempt(s)")]
    LineNotConfirmed(u32),

    #[error("exchange complete")]
    ExchangeComplete(Delivery),
}

// ============================================================================
// States
// ============================================================================

pub struct ConfirmLine;
pub struct SendPacket;
pub struct PostSendWait;

// ============================================================================
// FSM Structure
// ============================================================================

/// Drives the exchange for a single frame while the caller holds the line.
pub struct SenderFsm<State> {
    state: PhantomData<State>,
    shared: Arc<SessionState>,
    config: LinkConfig,
    frame: Frame,
    line_attempts: u32,
    send_attempts: u32,
    delivery: Option<Delivery>,
}

// ============================================================================
// Trait
// ============================================================================

pub trait SenderState: Send {
    fn step(self: Box<Self>, port: &mut dyn SerialPort) -> Result<Box<dyn SenderState>, SenderError>;
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> SenderFsm<S> {
    fn transition<T>(self) -> Box<SenderFsm<T>> {
        Box::new(SenderFsm {
            state: PhantomData,
            shared: self.shared,
            config: self.config,
            frame: self.frame,
            line_attempts: self.line_attempts,
            send_attempts: self.send_attempts,
            delivery: self.delivery,
        })
    }

    fn io_error(&self, e: std::io::Error) -> SenderError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        SenderError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl SenderState for SenderFsm<ConfirmLine> {
    fn step(self: Box<Self>, port: &mut dyn SerialPort) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        port.write_all(&[ENQ]).map_err(|e| fsm.io_error(e))?;
        debug!("Sent: ENQ");

        match port.read_byte(fsm.config.confirm_timeout) {
            Ok(ACK) => {
                debug!("Received: ACK, line confirmed");
                let next = fsm.transition::<SendPacket>();
                return Ok(next as Box<dyn SenderState>);
            }
            Ok(byte) => debug!("Expected ACK, got {}", byte_name(byte)),
            Err(e) if is_timeout(&e) => debug!("No answer to ENQ"),
            Err(e) => return Err(fsm.io_error(e)),
        }

        fsm.line_attempts += 1;
        if fsm.line_attempts >= fsm.config.line_tries {
            warn!("Exceeded confirm line max tries ({})", fsm.config.line_tries);
            let next = fsm.transition::<PostSendWait>();
            Ok(next as Box<dyn SenderState>)
        } else {
            Ok(Box::new(fsm) as Box<dyn SenderState>)
        }
    }
}

impl SenderState for SenderFsm<SendPacket> {
    fn step(self: Box<Self>, port: &mut dyn SerialPort) -> Result<Box<dyn SenderState>, SenderError> {
        let mut fsm = *self;
        fsm.write_frame(port)?;
        debug!("Sent: packet 0x{:04X}", fsm.frame.checksum());

        let acked = match port.read_byte(fsm.config.packet_timeout) {
            Ok(ACK) => true,
            Ok(byte) => {
                debug!("Expected ACK, got {}", byte_name(byte));
                false
            }
            Err(e) if is_timeout(&e) => {
                debug!("No ACK for packet");
                false
            }
            Err(e) => return Err(fsm.io_error(e)),
        };

        if acked {
            debug!("Received: ACK");
            fsm.shared.update_stats(|stats| stats.acks_received += 1);
            fsm.delivery = Some(Delivery::Acked);
            let next = fsm.transition::<PostSendWait>();
            return Ok(next as Box<dyn SenderState>);
        }

        fsm.shared.update_stats(|stats| stats.sent += 1);
        fsm.send_attempts += 1;
        if fsm.send_attempts >= fsm.config.send_tries {
            warn!(
                "Packet 0x{:04X} lost after {} attempt(s)",
                fsm.frame.checksum(),
                fsm.send_attempts
            );
            fsm.shared.update_stats(|stats| stats.lost += 1);
            fsm.delivery = Some(Delivery::Lost);
            let next = fsm.transition::<PostSendWait>();
            Ok(next as Box<dyn SenderState>)
        } else {
            debug!("Resending packet");
            Ok(Box::new(fsm) as Box<dyn SenderState>)
        }
    }
}

impl SenderFsm<SendPacket> {
    fn write_frame(&self, port: &mut dyn SerialPort) -> Result<(), SenderError> {
        let bytes = self.frame.as_bytes();
        if self.config.byte_delay == 0 {
            return port.write_all(bytes).map_err(|e| self.io_error(e));
        }

        // Byte by byte so slow receivers keep up
        for &byte in bytes {
            port.write_all(&[byte]).map_err(|e| self.io_error(e))?;
            std::thread::sleep(Duration::from_millis(self.config.byte_delay as u64));
        }
        Ok(())
    }
}

impl SenderState for SenderFsm<PostSendWait> {
    fn step(self: Box<Self>, port: &mut dyn SerialPort) -> Result<Box<dyn SenderState>, SenderError> {
        let fsm = *self;

        if arbiter::decide(fsm.config.priority, Role::Sender) == Decision::ActivelyWaitForEnq {
            match port.read_byte(fsm.config.enq_wait_timeout) {
                Ok(ENQ) => {
                    debug!("Got an ENQ from the wait state");
                    fsm.shared.set_pending_enq();
                }
                Ok(byte) => debug!("Wait state, expected ENQ, got {}", byte_name(byte)),
                Err(e) if is_timeout(&e) => debug!("Timed out from wait state"),
                Err(e) => return Err(fsm.io_error(e)),
            }
        }

        match fsm.delivery {
            Some(delivery) => Err(SenderError::ExchangeComplete(delivery)),
            None => Err(SenderError::LineNotConfirmed(fsm.line_attempts)),
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl SenderFsm<ConfirmLine> {
    pub fn new(shared: Arc<SessionState>, config: LinkConfig, frame: Frame) -> Box<dyn SenderState> {
        Box::new(SenderFsm {
            state: PhantomData::<ConfirmLine>,
            shared,
            config,
            frame,
            line_attempts: 0,
            send_attempts: 0,
            delivery: None,
        })
    }
}

/// Step one frame's exchange to completion.
pub fn drive(mut state: Box<dyn SenderState>, port: &mut dyn SerialPort) -> Result<Delivery, SenderError> {
    loop {
        match state.step(port) {
            Ok(next) => state = next,
            Err(SenderError::ExchangeComplete(delivery)) => return Ok(delivery),
            Err(e) => return Err(e),
        }
    }
}

/// Send a frame queue in order. Each frame is one exchange under the line
/// lock. Lost frames are skipped; a line that cannot be confirmed abandons the
/// rest of the queue.
pub fn run_transfer(line: &Line, shared: &Arc<SessionState>, config: &LinkConfig, frames: Vec<Frame>) -> TransferReport {
    let total = frames.len();
    let mut report = TransferReport { frames: total, ..Default::default() };
    info!("Sending {} packet(s)", total);

    for (index, frame) in frames.into_iter().enumerate() {
        if !shared.is_connected() {
            warn!("Session disconnected, abandoning transfer");
            report.abandoned = true;
            break;
        }

        shared.begin_transmit();
        let result = {
            let mut port = lock_line(line);
            drive(SenderFsm::<ConfirmLine>::new(Arc::clone(shared), *config, frame), &mut **port)
        };

        match result {
            Ok(Delivery::Acked) => {
                report.acked += 1;
                shared.emit(SessionEvent::Progress { acked: report.acked, total });
            }
            Ok(Delivery::Lost) => report.lost += 1,
            Err(e) => {
                warn!("Abandoning transfer at packet {} of {}: {}", index + 1, total, e);
                report.abandoned = true;
                break;
            }
        }
        shared.update_stats(|stats| stats.sent += 1);

        if shared.has_pending_enq() {
            debug!("Peer wants the line, waiting for its receive cycle");
            shared.receive_done.reset();
            shared.end_transmit();
            shared.receive_done.wait(config.packet_timeout);
        }
    }

    shared.end_transmit();
    info!(
        "Transfer finished: {} of {} packet(s) acknowledged, {} lost{}",
        report.acked,
        total,
        report.lost,
        if report.abandoned { ", abandoned" } else { "" }
    );
    report
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use crate::arbiter::PriorityConfig;
    use crate::codec::packetize;
    use crate::serial::{new_line, MockSerialPort};

    fn session() -> (Arc<SessionState>, Receiver<SessionEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let shared = Arc::new(SessionState::new(tx));
        shared.set_connected(true);
        (shared, rx)
    }

    fn hello_frame() -> Frame {
        packetize(b"HELLO").remove(0)
    }

    fn writes_for(frames: &[&Frame]) -> Vec<u8> {
        let mut writes = Vec::new();
        for frame in frames {
            writes.extend_from_slice(frame.as_bytes());
        }
        writes
    }

    #[test]
    fn test_single_frame_exchange() {
        let (shared, _events) = session();
        let frame = hello_frame();

        // ACK for ENQ, ACK for packet, silence in the wait state
        let responses = vec![Some(ACK), Some(ACK), None];
        let mut expected_writes = vec![ENQ];
        expected_writes.extend(writes_for(&[&frame]));

        let mut port = MockSerialPort::new(responses, expected_writes);
        let fsm = SenderFsm::<ConfirmLine>::new(Arc::clone(&shared), LinkConfig::default(), frame);

        assert_eq!(drive(fsm, &mut port).unwrap(), Delivery::Acked);
        let stats = shared.statistics();
        assert_eq!(stats.acks_received, 1);
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.lost, 0);
    }

    #[test]
    fn test_confirm_line_budget_exhausted() {
        let (shared, _events) = session();

        let responses = vec![None, None];
        let expected_writes = vec![ENQ];

        let mut port = MockSerialPort::new(responses, expected_writes);
        let fsm = SenderFsm::<ConfirmLine>::new(Arc::clone(&shared), LinkConfig::default(), hello_frame());

        match drive(fsm, &mut port) {
            Err(SenderError::LineNotConfirmed(1)) => {}
            other => panic!("expected LineNotConfirmed, got {:?}", other),
        }
        assert_eq!(shared.statistics(), Default::default());
    }

    #[test]
    fn test_confirm_line_retry() {
        let (shared, _events) = session();
        let frame = hello_frame();
        let config = LinkConfig { line_tries: 2, ..Default::default() };

        let responses = vec![None, Some(ACK), Some(ACK), None];
        let mut expected_writes = vec![ENQ, ENQ];
        expected_writes.extend(writes_for(&[&frame]));

        let mut port = MockSerialPort::new(responses, expected_writes);
        let fsm = SenderFsm::<ConfirmLine>::new(Arc::clone(&shared), config, frame);

        assert_eq!(drive(fsm, &mut port).unwrap(), Delivery::Acked);
    }

    #[test]
    fn test_wrong_answer_counts_as_failed_confirm() {
        let (shared, _events) = session();

        let responses = vec![Some(ENQ), None];
        let expected_writes = vec![ENQ];

        let mut port = MockSerialPort::new(responses, expected_writes);
        let fsm = SenderFsm::<ConfirmLine>::new(Arc::clone(&shared), LinkConfig::default(), hello_frame());

        assert!(matches!(drive(fsm, &mut port), Err(SenderError::LineNotConfirmed(1))));
    }

    #[test]
    fn test_packet_lost_after_retries() {
        let (shared, _events) = session();
        let frame = hello_frame();
        let config = LinkConfig { send_tries: 2, ..Default::default() };

        let responses = vec![Some(ACK), None, Some(b'?'), None];
        let mut expected_writes = vec![ENQ];
        expected_writes.extend(writes_for(&[&frame, &frame]));

        let mut port = MockSerialPort::new(responses, expected_writes);
        let fsm = SenderFsm::<ConfirmLine>::new(Arc::clone(&shared), config, frame);

        assert_eq!(drive(fsm, &mut port).unwrap(), Delivery::Lost);
        let stats = shared.statistics();
        assert_eq!(stats.sent, 2);
        assert_eq!(stats.lost, 1);
        assert_eq!(stats.acks_received, 0);
    }

    #[test]
    fn test_packet_resent_then_acked() {
        let (shared, _events) = session();
        let frame = hello_frame();
        let config = LinkConfig { send_tries: 2, ..Default::default() };

        let responses = vec![Some(ACK), None, Some(ACK), None];
        let mut expected_writes = vec![ENQ];
        expected_writes.extend(writes_for(&[&frame, &frame]));

        let mut port = MockSerialPort::new(responses, expected_writes);
        let fsm = SenderFsm::<ConfirmLine>::new(Arc::clone(&shared), config, frame);

        assert_eq!(drive(fsm, &mut port).unwrap(), Delivery::Acked);
        let stats = shared.statistics();
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.lost, 0);
        assert_eq!(stats.acks_received, 1);
    }

    #[test]
    fn test_wait_state_catches_peer_enq() {
        let (shared, _events) = session();
        let frame = hello_frame();

        let responses = vec![Some(ACK), Some(ACK), Some(ENQ)];
        let mut expected_writes = vec![ENQ];
        expected_writes.extend(writes_for(&[&frame]));

        let mut port = MockSerialPort::new(responses, expected_writes);
        let fsm = SenderFsm::<ConfirmLine>::new(Arc::clone(&shared), LinkConfig::default(), frame);

        assert_eq!(drive(fsm, &mut port).unwrap(), Delivery::Acked);
        assert!(shared.has_pending_enq());
    }

    #[test]
    fn test_receiver_priority_skips_wait_state() {
        let (shared, _events) = session();
        let frame = hello_frame();
        let config = LinkConfig {
            priority: PriorityConfig { sender_priority: false, receiver_priority: true },
            ..Default::default()
        };

        let responses = vec![Some(ACK), Some(ACK)];
        let mut expected_writes = vec![ENQ];
        expected_writes.extend(writes_for(&[&frame]));

        let mut port = MockSerialPort::new(responses, expected_writes);
        let fsm = SenderFsm::<ConfirmLine>::new(Arc::clone(&shared), config, frame);

        assert_eq!(drive(fsm, &mut port).unwrap(), Delivery::Acked);
        assert!(!shared.has_pending_enq());
    }

    #[test]
    fn test_run_transfer_in_order() {
        let (shared, events) = session();
        let payload: Vec<u8> = (0..1500).map(|i| b'0' + (i % 10) as u8).collect();
        let frames = packetize(&payload);
        assert_eq!(frames.len(), 2);

        let responses = vec![Some(ACK), Some(ACK), None, Some(ACK), Some(ACK), None];
        let mut expected_writes = vec![ENQ];
        expected_writes.extend(writes_for(&[&frames[0]]));
        expected_writes.push(ENQ);
        expected_writes.extend(writes_for(&[&frames[1]]));

        let line = new_line(Box::new(MockSerialPort::new(responses, expected_writes)));
        let report = run_transfer(&line, &shared, &LinkConfig::default(), frames);

        assert_eq!(report, TransferReport { frames: 2, acked: 2, lost: 0, abandoned: false });
        assert!(!shared.is_transmitting());

        let stats = shared.statistics();
        assert_eq!(stats.acks_received, 2);
        assert_eq!(stats.sent, 2);

        let progress: Vec<_> = events
            .try_iter()
            .filter(|e| matches!(e, SessionEvent::Progress { .. }))
            .collect();
        assert_eq!(
            progress,
            vec![
                SessionEvent::Progress { acked: 1, total: 2 },
                SessionEvent::Progress { acked: 2, total: 2 },
            ]
        );
    }

    #[test]
    fn test_run_transfer_lost_frame_moves_on() {
        let (shared, _events) = session();
        let frames = packetize(&vec![b'z'; 1030]);

        // first frame never acknowledged, second goes through
        let responses = vec![Some(ACK), None, None, Some(ACK), Some(ACK), None];
        let mut expected_writes = vec![ENQ];
        expected_writes.extend(writes_for(&[&frames[0]]));
        expected_writes.push(ENQ);
        expected_writes.extend(writes_for(&[&frames[1]]));

        let line = new_line(Box::new(MockSerialPort::new(responses, expected_writes)));
        let report = run_transfer(&line, &shared, &LinkConfig::default(), frames);

        assert_eq!(report, TransferReport { frames: 2, acked: 1, lost: 1, abandoned: false });
        assert_eq!(shared.statistics().lost, 1);
    }

    #[test]
    fn test_run_transfer_abandons_when_line_unavailable() {
        let (shared, _events) = session();
        let frames = packetize(&vec![b'z'; 3000]);

        let responses = vec![None, None];
        let expected_writes = vec![ENQ];

        let line = new_line(Box::new(MockSerialPort::new(responses, expected_writes)));
        let report = run_transfer(&line, &shared, &LinkConfig::default(), frames);

        assert_eq!(report, TransferReport { frames: 3, acked: 0, lost: 0, abandoned: true });
        assert!(!shared.is_transmitting());
    }

    #[test]
    fn test_run_transfer_needs_connected_session() {
        let (shared, _events) = session();
        shared.set_connected(false);

        let line = new_line(Box::new(MockSerialPort::new(vec![], vec![])));
        let report = run_transfer(&line, &shared, &LinkConfig::default(), vec![hello_frame()]);

        assert!(report.abandoned);
        assert_eq!(report.acked, 0);
    }
}
