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
use log::{debug, error, info, trace, warn};
use thiserror::Error;
use crate::arbiter::{self, Decision, Role};
use crate::codec;
use crate::config::LinkConfig;
use crate::protocol::*;
use crate::serial::{is_timeout, lock_line, Line, SerialPort};
use crate::session::{SessionEvent, SessionState};

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ============================================================================
// States
// ============================================================================

pub struct Idle;
pub struct AwaitPacket;
pub struct WaitForEnq;

// ============================================================================
// FSM Structure
// ============================================================================

pub struct ReceiverFsm<State> {
    state: PhantomData<State>,
    shared: Arc<SessionState>,
    config: LinkConfig,
}

// ============================================================================
// Trait
// ============================================================================

pub trait ReceiverState: Send {
    fn step(self: Box<Self>, port: &mut dyn SerialPort) -> Result<Box<dyn ReceiverState>, ReceiverError>;

    /// True between exchanges, when the engine can give up the line.
    fn is_idle(&self) -> bool {
        false
    }
}

// ============================================================================
// Helper to transition states
// ============================================================================

impl<S> ReceiverFsm<S> {
    fn transition<T>(self) -> Box<ReceiverFsm<T>> {
        Box::new(ReceiverFsm {
            state: PhantomData,
            shared: self.shared,
            config: self.config,
        })
    }

    fn io_error(&self, e: std::io::Error) -> ReceiverError {
        let type_name = std::any::type_name::<S>();
        let state_name = type_name.split("::").last().unwrap_or(type_name);
        ReceiverError::Io(std::io::Error::new(
            e.kind(),
            format!("{} (in state: {})", e, state_name)
        ))
    }

    fn acknowledge(&self, port: &mut dyn SerialPort) -> Result<(), ReceiverError> {
        port.write_all(&[ACK]).map_err(|e| self.io_error(e))?;
        debug!("Sent: ACK");
        Ok(())
    }

    /// End of a receive cycle: wake a waiting transmitter and let the arbiter
    /// pick the next state.
    fn finish_cycle(self) -> Box<dyn ReceiverState> {
        self.shared.receive_done.set();
        match arbiter::decide(self.config.priority, Role::Receiver) {
            Decision::ActivelyWaitForEnq => {
                debug!("Going to wait state");
                self.transition::<WaitForEnq>() as Box<dyn ReceiverState>
            }
            Decision::GoIdle => {
                debug!("Going back to idle");
                self.transition::<Idle>() as Box<dyn ReceiverState>
            }
        }
    }
}

// ============================================================================
// State Implementations
// ============================================================================

impl ReceiverState for ReceiverFsm<Idle> {
    fn step(self: Box<Self>, port: &mut dyn SerialPort) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let fsm = *self;

        if fsm.shared.take_pending_enq() {
            debug!("ENQ was taken in the wait state");
            fsm.acknowledge(port)?;
            let next = fsm.transition::<AwaitPacket>();
            return Ok(next as Box<dyn ReceiverState>);
        }

        match port.read_byte(fsm.config.idle_poll) {
            Ok(ENQ) => {
                debug!("Received: ENQ");
                fsm.acknowledge(port)?;
                let next = fsm.transition::<AwaitPacket>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Ok(EOT) => {
                debug!("Received: EOT");
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
            Ok(byte) => {
                trace!("Idle, ignoring {}", byte_name(byte));
                Ok(Box::new(fsm) as Box<dyn ReceiverState>)
            }
            Err(e) if is_timeout(&e) => Ok(Box::new(fsm) as Box<dyn ReceiverState>),
            Err(e) => Err(fsm.io_error(e)),
        }
    }

    fn is_idle(&self) -> bool {
        true
    }
}

impl ReceiverState for ReceiverFsm<AwaitPacket> {
    fn step(self: Box<Self>, port: &mut dyn SerialPort) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let fsm = *self;

        match port.read_exact_timeout(FRAME_SIZE, fsm.config.packet_timeout) {
            Ok(raw) => fsm.dispose(&raw, port),
            Err(e) if is_timeout(&e) => {
                debug!("Timed out waiting for packet");
                port.discard_input().map_err(|e| fsm.io_error(e))?;
                Ok(fsm.finish_cycle())
            }
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

impl ReceiverFsm<AwaitPacket> {
    /// Accept, re-acknowledge or drop a complete frame. Corrupted frames are
    /// never acknowledged; the sender's own timeout drives the retry.
    fn dispose(self, raw: &[u8], port: &mut dyn SerialPort) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        match codec::validate_frame(raw) {
            Ok(fragment) => {
                let checksum = codec::frame_checksum(raw);
                let len = fragment.len();
                if self.shared.accept_fragment(checksum, fragment) {
                    debug!("Received: packet 0x{:04X} ({} bytes)", checksum, len);
                } else {
                    debug!("Received: duplicate packet 0x{:04X}", checksum);
                }
                self.acknowledge(port)?;
                Ok(self.finish_cycle())
            }
            Err(e) => {
                warn!("Dropping packet: {}", e);
                self.shared.record_corrupted();
                Ok(Box::new(self) as Box<dyn ReceiverState>)
            }
        }
    }
}

impl ReceiverState for ReceiverFsm<WaitForEnq> {
    fn step(self: Box<Self>, port: &mut dyn SerialPort) -> Result<Box<dyn ReceiverState>, ReceiverError> {
        let fsm = *self;

        match port.read_byte(fsm.config.enq_wait_timeout) {
            Ok(ENQ) => {
                debug!("Got an ENQ from the wait state");
                fsm.acknowledge(port)?;
                let next = fsm.transition::<AwaitPacket>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Ok(byte) => {
                debug!("Wait state, expected ENQ, got {}", byte_name(byte));
                let next = fsm.transition::<Idle>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Err(e) if is_timeout(&e) => {
                debug!("Timed out from wait state");
                let next = fsm.transition::<Idle>();
                Ok(next as Box<dyn ReceiverState>)
            }
            Err(e) => Err(fsm.io_error(e)),
        }
    }
}

// ============================================================================
// Constructor & Runner
// ============================================================================

impl ReceiverFsm<Idle> {
    pub fn new(shared: Arc<SessionState>, config: LinkConfig) -> Box<dyn ReceiverState> {
        Box::new(ReceiverFsm {
            state: PhantomData::<Idle>,
            shared,
            config,
        })
    }
}

/// Receive engine loop. Holds the line only while an exchange is under way
/// and stands aside while the transmit side owns it. Returns when the session
/// disconnects, or with the channel error that stopped it.
pub fn run(line: &Line, shared: &Arc<SessionState>, config: &LinkConfig) -> Result<(), ReceiverError> {
    info!("Receive engine listening");
    let mut state = ReceiverFsm::<Idle>::new(Arc::clone(shared), *config);

    while shared.is_connected() {
        if shared.is_transmitting() {
            shared.send_done.wait(config.packet_timeout);
            continue;
        }

        let mut port = lock_line(line);
        loop {
            state = match state.step(&mut **port) {
                Ok(next) => next,
                Err(e) => {
                    error!("Receive engine stopped: {}", e);
                    shared.set_connected(false);
                    shared.emit(SessionEvent::ReceiverStopped(e.to_string()));
                    return Err(e);
                }
            };
            if state.is_idle() {
                break;
            }
        }
    }

    info!("Receive engine stopped");
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
