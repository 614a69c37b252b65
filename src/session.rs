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

//! Session state shared by both engines, and the control surface the host
//! drives.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info, warn};
use crate::codec;
use crate::config::LinkConfig;
use crate::error::LinkError;
use crate::receiver::{self, ReceiverError};
use crate::sender;
use crate::serial::{new_line, Line, SerialPort};
use crate::staging;
use crate::stats::{DuplicateGuard, Statistics};

// ============================================================================
// Signals
// ============================================================================

/// Single-slot, auto-resetting signal. Setting an already set signal is a
/// no-op; a wait consumes it.
pub struct Signal {
    tx: Sender<()>,
    rx: Receiver<()>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::bounded(1);
        Signal { tx, rx }
    }

    pub fn set(&self) {
        let _ = self.tx.try_send(());
    }

    pub fn reset(&self) {
        while self.rx.try_recv().is_ok() {}
    }

    /// Returns false if the timeout elapsed first.
    pub fn wait(&self, timeout: Duration) -> bool {
        self.rx.recv_timeout(timeout).is_ok()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Events and reports
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    pub frames: usize,
    pub acked: usize,
    pub lost: usize,
    /// The line could not be confirmed or the session went away mid-transfer
    pub abandoned: bool,
}

/// Updates for the display layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    Fragment(Vec<u8>),
    Statistics(Statistics),
    Progress { acked: usize, total: usize },
    TransferFinished(TransferReport),
    ReceiverStopped(String),
}

// ============================================================================
// Shared state
// ============================================================================

pub struct SessionState {
    stats: Mutex<Statistics>,
    guard: Mutex<DuplicateGuard>,
    received: Mutex<Vec<u8>>,
    connected: AtomicBool,
    transmitting: AtomicBool,
    pending_enq: AtomicBool,
    /// Set when the receive engine finishes a cycle
    pub receive_done: Signal,
    /// Set when the transmit side gives the line back
    pub send_done: Signal,
    events: Sender<SessionEvent>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SessionState {
    pub fn new(events: Sender<SessionEvent>) -> Self {
        SessionState {
            stats: Mutex::new(Statistics::default()),
            guard: Mutex::new(DuplicateGuard::default()),
            received: Mutex::new(Vec::new()),
            connected: AtomicBool::new(false),
            transmitting: AtomicBool::new(false),
            pending_enq: AtomicBool::new(false),
            receive_done: Signal::new(),
            send_done: Signal::new(),
            events,
        }
    }

    pub fn emit(&self, event: SessionEvent) {
        // nobody listening is fine
        let _ = self.events.send(event);
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }

    // -- statistics ----------------------------------------------------------

    pub fn update_stats<F: FnOnce(&mut Statistics)>(&self, f: F) -> Statistics {
        let snapshot = {
            let mut stats = lock(&self.stats);
            f(&mut stats);
            *stats
        };
        self.emit(SessionEvent::Statistics(snapshot));
        snapshot
    }

    pub fn statistics(&self) -> Statistics {
        *lock(&self.stats)
    }

    pub fn clear_statistics(&self) {
        self.update_stats(|stats| *stats = Statistics::default());
    }

    // -- receive side --------------------------------------------------------

    /// Record a validated fragment unless its checksum matches the last
    /// accepted frame. Returns false for a duplicate.
    pub fn accept_fragment(&self, checksum: u16, fragment: Vec<u8>) -> bool {
        {
            let mut guard = lock(&self.guard);
            if guard.is_duplicate(checksum) {
                return false;
            }
            guard.accept(checksum);
        }

        lock(&self.received).extend_from_slice(&fragment);
        let stats = self.update_stats(|stats| stats.received += 1);
        debug!("Error rate now {}%", stats.bit_error_rate());
        self.emit(SessionEvent::Fragment(fragment));
        true
    }

    pub fn record_corrupted(&self) {
        let stats = self.update_stats(|stats| stats.corrupted += 1);
        debug!("Error rate now {}%", stats.bit_error_rate());
    }

    pub fn received(&self) -> Vec<u8> {
        lock(&self.received).clone()
    }

    pub fn clear_received(&self) {
        lock(&self.received).clear();
    }

    // -- line ownership ------------------------------------------------------

    pub fn begin_transmit(&self) {
        self.transmitting.store(true, Ordering::SeqCst);
    }

    pub fn end_transmit(&self) {
        self.transmitting.store(false, Ordering::SeqCst);
        self.send_done.set();
    }

    pub fn is_transmitting(&self) -> bool {
        self.transmitting.load(Ordering::SeqCst)
    }

    /// The transmit side caught the peer's ENQ; the receive engine owes an ACK.
    pub fn set_pending_enq(&self) {
        self.pending_enq.store(true, Ordering::SeqCst);
    }

    pub fn has_pending_enq(&self) -> bool {
        self.pending_enq.load(Ordering::SeqCst)
    }

    pub fn take_pending_enq(&self) -> bool {
        self.pending_enq.swap(false, Ordering::SeqCst)
    }
}

// ============================================================================
// Session
// ============================================================================

/// One link, one peer. Owns the line, the receive engine thread and at most
/// one transfer thread.
pub struct Session {
    shared: Arc<SessionState>,
    line: Line,
    config: LinkConfig,
    receiver: Option<JoinHandle<Result<(), ReceiverError>>>,
    transfer: Option<JoinHandle<TransferReport>>,
}

impl Session {
    pub fn new(port: Box<dyn SerialPort>, config: LinkConfig) -> Result<(Self, Receiver<SessionEvent>), LinkError> {
        config.validate()?;

        let (events_tx, events_rx) = crossbeam_channel::unbounded();
        let session = Session {
            shared: Arc::new(SessionState::new(events_tx)),
            line: new_line(port),
            config,
            receiver: None,
            transfer: None,
        };

        Ok((session, events_rx))
    }

    pub fn is_connected(&self) -> bool {
        self.shared.is_connected()
    }

    /// Start the receive engine. Does nothing if already connected.
    pub fn connect(&mut self) {
        if self.shared.is_connected() {
            return;
        }
        // an engine that died on a channel error is still waiting to be reaped
        self.join_engines();
        self.shared.set_connected(true);

        let line = Arc::clone(&self.line);
        let shared = Arc::clone(&self.shared);
        let config = self.config;
        self.receiver = Some(thread::spawn(move || receiver::run(&line, &shared, &config)));
        info!("Session connected");
    }

    /// Stop both engines between exchanges and wait for them.
    pub fn disconnect(&mut self) {
        if self.receiver.is_none() && self.transfer.is_none() {
            return;
        }
        self.shared.set_connected(false);
        // wake a receive engine parked on the transmit side
        self.shared.send_done.set();

        self.join_engines();
        info!("Session disconnected");
    }

    fn join_engines(&mut self) {
        if let Some(report) = self.wait_transfer() {
            debug!("Transfer ended on disconnect: {:?}", report);
        }

        if let Some(handle) = self.receiver.take() {
            match handle.join() {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Receive engine had stopped: {}", e),
                Err(_) => error!("Receive engine panicked"),
            }
        }
    }

    /// Stage `text`, frame it and send it on a dedicated transfer thread.
    /// Returns the number of frames queued.
    pub fn start_transfer(&mut self, text: &str) -> Result<usize, LinkError> {
        if !self.shared.is_connected() {
            return Err(LinkError::NotConnected);
        }
        if self.transfer.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return Err(LinkError::TransferInProgress);
        }
        // reap the previous transfer
        self.wait_transfer();

        let payload = staging::stage_text(text);
        let frames = codec::packetize(&payload);
        let count = frames.len();
        info!("Staged {} byte(s) into {} packet(s)", payload.len(), count);

        let line = Arc::clone(&self.line);
        let shared = Arc::clone(&self.shared);
        let config = self.config;
        self.transfer = Some(thread::spawn(move || {
            let report = sender::run_transfer(&line, &shared, &config, frames);
            shared.emit(SessionEvent::TransferFinished(report));
            report
        }));

        Ok(count)
    }

    /// Block until the current transfer, if any, finishes.
    pub fn wait_transfer(&mut self) -> Option<TransferReport> {
        let handle = self.transfer.take()?;
        match handle.join() {
            Ok(report) => Some(report),
            Err(_) => {
                error!("Transfer thread panicked");
                None
            }
        }
    }

    pub fn statistics(&self) -> Statistics {
        self.shared.statistics()
    }

    pub fn clear_statistics(&self) {
        self.shared.clear_statistics();
    }

    pub fn received_text(&self) -> String {
        String::from_utf8_lossy(&self.shared.received()).into_owned()
    }

    pub fn clear_received(&self) {
        self.shared.clear_received();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.disconnect();
    }
}

// ============================================================================
// Tests
// ============================================================================
