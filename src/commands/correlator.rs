//! Command/response correlation.
//!
//! The reader runs a half-duplex command protocol: one command is in flight
//! at a time and the next is sent only after the previous one resolved.
//! The pending slot is resolved exactly once, by whichever of response,
//! timeout or disconnect gets there first; the others find the slot empty
//! and do nothing.
//!
//! Responses carry only the opcode. The reader answers in command order, so
//! a command that timed out still owes a reply that arrives ahead of any
//! reply to later commands. Owed opcodes are queued and the next response
//! with that opcode is discarded, even if a new command with the same
//! opcode is pending.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::protocol::{Command, CorrelationToken, Opcode, Response};
use crate::transport::SharedTransport;

/// Default command timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);

/// Most replies remembered as owed by timed-out commands.
const MAX_OWED: usize = 8;

struct Pending {
    token: CorrelationToken,
    opcode: u8,
    resolve: oneshot::Sender<Result<Response>>,
    /// An owed reply with this opcode was discarded while waiting.
    absorbed_stale: bool,
}

#[derive(Default)]
struct Slot {
    pending: Option<Pending>,
    open: bool,
    /// Opcodes of timed-out commands whose replies have not arrived, oldest
    /// first.
    owed: VecDeque<u8>,
}

impl Slot {
    /// Consumes the reply owed for `opcode`, if any.
    ///
    /// Owed entries ahead of it were skipped by the reader and are dropped.
    fn take_owed(&mut self, opcode: u8) -> bool {
        while let Some(owed) = self.owed.pop_front() {
            if owed == opcode {
                return true;
            }
        }
        false
    }
}

/// Serializes commands to one device and matches their responses.
pub struct Correlator {
    transport: SharedTransport,
    timeout: Duration,
    /// Held for the whole life of a command; tokio's mutex queues waiters
    /// in FIFO order.
    line: tokio::sync::Mutex<()>,
    slot: Mutex<Slot>,
    next_token: AtomicU64,
}

impl std::fmt::Debug for Correlator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Correlator")
            .field("timeout", &self.timeout)
            .field("pending", &self.pending())
            .finish_non_exhaustive()
    }
}

impl Correlator {
    /// Creates a closed correlator; commands fail until [`open`](Self::open).
    #[must_use]
    pub fn new(transport: SharedTransport, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            line: tokio::sync::Mutex::new(()),
            slot: Mutex::new(Slot::default()),
            next_token: AtomicU64::new(1),
        }
    }

    fn slot(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a fresh correlation token.
    pub fn next_token(&self) -> CorrelationToken {
        CorrelationToken(self.next_token.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the default command timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Returns the token of the outstanding command.
    #[must_use]
    pub fn pending(&self) -> Option<CorrelationToken> {
        self.slot().pending.as_ref().map(|p| p.token)
    }

    /// Accepts commands; called when the link comes up.
    pub fn open(&self) {
        let mut slot = self.slot();
        slot.open = true;
        slot.owed.clear();
    }

    /// Rejects further commands and fails the outstanding one with
    /// [`Error::Disconnected`].
    pub fn close(&self) {
        let pending = {
            let mut slot = self.slot();
            slot.open = false;
            slot.owed.clear();
            slot.pending.take()
        };
        if let Some(pending) = pending {
            tracing::debug!(
                "failing pending command 0x{:02X} ({:?}): disconnected",
                pending.opcode,
                pending.token
            );
            let _ = pending.resolve.send(Err(Error::Disconnected));
        }
    }

    /// Issues a command with the default timeout.
    pub async fn issue(&self, command: Command) -> Result<Response> {
        self.issue_with_timeout(command, self.timeout).await
    }

    /// Issues a command and waits for its response.
    ///
    /// Waits behind any command already in flight.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if the link is down
    /// - `Timeout` if no response arrives in time
    /// - `Disconnected` if the link drops while waiting
    /// - the transport's error if sending fails
    pub async fn issue_with_timeout(&self, command: Command, timeout: Duration) -> Result<Response> {
        let _line = self.line.lock().await;

        let token = command.token;
        let (resolve, mut response) = oneshot::channel();
        {
            let mut slot = self.slot();
            if !slot.open {
                return Err(Error::NotConnected);
            }
            slot.pending = Some(Pending {
                token,
                opcode: command.opcode as u8,
                resolve,
                absorbed_stale: false,
            });
        }

        tracing::debug!("issuing {:?} ({:?})", command.opcode, token);
        let sent = {
            let mut transport = self.transport.lock().await;
            transport.send(command.encode()).await
        };
        if let Err(e) = sent {
            if self.slot().pending.take_if(|p| p.token == token).is_some() {
                tracing::debug!("{:?} ({:?}) not sent: {}", command.opcode, token, e);
            }
            return Err(e);
        }

        match tokio::time::timeout(timeout, &mut response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::ChannelClosed),
            Err(_) => {
                if self.expire(token) {
                    tracing::debug!("{:?} ({:?}) timed out", command.opcode, token);
                    return Err(Error::timeout(timeout));
                }
                // Resolved between the timer firing and the slot lock.
                response.try_recv().unwrap_or(Err(Error::ChannelClosed))
            }
        }
    }

    /// Clears the slot if it still holds `token` and records its reply as
    /// owed.
    ///
    /// A command that already absorbed a stale reply owes nothing: its own
    /// reply may have been the one discarded, and marking it again would
    /// let one lost reply shadow every later command with that opcode.
    fn expire(&self, token: CorrelationToken) -> bool {
        let mut slot = self.slot();
        let Some(pending) = slot.pending.take_if(|p| p.token == token) else {
            return false;
        };
        if !pending.absorbed_stale {
            if slot.owed.len() == MAX_OWED {
                slot.owed.pop_front();
            }
            slot.owed.push_back(pending.opcode);
        }
        true
    }

    /// Delivers a response to the outstanding command.
    ///
    /// Returns false if the response was discarded: it is the late reply to
    /// a timed-out command, nothing is pending, or it answers another
    /// opcode.
    pub fn resolve(&self, response: Response) -> bool {
        let mut slot = self.slot();
        if slot.take_owed(response.opcode) {
            if let Some(pending) = slot
                .pending
                .as_mut()
                .filter(|p| p.opcode == response.opcode)
            {
                pending.absorbed_stale = true;
            }
            tracing::debug!(
                "discarding late response to 0x{:02X} after timeout",
                response.opcode
            );
            return false;
        }

        let pending = slot.pending.take();
        match pending {
            Some(pending) if pending.opcode == response.opcode => {
                drop(slot);
                tracing::debug!(
                    "response to 0x{:02X} ({:?}), succeeded={}",
                    response.opcode,
                    pending.token,
                    response.succeeded
                );
                let _ = pending.resolve.send(Ok(response));
                true
            }
            Some(pending) => {
                tracing::debug!(
                    "discarding response to 0x{:02X} while 0x{:02X} is pending",
                    response.opcode,
                    pending.opcode
                );
                slot.pending = Some(pending);
                false
            }
            None => {
                tracing::debug!(
                    "discarding response to 0x{:02X}: nothing pending",
                    response.opcode
                );
                false
            }
        }
    }

    /// Builds and issues a command in one step.
    pub async fn call(&self, opcode: Opcode, params: Bytes) -> Result<Response> {
        let command = Command::new(self.next_token(), opcode, params);
        self.issue(command).await
    }
}
