//! Connection lifecycle state machine.
//!
//! [`SessionMachine`] is the synchronous core behind
//! [`ConnectionManager`](super::ConnectionManager): it decides when to connect,
//! when to schedule a retry and when to give up, without touching the network
//! or any timer. The async driver feeds it transport events and acts on the
//! answers.
//!
//! ```text
//!   Idle ──initiate──▶ Connecting ──open──▶ Connected
//!                         ▲    │                │
//!               timer fires    └──fail──┐  close/error
//!                         │             ▼       │
//!                     Reconnecting ◀────────────┘
//!                         │
//!            attempts exhausted / teardown
//!                         ▼
//!                      Closed ──initiate──▶ Connecting
//! ```
//!
//! Every session started by `initiate` gets a fresh epoch. Transport events
//! carry the epoch they were produced under, so events from a session that was
//! torn down or restarted are recognized as stale and ignored.

use std::time::{Duration, Instant};

use backoff::backoff::Backoff as _;

use super::config::{ReconnectBackoff, ReconnectConfig};

/// Observable connection state.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never initiated
    Idle,
    /// Open requested, waiting for the transport
    Connecting {
        /// Retries made so far in this run of failures (0 for the first open)
        attempt: u32,
    },
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
        /// Identity of the live [`ConnectionHandle`](super::ConnectionHandle)
        handle_id: u64,
    },
    /// Connection lost, retry timer armed
    Reconnecting {
        /// The retry number that fires when the timer elapses (1-based)
        attempt: u32,
        /// Delay until the retry
        delay: Duration,
    },
    /// No connection and nothing scheduled until the next `initiate`
    Closed {
        /// Why the session stopped
        reason: CloseReason,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }

    /// Check if a connection exists or is being established.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Connecting { .. } | Self::Connected { .. })
    }

    /// Check if the session stopped and will not retry on its own.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed { .. })
    }
}

/// Why a session reached [`ConnectionState::Closed`].
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller tore the session down
    Manual,
    /// Every allowed retry failed
    Exhausted {
        /// Number of retries that were made
        attempts: u32,
    },
}

/// Outcome of [`SessionMachine::initiate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Initiate {
    /// A connection exists or is in flight; nothing to do.
    Active,
    /// A new session must be driven under `epoch`, starting with `handle_id`.
    Start { epoch: u64, handle_id: u64 },
}

/// Outcome of [`SessionMachine::closed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AfterClose {
    /// Wait `delay` and then call [`SessionMachine::retry_due`].
    Retry { attempt: u32, delay: Duration },
    /// Give up; the session is terminal.
    Exhausted { attempts: u32 },
    /// The event belongs to a session that no longer exists.
    Stale,
}

#[derive(Debug)]
pub(crate) struct SessionMachine {
    state: ConnectionState,
    backoff: ReconnectBackoff,
    manual_close: bool,
    epoch: u64,
    last_handle_id: u64,
}

impl SessionMachine {
    pub(crate) fn new(config: ReconnectConfig) -> Self {
        Self {
            state: ConnectionState::Idle,
            backoff: config.into(),
            manual_close: false,
            epoch: 0,
            last_handle_id: 0,
        }
    }

    pub(crate) const fn state(&self) -> ConnectionState {
        self.state
    }

    pub(crate) const fn attempt(&self) -> u32 {
        self.backoff.attempt()
    }

    pub(crate) const fn is_manual_close(&self) -> bool {
        self.manual_close
    }

    pub(crate) const fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch && !self.manual_close
    }

    fn next_handle_id(&mut self) -> u64 {
        self.last_handle_id = self.last_handle_id.wrapping_add(1);
        self.last_handle_id
    }

    /// Start a session unless one is connecting or connected.
    ///
    /// Starting from `Reconnecting` abandons the pending retry: the new epoch
    /// makes the old timer stale.
    pub(crate) fn initiate(&mut self) -> Initiate {
        if self.state.is_active() {
            return Initiate::Active;
        }

        self.manual_close = false;
        self.backoff.reset();
        self.epoch = self.epoch.wrapping_add(1);
        self.state = ConnectionState::Connecting { attempt: 0 };

        Initiate::Start {
            epoch: self.epoch,
            handle_id: self.next_handle_id(),
        }
    }

    /// The transport opened. Returns `false` if the event is stale.
    pub(crate) fn opened(&mut self, epoch: u64) -> bool {
        if !self.is_current(epoch) || !matches!(self.state, ConnectionState::Connecting { .. }) {
            return false;
        }

        self.backoff.reset();
        self.state = ConnectionState::Connected {
            since: Instant::now(),
            handle_id: self.last_handle_id,
        };
        true
    }

    /// The transport closed or failed to open.
    ///
    /// Failed opens and drops after a successful open take the same path.
    pub(crate) fn closed(&mut self, epoch: u64) -> AfterClose {
        if !self.is_current(epoch) || !self.state.is_active() {
            return AfterClose::Stale;
        }

        match self.backoff.next_backoff() {
            Some(delay) => {
                let attempt = self.backoff.attempt();
                self.state = ConnectionState::Reconnecting { attempt, delay };
                AfterClose::Retry { attempt, delay }
            }
            None => {
                let attempts = self.backoff.attempt();
                self.state = ConnectionState::Closed {
                    reason: CloseReason::Exhausted { attempts },
                };
                AfterClose::Exhausted { attempts }
            }
        }
    }

    /// The retry timer fired. Returns the id of the handle for the new
    /// attempt, or `None` if the session was torn down or replaced meanwhile.
    pub(crate) fn retry_due(&mut self, epoch: u64) -> Option<u64> {
        if !self.is_current(epoch) || !matches!(self.state, ConnectionState::Reconnecting { .. })
        {
            return None;
        }

        self.state = ConnectionState::Connecting {
            attempt: self.backoff.attempt(),
        };
        Some(self.next_handle_id())
    }

    /// Stop the session. Every event of the current epoch becomes stale.
    pub(crate) fn teardown(&mut self) {
        self.manual_close = true;
        self.backoff.reset();
        self.epoch = self.epoch.wrapping_add(1);
        self.state = ConnectionState::Closed {
            reason: CloseReason::Manual,
        };
    }
}
