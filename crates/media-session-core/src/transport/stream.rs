//! Per-stream lifecycle state machine
//!
//! Outbound send streams and inbound players share one lifecycle:
//! `Created -> Realized -> Started <-> Stopped -> Closed`. Every change goes
//! through [`StreamMachine::dispatch`]; callers react to the returned
//! [`StreamTransition`] instead of to driver callbacks.

use async_trait::async_trait;
use std::fmt;
use tracing::{debug, warn};

use crate::error::Result;

/// Lifecycle state of one stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    Created,
    Realized,
    Started,
    Stopped,
    Closed,
}

/// Command applied to a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamCommand {
    Realize,
    Start,
    Stop,
    Close,
}

impl StreamState {
    /// Target state of `command`, or `None` if it does not apply here
    pub fn next(self, command: StreamCommand) -> Option<StreamState> {
        use StreamCommand::*;
        use StreamState::*;
        match (self, command) {
            (Closed, _) => None,
            (_, Close) => Some(Closed),
            (Created, Realize) => Some(Realized),
            (Realized | Stopped, Start) => Some(Started),
            (Started, Stop) => Some(Stopped),
            _ => None,
        }
    }

    pub fn is_running(self) -> bool {
        self == StreamState::Started
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A completed state change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTransition {
    pub from: StreamState,
    pub to: StreamState,
}

/// Side effects behind each command, supplied by the transport or engine
#[async_trait]
pub trait StreamDriver: Send {
    async fn realize(&mut self) -> Result<()>;
    async fn start(&mut self) -> Result<()>;
    async fn stop(&mut self) -> Result<()>;
    /// Release everything; must not fail
    async fn close(&mut self);
}

/// A driver plus its current state
pub struct StreamMachine<D: ?Sized> {
    label: String,
    state: StreamState,
    driver: Box<D>,
}

impl<D: StreamDriver + ?Sized> StreamMachine<D> {
    pub fn new(label: impl Into<String>, driver: Box<D>) -> Self {
        Self { label: label.into(), state: StreamState::Created, driver }
    }

    pub fn state(&self) -> StreamState {
        self.state
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Apply one command.
    ///
    /// Returns `Ok(None)` when the command does not apply to the current
    /// state. A failing stop still leaves the stream `Stopped`: the caller
    /// must be able to release it afterwards.
    pub async fn dispatch(&mut self, command: StreamCommand) -> Result<Option<StreamTransition>> {
        let from = self.state;
        let Some(to) = from.next(command) else {
            debug!(stream = %self.label, state = %from, ?command, "command ignored");
            return Ok(None);
        };

        let outcome = match command {
            StreamCommand::Realize => self.driver.realize().await,
            StreamCommand::Start => self.driver.start().await,
            StreamCommand::Stop => self.driver.stop().await,
            StreamCommand::Close => {
                self.driver.close().await;
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {
                self.state = to;
                debug!(stream = %self.label, %from, %to, "stream transition");
                Ok(Some(StreamTransition { from, to }))
            }
            Err(e) if command == StreamCommand::Stop => {
                warn!(stream = %self.label, error = %e, "stop failed, forcing stopped state");
                self.state = to;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Realize if needed, then start
    pub async fn run(&mut self) -> Result<bool> {
        if self.state == StreamState::Created {
            self.dispatch(StreamCommand::Realize).await?;
        }
        Ok(self.dispatch(StreamCommand::Start).await?.is_some())
    }

    /// Best-effort stop followed by close. Returns whether the stream was
    /// running.
    pub async fn release(&mut self) -> bool {
        let was_running = self.state.is_running();
        if was_running {
            if let Err(e) = self.dispatch(StreamCommand::Stop).await {
                warn!(stream = %self.label, error = %e, "error while stopping stream");
            }
        }
        // close never fails
        let _ = self.dispatch(StreamCommand::Close).await;
        was_running
    }
}

impl<D: ?Sized> fmt::Debug for StreamMachine<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamMachine")
            .field("label", &self.label)
            .field("state", &self.state)
            .finish()
    }
}
