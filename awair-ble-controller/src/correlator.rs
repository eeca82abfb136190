//! Request/response correlation
//!
//! The device protocol has no request ids: the reply to a command is simply
//! the next message that arrives. That only works while at most one request
//! is outstanding, so every conversation goes through an [`Exchange`], which
//! holds the lock on the inbound side for as long as it lives.
//!
//! A wait that times out does not drain anything. If the reply shows up
//! later it is the next message for whoever waits next, and it will be taken
//! as their reply.

use std::time::Duration;

use awair_proto::async_io::spawn_reassembly;
use awair_proto::{Command, DecodedMessage, Inbound, Reassembler, ReassemblyError, WifiCredentials};
use tokio::sync::{Mutex, MutexGuard, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::{Timeouts, Transport, TransportError};

#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("failed to write to device: {0}")]
    TransportWrite(#[source] TransportError),
    #[error("no response within {0:?}")]
    ResponseTimeout(Duration),
    #[error("could not serialize {0}: {1}")]
    MalformedCommand(&'static str, #[source] serde_json::Error),
    #[error(transparent)]
    Reassembly(#[from] ReassemblyError),
    #[error("notification stream closed")]
    Disconnected,
}

/// Pairs outbound commands with the next inbound message
pub struct Correlator<T> {
    transport: T,
    inbound: Mutex<mpsc::Receiver<Inbound>>,
    timeouts: Timeouts,
}

impl<T: Transport> Correlator<T> {
    pub fn new(transport: T, inbound: mpsc::Receiver<Inbound>, timeouts: Timeouts) -> Self {
        Self {
            transport,
            inbound: Mutex::new(inbound),
            timeouts,
        }
    }

    /// Start the reassembly task over `fragments` and correlate its output
    pub fn spawn(
        transport: T,
        fragments: mpsc::Receiver<Vec<u8>>,
        reassembler: Reassembler,
        timeouts: Timeouts,
    ) -> (Self, JoinHandle<()>) {
        let (inbound, task) = spawn_reassembly(fragments, reassembler);
        (Self::new(transport, inbound, timeouts), task)
    }

    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Wait for exclusive use of the link
    pub async fn exchange(&self) -> Exchange<'_, T> {
        Exchange {
            transport: &self.transport,
            inbound: self.inbound.lock().await,
            timeouts: self.timeouts,
        }
    }

    /// Exclusive use of the link, if nobody else has it
    pub fn try_exchange(&self) -> Option<Exchange<'_, T>> {
        let inbound = self.inbound.try_lock().ok()?;
        Some(Exchange {
            transport: &self.transport,
            inbound,
            timeouts: self.timeouts,
        })
    }

    /// Next decoded message. Waiting for the link counts against `timeout`.
    pub async fn await_message(&self, timeout: Duration) -> Result<DecodedMessage, ExchangeError> {
        let deadline = Instant::now() + timeout;
        let mut exchange = tokio::time::timeout_at(deadline, self.exchange())
            .await
            .map_err(|_| ExchangeError::ResponseTimeout(timeout))?;
        exchange.await_until(deadline, timeout).await
    }

    pub async fn send_command(&self, cmd: &Command) -> Result<(), ExchangeError> {
        self.exchange().await.send_command(cmd).await
    }

    /// Waits for the link without a limit; `timeout` starts once the command
    /// is written.
    pub async fn send_and_await(
        &self,
        cmd: &Command,
        timeout: Duration,
    ) -> Result<DecodedMessage, ExchangeError> {
        self.exchange().await.send_and_await(cmd, timeout).await
    }
}

/// Exclusive hold on a [`Correlator`]; dropping it releases the link
pub struct Exchange<'a, T> {
    transport: &'a T,
    inbound: MutexGuard<'a, mpsc::Receiver<Inbound>>,
    timeouts: Timeouts,
}

impl<T: Transport> Exchange<'_, T> {
    pub fn timeouts(&self) -> Timeouts {
        self.timeouts
    }

    /// Next decoded message, or `ResponseTimeout` once `timeout` elapses
    pub async fn await_message(&mut self, timeout: Duration) -> Result<DecodedMessage, ExchangeError> {
        self.await_until(Instant::now() + timeout, timeout).await
    }

    async fn await_until(
        &mut self,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<DecodedMessage, ExchangeError> {
        match tokio::time::timeout_at(deadline, self.inbound.recv()).await {
            Err(_) => Err(ExchangeError::ResponseTimeout(timeout)),
            Ok(None) => Err(ExchangeError::Disconnected),
            Ok(Some(inbound)) => Ok(inbound?),
        }
    }

    pub async fn send_command(&mut self, cmd: &Command) -> Result<(), ExchangeError> {
        let bytes = cmd
            .to_bytes()
            .map_err(|e| ExchangeError::MalformedCommand(cmd.name(), e))?;
        tracing::debug!(cmd = cmd.name(), "sending command");
        self.write(&bytes).await
    }

    /// Write network credentials; the device answers with a series of status
    /// messages rather than one reply
    pub async fn send_credentials(&mut self, credentials: &WifiCredentials) -> Result<(), ExchangeError> {
        let bytes = credentials
            .to_bytes()
            .map_err(|e| ExchangeError::MalformedCommand("wifi credentials", e))?;
        tracing::debug!(ssid = %credentials.ssid, "sending wifi credentials");
        self.write(&bytes).await
    }

    pub async fn send_and_await(
        &mut self,
        cmd: &Command,
        timeout: Duration,
    ) -> Result<DecodedMessage, ExchangeError> {
        self.send_command(cmd).await?;
        self.await_message(timeout).await
    }

    async fn write(&self, bytes: &[u8]) -> Result<(), ExchangeError> {
        self.transport
            .write(bytes)
            .await
            .map_err(ExchangeError::TransportWrite)
    }
}
