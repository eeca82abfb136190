//! Provisioning sequence
//!
//! A fixed, linear walk from the device's first status message to an
//! installed MQTT token. The first failing step ends the run; nothing is
//! retried, rolled back or resumed.

use std::time::Duration;

use awair_proto::ble::WIFI_STATE_OK;
use awair_proto::{Command, DecodedMessage, WifiCredentials};

use crate::{Correlator, Exchange, ExchangeError, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    AwaitInitialStatus,
    SetCountry,
    WifiSetupBegin,
    WifiConnect,
    ConnectionTest,
    DeviceRegister,
    SetMqttToken,
    Done,
}

impl Step {
    pub const SEQUENCE: [Step; 8] = [
        Step::AwaitInitialStatus,
        Step::SetCountry,
        Step::WifiSetupBegin,
        Step::WifiConnect,
        Step::ConnectionTest,
        Step::DeviceRegister,
        Step::SetMqttToken,
        Step::Done,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Step::AwaitInitialStatus => "await initial status",
            Step::SetCountry => "set country",
            Step::WifiSetupBegin => "begin wifi setup",
            Step::WifiConnect => "connect wifi",
            Step::ConnectionTest => "connection test",
            Step::DeviceRegister => "register device",
            Step::SetMqttToken => "set mqtt token",
            Step::Done => "done",
        }
    }

    pub fn next(self) -> Option<Step> {
        let index = Self::SEQUENCE.iter().position(|s| *s == self)?;
        Self::SEQUENCE.get(index + 1).copied()
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What the caller supplies for one run
#[derive(Debug, Clone)]
pub struct ProvisioningParams {
    pub country_code: String,
    pub wifi: WifiCredentials,
    pub mqtt_token: String,
}

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error(transparent)]
    Exchange(#[from] ExchangeError),
    /// No `state: "OK"` within one extended wait while polling
    #[error("wifi did not report state \"OK\" within {0:?}")]
    WifiConnectTimeout(Duration),
}

#[derive(Debug, thiserror::Error)]
#[error("{step} failed: {source}")]
pub struct ProvisionError {
    pub step: Step,
    #[source]
    pub source: StepError,
}

/// Working state of one provisioning run
#[derive(Debug)]
pub struct ProvisioningSession {
    params: ProvisioningParams,
    step: Step,
    visited: Vec<Step>,
    transcript: Vec<(Step, DecodedMessage)>,
    failed: Option<Step>,
}

impl ProvisioningSession {
    pub fn new(params: ProvisioningParams) -> Self {
        Self {
            params,
            step: Step::AwaitInitialStatus,
            visited: Vec::new(),
            transcript: Vec::new(),
            failed: None,
        }
    }

    pub fn params(&self) -> &ProvisioningParams {
        &self.params
    }

    /// Current step; after a failure, the step that failed
    pub fn step(&self) -> Step {
        self.step
    }

    pub fn visited(&self) -> &[Step] {
        &self.visited
    }

    /// Every message received, tagged with the step it was received in
    pub fn transcript(&self) -> &[(Step, DecodedMessage)] {
        &self.transcript
    }

    pub fn failed_step(&self) -> Option<Step> {
        self.failed
    }

    pub fn is_done(&self) -> bool {
        self.step == Step::Done
    }
}

/// Drive `session` to `Done`, holding the link for the whole run
pub async fn run<T: Transport>(
    correlator: &Correlator<T>,
    session: &mut ProvisioningSession,
) -> Result<(), ProvisionError> {
    let mut exchange = correlator.exchange().await;

    loop {
        let step = session.step;
        session.visited.push(step);

        let Some(next) = step.next() else {
            tracing::info!("provisioning complete");
            return Ok(());
        };

        if let Err(source) = perform(&mut exchange, session, step).await {
            session.failed = Some(step);
            return Err(ProvisionError { step, source });
        }

        tracing::info!("{step}: ok");
        session.step = next;
    }
}

async fn perform<T: Transport>(
    exchange: &mut Exchange<'_, T>,
    session: &mut ProvisioningSession,
    step: Step,
) -> Result<(), StepError> {
    let timeout = exchange.timeouts().response;

    let message = match step {
        Step::AwaitInitialStatus => exchange.await_message(timeout).await?,
        Step::SetCountry => {
            let cmd = Command::set_country(session.params.country_code.as_str());
            exchange.send_and_await(&cmd, timeout).await?
        }
        Step::WifiSetupBegin => exchange.send_and_await(&Command::WifiSetup, timeout).await?,
        Step::WifiConnect => return connect_wifi(exchange, session).await,
        Step::ConnectionTest => {
            exchange
                .send_and_await(&Command::ConnectionTest, timeout)
                .await?
        }
        Step::DeviceRegister => {
            exchange
                .send_and_await(&Command::DeviceRegister, timeout)
                .await?
        }
        Step::SetMqttToken => {
            let cmd = Command::set_mqtt_token(session.params.mqtt_token.as_str());
            exchange.send_and_await(&cmd, timeout).await?
        }
        Step::Done => return Ok(()),
    };

    tracing::info!(%message, "{step}");
    session.transcript.push((step, message));
    Ok(())
}

/// Write credentials, then poll until the device reports `state: "OK"`.
///
/// Each wait gets the full extended timeout; intermediate messages (any
/// other state, or none) keep the loop going.
async fn connect_wifi<T: Transport>(
    exchange: &mut Exchange<'_, T>,
    session: &mut ProvisioningSession,
) -> Result<(), StepError> {
    exchange.send_credentials(&session.params.wifi).await?;

    let timeout = exchange.timeouts().wifi_connect;
    loop {
        let message = match exchange.await_message(timeout).await {
            Ok(message) => message,
            Err(ExchangeError::ResponseTimeout(_)) => {
                return Err(StepError::WifiConnectTimeout(timeout));
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(%message, "wifi status");
        let connected = message.state() == Some(WIFI_STATE_OK);
        session.transcript.push((Step::WifiConnect, message));
        if connected {
            return Ok(());
        }
    }
}
