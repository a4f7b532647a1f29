//! Secure bring-up sequencer
//!
//! Runs once per boot after the radio stack reports readiness:
//!
//! 1. decode the provisioned master key,
//! 2. initialize the secure time-sync client with it,
//! 3. start advertising.
//!
//! Each step gates the next. The first failure moves the sequence to
//! [`BringUpState::Failed`], is reported to the [`FaultReporter`] and ends the
//! sequence for this boot; there are no retries.

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;
use zeroize::Zeroize;

use crate::client::{ClientError, SecureClient};
use crate::config::BringUpConfig;
use crate::fault::{FaultCode, FaultRecord, FaultReporter};
use crate::key::{KeyError, MasterKey};
use crate::radio::{
    AdvertisingError, Advertiser, CriticalError, DeviceInitInfo, StackEvent, StackEvents,
};

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpState {
    NotStarted,
    KeyDecoded,
    ClientInitialized,
    AdvertisingStarted,
    Failed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BringUpError {
    #[error("Master key unusable: {0}")]
    Key(KeyError),
    #[error("Secure client init failed: {0}")]
    ClientInit(ClientError),
    #[error("Advertising start failed: {0}")]
    AdvertisingStart(AdvertisingError),
    #[error("Radio stack critical error {code}")]
    StackCritical { code: i32 },
    #[error("Bring-up already ran this boot")]
    AlreadyStarted,
}

impl BringUpError {
    /// Fault code and collaborator detail reported for this error
    fn fault(&self) -> Option<(FaultCode, i32)> {
        match self {
            Self::Key(KeyError::SizeMismatch { actual, .. }) => Some((
                FaultCode::KeySizeMismatch,
                i32::try_from(*actual).unwrap_or(i32::MAX),
            )),
            Self::Key(KeyError::Decode) => Some((FaultCode::KeyDecode, 0)),
            Self::ClientInit(e) => Some((FaultCode::ClientInit, client_detail(e))),
            Self::AdvertisingStart(AdvertisingError::Controller(e)) => {
                Some((FaultCode::AdvertisingStart, e.code()))
            }
            Self::AdvertisingStart(AdvertisingError::Busy) => {
                Some((FaultCode::AdvertisingStart, 0))
            }
            Self::StackCritical { code } => Some((FaultCode::StackCritical, *code)),
            // Not a fault of this boot, the first run already reported
            Self::AlreadyStarted => None,
        }
    }
}

fn client_detail(error: &ClientError) -> i32 {
    match error {
        ClientError::Status(status) => *status,
        ClientError::InvalidInterval => -1,
        ClientError::WeakKey => -2,
        ClientError::AlreadyInitialized => -3,
    }
}

/// Bring-up sequencer.
///
/// Owns the master key for as long as it is needed. A second stack-ready
/// notification is rejected with [`BringUpError::AlreadyStarted`] and leaves
/// the key and every collaborator untouched.
pub struct BringUp<'a, C, A, F, const N: usize> {
    encoded_key: &'a str,
    config: BringUpConfig<'a>,
    key: Option<MasterKey<N>>,
    client: C,
    advertiser: A,
    faults: F,
    state: BringUpState,
}

impl<'a, C, A, F, const N: usize> BringUp<'a, C, A, F, N>
where
    C: SecureClient<N>,
    A: Advertiser,
    F: FaultReporter,
{
    pub fn new(
        encoded_key: &'a str,
        config: BringUpConfig<'a>,
        client: C,
        advertiser: A,
        faults: F,
    ) -> Self {
        Self {
            encoded_key,
            config,
            key: None,
            client,
            advertiser,
            faults,
            state: BringUpState::NotStarted,
        }
    }

    pub fn state(&self) -> BringUpState {
        self.state
    }

    /// Master key still held by the sequencer, if any
    pub fn key(&self) -> Option<&MasterKey<N>> {
        self.key.as_ref()
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn advertiser(&self) -> &A {
        &self.advertiser
    }

    pub fn into_parts(self) -> (C, A, F) {
        (self.client, self.advertiser, self.faults)
    }

    /// Wait for the radio stack and run the sequence.
    pub async fn run(&mut self, events: &StackEvents) -> Result<(), BringUpError> {
        match events.wait().await {
            StackEvent::Ready(info) => self.on_stack_ready(&info).await,
            StackEvent::CriticalError(fault) => Err(self.on_critical_error(fault)),
        }
    }

    /// Stack initialization finished: decode, init client, advertise.
    pub async fn on_stack_ready(&mut self, info: &DeviceInitInfo) -> Result<(), BringUpError> {
        if self.state != BringUpState::NotStarted {
            warn!("Stack ready delivered again in state {:?}, ignoring", self.state);
            return Err(BringUpError::AlreadyStarted);
        }
        info!("Starting secure bring-up (device {})", info.address);

        let key = match MasterKey::<N>::decode(self.encoded_key) {
            Ok(key) => key,
            Err(e) => return Err(self.fail(BringUpError::Key(e))),
        };
        let key = self.key.insert(key);
        self.state = BringUpState::KeyDecoded;

        let interval_ms = self.config.time_sync_interval_millis();
        if let Err(e) = self.client.init(interval_ms, key.expose()) {
            return Err(self.fail(BringUpError::ClientInit(e)));
        }
        self.state = BringUpState::ClientInitialized;

        if self.client.retains_key_copy() {
            if let Some(mut key) = self.key.take() {
                key.zeroize();
            }
        }

        if let Err(e) = self.advertiser.start_advertising().await {
            return Err(self.fail(BringUpError::AdvertisingStart(e)));
        }
        self.state = BringUpState::AdvertisingStarted;

        info!("Bring-up complete, advertising as {}", self.config.advertising.device_name);
        Ok(())
    }

    /// Radio stack reported a critical error.
    pub fn on_critical_error(&mut self, fault: CriticalError) -> BringUpError {
        error!(
            "Radio stack critical error {} (detail {:#x})",
            fault.code, fault.detail
        );
        let err = BringUpError::StackCritical { code: fault.code };
        self.report(&err);
        if self.state != BringUpState::AdvertisingStarted {
            self.state = BringUpState::Failed;
        }
        err
    }

    fn fail(&mut self, err: BringUpError) -> BringUpError {
        error!("Bring-up aborted in state {:?}: {}", self.state, err);
        self.report(&err);
        self.state = BringUpState::Failed;
        err
    }

    fn report(&mut self, err: &BringUpError) {
        if let Some((code, detail)) = err.fault() {
            self.faults.report(FaultRecord::new(code, self.state, detail));
        }
    }
}
