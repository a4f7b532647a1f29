//! Secure time-sync client
//!
//! The sequencer only needs two things from the client library: an
//! initializer taking the time-sync interval and the master key, and whether
//! the client keeps its own copy of the key afterwards. [`TimeSyncClient`] is
//! the in-tree implementation used by the firmware and the simulator.

use log::{info, warn};
use thiserror_no_std::Error;
use zeroize::Zeroizing;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientError {
    #[error("Time-sync interval must be non-zero")]
    InvalidInterval,
    #[error("Master key rejected (all-zero key material)")]
    WeakKey,
    #[error("Client already initialized")]
    AlreadyInitialized,
    #[error("Client returned status {0}")]
    Status(i32),
}

pub trait SecureClient<const N: usize> {
    /// Initialize the client with the time-sync interval and the master key.
    fn init(&mut self, time_sync_interval_ms: u64, key: &[u8; N]) -> Result<(), ClientError>;

    /// Whether the client holds its own copy of the key after a successful
    /// [`init`](SecureClient::init). The caller wipes its copy when it does.
    fn retains_key_copy(&self) -> bool;
}

impl<const N: usize, C: SecureClient<N> + ?Sized> SecureClient<N> for &mut C {
    fn init(&mut self, time_sync_interval_ms: u64, key: &[u8; N]) -> Result<(), ClientError> {
        (**self).init(time_sync_interval_ms, key)
    }

    fn retains_key_copy(&self) -> bool {
        (**self).retains_key_copy()
    }
}

/// Client state after a successful init
struct Session<const N: usize> {
    key: Zeroizing<[u8; N]>,
    time_sync_interval_ms: u64,
}

/// Time-synchronized client holding a private, self-wiping key copy.
pub struct TimeSyncClient<const N: usize> {
    session: Option<Session<N>>,
}

impl<const N: usize> TimeSyncClient<N> {
    pub const fn new() -> Self {
        Self { session: None }
    }

    pub fn is_initialized(&self) -> bool {
        self.session.is_some()
    }

    pub fn time_sync_interval_ms(&self) -> Option<u64> {
        self.session.as_ref().map(|s| s.time_sync_interval_ms)
    }

    /// Borrow the client's key copy
    pub fn key(&self) -> Option<&[u8; N]> {
        self.session.as_ref().map(|s| &*s.key)
    }

    /// Drop the session and wipe the key copy
    pub fn reset(&mut self) {
        self.session = None;
    }
}

impl<const N: usize> Default for TimeSyncClient<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> SecureClient<N> for TimeSyncClient<N> {
    fn init(&mut self, time_sync_interval_ms: u64, key: &[u8; N]) -> Result<(), ClientError> {
        if self.session.is_some() {
            warn!("Time-sync client init called twice");
            return Err(ClientError::AlreadyInitialized);
        }
        if time_sync_interval_ms == 0 {
            return Err(ClientError::InvalidInterval);
        }
        if key.iter().all(|&b| b == 0) {
            return Err(ClientError::WeakKey);
        }

        self.session = Some(Session {
            key: Zeroizing::new(*key),
            time_sync_interval_ms,
        });
        info!(
            "Time-sync client ready ({} byte key, sync every {} ms)",
            N, time_sync_interval_ms
        );
        Ok(())
    }

    fn retains_key_copy(&self) -> bool {
        true
    }
}
