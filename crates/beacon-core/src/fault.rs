//! Fault reporting
//!
//! Bring-up failures are never silent: each one becomes a [`FaultRecord`]
//! handed to a [`FaultReporter`]. The firmware persists the record so it can
//! be read back after a reset, and blinks the fault code on an LED.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embedded_hal::digital::OutputPin;
use embedded_hal_async::delay::DelayNs;
use log::{error, warn};
use serde::{Deserialize, Serialize};

use crate::bringup::BringUpState;

/// LED on-time of a single blink
pub const BLINK_ON_MS: u32 = 200;
/// LED off-time between blinks of one code
pub const BLINK_OFF_MS: u32 = 300;
/// Pause between repetitions of a code
pub const CODE_PAUSE_MS: u32 = 2000;

/// Size of the persistent fault slot, magic byte included
pub const FAULT_SLOT_SIZE: usize = 16;
const FAULT_SLOT_MAGIC: u8 = 0xFA;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultCode {
    KeySizeMismatch,
    KeyDecode,
    ClientInit,
    AdvertisingStart,
    StackCritical,
}

impl FaultCode {
    /// Number of LED blinks identifying this fault
    pub const fn blink_count(self) -> u8 {
        match self {
            Self::KeySizeMismatch => 2,
            Self::KeyDecode => 3,
            Self::ClientInit => 4,
            Self::AdvertisingStart => 5,
            Self::StackCritical => 6,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::KeySizeMismatch => "key size mismatch",
            Self::KeyDecode => "key decode error",
            Self::ClientInit => "secure client init failed",
            Self::AdvertisingStart => "advertising start failed",
            Self::StackCritical => "radio stack critical error",
        }
    }
}

/// Diagnosable record of a failed bring-up
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaultRecord {
    pub code: FaultCode,
    /// Step the sequence had reached when it failed
    pub state: BringUpState,
    /// Collaborator specific error code
    pub detail: i32,
}

impl FaultRecord {
    pub const fn new(code: FaultCode, state: BringUpState, detail: i32) -> Self {
        Self {
            code,
            state,
            detail,
        }
    }

    /// Store the record in a persistent slot (magic byte + postcard bytes).
    pub fn store(&self, slot: &mut [u8; FAULT_SLOT_SIZE]) -> Result<(), postcard::Error> {
        let mut scratch = [0u8; FAULT_SLOT_SIZE - 1];
        let used = postcard::to_slice(self, &mut scratch)?.len();

        slot.fill(0);
        slot[0] = FAULT_SLOT_MAGIC;
        slot[1..=used].copy_from_slice(&scratch[..used]);
        Ok(())
    }

    /// Read back a record written by [`store`](FaultRecord::store).
    ///
    /// Returns `None` for an empty or corrupted slot.
    pub fn load(slot: &[u8; FAULT_SLOT_SIZE]) -> Option<Self> {
        if slot[0] != FAULT_SLOT_MAGIC {
            return None;
        }
        postcard::from_bytes(&slot[1..])
            .map_err(|e| warn!("Discarding corrupted fault record: {:?}", e))
            .ok()
    }

    pub fn clear(slot: &mut [u8; FAULT_SLOT_SIZE]) {
        slot.fill(0);
    }
}

/// Sink for bring-up faults
pub trait FaultReporter {
    fn report(&mut self, record: FaultRecord);
}

impl<F: FaultReporter + ?Sized> FaultReporter for &mut F {
    fn report(&mut self, record: FaultRecord) {
        (**self).report(record)
    }
}

/// Reporter that only logs
pub struct LogFaultReporter;

impl FaultReporter for LogFaultReporter {
    fn report(&mut self, record: FaultRecord) {
        error!(
            "FAULT {:?} ({}) at {:?}, detail {}",
            record.code,
            record.code.label(),
            record.state,
            record.detail
        );
    }
}

pub type FaultSignal = Signal<CriticalSectionRawMutex, FaultRecord>;

/// Reporter handing the record to a task waiting on a [`FaultSignal`]
pub struct SignalFaultReporter<'a> {
    signal: &'a FaultSignal,
}

impl<'a> SignalFaultReporter<'a> {
    pub const fn new(signal: &'a FaultSignal) -> Self {
        Self { signal }
    }
}

impl FaultReporter for SignalFaultReporter<'_> {
    fn report(&mut self, record: FaultRecord) {
        self.signal.signal(record);
    }
}

/// Blinks fault codes on an LED
pub struct FaultIndicator<P, D> {
    led: P,
    delay: D,
}

impl<P: OutputPin, D: DelayNs> FaultIndicator<P, D> {
    pub fn new(led: P, delay: D) -> Self {
        Self { led, delay }
    }

    /// Blink `code` once, followed by the inter-code pause.
    pub async fn blink(&mut self, code: FaultCode) -> Result<(), P::Error> {
        for _ in 0..code.blink_count() {
            self.led.set_high()?;
            self.delay.delay_ms(BLINK_ON_MS).await;
            self.led.set_low()?;
            self.delay.delay_ms(BLINK_OFF_MS).await;
        }
        self.delay.delay_ms(CODE_PAUSE_MS).await;
        Ok(())
    }

    /// Wait for a fault and blink its code until reset.
    pub async fn run(mut self, faults: &FaultSignal) -> ! {
        let record = faults.wait().await;
        loop {
            if let Err(e) = self.blink(record.code).await {
                error!("Fault LED write failed: {:?}", e);
                self.delay.delay_ms(CODE_PAUSE_MS).await;
            }
        }
    }

    pub fn release(self) -> (P, D) {
        (self.led, self.delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::convert::Infallible;
    use embassy_futures::block_on;
    use embedded_hal::digital::ErrorType;

    #[derive(Default)]
    struct RecordingPin {
        levels: heapless::Vec<bool, 32>,
    }

    impl ErrorType for RecordingPin {
        type Error = Infallible;
    }

    impl OutputPin for RecordingPin {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.levels.push(false).unwrap();
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.levels.push(true).unwrap();
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingDelay {
        total_ms: u32,
    }

    impl DelayNs for RecordingDelay {
        async fn delay_ns(&mut self, ns: u32) {
            self.total_ms += ns / 1_000_000;
        }

        async fn delay_ms(&mut self, ms: u32) {
            self.total_ms += ms;
        }
    }

    #[test]
    fn test_blink_counts_are_distinct() {
        let codes = [
            FaultCode::KeySizeMismatch,
            FaultCode::KeyDecode,
            FaultCode::ClientInit,
            FaultCode::AdvertisingStart,
            FaultCode::StackCritical,
        ];
        for (i, a) in codes.iter().enumerate() {
            for b in &codes[i + 1..] {
                assert_ne!(a.blink_count(), b.blink_count());
            }
        }
    }

    #[test]
    fn test_blink_pattern() {
        let mut indicator = FaultIndicator::new(RecordingPin::default(), RecordingDelay::default());
        block_on(indicator.blink(FaultCode::KeyDecode)).unwrap();

        let (pin, delay) = indicator.release();
        assert_eq!(pin.levels.as_slice(), &[true, false, true, false, true, false]);
        assert_eq!(delay.total_ms, 3 * (BLINK_ON_MS + BLINK_OFF_MS) + CODE_PAUSE_MS);
    }

    #[test]
    fn test_record_slot_store_and_load() {
        let record = FaultRecord::new(FaultCode::ClientInit, BringUpState::KeyDecoded, -22);
        let mut slot = [0xFFu8; FAULT_SLOT_SIZE];

        record.store(&mut slot).unwrap();
        assert_eq!(slot[0], FAULT_SLOT_MAGIC);
        assert_eq!(FaultRecord::load(&slot), Some(record));

        FaultRecord::clear(&mut slot);
        assert_eq!(FaultRecord::load(&slot), None);
    }

    #[test]
    fn test_corrupted_slot_is_ignored() {
        let mut slot = [0u8; FAULT_SLOT_SIZE];
        slot[0] = FAULT_SLOT_MAGIC;
        slot[1] = 0x7F; // no such fault code
        assert_eq!(FaultRecord::load(&slot), None);
    }

    #[test]
    fn test_signal_reporter_wakes_waiter() {
        let signal = FaultSignal::new();
        let mut reporter = SignalFaultReporter::new(&signal);
        let record = FaultRecord::new(FaultCode::StackCritical, BringUpState::NotStarted, 3);

        reporter.report(record);
        assert_eq!(block_on(signal.wait()), record);
    }
}
