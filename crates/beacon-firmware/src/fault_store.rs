//! Fault record persisted in RTC fast memory
//!
//! The slot survives software and watchdog resets, so the fault that stopped
//! the previous boot can be read back and logged on the next one.

use beacon_core::fault::{FAULT_SLOT_SIZE, FaultSignal, SignalFaultReporter};
use beacon_core::{FaultRecord, FaultReporter};
use log::error;

#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut FAULT_SLOT: [u8; FAULT_SLOT_SIZE] = [0; FAULT_SLOT_SIZE];

fn with_slot<R>(f: impl FnOnce(&mut [u8; FAULT_SLOT_SIZE]) -> R) -> R {
    critical_section::with(|_| {
        // SAFETY: the slot is only touched here, inside a critical section.
        let slot = unsafe { &mut *core::ptr::addr_of_mut!(FAULT_SLOT) };
        f(slot)
    })
}

/// Take the record left by the previous boot, clearing the slot.
pub fn take_previous() -> Option<FaultRecord> {
    with_slot(|slot| {
        let record = FaultRecord::load(slot);
        FaultRecord::clear(slot);
        record
    })
}

/// Persists the record, then wakes the fault LED task.
pub struct PersistentFaultReporter<'a> {
    led: SignalFaultReporter<'a>,
}

impl<'a> PersistentFaultReporter<'a> {
    pub const fn new(signal: &'a FaultSignal) -> Self {
        Self {
            led: SignalFaultReporter::new(signal),
        }
    }
}

impl FaultReporter for PersistentFaultReporter<'_> {
    fn report(&mut self, record: FaultRecord) {
        error!(
            "FAULT {} (blink code {}) at {:?}, detail {}",
            record.code.label(),
            record.code.blink_count(),
            record.state,
            record.detail
        );
        if let Err(e) = with_slot(|slot| record.store(slot)) {
            error!("Could not persist fault record: {:?}", e);
        }
        self.led.report(record);
    }
}
