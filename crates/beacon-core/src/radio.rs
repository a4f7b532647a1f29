//! Radio stack adapter
//!
//! The radio stack reports exactly two things to the application: that it
//! finished initializing, or that it hit a critical error. Both are one-shot
//! per boot and are delivered through [`StackEvents`], which the bring-up
//! sequencer awaits once.

use core::cell::RefCell;
use core::fmt;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embedded_io_async::{Read, Write};
use log::{error, info, warn};
use thiserror_no_std::Error;

use crate::hci::{HciController, HciError};

/// Bluetooth device address, little-endian as reported by the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BdAddr(pub [u8; 6]);

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.0;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X}",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )
    }
}

/// Data delivered with the stack-ready event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceInitInfo {
    pub address: BdAddr,
}

/// Fault raised by the radio stack itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CriticalError {
    pub code: i32,
    pub detail: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackEvent {
    Ready(DeviceInitInfo),
    CriticalError(CriticalError),
}

/// One-shot stack notifications.
///
/// Each slot accepts a single event per boot, later attempts are ignored and
/// reported back as `false`.
pub struct StackEvents {
    ready: Signal<CriticalSectionRawMutex, DeviceInitInfo>,
    ready_fired: AtomicBool,
    critical: Signal<CriticalSectionRawMutex, CriticalError>,
    critical_fired: AtomicBool,
}

impl StackEvents {
    pub const fn new() -> Self {
        Self {
            ready: Signal::new(),
            ready_fired: AtomicBool::new(false),
            critical: Signal::new(),
            critical_fired: AtomicBool::new(false),
        }
    }

    /// Report that the stack finished initializing.
    pub fn stack_ready(&self, info: DeviceInitInfo) -> bool {
        if self.ready_fired.swap(true, Ordering::AcqRel) {
            warn!("Stack ready reported more than once, ignoring");
            return false;
        }
        self.ready.signal(info);
        true
    }

    /// Report a critical stack fault.
    pub fn critical_error(&self, error: CriticalError) -> bool {
        if self.critical_fired.swap(true, Ordering::AcqRel) {
            warn!("Critical stack error reported more than once, ignoring");
            return false;
        }
        self.critical.signal(error);
        true
    }

    /// Wait for the first stack event. A critical error wins over readiness
    /// when both are already pending.
    pub async fn wait(&self) -> StackEvent {
        match select(self.critical.wait(), self.ready.wait()).await {
            Either::First(error) => StackEvent::CriticalError(error),
            Either::Second(info) => StackEvent::Ready(info),
        }
    }
}

impl Default for StackEvents {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvertisingError {
    #[error("Controller error: {0}")]
    Controller(HciError),
    #[error("Advertising controller is busy")]
    Busy,
}

/// Advertising control of the radio
#[allow(async_fn_in_trait)]
pub trait Advertiser {
    /// Configure advertising and enable it, completing once the controller
    /// acknowledged every command.
    async fn start_advertising(&mut self) -> Result<(), AdvertisingError>;
}

impl<A: Advertiser + ?Sized> Advertiser for &mut A {
    async fn start_advertising(&mut self) -> Result<(), AdvertisingError> {
        (**self).start_advertising().await
    }
}

// Lets the stack task and the sequencer share one controller, one at a time.
impl<A: Advertiser> Advertiser for &RefCell<A> {
    #[allow(
        clippy::await_holding_refcell_ref,
        reason = "a second user gets Busy from try_borrow_mut instead of a panic"
    )]
    async fn start_advertising(&mut self) -> Result<(), AdvertisingError> {
        let mut advertiser = self.try_borrow_mut().map_err(|_| AdvertisingError::Busy)?;
        advertiser.start_advertising().await
    }
}

/// Bring up the controller and report the outcome through `events`.
///
/// Resets the controller and reads its public address. Success fires the
/// stack-ready event, any controller failure fires the critical error event.
pub async fn initialize_stack<T: Read + Write>(
    controller: &mut HciController<T>,
    events: &StackEvents,
) -> Result<DeviceInitInfo, HciError> {
    let result = match controller.reset().await {
        Ok(()) => controller.read_bd_addr().await,
        Err(e) => Err(e),
    };

    match result {
        Ok(address) => {
            let info = DeviceInitInfo { address };
            info!("Radio stack ready, device address {}", address);
            events.stack_ready(info);
            Ok(info)
        }
        Err(e) => {
            error!("Radio stack initialization failed: {}", e);
            events.critical_error(CriticalError {
                code: e.code(),
                detail: e.opcode().map_or(0, u32::from),
            });
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use embassy_futures::block_on;

    struct CountingAdvertiser {
        calls: usize,
    }

    impl Advertiser for CountingAdvertiser {
        async fn start_advertising(&mut self) -> Result<(), AdvertisingError> {
            self.calls += 1;
            Ok(())
        }
    }

    #[test]
    fn test_ready_fires_once() {
        let events = StackEvents::new();
        let info = DeviceInitInfo {
            address: BdAddr([1, 2, 3, 4, 5, 6]),
        };

        assert!(events.stack_ready(info));
        assert!(!events.stack_ready(DeviceInitInfo::default()));
        assert_eq!(block_on(events.wait()), StackEvent::Ready(info));
    }

    #[test]
    fn test_critical_error_wins_when_both_pending() {
        let events = StackEvents::new();
        let fault = CriticalError { code: -4, detail: 7 };

        events.stack_ready(DeviceInitInfo::default());
        assert!(events.critical_error(fault));
        assert!(!events.critical_error(CriticalError { code: 1, detail: 0 }));
        assert_eq!(block_on(events.wait()), StackEvent::CriticalError(fault));
    }

    #[test]
    fn test_bd_addr_display_is_msb_first() {
        use core::fmt::Write;

        let mut out = heapless::String::<32>::new();
        write!(out, "{}", BdAddr([0x66, 0x55, 0x44, 0x33, 0x22, 0x11])).unwrap();
        assert_eq!(out.as_str(), "11:22:33:44:55:66");
    }

    #[test]
    fn test_refcell_advertiser_reports_busy() {
        let cell = RefCell::new(CountingAdvertiser { calls: 0 });

        let mut shared = &cell;
        block_on(shared.start_advertising()).unwrap();
        assert_eq!(cell.borrow().calls, 1);

        let _held = cell.borrow_mut();
        assert_eq!(block_on(shared.start_advertising()), Err(AdvertisingError::Busy));
    }

    #[test]
    fn test_initialize_stack_waits_for_slow_controller() {
        use crate::config::AdvertisingConfig;
        use crate::hci::testing::ScriptedTransport;
        use crate::hci::{OP_READ_BD_ADDR, OP_RESET};

        let mut transport = ScriptedTransport::new();
        transport.read_delay = 2;
        transport.push_complete(OP_RESET, 0, &[]);
        transport.push_complete(OP_READ_BD_ADDR, 0, &[1, 2, 3, 4, 5, 6]);
        let mut hci = HciController::new(transport, &AdvertisingConfig::new("slow"));

        let events = StackEvents::new();
        let info = block_on(initialize_stack(&mut hci, &events)).unwrap();
        assert_eq!(info.address, BdAddr([1, 2, 3, 4, 5, 6]));
        assert_eq!(block_on(events.wait()), StackEvent::Ready(info));
    }

    #[test]
    fn test_initialize_stack_failure_fires_critical_error() {
        use crate::config::AdvertisingConfig;
        use crate::hci::OP_RESET;
        use crate::hci::testing::ScriptedTransport;

        let mut transport = ScriptedTransport::new();
        transport.push_complete(OP_RESET, 0x03, &[]);
        let mut hci = HciController::new(transport, &AdvertisingConfig::new("dead"));

        let events = StackEvents::new();
        assert!(block_on(initialize_stack(&mut hci, &events)).is_err());
        assert_eq!(
            block_on(events.wait()),
            StackEvent::CriticalError(CriticalError {
                code: 3,
                detail: u32::from(OP_RESET)
            })
        );
    }
}
