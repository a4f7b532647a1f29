//! Software BLE controller for hosts without a radio
//!
//! Speaks just enough H4 to answer the commands issued by
//! [`HciController`](crate::hci::HciController): every command gets a
//! Command Complete event, optionally with an injected failure status.
//! Answers can be held back for a number of polls, the way a real controller
//! replies some time after a command was written.

use embassy_futures::yield_now;
use embedded_io_async::{ErrorKind, ErrorType, Read, Write};
use heapless::Vec;
use log::debug;

use crate::hci::{
    MAX_ADV_DATA, OP_LE_SET_ADV_DATA, OP_LE_SET_ADV_ENABLE, OP_READ_BD_ADDR, OP_RESET,
};

const MAX_COMMAND: usize = 4 + 255;
const MAX_PENDING: usize = 64;

pub struct EmulatedController {
    address: [u8; 6],
    command: Vec<u8, MAX_COMMAND>,
    pending: Vec<u8, MAX_PENDING>,
    pending_pos: usize,
    failure: Option<(u16, u8)>,
    latency: usize,
    commands_seen: usize,
    advertising: bool,
    adv_data: Vec<u8, MAX_ADV_DATA>,
}

impl EmulatedController {
    pub fn new(address: [u8; 6]) -> Self {
        Self {
            address,
            command: Vec::new(),
            pending: Vec::new(),
            pending_pos: 0,
            failure: None,
            latency: 0,
            commands_seen: 0,
            advertising: false,
            adv_data: Vec::new(),
        }
    }

    /// Answer `opcode` with `status` instead of success
    pub fn fail_command(mut self, opcode: u16, status: u8) -> Self {
        self.failure = Some((opcode, status));
        self
    }

    /// Keep every read pending for `polls` polls before answering
    pub fn with_latency(mut self, polls: usize) -> Self {
        self.latency = polls;
        self
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    /// Payload of the last `LE Set Advertising Data`
    pub fn advertising_data(&self) -> &[u8] {
        &self.adv_data
    }

    pub fn commands_seen(&self) -> usize {
        self.commands_seen
    }

    fn execute(&mut self) -> Result<(), ErrorKind> {
        let opcode = u16::from_le_bytes([self.command[1], self.command[2]]);
        let params: Vec<u8, 255> =
            Vec::from_slice(&self.command[4..]).map_err(|_| ErrorKind::InvalidInput)?;
        self.command.clear();
        self.commands_seen += 1;
        debug!("Emulated controller: command {:#06x}", opcode);

        let status = match self.failure {
            Some((failing, status)) if failing == opcode => status,
            _ => 0,
        };

        let mut extra: Vec<u8, 6> = Vec::new();
        if status == 0 {
            match opcode {
                OP_RESET => {
                    self.advertising = false;
                    self.adv_data.clear();
                }
                OP_READ_BD_ADDR => {
                    extra
                        .extend_from_slice(&self.address)
                        .map_err(|_| ErrorKind::OutOfMemory)?;
                }
                OP_LE_SET_ADV_DATA => {
                    let len = params.first().map_or(0, |&l| l as usize).min(MAX_ADV_DATA);
                    let data = params.get(1..=len).ok_or(ErrorKind::InvalidInput)?;
                    self.adv_data.clear();
                    self.adv_data
                        .extend_from_slice(data)
                        .map_err(|_| ErrorKind::OutOfMemory)?;
                }
                OP_LE_SET_ADV_ENABLE => {
                    self.advertising = params.first() == Some(&1);
                }
                _ => {}
            }
        }

        if self.pending_pos == self.pending.len() {
            self.pending.clear();
            self.pending_pos = 0;
        }
        let [lo, hi] = opcode.to_le_bytes();
        self.pending
            .extend_from_slice(&[0x04, 0x0E, 4 + extra.len() as u8, 0x01, lo, hi, status])
            .and_then(|()| self.pending.extend_from_slice(&extra))
            .map_err(|_| ErrorKind::OutOfMemory)
    }
}

impl ErrorType for EmulatedController {
    type Error = ErrorKind;
}

impl Read for EmulatedController {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        for _ in 0..self.latency {
            yield_now().await;
        }
        let available = &self.pending[self.pending_pos..];
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.pending_pos += n;
        Ok(n)
    }
}

impl Write for EmulatedController {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        for &byte in buf {
            if self.command.is_empty() && byte != 0x01 {
                return Err(ErrorKind::InvalidData);
            }
            self.command.push(byte).map_err(|_| ErrorKind::OutOfMemory)?;

            if self.command.len() >= 4 && self.command.len() == 4 + self.command[3] as usize {
                self.execute()?;
            }
        }
        Ok(buf.len())
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AdvertisingConfig;
    use embassy_futures::block_on;
    use crate::hci::{HciController, HciError};
    use crate::radio::{Advertiser, AdvertisingError, BdAddr};

    #[test]
    fn test_emulated_bring_up() {
        let config = AdvertisingConfig::new("emu");
        let mut hci = HciController::new(EmulatedController::new([1, 2, 3, 4, 5, 6]), &config);

        block_on(hci.reset()).unwrap();
        assert_eq!(block_on(hci.read_bd_addr()).unwrap(), BdAddr([1, 2, 3, 4, 5, 6]));
        block_on(hci.start_advertising()).unwrap();

        let controller = hci.release();
        assert!(controller.is_advertising());
        assert_eq!(controller.commands_seen(), 5);
        assert_eq!(&controller.advertising_data()[3..], &[4, 0x09, b'e', b'm', b'u']);
    }

    #[test]
    fn test_injected_failure() {
        let config = AdvertisingConfig::new("emu");
        let controller = EmulatedController::new([0; 6]).fail_command(OP_LE_SET_ADV_ENABLE, 0x0C);
        let mut hci = HciController::new(controller, &config);

        assert_eq!(
            block_on(hci.start_advertising()),
            Err(AdvertisingError::Controller(HciError::Status {
                opcode: OP_LE_SET_ADV_ENABLE,
                status: 0x0C
            }))
        );
        assert!(!hci.release().is_advertising());
    }

    #[test]
    fn test_latent_controller_still_answers() {
        let config = AdvertisingConfig::new("late");
        let controller = EmulatedController::new([7; 6]).with_latency(4);
        let mut hci = HciController::new(controller, &config);

        block_on(hci.reset()).unwrap();
        assert_eq!(block_on(hci.read_bd_addr()).unwrap(), BdAddr([7; 6]));
        block_on(hci.start_advertising()).unwrap();
        assert!(hci.release().is_advertising());
    }
}
