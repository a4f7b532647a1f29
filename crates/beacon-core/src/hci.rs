//! Minimal HCI command channel over an H4 (UART-style) transport
//!
//! Only the handful of commands needed to bring the controller up and start
//! legacy advertising are implemented. Every command waits until the
//! controller answers with a Command Complete or Command Status event for the
//! same opcode. Controllers answer some time after the command was written,
//! so reads are awaited rather than polled.

use embedded_io_async::{Read, Write};
use heapless::Vec;
use log::{debug, error, info};
use thiserror_no_std::Error;

use crate::config::{AddressMode, AdvertisingConfig};
use crate::radio::{AdvertisingError, Advertiser, BdAddr};

const H4_COMMAND: u8 = 0x01;
const H4_EVENT: u8 = 0x04;

const EVT_COMMAND_COMPLETE: u8 = 0x0E;
const EVT_COMMAND_STATUS: u8 = 0x0F;

pub const OP_RESET: u16 = 0x0C03;
pub const OP_READ_BD_ADDR: u16 = 0x1009;
pub const OP_LE_SET_RANDOM_ADDRESS: u16 = 0x2005;
pub const OP_LE_SET_ADV_PARAMS: u16 = 0x2006;
pub const OP_LE_SET_ADV_DATA: u16 = 0x2008;
pub const OP_LE_SET_ADV_ENABLE: u16 = 0x200A;

/// Legacy advertising payload limit
pub const MAX_ADV_DATA: usize = 31;

/// Unrelated events tolerated while waiting for a command response
const MAX_SKIPPED_EVENTS: usize = 8;

const AD_FLAGS: u8 = 0x01;
const AD_UUID16_COMPLETE: u8 = 0x03;
const AD_NAME_SHORT: u8 = 0x08;
const AD_NAME_COMPLETE: u8 = 0x09;

/// LE General Discoverable, BR/EDR not supported
const FLAGS_GENERAL_DISC_NO_BREDR: u8 = 0x06;

const ADV_IND: u8 = 0x00;
const ADV_NONCONN_IND: u8 = 0x03;
const ALL_CHANNELS: u8 = 0x07;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum HciError {
    #[error("HCI transport failure")]
    Transport,
    #[error("Command {opcode:#06x} failed with status {status:#04x}")]
    Status { opcode: u16, status: u8 },
    #[error("Unexpected H4 packet type {0:#04x}")]
    UnexpectedPacket(u8),
    #[error("No response to command {opcode:#06x}")]
    NoResponse { opcode: u16 },
    #[error("Malformed response to command {opcode:#06x}")]
    MalformedResponse { opcode: u16 },
}

impl HciError {
    /// Numeric code used in fault records. Controller status codes are
    /// positive, local failures negative.
    pub const fn code(&self) -> i32 {
        match self {
            Self::Status { status, .. } => *status as i32,
            Self::Transport => -1,
            Self::UnexpectedPacket(_) => -2,
            Self::NoResponse { .. } => -3,
            Self::MalformedResponse { .. } => -4,
        }
    }

    pub const fn opcode(&self) -> Option<u16> {
        match self {
            Self::Status { opcode, .. }
            | Self::NoResponse { opcode }
            | Self::MalformedResponse { opcode } => Some(*opcode),
            Self::Transport | Self::UnexpectedPacket(_) => None,
        }
    }
}

/// Build the legacy advertising payload: flags, optional 16-bit service UUID
/// and the device name, shortened if it does not fit.
pub fn advertising_payload(config: &AdvertisingConfig<'_>) -> Vec<u8, MAX_ADV_DATA> {
    let mut data = Vec::new();

    // Capacity is checked by hand below, the pushes cannot fail.
    let _ = data.extend_from_slice(&[0x02, AD_FLAGS, FLAGS_GENERAL_DISC_NO_BREDR]);

    if let Some(uuid) = config.service_uuid {
        let [lo, hi] = uuid.to_le_bytes();
        let _ = data.extend_from_slice(&[0x03, AD_UUID16_COMPLETE, lo, hi]);
    }

    let name = config.device_name;
    let room = MAX_ADV_DATA - data.len();
    if room > 2 && !name.is_empty() {
        let (ad_type, cut) = if name.len() + 2 <= room {
            (AD_NAME_COMPLETE, name.len())
        } else {
            let mut cut = room - 2;
            while !name.is_char_boundary(cut) {
                cut -= 1;
            }
            (AD_NAME_SHORT, cut)
        };
        let _ = data.push(cut as u8 + 1);
        let _ = data.push(ad_type);
        let _ = data.extend_from_slice(&name.as_bytes()[..cut]);
    }

    data
}

/// `LE Set Advertising Parameters` command parameters
fn advertising_parameters(config: &AdvertisingConfig<'_>) -> [u8; 15] {
    let (min, max) = config.clamped_intervals();
    let [min_lo, min_hi] = min.to_le_bytes();
    let [max_lo, max_hi] = max.to_le_bytes();
    let adv_type = if config.connectable {
        ADV_IND
    } else {
        ADV_NONCONN_IND
    };

    [
        min_lo,
        min_hi,
        max_lo,
        max_hi,
        adv_type,
        config.address_mode.own_address_type(),
        0x00, // peer address type
        0,
        0,
        0,
        0,
        0,
        0, // peer address
        ALL_CHANNELS,
        0x00, // no filter policy
    ]
}

/// Return parameters of a completed command, status byte stripped
pub type ReturnParams = Vec<u8, 16>;

/// HCI controller driving advertising over an H4 transport
pub struct HciController<T> {
    transport: T,
    adv_params: [u8; 15],
    adv_data: Vec<u8, MAX_ADV_DATA>,
    random_address: Option<[u8; 6]>,
    advertising: bool,
    event_buf: [u8; 255],
}

impl<T: Read + Write> HciController<T> {
    pub fn new(transport: T, config: &AdvertisingConfig<'_>) -> Self {
        let random_address = match config.address_mode {
            AddressMode::Public => None,
            AddressMode::Random(address) => Some(address),
        };

        Self {
            transport,
            adv_params: advertising_parameters(config),
            adv_data: advertising_payload(config),
            random_address,
            advertising: false,
            event_buf: [0; 255],
        }
    }

    pub fn is_advertising(&self) -> bool {
        self.advertising
    }

    /// Give the transport back
    pub fn release(self) -> T {
        self.transport
    }

    pub async fn reset(&mut self) -> Result<(), HciError> {
        self.command(OP_RESET, &[]).await?;
        self.advertising = false;
        Ok(())
    }

    pub async fn read_bd_addr(&mut self) -> Result<BdAddr, HciError> {
        let params = self.command(OP_READ_BD_ADDR, &[]).await?;
        let address: [u8; 6] = params
            .get(..6)
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or(HciError::MalformedResponse {
                opcode: OP_READ_BD_ADDR,
            })?;
        Ok(BdAddr(address))
    }

    pub async fn set_advertise_enable(&mut self, enable: bool) -> Result<(), HciError> {
        self.command(OP_LE_SET_ADV_ENABLE, &[enable as u8]).await?;
        self.advertising = enable;
        Ok(())
    }

    pub async fn stop_advertising(&mut self) -> Result<(), HciError> {
        self.set_advertise_enable(false).await
    }

    async fn configure_advertising(&mut self) -> Result<(), HciError> {
        if let Some(address) = self.random_address {
            self.command(OP_LE_SET_RANDOM_ADDRESS, &address).await?;
        }

        let params = self.adv_params;
        self.command(OP_LE_SET_ADV_PARAMS, &params).await?;

        let mut data = [0u8; MAX_ADV_DATA + 1];
        data[0] = self.adv_data.len() as u8;
        data[1..=self.adv_data.len()].copy_from_slice(&self.adv_data);
        self.command(OP_LE_SET_ADV_DATA, &data).await?;

        Ok(())
    }

    /// Send a command and wait for its completion.
    pub async fn command(&mut self, opcode: u16, params: &[u8]) -> Result<ReturnParams, HciError> {
        self.send(opcode, params).await?;

        for _ in 0..MAX_SKIPPED_EVENTS {
            let (code, len) = self.read_event().await?;
            let event = &self.event_buf[..len];

            match code {
                EVT_COMMAND_COMPLETE if event.len() >= 4 => {
                    let completed = u16::from_le_bytes([event[1], event[2]]);
                    if completed != opcode {
                        debug!("Skipping completion for {:#06x}", completed);
                        continue;
                    }
                    let status = event[3];
                    if status != 0 {
                        return Err(HciError::Status { opcode, status });
                    }
                    let mut ret = ReturnParams::new();
                    let available = (event.len() - 4).min(ret.capacity());
                    let _ = ret.extend_from_slice(&event[4..4 + available]);
                    return Ok(ret);
                }
                EVT_COMMAND_STATUS if event.len() >= 4 => {
                    let pending = u16::from_le_bytes([event[2], event[3]]);
                    let status = event[0];
                    if pending == opcode && status != 0 {
                        return Err(HciError::Status { opcode, status });
                    }
                    debug!("Command status {:#04x} for {:#06x}", status, pending);
                }
                other => debug!("Skipping HCI event {:#04x} ({} bytes)", other, len),
            }
        }

        error!("Controller never answered command {:#06x}", opcode);
        Err(HciError::NoResponse { opcode })
    }

    async fn send(&mut self, opcode: u16, params: &[u8]) -> Result<(), HciError> {
        let [lo, hi] = opcode.to_le_bytes();
        let header = [H4_COMMAND, lo, hi, params.len() as u8];

        let written = match self.transport.write_all(&header).await {
            Ok(()) => self.transport.write_all(params).await,
            Err(e) => Err(e),
        };
        let flushed = match written {
            Ok(()) => self.transport.flush().await,
            Err(e) => Err(e),
        };
        flushed.map_err(|e| {
            error!("HCI write of {:#06x} failed: {:?}", opcode, e);
            HciError::Transport
        })
    }

    /// Read one event into `event_buf`, returning its code and length.
    async fn read_event(&mut self) -> Result<(u8, usize), HciError> {
        let mut header = [0u8; 3];
        self.transport.read_exact(&mut header).await.map_err(|e| {
            error!("HCI read failed: {:?}", e);
            HciError::Transport
        })?;

        if header[0] != H4_EVENT {
            return Err(HciError::UnexpectedPacket(header[0]));
        }

        let len = header[2] as usize;
        self.transport
            .read_exact(&mut self.event_buf[..len])
            .await
            .map_err(|e| {
                error!("HCI read of event body failed: {:?}", e);
                HciError::Transport
            })?;

        Ok((header[1], len))
    }
}

impl<T: Read + Write> Advertiser for HciController<T> {
    async fn start_advertising(&mut self) -> Result<(), AdvertisingError> {
        self.configure_advertising()
            .await
            .map_err(AdvertisingError::Controller)?;
        self.set_advertise_enable(true)
            .await
            .map_err(AdvertisingError::Controller)?;

        info!("Advertising started ({} byte payload)", self.adv_data.len());
        Ok(())
    }
}
