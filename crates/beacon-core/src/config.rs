use serde::{Deserialize, Serialize};

/// Default advertising interval: 100 ms in 0.625 ms controller units.
pub const DEFAULT_ADV_INTERVAL: u16 = 0x00A0;

/// Shortest interval the controller accepts (20 ms).
pub const MIN_ADV_INTERVAL: u16 = 0x0020;

/// Longest interval the controller accepts (10.24 s).
pub const MAX_ADV_INTERVAL: u16 = 0x4000;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(bound(deserialize = "'de: 'a"))]
pub struct BringUpConfig<'a> {
    /// Interval between time synchronisations of the secure client.
    pub time_sync_interval_secs: u32,
    pub advertising: AdvertisingConfig<'a>,
}

impl<'a> BringUpConfig<'a> {
    pub const fn new(time_sync_interval_secs: u32, advertising: AdvertisingConfig<'a>) -> Self {
        Self {
            time_sync_interval_secs,
            advertising,
        }
    }

    /// Time-sync interval as handed to the secure client.
    pub fn time_sync_interval_millis(&self) -> u64 {
        u64::from(self.time_sync_interval_secs) * 1000
    }
}

/// Own address used by the controller while advertising
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    #[default]
    Public,
    /// Static random address, little-endian
    Random([u8; 6]),
}

impl AddressMode {
    /// HCI `Own_Address_Type` value
    pub const fn own_address_type(self) -> u8 {
        match self {
            Self::Public => 0x00,
            Self::Random(_) => 0x01,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingConfig<'a> {
    pub device_name: &'a str,
    /// Minimum advertising interval in 0.625 ms units
    pub interval_min: u16,
    /// Maximum advertising interval in 0.625 ms units
    pub interval_max: u16,
    pub address_mode: AddressMode,
    /// Advertise as connectable (`ADV_IND`) instead of `ADV_NONCONN_IND`
    pub connectable: bool,
    /// 16-bit service UUID included in the advertising payload
    pub service_uuid: Option<u16>,
}

impl<'a> AdvertisingConfig<'a> {
    pub const fn new(device_name: &'a str) -> Self {
        Self {
            device_name,
            interval_min: DEFAULT_ADV_INTERVAL,
            interval_max: DEFAULT_ADV_INTERVAL,
            address_mode: AddressMode::Public,
            connectable: false,
            service_uuid: None,
        }
    }

    /// Interval bounds clamped to the controller's accepted range, min <= max.
    pub fn clamped_intervals(&self) -> (u16, u16) {
        let min = self.interval_min.clamp(MIN_ADV_INTERVAL, MAX_ADV_INTERVAL);
        let max = self.interval_max.clamp(min, MAX_ADV_INTERVAL);
        (min, max)
    }
}

impl Default for AdvertisingConfig<'_> {
    fn default() -> Self {
        Self::new("beacon")
    }
}
