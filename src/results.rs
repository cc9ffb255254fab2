//! Result records stored through a channel.
//!
//! These are owned values with explicit capacity limits.  A channel copies
//! what it is given, so the caller's record can be reused straight away.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use heapless::{String, Vec};

/// Most Wi-Fi results held from one scan
pub const MAX_WIFI_RESULTS: usize = 32;

/// Longest GNSS NAV message held
pub const MAX_NAV_MESSAGE_LEN: usize = 259;

/// Longest software or driver version string
pub const MAX_VERSION_STRING_LEN: usize = 10;

/// Longest geocoding string returned by a location result
pub const MAX_GEO_CODING_LEN: usize = 64;

/// Wi-Fi signal type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WifiSignalType {
    B,
    G,
    N,
}

impl WifiSignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WifiSignalType::B => "TYPE_B",
            WifiSignalType::G => "TYPE_G",
            WifiSignalType::N => "TYPE_N",
        }
    }

    /// Code used in binary Wi-Fi result frames.  G and N share a code.
    pub fn serial_code(&self) -> u8 {
        match self {
            WifiSignalType::B => 1,
            WifiSignalType::G | WifiSignalType::N => 2,
        }
    }
}

/// One access point seen by a Wi-Fi scan
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WifiScanResult {
    pub mac_address: [u8; 6],
    pub channel: u8,
    pub signal_type: WifiSignalType,
    pub rssi: i8,
}

/// Scan timings, in microseconds
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WifiTimings {
    pub demodulation_us: u32,
    pub rx_capture_us: u32,
    pub rx_correlation_us: u32,
    pub rx_detection_us: u32,
}

/// All results of one Wi-Fi scan
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WifiScanResults {
    pub results: Vec<WifiScanResult, MAX_WIFI_RESULTS>,
    pub timings: WifiTimings,
}

impl WifiScanResults {
    /// Build from a slice of results.
    ///
    /// # Errors
    ///
    /// - [`crate::Error::Overflow`] if there are more than [`MAX_WIFI_RESULTS`]
    pub fn from_slice(results: &[WifiScanResult], timings: WifiTimings) -> crate::Result<Self> {
        let results = Vec::from_slice(results).map_err(|_| crate::Error::Overflow)?;
        Ok(Self { results, timings })
    }
}

/// Kind of GNSS scan that produced a result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GnssMode {
    Autonomous,
    Assisted,
}

/// GNSS scan timings, in milliseconds
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct GnssTimings {
    pub radio_ms: u32,
    pub computation_ms: u32,
}

/// Result of one GNSS scan
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GnssResults {
    pub mode: GnssMode,
    pub nav_message: Vec<u8, MAX_NAV_MESSAGE_LEN>,
    pub timings: GnssTimings,
    /// Days since the last GPS week-number rollover.  Carried for the device
    /// logic and not sent by any channel.
    pub almanac_age_days: u16,
}

impl GnssResults {
    /// # Errors
    ///
    /// - [`crate::Error::Overflow`] if `nav_message` is longer than
    ///   [`MAX_NAV_MESSAGE_LEN`]
    pub fn new(
        mode: GnssMode,
        nav_message: &[u8],
        timings: GnssTimings,
        almanac_age_days: u16,
    ) -> crate::Result<Self> {
        let nav_message = Vec::from_slice(nav_message).map_err(|_| crate::Error::Overflow)?;
        Ok(Self {
            mode,
            nav_message,
            timings,
            almanac_age_days,
        })
    }
}

/// Which radio the board carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    Transceiver,
    Modem,
}

/// Version and identity record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionInfo {
    pub device: DeviceKind,
    pub software: String<MAX_VERSION_STRING_LEN>,
    pub driver: String<MAX_VERSION_STRING_LEN>,
    pub chip_type: u8,
    pub chip_hw: u8,
    pub chip_fw: u32,
    pub chip_uid: [u8; 8],
    pub almanac_date: u16,
    pub almanac_crc: u32,
}

/// Date and approximate location supplied by a host
#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct DateLocation {
    pub gps_second: u32,
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: f32,
}

/// Location solved by a host from stored results
#[derive(Debug, Default, Clone, PartialEq)]
pub struct LocationResult {
    pub latitude: f32,
    pub longitude: f32,
    pub altitude: f32,
    pub accuracy: f32,
    pub geo_coding: String<MAX_GEO_CODING_LEN>,
}

/// Formats a chip UID as `aa-bb-cc-dd-ee-ff-00-11`.
pub(crate) struct Uid<'a>(pub &'a [u8; 8]);

impl core::fmt::Display for Uid<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("-")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Formats a MAC address as `aa:bb:cc:dd:ee:ff`.
pub(crate) struct Mac<'a>(pub &'a [u8; 6]);

impl core::fmt::Display for Mac<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

/// Formats bytes as contiguous lowercase hex.
pub(crate) struct Hex<'a>(pub &'a [u8]);

impl core::fmt::Display for Hex<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}
