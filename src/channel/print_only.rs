//! Print-only channel, used when nothing is attached to the link.
//!
//! Everything is written straight out as human readable text.  Nothing is
//! ever read, so nothing ever blocks on the peer, and fetches always fail.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

use core::fmt::Write;

use crate::channel::{Channel, ChannelKind, Link, write_wifi_line};
use crate::io::{Clock, Transport, TransportWriter, write_text};
use crate::protocol::CommandFactory;
use crate::results::{
    DateLocation, DeviceKind, GnssResults, Hex, LocationResult, Uid, VersionInfo, WifiScanResults,
};
use crate::{Error, Result};

#[derive(Debug, Default)]
pub struct PrintOnly;

impl PrintOnly {
    pub const fn new() -> Self {
        Self
    }
}

impl Channel for PrintOnly {
    fn kind(&self) -> ChannelKind {
        ChannelKind::PrintOnly
    }

    fn log<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        args: core::fmt::Arguments<'_>,
    ) {
        write_text(link.transport, args);
    }

    fn store_wifi<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        results: &WifiScanResults,
    ) {
        let mut w = TransportWriter::new(link.transport);
        let _ = writeln!(w, "# {} Wi-Fi result(s):", results.results.len());
        for result in &results.results {
            let _ = write_wifi_line(&mut w, result, &results.timings);
        }
    }

    fn store_gnss<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        results: &GnssResults,
        delay_since_capture_s: u32,
    ) {
        write_text(
            link.transport,
            format_args!(
                "# GNSS result captured {delay_since_capture_s} second(s) ago:\n{}, {}, {}, {}\n",
                Hex(&results.nav_message),
                delay_since_capture_s,
                results.timings.radio_ms,
                results.timings.computation_ms,
            ),
        );
    }

    fn store_version<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        version: &VersionInfo,
    ) {
        let mut w = TransportWriter::new(link.transport);
        let _ = writeln!(w, "Software version: {}", version.software);
        let _ = writeln!(w, "Driver version: {}", version.driver);
        let _ = match version.device {
            DeviceKind::Transceiver => writeln!(w, "Chip version: 0x{:04x}", version.chip_fw),
            DeviceKind::Modem => writeln!(w, "Chip version: 0x{:06x}", version.chip_fw),
        };
        let _ = writeln!(w, "Almanac date: 0x{:x}", version.almanac_date);
        let _ = writeln!(w, "Chip UID: {}", Uid(&version.chip_uid));
    }

    fn fetch_date_location<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        _link: &mut Link<'_, T, C, F>,
    ) -> Result<DateLocation> {
        Err(Error::NoHost)
    }

    fn fetch_results<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        _link: &mut Link<'_, T, C, F>,
    ) -> Result<LocationResult> {
        Err(Error::NoHost)
    }
}
