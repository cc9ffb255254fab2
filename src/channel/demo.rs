//! Demo channel, used when a demo script is attached.
//!
//! The demo protocol is line-oriented ASCII:
//! - `!TOKEN\n` - a command to the script
//! - `@...\n` - a data line for the script to collect
//! - `# ...` - a log line, for the script to display
//!
//! The script answers `!DATE` and `!RESULT` with a single NUL-terminated
//! line:
//!
//! ```text
//! !DATE    ->  gps_second,altitude,latitude,longitude
//! !RESULT  ->  latitude;longitude;altitude;accuracy;geocoding
//! ```

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use core::fmt::Write;
use heapless::Vec;

use crate::channel::line::{line_text, receive_line};
use crate::channel::{Channel, ChannelKind, Link, write_wifi_line};
use crate::io::{Clock, Transport, TransportWriter, write_text};
use crate::protocol::CommandFactory;
use crate::results::{
    DateLocation, DeviceKind, GnssResults, Hex, LocationResult, MAX_GEO_CODING_LEN, Uid,
    VersionInfo, WifiScanResults,
};
use crate::{Error, Result};

/// Default time the script has to answer, between bytes
pub const DEFAULT_REPLY_TIMEOUT_MS: u64 = 5000;

pub const TOKEN_DATE: &str = "DATE";
pub const TOKEN_RESULT: &str = "RESULT";
pub const TOKEN_SEND: &str = "SEND";
pub const TOKEN_FLUSH: &str = "FLUSH";
pub const TOKEN_VERSION: &str = "VERSION";

const DATE_REPLY_LEN: usize = 64;
const RESULT_REPLY_LEN: usize = 128;

// Days from the GPS epoch (6th January 1980) to the week-number rollover of
// 7th April 2019.
const DAYS_FROM_GPS_EPOCH_TO_2019_ROLLOVER: u16 = 14336;

/// Convert an almanac age, in days since the last GPS week-number rollover,
/// to days since the GPS epoch.
///
/// Assumes the last rollover was the April 2019 one.
///
/// No channel output carries the almanac age.  This is for device logic
/// filling [`GnssResults::almanac_age_days`] or reporting it on a display.
// TODO: Replace the fixed rollover before the next one, around 2038.
pub fn almanac_age_days_since_gps_epoch(almanac_age_days: u16) -> u16 {
    almanac_age_days.wrapping_add(DAYS_FROM_GPS_EPOCH_TO_2019_ROLLOVER)
}

#[derive(Debug)]
pub struct Demo {
    reply_timeout_ms: u64,
}

impl Demo {
    /// Arguments:
    /// - `reply_timeout_ms` - Longest silence tolerated from the script, before
    ///   its reply starts or between two bytes of it
    pub const fn new(reply_timeout_ms: u64) -> Self {
        Self { reply_timeout_ms }
    }

    pub fn reply_timeout_ms(&self) -> u64 {
        self.reply_timeout_ms
    }
}

impl Channel for Demo {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Demo
    }

    fn log<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        args: core::fmt::Arguments<'_>,
    ) {
        write_text(link.transport, format_args!("# {args}"));
    }

    fn store_wifi<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
        results: &WifiScanResults,
    ) {
        let mut w = TransportWriter::new(link.transport);
        for result in &results.results {
            let _ = w.write_str("@");
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
                "@{}, {}, {}, {}\n",
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
        let _ = write!(w, "@{TOKEN_VERSION}:{}:{}:", version.software, version.driver);
        let _ = match version.device {
            DeviceKind::Transceiver => write!(w, "0x{:04x}", version.chip_fw),
            DeviceKind::Modem => write!(w, "0x{:06x}", version.chip_fw),
        };
        let _ = writeln!(
            w,
            ":0x{:x}:{}",
            version.almanac_date,
            Uid(&version.chip_uid)
        );
    }

    fn erase_stored<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
    ) {
        send_command(link.transport, TOKEN_FLUSH);
    }

    fn send_stored<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
    ) {
        send_command(link.transport, TOKEN_SEND);
    }

    fn fetch_date_location<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
    ) -> Result<DateLocation> {
        let mut reply: Vec<u8, DATE_REPLY_LEN> = Vec::new();
        self.ask(link, TOKEN_DATE, &mut reply)
            .inspect_err(|e| warn!("No date from demo host: {e}"))?;
        parse_date_location(line_text(&reply)?)
    }

    fn fetch_results<T: Transport, C: Clock, F: CommandFactory>(
        &mut self,
        link: &mut Link<'_, T, C, F>,
    ) -> Result<LocationResult> {
        let mut reply: Vec<u8, RESULT_REPLY_LEN> = Vec::new();
        let status = self.ask(link, TOKEN_RESULT, &mut reply);
        self.log(link, format_args!("GetResult status: 0x{:x}\n", status_code(&status)));
        status.inspect_err(|e| warn!("No result from demo host: {e}"))?;
        parse_location_result(line_text(&reply)?)
    }
}

// Internal functions
impl Demo {
    // Send a command to the script, then collect its one line reply.
    fn ask<T: Transport, C: Clock, F: CommandFactory, const N: usize>(
        &self,
        link: &mut Link<'_, T, C, F>,
        token: &str,
        reply: &mut Vec<u8, N>,
    ) -> Result<()> {
        send_command(link.transport, token);
        link.transport.start();
        let status = receive_line(link.transport, link.clock, reply, self.reply_timeout_ms);
        link.transport.stop();
        status
    }
}

fn send_command<T: Transport>(transport: &mut T, token: &str) {
    write_text(transport, format_args!("!{token}\n"));
}

// Status code reported to the script after a result request.
fn status_code(status: &Result<()>) -> u8 {
    match status {
        Ok(()) => 0,
        Err(Error::Timeout) => 1,
        Err(Error::Overflow) => 2,
        Err(_) => 3,
    }
}

/// Parse a `gps_second,altitude,latitude,longitude` date reply.
///
/// # Errors
///
/// - [`Error::Malformed`] if a field is missing or doesn't parse
pub fn parse_date_location(text: &str) -> Result<DateLocation> {
    let mut fields = text.split(',').map(str::trim);
    let mut next = || fields.next().ok_or(Error::Malformed);
    let gps_second = next()?.parse().map_err(|_| Error::Malformed)?;
    let altitude = next()?.parse().map_err(|_| Error::Malformed)?;
    let latitude = next()?.parse().map_err(|_| Error::Malformed)?;
    let longitude = next()?.parse().map_err(|_| Error::Malformed)?;
    Ok(DateLocation {
        gps_second,
        latitude,
        longitude,
        altitude,
    })
}

/// Parse a `latitude;longitude;altitude;accuracy;geocoding` result reply.
///
/// The geocoding runs to the first tab or newline, and is cut short if it
/// doesn't fit in [`MAX_GEO_CODING_LEN`] bytes.  It may be absent.
///
/// # Errors
///
/// - [`Error::Malformed`] if a numeric field is missing or doesn't parse
pub fn parse_location_result(text: &str) -> Result<LocationResult> {
    let mut fields = text.splitn(5, ';');
    let mut number = || -> Result<f32> {
        fields
            .next()
            .ok_or(Error::Malformed)?
            .trim()
            .parse()
            .map_err(|_| Error::Malformed)
    };
    let latitude = number()?;
    let longitude = number()?;
    let altitude = number()?;
    let accuracy = number()?;

    let mut result = LocationResult {
        latitude,
        longitude,
        altitude,
        accuracy,
        ..Default::default()
    };
    if let Some(geo) = fields.next() {
        let geo = geo.split(['\t', '\n']).next().unwrap_or_default();
        for c in geo.chars() {
            if result.geo_coding.push(c).is_err() {
                debug!("Geocoding cut short at {MAX_GEO_CODING_LEN} bytes");
                break;
            }
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Engine, EngineConfig};
    use crate::results::{GnssMode, samples};
    use crate::testing::{MockClock, MockTransport, TestFactory, leak_signals};
    use std::string::String;

    struct Parts {
        transport: MockTransport,
        clock: MockClock,
        engine: Engine<TestFactory>,
    }

    impl Parts {
        fn new() -> Self {
            Self {
                transport: MockTransport::new(),
                clock: MockClock::auto(1),
                engine: Engine::new(TestFactory::new(), leak_signals(), EngineConfig::default()),
            }
        }

        fn link(&mut self) -> Link<'_, MockTransport, MockClock, TestFactory> {
            Link {
                transport: &mut self.transport,
                clock: &self.clock,
                engine: &mut self.engine,
            }
        }
    }

    #[test]
    fn data_lines_are_prefixed() {
        let mut parts = Parts::new();
        let mut demo = Demo::new(DEFAULT_REPLY_TIMEOUT_MS);
        demo.store_wifi(&mut parts.link(), &samples::wifi());
        demo.store_gnss(&mut parts.link(), &samples::gnss(GnssMode::Assisted), 3);
        assert_eq!(
            parts.transport.sent_text(),
            "@00:11:22:33:44:55, CHANNEL_6, TYPE_G, -70, 1, 2, 3, 4\n\
             @aa:bb:cc:dd:ee:ff, CHANNEL_11, TYPE_B, -81, 1, 2, 3, 4\n\
             @01abff, 3, 120, 30\n"
        );
    }

    #[test]
    fn version_line() {
        let mut parts = Parts::new();
        let mut demo = Demo::new(DEFAULT_REPLY_TIMEOUT_MS);
        demo.store_version(&mut parts.link(), &samples::version(DeviceKind::Transceiver));
        assert_eq!(
            parts.transport.sent_text(),
            "@VERSION:v1.4.0:v2.0.1:0x0307:0x1a2b:00-01-02-03-04-05-06-ab\n"
        );
    }

    #[test]
    fn log_and_commands() {
        let mut parts = Parts::new();
        let mut demo = Demo::new(DEFAULT_REPLY_TIMEOUT_MS);
        demo.log(&mut parts.link(), format_args!("scan {} done\n", 2));
        demo.send_stored(&mut parts.link());
        demo.erase_stored(&mut parts.link());
        assert_eq!(parts.transport.sent_text(), "# scan 2 done\n!SEND\n!FLUSH\n");
    }

    #[test]
    fn date_is_fetched_and_parsed() {
        let mut parts = Parts::new();
        parts.transport.push_incoming(b"1300000000,12.5,45.25,5.75\0");
        let mut demo = Demo::new(DEFAULT_REPLY_TIMEOUT_MS);

        let date = demo.fetch_date_location(&mut parts.link()).unwrap();
        assert_eq!(
            date,
            DateLocation {
                gps_second: 1_300_000_000,
                latitude: 45.25,
                longitude: 5.75,
                altitude: 12.5,
            }
        );
        assert_eq!(parts.transport.sent_text(), "!DATE\n");
        assert!(!parts.transport.receiving);
    }

    #[test]
    fn silent_script_times_out() {
        let mut parts = Parts::new();
        let mut demo = Demo::new(200);
        assert_eq!(
            demo.fetch_date_location(&mut parts.link()),
            Err(Error::Timeout)
        );
        assert!(parts.clock.now() > 200);
    }

    #[test]
    fn result_fetch_reports_status() {
        let mut parts = Parts::new();
        parts
            .transport
            .push_incoming(b"45.5;5.25;200;30;Grenoble, France\n\0");
        let mut demo = Demo::new(DEFAULT_REPLY_TIMEOUT_MS);

        let result = demo.fetch_results(&mut parts.link()).unwrap();
        assert_eq!(result.latitude, 45.5);
        assert_eq!(result.accuracy, 30.0);
        assert_eq!(result.geo_coding.as_str(), "Grenoble, France");
        assert_eq!(
            parts.transport.sent_text(),
            "!RESULT\n# GetResult status: 0x0\n"
        );

        parts.transport.clear_sent();
        let mut demo = Demo::new(10);
        assert_eq!(
            demo.fetch_results(&mut parts.link()).map(|_| ()),
            Err(Error::Timeout)
        );
        assert_eq!(
            parts.transport.sent_text(),
            "!RESULT\n# GetResult status: 0x1\n"
        );
    }

    #[test]
    fn garbled_replies_are_malformed() {
        assert_eq!(parse_date_location("12,abc,1,2"), Err(Error::Malformed));
        assert_eq!(parse_date_location("12,1,2"), Err(Error::Malformed));
        assert_eq!(
            parse_location_result("1;2;3").map(|_| ()),
            Err(Error::Malformed)
        );
    }

    #[test]
    fn geocoding_is_optional_and_bounded() {
        let result = parse_location_result("1;2;3;4").unwrap();
        assert!(result.geo_coding.is_empty());

        let long: String = core::iter::repeat_n('x', MAX_GEO_CODING_LEN + 10).collect();
        let text = std::format!("1;2;3;4;{long}\tignored");
        let result = parse_location_result(&text).unwrap();
        assert_eq!(result.geo_coding.len(), MAX_GEO_CODING_LEN);
    }

    #[test]
    fn almanac_age_is_offset_from_gps_epoch() {
        assert_eq!(almanac_age_days_since_gps_epoch(0), 14336);
        assert_eq!(almanac_age_days_since_gps_epoch(500), 14836);
    }
}
