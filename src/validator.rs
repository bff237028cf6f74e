//! Response validator (spec.md §4.7): accept/reject predicates plus the
//! offset/delay formulas, kept as one pure function per spec.md §9
//! ("the selector is pure and stateless" — the validator gets the same
//! treatment).

use std::net::SocketAddr;
use std::time::Duration;

use crate::domain::Sample;
use crate::error::Error;
use crate::types::NtpPacket;
use crate::warn;

/// Legacy maximum root delay/dispersion bound, in milliseconds. Hard-coded
/// per spec.md §9(b) — kept as a tunable constant with this default.
pub const MAX_ROOT_DISPERSION_MS: u32 = 100;

/// Validate a decoded packet against every predicate in spec.md §4.7 and, if
/// accepted, compute its [`Sample`].
///
/// `response_time_ms` is `start_time_ms + (response_ticks - request_ticks)`,
/// per spec.md §4.4.
#[allow(clippy::too_many_arguments)]
pub fn validate(
    packet: NtpPacket,
    start_time_ms: i64,
    request_ticks: Duration,
    response_ticks: Duration,
    response_time_ms: i64,
    address: SocketAddr,
) -> Result<Sample, Error> {
    if !(1..16).contains(&packet.stratum) {
        warn!("{address}: rejected, stratum {} out of range", packet.stratum);
        return Err(Error::BadServerResponse);
    }
    if packet.root_delay.duration_ms() >= MAX_ROOT_DISPERSION_MS {
        warn!("{address}: rejected, root_delay over bound");
        return Err(Error::BadServerResponse);
    }
    if packet.root_dispersion.duration_ms() >= MAX_ROOT_DISPERSION_MS {
        warn!("{address}: rejected, root_dispersion over bound");
        return Err(Error::BadServerResponse);
    }
    if packet.mode != 4 {
        warn!("{address}: rejected, mode {} is not server", packet.mode);
        return Err(Error::BadServerResponse);
    }
    if packet.leap_indicator == 3 {
        warn!("{address}: rejected, leap indicator signals unsynchronised");
        return Err(Error::BadServerResponse);
    }

    let t0 = packet.originate_time.unix_millis();
    let t1 = packet.receive_time.unix_millis();
    let t2 = packet.transmit_time.unix_millis();
    let t3 = response_time_ms;

    let offset_ms = ((t1 - t0) + (t2 - t3)) / 2;
    let delay_ms = (t3 - t0) - (t2 - t1);

    if (t1 - t0 - delay_ms).abs() >= 100 {
        warn!("{address}: rejected, originate timestamp fails anti-spoof check");
        return Err(Error::BadServerResponse);
    }

    Ok(Sample {
        packet,
        start_time_ms,
        request_ticks,
        response_ticks,
        response_time_ms,
        offset_ms,
        delay_ms,
        address,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NtpTime32, NtpTime64};

    fn base_packet() -> NtpPacket {
        NtpPacket {
            leap_indicator: 0,
            version: 3,
            mode: 4,
            stratum: 1,
            poll: 0,
            precision: -20,
            root_delay: NtpTime32::default(),
            root_dispersion: NtpTime32::default(),
            reference_id: [0; 4],
            reference_time: NtpTime64::default(),
            originate_time: NtpTime64::default(),
            receive_time: NtpTime64::default(),
            transmit_time: NtpTime64::default(),
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:123".parse().unwrap()
    }

    #[test]
    fn p3_matching_timestamps_yield_zero_offset_and_delay() {
        let mut packet = base_packet();
        let epoch = NtpTime64::from_unix(0, 0);
        packet.originate_time = epoch;
        packet.receive_time = epoch;
        packet.transmit_time = epoch;
        let sample =
            validate(packet, 0, Duration::ZERO, Duration::ZERO, 0, addr()).unwrap();
        assert_eq!(sample.offset_ms, 0);
        assert_eq!(sample.delay_ms, 0);
    }

    #[test]
    fn p4_rejects_high_root_delay() {
        let mut packet = base_packet();
        packet.root_delay = NtpTime32 {
            whole: 0,
            fraction: u16::MAX,
        };
        packet.root_delay.whole = 1; // 1s -> 1000ms >= 100ms bound
        let result = validate(packet, 0, Duration::ZERO, Duration::ZERO, 0, addr());
        assert_eq!(result.unwrap_err(), Error::BadServerResponse);
    }

    #[test]
    fn rejects_unsynchronised_leap_indicator() {
        let mut packet = base_packet();
        packet.leap_indicator = 3;
        let result = validate(packet, 0, Duration::ZERO, Duration::ZERO, 0, addr());
        assert_eq!(result.unwrap_err(), Error::BadServerResponse);
    }

    #[test]
    fn rejects_stratum_16_and_stratum_0() {
        let mut packet = base_packet();
        packet.stratum = 16;
        assert!(validate(packet, 0, Duration::ZERO, Duration::ZERO, 0, addr()).is_err());

        packet.stratum = 0;
        assert!(validate(packet, 0, Duration::ZERO, Duration::ZERO, 0, addr()).is_err());
    }

    #[test]
    fn rejects_non_server_mode() {
        let mut packet = base_packet();
        packet.mode = 3;
        let result = validate(packet, 0, Duration::ZERO, Duration::ZERO, 0, addr());
        assert_eq!(result.unwrap_err(), Error::BadServerResponse);
    }

    #[test]
    fn computes_offset_from_classic_ntp_formula() {
        let mut packet = base_packet();
        packet.originate_time = NtpTime64::from_unix(1_700_000_000, 0);
        packet.receive_time = NtpTime64::from_unix(1_700_000_000, 15_000);
        packet.transmit_time = NtpTime64::from_unix(1_700_000_000, 16_000);
        let response_time_ms = 1_700_000_000_000 + 30;

        let sample = validate(
            packet,
            1_700_000_000_000,
            Duration::ZERO,
            Duration::from_millis(30),
            response_time_ms,
            addr(),
        )
        .unwrap();

        // theta = ((T1-T0)+(T2-T3))/2 = ((15)+(16-30))/2 = 0 (integer division)
        assert_eq!(sample.offset_ms, 0);
        // delta = (T3-T0)-(T2-T1) = 30 - 1 = 29
        assert_eq!(sample.delay_ms, 29);
    }
}
