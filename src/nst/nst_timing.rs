use anyhow::{anyhow, Result};
use tracing::trace;

use super::{Bandwidth, CodingRate, SpreadingFactor};

/* tick time as kept by the radio transport; wraps, always compare via elapsed() */
pub type OsTime = i32;

pub const US_PER_OSTICK: i64 = 16;
pub const OSTICKS_PER_SEC: i64 = 1_000_000 / US_PER_OSTICK;

/* clock error is expressed as a fraction of this value (65536 == 100%) */
pub const MAX_CLOCK_ERROR: u32 = 65536;

/* LoRa preamble length the window is centred on */
pub const PREAMBLE_SYMS: i32 = 8;
/* SX127x symbol timeout register is 10 bits wide */
pub const MAX_RX_SYMS: u16 = 1023;

/* FSK half-symbol reference duration */
pub const FSK_HSYM_US: u32 = 80;
/* LoRa half-symbol unit: 128 units at SF7/BW125 */
pub const HSYM_UNIT_US: u32 = 4;

/* receiver ramp-up lead: schedule the rx this long before the window opens */
pub const RX_RAMPUP_US: i64 = 2000;

pub fn ms2osticks(ms: u32) -> OsTime {
    (ms as i64 * OSTICKS_PER_SEC / 1000).min(i32::MAX as i64) as OsTime
}

pub fn us2osticks(us: i64) -> OsTime {
    (us / US_PER_OSTICK).clamp(i32::MIN as i64, i32::MAX as i64) as OsTime
}

pub fn us2osticks_round(us: i64) -> OsTime {
    let half = if us < 0 { -US_PER_OSTICK / 2 } else { US_PER_OSTICK / 2 };
    ((us + half) / US_PER_OSTICK).clamp(i32::MIN as i64, i32::MAX as i64) as OsTime
}

pub fn osticks2us(ticks: OsTime) -> i64 {
    ticks as i64 * US_PER_OSTICK
}

pub fn osticks2ms(ticks: OsTime) -> i64 {
    ticks as i64 * US_PER_OSTICK / 1000
}

/* signed distance from `since` to `now`, correct across counter wrap */
pub fn elapsed(now: OsTime, since: OsTime) -> OsTime {
    now.wrapping_sub(since)
}

pub fn is_due(now: OsTime, deadline: OsTime) -> bool {
    elapsed(now, deadline) >= 0
}

/// Half of one modulation symbol, in microseconds.
///
/// LoRa: `(128 >> bw) << (sf - 7)` units of 4 us, so SF7/BW125 is 512 us, each
/// SF step doubles it and each bandwidth doubling halves it. FSK uses a fixed
/// reference duration.
pub fn half_symbol_us(sf: SpreadingFactor, bw: Bandwidth) -> u32 {
    match sf.lora_sf() {
        None => FSK_HSYM_US,
        Some(n) => ((128u32 >> bw.exponent()) << (n - 7)) * HSYM_UNIT_US,
    }
}

pub fn half_symbol(sf: SpreadingFactor, bw: Bandwidth) -> OsTime {
    us2osticks_round(half_symbol_us(sf, bw) as i64)
}

/// Percent (0..=100) to the transport's fraction of `MAX_CLOCK_ERROR`, saturating.
pub fn clock_error_from_percent(percent: f32) -> u16 {
    let ce = libm::fabsf(percent * MAX_CLOCK_ERROR as f32 / 100.0) + 0.5;
    if ce >= u16::MAX as f32 {
        u16::MAX
    } else {
        ce as u16
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowTiming {
    /* delay from the trigger edge to the scheduled rx start */
    pub offset: OsTime,
    /* symbol timeout to program for this window */
    pub rx_syms: u16,
}

/// Adjusts a nominal window delay for receiver symbol timing and clock drift.
///
/// The receiver is opened so that its `rx_syms` symbol timeout is centred on
/// the preamble. With a nonzero clock error the window opens `drift` ticks
/// earlier and the timeout grows by enough symbols to cover the same amount
/// after the nominal point.
pub fn adjust_for_drift(delay: OsTime, hsym: OsTime, rx_syms: u16, clock_error: u16) -> WindowTiming {
    let mut rx_offset = (PREAMBLE_SYMS - rx_syms as i32) * hsym;
    let mut syms = rx_syms as u32;

    if clock_error != 0 && hsym > 0 {
        let drift = ((delay.unsigned_abs() as i64 * clock_error as i64) / MAX_CLOCK_ERROR as i64) as i32;
        /* 2*drift of extra window, 2*hsym per symbol */
        let extra = (drift + hsym - 1) / hsym;
        syms += extra as u32;
        rx_offset -= drift;
        trace!(drift, extra, "window drift adjustment");
    }

    WindowTiming {
        offset: delay.wrapping_add(rx_offset),
        rx_syms: syms.min(MAX_RX_SYMS as u32) as u16,
    }
}

/// LoRa packet time on air in microseconds.
pub fn lora_time_on_air_us(sf: SpreadingFactor, bw: Bandwidth, cr: CodingRate, n_symbol_preamble: u16, crc: bool, size: u8) -> Result<u32> {
    let sf = match sf.lora_sf() {
        Some(n) => n as i32,
        None => return Err(anyhow!("time on air: not a LoRa spreading factor")),
    };

    /* Duration of 1 symbol: 2^SF / BW */
    let t_symbol_us = (1u32 << sf) * 1000 / bw.khz();

    let h = 1; /* explicit header */
    let de = if sf >= 11 && bw == Bandwidth::Bw125 { 1 } else { 0 }; /* low datarate optimization */
    let n_bit_crc = if crc { 16 } else { 0 };

    let num = 8 * size as i32 + n_bit_crc - 4 * sf + 28 - 20 * (1 - h);
    let n_symbol_payload = ((num.max(0) as f64) / (4 * (sf - 2 * de)) as f64).ceil() as u32 * (cr.denominator() as u32);

    let n_symbol = n_symbol_preamble as f64 + 4.25 + 8.0 + n_symbol_payload as f64;
    let toa_us = (n_symbol * t_symbol_us as f64) as u32;

    trace!("LoRa packet ToA: {} us (n_symbol:{}, t_symbol_us:{})", toa_us, n_symbol, t_symbol_us);
    Ok(toa_us)
}

/// FSK (50 kbps) packet time on air in microseconds.
pub fn fsk_time_on_air_us(size: u8) -> u32 {
    /* PREAMBLE(5) + SYNC_WORD(3) + PKT_LEN(1) + PAYLOAD + CRC(2) */
    let bits = 8 * (5 + 3 + 1 + size as u32 + 2);
    bits * 20 + 1
}

pub fn time_on_air_us(sf: SpreadingFactor, bw: Bandwidth, cr: CodingRate, size: u8) -> u32 {
    match lora_time_on_air_us(sf, bw, cr, PREAMBLE_SYMS as u16, true, size) {
        Ok(t) => t,
        Err(_) => fsk_time_on_air_us(size),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_symbol_scales_with_sf_and_bw() {
        let base = half_symbol_us(SpreadingFactor::Sf7, Bandwidth::Bw125);
        assert_eq!(base, 512);
        assert_eq!(half_symbol_us(SpreadingFactor::Sf8, Bandwidth::Bw125), 2 * base);
        assert_eq!(half_symbol_us(SpreadingFactor::Sf12, Bandwidth::Bw125), 512 << 5);
        assert_eq!(half_symbol_us(SpreadingFactor::Sf7, Bandwidth::Bw250), base / 2);
        assert_eq!(half_symbol_us(SpreadingFactor::Sf7, Bandwidth::Bw500), base / 4);
        assert_eq!(half_symbol_us(SpreadingFactor::Fsk, Bandwidth::Bw125), FSK_HSYM_US);
    }

    #[test]
    fn elapsed_survives_wrap() {
        let before = i32::MAX - 10;
        let after = before.wrapping_add(25);
        assert!(after < before);
        assert_eq!(elapsed(after, before), 25);
        assert!(is_due(after, before));
        assert!(!is_due(before, after));
    }

    #[test]
    fn tick_conversions() {
        assert_eq!(ms2osticks(1000), OSTICKS_PER_SEC as OsTime);
        assert_eq!(us2osticks(31), 1);
        assert_eq!(us2osticks_round(24), 2);
        assert_eq!(us2osticks_round(23), 1);
        assert_eq!(osticks2us(us2osticks(990_000)), 990_000);
        assert_eq!(osticks2ms(ms2osticks(2000)), 2000);
    }

    #[test]
    fn clock_error_conversion_saturates() {
        assert_eq!(clock_error_from_percent(0.0), 0);
        assert_eq!(clock_error_from_percent(1.0), 655);
        assert_eq!(clock_error_from_percent(100.0), u16::MAX);
    }

    #[test]
    fn drift_free_window_centres_preamble() {
        let hsym = half_symbol(SpreadingFactor::Sf7, Bandwidth::Bw125);
        let delay = us2osticks(1_000_000);
        let w = adjust_for_drift(delay, hsym, 8, 0);
        assert_eq!(w, WindowTiming { offset: delay, rx_syms: 8 });

        let w = adjust_for_drift(delay, hsym, 5, 0);
        assert_eq!(w.offset, delay + 3 * hsym);
        assert_eq!(w.rx_syms, 5);
    }

    #[test]
    fn drift_opens_window_earlier_and_longer() {
        let hsym = half_symbol(SpreadingFactor::Sf7, Bandwidth::Bw125);
        let delay = us2osticks(1_000_000);
        let ce = clock_error_from_percent(0.1);
        let plain = adjust_for_drift(delay, hsym, 8, 0);
        let drifted = adjust_for_drift(delay, hsym, 8, ce);
        assert!(drifted.offset < plain.offset);
        assert!(drifted.rx_syms > plain.rx_syms);

        let more = adjust_for_drift(delay, hsym, 8, clock_error_from_percent(0.2));
        assert!(more.offset <= drifted.offset);
        assert!(more.rx_syms >= drifted.rx_syms);
    }

    #[test]
    fn rx_syms_clamped() {
        let hsym = half_symbol(SpreadingFactor::Sf7, Bandwidth::Bw500);
        let w = adjust_for_drift(us2osticks(100_000_000), hsym, 1000, clock_error_from_percent(50.0));
        assert_eq!(w.rx_syms, MAX_RX_SYMS);
    }

    #[test]
    fn time_on_air_sf7() {
        let toa = lora_time_on_air_us(SpreadingFactor::Sf7, Bandwidth::Bw125, CodingRate::Cr45, 8, true, 4).unwrap();
        /* 8 + 4.25 + 8 + 10 symbols of 1024 us */
        assert_eq!(toa, 30976);
        assert!(lora_time_on_air_us(SpreadingFactor::Fsk, Bandwidth::Bw125, CodingRate::Cr45, 8, true, 4).is_err());
    }
}
