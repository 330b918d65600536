use tracing::debug;

use super::error::Error;
use super::{Bandwidth, CodingRate, SpreadingFactor, TestParameters};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKey {
    Bandwidth,
    ClockError,
    CodingRate,
    Frequency,
    LbtDb,
    LbtTime,
    RxCount,
    RxDigIn,
    RxDigOut,
    RxSyms,
    RxTimeout,
    SpreadingFactor,
    TxDigOut,
    TxGuardUs,
    TxInterval,
    TxPower,
    TxPulseMs,
    TxPulseOut,
    TxStartUs,
    TxTestCount,
    WindowStart,
    WindowStep,
    WindowStop,
}

#[derive(Debug, Clone, Copy)]
pub struct ParamInfo {
    pub key: ParamKey,
    pub name: &'static str,
    pub help: &'static str,
}

/* listing order for `param` */
pub const PARAM_INFO: [ParamInfo; 23] = [
    ParamInfo { key: ParamKey::Bandwidth, name: "Bandwidth", help: "125, 250, or 500 (kHz)" },
    ParamInfo { key: ParamKey::ClockError, name: "ClockError", help: "clock error (%)" },
    ParamInfo { key: ParamKey::CodingRate, name: "CodingRate", help: "coding rate" },
    ParamInfo { key: ParamKey::Frequency, name: "Frequency", help: "test frequency (Hz)" },
    ParamInfo { key: ParamKey::LbtDb, name: "LBT.dB", help: "listen-before-talk maximum signal (dB)" },
    ParamInfo { key: ParamKey::LbtTime, name: "LBT.time", help: "listen-before-talk measurement time (us)" },
    ParamInfo { key: ParamKey::RxCount, name: "RxCount", help: "receive window repeat count" },
    ParamInfo { key: ParamKey::RxDigIn, name: "RxDigIn", help: "digital input for rx window test" },
    ParamInfo { key: ParamKey::RxDigOut, name: "RxDigOut", help: "digital output to pulse during RX (pin)" },
    ParamInfo { key: ParamKey::RxSyms, name: "RxSyms", help: "packet preamble timeout (symbols)" },
    ParamInfo { key: ParamKey::RxTimeout, name: "RxTimeout", help: "receive timeout (ms)" },
    ParamInfo { key: ParamKey::SpreadingFactor, name: "SpreadingFactor", help: "7-12 or FSK" },
    ParamInfo { key: ParamKey::TxDigOut, name: "TxDigOut", help: "digital output to pulse during TX (pin)" },
    ParamInfo { key: ParamKey::TxGuardUs, name: "TxGuardUs", help: "transmit window guard time (usec)" },
    ParamInfo { key: ParamKey::TxInterval, name: "TxInterval", help: "transmit interval (ms)" },
    ParamInfo { key: ParamKey::TxPower, name: "TxPower", help: "transmit power (dB)" },
    ParamInfo { key: ParamKey::TxPulseMs, name: "TxPulseMs", help: "transmit window pulse width (ms)" },
    ParamInfo { key: ParamKey::TxPulseOut, name: "TxPulseOut", help: "digital output to pulse for timing of TX window (pin)" },
    ParamInfo { key: ParamKey::TxStartUs, name: "TxStartUs", help: "transmit window startup calibration time (usec)" },
    ParamInfo { key: ParamKey::TxTestCount, name: "TxTestCount", help: "transmit test repeat count" },
    ParamInfo { key: ParamKey::WindowStart, name: "Window.Start", help: "receive window start (us)" },
    ParamInfo { key: ParamKey::WindowStep, name: "Window.Step", help: "receive window step (us)" },
    ParamInfo { key: ParamKey::WindowStop, name: "Window.Stop", help: "receive window stop (us)" },
];

impl ParamKey {
    /// Case-insensitive lookup of a parameter name.
    pub fn lookup(name: &str) -> Option<ParamKey> {
        PARAM_INFO.iter().find(|p| p.name.eq_ignore_ascii_case(name)).map(|p| p.key)
    }

    pub fn info(&self) -> &'static ParamInfo {
        /* the table has one entry per key */
        let idx = PARAM_INFO.iter().position(|p| p.key == *self).unwrap_or(0);
        &PARAM_INFO[idx]
    }

    pub fn name(&self) -> &'static str {
        self.info().name
    }
}

pub trait ParamStore {
    fn get_param(&self, name: &str) -> Result<String, Error>;
    fn set_param(&mut self, name: &str, value: &str) -> Result<(), Error>;
    fn get_param_by_key(&self, key: ParamKey) -> String;
    fn set_param_by_key(&mut self, key: ParamKey, value: &str) -> Result<(), Error>;
}

impl ParamStore for TestParameters {
    fn get_param(&self, name: &str) -> Result<String, Error> {
        let key = ParamKey::lookup(name).ok_or_else(|| Error::UnknownKey(name.to_string()))?;
        Ok(self.get_param_by_key(key))
    }

    fn set_param(&mut self, name: &str, value: &str) -> Result<(), Error> {
        let key = ParamKey::lookup(name).ok_or_else(|| Error::UnknownKey(name.to_string()))?;
        self.set_param_by_key(key, value)
    }

    fn get_param_by_key(&self, key: ParamKey) -> String {
        match key {
            ParamKey::Bandwidth => self.bandwidth.khz().to_string(),
            ParamKey::ClockError => format_percent(self.clock_error),
            ParamKey::CodingRate => self.coding_rate.to_string(),
            ParamKey::Frequency => self.freq.to_string(),
            ParamKey::LbtDb => self.rx_rssi_db_max.to_string(),
            ParamKey::LbtTime => self.rx_rssi_interval_us.to_string(),
            ParamKey::RxCount => self.rx_count.to_string(),
            ParamKey::RxDigIn => self.rx_dig_in.to_string(),
            ParamKey::RxDigOut => self.rx_dig_out.to_string(),
            ParamKey::RxSyms => self.rx_syms.to_string(),
            ParamKey::RxTimeout => self.rx_timeout.to_string(),
            ParamKey::SpreadingFactor => match self.spreading_factor.lora_sf() {
                None => "FSK".to_string(),
                Some(sf) => sf.to_string(),
            },
            ParamKey::TxDigOut => self.tx_dig_out.to_string(),
            ParamKey::TxGuardUs => self.tx_guard_us.to_string(),
            ParamKey::TxInterval => self.tx_interval.to_string(),
            ParamKey::TxPower => self.tx_power.to_string(),
            ParamKey::TxPulseMs => self.tx_pulse_ms.to_string(),
            ParamKey::TxPulseOut => self.tx_pulse_out.to_string(),
            ParamKey::TxStartUs => self.tx_start_us.to_string(),
            ParamKey::TxTestCount => self.tx_test_count.to_string(),
            ParamKey::WindowStart => self.window_start.to_string(),
            ParamKey::WindowStep => self.window_step.to_string(),
            ParamKey::WindowStop => self.window_stop.to_string(),
        }
    }

    /* each arm only assigns once the value has parsed */
    fn set_param_by_key(&mut self, key: ParamKey, value: &str) -> Result<(), Error> {
        let invalid = || Error::InvalidValue { key: key.name(), value: value.to_string() };

        match key {
            ParamKey::Bandwidth => self.bandwidth = parse_u32(value).and_then(Bandwidth::from_khz).ok_or_else(invalid)?,
            ParamKey::ClockError => self.clock_error = parse_percent(value).ok_or_else(invalid)?,
            ParamKey::CodingRate => self.coding_rate = parse_coding_rate(value).ok_or_else(invalid)?,
            ParamKey::Frequency => self.freq = parse_u32(value).ok_or_else(invalid)?,
            ParamKey::LbtDb => self.rx_rssi_db_max = parse_i8(value).ok_or_else(invalid)?,
            ParamKey::LbtTime => self.rx_rssi_interval_us = parse_u32(value).ok_or_else(invalid)?,
            ParamKey::RxCount => self.rx_count = parse_u32(value).ok_or_else(invalid)?,
            ParamKey::RxDigIn => self.rx_dig_in = parse_i8(value).ok_or_else(invalid)?,
            ParamKey::RxDigOut => self.rx_dig_out = parse_i8(value).ok_or_else(invalid)?,
            ParamKey::RxSyms => self.rx_syms = parse_u16(value).ok_or_else(invalid)?,
            ParamKey::RxTimeout => self.rx_timeout = parse_u32(value).ok_or_else(invalid)?,
            ParamKey::SpreadingFactor => self.spreading_factor = parse_spreading_factor(value).ok_or_else(invalid)?,
            ParamKey::TxDigOut => self.tx_dig_out = parse_i8(value).ok_or_else(invalid)?,
            ParamKey::TxGuardUs => self.tx_guard_us = parse_u32(value).ok_or_else(invalid)?,
            ParamKey::TxInterval => self.tx_interval = parse_u32(value).ok_or_else(invalid)?,
            ParamKey::TxPower => self.tx_power = parse_i8(value).ok_or_else(invalid)?,
            ParamKey::TxPulseMs => self.tx_pulse_ms = parse_u32(value).ok_or_else(invalid)?,
            ParamKey::TxPulseOut => self.tx_pulse_out = parse_i8(value).ok_or_else(invalid)?,
            ParamKey::TxStartUs => self.tx_start_us = parse_u32(value).ok_or_else(invalid)?,
            ParamKey::TxTestCount => self.tx_test_count = parse_u32(value).ok_or_else(invalid)?,
            ParamKey::WindowStart => self.window_start = parse_i32(value).ok_or_else(invalid)?,
            ParamKey::WindowStep => self.window_step = parse_i32(value).ok_or_else(invalid)?,
            ParamKey::WindowStop => self.window_stop = parse_i32(value).ok_or_else(invalid)?,
        }

        debug!("param {} = {}", key.name(), self.get_param_by_key(key));
        Ok(())
    }
}

fn all_digits(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/* plain decimal digits, no sign, no whitespace */
pub fn parse_u32(s: &str) -> Option<u32> {
    if !all_digits(s) {
        return None;
    }
    s.parse().ok()
}

pub fn parse_u16(s: &str) -> Option<u16> {
    u16::try_from(parse_u32(s)?).ok()
}

/* optional leading '-' followed by digits */
fn parse_signed(s: &str) -> Option<i64> {
    let (neg, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    if !all_digits(digits) || digits.len() > 10 {
        return None;
    }
    let v: i64 = digits.parse().ok()?;
    Some(if neg { -v } else { v })
}

pub fn parse_i8(s: &str) -> Option<i8> {
    i8::try_from(parse_signed(s)?).ok()
}

pub fn parse_i32(s: &str) -> Option<i32> {
    i32::try_from(parse_signed(s)?).ok()
}

/// Percent value: optional integer part, optional '.' with up to 6 fraction
/// digits, optional trailing '%'. At least one digit; result in 0..=100.
pub fn parse_percent(s: &str) -> Option<f32> {
    let s = s.strip_suffix('%').unwrap_or(s);
    let (int_part, frac_part) = match s.split_once('.') {
        Some((i, f)) => (i, f),
        None => (s, ""),
    };
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }

    let int_val = if int_part.is_empty() { 0 } else { parse_u32(int_part)? };
    let mut value = int_val as f64;
    if !frac_part.is_empty() {
        if frac_part.len() > 6 {
            return None;
        }
        let frac_val = parse_u32(frac_part)?;
        value += frac_val as f64 / 10f64.powi(frac_part.len() as i32);
    }

    if value > 100.0 {
        return None;
    }
    Some(value as f32)
}

/* one decimal place */
pub fn format_percent(v: f32) -> String {
    let tenths = (libm::fabsf(v * 10.0) + 0.5) as u32;
    format!("{}.{}%", tenths / 10, tenths % 10)
}

pub fn parse_coding_rate(s: &str) -> Option<CodingRate> {
    let d = s.strip_prefix("4/")?;
    CodingRate::from_denominator(parse_u32(d)?)
}

pub fn parse_spreading_factor(s: &str) -> Option<SpreadingFactor> {
    if s.eq_ignore_ascii_case("fsk") {
        return Some(SpreadingFactor::Fsk);
    }
    SpreadingFactor::from_lora_sf(parse_u32(s)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_ignores_case() {
        assert_eq!(ParamKey::lookup("rxtimeout"), Some(ParamKey::RxTimeout));
        assert_eq!(ParamKey::lookup("WINDOW.START"), Some(ParamKey::WindowStart));
        assert_eq!(ParamKey::lookup("lbt.DB"), Some(ParamKey::LbtDb));
        assert_eq!(ParamKey::lookup("Window"), None);
        for p in PARAM_INFO.iter() {
            assert_eq!(p.key.name(), p.name);
        }
    }

    #[test]
    fn defaults_read_back() {
        let p = TestParameters::default();
        assert_eq!(p.get_param("RxTimeout").unwrap(), "5000");
        assert_eq!(p.get_param("Frequency").unwrap(), "902300000");
        assert_eq!(p.get_param("CodingRate").unwrap(), "4/5");
        assert_eq!(p.get_param("SpreadingFactor").unwrap(), "7");
        assert_eq!(p.get_param("Bandwidth").unwrap(), "125");
        assert_eq!(p.get_param("ClockError").unwrap(), "0.0%");
        assert_eq!(p.get_param("LBT.dB").unwrap(), "-80");
        assert_eq!(p.get_param("Window.Start").unwrap(), "990000");
        assert_eq!(p.get_param("TxPulseOut").unwrap(), "-1");
        assert_eq!(p.get_param("nope"), Err(Error::UnknownKey("nope".to_string())));
    }

    #[test]
    fn set_then_get() {
        let mut p = TestParameters::default();
        p.set_param("spreadingfactor", "fsk").unwrap();
        assert_eq!(p.get_param("SpreadingFactor").unwrap(), "FSK");
        p.set_param("SpreadingFactor", "12").unwrap();
        assert_eq!(p.spreading_factor, SpreadingFactor::Sf12);
        p.set_param("CodingRate", "4/8").unwrap();
        assert_eq!(p.coding_rate, CodingRate::Cr48);
        p.set_param("Bandwidth", "500").unwrap();
        assert_eq!(p.bandwidth, Bandwidth::Bw500);
        p.set_param("Window.Step", "-1000").unwrap();
        assert_eq!(p.window_step, -1000);
        p.set_param("TxPower", "-128").unwrap();
        assert_eq!(p.tx_power, -128);
        p.set_param("RxSyms", "65535").unwrap();
        assert_eq!(p.rx_syms, 65535);
    }

    #[test]
    fn rejected_values_leave_store_untouched() {
        let mut p = TestParameters::default();
        let before = p.clone();
        for (k, v) in [
            ("RxSyms", "65536"),
            ("RxTimeout", "-1"),
            ("RxTimeout", "+5"),
            ("RxTimeout", " 5"),
            ("Frequency", "4294967296"),
            ("TxPower", "128"),
            ("TxPower", "--1"),
            ("Window.Start", "2147483648"),
            ("Bandwidth", "200"),
            ("SpreadingFactor", "6"),
            ("SpreadingFactor", "13"),
            ("CodingRate", "4/9"),
            ("CodingRate", "5/4"),
            ("ClockError", "5x"),
            ("ClockError", "."),
            ("ClockError", "%"),
            ("ClockError", ""),
            ("ClockError", "100.1"),
            ("ClockError", "0.1234567"),
        ] {
            assert!(
                matches!(p.set_param(k, v), Err(Error::InvalidValue { .. })),
                "{} = {:?} should be rejected",
                k,
                v
            );
        }
        assert_eq!(p, before);
    }

    #[test]
    fn percent_forms() {
        assert_eq!(parse_percent("5"), Some(5.0));
        assert_eq!(parse_percent("5%"), Some(5.0));
        assert_eq!(parse_percent(".5"), Some(0.5));
        assert_eq!(parse_percent("5."), Some(5.0));
        assert_eq!(parse_percent("100%"), Some(100.0));
        assert_eq!(parse_percent("0.000001"), Some(0.000001));
        assert_eq!(format_percent(0.25), "0.3%");
        assert_eq!(format_percent(12.34), "12.3%");
        assert_eq!(format_percent(100.0), "100.0%");
    }
}
