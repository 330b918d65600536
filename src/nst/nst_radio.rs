use anyhow::Result;
use tracing::info;

use super::nst_timing::{clock_error_from_percent, OsTime, MAX_CLOCK_ERROR};
use super::{Bandwidth, CodingRate, SpreadingFactor, TestParameters};

/// Which piece of test logic a transport completion belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTag {
    TxTest,
    RxTest,
    RxTimeout,
    RxWindow,
    TxWindow,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RadioEvent {
    TxComplete { job: JobTag, time: OsTime },
    RxComplete { job: JobTag, len: usize, time: OsTime },
    Timer { job: JobTag, time: OsTime },
    Fault(String),
}

impl RadioEvent {
    pub fn job(&self) -> Option<JobTag> {
        match self {
            RadioEvent::TxComplete { job, .. } | RadioEvent::RxComplete { job, .. } | RadioEvent::Timer { job, .. } => Some(*job),
            RadioEvent::Fault(_) => None,
        }
    }
}

impl std::fmt::Display for RadioEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RadioEvent::TxComplete { job, time } => write!(f, "TXCOMPLETE({:?}) @{}", job, time),
            RadioEvent::RxComplete { job, len, time } => write!(f, "RXCOMPLETE({:?}) len={} @{}", job, len, time),
            RadioEvent::Timer { job, time } => write!(f, "TIMER({:?}) @{}", job, time),
            RadioEvent::Fault(msg) => write!(f, "FAULT {}", msg),
        }
    }
}

/// Radio setup derived from the test parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadioConfig {
    pub freq_hz: u32,
    pub sf: SpreadingFactor,
    pub bw: Bandwidth,
    pub cr: CodingRate,
    pub crc: bool,
    pub no_rx_iq_inversion: bool,
    pub lbt_us: u32,
    pub lbt_db_max: i8,
    pub tx_power: i8,
    pub clock_error: u16, /* fraction of MAX_CLOCK_ERROR */
    pub rx_syms: u16,
}

impl RadioConfig {
    pub fn from_params(p: &TestParameters) -> Self {
        Self {
            freq_hz: p.freq,
            sf: p.spreading_factor,
            bw: p.bandwidth,
            cr: p.coding_rate,
            crc: true,
            no_rx_iq_inversion: true,
            lbt_us: p.rx_rssi_interval_us,
            lbt_db_max: p.rx_rssi_db_max,
            tx_power: p.tx_power,
            clock_error: clock_error_from_percent(p.clock_error),
            rx_syms: p.rx_syms,
        }
    }
}

impl std::fmt::Display for RadioConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ceppk = self.clock_error as u32 * 1000 / MAX_CLOCK_ERROR;
        write!(
            f,
            "Freq={}.{:03} MHz, {} {}, TxPwr {} dB, CR {}, CRC={}, LBT={} us/{} dB, clockError={}.{}% ({:#x})",
            self.freq_hz / 1_000_000,
            (self.freq_hz / 1000) % 1000,
            match self.sf {
                SpreadingFactor::Fsk => "FSK".to_string(),
                sf => format!("LoRa {}", sf),
            },
            self.bw,
            self.tx_power,
            self.cr,
            self.crc as u8,
            self.lbt_us,
            self.lbt_db_max,
            ceppk / 10,
            ceppk % 10,
            self.clock_error,
        )
    }
}

/// Snapshot of the transport's view of the radio, recorded with each event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadioState {
    pub busy: bool,
    pub pending: Option<JobTag>,
    pub config: Option<RadioConfig>,
    pub data_len: usize,
    pub txend: OsTime,
    pub rxtime: OsTime,
    pub rx_syms: u16,
}

/// Boundary to the radio and its scheduler.
///
/// Completions are not delivered through callbacks: `run_once` hands back at
/// most one event per call, tagged with the job it was scheduled under. At
/// most one radio operation is pending at a time.
pub trait RadioTransport {
    fn now(&self) -> OsTime;
    fn configure(&mut self, config: &RadioConfig) -> Result<()>;
    /* abort any operation and return to idle */
    fn reset(&mut self);
    fn transmit(&mut self, payload: &[u8], job: JobTag) -> Result<()>;
    fn transmit_at(&mut self, payload: &[u8], at: OsTime, job: JobTag) -> Result<()>;
    /* stay in receive until one frame arrives */
    fn receive_once(&mut self, job: JobTag) -> Result<()>;
    /* open the receiver at `at` for `rx_syms` symbols */
    fn receive_at(&mut self, at: OsTime, rx_syms: u16, job: JobTag) -> Result<()>;
    /* drop the pending radio completion, if any */
    fn clear_callback(&mut self);
    fn set_timed_callback(&mut self, at: OsTime, job: JobTag);
    fn clear_timed_callback(&mut self, job: JobTag);
    fn run_once(&mut self) -> Option<RadioEvent>;
    fn state(&self) -> RadioState;
}

/// Reset the transport and apply the configuration for a new test run.
pub fn setup_radio<R: RadioTransport>(radio: &mut R, params: &TestParameters) -> Result<RadioConfig> {
    radio.reset();
    let config = RadioConfig::from_params(params);
    radio.configure(&config)?;
    info!("radio setup: {}", config);
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_from_default_params() {
        let c = RadioConfig::from_params(&TestParameters::default());
        assert_eq!(c.freq_hz, 902_300_000);
        assert_eq!(c.sf, SpreadingFactor::Sf7);
        assert_eq!(c.clock_error, 0);
        assert!(c.crc);
        assert_eq!(
            c.to_string(),
            "Freq=902.300 MHz, LoRa SF7 BW125, TxPwr 0 dB, CR 4/5, CRC=1, LBT=0 us/-80 dB, clockError=0.0% (0x0)"
        );
    }

    #[test]
    fn clock_error_in_summary() {
        let p = TestParameters { clock_error: 1.0, ..TestParameters::default() };
        let c = RadioConfig::from_params(&p);
        assert_eq!(c.clock_error, 655);
        assert!(c.to_string().ends_with("clockError=0.9% (0x28f)"));
    }

    #[test]
    fn event_job() {
        assert_eq!(RadioEvent::Timer { job: JobTag::RxTimeout, time: 3 }.job(), Some(JobTag::RxTimeout));
        assert_eq!(RadioEvent::Fault("x".into()).job(), None);
    }
}
