use std::time::Instant;

use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, trace};

use crate::nst::nst_radio::{JobTag, RadioConfig, RadioEvent, RadioState, RadioTransport};
use crate::nst::nst_timing::{elapsed, half_symbol, is_due, time_on_air_us, us2osticks_round, OsTime, OSTICKS_PER_SEC, PREAMBLE_SYMS};
use crate::nst::{Bandwidth, CodingRate, SpreadingFactor};

use super::{push_capped, LOG_LIMIT};

/* frames that ended longer ago than this are forgotten */
const AIR_RETENTION: OsTime = 10 * OSTICKS_PER_SEC as OsTime;

#[derive(Debug, Clone)]
enum Clock {
    Manual(OsTime),
    Wall(Instant),
}

/// A frame on the air as seen by this radio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AirFrame {
    pub start: OsTime,
    pub len: usize,
    pub airtime: OsTime,
}

impl AirFrame {
    pub fn end(&self) -> OsTime {
        self.start.wrapping_add(self.airtime)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Pending {
    Tx { job: JobTag, frame: AirFrame },
    RxOnce { job: JobTag, since: OsTime },
    RxAt { job: JobTag, at: OsTime, rx_syms: u16 },
}

impl Pending {
    fn job(&self) -> JobTag {
        match self {
            Pending::Tx { job, .. } | Pending::RxOnce { job, .. } | Pending::RxAt { job, .. } => *job,
        }
    }
}

/// Software radio with a tick clock and a shared "air" of injected frames.
///
/// Transmissions complete after their time on air. A scheduled receive hits
/// a frame when it opens before the frame's preamble has ended and the frame
/// starts before the symbol timeout expires.
#[derive(Debug)]
pub struct SimRadio {
    clock: Clock,
    auto_advance: OsTime,
    config: Option<RadioConfig>,
    pending: Option<Pending>,
    timers: Vec<(JobTag, OsTime)>,
    air: Vec<AirFrame>,
    tx_log: Vec<AirFrame>,
    rx_log: Vec<(OsTime, u16)>,
    log_limit: usize,
    resets: u32,
    loss: f64,
    rng: StdRng,
    fault: Option<String>,
    data_len: usize,
    txend: OsTime,
    rxtime: OsTime,
    rx_syms: u16,
}

impl Default for SimRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl SimRadio {
    /// Manually clocked radio starting at tick 0.
    pub fn new() -> Self {
        Self {
            clock: Clock::Manual(0),
            auto_advance: 0,
            config: None,
            pending: None,
            timers: Vec::new(),
            air: Vec::new(),
            tx_log: Vec::new(),
            rx_log: Vec::new(),
            log_limit: LOG_LIMIT,
            resets: 0,
            loss: 0.0,
            rng: StdRng::seed_from_u64(0),
            fault: None,
            data_len: 0,
            txend: 0,
            rxtime: 0,
            rx_syms: 0,
        }
    }

    pub fn with_wall_clock() -> Self {
        Self { clock: Clock::Wall(Instant::now()), ..Self::new() }
    }

    /* probability that a received frame fails its CRC */
    pub fn with_loss(mut self, loss: f64) -> Self {
        self.loss = loss.clamp(0.0, 1.0);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /* manual clock only: ticks added on every run_once */
    pub fn with_auto_advance(mut self, ticks: OsTime) -> Self {
        self.auto_advance = ticks;
        self
    }

    /* entries kept in tx_log and rx_log; 0 disables recording */
    pub fn with_log_limit(mut self, limit: usize) -> Self {
        self.log_limit = limit;
        self
    }

    pub fn advance(&mut self, ticks: OsTime) {
        if let Clock::Manual(t) = &mut self.clock {
            *t = t.wrapping_add(ticks);
        }
    }

    pub fn set_time(&mut self, now: OsTime) {
        if let Clock::Manual(t) = &mut self.clock {
            *t = now;
        }
    }

    pub fn config(&self) -> Option<&RadioConfig> {
        self.config.as_ref()
    }

    pub fn tx_log(&self) -> &[AirFrame] {
        &self.tx_log
    }

    /* (open time, symbol timeout) of every scheduled receive */
    pub fn rx_log(&self) -> &[(OsTime, u16)] {
        &self.rx_log
    }

    pub fn resets(&self) -> u32 {
        self.resets
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn has_timer(&self, job: JobTag) -> bool {
        self.timers.iter().any(|(j, _)| *j == job)
    }

    /// Put a frame of `len` bytes on the air starting at `start`.
    pub fn inject_frame(&mut self, start: OsTime, len: usize) {
        let frame = AirFrame { start, len, airtime: self.airtime(len) };
        trace!(?frame, "frame injected");
        self.air.push(frame);
    }

    /* next run_once reports this fault */
    pub fn inject_fault(&mut self, msg: &str) {
        self.fault = Some(msg.to_string());
    }

    fn modulation(&self) -> (SpreadingFactor, Bandwidth, CodingRate) {
        match &self.config {
            Some(c) => (c.sf, c.bw, c.cr),
            None => (SpreadingFactor::Sf7, Bandwidth::Bw125, CodingRate::Cr45),
        }
    }

    pub fn airtime(&self, len: usize) -> OsTime {
        let (sf, bw, cr) = self.modulation();
        let size = u8::try_from(len).unwrap_or(u8::MAX);
        us2osticks_round(time_on_air_us(sf, bw, cr, size) as i64)
    }

    fn hsym(&self) -> OsTime {
        let (sf, bw, _) = self.modulation();
        half_symbol(sf, bw)
    }

    fn start_tx(&mut self, payload: &[u8], at: OsTime, job: JobTag) -> Result<()> {
        if self.config.is_none() {
            return Err(anyhow!("transmit before configure"));
        }
        let frame = AirFrame { start: at, len: payload.len(), airtime: self.airtime(payload.len()) };
        debug!(?job, start = at, len = frame.len, "sim tx");
        push_capped(&mut self.tx_log, self.log_limit, frame);
        self.pending = Some(Pending::Tx { job, frame });
        Ok(())
    }

    fn finish_rx(&mut self, job: JobTag, frame: Option<AirFrame>, time: OsTime) -> RadioEvent {
        self.pending = None;
        self.rxtime = time;
        let mut len = frame.map(|f| f.len).unwrap_or(0);
        if len > 0 && self.loss > 0.0 && self.rng.random_bool(self.loss) {
            debug!(?job, "sim rx: frame lost");
            len = 0;
        }
        self.data_len = len;
        RadioEvent::RxComplete { job, len, time }
    }

    fn take_frame(&mut self, idx: usize) -> AirFrame {
        self.air.remove(idx)
    }

    fn poll_pending(&mut self, now: OsTime) -> Option<RadioEvent> {
        match self.pending? {
            Pending::Tx { job, frame } => {
                if !is_due(now, frame.end()) {
                    return None;
                }
                self.pending = None;
                self.txend = frame.end();
                self.data_len = frame.len;
                Some(RadioEvent::TxComplete { job, time: frame.end() })
            }

            Pending::RxOnce { job, since } => {
                let idx = self.air.iter().position(|f| elapsed(f.start, since) >= 0 && is_due(now, f.end()))?;
                let frame = self.take_frame(idx);
                Some(self.finish_rx(job, Some(frame), frame.end()))
            }

            Pending::RxAt { job, at, rx_syms } => {
                let hsym = self.hsym();
                let timeout_end = at.wrapping_add(2 * hsym * rx_syms as OsTime);
                let preamble = 2 * hsym * PREAMBLE_SYMS;
                let hit = self
                    .air
                    .iter()
                    .position(|f| is_due(f.start.wrapping_add(preamble), at) && is_due(timeout_end, f.start));

                match hit {
                    Some(idx) => {
                        if !is_due(now, self.air[idx].end()) {
                            return None;
                        }
                        let frame = self.take_frame(idx);
                        Some(self.finish_rx(job, Some(frame), frame.end()))
                    }
                    None if is_due(now, timeout_end) => Some(self.finish_rx(job, None, timeout_end)),
                    None => None,
                }
            }
        }
    }
}

impl RadioTransport for SimRadio {
    fn now(&self) -> OsTime {
        match &self.clock {
            Clock::Manual(t) => *t,
            Clock::Wall(start) => (start.elapsed().as_micros() as u64 / 16) as u32 as OsTime,
        }
    }

    fn configure(&mut self, config: &RadioConfig) -> Result<()> {
        self.config = Some(*config);
        Ok(())
    }

    fn reset(&mut self) {
        self.pending = None;
        self.resets += 1;
    }

    fn transmit(&mut self, payload: &[u8], job: JobTag) -> Result<()> {
        let now = self.now();
        self.start_tx(payload, now, job)
    }

    fn transmit_at(&mut self, payload: &[u8], at: OsTime, job: JobTag) -> Result<()> {
        self.start_tx(payload, at, job)
    }

    fn receive_once(&mut self, job: JobTag) -> Result<()> {
        if self.config.is_none() {
            return Err(anyhow!("receive before configure"));
        }
        let since = self.now();
        self.pending = Some(Pending::RxOnce { job, since });
        Ok(())
    }

    fn receive_at(&mut self, at: OsTime, rx_syms: u16, job: JobTag) -> Result<()> {
        if self.config.is_none() {
            return Err(anyhow!("receive before configure"));
        }
        debug!(?job, at, rx_syms, "sim rx scheduled");
        push_capped(&mut self.rx_log, self.log_limit, (at, rx_syms));
        self.rx_syms = rx_syms;
        self.pending = Some(Pending::RxAt { job, at, rx_syms });
        Ok(())
    }

    fn clear_callback(&mut self) {
        self.pending = None;
    }

    fn set_timed_callback(&mut self, at: OsTime, job: JobTag) {
        self.timers.retain(|(j, _)| *j != job);
        self.timers.push((job, at));
    }

    fn clear_timed_callback(&mut self, job: JobTag) {
        self.timers.retain(|(j, _)| *j != job);
    }

    fn run_once(&mut self) -> Option<RadioEvent> {
        self.advance(self.auto_advance);
        let now = self.now();

        if let Some(msg) = self.fault.take() {
            self.pending = None;
            return Some(RadioEvent::Fault(msg));
        }

        if let Some(idx) = self.timers.iter().position(|(_, at)| is_due(now, *at)) {
            let (job, _) = self.timers.remove(idx);
            return Some(RadioEvent::Timer { job, time: now });
        }

        self.air.retain(|f| elapsed(now, f.end()) < AIR_RETENTION);
        self.poll_pending(now)
    }

    fn state(&self) -> RadioState {
        RadioState {
            busy: self.pending.is_some(),
            pending: self.pending.map(|p| p.job()),
            config: self.config,
            data_len: self.data_len,
            txend: self.txend,
            rxtime: self.rxtime,
            rx_syms: self.rx_syms,
        }
    }
}
