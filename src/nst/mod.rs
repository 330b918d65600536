pub mod error;
pub mod helper;
pub mod nst_cmd;
pub mod nst_console;
pub mod nst_fsm;
pub mod nst_gpio;
pub mod nst_log;
pub mod nst_params;
pub mod nst_radio;
pub mod nst_rwtest;
pub mod nst_rxtest;
pub mod nst_timing;
pub mod nst_twtest;
pub mod nst_txtest;
pub mod sim;

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use error::Error;
use nst_fsm::Fsm;
use nst_gpio::GpioPort;
use nst_log::EventQueue;
use nst_params::ParamStore;
use nst_radio::{RadioEvent, RadioTransport};
use nst_rwtest::RwTest;
use nst_rxtest::RxTest;
use nst_twtest::TwTest;
use nst_txtest::TxTest;

/* payload sent by the tx and tx-window tests */
pub const TX_TEST_DATA: [u8; 4] = [0xCA, 0xFE, 0xF0, 0x0D];

const RX_TIMEOUT_MS_DEFAULT: u32 = 5000;
const TX_INTERVAL_MS_DEFAULT: u32 = 2000;
const RX_RSSI_INTERVAL_US_DEFAULT: u32 = 0; /* LBT disabled */
const TX_TEST_COUNT_DEFAULT: u32 = 3;
const FREQ_DEFAULT: u32 = 902_300_000;
const RX_RSSI_DB_MAX_DEFAULT: i8 = -80;
const CLOCK_ERROR_DEFAULT: f32 = 0.0; /* percent */
const TX_POWER_DEFAULT: i8 = 0;
const RX_SYMS_DEFAULT: u16 = 8;
const RX_COUNT_DEFAULT: u32 = 10;
const WINDOW_START_DEFAULT: i32 = 990_000;
const WINDOW_STOP_DEFAULT: i32 = 1_010_000;
const WINDOW_STEP_DEFAULT: i32 = 1_000;
const TX_PULSE_MS_DEFAULT: u32 = 1;
const TX_GUARD_US_DEFAULT: u32 = 1_000;
const TX_START_US_DEFAULT: u32 = 0;
const PIN_UNASSIGNED: i8 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpreadingFactor {
    #[serde(rename = "FSK")]
    Fsk,
    #[serde(rename = "SF7")]
    Sf7,
    #[serde(rename = "SF8")]
    Sf8,
    #[serde(rename = "SF9")]
    Sf9,
    #[serde(rename = "SF10")]
    Sf10,
    #[serde(rename = "SF11")]
    Sf11,
    #[serde(rename = "SF12")]
    Sf12,
}

impl SpreadingFactor {
    pub fn from_lora_sf(sf: u32) -> Option<Self> {
        match sf {
            7 => Some(SpreadingFactor::Sf7),
            8 => Some(SpreadingFactor::Sf8),
            9 => Some(SpreadingFactor::Sf9),
            10 => Some(SpreadingFactor::Sf10),
            11 => Some(SpreadingFactor::Sf11),
            12 => Some(SpreadingFactor::Sf12),
            _ => None,
        }
    }

    /* None for FSK */
    pub fn lora_sf(&self) -> Option<u32> {
        match self {
            SpreadingFactor::Fsk => None,
            SpreadingFactor::Sf7 => Some(7),
            SpreadingFactor::Sf8 => Some(8),
            SpreadingFactor::Sf9 => Some(9),
            SpreadingFactor::Sf10 => Some(10),
            SpreadingFactor::Sf11 => Some(11),
            SpreadingFactor::Sf12 => Some(12),
        }
    }
}

impl std::fmt::Display for SpreadingFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.lora_sf() {
            None => write!(f, "FSK"),
            Some(sf) => write!(f, "SF{}", sf),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bandwidth {
    Bw125,
    Bw250,
    Bw500,
}

impl Bandwidth {
    pub fn from_khz(khz: u32) -> Option<Self> {
        match khz {
            125 => Some(Bandwidth::Bw125),
            250 => Some(Bandwidth::Bw250),
            500 => Some(Bandwidth::Bw500),
            _ => None,
        }
    }

    /* log2(bw / 125 kHz) */
    pub fn exponent(&self) -> u32 {
        match self {
            Bandwidth::Bw125 => 0,
            Bandwidth::Bw250 => 1,
            Bandwidth::Bw500 => 2,
        }
    }

    pub fn khz(&self) -> u32 {
        125 << self.exponent()
    }
}

impl std::fmt::Display for Bandwidth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BW{}", self.khz())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodingRate {
    #[serde(rename = "4/5")]
    Cr45,
    #[serde(rename = "4/6")]
    Cr46,
    #[serde(rename = "4/7")]
    Cr47,
    #[serde(rename = "4/8")]
    Cr48,
}

impl CodingRate {
    pub fn from_denominator(d: u32) -> Option<Self> {
        match d {
            5 => Some(CodingRate::Cr45),
            6 => Some(CodingRate::Cr46),
            7 => Some(CodingRate::Cr47),
            8 => Some(CodingRate::Cr48),
            _ => None,
        }
    }

    pub fn denominator(&self) -> u8 {
        match self {
            CodingRate::Cr45 => 5,
            CodingRate::Cr46 => 6,
            CodingRate::Cr47 => 7,
            CodingRate::Cr48 => 8,
        }
    }
}

impl std::fmt::Display for CodingRate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "4/{}", self.denominator())
    }
}

mod bandwidth_serde {
    use std::fmt;

    use serde::de;
    use serde::{Deserializer, Serializer};

    use super::Bandwidth;

    pub fn serialize<S>(value: &Bandwidth, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u32(value.khz())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Bandwidth, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct BandwidthVisitor;

        impl<'de> de::Visitor<'de> for BandwidthVisitor {
            type Value = Bandwidth;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a bandwidth of 125, 250 or 500 (kHz)")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                u32::try_from(value)
                    .ok()
                    .and_then(Bandwidth::from_khz)
                    .ok_or_else(|| de::Error::custom(format!("Invalid bandwidth value: {}", value)))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                match u64::try_from(value) {
                    Ok(v) => self.visit_u64(v),
                    Err(_) => Err(de::Error::custom(format!("Invalid bandwidth value: {}", value))),
                }
            }
        }

        deserializer.deserialize_u64(BandwidthVisitor)
    }
}

/// Test configuration. The controller hands each run a snapshot of this.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TestParameters {
    #[serde(rename = "RxTimeout")]
    pub rx_timeout: u32, /* ms, 0 = until stopped */
    #[serde(rename = "TxInterval")]
    pub tx_interval: u32, /* ms */
    #[serde(rename = "LBT.time")]
    pub rx_rssi_interval_us: u32,
    #[serde(rename = "TxTestCount")]
    pub tx_test_count: u32, /* 0 = until stopped */
    #[serde(rename = "Frequency")]
    pub freq: u32, /* Hz */
    #[serde(rename = "ClockError")]
    pub clock_error: f32, /* percent */
    #[serde(rename = "CodingRate")]
    pub coding_rate: CodingRate,
    #[serde(rename = "SpreadingFactor")]
    pub spreading_factor: SpreadingFactor,
    #[serde(rename = "Bandwidth", with = "bandwidth_serde")]
    pub bandwidth: Bandwidth,
    #[serde(rename = "LBT.dB")]
    pub rx_rssi_db_max: i8,
    #[serde(rename = "TxPower")]
    pub tx_power: i8,
    #[serde(rename = "RxSyms")]
    pub rx_syms: u16,
    #[serde(rename = "RxCount")]
    pub rx_count: u32,
    #[serde(rename = "Window.Start")]
    pub window_start: i32, /* us */
    #[serde(rename = "Window.Stop")]
    pub window_stop: i32, /* us */
    #[serde(rename = "Window.Step")]
    pub window_step: i32, /* us */
    #[serde(rename = "RxDigIn")]
    pub rx_dig_in: i8,
    #[serde(rename = "RxDigOut")]
    pub rx_dig_out: i8,
    #[serde(rename = "TxDigOut")]
    pub tx_dig_out: i8,
    #[serde(rename = "TxPulseOut")]
    pub tx_pulse_out: i8,
    #[serde(rename = "TxPulseMs")]
    pub tx_pulse_ms: u32,
    #[serde(rename = "TxGuardUs")]
    pub tx_guard_us: u32,
    #[serde(rename = "TxStartUs")]
    pub tx_start_us: u32,
}

impl Default for TestParameters {
    fn default() -> Self {
        Self {
            rx_timeout: RX_TIMEOUT_MS_DEFAULT,
            tx_interval: TX_INTERVAL_MS_DEFAULT,
            rx_rssi_interval_us: RX_RSSI_INTERVAL_US_DEFAULT,
            tx_test_count: TX_TEST_COUNT_DEFAULT,
            freq: FREQ_DEFAULT,
            clock_error: CLOCK_ERROR_DEFAULT,
            coding_rate: CodingRate::Cr45,
            spreading_factor: SpreadingFactor::Sf7,
            bandwidth: Bandwidth::Bw125,
            rx_rssi_db_max: RX_RSSI_DB_MAX_DEFAULT,
            tx_power: TX_POWER_DEFAULT,
            rx_syms: RX_SYMS_DEFAULT,
            rx_count: RX_COUNT_DEFAULT,
            window_start: WINDOW_START_DEFAULT,
            window_stop: WINDOW_STOP_DEFAULT,
            window_step: WINDOW_STEP_DEFAULT,
            rx_dig_in: PIN_UNASSIGNED,
            rx_dig_out: PIN_UNASSIGNED,
            tx_dig_out: PIN_UNASSIGNED,
            tx_pulse_out: PIN_UNASSIGNED,
            tx_pulse_ms: TX_PULSE_MS_DEFAULT,
            tx_guard_us: TX_GUARD_US_DEFAULT,
            tx_start_us: TX_START_US_DEFAULT,
        }
    }
}

impl TestParameters {
    pub fn from_json_str(text: &str) -> Result<Self> {
        let params: TestParameters = serde_json::from_str(text)?;
        Ok(params)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        Self::from_json_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Per-run counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TestOutcome {
    pub tx_count: u32,
    pub rx_count: u32,
    pub window_hits: u32,
    pub window_tries: u32,
    pub total_hits: u32,
    pub total_tries: u32,
}

impl TestOutcome {
    /* move the current window's counts into the grand totals */
    pub fn fold_window(&mut self) {
        self.total_hits += self.window_hits;
        self.total_tries += self.window_tries;
        self.window_hits = 0;
        self.window_tries = 0;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    None,
    StartTx,
    StartRx,
    StartRxWindow,
    StartTxWindow,
    Stop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Initial,
    Idle,
    TxTest,
    RxTest,
    RxWindowTest,
    TxWindowTest,
    Final,
}

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            State::Initial => "stInitial",
            State::Idle => "stIdle",
            State::TxTest => "stTxTest",
            State::RxTest => "stRxTest",
            State::RxWindowTest => "stRxWindowTest",
            State::TxWindowTest => "stTxWindowTest",
            State::Final => "stFinal",
        };
        write!(f, "{}", s)
    }
}

/// Everything a running test touches. Owned by the controller and lent to
/// the active sub-test for the duration of each poll.
#[derive(Debug)]
pub struct TestContext<R, G> {
    pub params: TestParameters,
    pub outcome: TestOutcome,
    pub radio: R,
    pub gpio: G,
    pub stop_test: bool,
    pub tx_data: Vec<u8>,
}

impl<R: RadioTransport, G: GpioPort> TestContext<R, G> {
    /* a transport call failed: log it and stop whatever is running */
    pub fn radio_fault(&mut self, e: anyhow::Error) {
        error!(e=%e, "ERROR: radio transport failure, stopping test");
        self.stop_test = true;
    }
}

#[derive(Debug)]
pub struct Nst<R, G> {
    fsm: Fsm<State>,
    started: bool,
    exit: bool,
    pending_cmd: Command,
    params: TestParameters,
    ctx: TestContext<R, G>,
    events: EventQueue,
    tx: TxTest,
    rx: RxTest,
    rw: RwTest,
    tw: TwTest,
}

impl<R: RadioTransport, G: GpioPort> Nst<R, G> {
    pub fn new(radio: R, gpio: G, params: TestParameters) -> Self {
        Self {
            fsm: Fsm::new("Nst", State::Initial),
            started: false,
            exit: false,
            pending_cmd: Command::None,
            params: params.clone(),
            ctx: TestContext {
                params,
                outcome: TestOutcome::default(),
                radio,
                gpio,
                stop_test: false,
                tx_data: Vec::new(),
            },
            events: EventQueue::new(),
            tx: TxTest::new(),
            rx: RxTest::new(),
            rw: RwTest::new(),
            tw: TwTest::new(),
        }
    }

    pub fn state(&self) -> State {
        self.fsm.state()
    }

    pub fn params(&self) -> &TestParameters {
        &self.params
    }

    pub fn outcome(&self) -> &TestOutcome {
        &self.ctx.outcome
    }

    pub fn pending_command(&self) -> Command {
        self.pending_cmd
    }

    pub fn radio(&self) -> &R {
        &self.ctx.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.ctx.radio
    }

    pub fn gpio(&self) -> &G {
        &self.ctx.gpio
    }

    pub fn gpio_mut(&mut self) -> &mut G {
        &mut self.ctx.gpio
    }

    pub fn events_mut(&mut self) -> &mut EventQueue {
        &mut self.events
    }

    pub fn rw_test(&self) -> &RwTest {
        &self.rw
    }

    pub fn tw_test(&self) -> &TwTest {
        &self.tw
    }

    fn eval(&mut self) {
        if !self.started {
            return;
        }
        loop {
            let (state, entry) = self.fsm.current();
            let next = self.fsm_dispatch(state, entry);
            if !self.fsm.advance(next) {
                break;
            }
        }
    }

    fn fsm_dispatch(&mut self, current_state: State, entry: bool) -> Option<State> {
        if entry {
            trace!("Nst::fsm_dispatch: enter {}", current_state);
        }

        match current_state {
            State::Initial => {
                self.ctx.tx_data = TX_TEST_DATA.to_vec();
                Some(State::Idle)
            }

            State::Idle => {
                if entry {
                    info!("Idle");
                }
                if self.exit {
                    return Some(State::Final);
                }

                let cmd = std::mem::replace(&mut self.pending_cmd, Command::None);
                let next = match cmd {
                    Command::StartTx => State::TxTest,
                    Command::StartRx => State::RxTest,
                    Command::StartRxWindow => State::RxWindowTest,
                    Command::StartTxWindow => State::TxWindowTest,
                    Command::Stop => {
                        debug!("stop requested while idle");
                        return None;
                    }
                    Command::None => return None,
                };

                /* each run works on a snapshot of the parameters */
                self.ctx.params = self.params.clone();
                self.ctx.outcome = TestOutcome::default();
                self.ctx.stop_test = false;
                Some(next)
            }

            State::TxTest => self.tx.poll(&mut self.ctx, entry).then_some(State::Idle),

            State::RxTest => self.rx.poll(&mut self.ctx, entry).then_some(State::Idle),

            State::RxWindowTest => self.rw.poll(&mut self.ctx, entry).then_some(State::Idle),

            State::TxWindowTest => self.tw.poll(&mut self.ctx, entry).then_some(State::Idle),

            State::Final => {
                if entry {
                    info!("test controller stopped");
                }
                None
            }
        }
    }

    fn handle_radio_event(&mut self, ev: RadioEvent) {
        let now = self.ctx.radio.now();
        let radio_state = self.ctx.radio.state();
        if !self.events.put_event(now, ev.clone(), radio_state) {
            trace!("event queue full, dropping {:?}", ev);
        }

        if let RadioEvent::Fault(msg) = &ev {
            error!(fault=%msg, "ERROR: radio fault");
            self.ctx.stop_test = true;
            return;
        }

        match self.fsm.state() {
            State::TxTest => self.tx.on_radio_event(&mut self.ctx, &ev),
            State::RxTest => self.rx.on_radio_event(&mut self.ctx, &ev),
            State::RxWindowTest => self.rw.on_radio_event(&mut self.ctx, &ev),
            State::TxWindowTest => self.tw.on_radio_event(&mut self.ctx, &ev),
            other => debug!("radio event {:?} ignored in {}", ev, other),
        }
    }
}

pub trait NstTest {
    fn begin(&mut self);
    fn end(&mut self);
    fn poll(&mut self);
    fn ev_stop_test(&mut self);
    fn ev_send_command(&mut self, cmd: Command) -> Result<(), Error>;
    fn get_rx_count(&self) -> u32;
    fn get_param(&self, key: &str) -> Result<String, Error>;
    fn set_param(&mut self, key: &str, value: &str) -> Result<(), Error>;
}

impl<R: RadioTransport, G: GpioPort> NstTest for Nst<R, G> {
    fn begin(&mut self) {
        /* start (or restart) the FSM */
        if !self.started || self.fsm.state() == State::Final {
            self.started = true;
            self.exit = false;
            self.pending_cmd = Command::None;
            self.fsm.reset(State::Initial);
            self.eval();
        }
    }

    fn end(&mut self) {
        if self.started {
            self.exit = true;
            self.ctx.stop_test = true;
            self.eval();
        }
    }

    fn poll(&mut self) {
        if !self.started {
            return;
        }
        /* service the transport once per cycle so its deadlines fire promptly */
        if let Some(ev) = self.ctx.radio.run_once() {
            self.handle_radio_event(ev);
        }
        self.eval();
    }

    fn ev_stop_test(&mut self) {
        self.ctx.stop_test = true;
        self.eval();
    }

    fn ev_send_command(&mut self, cmd: Command) -> Result<(), Error> {
        if self.fsm.state() != State::Idle || self.pending_cmd != Command::None {
            warn!("command {:?} rejected in {}: busy", cmd, self.fsm.state());
            return Err(Error::Busy);
        }

        self.pending_cmd = cmd;
        self.eval();
        Ok(())
    }

    fn get_rx_count(&self) -> u32 {
        self.ctx.outcome.rx_count
    }

    fn get_param(&self, key: &str) -> Result<String, Error> {
        self.params.get_param(key)
    }

    fn set_param(&mut self, key: &str, value: &str) -> Result<(), Error> {
        self.params.set_param(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nst::sim::{SimGpio, SimRadio};

    fn controller() -> Nst<SimRadio, SimGpio> {
        let mut nst = Nst::new(SimRadio::new(), SimGpio::new(), TestParameters::default());
        nst.begin();
        nst
    }

    #[test]
    fn begin_parks_in_idle() {
        let nst = controller();
        assert_eq!(nst.state(), State::Idle);
        assert_eq!(nst.pending_command(), Command::None);
    }

    #[test]
    fn commands_before_begin_are_busy() {
        let mut nst = Nst::new(SimRadio::new(), SimGpio::new(), TestParameters::default());
        assert_eq!(nst.ev_send_command(Command::StartTx), Err(Error::Busy));
        assert_eq!(nst.pending_command(), Command::None);
    }

    #[test]
    fn command_while_running_is_busy_and_leaves_slot_alone() {
        let mut nst = controller();
        nst.set_param("TxTestCount", "0").unwrap();
        nst.ev_send_command(Command::StartTx).unwrap();
        assert_eq!(nst.state(), State::TxTest);

        assert_eq!(nst.ev_send_command(Command::StartRx), Err(Error::Busy));
        assert_eq!(nst.pending_command(), Command::None);
        assert_eq!(nst.state(), State::TxTest);

        nst.ev_stop_test();
        assert_eq!(nst.state(), State::Idle);
    }

    #[test]
    fn stop_command_while_idle_is_consumed() {
        let mut nst = controller();
        nst.ev_send_command(Command::Stop).unwrap();
        assert_eq!(nst.state(), State::Idle);
        assert_eq!(nst.pending_command(), Command::None);
    }

    #[test]
    fn params_are_snapshotted_per_run() {
        let mut nst = controller();
        nst.set_param("TxTestCount", "0").unwrap();
        nst.ev_send_command(Command::StartTx).unwrap();
        nst.set_param("TxTestCount", "7").unwrap();
        assert_eq!(nst.ctx.params.tx_test_count, 0);
        assert_eq!(nst.params().tx_test_count, 7);
        nst.ev_stop_test();
    }

    #[test]
    fn end_reaches_final_from_running_test() {
        let mut nst = controller();
        nst.set_param("RxTimeout", "0").unwrap();
        nst.ev_send_command(Command::StartRx).unwrap();
        assert_eq!(nst.state(), State::RxTest);
        nst.end();
        assert_eq!(nst.state(), State::Final);
        assert_eq!(nst.ev_send_command(Command::StartTx), Err(Error::Busy));

        nst.begin();
        assert_eq!(nst.state(), State::Idle);
    }

    #[test]
    fn radio_fault_forces_stop() {
        let mut nst = controller();
        nst.set_param("RxTimeout", "0").unwrap();
        nst.ev_send_command(Command::StartRx).unwrap();
        nst.radio_mut().inject_fault("spi timeout");
        nst.poll();
        assert_eq!(nst.state(), State::Idle);
    }

    #[test]
    fn parameters_load_from_json() {
        let p = TestParameters::from_json_str(
            r#"{ "SpreadingFactor": "SF9", "Bandwidth": 250, "CodingRate": "4/6", "Window.Step": -500, "RxDigIn": 5 }"#,
        )
        .unwrap();
        assert_eq!(p.spreading_factor, SpreadingFactor::Sf9);
        assert_eq!(p.bandwidth, Bandwidth::Bw250);
        assert_eq!(p.coding_rate, CodingRate::Cr46);
        assert_eq!(p.window_step, -500);
        assert_eq!(p.rx_dig_in, 5);
        assert_eq!(p.tx_test_count, TX_TEST_COUNT_DEFAULT);

        assert!(TestParameters::from_json_str(r#"{ "Bandwidth": 200 }"#).is_err());

        let back = TestParameters::from_json_str(&p.to_json().unwrap()).unwrap();
        assert_eq!(back, p);
    }
}
