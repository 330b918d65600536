use std::fmt;

use super::nst_radio::{RadioEvent, RadioState};
use super::nst_timing::{osticks2ms, OsTime};

pub const EVENT_QUEUE_SIZE: usize = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct EventNode {
    pub time: OsTime,
    pub event: RadioEvent,
    pub state: RadioState,
}

impl fmt::Display for EventNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} ms): {}", self.time, osticks2ms(self.time), self.event)?;
        if let Some(c) = &self.state.config {
            write!(
                f,
                ": freq={}.{:03} rps=({} {} CR {}{})",
                c.freq_hz / 1_000_000,
                (c.freq_hz / 1000) % 1000,
                c.sf,
                c.bw,
                c.cr,
                if c.crc { " Crc" } else { "" }
            )?;
        }
        match self.event {
            RadioEvent::TxComplete { .. } => write!(f, " txend={} len={}", self.state.txend, self.state.data_len),
            RadioEvent::RxComplete { .. } => write!(f, " rxtime={} rxsyms={} len={}", self.state.rxtime, self.state.rx_syms, self.state.data_len),
            _ => Ok(()),
        }
    }
}

/// Bounded record of transport events, oldest first. New events are dropped
/// while the queue is full.
#[derive(Debug, Clone)]
pub struct EventQueue {
    queue: [Option<EventNode>; EVENT_QUEUE_SIZE],
    head: usize, /* next slot to be read */
    size: usize, /* current size */
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl EventQueue {
    pub fn new() -> Self {
        Self { queue: std::array::from_fn(|_| None), head: 0, size: 0 }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn put_event(&mut self, time: OsTime, event: RadioEvent, state: RadioState) -> bool {
        if self.size == EVENT_QUEUE_SIZE {
            return false;
        }
        let tail = (self.head + self.size) % EVENT_QUEUE_SIZE;
        self.queue[tail] = Some(EventNode { time, event, state });
        self.size += 1;
        true
    }

    pub fn get_event(&mut self) -> Option<EventNode> {
        if self.size == 0 {
            return None;
        }
        let node = self.queue[self.head].take();
        self.head = (self.head + 1) % EVENT_QUEUE_SIZE;
        self.size -= 1;
        node
    }

    pub fn drain(&mut self) -> impl Iterator<Item = EventNode> + '_ {
        std::iter::from_fn(move || self.get_event())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nst::nst_radio::JobTag;

    fn ev(t: OsTime) -> RadioEvent {
        RadioEvent::Timer { job: JobTag::RxTimeout, time: t }
    }

    #[test]
    fn fifo_order_across_wrap() {
        let mut q = EventQueue::new();
        for round in 0..3 {
            for i in 0..20 {
                assert!(q.put_event(round * 100 + i, ev(i), RadioState::default()));
            }
            let times: Vec<OsTime> = q.drain().map(|n| n.time).collect();
            assert_eq!(times, (0..20).map(|i| round * 100 + i).collect::<Vec<_>>());
            assert!(q.is_empty());
        }
    }

    #[test]
    fn full_queue_rejects() {
        let mut q = EventQueue::new();
        for i in 0..EVENT_QUEUE_SIZE as OsTime {
            assert!(q.put_event(i, ev(i), RadioState::default()));
        }
        assert!(!q.put_event(99, ev(99), RadioState::default()));
        assert_eq!(q.len(), EVENT_QUEUE_SIZE);
        assert_eq!(q.get_event().map(|n| n.time), Some(0));
        assert!(q.put_event(99, ev(99), RadioState::default()));
    }

    #[test]
    fn node_display() {
        let node = EventNode { time: 62500, event: ev(62500), state: RadioState::default() };
        assert_eq!(node.to_string(), "62500 (1000 ms): TIMER(RxTimeout) @62500");
    }
}
