pub mod gpio;
pub mod radio;

pub use gpio::SimGpio;
pub use radio::{AirFrame, SimRadio};

/* default number of entries kept in each inspection log */
pub const LOG_LIMIT: usize = 4096;

/* append to a capped log; once full, the oldest half is dropped */
pub(crate) fn push_capped<T>(log: &mut Vec<T>, limit: usize, item: T) {
    if limit == 0 {
        return;
    }
    if log.len() >= limit {
        log.drain(..(limit + 1) / 2);
    }
    log.push(item);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capped_log_keeps_newest() {
        let mut log = Vec::new();
        for i in 0..10 {
            push_capped(&mut log, 4, i);
        }
        assert!(log.len() <= 4);
        assert_eq!(log.last(), Some(&9));
        assert!(log.windows(2).all(|w| w[0] < w[1]));

        let mut none = Vec::new();
        push_capped(&mut none, 0, 1);
        assert!(none.is_empty());
    }
}
