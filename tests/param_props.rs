use proptest::prelude::*;

use rwc_nst::nst::nst_params::{ParamKey, ParamStore, PARAM_INFO};
use rwc_nst::nst::nst_timing::{adjust_for_drift, elapsed, half_symbol, us2osticks, MAX_RX_SYMS};
use rwc_nst::nst::{Bandwidth, SpreadingFactor, TestParameters};

fn mixed_case(name: &str, mask: u64) -> String {
    name.chars()
        .enumerate()
        .map(|(i, c)| if mask >> (i % 64) & 1 == 1 { c.to_ascii_uppercase() } else { c.to_ascii_lowercase() })
        .collect()
}

proptest! {
    #[test]
    fn unsigned_values_round_trip(v in any::<u32>()) {
        let mut p = TestParameters::default();
        p.set_param("RxTimeout", &v.to_string()).unwrap();
        prop_assert_eq!(p.get_param("RxTimeout").unwrap(), v.to_string());
    }

    #[test]
    fn signed_values_round_trip(v in any::<i32>(), pin in any::<i8>()) {
        let mut p = TestParameters::default();
        p.set_param("Window.Start", &v.to_string()).unwrap();
        p.set_param("RxDigIn", &pin.to_string()).unwrap();
        prop_assert_eq!(p.window_start, v);
        prop_assert_eq!(p.get_param("rxdigin").unwrap(), pin.to_string());
    }

    #[test]
    fn clock_error_round_trips_to_one_decimal(tenths in 0u32..=1000) {
        let text = format!("{}.{}", tenths / 10, tenths % 10);
        let mut p = TestParameters::default();
        p.set_param("ClockError", &text).unwrap();
        prop_assert_eq!(p.get_param("ClockError").unwrap(), format!("{}%", text));
    }

    #[test]
    fn garbage_numbers_are_rejected_without_change(s in "[0-9]{0,3}[a-z +.-][0-9]{0,3}") {
        let mut p = TestParameters::default();
        let before = p.clone();
        prop_assert!(p.set_param("RxCount", &s).is_err());
        prop_assert_eq!(p, before);
    }

    #[test]
    fn keys_match_in_any_case(idx in 0usize..PARAM_INFO.len(), mask in any::<u64>()) {
        let info = &PARAM_INFO[idx];
        prop_assert_eq!(ParamKey::lookup(&mixed_case(info.name, mask)), Some(info.key));
    }

    #[test]
    fn elapsed_is_wrap_safe(base in any::<i32>(), d in 0i32..i32::MAX) {
        prop_assert_eq!(elapsed(base.wrapping_add(d), base), d);
    }

    #[test]
    fn drift_never_shrinks_the_window(delay_us in 1i64..10_000_000, rx_syms in 1u16..64, a in 0u16..2000, b in 0u16..2000) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let hsym = half_symbol(SpreadingFactor::Sf9, Bandwidth::Bw125);
        let delay = us2osticks(delay_us);
        let w_lo = adjust_for_drift(delay, hsym, rx_syms, lo);
        let w_hi = adjust_for_drift(delay, hsym, rx_syms, hi);
        prop_assert!(w_hi.offset <= w_lo.offset);
        prop_assert!(w_hi.rx_syms >= w_lo.rx_syms);
        prop_assert!(w_hi.rx_syms <= MAX_RX_SYMS);
        if lo == 0 {
            prop_assert_eq!(w_lo.offset, delay + (8 - rx_syms as i32) * hsym);
            prop_assert_eq!(w_lo.rx_syms, rx_syms);
        }
    }
}
