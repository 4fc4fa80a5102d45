//! Adaptive delay calibrator: finds a per-group stable time threshold `T*`
//! via a monotone-upward stability search (C4).

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::event::Event;
use crate::generator::generate_sequences;

/// Tuning constants for the calibrator. Field names mirror the
/// `PARAMETERS` section of the configuration file (`SPEC_FULL.md` §4.8).
#[derive(Debug, Clone, Copy)]
pub struct CalibratorParams {
    pub t_init: u64,
    pub t_inc: u64,
    pub t_inc_stable: u64,
    pub n: u64,
    /// Upper bound on the search; exceeding it is a `NonConvergent` error.
    /// This is this implementation's addition over the source, which has no
    /// bounded termination (`SPEC_FULL.md` REDESIGN FLAGS).
    pub t_max: u64,
    pub debounce_secs: i64,
}

/// `pairs(T)`: the total edge count (including virtual edges) summed across
/// every sequence the generator would emit for `events` at delay `t_secs`.
fn pairs(events: &[Event], t_secs: u64, debounce_secs: i64) -> u64 {
    generate_sequences(events.iter().cloned(), t_secs as i64, debounce_secs)
        .map(|s| s.size() as u64)
        .sum()
}

/// Runs the stability search for one group's event stream.
///
/// Returns the discovered threshold together with the learning-curve trace
/// frame (`T'` to `pairs(T')`, `SPEC_FULL.md` §4.4), or `Err(NonConvergent)`
/// if the search exceeds `params.t_max` without stabilizing.
pub fn calibrate(
    events: &[Event],
    group: &str,
    params: &CalibratorParams,
) -> Result<(u64, BTreeMap<u64, u64>)> {
    if events.is_empty() {
        return Err(Error::EmptyStream(group.to_string()));
    }

    let mut trace: BTreeMap<u64, u64> = BTreeMap::new();
    let steps = params.t_inc_stable / params.t_inc;
    let mut t = params.t_init;

    loop {
        if t > params.t_max {
            return Err(Error::NonConvergent {
                group: group.to_string(),
                t_max: params.t_max,
            });
        }

        let window: Vec<(u64, u64)> = (0..=steps)
            .map(|i| {
                let t_prime = t + i * params.t_inc;
                let value = *trace
                    .entry(t_prime)
                    .or_insert_with(|| pairs(events, t_prime, params.debounce_secs));
                (t_prime, value)
            })
            .collect();

        let mut next_t = None;
        for pair in window.windows(2) {
            let (t_prime, a) = pair[0];
            let (_, b) = pair[1];
            if a.abs_diff(b) > params.n {
                next_t = Some(t_prime + params.t_inc);
                break;
            }
        }

        match next_t {
            Some(advanced) => {
                tracing::debug!(group, t, advanced, "calibrator window unstable, advancing");
                t = advanced;
            }
            None => {
                tracing::info!(group, t_star = t, "calibrator converged");
                return Ok((t, trace));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Item;
    use chrono::{DateTime, Utc};
    use std::collections::BTreeSet;

    fn ev(name: &str, secs: i64) -> Event {
        Event::new(
            Item::new(name, "off", "on"),
            DateTime::<Utc>::from_timestamp(secs, 0).unwrap(),
            BTreeSet::new(),
        )
    }

    #[test]
    fn s1_calibrator_stability() {
        // Two events 60s apart. The scanning window (t_init=55..70) straddles
        // the 60s gap, so the first window is unstable (pairs jumps 0 -> 1 at
        // the 55->60 step) and the search advances to T=60, where the next
        // window (60..75) is flat and the search converges.
        let events = vec![ev("a", 0), ev("b", 60)];
        let params = CalibratorParams {
            t_init: 55,
            t_inc: 5,
            t_inc_stable: 15,
            n: 0,
            t_max: 1000,
            debounce_secs: 1,
        };
        let (t_star, trace) = calibrate(&events, "g", &params).unwrap();
        assert_eq!(t_star, 60);
        assert_eq!(trace[&55], 0);
        assert_eq!(trace[&60], 1);
    }

    #[test]
    fn empty_stream_is_an_error() {
        let params = CalibratorParams {
            t_init: 30,
            t_inc: 5,
            t_inc_stable: 15,
            n: 0,
            t_max: 1000,
            debounce_secs: 1,
        };
        let err = calibrate(&[], "g", &params).unwrap_err();
        assert!(matches!(err, Error::EmptyStream(_)));
    }

    #[test]
    fn s8_non_convergent_guard() {
        // Consecutive gaps grow by 1 second each time (1, 2, 3, ...), so
        // every unit increase of T bridges exactly one more gap and
        // pairs(T) never stops changing before t_max is exhausted.
        let mut t = 0i64;
        let mut events = vec![ev("item0", t)];
        for i in 1..=55i64 {
            t += i;
            events.push(ev(&format!("item{i}"), t));
        }
        let params = CalibratorParams {
            t_init: 1,
            t_inc: 1,
            t_inc_stable: 2,
            n: 0,
            t_max: 50,
            debounce_secs: 1,
        };
        let err = calibrate(&events, "g", &params).unwrap_err();
        assert!(matches!(err, Error::NonConvergent { .. }));
    }
}
