//! Sequence generator: segments an ordered event stream into sequences
//! under a given delay (C5).

use crate::event::Event;
use crate::sequence::EventSequence;

/// Lazily segments `events` (must already be ordered by ascending
/// timestamp) into [`EventSequence`]s under delay `delay_secs`, debouncing
/// immediate item repeats within `debounce_secs`.
///
/// Mirrors the source's generator function: each `next()` call either
/// extends the current sequence or, upon hitting a segmentation boundary,
/// yields the finished sequence and starts a fresh one rooted at the event
/// that didn't fit.
pub fn generate_sequences(
    events: impl IntoIterator<Item = Event>,
    delay_secs: i64,
    debounce_secs: i64,
) -> impl Iterator<Item = EventSequence> {
    SequenceGenerator {
        events: events.into_iter(),
        current: EventSequence::new(),
        prev: None,
        delay_secs,
        debounce_secs,
        finished: false,
    }
}

struct SequenceGenerator<I> {
    events: I,
    current: EventSequence,
    prev: Option<Event>,
    delay_secs: i64,
    debounce_secs: i64,
    finished: bool,
}

impl<I: Iterator<Item = Event>> Iterator for SequenceGenerator<I> {
    type Item = EventSequence;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            let Some(event) = self.events.next() else {
                self.finished = true;
                return if self.current.node_count() > 0 {
                    Some(std::mem::take(&mut self.current))
                } else {
                    None
                };
            };

            if let Some(prev) = &self.prev {
                if *prev == event {
                    let gap = (event.timestamp - prev.timestamp).num_seconds();
                    if gap < self.debounce_secs {
                        self.prev = Some(event);
                        continue;
                    }
                }
            }

            if self.current.add_event(&event, self.delay_secs) {
                self.prev = Some(event);
                continue;
            }

            let finished_sequence = std::mem::take(&mut self.current);
            let added = self.current.add_event(&event, self.delay_secs);
            debug_assert!(added, "a fresh sequence must always accept its first event");
            self.prev = Some(event);
            return Some(finished_sequence);
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
    fn s2_debounce() {
        // A@0, A@1, B@2 with T=10, T_inc=5 -> A@1 is a bounce of A@0.
        let events = vec![ev("a", 0), ev("a", 1), ev("b", 2)];
        let seqs: Vec<_> = generate_sequences(events, 10, 5).collect();
        assert_eq!(seqs.len(), 1);
        assert_eq!(seqs[0].node_count(), 2);
        assert_eq!(seqs[0].positive_edges().len(), 1);
    }

    #[test]
    fn segments_on_delay_exceeded() {
        let events = vec![ev("a", 0), ev("b", 100)];
        let seqs: Vec<_> = generate_sequences(events, 10, 1).collect();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0].node_count(), 1);
        assert_eq!(seqs[1].node_count(), 1);
    }

    #[test]
    fn segments_on_item_repeat_outside_debounce() {
        let events = vec![ev("a", 0), ev("a", 100)];
        let seqs: Vec<_> = generate_sequences(events, 1000, 1).collect();
        assert_eq!(seqs.len(), 2);
    }

    #[test]
    fn empty_stream_yields_nothing() {
        let events: Vec<Event> = vec![];
        let seqs: Vec<_> = generate_sequences(events, 10, 1).collect();
        assert!(seqs.is_empty());
    }

    #[test]
    fn single_event_yields_one_node_sequence() {
        let events = vec![ev("a", 0)];
        let seqs: Vec<_> = generate_sequences(events, 10, 1).collect();
        assert_eq!(seqs.len(), 1);
        assert_eq!(seqs[0].node_count(), 1);
    }
}
