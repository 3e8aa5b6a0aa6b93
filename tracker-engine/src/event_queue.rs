//! Allocation-free min priority queue scheduling a small fixed set of events.
//!
//! Used by callback-style loops that simulate time one event at a time: the
//! owner schedules recurring events (ticks, register writes), schedules an
//! end-of-callback marker, then repeatedly pops [`EventQueue::next_event`]
//! until the marker is returned. Linear scan beats a heap at this size and
//! allocates nothing.

use crate::timing::ClockT;

/// Implemented by small event-kind enums. By convention the variant that
/// should win ties (the loop's exit marker in the outer queue, the register
/// write in the chip-local queue) has index 0.
pub trait EventId: Copy {
    const COUNT: usize;

    fn to_index(self) -> usize;
    fn from_index(index: usize) -> Self;
}

pub const NEVER: ClockT = ClockT::MAX;

const MAX_EVENT_KINDS: usize = 4;

#[derive(Debug, Clone)]
pub struct EventQueue<E> {
    time_until: [ClockT; MAX_EVENT_KINDS],
    _marker: std::marker::PhantomData<E>,
}

/// Returned by [`EventQueue::next_event`]: the popped event plus the time
/// elapsed since the previous pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelativeEvent<E> {
    pub id: E,
    pub clk_elapsed: ClockT,
}

impl<E: EventId> EventQueue<E> {
    #[must_use]
    pub fn new() -> Self {
        assert!(E::COUNT <= MAX_EVENT_KINDS);
        Self { time_until: [NEVER; MAX_EVENT_KINDS], _marker: std::marker::PhantomData }
    }

    /// Schedule `id` to fire `in_how_long` clocks from the current virtual
    /// origin. Rescheduling an already-queued id drops the old schedule.
    pub fn set_timeout(&mut self, id: E, in_how_long: ClockT) {
        self.time_until[id.to_index()] = in_how_long;
    }

    /// Time until `id` fires, or [`NEVER`].
    #[must_use]
    pub fn get_time_until(&self, id: E) -> ClockT {
        self.time_until[id.to_index()]
    }

    /// Pop the nearest scheduled event (ties: smallest id), deschedule it, and
    /// advance the virtual origin to its time. All other pending timeouts
    /// shrink by the returned `clk_elapsed`.
    ///
    /// If nothing is scheduled, returns the smallest id (but don't do that).
    pub fn next_event(&mut self) -> RelativeEvent<E> {
        let mut min_index = 0;
        for index in 1..E::COUNT {
            if self.time_until[index] < self.time_until[min_index] {
                min_index = index;
            }
        }

        let elapsed = self.time_until[min_index];
        self.time_until[min_index] = NEVER;

        for time in &mut self.time_until[..E::COUNT] {
            if *time != NEVER {
                *time -= elapsed;
            }
        }

        RelativeEvent { id: E::from_index(min_index), clk_elapsed: elapsed }
    }
}

impl<E: EventId> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum TestEvent {
        EndOfCallback,
        Tick,
        Other,
    }

    impl EventId for TestEvent {
        const COUNT: usize = 3;

        fn to_index(self) -> usize {
            self as usize
        }

        fn from_index(index: usize) -> Self {
            match index {
                0 => Self::EndOfCallback,
                1 => Self::Tick,
                2 => Self::Other,
                _ => panic!("invalid event index {index}"),
            }
        }
    }

    #[test]
    fn pops_minimum_and_advances_time() {
        let mut queue = EventQueue::new();
        queue.set_timeout(TestEvent::Tick, 10);
        queue.set_timeout(TestEvent::Other, 4);

        let ev = queue.next_event();
        assert_eq!(ev, RelativeEvent { id: TestEvent::Other, clk_elapsed: 4 });

        // Popped slot resets to NEVER; remaining slots shrink by the elapsed time
        assert_eq!(queue.get_time_until(TestEvent::Other), NEVER);
        assert_eq!(queue.get_time_until(TestEvent::Tick), 6);

        let ev = queue.next_event();
        assert_eq!(ev, RelativeEvent { id: TestEvent::Tick, clk_elapsed: 6 });
    }

    #[test]
    fn ties_break_toward_smallest_id() {
        // A callback ending at the same time as a tick should end the callback;
        // the tick happens next callback
        let mut queue = EventQueue::new();
        queue.set_timeout(TestEvent::Tick, 7);
        queue.set_timeout(TestEvent::EndOfCallback, 7);

        let ev = queue.next_event();
        assert_eq!(ev.id, TestEvent::EndOfCallback);
        assert_eq!(ev.clk_elapsed, 7);
        assert_eq!(queue.get_time_until(TestEvent::Tick), 0);
    }

    #[test]
    fn rescheduling_drops_old_timeout() {
        let mut queue = EventQueue::new();
        queue.set_timeout(TestEvent::Tick, 100);
        queue.set_timeout(TestEvent::Tick, 3);

        assert_eq!(queue.next_event(), RelativeEvent { id: TestEvent::Tick, clk_elapsed: 3 });
    }

    #[test]
    fn zero_delay_event_fires_immediately() {
        let mut queue = EventQueue::new();
        queue.set_timeout(TestEvent::Tick, 0);
        queue.set_timeout(TestEvent::Other, 5);

        assert_eq!(queue.next_event(), RelativeEvent { id: TestEvent::Tick, clk_elapsed: 0 });
        assert_eq!(queue.get_time_until(TestEvent::Other), 5);
    }
}
