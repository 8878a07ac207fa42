//! Timer registry.
//!
//! Timers are owned by the registry until they fire. A due timer is first
//! *promoted*: its id is handed to the macrotask queue while the body stays
//! here, so a timer can still be cancelled between promotion and execution.

use std::borrow::Cow;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use slotmap::{SlotMap, new_key_type};
use smallvec::SmallVec;

use crate::error::CancelError;
use crate::event_loop::EventLoop;
use crate::task::{CallbackFn, CallbackId, CallbackResult};

new_key_type! {
    pub struct TimerId;
}

pub(crate) type IntervalFn = Box<dyn FnMut(&EventLoop) -> CallbackResult>;

pub(crate) enum TimerBody {
    Once(CallbackFn),
    Interval {
        period: u64,
        body: Rc<RefCell<IntervalFn>>,
    },
}

struct TimerSlot {
    callback: CallbackId,
    label: Option<Cow<'static, str>>,
    deadline: u64,
    seq: u64,
    body: TimerBody,
    /// Sitting in the macrotask queue, no longer in the deadline index.
    promoted: bool,
}

/// A timer handed back to the driver for execution.
pub(crate) struct FiredTimer {
    pub callback: CallbackId,
    pub label: Option<Cow<'static, str>>,
    pub deadline: u64,
    pub body: FiredBody,
}

pub(crate) enum FiredBody {
    Once(CallbackFn),
    Interval(Rc<RefCell<IntervalFn>>),
}

#[derive(Default)]
pub(crate) struct TimerRegistry {
    slots: SlotMap<TimerId, TimerSlot>,
    /// Unpromoted timers keyed by (deadline, registration sequence).
    index: BTreeMap<(u64, u64), TimerId>,
    next_seq: u64,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a timer due at `now + delay_ms`. Negative delays count as zero.
    pub fn schedule(
        &mut self,
        callback: CallbackId,
        label: Option<Cow<'static, str>>,
        now: u64,
        delay_ms: i64,
        body: TimerBody,
    ) -> (TimerId, u64) {
        let deadline = now.saturating_add(delay_ms.max(0) as u64);
        let seq = self.take_seq();
        let id = self.slots.insert(TimerSlot {
            callback,
            label,
            deadline,
            seq,
            body,
            promoted: false,
        });
        self.index.insert((deadline, seq), id);
        (id, deadline)
    }

    pub fn cancel(&mut self, id: TimerId) -> Result<CallbackId, CancelError> {
        let slot = self
            .slots
            .remove(id)
            .ok_or(CancelError::UnknownTimer(id))?;
        if !slot.promoted {
            self.index.remove(&(slot.deadline, slot.seq));
        }
        Ok(slot.callback)
    }

    /// Marks every timer with `deadline <= now` as promoted and returns their
    /// ids by deadline, ties in registration order.
    pub fn promote_due(&mut self, now: u64) -> SmallVec<[TimerId; 4]> {
        let mut due = SmallVec::new();
        while let Some(entry) = self.index.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let id = entry.remove();
            if let Some(slot) = self.slots.get_mut(id) {
                slot.promoted = true;
                due.push(id);
            }
        }
        due
    }

    /// Takes a promoted timer for execution. One-shot timers leave the
    /// registry; intervals are re-registered one period after the deadline
    /// they fired for. Returns `None` if the timer was cancelled meanwhile.
    pub fn fire(&mut self, id: TimerId) -> Option<FiredTimer> {
        let slot = self.slots.get(id)?;
        let period = match &slot.body {
            TimerBody::Once(_) => None,
            TimerBody::Interval { period, .. } => Some(*period),
        };

        match period {
            None => {
                let slot = self.slots.remove(id)?;
                let TimerBody::Once(body) = slot.body else {
                    return None;
                };
                Some(FiredTimer {
                    callback: slot.callback,
                    label: slot.label,
                    deadline: slot.deadline,
                    body: FiredBody::Once(body),
                })
            }
            Some(period) => {
                let seq = self.take_seq();
                let slot = self.slots.get_mut(id)?;
                let fired_at = slot.deadline;
                slot.deadline = fired_at.saturating_add(period);
                slot.seq = seq;
                slot.promoted = false;
                self.index.insert((slot.deadline, seq), id);

                let TimerBody::Interval { body, .. } = &slot.body else {
                    return None;
                };
                Some(FiredTimer {
                    callback: slot.callback,
                    label: slot.label.clone(),
                    deadline: fired_at,
                    body: FiredBody::Interval(Rc::clone(body)),
                })
            }
        }
    }

    pub fn next_deadline(&self) -> Option<u64> {
        self.index.first_key_value().map(|(&(deadline, _), _)| deadline)
    }

    pub fn contains(&self, id: TimerId) -> bool {
        self.slots.contains_key(id)
    }

    /// Timers registered and not yet fired (promoted ones included).
    pub fn pending(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) -> usize {
        let dropped = self.slots.len();
        self.slots.clear();
        self.index.clear();
        dropped
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn once() -> TimerBody {
        let body: CallbackFn = Box::new(|_: &EventLoop| Ok(()));
        TimerBody::Once(body)
    }

    fn interval(period: u64) -> TimerBody {
        let body: IntervalFn = Box::new(|_: &EventLoop| Ok(()));
        TimerBody::Interval {
            period,
            body: Rc::new(RefCell::new(body)),
        }
    }

    #[test]
    fn test_due_order_is_deadline_then_registration() {
        let mut timers = TimerRegistry::new();
        let (late, _) = timers.schedule(CallbackId(0), None, 0, 10, once());
        let (a, _) = timers.schedule(CallbackId(1), None, 0, 5, once());
        let (b, _) = timers.schedule(CallbackId(2), None, 0, 5, once());
        let (negative, deadline) = timers.schedule(CallbackId(3), None, 0, -20, once());
        assert_eq!(deadline, 0);

        assert_eq!(timers.promote_due(4).as_slice(), &[negative]);
        assert_eq!(timers.next_deadline(), Some(5));
        assert_eq!(timers.promote_due(10).as_slice(), &[a, b, late]);
        assert_eq!(timers.next_deadline(), None);
        assert_eq!(timers.pending(), 4);
    }

    #[test]
    fn test_cancel_before_and_after_promotion() {
        let mut timers = TimerRegistry::new();
        let (first, _) = timers.schedule(CallbackId(0), None, 0, 1, once());
        let (second, _) = timers.schedule(CallbackId(1), None, 0, 1, once());

        assert_eq!(timers.cancel(first), Ok(CallbackId(0)));
        assert_eq!(timers.cancel(first), Err(CancelError::UnknownTimer(first)));

        assert_eq!(timers.promote_due(1).as_slice(), &[second]);
        assert!(timers.cancel(second).is_ok());
        assert!(timers.fire(second).is_none());
        assert_eq!(timers.pending(), 0);
    }

    #[test]
    fn test_fired_once_timer_is_gone() {
        let mut timers = TimerRegistry::new();
        let (id, _) = timers.schedule(CallbackId(7), None, 3, 2, once());
        timers.promote_due(5);

        let fired = timers.fire(id).unwrap();
        assert_eq!((fired.callback, fired.deadline), (CallbackId(7), 5));
        assert!(!timers.contains(id));
        assert!(timers.cancel(id).is_err());
    }

    #[test]
    fn test_interval_reregisters_from_previous_deadline() {
        let mut timers = TimerRegistry::new();
        let (id, _) = timers.schedule(CallbackId(0), None, 0, 4, interval(4));

        timers.promote_due(4);
        let fired = timers.fire(id).unwrap();
        assert_eq!(fired.deadline, 4);
        assert_eq!(timers.next_deadline(), Some(8));

        // Firing late does not drift the schedule.
        timers.promote_due(11);
        assert_eq!(timers.fire(id).unwrap().deadline, 8);
        assert_eq!(timers.next_deadline(), Some(12));
        assert!(timers.contains(id));
    }
}
