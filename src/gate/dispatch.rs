use crate::calendar::model::Attendee;
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_MAX_CONCURRENCY: usize = 4;
const DISPATCH_POLL: Duration = Duration::from_millis(25);

#[derive(Debug)]
pub struct Scheduled<T> {
    pub keys: BTreeSet<Attendee>,
    pub value: T,
}

/// FIFO queue where an item may start only when none of its attendees is held
/// by a running item or by an earlier item still waiting. Items with disjoint
/// attendee sets run side by side; items sharing one keep queue order.
#[derive(Debug)]
pub struct PerAttendeeScheduler<T> {
    pending: VecDeque<Scheduled<T>>,
    active_keys: HashSet<Attendee>,
}

impl<T> Default for PerAttendeeScheduler<T> {
    fn default() -> Self {
        Self {
            pending: VecDeque::new(),
            active_keys: HashSet::new(),
        }
    }
}

impl<T> PerAttendeeScheduler<T> {
    pub fn enqueue(&mut self, keys: BTreeSet<Attendee>, value: T) {
        self.pending.push_back(Scheduled { keys, value });
    }

    pub fn dequeue_runnable(&mut self, max_items: usize) -> Vec<Scheduled<T>> {
        if max_items == 0 || self.pending.is_empty() {
            return Vec::new();
        }

        let mut selected = Vec::new();
        let mut held_by_waiting: HashSet<Attendee> = HashSet::new();
        let mut remaining = VecDeque::new();

        while let Some(item) = self.pending.pop_front() {
            let blocked = item
                .keys
                .iter()
                .any(|key| self.active_keys.contains(key) || held_by_waiting.contains(key));
            if !blocked && selected.len() < max_items {
                self.active_keys.extend(item.keys.iter().cloned());
                selected.push(item);
            } else {
                held_by_waiting.extend(item.keys.iter().cloned());
                remaining.push_back(item);
            }
        }

        self.pending = remaining;
        selected
    }

    pub fn complete(&mut self, keys: &BTreeSet<Attendee>) {
        for key in keys {
            self.active_keys.remove(key);
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn active_len(&self) -> usize {
        self.active_keys.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatched<R> {
    Done(R),
    Panicked,
    /// The deadline passed before the item started. Started items are always
    /// awaited, so only these are reported as timed out.
    TimedOut,
}

struct Completion<R> {
    index: usize,
    result: R,
}

struct InFlight {
    index: usize,
    keys: BTreeSet<Attendee>,
    handle: JoinHandle<()>,
}

pub fn dispatch_all<T, R, F>(
    items: Vec<(BTreeSet<Attendee>, T)>,
    max_concurrency: usize,
    deadline: Option<Instant>,
    work: F,
) -> Vec<Dispatched<R>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> R + Send + Sync + 'static,
{
    let total = items.len();
    let work = Arc::new(work);
    let max_concurrency = max_concurrency.max(1);
    let mut scheduler = PerAttendeeScheduler::default();
    for (index, (keys, value)) in items.into_iter().enumerate() {
        scheduler.enqueue(keys, (index, value));
    }

    let (result_tx, result_rx) = mpsc::channel::<Completion<R>>();
    let mut results: Vec<Option<Dispatched<R>>> = (0..total).map(|_| None).collect();
    let mut in_flight: Vec<InFlight> = Vec::new();
    let mut settled = 0usize;

    while settled < total {
        let expired = deadline.is_some_and(|limit| Instant::now() >= limit);
        if expired && in_flight.is_empty() {
            break;
        }

        let available = if expired {
            0
        } else {
            max_concurrency.saturating_sub(in_flight.len())
        };
        for scheduled in scheduler.dequeue_runnable(available) {
            let (index, value) = scheduled.value;
            let tx = result_tx.clone();
            let work = Arc::clone(&work);
            let handle = thread::spawn(move || {
                let result = work(value);
                let _ = tx.send(Completion { index, result });
            });
            in_flight.push(InFlight {
                index,
                keys: scheduled.keys,
                handle,
            });
        }

        let wait = match deadline {
            Some(limit) if !expired => limit
                .saturating_duration_since(Instant::now())
                .min(DISPATCH_POLL),
            _ => DISPATCH_POLL,
        };
        match result_rx.recv_timeout(wait) {
            Ok(done) => {
                let result = Dispatched::Done(done.result);
                if settle(&mut scheduler, &mut in_flight, &mut results, done.index, result) {
                    settled += 1;
                }
            }
            Err(RecvTimeoutError::Timeout) => {
                // A finished worker has already sent its result, so drain after
                // sampling; whatever is still unreported panicked.
                let finished = in_flight
                    .iter()
                    .filter(|slot| slot.handle.is_finished())
                    .map(|slot| slot.index)
                    .collect::<Vec<_>>();
                while let Ok(done) = result_rx.try_recv() {
                    let result = Dispatched::Done(done.result);
                    if settle(&mut scheduler, &mut in_flight, &mut results, done.index, result) {
                        settled += 1;
                    }
                }
                for index in finished {
                    if settle(&mut scheduler, &mut in_flight, &mut results, index, Dispatched::Panicked) {
                        settled += 1;
                    }
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    results
        .into_iter()
        .map(|slot| slot.unwrap_or(Dispatched::TimedOut))
        .collect()
}

fn settle<T, R>(
    scheduler: &mut PerAttendeeScheduler<T>,
    in_flight: &mut Vec<InFlight>,
    results: &mut [Option<Dispatched<R>>],
    index: usize,
    result: Dispatched<R>,
) -> bool {
    if results[index].is_some() {
        return false;
    }
    if let Some(position) = in_flight.iter().position(|slot| slot.index == index) {
        let slot = in_flight.remove(position);
        scheduler.complete(&slot.keys);
        let _ = slot.handle.join();
    }
    results[index] = Some(result);
    true
}
