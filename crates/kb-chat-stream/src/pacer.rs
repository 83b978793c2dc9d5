//! Delivery pacer: releases buffered events at a steady cadence.
//!
//! Each tick delivers `max(1, ceil(len / 30))` events from the front of the
//! queue, so a burst drains in roughly 30 ticks regardless of its size while
//! a trickle is delivered one event per tick.

use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::{Interval, MissedTickBehavior};

use crate::aggregator::Aggregator;
use crate::event::StreamEvent;

/// Number of ticks a burst is spread over.
pub const DRAIN_TICKS: usize = 30;

/// Number of events released by one tick for a queue of `queue_len`.
pub fn batch_size(queue_len: usize) -> usize {
    queue_len.div_ceil(DRAIN_TICKS).max(1)
}

/// Source of pacer ticks.
///
/// UI hosts can drive this from their frame clock; everything else uses
/// [`IntervalTicker`].
#[async_trait::async_trait]
pub trait Ticker: Send {
    async fn tick(&mut self);
}

/// Fixed-interval ticker backed by the tokio timer.
pub struct IntervalTicker {
    interval: Interval,
}

impl IntervalTicker {
    /// Must be called inside a tokio runtime.
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait::async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Ordered, unbounded buffer of events awaiting delivery.
#[derive(Debug, Default)]
pub struct Pacer {
    queue: VecDeque<StreamEvent>,
}

impl Pacer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, event: StreamEvent) {
        self.queue.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Runs one drain step and returns how many events were delivered.
    pub fn tick(
        &mut self,
        aggregator: &mut Aggregator,
        on_event: &mut (dyn FnMut(&StreamEvent) + Send),
    ) -> usize {
        if self.queue.is_empty() {
            return 0;
        }
        let batch = batch_size(self.queue.len());
        for event in self.queue.drain(..batch) {
            deliver(&event, aggregator, on_event);
        }
        batch
    }

    /// Delivers every queued event in order.
    pub fn flush(
        &mut self,
        aggregator: &mut Aggregator,
        on_event: &mut (dyn FnMut(&StreamEvent) + Send),
    ) -> usize {
        let count = self.queue.len();
        for event in self.queue.drain(..) {
            deliver(&event, aggregator, on_event);
        }
        count
    }
}

/// Hands one event to the caller and folds it into the response state.
pub(crate) fn deliver(
    event: &StreamEvent,
    aggregator: &mut Aggregator,
    on_event: &mut (dyn FnMut(&StreamEvent) + Send),
) {
    on_event(event);
    aggregator.apply_delivered(event);
}
