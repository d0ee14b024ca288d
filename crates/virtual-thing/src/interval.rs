//! Intervals: periodic trigger sources and loop pacing.
//!
//! Ticks are scheduled at `last tick + interval` rather than `now + interval`,
//! so a slow tick never shifts the ones after it. The interval expression is
//! re-evaluated on every tick; when its value changes the reference time
//! restarts from now.

use std::cell::Cell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::instruction::Frame;
use crate::math::Math;
use crate::model::Model;
use crate::tree::NodeId;
use crate::trigger;

#[derive(Debug)]
pub struct Interval {
    path: String,
    math: Math,
    /// Invokes its trigger on every tick instead of being waited on.
    periodic: bool,
    started: Cell<bool>,
    /// Bumped on every start so a stopped runner never outlives a restart.
    epoch: Cell<u64>,
    last_interval: Cell<f64>,
    last_tick: Cell<Instant>,
}

impl Interval {
    pub fn new(path: String, math: Math, periodic: bool) -> Self {
        Self {
            path,
            math,
            periodic,
            started: Cell::new(false),
            epoch: Cell::new(0),
            last_interval: Cell::new(0.0),
            last_tick: Cell::new(Instant::now()),
        }
    }

    pub fn is_started(&self) -> bool {
        self.started.get()
    }

    pub fn is_periodic(&self) -> bool {
        self.periodic
    }

    /// Restart the reference time from now.
    pub fn reset(&self) {
        self.last_tick.set(Instant::now());
    }

    pub fn stop(&self) {
        self.started.set(false);
    }

    /// Start pacing. Periodic intervals also spawn the runner invoking `trigger`.
    pub(crate) fn start(&self, model: &Rc<Model>, trigger: NodeId) {
        if self.started.get() {
            return;
        }
        self.started.set(true);
        self.epoch.set(self.epoch.get() + 1);
        self.reset();
        if self.periodic {
            let epoch = self.epoch.get();
            tokio::task::spawn_local(run_periodic(Rc::downgrade(model), trigger, epoch));
        }
    }

    /// Wait for the next tick of a started, non-periodic interval.
    pub async fn wait_for_next_tick(&self, model: &Model, frame: &Frame) -> Result<()> {
        if self.periodic {
            return Err(Error::fatal_at(
                &self.path,
                "Can't explicitly call waitForNextTick() in periodic trigger mode.",
            ));
        }
        if !self.started.get() {
            return Err(Error::fatal_at(&self.path, "Interval is not started."));
        }
        self.next_tick(model, frame).await
    }

    async fn next_tick(&self, model: &Model, frame: &Frame) -> Result<()> {
        let interval = self.math.evaluate_number(model, frame).await?;
        if !(interval.is_finite() && interval > 0.0) {
            return Err(Error::fatal_at(&self.path, format!("Invalid interval: {interval}.")));
        }
        if interval != self.last_interval.get() {
            self.last_interval.set(interval);
            self.reset();
        }
        let next = Duration::try_from_secs_f64(interval / 1000.0)
            .ok()
            .and_then(|period| self.last_tick.get().checked_add(period))
            .ok_or_else(|| Error::fatal_at(&self.path, format!("Invalid interval: {interval}.")))?;
        if next > Instant::now() {
            tokio::time::sleep_until(next).await;
        }
        self.last_tick.set(next);
        Ok(())
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.started.get() && self.epoch.get() == epoch
    }
}

fn interval_of(model: &Model, trigger: NodeId) -> Option<&Interval> {
    model.tree[trigger].kind.as_trigger()?.interval()
}

async fn run_periodic(weak: Weak<Model>, trigger: NodeId, epoch: u64) {
    let frame = Frame::default();
    loop {
        let Some(model) = weak.upgrade() else {
            return;
        };
        let Some(interval) = interval_of(&model, trigger) else {
            return;
        };
        if !interval.is_current(epoch) {
            return;
        }
        if let Err(error) = interval.next_tick(&model, &frame).await {
            model.failure(error.message()).await;
            return;
        }
        if !interval.is_current(epoch) {
            return;
        }
        if let Err(error) = trigger::invoke(&model, trigger).await {
            model.failure(error.message()).await;
            return;
        }
    }
}
