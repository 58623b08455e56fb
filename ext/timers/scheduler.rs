// Copyright 2018-2026 the Deno authors. MIT license.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Weak;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use crate::host::AsyncCallInspector;
use crate::host::JsWrapper;
use crate::host::ScriptHost;
use crate::id::TimerId;
use crate::id::TimerKind;
use crate::id::parse_canonical_id;
use crate::objects::ImmediateObject;
use crate::objects::JsTimerRef;
use crate::objects::TimeoutObject;
use crate::platform::LoopHandle;
use crate::runloop::RunLoopTimer;
use crate::store::TimerStore;
use crate::time::Timespec;
use crate::timer::FireResult;
use crate::timer::TimerHandle;
use crate::timer::TimerState;

/// Shrink an ID map once its slack exceeds this many bytes. Shrinking only
/// happens on removal, never per-insert, so `clear*` stays cheap.
const ID_MAP_SLACK_BYTES: usize = 256 * 1024;

fn maybe_shrink<V>(map: &mut HashMap<i32, V>) {
  let entry_size = std::mem::size_of::<(i32, V)>();
  if (map.capacity() - map.len()) * entry_size > ID_MAP_SLACK_BYTES {
    map.shrink_to_fit();
  }
}

/// The argument accepted by the `clear*` functions: the timer object
/// itself, a numeric ID, or a string ID (matched only in its canonical
/// decimal form). Anything unresolvable is a silent no-op.
pub enum ClearTimerArg<'a> {
  Object(&'a JsTimerRef),
  Number(f64),
  Str(&'a str),
}

struct SchedulerInner {
  store: TimerStore,
  /// FIFO immediate-task queue, drained in batches separate from the
  /// time-ordered store.
  immediates: VecDeque<Arc<ImmediateObject>>,
  /// Lazy ID→timer maps, one per JS-visible kind. Entries appear only
  /// once a timer has been coerced to a primitive, so the common case
  /// never pays for a hash insertion.
  timeouts_by_id: HashMap<i32, Weak<TimeoutObject>>,
  intervals_by_id: HashMap<i32, Weak<TimeoutObject>>,
  immediates_by_id: HashMap<i32, Weak<ImmediateObject>>,
}

/// Thread-safe façade over the timer store; one per event loop.
///
/// Any thread may `insert`/`remove`/`update` timers or cancel them.
/// `drain_timers`, `drain_immediates`, `get_timeout`, `run_imminent`, and
/// ID allocation belong to the event-loop thread. Callbacks never run
/// under the store mutex.
///
/// Lock order: a timer object's state mutex → this store mutex → a timer's
/// `EventLoopTimer` entry mutex (leaf). `LoopHandle` implementations must
/// not call back into the scheduler.
pub struct TimerScheduler {
  inner: Mutex<SchedulerInner>,
  /// Post-incremented (wrapping) ID counter. Allocation is event-loop-
  /// thread-only by contract; the field is atomic so unlocked reads in
  /// public entry points stay well-defined.
  last_id: AtomicI32,
  /// Number of JS timers currently keeping the event loop alive. Mutated
  /// only on the event-loop thread; signed so the non-negativity
  /// invariant is checkable.
  active_timer_count: AtomicI32,
  /// Zero-delay host-runloop timer published for lock-free inline firing.
  imminent: ArcSwapOption<RunLoopTimer>,
  inspector: Mutex<Option<Arc<dyn AsyncCallInspector>>>,
  loop_handle: Arc<dyn LoopHandle>,
}

impl TimerScheduler {
  pub fn new(loop_handle: Arc<dyn LoopHandle>) -> Arc<TimerScheduler> {
    Arc::new(TimerScheduler {
      inner: Mutex::new(SchedulerInner {
        store: TimerStore::new(),
        immediates: VecDeque::new(),
        timeouts_by_id: HashMap::new(),
        intervals_by_id: HashMap::new(),
        immediates_by_id: HashMap::new(),
      }),
      last_id: AtomicI32::new(1),
      active_timer_count: AtomicI32::new(0),
      imminent: ArcSwapOption::const_empty(),
      inspector: Mutex::new(None),
      loop_handle,
    })
  }

  pub fn set_inspector(&self, inspector: Arc<dyn AsyncCallInspector>) {
    *self.inspector.lock() = Some(inspector);
  }

  pub(crate) fn inspector(&self) -> Option<Arc<dyn AsyncCallInspector>> {
    self.inspector.lock().clone()
  }

  /// Allocates the next timer ID. IDs start at 1 and wrap.
  pub fn next_id(&self) -> i32 {
    self.last_id.fetch_add(1, Ordering::Relaxed)
  }

  pub fn active_timer_count(&self) -> i32 {
    self.active_timer_count.load(Ordering::Acquire)
  }

  /// True when at least one JS timer is keeping the event loop alive.
  pub fn keeps_loop_alive(&self) -> bool {
    self.active_timer_count() > 0
  }

  /// Adjusts the keep-alive count; transitions through zero ref/unref the
  /// native loop. Event-loop thread only.
  pub fn increment_timer_ref(&self, delta: i32) {
    let old = self.active_timer_count.fetch_add(delta, Ordering::AcqRel);
    let new = old + delta;
    debug_assert!(new >= 0, "keep-alive count went negative");
    if old == 0 && new > 0 {
      self.loop_handle.ref_loop();
    } else if old > 0 && new == 0 {
      self.loop_handle.unref_loop();
    }
  }

  /// Schedules `handle` at its current `next` deadline and marks it
  /// active. The caller must have set `next` already; prefer [`update`]
  /// which does both.
  ///
  /// [`update`]: TimerScheduler::update
  pub fn insert(&self, handle: &TimerHandle) {
    let earliest = {
      let mut inner = self.inner.lock();
      let when = {
        let mut entry = handle.entry().lock();
        entry.state = TimerState::Active;
        entry.next.truncate_to_ms()
      };
      inner.store.insert(when, handle.clone());
      inner.store.earliest_deadline()
    };
    self.notify_deadline(earliest);
  }

  /// Unlinks `handle` from the store (if scheduled) and marks it
  /// cancelled. A cancel from a foreign thread may retire the earliest
  /// deadline, so the loop gets told about the new head like it does for
  /// `insert` and `update`.
  pub fn remove(&self, handle: &TimerHandle) {
    let earliest = {
      let mut inner = self.inner.lock();
      let (was_active, when) = {
        let mut entry = handle.entry().lock();
        let was_active = entry.state == TimerState::Active;
        entry.state = TimerState::Cancelled;
        (was_active, entry.next.truncate_to_ms())
      };
      if !was_active {
        return;
      }
      inner.store.remove(when, handle);
      inner.store.earliest_deadline()
    };
    self.notify_deadline(earliest);
  }

  /// Moves `handle` to `new_time`, unlinking it first when it is already
  /// scheduled, and marks it active.
  pub fn update(&self, handle: &TimerHandle, new_time: Timespec) {
    let earliest = {
      let mut inner = self.inner.lock();
      let (was_active, old_when) = {
        let entry = handle.entry().lock();
        (entry.state == TimerState::Active, entry.next.truncate_to_ms())
      };
      if was_active {
        inner.store.remove(old_when, handle);
      }
      let when = {
        let mut entry = handle.entry().lock();
        entry.next = new_time;
        entry.state = TimerState::Active;
        new_time.truncate_to_ms()
      };
      inner.store.insert(when, handle.clone());
      inner.store.earliest_deadline()
    };
    self.notify_deadline(earliest);
  }

  fn notify_deadline(&self, earliest: Option<Timespec>) {
    self.loop_handle.deadline_changed(
      earliest.map(|when| when.duration_since(&Timespec::now())),
    );
  }

  /// Computes how long the native loop may block before the next timer is
  /// due. `None` means "do not block on timers": nothing scheduled keeps
  /// the loop alive. Due host-runloop timers are fired inline here, since
  /// a burst of due JS timers must not starve the GC timer. That is why
  /// this takes the host.
  pub fn get_timeout(
    self: &Arc<Self>,
    host: &mut dyn ScriptHost,
  ) -> Option<Duration> {
    if self.active_timer_count() == 0 {
      return None;
    }
    let now = Timespec::now();
    loop {
      let due_runloop = {
        let mut inner = self.inner.lock();
        let when = inner.store.earliest_deadline()?;
        if when > now {
          return Some(when.duration_since(&now));
        }
        let head_is_runloop =
          inner.store.peek().is_some_and(|h| h.is_runloop());
        if !head_is_runloop {
          return Some(Duration::ZERO);
        }
        inner.store.pop_min()?
      };
      log::trace!("firing due runloop timer from pre-wait query");
      match due_runloop.fire(now, self, host) {
        FireResult::Disarm => {}
        FireResult::Rearm(at) => self.update(&due_runloop, at),
      }
    }
  }

  /// Fires every due timer. Wall time is sampled lazily, at most once per
  /// drain; every timer fired by one drain observes the same `now`.
  pub fn drain_timers(self: &Arc<Self>, host: &mut dyn ScriptHost) {
    let mut now: Option<Timespec> = None;
    loop {
      let popped = {
        let mut inner = self.inner.lock();
        if inner.store.is_empty() {
          None
        } else {
          let now = *now.get_or_insert_with(Timespec::now);
          inner.store.pop_due(now).map(|handle| (handle, now))
        }
      };
      let Some((handle, now)) = popped else {
        break;
      };
      log::trace!("firing {} timer", handle.tag());
      match handle.fire(now, self, host) {
        FireResult::Disarm => {}
        FireResult::Rearm(at) => self.update(&handle, at),
      }
    }
  }

  /// Runs the current batch of immediates. Immediates enqueued by an
  /// immediate callback land in the next batch, not this one.
  pub fn drain_immediates(self: &Arc<Self>, host: &mut dyn ScriptHost) {
    let batch = std::mem::take(&mut self.inner.lock().immediates);
    for immediate in batch {
      immediate.run(self, host);
    }
  }

  pub fn has_pending_immediates(&self) -> bool {
    !self.inner.lock().immediates.is_empty()
  }

  /// The event loop's fast path: fire a published zero-delay runloop
  /// timer without touching the store.
  pub fn run_imminent(self: &Arc<Self>, host: &mut dyn ScriptHost) {
    let Some(timer) = self.imminent.swap(None) else {
      return;
    };
    if timer.entry().lock().state != TimerState::Active {
      // already fired through the store, or cancelled under our feet
      return;
    }
    let handle = timer.handle();
    self.remove(&handle);
    log::trace!("firing imminent runloop timer");
    let now = Timespec::now();
    match handle.fire(now, self, host) {
      FireResult::Disarm => {}
      FireResult::Rearm(at) => self.update(&handle, at),
    }
  }

  pub(crate) fn set_imminent(&self, timer: &Arc<RunLoopTimer>) {
    self.imminent.store(Some(timer.clone()));
  }

  /// Revokes an imminent publication, but only if it is still `timer`'s
  /// own; a later publication by another timer is left alone.
  pub(crate) fn clear_imminent(&self, timer: &Arc<RunLoopTimer>) {
    let current = self.imminent.load();
    if let Some(published) = &*current {
      if Arc::ptr_eq(published, timer) {
        self.imminent.compare_and_swap(&current, None);
      }
    }
  }

  // --- JS API surface ------------------------------------------------

  /// `setTimeout(cb, delay, ...args)`. The engine has already stored the
  /// callback and arguments on `wrapper` and coerced `delay` to a double.
  /// A coerced delay of exactly zero is rewritten to an immediate.
  pub fn set_timeout(
    self: &Arc<Self>,
    wrapper: JsWrapper,
    delay: f64,
    saturate_overflow: bool,
  ) -> JsTimerRef {
    let id = self.next_id();
    match coerce_timeout_delay(delay, saturate_overflow) {
      CoercedDelay::Immediate => self.enqueue_immediate(id, wrapper),
      CoercedDelay::Ms(ms) => {
        self.schedule_timeout(id, TimerKind::Timeout, ms, wrapper)
      }
    }
  }

  /// `setInterval(cb, delay, ...args)`. The delay always clamps to at
  /// least 1 ms; there is no saturation option.
  pub fn set_interval(
    self: &Arc<Self>,
    wrapper: JsWrapper,
    delay: f64,
  ) -> JsTimerRef {
    let id = self.next_id();
    let ms = coerce_interval_delay(delay);
    self.schedule_timeout(id, TimerKind::Interval, ms, wrapper)
  }

  /// `setImmediate(cb, ...args)`.
  pub fn set_immediate(self: &Arc<Self>, wrapper: JsWrapper) -> JsTimerRef {
    let id = self.next_id();
    self.enqueue_immediate(id, wrapper)
  }

  fn schedule_timeout(
    self: &Arc<Self>,
    id: i32,
    kind: TimerKind,
    interval_ms: i32,
    wrapper: JsWrapper,
  ) -> JsTimerRef {
    let timeout = TimeoutObject::new(id, kind, interval_ms, wrapper);
    timeout.internals().reschedule(&timeout.handle(), self);
    if let Some(inspector) = self.inspector() {
      inspector
        .did_schedule_async_call(TimerId::new(id, kind).as_async_id());
    }
    JsTimerRef::Timeout(timeout)
  }

  fn enqueue_immediate(
    self: &Arc<Self>,
    id: i32,
    wrapper: JsWrapper,
  ) -> JsTimerRef {
    let immediate = ImmediateObject::new(id, wrapper);
    immediate.internals().engage_keep_alive(self);
    self.inner.lock().immediates.push_back(immediate.clone());
    if let Some(inspector) = self.inspector() {
      inspector.did_schedule_async_call(
        TimerId::new(id, TimerKind::Immediate).as_async_id(),
      );
    }
    JsTimerRef::Immediate(immediate)
  }

  /// `clearTimeout(id)`. Accepts a timer object, a numeric ID, or a
  /// canonical-decimal string ID; tries the timeout map then the interval
  /// map. Unknown or malformed IDs are silent no-ops.
  pub fn clear_timeout(self: &Arc<Self>, arg: ClearTimerArg) {
    match resolve_clear_arg(arg) {
      ResolvedClearArg::Object(timer) => timer.cancel(self),
      ResolvedClearArg::Id(id) => {
        if let Some(timer) = self.lookup_timeout_like(id) {
          timer.cancel(self);
        }
      }
      ResolvedClearArg::None => {}
    }
  }

  /// `clearInterval(id)`. Same lookup as `clearTimeout`.
  pub fn clear_interval(self: &Arc<Self>, arg: ClearTimerArg) {
    self.clear_timeout(arg);
  }

  /// `clearImmediate(id)`. Consults only the immediate map: a timeout or
  /// interval ID can never clear an immediate.
  pub fn clear_immediate(self: &Arc<Self>, arg: ClearTimerArg) {
    match resolve_clear_arg(arg) {
      ResolvedClearArg::Object(timer) => timer.cancel(self),
      ResolvedClearArg::Id(id) => {
        if let Some(timer) = self.lookup_immediate(id) {
          timer.cancel(self);
        }
      }
      ResolvedClearArg::None => {}
    }
  }

  // --- lazy ID maps ---------------------------------------------------

  pub(crate) fn register_primitive_id(&self, timer: &JsTimerRef) {
    let mut inner = self.inner.lock();
    match timer {
      JsTimerRef::Timeout(t) => {
        let map = match t.internals().kind() {
          TimerKind::Timeout => &mut inner.timeouts_by_id,
          TimerKind::Interval => &mut inner.intervals_by_id,
          TimerKind::Immediate => unreachable!("timeout object kind"),
        };
        map.insert(t.internals().id(), Arc::downgrade(t));
      }
      JsTimerRef::Immediate(t) => {
        inner
          .immediates_by_id
          .insert(t.internals().id(), Arc::downgrade(t));
      }
    }
  }

  pub(crate) fn prune_primitive_id(&self, kind: TimerKind, id: i32) {
    let mut inner = self.inner.lock();
    match kind {
      TimerKind::Timeout => {
        inner.timeouts_by_id.remove(&id);
        maybe_shrink(&mut inner.timeouts_by_id);
      }
      TimerKind::Interval => {
        inner.intervals_by_id.remove(&id);
        maybe_shrink(&mut inner.intervals_by_id);
      }
      TimerKind::Immediate => {
        inner.immediates_by_id.remove(&id);
        maybe_shrink(&mut inner.immediates_by_id);
      }
    }
  }

  fn lookup_timeout_like(&self, id: i32) -> Option<JsTimerRef> {
    let mut inner = self.inner.lock();
    if let Some(weak) = inner.timeouts_by_id.get(&id) {
      match weak.upgrade() {
        Some(timer) => return Some(JsTimerRef::Timeout(timer)),
        None => {
          inner.timeouts_by_id.remove(&id);
          maybe_shrink(&mut inner.timeouts_by_id);
        }
      }
    }
    if let Some(weak) = inner.intervals_by_id.get(&id) {
      match weak.upgrade() {
        Some(timer) => return Some(JsTimerRef::Timeout(timer)),
        None => {
          inner.intervals_by_id.remove(&id);
          maybe_shrink(&mut inner.intervals_by_id);
        }
      }
    }
    None
  }

  fn lookup_immediate(&self, id: i32) -> Option<JsTimerRef> {
    let mut inner = self.inner.lock();
    if let Some(weak) = inner.immediates_by_id.get(&id) {
      match weak.upgrade() {
        Some(timer) => return Some(JsTimerRef::Immediate(timer)),
        None => {
          inner.immediates_by_id.remove(&id);
          maybe_shrink(&mut inner.immediates_by_id);
        }
      }
    }
    None
  }

  #[cfg(test)]
  pub(crate) fn store_len(&self) -> usize {
    self.inner.lock().store.len()
  }

  #[cfg(test)]
  pub(crate) fn set_last_id(&self, id: i32) {
    self.last_id.store(id, Ordering::Relaxed);
  }
}

enum ResolvedClearArg {
  Object(JsTimerRef),
  Id(i32),
  None,
}

fn resolve_clear_arg(arg: ClearTimerArg) -> ResolvedClearArg {
  match arg {
    ClearTimerArg::Object(timer) => ResolvedClearArg::Object(timer.clone()),
    ClearTimerArg::Number(value) => {
      // only the exact integral rendering of an assigned ID matches
      if value.fract() == 0.0
        && value >= 1.0
        && value <= i32::MAX as f64
      {
        ResolvedClearArg::Id(value as i32)
      } else {
        ResolvedClearArg::None
      }
    }
    ClearTimerArg::Str(s) => match parse_canonical_id(s) {
      Some(id) => ResolvedClearArg::Id(id),
      None => ResolvedClearArg::None,
    },
  }
}

pub(crate) enum CoercedDelay {
  Immediate,
  Ms(i32),
}

/// Delay coercion for `setTimeout`: non-finite or `i32`-overflowing delays
/// collapse to 1 ms unless the caller opted into saturation; sub-1 delays
/// clamp to 1; an exact zero is rewritten to an immediate.
pub(crate) fn coerce_timeout_delay(
  delay: f64,
  saturate_overflow: bool,
) -> CoercedDelay {
  if !delay.is_finite() || delay > i32::MAX as f64 {
    return CoercedDelay::Ms(if saturate_overflow { i32::MAX } else { 1 });
  }
  let delay = delay.trunc();
  if delay == 0.0 {
    return CoercedDelay::Immediate;
  }
  if delay < 1.0 {
    return CoercedDelay::Ms(1);
  }
  CoercedDelay::Ms(delay as i32)
}

/// Delay coercion for `setInterval`: always at least 1 ms, never
/// saturating.
pub(crate) fn coerce_interval_delay(delay: f64) -> i32 {
  if !delay.is_finite() || delay > i32::MAX as f64 {
    return 1;
  }
  let delay = delay.trunc();
  if delay < 1.0 { 1 } else { delay as i32 }
}
