// Copyright 2018-2026 the Deno authors. MIT license.

use std::sync::Arc;

use crate::host::JsWrapper;
use crate::host::ScriptHost;
use crate::internals::TimerObjectInternals;
use crate::scheduler::TimerScheduler;
use crate::timer::FireResult;
use crate::timer::TimerHandle;

/// Native half of a JS `Timeout` object (the return value of `setTimeout`
/// and `setInterval`). Constructible only through the scheduler; the
/// engine binding rejects `new Timeout(...)` with a TypeError.
pub struct TimeoutObject {
  internals: TimerObjectInternals,
}

impl TimeoutObject {
  pub(crate) fn new(
    id: i32,
    kind: crate::id::TimerKind,
    interval_ms: i32,
    wrapper: JsWrapper,
  ) -> Arc<TimeoutObject> {
    debug_assert_ne!(kind, crate::id::TimerKind::Immediate);
    Arc::new(TimeoutObject {
      internals: TimerObjectInternals::new(id, kind, interval_ms, wrapper),
    })
  }

  pub fn internals(&self) -> &TimerObjectInternals {
    &self.internals
  }

  pub fn handle(self: &Arc<Self>) -> TimerHandle {
    TimerHandle::Timeout(self.clone())
  }

  pub(crate) fn fire(
    self: &Arc<Self>,
    scheduler: &Arc<TimerScheduler>,
    host: &mut dyn ScriptHost,
  ) -> FireResult {
    self.internals.fire(&self.handle(), scheduler, host)
  }

  pub fn cancel(self: &Arc<Self>, scheduler: &Arc<TimerScheduler>) {
    self.internals.cancel(Some(&self.handle()), scheduler);
  }

  pub fn refresh(self: &Arc<Self>, scheduler: &Arc<TimerScheduler>) {
    self.internals.refresh(&self.handle(), scheduler);
  }

  pub fn set_ref(&self, scheduler: &Arc<TimerScheduler>, value: bool) {
    self.internals.set_ref(scheduler, value);
  }

  pub fn has_ref(&self) -> bool {
    self.internals.has_ref()
  }

  /// `[Symbol.toPrimitive]`: the numeric timer ID.
  pub fn primitive_value(
    self: &Arc<Self>,
    scheduler: &Arc<TimerScheduler>,
  ) -> i32 {
    self
      .internals
      .primitive_value(&JsTimerRef::Timeout(self.clone()), scheduler)
  }

  /// `[Symbol.dispose]`.
  pub fn dispose(self: &Arc<Self>, scheduler: &Arc<TimerScheduler>) {
    self.cancel(scheduler);
  }

  pub fn is_destroyed(&self) -> bool {
    self.internals.is_destroyed()
  }

  pub fn finalize(&self) {
    self.internals.finalize();
  }
}

/// Native half of a JS `Immediate` object. Lives on the scheduler's
/// immediate-task queue instead of the time-ordered store.
pub struct ImmediateObject {
  internals: TimerObjectInternals,
}

impl ImmediateObject {
  pub(crate) fn new(id: i32, wrapper: JsWrapper) -> Arc<ImmediateObject> {
    Arc::new(ImmediateObject {
      internals: TimerObjectInternals::new(
        id,
        crate::id::TimerKind::Immediate,
        0,
        wrapper,
      ),
    })
  }

  pub fn internals(&self) -> &TimerObjectInternals {
    &self.internals
  }

  pub(crate) fn run(
    self: &Arc<Self>,
    scheduler: &Arc<TimerScheduler>,
    host: &mut dyn ScriptHost,
  ) {
    self.internals.run_immediate_task(scheduler, host);
  }

  pub fn cancel(&self, scheduler: &Arc<TimerScheduler>) {
    self.internals.cancel(None, scheduler);
  }

  pub fn set_ref(&self, scheduler: &Arc<TimerScheduler>, value: bool) {
    self.internals.set_ref(scheduler, value);
  }

  pub fn has_ref(&self) -> bool {
    self.internals.has_ref()
  }

  pub fn primitive_value(
    self: &Arc<Self>,
    scheduler: &Arc<TimerScheduler>,
  ) -> i32 {
    self
      .internals
      .primitive_value(&JsTimerRef::Immediate(self.clone()), scheduler)
  }

  pub fn dispose(&self, scheduler: &Arc<TimerScheduler>) {
    self.cancel(scheduler);
  }

  pub fn is_destroyed(&self) -> bool {
    self.internals.is_destroyed()
  }

  pub fn finalize(&self) {
    self.internals.finalize();
  }
}

/// Cloneable reference to either JS timer flavor; what the `set*` entry
/// points hand back to the engine binding.
#[derive(Clone)]
pub enum JsTimerRef {
  Timeout(Arc<TimeoutObject>),
  Immediate(Arc<ImmediateObject>),
}

impl JsTimerRef {
  pub fn internals(&self) -> &TimerObjectInternals {
    match self {
      JsTimerRef::Timeout(t) => t.internals(),
      JsTimerRef::Immediate(t) => t.internals(),
    }
  }

  pub fn id(&self) -> i32 {
    self.internals().id()
  }

  pub fn kind(&self) -> crate::id::TimerKind {
    self.internals().kind()
  }

  pub fn cancel(&self, scheduler: &Arc<TimerScheduler>) {
    match self {
      JsTimerRef::Timeout(t) => t.cancel(scheduler),
      JsTimerRef::Immediate(t) => t.cancel(scheduler),
    }
  }

  pub fn set_ref(&self, scheduler: &Arc<TimerScheduler>, value: bool) {
    self.internals().set_ref(scheduler, value);
  }

  pub fn has_ref(&self) -> bool {
    self.internals().has_ref()
  }

  /// `refresh()` restarts timeouts and intervals; immediates ignore it.
  pub fn refresh(&self, scheduler: &Arc<TimerScheduler>) {
    if let JsTimerRef::Timeout(t) = self {
      t.refresh(scheduler);
    }
  }

  pub fn primitive_value(&self, scheduler: &Arc<TimerScheduler>) -> i32 {
    match self {
      JsTimerRef::Timeout(t) => t.primitive_value(scheduler),
      JsTimerRef::Immediate(t) => t.primitive_value(scheduler),
    }
  }

  pub fn dispose(&self, scheduler: &Arc<TimerScheduler>) {
    self.cancel(scheduler);
  }

  pub fn is_destroyed(&self) -> bool {
    self.internals().is_destroyed()
  }

  pub fn finalize(&self) {
    self.internals().finalize();
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;
  use std::sync::Arc;
  use std::sync::atomic::AtomicBool;
  use std::sync::atomic::AtomicUsize;
  use std::sync::atomic::Ordering;

  use parking_lot::Mutex;

  use super::*;
  use crate::host::AsyncCallInspector;
  use crate::id::TimerKind;
  use crate::platform::NoopLoopHandle;
  use crate::scheduler::ClearTimerArg;
  use crate::time::Timespec;

  struct TestHost {
    callbacks: HashMap<u64, Arc<dyn Fn() + Send + Sync>>,
    runnable: bool,
  }

  impl TestHost {
    fn new() -> TestHost {
      TestHost {
        callbacks: HashMap::new(),
        runnable: true,
      }
    }

    fn register(
      &mut self,
      wrapper: &JsWrapper,
      callback: impl Fn() + Send + Sync + 'static,
    ) {
      self.callbacks.insert(wrapper.0, Arc::new(callback));
    }
  }

  impl ScriptHost for TestHost {
    fn invoke_timer_callback(&mut self, wrapper: &JsWrapper) {
      if let Some(callback) = self.callbacks.get(&wrapper.0).cloned() {
        callback();
      }
    }

    fn is_script_runnable(&self) -> bool {
      self.runnable
    }
  }

  fn new_scheduler() -> Arc<TimerScheduler> {
    TimerScheduler::new(Arc::new(NoopLoopHandle))
  }

  fn handle_of(timer: &JsTimerRef) -> TimerHandle {
    match timer {
      JsTimerRef::Timeout(t) => t.handle(),
      JsTimerRef::Immediate(_) => panic!("immediates have no store handle"),
    }
  }

  fn force_due(scheduler: &Arc<TimerScheduler>, timer: &JsTimerRef) {
    scheduler.update(&handle_of(timer), Timespec::now().add_ms(-1));
  }

  #[test]
  fn timeout_fires_once_and_completes() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    let wrapper = JsWrapper(1);
    host.register(&wrapper, move || {
      fired_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    let timer = scheduler.set_timeout(wrapper, 30.0, false);
    assert_eq!(scheduler.active_timer_count(), 1);
    assert!(!timer.is_destroyed());

    force_due(&scheduler, &timer);
    scheduler.drain_timers(&mut host);

    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(timer.is_destroyed());
    assert_eq!(scheduler.active_timer_count(), 0);
    assert_eq!(scheduler.store_len(), 0);

    // draining again fires nothing
    scheduler.drain_timers(&mut host);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn cancel_is_idempotent_and_restores_keep_alive() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    let wrapper = JsWrapper(2);
    host.register(&wrapper, move || {
      fired_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    let before = scheduler.active_timer_count();
    let timer = scheduler.set_timeout(wrapper, 20.0, false);
    assert_eq!(scheduler.active_timer_count(), before + 1);

    timer.cancel(&scheduler);
    timer.cancel(&scheduler);
    assert_eq!(scheduler.active_timer_count(), before);
    assert!(timer.is_destroyed());

    scheduler.drain_timers(&mut host);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.store_len(), 0);
  }

  #[test]
  fn interval_stops_after_clearing_itself() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let holder: Arc<Mutex<Option<JsTimerRef>>> = Arc::new(Mutex::new(None));

    let wrapper = JsWrapper(3);
    let calls_in_cb = calls.clone();
    let holder_in_cb = holder.clone();
    let scheduler_in_cb = scheduler.clone();
    host.register(&wrapper, move || {
      let n = calls_in_cb.fetch_add(1, Ordering::SeqCst) + 1;
      if n == 3 {
        if let Some(timer) = holder_in_cb.lock().as_ref() {
          timer.cancel(&scheduler_in_cb);
        }
      }
    });

    let timer = scheduler.set_interval(wrapper, 5.0);
    *holder.lock() = Some(timer.clone());

    for _ in 0..6 {
      if timer.is_destroyed() {
        break;
      }
      force_due(&scheduler, &timer);
      scheduler.drain_timers(&mut host);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(timer.is_destroyed());
    assert_eq!(scheduler.active_timer_count(), 0);
    assert_eq!(scheduler.store_len(), 0);
  }

  #[test]
  fn unref_releases_keep_alive_and_ref_restores_it() {
    let scheduler = new_scheduler();
    let wrapper = JsWrapper(4);
    let timer = scheduler.set_timeout(wrapper, 50.0, false);

    assert!(timer.has_ref());
    assert_eq!(scheduler.active_timer_count(), 1);

    timer.set_ref(&scheduler, false);
    assert!(!timer.has_ref());
    assert_eq!(scheduler.active_timer_count(), 0);
    assert!(!timer.internals().is_keeping_event_loop_alive());

    timer.set_ref(&scheduler, true);
    assert_eq!(scheduler.active_timer_count(), 1);
    assert!(timer.internals().is_keeping_event_loop_alive());

    timer.cancel(&scheduler);
    assert_eq!(scheduler.active_timer_count(), 0);
  }

  #[test]
  fn ref_after_completion_does_not_reengage_keep_alive() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    let wrapper = JsWrapper(5);
    host.register(&wrapper, || {});
    let timer = scheduler.set_timeout(wrapper, 10.0, false);
    force_due(&scheduler, &timer);
    scheduler.drain_timers(&mut host);
    assert!(timer.is_destroyed());

    timer.set_ref(&scheduler, false);
    timer.set_ref(&scheduler, true);
    assert_eq!(scheduler.active_timer_count(), 0);
  }

  #[test]
  fn repeated_refresh_keeps_a_single_schedule() {
    let scheduler = new_scheduler();
    let wrapper = JsWrapper(6);
    let timer = scheduler.set_timeout(wrapper, 40.0, false);
    for _ in 0..10 {
      timer.refresh(&scheduler);
    }
    assert_eq!(scheduler.store_len(), 1);
    assert_eq!(scheduler.active_timer_count(), 1);
    timer.cancel(&scheduler);
    assert_eq!(scheduler.store_len(), 0);
    assert_eq!(scheduler.active_timer_count(), 0);
  }

  #[test]
  fn refresh_revives_a_fired_timeout() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    let wrapper = JsWrapper(7);
    host.register(&wrapper, move || {
      fired_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    let timer = scheduler.set_timeout(wrapper, 15.0, false);
    force_due(&scheduler, &timer);
    scheduler.drain_timers(&mut host);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(timer.is_destroyed());

    timer.refresh(&scheduler);
    assert!(!timer.is_destroyed());
    force_due(&scheduler, &timer);
    scheduler.drain_timers(&mut host);
    assert_eq!(fired.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn destroyed_reads_false_during_the_callback() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    let observed = Arc::new(AtomicBool::new(true));
    let holder: Arc<Mutex<Option<JsTimerRef>>> = Arc::new(Mutex::new(None));

    let wrapper = JsWrapper(8);
    let observed_in_cb = observed.clone();
    let holder_in_cb = holder.clone();
    host.register(&wrapper, move || {
      if let Some(timer) = holder_in_cb.lock().as_ref() {
        observed_in_cb.store(timer.is_destroyed(), Ordering::SeqCst);
      }
    });

    let timer = scheduler.set_timeout(wrapper, 10.0, false);
    *holder.lock() = Some(timer.clone());
    force_due(&scheduler, &timer);
    scheduler.drain_timers(&mut host);

    assert!(!observed.load(Ordering::SeqCst));
    assert!(timer.is_destroyed());
  }

  #[test]
  fn string_clear_accepts_only_the_canonical_form() {
    let scheduler = new_scheduler();
    let wrapper = JsWrapper(9);
    let timer = scheduler.set_timeout(wrapper, 60.0, false);
    let id = timer.primitive_value(&scheduler);

    scheduler.clear_timeout(ClearTimerArg::Str(&format!(" {id}")));
    assert!(!timer.is_destroyed());
    scheduler.clear_timeout(ClearTimerArg::Str(&format!("0{id}")));
    assert!(!timer.is_destroyed());
    scheduler.clear_timeout(ClearTimerArg::Str(&format!("{id}x")));
    assert!(!timer.is_destroyed());

    scheduler.clear_timeout(ClearTimerArg::Str(&id.to_string()));
    assert!(timer.is_destroyed());
  }

  #[test]
  fn numeric_clear_requires_a_prior_primitive_coercion() {
    let scheduler = new_scheduler();
    let timer = scheduler.set_timeout(JsWrapper(10), 60.0, false);
    let id = timer.id();

    // never coerced: the ID map has no entry, so this is a no-op
    scheduler.clear_timeout(ClearTimerArg::Number(id as f64));
    assert!(!timer.is_destroyed());

    timer.primitive_value(&scheduler);
    scheduler.clear_timeout(ClearTimerArg::Number(id as f64));
    assert!(timer.is_destroyed());
  }

  #[test]
  fn clear_immediate_ignores_timeout_ids_and_vice_versa() {
    let scheduler = new_scheduler();
    let timeout = scheduler.set_timeout(JsWrapper(11), 60.0, false);
    let immediate = scheduler.set_immediate(JsWrapper(12));
    let timeout_id = timeout.primitive_value(&scheduler);
    let immediate_id = immediate.primitive_value(&scheduler);

    scheduler.clear_immediate(ClearTimerArg::Number(timeout_id as f64));
    assert!(!timeout.is_destroyed());
    scheduler.clear_timeout(ClearTimerArg::Number(immediate_id as f64));
    assert!(!immediate.is_destroyed());

    timeout.cancel(&scheduler);
    immediate.cancel(&scheduler);
  }

  #[test]
  fn zero_delay_timeout_is_rewritten_to_an_immediate() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(vec![]));

    for (token, label) in [(21u64, "a"), (22, "b"), (23, "c")] {
      let order = order.clone();
      host.register(&JsWrapper(token), move || {
        order.lock().push(label);
      });
    }

    scheduler.set_immediate(JsWrapper(21));
    scheduler.set_immediate(JsWrapper(22));
    let rewritten = scheduler.set_timeout(JsWrapper(23), 0.0, false);
    assert!(matches!(rewritten, JsTimerRef::Immediate(_)));
    assert_eq!(rewritten.kind(), TimerKind::Immediate);

    scheduler.drain_immediates(&mut host);
    assert_eq!(*order.lock(), vec!["a", "b", "c"]);
    assert_eq!(scheduler.active_timer_count(), 0);
  }

  #[test]
  fn immediate_cancelled_before_the_batch_never_runs() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    let wrapper = JsWrapper(13);
    host.register(&wrapper, move || {
      fired_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    let immediate = scheduler.set_immediate(wrapper);
    assert_eq!(scheduler.active_timer_count(), 1);
    immediate.cancel(&scheduler);
    assert_eq!(scheduler.active_timer_count(), 0);

    scheduler.drain_immediates(&mut host);
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(immediate.is_destroyed());
  }

  #[test]
  fn overflowing_delay_clamps_or_saturates() {
    let scheduler = new_scheduler();
    let clamped = scheduler.set_timeout(JsWrapper(14), f64::INFINITY, false);
    assert_eq!(clamped.internals().interval_ms(), 1);
    let saturated =
      scheduler.set_timeout(JsWrapper(15), f64::INFINITY, true);
    assert_eq!(saturated.internals().interval_ms(), i32::MAX);
    clamped.cancel(&scheduler);
    saturated.cancel(&scheduler);
  }

  #[test]
  fn interval_rearm_is_anchored_before_the_callback() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    let wrapper = JsWrapper(16);
    host.register(&wrapper, || {});
    let timer = scheduler.set_interval(wrapper, 50.0);

    let start = Timespec::now();
    force_due(&scheduler, &timer);
    scheduler.drain_timers(&mut host);

    // rearmed at least a full interval past the pre-callback sample
    let next = handle_of(&timer).entry().lock().next;
    assert!(
      next.duration_since(&start) >= std::time::Duration::from_millis(50)
    );
    assert!(!timer.is_destroyed());
    timer.cancel(&scheduler);
  }

  #[test]
  fn timers_are_cancelled_when_script_cannot_run() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    host.runnable = false;
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    let wrapper = JsWrapper(17);
    host.register(&wrapper, move || {
      fired_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    let timer = scheduler.set_timeout(wrapper, 5.0, false);
    force_due(&scheduler, &timer);
    scheduler.drain_timers(&mut host);

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(timer.is_destroyed());
    assert_eq!(scheduler.active_timer_count(), 0);
  }

  #[test]
  fn finalized_wrapper_means_no_callback() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    let wrapper = JsWrapper(18);
    host.register(&wrapper, move || {
      fired_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    let timer = scheduler.set_timeout(wrapper, 5.0, false);
    timer.finalize();
    timer.finalize(); // idempotent
    force_due(&scheduler, &timer);
    scheduler.drain_timers(&mut host);

    assert_eq!(fired.load(Ordering::SeqCst), 0);
    assert!(timer.is_destroyed());
    assert_eq!(scheduler.active_timer_count(), 0);
  }

  #[test]
  fn dispose_and_object_clear_both_cancel() {
    let scheduler = new_scheduler();
    let disposed = scheduler.set_timeout(JsWrapper(24), 60.0, false);
    disposed.dispose(&scheduler);
    assert!(disposed.is_destroyed());

    let cleared = scheduler.set_timeout(JsWrapper(25), 60.0, false);
    scheduler.clear_timeout(ClearTimerArg::Object(&cleared));
    assert!(cleared.is_destroyed());
    assert_eq!(scheduler.active_timer_count(), 0);
  }

  #[test]
  fn unreffed_immediate_still_runs_when_drained() {
    let scheduler = new_scheduler();
    let mut host = TestHost::new();
    let fired = Arc::new(AtomicUsize::new(0));
    let fired_in_cb = fired.clone();
    let wrapper = JsWrapper(26);
    host.register(&wrapper, move || {
      fired_in_cb.fetch_add(1, Ordering::SeqCst);
    });

    let immediate = scheduler.set_immediate(wrapper);
    immediate.set_ref(&scheduler, false);
    assert_eq!(scheduler.active_timer_count(), 0);

    scheduler.drain_immediates(&mut host);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(immediate.is_destroyed());
  }

  #[derive(Default)]
  struct RecordingInspector {
    events: Mutex<Vec<(&'static str, u64)>>,
  }

  impl AsyncCallInspector for RecordingInspector {
    fn did_schedule_async_call(&self, async_id: u64) {
      self.events.lock().push(("schedule", async_id));
    }
    fn will_dispatch_async_call(&self, async_id: u64) {
      self.events.lock().push(("will_dispatch", async_id));
    }
    fn did_dispatch_async_call(&self, async_id: u64) {
      self.events.lock().push(("did_dispatch", async_id));
    }
    fn did_cancel_async_call(&self, async_id: u64) {
      self.events.lock().push(("cancel", async_id));
    }
  }

  #[test]
  fn inspector_sees_schedule_dispatch_and_cancel() {
    let scheduler = new_scheduler();
    let inspector = Arc::new(RecordingInspector::default());
    scheduler.set_inspector(inspector.clone());
    let mut host = TestHost::new();
    host.register(&JsWrapper(19), || {});

    let timer = scheduler.set_timeout(JsWrapper(19), 5.0, false);
    let async_id = timer.internals().timer_id().as_async_id();
    force_due(&scheduler, &timer);
    scheduler.drain_timers(&mut host);
    assert_eq!(
      *inspector.events.lock(),
      vec![
        ("schedule", async_id),
        ("will_dispatch", async_id),
        ("did_dispatch", async_id),
      ]
    );

    // a timer that comes due while script is not runnable reports a cancel
    inspector.events.lock().clear();
    host.runnable = false;
    let timer = scheduler.set_timeout(JsWrapper(19), 5.0, false);
    let async_id = timer.internals().timer_id().as_async_id();
    force_due(&scheduler, &timer);
    scheduler.drain_timers(&mut host);
    assert_eq!(
      *inspector.events.lock(),
      vec![("schedule", async_id), ("cancel", async_id)]
    );
  }
}
