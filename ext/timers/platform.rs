// Copyright 2018-2026 the Deno authors. MIT license.

//! Bridge to the native event-loop primitive.
//!
//! Two platform shapes exist: loops with a dedicated timer handle get told
//! whenever the earliest deadline moves (`deadline_changed`), while
//! poll-driven loops ask [`TimerScheduler::get_timeout`] how long their
//! wait call may block. [`run_event_loop`] is a tokio-backed driver of the
//! second shape, also used by the integration tests.

use std::sync::Arc;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use tokio::sync::Notify;

use crate::host::ScriptHost;
use crate::scheduler::TimerScheduler;

/// Operations the timer core invokes on the native loop. Implementations
/// must not call back into the scheduler.
pub trait LoopHandle: Send + Sync {
  /// A keep-alive transition from zero to positive.
  fn ref_loop(&self) {}

  /// A keep-alive transition back to zero.
  fn unref_loop(&self) {}

  /// The earliest timer deadline moved; platforms with a dedicated timer
  /// handle rearm it here. `None` means the store emptied.
  fn deadline_changed(&self, _due_in: Option<Duration>) {}
}

/// For schedulers whose embedder drives everything through `get_timeout`.
pub struct NoopLoopHandle;

impl LoopHandle for NoopLoopHandle {}

/// Tokio-flavored loop handle: wakes the driver whenever the earliest
/// deadline moves (an insert from a foreign thread must interrupt the
/// current sleep) and mirrors keep-alive refs for observability.
#[derive(Default)]
pub struct TokioLoopHandle {
  notify: Notify,
  refs: AtomicI32,
}

impl TokioLoopHandle {
  pub fn new() -> Arc<TokioLoopHandle> {
    Arc::new(TokioLoopHandle::default())
  }

  pub fn refs(&self) -> i32 {
    self.refs.load(Ordering::Acquire)
  }

  pub async fn notified(&self) {
    self.notify.notified().await;
  }
}

impl LoopHandle for TokioLoopHandle {
  fn ref_loop(&self) {
    self.refs.fetch_add(1, Ordering::AcqRel);
  }

  fn unref_loop(&self) {
    self.refs.fetch_sub(1, Ordering::AcqRel);
  }

  fn deadline_changed(&self, _due_in: Option<Duration>) {
    self.notify.notify_one();
  }
}

/// Drives a scheduler until nothing keeps the event loop alive. One
/// iteration runs the imminent fast path, the timer drain, and an
/// immediate batch, then sleeps until the next deadline or an external
/// wake-up.
///
/// The scheduler must have been created with `loop_handle` as its
/// [`LoopHandle`].
pub async fn run_event_loop(
  scheduler: &Arc<TimerScheduler>,
  loop_handle: &Arc<TokioLoopHandle>,
  host: &mut dyn ScriptHost,
) {
  loop {
    scheduler.run_imminent(host);
    scheduler.drain_timers(host);
    scheduler.drain_immediates(host);

    if scheduler.has_pending_immediates() {
      // immediates enqueued by this batch run on the next iteration
      continue;
    }
    if !scheduler.keeps_loop_alive() {
      break;
    }
    match scheduler.get_timeout(host) {
      Some(due_in) if due_in.is_zero() => continue,
      Some(due_in) => {
        tokio::select! {
          _ = tokio::time::sleep(due_in) => {}
          _ = loop_handle.notified() => {}
        }
      }
      None => loop_handle.notified().await,
    }
  }
}
