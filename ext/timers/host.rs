// Copyright 2018-2026 the Deno authors. MIT license.

//! The seam between the timer core and the JS engine embedding it.
//!
//! The engine side owns value representation, callback storage (cached
//! slots on the wrapper object), exception reporting, and the inspector
//! protocol endpoint. The timer core only ever sees the opaque wrapper
//! token and the trait methods below.

/// Opaque reference to the engine-side wrapper object for a timer. The
/// wrapper's cached slots hold the user callback and its arguments; the
/// core never inspects them, it only hands the token back to
/// [`ScriptHost::invoke_timer_callback`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JsWrapper(pub u64);

/// A strong reference from native code to the JS wrapper, preventing the
/// engine's GC from collecting a timer whose callback is still scheduled.
/// Dropping the handle (`clear`/`take`) is what allows collection; both are
/// idempotent.
#[derive(Debug, Default)]
pub struct StrongHandle {
  slot: Option<JsWrapper>,
}

impl StrongHandle {
  pub fn new(wrapper: JsWrapper) -> StrongHandle {
    StrongHandle {
      slot: Some(wrapper),
    }
  }

  pub fn set(&mut self, wrapper: JsWrapper) {
    self.slot = Some(wrapper);
  }

  pub fn get(&self) -> Option<&JsWrapper> {
    self.slot.as_ref()
  }

  pub fn take(&mut self) -> Option<JsWrapper> {
    self.slot.take()
  }

  pub fn clear(&mut self) {
    self.slot = None;
  }

  pub fn is_set(&self) -> bool {
    self.slot.is_some()
  }
}

/// Engine capabilities the core needs while dispatching callbacks. Only the
/// event-loop thread calls these.
pub trait ScriptHost {
  /// Runs the callback stored on `wrapper` with its stored arguments.
  /// Implementations catch JS exceptions and report unhandled ones; a
  /// throwing callback must not unwind into the scheduler.
  fn invoke_timer_callback(&mut self, wrapper: &JsWrapper);

  /// Whether script execution is currently allowed. Timers that come due
  /// while the answer is `false` are cancelled rather than dispatched.
  fn is_script_runnable(&self) -> bool {
    true
  }

  /// Bracketing hooks around callback dispatch, for embedders that track
  /// event-loop entry (microtask checkpoints and the like).
  fn enter_event_loop(&mut self) {}
  fn exit_event_loop(&mut self) {}
}

/// Inspector notifications for async-call correlation, keyed by the packed
/// 64-bit async ID. Methods take `&self` so a dispatched callback can
/// re-enter the scheduler while a notification is in flight; implementors
/// use interior mutability.
pub trait AsyncCallInspector: Send + Sync {
  fn did_schedule_async_call(&self, _async_id: u64) {}
  fn will_dispatch_async_call(&self, _async_id: u64) {}
  fn did_dispatch_async_call(&self, _async_id: u64) {}
  fn did_cancel_async_call(&self, _async_id: u64) {}
}
