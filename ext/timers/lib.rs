// Copyright 2018-2026 the Deno authors. MIT license.

//! Timer scheduling core of the event loop.
//!
//! The scheduler keeps active timers in a store ordered by
//! millisecond-truncated fire time, drives the JS-visible `setTimeout` /
//! `setInterval` / `setImmediate` lifecycle (clear, ref/unref, refresh,
//! `_destroyed`), accounts for which timers keep the event loop alive, and
//! doubles as a generic deadline facility for non-JS subsystems through
//! [`SubsystemTimer`]. Host-runloop timers ([`RunLoopTimer`]) get a
//! lock-free fast path for zero-delay firing.
//!
//! The JS engine sits behind the traits in [`host`]; the native event loop
//! sits behind [`platform::LoopHandle`].

pub mod host;
pub mod id;
pub mod internals;
pub mod objects;
pub mod platform;
pub mod runloop;
pub mod scheduler;
pub mod store;
pub mod time;
pub mod timer;

pub use host::AsyncCallInspector;
pub use host::JsWrapper;
pub use host::ScriptHost;
pub use host::StrongHandle;
pub use id::TimerId;
pub use id::TimerKind;
pub use id::parse_canonical_id;
pub use internals::TimerObjectInternals;
pub use objects::ImmediateObject;
pub use objects::JsTimerRef;
pub use objects::TimeoutObject;
pub use platform::LoopHandle;
pub use platform::NoopLoopHandle;
pub use platform::TokioLoopHandle;
pub use platform::run_event_loop;
pub use runloop::RunLoopCallback;
pub use runloop::RunLoopTimer;
pub use scheduler::ClearTimerArg;
pub use scheduler::TimerScheduler;
pub use store::TimerStore;
pub use time::Timespec;
pub use timer::EventLoopTimer;
pub use timer::FireResult;
pub use timer::SubsystemTimer;
pub use timer::TimerHandle;
pub use timer::TimerState;
