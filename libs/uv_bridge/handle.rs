// Copyright 2018-2026 the Deno authors. MIT license.

use std::cell::Cell;
use std::cell::RefCell;
use std::fmt;
use std::ops::BitOr;
use std::rc::Rc;
use std::rc::Weak;

use crate::callback::CallbackKey;
use crate::error::BridgeError;
use crate::event_loop::LoopInner;
use crate::event_loop::UvLoop;
use crate::native::NativeHandleId;
use crate::native::NativeLoop;
use crate::native::RequestOp;
use crate::native::StartOp;
use crate::native::StopOp;
use crate::request::RequestId;
use crate::request::RequestKind;
use crate::value::Callable;
use crate::value::Value;

/// The native resource kinds the bridge knows how to wrap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
  Timer,
  Idle,
  Prepare,
  Check,
  Tcp,
  NamedPipe,
  Tty,
  Udp,
  FsEvent,
}

impl HandleKind {
  pub fn name(self) -> &'static str {
    match self {
      Self::Timer => "timer",
      Self::Idle => "idle",
      Self::Prepare => "prepare",
      Self::Check => "check",
      Self::Tcp => "tcp",
      Self::NamedPipe => "pipe",
      Self::Tty => "tty",
      Self::Udp => "udp",
      Self::FsEvent => "fs_event",
    }
  }

  /// Numeric `uv_handle_type` of the kind, as the native library numbers
  /// them. Zero stands for "no handle".
  pub fn type_code(self) -> i64 {
    match self {
      Self::Check => 2,
      Self::FsEvent => 3,
      Self::Idle => 6,
      Self::NamedPipe => 7,
      Self::Prepare => 9,
      Self::Tcp => 12,
      Self::Timer => 13,
      Self::Tty => 14,
      Self::Udp => 15,
    }
  }

  /// Kinds backed by a native stream (read/write/listen capable).
  pub fn is_stream(self) -> bool {
    matches!(self, Self::Tcp | Self::NamedPipe | Self::Tty)
  }

  /// Kinds that fire a plain "tick" on every loop iteration or timeout.
  pub fn is_tick(self) -> bool {
    matches!(self, Self::Timer | Self::Idle | Self::Prepare | Self::Check)
  }
}

impl fmt::Display for HandleKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

/// Capability and lifecycle bits of a handle.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct HandleFlags(u8);

impl HandleFlags {
  pub const OPEN: Self = Self(1 << 0);
  pub const STREAM: Self = Self(1 << 1);
  pub const DEFAULT_LOOP: Self = Self(1 << 2);

  pub const fn empty() -> Self {
    Self(0)
  }

  pub const fn union(self, other: Self) -> Self {
    Self(self.0 | other.0)
  }

  /// True if every bit of `other` is set.
  pub fn contains(self, other: Self) -> bool {
    self.0 & other.0 == other.0
  }

  pub fn insert(&mut self, other: Self) {
    self.0 |= other.0;
  }

  pub fn remove(&mut self, other: Self) {
    self.0 &= !other.0;
  }
}

impl BitOr for HandleFlags {
  type Output = Self;

  fn bitor(self, rhs: Self) -> Self {
    self.union(rhs)
  }
}

impl fmt::Debug for HandleFlags {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let mut set = f.debug_set();
    for (flag, name) in [
      (Self::OPEN, "OPEN"),
      (Self::STREAM, "STREAM"),
      (Self::DEFAULT_LOOP, "DEFAULT_LOOP"),
    ] {
      if self.contains(flag) {
        set.entry(&name);
      }
    }
    set.finish()
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
  Open,
  /// Close was requested, the native side has not confirmed it yet.
  Closing,
  Closed,
}

impl fmt::Display for HandleState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(match self {
      Self::Open => "open",
      Self::Closing => "closing",
      Self::Closed => "closed",
    })
  }
}

/// Named storage for the registry keys of a handle's callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackSlot {
  /// Stream reads and UDP receives.
  Read,
  /// Watchers, ticks and timers.
  Start,
  /// Incoming connections on a listening stream.
  Connection,
  Close,
}

const SLOT_COUNT: usize = 4;

pub(crate) struct HandleInner {
  id: NativeHandleId,
  kind: HandleKind,
  loop_: Weak<LoopInner>,
  flags: Cell<HandleFlags>,
  closed: Cell<bool>,
  slots: RefCell<[Option<CallbackKey>; SLOT_COUNT]>,
}

/// The managed wrapper of one native handle. Clones share the same wrapper;
/// equality is identity.
#[derive(Clone)]
pub struct Handle(Rc<HandleInner>);

impl Handle {
  pub(crate) fn new(
    id: NativeHandleId,
    kind: HandleKind,
    loop_: Weak<LoopInner>,
    flags: HandleFlags,
  ) -> Self {
    Self(Rc::new(HandleInner {
      id,
      kind,
      loop_,
      flags: Cell::new(flags),
      closed: Cell::new(false),
      slots: RefCell::new([None; SLOT_COUNT]),
    }))
  }

  pub fn id(&self) -> NativeHandleId {
    self.0.id
  }

  pub fn kind(&self) -> HandleKind {
    self.0.kind
  }

  pub fn flags(&self) -> HandleFlags {
    self.0.flags.get()
  }

  pub fn state(&self) -> HandleState {
    if self.flags().contains(HandleFlags::OPEN) {
      HandleState::Open
    } else if self.0.closed.get() {
      HandleState::Closed
    } else {
      HandleState::Closing
    }
  }

  pub fn is_open(&self) -> bool {
    self.state() == HandleState::Open
  }

  /// True once close has been requested, including after it completed.
  pub fn is_closing(&self) -> bool {
    !self.is_open()
  }

  pub fn is_stream(&self) -> bool {
    self.flags().contains(HandleFlags::STREAM)
  }

  /// The registry key currently stored in `slot`.
  pub fn slot(&self, slot: CallbackSlot) -> Option<CallbackKey> {
    self.0.slots.borrow()[slot as usize]
  }

  pub(crate) fn replace_slot(
    &self,
    slot: CallbackSlot,
    key: Option<CallbackKey>,
  ) -> Option<CallbackKey> {
    std::mem::replace(&mut self.0.slots.borrow_mut()[slot as usize], key)
  }

  pub(crate) fn take_slot(&self, slot: CallbackSlot) -> Option<CallbackKey> {
    self.replace_slot(slot, None)
  }

  pub(crate) fn mark_closing(&self) {
    let mut flags = self.flags();
    flags.remove(HandleFlags::OPEN);
    self.0.flags.set(flags);
  }

  pub(crate) fn mark_closed(&self) {
    self.0.closed.set(true);
  }

  /// Fails unless every bit of `required` is set. Checked before any native
  /// call so a closing handle never reaches the native layer.
  pub fn check(&self, required: HandleFlags) -> Result<(), BridgeError> {
    let flags = self.flags();
    if required.contains(HandleFlags::OPEN)
      && !flags.contains(HandleFlags::OPEN)
    {
      return Err(BridgeError::InvalidState {
        kind: self.kind(),
        state: self.state(),
      });
    }
    if required.contains(HandleFlags::STREAM)
      && !flags.contains(HandleFlags::STREAM)
    {
      return Err(BridgeError::TypeMismatch {
        expected: "stream",
        found: self.kind().name(),
      });
    }
    Ok(())
  }

  pub fn check_kind(&self, kind: HandleKind) -> Result<(), BridgeError> {
    if self.kind() != kind {
      return Err(BridgeError::TypeMismatch {
        expected: kind.name(),
        found: self.kind().name(),
      });
    }
    Ok(())
  }

  /// Recovers the wrapper from a managed value, checking its kind and flags.
  pub fn check_and_cast(
    value: &Value,
    kind: Option<HandleKind>,
    required: HandleFlags,
  ) -> Result<Handle, BridgeError> {
    let Some(handle) = value.as_handle() else {
      return Err(BridgeError::TypeMismatch {
        expected: kind.map(HandleKind::name).unwrap_or("handle"),
        found: value.type_name(),
      });
    };
    if let Some(kind) = kind {
      handle.check_kind(kind)?;
    }
    handle.check(required)?;
    Ok(handle.clone())
  }

  pub(crate) fn loop_inner(&self) -> Result<Rc<LoopInner>, BridgeError> {
    self.0.loop_.upgrade().ok_or(BridgeError::LoopClosed)
  }

  /// The loop this handle was created on.
  pub fn uv_loop(&self) -> Result<UvLoop, BridgeError> {
    self.loop_inner().map(UvLoop::from_inner)
  }

  /// Begins a persistent operation and stores `callback` in `slot` until it
  /// is stopped or the handle closes.
  pub fn start(
    &self,
    slot: CallbackSlot,
    callback: Callable,
    op: StartOp<'_>,
  ) -> Result<CallbackKey, BridgeError> {
    self.check(HandleFlags::OPEN)?;
    self.loop_inner()?.start(self, slot, callback, op)
  }

  /// Ends a persistent operation and releases its callback.
  pub fn stop(
    &self,
    slot: CallbackSlot,
    op: StopOp,
  ) -> Result<(), BridgeError> {
    self.check(HandleFlags::OPEN)?;
    self.loop_inner()?.stop(self, slot, op)
  }

  /// Submits a one-shot request. `payload` stays retained until the request
  /// completes; `op` usually borrows from it.
  pub fn submit(
    &self,
    kind: RequestKind,
    payload: Option<Value>,
    callback: Callable,
    op: RequestOp<'_>,
  ) -> Result<RequestId, BridgeError> {
    self.check(HandleFlags::OPEN)?;
    self.loop_inner()?.submit(self, kind, payload, callback, op)
  }

  /// Requests an asynchronous close. Idempotent: closing a handle that is
  /// already closing does nothing and drops `on_closed`.
  pub fn close(&self, on_closed: Option<Callable>) -> Result<(), BridgeError> {
    self.loop_inner()?.close(self, on_closed);
    Ok(())
  }

  /// Runs a synchronous native call-through after checking `required`.
  pub fn with_native<R>(
    &self,
    required: HandleFlags,
    f: impl FnOnce(&mut dyn NativeLoop, NativeHandleId) -> R,
  ) -> Result<R, BridgeError> {
    self.check(required)?;
    let inner = self.loop_inner()?;
    Ok(inner.with_native(|native| f(native, self.id())))
  }
}

impl PartialEq for Handle {
  fn eq(&self, other: &Self) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }
}

impl Eq for Handle {}

impl fmt::Debug for Handle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Handle")
      .field("id", &self.id())
      .field("kind", &self.kind())
      .field("state", &self.state())
      .finish()
  }
}
