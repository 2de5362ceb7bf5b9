// Copyright 2018-2026 the Deno authors. MIT license.

use std::cell::Cell;
use std::cell::Ref;
use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::ffi::c_int;
use std::fmt;
use std::net::SocketAddr;
use std::rc::Rc;

use deno_error::JsErrorBox;
use smallvec::smallvec;

use crate::callback::CallbackKey;
use crate::callback::CallbackRegistry;
use crate::error::BridgeError;
use crate::error::project;
use crate::error::project_len;
use crate::handle::CallbackSlot;
use crate::handle::Handle;
use crate::handle::HandleFlags;
use crate::handle::HandleKind;
use crate::marshal::BufferPool;
use crate::marshal::ReadBuf;
use crate::marshal::addr_values;
use crate::marshal::copy_inbound;
use crate::native::Completion;
use crate::native::InitParams;
use crate::native::NativeHandleId;
use crate::native::NativeLoop;
use crate::native::RequestOp;
use crate::native::RunMode;
use crate::native::StartOp;
use crate::native::StopOp;
use crate::options::BridgeOptions;
use crate::options::CallbackErrorPolicy;
use crate::request::PendingRequest;
use crate::request::RequestId;
use crate::request::RequestKind;
use crate::value::Callable;
use crate::value::Value;
use crate::value::Values;

/// Slots whose callbacks live until stopped or until the handle closes.
const PERSISTENT_SLOTS: [CallbackSlot; 3] = [
  CallbackSlot::Read,
  CallbackSlot::Start,
  CallbackSlot::Connection,
];

pub(crate) struct LoopInner {
  native: RefCell<Box<dyn NativeLoop>>,
  registry: Rc<RefCell<CallbackRegistry>>,
  pool: BufferPool,
  options: Rc<BridgeOptions>,
  is_default: bool,
  /// Native identity to wrapper, from creation until close completes.
  handles: RefCell<HashMap<NativeHandleId, Handle>>,
  requests: RefCell<HashMap<RequestId, PendingRequest>>,
  next_handle_id: Cell<u64>,
  next_request_id: Cell<u64>,
  /// Completions left undispatched when a callback error stopped a run.
  backlog: RefCell<VecDeque<Completion>>,
  stop_flag: Cell<bool>,
}

impl LoopInner {
  fn registry(&self) -> std::cell::RefMut<'_, CallbackRegistry> {
    self.registry.borrow_mut()
  }

  pub(crate) fn with_native<R>(
    &self,
    f: impl FnOnce(&mut dyn NativeLoop) -> R,
  ) -> R {
    let mut native = self.native.borrow_mut();
    f(&mut **native)
  }

  pub(crate) fn start(
    &self,
    handle: &Handle,
    slot: CallbackSlot,
    callback: Callable,
    op: StartOp<'_>,
  ) -> Result<CallbackKey, BridgeError> {
    let key = self.registry().register(callback);
    let status = self.native.borrow_mut().start(handle.id(), op);
    if let Err(err) = project(status) {
      self.registry().release(key);
      return Err(BridgeError::NativeSubmit(err));
    }
    if let Some(prev) = handle.replace_slot(slot, Some(key)) {
      self.registry().release(prev);
    }
    log::trace!("{} handle {:?} started {op:?}", handle.kind(), handle.id());
    Ok(key)
  }

  pub(crate) fn stop(
    &self,
    handle: &Handle,
    slot: CallbackSlot,
    op: StopOp,
  ) -> Result<(), BridgeError> {
    let status = self.native.borrow_mut().stop(handle.id(), op);
    if let Some(key) = handle.take_slot(slot) {
      self.registry().release(key);
    }
    project(status).map_err(BridgeError::NativeSubmit)?;
    Ok(())
  }

  pub(crate) fn submit(
    &self,
    handle: &Handle,
    kind: RequestKind,
    payload: Option<Value>,
    callback: Callable,
    op: RequestOp<'_>,
  ) -> Result<RequestId, BridgeError> {
    let req = RequestId::new(self.next_request_id.get() + 1);
    self.next_request_id.set(req.raw());

    let key = {
      let mut registry = self.registry();
      let key = registry.register(callback);
      if let Some(payload) = payload {
        registry.anchor(req, payload);
      }
      key
    };
    self.requests.borrow_mut().insert(
      req,
      PendingRequest {
        kind,
        handle: handle.clone(),
        callback: key,
      },
    );

    let status = self.native.borrow_mut().submit(handle.id(), req, op);
    if let Err(err) = project(status) {
      let pending = self.requests.borrow_mut().remove(&req);
      let payload = {
        let mut registry = self.registry();
        registry.release(key);
        registry.unanchor(req)
      };
      drop(pending);
      drop(payload);
      return Err(BridgeError::NativeSubmit(err));
    }
    log::trace!("{} {req:?} submitted on {:?}", kind.name(), handle.id());
    Ok(req)
  }

  pub(crate) fn close(&self, handle: &Handle, on_closed: Option<Callable>) {
    if !handle.is_open() {
      log::debug!(
        "{} handle {:?} is already {}",
        handle.kind(),
        handle.id(),
        handle.state()
      );
      return;
    }
    handle.mark_closing();
    if let Some(on_closed) = on_closed {
      let key = self.registry().register(on_closed);
      handle.replace_slot(CallbackSlot::Close, Some(key));
    }
    log::debug!("closing {} handle {:?}", handle.kind(), handle.id());
    self.native.borrow_mut().close(handle.id());
  }
}

/// A managed reference to one native event loop. Clones share the loop.
#[derive(Clone)]
pub struct UvLoop(Rc<LoopInner>);

impl UvLoop {
  pub(crate) fn new(
    native: Box<dyn NativeLoop>,
    registry: Rc<RefCell<CallbackRegistry>>,
    pool: BufferPool,
    options: Rc<BridgeOptions>,
    is_default: bool,
  ) -> Self {
    Self(Rc::new(LoopInner {
      native: RefCell::new(native),
      registry,
      pool,
      options,
      is_default,
      handles: RefCell::new(HashMap::new()),
      requests: RefCell::new(HashMap::new()),
      next_handle_id: Cell::new(0),
      next_request_id: Cell::new(0),
      backlog: RefCell::new(VecDeque::new()),
      stop_flag: Cell::new(false),
    }))
  }

  pub(crate) fn from_inner(inner: Rc<LoopInner>) -> Self {
    Self(inner)
  }

  pub fn is_default(&self) -> bool {
    self.0.is_default
  }

  pub fn ptr_eq(&self, other: &UvLoop) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }

  /// Allocates a native handle of `kind` together with its wrapper. If native
  /// initialization fails nothing is kept.
  pub fn create(
    &self,
    kind: HandleKind,
    params: InitParams,
  ) -> Result<Handle, BridgeError> {
    let id = NativeHandleId::new(self.0.next_handle_id.get() + 1);
    self.0.next_handle_id.set(id.raw());

    let status = self.0.native.borrow_mut().init(id, kind, params);
    project(status).map_err(BridgeError::NativeInit)?;

    let mut flags = HandleFlags::OPEN;
    if kind.is_stream() {
      flags.insert(HandleFlags::STREAM);
    }
    if self.0.is_default {
      flags.insert(HandleFlags::DEFAULT_LOOP);
    }
    let handle = Handle::new(id, kind, Rc::downgrade(&self.0), flags);
    self.0.handles.borrow_mut().insert(id, handle.clone());
    log::debug!("created {kind} handle {id:?}");
    Ok(handle)
  }

  /// Recovers the wrapper of a native handle. Fails once its close completed.
  pub fn by_native_identity(&self, id: NativeHandleId) -> Option<Handle> {
    self.0.handles.borrow().get(&id).cloned()
  }

  /// Runs the native loop and dispatches its completions.
  ///
  /// Returns whether the loop is still alive. If a callback fails and the
  /// error policy is [`CallbackErrorPolicy::Propagate`], the error is
  /// returned and the rest of the batch is kept for the next run.
  pub fn run(&self, mode: RunMode) -> Result<bool, JsErrorBox> {
    self.0.stop_flag.set(false);
    loop {
      let mut batch = std::mem::take(&mut *self.0.backlog.borrow_mut());
      if batch.is_empty() {
        let completions =
          self.0.native.borrow_mut().run(mode, &self.0.pool);
        batch.extend(completions);
      }

      while let Some(completion) = batch.pop_front() {
        if let Err(err) = self.dispatch(completion) {
          match self.0.options.callback_error_policy {
            CallbackErrorPolicy::Propagate => {
              let mut backlog = self.0.backlog.borrow_mut();
              batch.extend(backlog.drain(..));
              *backlog = batch;
              return Err(err);
            }
            CallbackErrorPolicy::Log => {
              log::error!("uncaught error in loop callback: {err}");
            }
          }
        }
      }

      if mode != RunMode::Default || self.0.stop_flag.get() || !self.alive()
      {
        break;
      }
    }
    Ok(self.alive())
  }

  /// Makes a running [`RunMode::Default`] run return after the current
  /// batch.
  pub fn stop(&self) {
    self.0.stop_flag.set(true);
  }

  pub fn alive(&self) -> bool {
    !self.0.backlog.borrow().is_empty() || self.0.native.borrow().alive()
  }

  /// The callback registry shared by every loop of the runtime.
  pub fn registry(&self) -> Ref<'_, CallbackRegistry> {
    self.0.registry.borrow()
  }

  pub fn pool(&self) -> &BufferPool {
    &self.0.pool
  }

  pub fn options(&self) -> &BridgeOptions {
    &self.0.options
  }

  /// Handles whose close has not completed yet.
  pub fn handle_count(&self) -> usize {
    self.0.handles.borrow().len()
  }

  pub fn pending_requests(&self) -> usize {
    self.0.requests.borrow().len()
  }

  fn dispatch(&self, completion: Completion) -> Result<(), JsErrorBox> {
    log::trace!("dispatching {completion:?}");
    if let Completion::Request { req, status } = completion {
      return self.complete_request(req, status);
    }
    let Some(id) = completion.handle() else {
      return Ok(());
    };
    let Some(handle) = self.by_native_identity(id) else {
      log::warn!("dropping completion for unknown handle {id:?}");
      return Ok(());
    };
    match completion {
      Completion::Closed { .. } => self.finish_close(handle),
      Completion::Read { nread, buf, .. } => self.on_read(handle, nread, buf),
      Completion::Recv {
        nread,
        buf,
        addr,
        flags,
        ..
      } => self.on_recv(handle, nread, buf, addr, flags),
      Completion::Connection { status, .. } => {
        self.on_connection(handle, status)
      }
      Completion::FsEvent {
        filename,
        events,
        status,
        ..
      } => self.on_fs_event(handle, filename, events, status),
      Completion::Tick { .. } => self.on_tick(handle),
      Completion::Request { .. } => Ok(()),
    }
  }

  /// Resolves the persistent callback stored in `slot`. Nothing is delivered
  /// to a handle that started closing, even if its completion was already
  /// queued.
  fn persistent(
    &self,
    handle: &Handle,
    slot: CallbackSlot,
  ) -> Option<Callable> {
    if !handle.is_open() {
      return None;
    }
    let key = handle.slot(slot)?;
    let registry = self.0.registry.borrow();
    match registry.resolve(key) {
      Some(callback) => Some(callback),
      None if registry.is_shut_down() => None,
      None => panic!("{key:?} of {slot:?} slot is not registered"),
    }
  }

  /// Stops a persistent operation after a native error. The callback stays
  /// usable for the error delivery, its key is released.
  fn stop_after_error(&self, handle: &Handle, slot: CallbackSlot, op: StopOp) {
    let status = self.0.native.borrow_mut().stop(handle.id(), op);
    if status < 0 {
      log::debug!("stopping {op:?} on {:?} failed: {status}", handle.id());
    }
    if let Some(key) = handle.take_slot(slot) {
      self.0.registry.borrow_mut().release(key);
    }
  }

  fn finish_close(&self, handle: Handle) -> Result<(), JsErrorBox> {
    let on_closed = {
      let mut registry = self.0.registry.borrow_mut();
      for slot in PERSISTENT_SLOTS {
        if let Some(key) = handle.take_slot(slot) {
          registry.release(key);
        }
      }
      handle
        .take_slot(CallbackSlot::Close)
        .and_then(|key| registry.resolve_and_release(key))
    };
    self.0.handles.borrow_mut().remove(&handle.id());
    handle.mark_closed();
    log::debug!("closed {} handle {:?}", handle.kind(), handle.id());
    match on_closed {
      Some(on_closed) => on_closed.call(&[handle.into()]),
      None => Ok(()),
    }
  }

  fn on_read(
    &self,
    handle: Handle,
    nread: isize,
    buf: Option<ReadBuf>,
  ) -> Result<(), JsErrorBox> {
    let Some(callback) = self.persistent(&handle, CallbackSlot::Read) else {
      return Ok(());
    };
    let args: Values = match project_len(nread) {
      Ok(0) => return Ok(()),
      Ok(n) => smallvec![
        handle.into(),
        Value::Nil,
        Value::String(copy_inbound(buf, n)),
        Value::Integer(n as i64),
      ],
      Err(err) => {
        drop(buf);
        self.stop_after_error(&handle, CallbackSlot::Read, StopOp::Read);
        smallvec![handle.into(), err.into()]
      }
    };
    callback.call(&args)
  }

  fn on_recv(
    &self,
    handle: Handle,
    nread: isize,
    buf: Option<ReadBuf>,
    addr: Option<SocketAddr>,
    flags: u32,
  ) -> Result<(), JsErrorBox> {
    let Some(callback) = self.persistent(&handle, CallbackSlot::Read) else {
      return Ok(());
    };
    let flags = Value::Integer(flags as i64);
    let args: Values = match project_len(nread) {
      Ok(0) if addr.is_none() => return Ok(()),
      Ok(n) => {
        let mut args: Values = smallvec![
          handle.into(),
          Value::Nil,
          Value::String(copy_inbound(buf, n)),
          flags,
        ];
        args.extend(addr_values(addr));
        args
      }
      Err(err) => {
        drop(buf);
        self.stop_after_error(&handle, CallbackSlot::Read, StopOp::Recv);
        let mut args: Values =
          smallvec![handle.into(), err.into(), Value::Nil, flags];
        args.extend(addr_values(addr));
        args
      }
    };
    callback.call(&args)
  }

  fn on_connection(
    &self,
    handle: Handle,
    status: c_int,
  ) -> Result<(), JsErrorBox> {
    let Some(callback) = self.persistent(&handle, CallbackSlot::Connection)
    else {
      return Ok(());
    };
    callback.call(&[handle.into(), project(status).err().into()])
  }

  fn on_fs_event(
    &self,
    handle: Handle,
    filename: Option<String>,
    events: i32,
    status: c_int,
  ) -> Result<(), JsErrorBox> {
    let Some(callback) = self.persistent(&handle, CallbackSlot::Start) else {
      return Ok(());
    };
    callback.call(&[
      handle.into(),
      project(status).err().into(),
      filename.map(Value::string).unwrap_or_default(),
      Value::Integer(events as i64),
    ])
  }

  fn on_tick(&self, handle: Handle) -> Result<(), JsErrorBox> {
    let Some(callback) = self.persistent(&handle, CallbackSlot::Start) else {
      return Ok(());
    };
    callback.call(&[handle.into()])
  }

  /// Delivers a one-shot completion. The callback and the anchored payload
  /// are released before the callback runs.
  fn complete_request(
    &self,
    req: RequestId,
    status: c_int,
  ) -> Result<(), JsErrorBox> {
    let Some(pending) = self.0.requests.borrow_mut().remove(&req) else {
      panic!("completion for unknown {req:?}");
    };
    let (callback, payload) = {
      let mut registry = self.0.registry.borrow_mut();
      (
        registry.resolve_and_release(pending.callback),
        registry.unanchor(req),
      )
    };
    drop(payload);
    log::trace!(
      "{} {req:?} completed with status {status}",
      pending.kind.name()
    );
    match callback {
      Some(callback) => {
        callback.call(&[pending.handle.into(), project(status).err().into()])
      }
      None => Ok(()),
    }
  }
}

impl fmt::Debug for UvLoop {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("UvLoop")
      .field("is_default", &self.0.is_default)
      .field("handles", &self.handle_count())
      .field("pending_requests", &self.pending_requests())
      .finish()
  }
}
