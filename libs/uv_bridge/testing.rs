// Copyright 2018-2026 the Deno authors. MIT license.

//! A scripted stand-in for the native loop.
//!
//! [`StubLoop`] is handed to the bridge, [`StubController`] stays with the
//! test. The controller queues the completions the next `run` returns and
//! inspects every native call the bridge issued. Calls on a handle whose
//! close was already requested panic, since a real loop would touch freed
//! memory.

use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::ffi::c_int;
use std::net::SocketAddr;
use std::rc::Rc;

use crate::error::errno;
use crate::handle::Handle;
use crate::handle::HandleKind;
use crate::marshal::BufferPool;
use crate::native::Completion;
use crate::native::InitParams;
use crate::native::Membership;
use crate::native::NativeHandleId;
use crate::native::NativeLoop;
use crate::native::RequestOp;
use crate::native::RunMode;
use crate::native::StartOp;
use crate::native::StopOp;
use crate::request::RequestId;

#[derive(Debug)]
enum StubEvent {
  Read {
    handle: NativeHandleId,
    nread: isize,
    data: Vec<u8>,
  },
  Recv {
    handle: NativeHandleId,
    nread: isize,
    data: Vec<u8>,
    addr: Option<SocketAddr>,
    flags: u32,
  },
  Connection {
    handle: NativeHandleId,
    status: c_int,
  },
  FsEvent {
    handle: NativeHandleId,
    filename: Option<String>,
    events: i32,
    status: c_int,
  },
  Tick {
    handle: NativeHandleId,
  },
  Request {
    req: RequestId,
    status: c_int,
  },
  Closed {
    handle: NativeHandleId,
  },
}

impl StubEvent {
  fn handle(&self) -> Option<NativeHandleId> {
    match self {
      Self::Read { handle, .. }
      | Self::Recv { handle, .. }
      | Self::Connection { handle, .. }
      | Self::FsEvent { handle, .. }
      | Self::Tick { handle }
      | Self::Closed { handle } => Some(*handle),
      Self::Request { .. } => None,
    }
  }

  fn stopped_by(&self, op: StopOp) -> bool {
    matches!(
      (self, op),
      (Self::Read { .. }, StopOp::Read)
        | (Self::Recv { .. }, StopOp::Recv)
        | (Self::Tick { .. }, StopOp::Tick | StopOp::Timer)
        | (Self::FsEvent { .. }, StopOp::Watch)
    )
  }

  fn into_completion(self, pool: &BufferPool) -> Completion {
    let fill = |data: &[u8]| {
      let mut buf = pool.take();
      buf.fill(data);
      Some(buf)
    };
    match self {
      Self::Read {
        handle,
        nread,
        data,
      } => Completion::Read {
        handle,
        nread,
        buf: fill(&data),
      },
      Self::Recv {
        handle,
        nread,
        data,
        addr,
        flags,
      } => Completion::Recv {
        handle,
        nread,
        buf: fill(&data),
        addr,
        flags,
      },
      Self::Connection { handle, status } => {
        Completion::Connection { handle, status }
      }
      Self::FsEvent {
        handle,
        filename,
        events,
        status,
      } => Completion::FsEvent {
        handle,
        filename,
        events,
        status,
      },
      Self::Tick { handle } => Completion::Tick { handle },
      Self::Request { req, status } => Completion::Request { req, status },
      Self::Closed { handle } => Completion::Closed { handle },
    }
  }
}

#[derive(Debug)]
struct StubHandle {
  kind: HandleKind,
  ipc: bool,
  closing: bool,
  active: bool,
  referenced: bool,
  timer: Option<(u64, u64)>,
  watch: Option<(String, u32)>,
  name: Option<String>,
  sockname: Option<SocketAddr>,
  pending: (c_int, Option<HandleKind>),
  options: HashMap<&'static str, String>,
}

#[derive(Debug, Default)]
struct StubState {
  calls: Vec<&'static str>,
  failures: HashMap<&'static str, c_int>,
  handles: HashMap<NativeHandleId, StubHandle>,
  events: VecDeque<StubEvent>,
  outstanding: Vec<(RequestId, NativeHandleId)>,
  payloads: Vec<Vec<u8>>,
}

impl StubState {
  /// Records a call on `id` and returns the scripted status for `op`.
  fn call(&mut self, op: &'static str, id: NativeHandleId) -> c_int {
    self.calls.push(op);
    match self.handles.get(&id) {
      Some(handle) if handle.closing => {
        panic!("native {op} on closing handle {id:?}")
      }
      Some(_) => {}
      None => panic!("native {op} on unknown handle {id:?}"),
    }
    self.failures.remove(op).unwrap_or(0)
  }

  fn handle(&mut self, id: NativeHandleId) -> &mut StubHandle {
    match self.handles.get_mut(&id) {
      Some(handle) => handle,
      None => panic!("unknown handle {id:?}"),
    }
  }

  fn set_option(
    &mut self,
    id: NativeHandleId,
    name: &'static str,
    value: String,
  ) {
    self.handle(id).options.insert(name, value);
  }
}

/// The native half given to the bridge.
pub struct StubLoop {
  state: Rc<RefCell<StubState>>,
}

/// The test's half. Clones share the same stub.
#[derive(Clone)]
pub struct StubController {
  state: Rc<RefCell<StubState>>,
}

impl StubLoop {
  #[allow(clippy::new_ret_no_self)]
  pub fn new() -> (StubLoop, StubController) {
    let state = Rc::new(RefCell::new(StubState::default()));
    (
      StubLoop {
        state: state.clone(),
      },
      StubController { state },
    )
  }
}

impl NativeLoop for StubLoop {
  fn init(
    &mut self,
    handle: NativeHandleId,
    kind: HandleKind,
    params: InitParams,
  ) -> c_int {
    let mut state = self.state.borrow_mut();
    state.calls.push("init");
    if let Some(code) = state.failures.remove("init") {
      return code;
    }
    state.handles.insert(
      handle,
      StubHandle {
        kind,
        ipc: params.ipc,
        closing: false,
        active: false,
        referenced: true,
        timer: None,
        watch: None,
        name: None,
        sockname: None,
        pending: (0, None),
        options: HashMap::new(),
      },
    );
    0
  }

  fn close(&mut self, handle: NativeHandleId) {
    let mut state = self.state.borrow_mut();
    state.call("close", handle);
    let entry = state.handle(handle);
    entry.closing = true;
    entry.active = false;
    state.events.retain(|event| event.handle() != Some(handle));
    let (canceled, outstanding): (Vec<_>, Vec<_>) = std::mem::take(
      &mut state.outstanding,
    )
    .into_iter()
    .partition(|(_, owner)| *owner == handle);
    state.outstanding = outstanding;
    for (req, _) in canceled {
      state.events.push_back(StubEvent::Request {
        req,
        status: errno::ECANCELED,
      });
    }
    state.events.push_back(StubEvent::Closed { handle });
  }

  fn run(&mut self, _mode: RunMode, pool: &BufferPool) -> Vec<Completion> {
    let events = std::mem::take(&mut self.state.borrow_mut().events);
    events
      .into_iter()
      .map(|event| event.into_completion(pool))
      .collect()
  }

  fn alive(&self) -> bool {
    !self.state.borrow().events.is_empty()
  }

  fn start(&mut self, handle: NativeHandleId, op: StartOp<'_>) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("start", handle);
    if status < 0 {
      return status;
    }
    let entry = state.handle(handle);
    entry.active = true;
    match op {
      StartOp::Timer { timeout, repeat } => {
        entry.timer = Some((timeout, repeat))
      }
      StartOp::Watch { path, flags } => {
        entry.watch = Some((path.to_string(), flags))
      }
      StartOp::Listen { backlog } => {
        entry.options.insert("backlog", backlog.to_string());
      }
      StartOp::Read | StartOp::Recv | StartOp::Tick => {}
    }
    0
  }

  fn stop(&mut self, handle: NativeHandleId, op: StopOp) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("stop", handle);
    state.handle(handle).active = false;
    state
      .events
      .retain(|event| event.handle() != Some(handle) || !event.stopped_by(op));
    status
  }

  fn submit(
    &mut self,
    handle: NativeHandleId,
    req: RequestId,
    op: RequestOp<'_>,
  ) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("submit", handle);
    if status < 0 {
      return status;
    }
    match op {
      RequestOp::Write { data } | RequestOp::Send { data, .. } => {
        state.payloads.push(data.to_vec())
      }
      RequestOp::Connect { name } => {
        state.handle(handle).name = Some(name.to_string())
      }
      RequestOp::Shutdown => {}
    }
    state.outstanding.push((req, handle));
    0
  }

  fn ref_handle(&mut self, handle: NativeHandleId) {
    let mut state = self.state.borrow_mut();
    state.call("ref", handle);
    state.handle(handle).referenced = true;
  }

  fn unref_handle(&mut self, handle: NativeHandleId) {
    let mut state = self.state.borrow_mut();
    state.call("unref", handle);
    state.handle(handle).referenced = false;
  }

  fn has_ref(&self, handle: NativeHandleId) -> bool {
    let mut state = self.state.borrow_mut();
    state.call("has_ref", handle);
    state.handle(handle).referenced
  }

  fn is_active(&self, handle: NativeHandleId) -> bool {
    let mut state = self.state.borrow_mut();
    state.call("is_active", handle);
    state.handle(handle).active
  }

  fn accept(
    &mut self,
    server: NativeHandleId,
    client: NativeHandleId,
  ) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("accept", server);
    if status < 0 {
      return status;
    }
    if state.handle(client).closing {
      panic!("accept into closing handle {client:?}");
    }
    0
  }

  fn try_write(&mut self, handle: NativeHandleId, data: &[u8]) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("try_write", handle);
    if status < 0 {
      return status;
    }
    state.payloads.push(data.to_vec());
    data.len() as c_int
  }

  fn udp_bind(
    &mut self,
    handle: NativeHandleId,
    addr: SocketAddr,
    flags: u32,
  ) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("udp_bind", handle);
    if status < 0 {
      return status;
    }
    let entry = state.handle(handle);
    entry.sockname = Some(addr);
    entry.options.insert("bind_flags", flags.to_string());
    0
  }

  fn udp_try_send(
    &mut self,
    handle: NativeHandleId,
    data: &[u8],
    _addr: SocketAddr,
  ) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("udp_try_send", handle);
    if status < 0 {
      return status;
    }
    state.payloads.push(data.to_vec());
    data.len() as c_int
  }

  fn udp_getsockname(
    &self,
    handle: NativeHandleId,
  ) -> Result<SocketAddr, c_int> {
    let mut state = self.state.borrow_mut();
    let status = state.call("udp_getsockname", handle);
    if status < 0 {
      return Err(status);
    }
    state.handle(handle).sockname.ok_or(errno::EBADF)
  }

  fn udp_set_membership(
    &mut self,
    handle: NativeHandleId,
    multicast_addr: &str,
    interface_addr: &str,
    membership: Membership,
  ) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("udp_set_membership", handle);
    if status == 0 {
      let value = format!("{multicast_addr} {interface_addr} {membership:?}");
      state.set_option(handle, "membership", value);
    }
    status
  }

  fn udp_set_multicast_loop(
    &mut self,
    handle: NativeHandleId,
    on: bool,
  ) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("udp_set_multicast_loop", handle);
    if status == 0 {
      state.set_option(handle, "multicast_loop", on.to_string());
    }
    status
  }

  fn udp_set_multicast_ttl(
    &mut self,
    handle: NativeHandleId,
    ttl: i32,
  ) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("udp_set_multicast_ttl", handle);
    if status == 0 {
      state.set_option(handle, "multicast_ttl", ttl.to_string());
    }
    status
  }

  fn udp_set_multicast_interface(
    &mut self,
    handle: NativeHandleId,
    interface_addr: &str,
  ) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("udp_set_multicast_interface", handle);
    if status == 0 {
      state.set_option(
        handle,
        "multicast_interface",
        interface_addr.to_string(),
      );
    }
    status
  }

  fn udp_set_broadcast(&mut self, handle: NativeHandleId, on: bool) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("udp_set_broadcast", handle);
    if status == 0 {
      state.set_option(handle, "broadcast", on.to_string());
    }
    status
  }

  fn udp_set_ttl(&mut self, handle: NativeHandleId, ttl: i32) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("udp_set_ttl", handle);
    if status == 0 {
      state.set_option(handle, "ttl", ttl.to_string());
    }
    status
  }

  fn pipe_bind(&mut self, handle: NativeHandleId, name: &str) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("pipe_bind", handle);
    if status == 0 {
      state.handle(handle).name = Some(name.to_string());
    }
    status
  }

  fn pipe_getsockname(
    &self,
    handle: NativeHandleId,
    buf: &mut [u8],
    len: &mut usize,
  ) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("pipe_getsockname", handle);
    if status < 0 {
      return status;
    }
    let name = state.handle(handle).name.clone().unwrap_or_default();
    copy_name(name.as_bytes(), buf, len)
  }

  fn pipe_pending_instances(&mut self, handle: NativeHandleId, count: i32) {
    let mut state = self.state.borrow_mut();
    state.call("pipe_pending_instances", handle);
    state.set_option(handle, "pending_instances", count.to_string());
  }

  fn pipe_pending_count(&self, handle: NativeHandleId) -> c_int {
    let mut state = self.state.borrow_mut();
    state.call("pipe_pending_count", handle);
    state.handle(handle).pending.0
  }

  fn pipe_pending_type(&self, handle: NativeHandleId) -> Option<HandleKind> {
    let mut state = self.state.borrow_mut();
    state.call("pipe_pending_type", handle);
    let entry = state.handle(handle);
    if entry.ipc { entry.pending.1 } else { None }
  }

  fn fs_event_getpath(
    &self,
    handle: NativeHandleId,
    buf: &mut [u8],
    len: &mut usize,
  ) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("fs_event_getpath", handle);
    if status < 0 {
      return status;
    }
    match state.handle(handle).watch.clone() {
      Some((path, _)) => copy_name(path.as_bytes(), buf, len),
      None => errno::EINVAL,
    }
  }

  fn timer_again(&mut self, handle: NativeHandleId) -> c_int {
    let mut state = self.state.borrow_mut();
    let status = state.call("timer_again", handle);
    if status < 0 {
      return status;
    }
    let entry = state.handle(handle);
    match entry.timer {
      Some((_, repeat)) => {
        entry.active = repeat > 0;
        0
      }
      None => errno::EINVAL,
    }
  }

  fn timer_set_repeat(&mut self, handle: NativeHandleId, repeat: u64) {
    let mut state = self.state.borrow_mut();
    state.call("timer_set_repeat", handle);
    let entry = state.handle(handle);
    let timeout = entry.timer.map(|(timeout, _)| timeout).unwrap_or(0);
    entry.timer = Some((timeout, repeat));
  }

  fn timer_get_repeat(&self, handle: NativeHandleId) -> u64 {
    let mut state = self.state.borrow_mut();
    state.call("timer_get_repeat", handle);
    state.handle(handle).timer.map(|(_, repeat)| repeat).unwrap_or(0)
  }
}

/// The buffer protocol of libuv's name queries.
fn copy_name(name: &[u8], buf: &mut [u8], len: &mut usize) -> c_int {
  if name.len() > buf.len() {
    *len = name.len();
    return errno::ENOBUFS;
  }
  buf[..name.len()].copy_from_slice(name);
  *len = name.len();
  0
}

impl StubController {
  /// Number of handle level native calls issued so far.
  pub fn calls(&self) -> usize {
    self.state.borrow().calls.len()
  }

  pub fn count(&self, op: &str) -> usize {
    self.state.borrow().calls.iter().filter(|c| **c == op).count()
  }

  pub fn call_log(&self) -> Vec<&'static str> {
    self.state.borrow().calls.clone()
  }

  /// Makes the next native call named `op` fail with `code`.
  pub fn fail_next(&self, op: &'static str, code: c_int) {
    self.state.borrow_mut().failures.insert(op, code);
  }

  /// Bytes of every accepted write, send and try-write, in order.
  pub fn payloads(&self) -> Vec<Vec<u8>> {
    self.state.borrow().payloads.clone()
  }

  /// Requests submitted and not completed yet, oldest first.
  pub fn outstanding(&self) -> Vec<RequestId> {
    self.state.borrow().outstanding.iter().map(|(req, _)| *req).collect()
  }

  /// Queues the completion of `req`.
  pub fn complete(&self, req: RequestId, status: c_int) {
    let mut state = self.state.borrow_mut();
    let Some(pos) = state.outstanding.iter().position(|(r, _)| *r == req)
    else {
      panic!("{req:?} is not outstanding");
    };
    state.outstanding.remove(pos);
    state.events.push_back(StubEvent::Request { req, status });
  }

  /// Queues the completion of the oldest outstanding request.
  pub fn complete_next(&self, status: c_int) -> RequestId {
    let req = match self.outstanding().first() {
      Some(req) => *req,
      None => panic!("no outstanding request"),
    };
    self.complete(req, status);
    req
  }

  pub fn push_read(&self, handle: &Handle, nread: isize, data: &[u8]) {
    self.push(StubEvent::Read {
      handle: handle.id(),
      nread,
      data: data.to_vec(),
    });
  }

  pub fn push_recv(
    &self,
    handle: &Handle,
    nread: isize,
    data: &[u8],
    addr: Option<SocketAddr>,
    flags: u32,
  ) {
    self.push(StubEvent::Recv {
      handle: handle.id(),
      nread,
      data: data.to_vec(),
      addr,
      flags,
    });
  }

  pub fn push_connection(&self, handle: &Handle, status: c_int) {
    self.push(StubEvent::Connection {
      handle: handle.id(),
      status,
    });
  }

  pub fn push_fs_event(
    &self,
    handle: &Handle,
    filename: Option<&str>,
    events: i32,
    status: c_int,
  ) {
    self.push(StubEvent::FsEvent {
      handle: handle.id(),
      filename: filename.map(str::to_string),
      events,
      status,
    });
  }

  pub fn push_tick(&self, handle: &Handle) {
    self.push(StubEvent::Tick {
      handle: handle.id(),
    });
  }

  fn push(&self, event: StubEvent) {
    self.state.borrow_mut().events.push_back(event);
  }

  fn with_handle<R>(
    &self,
    handle: &Handle,
    f: impl FnOnce(&StubHandle) -> R,
  ) -> R {
    let mut state = self.state.borrow_mut();
    f(state.handle(handle.id()))
  }

  pub fn is_active(&self, handle: &Handle) -> bool {
    self.with_handle(handle, |h| h.active)
  }

  pub fn is_referenced(&self, handle: &Handle) -> bool {
    self.with_handle(handle, |h| h.referenced)
  }

  pub fn is_ipc(&self, handle: &Handle) -> bool {
    self.with_handle(handle, |h| h.ipc)
  }

  pub fn kind(&self, handle: &Handle) -> HandleKind {
    self.with_handle(handle, |h| h.kind)
  }

  /// A setting applied through a call-through, rendered as a string.
  pub fn option(&self, handle: &Handle, name: &str) -> Option<String> {
    self.with_handle(handle, |h| h.options.get(name).cloned())
  }

  pub fn timer(&self, handle: &Handle) -> Option<(u64, u64)> {
    self.with_handle(handle, |h| h.timer)
  }

  pub fn watch(&self, handle: &Handle) -> Option<(String, u32)> {
    self.with_handle(handle, |h| h.watch.clone())
  }

  /// The pipe name given to bind or connect.
  pub fn name(&self, handle: &Handle) -> Option<String> {
    self.with_handle(handle, |h| h.name.clone())
  }

  pub fn sockname(&self, handle: &Handle) -> Option<SocketAddr> {
    self.with_handle(handle, |h| h.sockname)
  }

  pub fn set_pending(
    &self,
    handle: &Handle,
    count: c_int,
    kind: Option<HandleKind>,
  ) {
    let mut state = self.state.borrow_mut();
    state.handle(handle.id()).pending = (count, kind);
  }
}
