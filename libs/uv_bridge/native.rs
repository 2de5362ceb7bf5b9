// Copyright 2018-2026 the Deno authors. MIT license.

//! The contract between the bridge and the wrapped native event loop.
//!
//! The bridge never polls for I/O itself. It issues init/start/stop/submit/
//! close primitives against a [`NativeLoop`] and, when the embedder runs the
//! loop, receives the resulting [`Completion`]s in one batch per iteration.
//! Each completion names the handle or request it belongs to by the opaque
//! identity the bridge assigned, which is the only thing that crosses the
//! boundary.

use std::ffi::c_int;
use std::fmt;
use std::net::SocketAddr;

use crate::error::errno;
use crate::handle::HandleKind;
use crate::marshal::BufferPool;
use crate::marshal::ReadBuf;
use crate::request::RequestId;

/// Identity of a native handle, minted by the bridge at creation time and
/// stable until the handle's close completes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeHandleId(u64);

impl NativeHandleId {
  pub(crate) fn new(raw: u64) -> Self {
    Self(raw)
  }

  pub fn raw(self) -> u64 {
    self.0
  }
}

impl fmt::Debug for NativeHandleId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "NativeHandleId({:#x})", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
  /// Run until there is no more work or the loop is stopped.
  Default,
  /// Process one batch, waiting for it if necessary.
  Once,
  /// Process whatever is ready without waiting.
  NoWait,
}

/// Kind specific parameters for [`NativeLoop::init`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InitParams {
  /// Pipes only: the pipe passes handles between processes.
  pub ipc: bool,
}

/// Persistent operations. Each may complete any number of times until the
/// matching [`StopOp`] is issued or the handle closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOp<'a> {
  Read,
  Recv,
  Listen { backlog: i32 },
  Tick,
  Timer { timeout: u64, repeat: u64 },
  Watch { path: &'a str, flags: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOp {
  Read,
  Recv,
  Tick,
  Timer,
  Watch,
}

/// One-shot operations. Each completes exactly once with
/// [`Completion::Request`], with `ECANCELED` if its handle closed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOp<'a> {
  Write { data: &'a [u8] },
  Send { data: &'a [u8], addr: SocketAddr },
  Connect { name: &'a str },
  Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
  LeaveGroup = 0,
  JoinGroup = 1,
}

/// A native notification delivered to the bridge.
#[derive(Debug)]
pub enum Completion {
  /// The handle is fully closed; nothing else will be delivered for it.
  Closed { handle: NativeHandleId },
  /// Stream data. `nread == 0` means nothing was read; negative values are
  /// errors (including `EOF`).
  Read {
    handle: NativeHandleId,
    nread: isize,
    buf: Option<ReadBuf>,
  },
  /// A datagram. `nread == 0` with no address means nothing was read.
  Recv {
    handle: NativeHandleId,
    nread: isize,
    buf: Option<ReadBuf>,
    addr: Option<SocketAddr>,
    flags: u32,
  },
  Connection { handle: NativeHandleId, status: c_int },
  FsEvent {
    handle: NativeHandleId,
    filename: Option<String>,
    events: i32,
    status: c_int,
  },
  /// Timer expiry or an idle/prepare/check iteration.
  Tick { handle: NativeHandleId },
  Request { req: RequestId, status: c_int },
}

impl Completion {
  /// The handle this completion is addressed to, `None` for requests.
  pub fn handle(&self) -> Option<NativeHandleId> {
    match self {
      Self::Closed { handle }
      | Self::Read { handle, .. }
      | Self::Recv { handle, .. }
      | Self::Connection { handle, .. }
      | Self::FsEvent { handle, .. }
      | Self::Tick { handle } => Some(*handle),
      Self::Request { .. } => None,
    }
  }
}

/// The native event loop as seen by the bridge.
///
/// Status returning methods follow the libuv convention: `>= 0` is success
/// (possibly carrying a count), negative values are `errno` codes. Calls
/// after [`NativeLoop::close`] for the same handle are never issued by the
/// bridge.
///
/// The protocol call-throughs have default bodies that report `ENOSYS`, so
/// a loop only implements the handle kinds it supports.
pub trait NativeLoop {
  fn init(
    &mut self,
    handle: NativeHandleId,
    kind: HandleKind,
    params: InitParams,
  ) -> c_int;

  /// Starts closing `handle`. Outstanding requests complete with
  /// `ECANCELED`, then a single [`Completion::Closed`] follows.
  fn close(&mut self, handle: NativeHandleId);

  /// Runs one loop iteration. Inbound buffers are taken from `pool`.
  fn run(&mut self, mode: RunMode, pool: &BufferPool) -> Vec<Completion>;

  /// Whether the loop still has work that will produce completions.
  fn alive(&self) -> bool;

  fn start(&mut self, handle: NativeHandleId, op: StartOp<'_>) -> c_int;

  fn stop(&mut self, handle: NativeHandleId, op: StopOp) -> c_int;

  fn submit(
    &mut self,
    handle: NativeHandleId,
    req: RequestId,
    op: RequestOp<'_>,
  ) -> c_int;

  fn ref_handle(&mut self, _handle: NativeHandleId) {}

  fn unref_handle(&mut self, _handle: NativeHandleId) {}

  fn has_ref(&self, _handle: NativeHandleId) -> bool {
    true
  }

  fn is_active(&self, _handle: NativeHandleId) -> bool {
    false
  }

  fn accept(
    &mut self,
    _server: NativeHandleId,
    _client: NativeHandleId,
  ) -> c_int {
    errno::ENOSYS
  }

  fn try_write(&mut self, _handle: NativeHandleId, _data: &[u8]) -> c_int {
    errno::ENOSYS
  }

  fn udp_bind(
    &mut self,
    _handle: NativeHandleId,
    _addr: SocketAddr,
    _flags: u32,
  ) -> c_int {
    errno::ENOSYS
  }

  fn udp_try_send(
    &mut self,
    _handle: NativeHandleId,
    _data: &[u8],
    _addr: SocketAddr,
  ) -> c_int {
    errno::ENOSYS
  }

  fn udp_getsockname(
    &self,
    _handle: NativeHandleId,
  ) -> Result<SocketAddr, c_int> {
    Err(errno::ENOSYS)
  }

  fn udp_set_membership(
    &mut self,
    _handle: NativeHandleId,
    _multicast_addr: &str,
    _interface_addr: &str,
    _membership: Membership,
  ) -> c_int {
    errno::ENOSYS
  }

  fn udp_set_multicast_loop(
    &mut self,
    _handle: NativeHandleId,
    _on: bool,
  ) -> c_int {
    errno::ENOSYS
  }

  fn udp_set_multicast_ttl(
    &mut self,
    _handle: NativeHandleId,
    _ttl: i32,
  ) -> c_int {
    errno::ENOSYS
  }

  fn udp_set_multicast_interface(
    &mut self,
    _handle: NativeHandleId,
    _interface_addr: &str,
  ) -> c_int {
    errno::ENOSYS
  }

  fn udp_set_broadcast(&mut self, _handle: NativeHandleId, _on: bool) -> c_int {
    errno::ENOSYS
  }

  fn udp_set_ttl(&mut self, _handle: NativeHandleId, _ttl: i32) -> c_int {
    errno::ENOSYS
  }

  fn pipe_bind(&mut self, _handle: NativeHandleId, _name: &str) -> c_int {
    errno::ENOSYS
  }

  /// Writes the bound name into `buf` and its length into `len`. If `buf`
  /// is too small, fails with `ENOBUFS` and stores the required size.
  fn pipe_getsockname(
    &self,
    _handle: NativeHandleId,
    _buf: &mut [u8],
    _len: &mut usize,
  ) -> c_int {
    errno::ENOSYS
  }

  fn pipe_pending_instances(&mut self, _handle: NativeHandleId, _count: i32) {}

  fn pipe_pending_count(&self, _handle: NativeHandleId) -> c_int {
    0
  }

  fn pipe_pending_type(&self, _handle: NativeHandleId) -> Option<HandleKind> {
    None
  }

  /// Same buffer protocol as [`NativeLoop::pipe_getsockname`].
  fn fs_event_getpath(
    &self,
    _handle: NativeHandleId,
    _buf: &mut [u8],
    _len: &mut usize,
  ) -> c_int {
    errno::ENOSYS
  }

  fn timer_again(&mut self, _handle: NativeHandleId) -> c_int {
    errno::ENOSYS
  }

  fn timer_set_repeat(&mut self, _handle: NativeHandleId, _repeat: u64) {}

  fn timer_get_repeat(&self, _handle: NativeHandleId) -> u64 {
    0
  }
}
