// Copyright 2018-2026 the Deno authors. MIT license.

use std::fmt;

use crate::callback::CallbackKey;
use crate::handle::Handle;

/// Identity of an in-flight one-shot request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
  pub(crate) fn new(raw: u64) -> Self {
    Self(raw)
  }

  pub fn raw(self) -> u64 {
    self.0
  }
}

impl fmt::Debug for RequestId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "RequestId({})", self.0)
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
  Connect,
  Write,
  Send,
  Shutdown,
}

impl RequestKind {
  pub fn name(self) -> &'static str {
    match self {
      Self::Connect => "connect",
      Self::Write => "write",
      Self::Send => "send",
      Self::Shutdown => "shutdown",
    }
  }
}

/// Book-keeping for a submitted request. Holding the handle keeps its
/// wrapper alive until the completion is delivered.
#[derive(Debug)]
pub(crate) struct PendingRequest {
  pub kind: RequestKind,
  pub handle: Handle,
  pub callback: CallbackKey,
}
