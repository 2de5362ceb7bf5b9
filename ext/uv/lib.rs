// Copyright 2018-2026 the Deno authors. MIT license.

//! Managed method surfaces of the handle kinds.
//!
//! Each module validates the shape of its arguments, then delegates to the
//! handle, request and callback primitives of `uv_bridge`. Methods take the
//! receiver as argument #1 and return it unless they produce a value.

#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]

pub mod fs_event;
pub mod handle;
pub mod pipe;
pub mod stream;
pub mod tick;
pub mod timer;
pub mod udp;

use smallvec::smallvec;
use uv_bridge::BridgeError;
use uv_bridge::Handle;
use uv_bridge::HandleKind;
use uv_bridge::UvBridge;
use uv_bridge::UvError;
use uv_bridge::Value;
use uv_bridge::Values;
use uv_bridge::error::project;

/// A method of a handle type.
pub type Method = fn(&[Value]) -> Result<Values, BridgeError>;

/// A module level function creating a handle.
pub type Constructor = fn(&UvBridge, &[Value]) -> Result<Values, BridgeError>;

/// Finds the function `name` among the module level functions.
pub fn constructor(name: &str) -> Option<Constructor> {
  Some(match name {
    "pipe" => pipe::create,
    "udp" => udp::create,
    "fs_event" => fs_event::create,
    "idle" => tick::idle,
    "check" => tick::check,
    "prepare" => tick::prepare,
    "timer" => timer::create,
    _ => return None,
  })
}

/// Finds method `name` of `kind`, falling back from the kind's own methods
/// to the stream methods (for stream kinds) and the generic handle methods.
pub fn method(kind: HandleKind, name: &str) -> Option<Method> {
  let own = match kind {
    HandleKind::NamedPipe => {
      pipe::method(name).or_else(|| stream::method(name))
    }
    HandleKind::Tcp | HandleKind::Tty => stream::method(name),
    HandleKind::Udp => udp::method(name),
    HandleKind::FsEvent => fs_event::method(name),
    HandleKind::Idle | HandleKind::Check | HandleKind::Prepare => {
      tick::method(name)
    }
    HandleKind::Timer => timer::method(name),
  };
  own.or_else(|| handle::method(name))
}

/// Resolves method `name` for the receiver `this`, if it is a handle.
pub fn method_of(this: &Value, name: &str) -> Option<Method> {
  this.as_handle().and_then(|handle| method(handle.kind(), name))
}

fn this(handle: Handle) -> Result<Values, BridgeError> {
  Ok(smallvec![handle.into()])
}

/// Projects the status of a synchronous native call.
fn check_status(status: std::ffi::c_int) -> Result<u32, BridgeError> {
  project(status).map_err(BridgeError::NativeSubmit)
}

fn native_error(err: UvError) -> BridgeError {
  BridgeError::NativeSubmit(err)
}
