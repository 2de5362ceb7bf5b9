// Copyright 2018-2026 the Deno authors. MIT license.

//! Named pipes. The stream methods apply as well.

use smallvec::smallvec;
use uv_bridge::Args;
use uv_bridge::BridgeError;
use uv_bridge::HandleFlags;
use uv_bridge::HandleKind;
use uv_bridge::InitParams;
use uv_bridge::RequestKind;
use uv_bridge::UvBridge;
use uv_bridge::Value;
use uv_bridge::Values;
use uv_bridge::marshal::read_name;
use uv_bridge::native::RequestOp;

use crate::Method;
use crate::check_status;
use crate::native_error;
use crate::this;

const PIPE: Option<HandleKind> = Some(HandleKind::NamedPipe);

pub fn method(name: &str) -> Option<Method> {
  Some(match name {
    "bind" => bind,
    "connect" => connect,
    "getsockname" => getsockname,
    "pending_instances" => pending_instances,
    "pending_count" => pending_count,
    "pending_type" => pending_type,
    _ => return None,
  })
}

/// `pipe([loop], [ipc])`
pub fn create(
  bridge: &UvBridge,
  values: &[Value],
) -> Result<Values, BridgeError> {
  let args = Args::new("pipe", values);
  let default_loop = bridge.default_loop();
  let (uv_loop, ipc_at) = match args.get(1) {
    Some(Value::Loop(_) | Value::Nil) => (args.opt_loop(1, &default_loop)?, 2),
    _ => (default_loop, 1),
  };
  let ipc = args.to_bool(ipc_at);
  args.check_none(ipc_at)?;
  let handle = uv_loop.create(HandleKind::NamedPipe, InitParams { ipc })?;
  this(handle)
}

pub fn bind(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("bind", values);
  let handle = args.check_handle(1, PIPE, HandleFlags::OPEN)?;
  let name = args.check_str(2)?;
  args.check_none(2)?;
  let status = handle
    .with_native(HandleFlags::OPEN, |native, id| native.pipe_bind(id, name))?;
  check_status(status)?;
  this(handle)
}

/// `connect(name, cb)`, `cb(h, err)` once connected or failed.
pub fn connect(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("connect", values);
  let handle = args.check_handle(1, PIPE, HandleFlags::OPEN)?;
  let name = args.check_str(2)?;
  let on_connect = args.check_args_with_cb(3)?;
  handle.submit(
    RequestKind::Connect,
    None,
    on_connect,
    RequestOp::Connect { name },
  )?;
  this(handle)
}

/// The name the pipe is bound to.
pub fn getsockname(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("getsockname", values);
  let handle = args.check_handle(1, PIPE, HandleFlags::OPEN)?;
  args.check_none(1)?;
  let capacity = handle.uv_loop()?.options().name_buffer_capacity;
  let name = handle
    .with_native(HandleFlags::OPEN, |native, id| {
      read_name(capacity, |buf, len| native.pipe_getsockname(id, buf, len))
    })?
    .map_err(native_error)?;
  Ok(smallvec![Value::String(name)])
}

pub fn pending_instances(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("pending_instances", values);
  let handle = args.check_handle(1, PIPE, HandleFlags::OPEN)?;
  let count = args.check_int_as::<i32>(2)?;
  args.check_none(2)?;
  handle.with_native(HandleFlags::OPEN, |native, id| {
    native.pipe_pending_instances(id, count)
  })?;
  this(handle)
}

pub fn pending_count(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("pending_count", values);
  let handle = args.check_handle(1, PIPE, HandleFlags::OPEN)?;
  let count = handle.with_native(HandleFlags::OPEN, |native, id| {
    native.pipe_pending_count(id)
  })?;
  Ok(smallvec![Value::Integer(count as i64)])
}

/// Numeric handle type of the next handle waiting on an IPC pipe, 0 if there
/// is none.
pub fn pending_type(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("pending_type", values);
  let handle = args.check_handle(1, PIPE, HandleFlags::OPEN)?;
  let kind = handle
    .with_native(HandleFlags::OPEN, |native, id| native.pipe_pending_type(id))?;
  Ok(smallvec![Value::Integer(kind.map_or(0, HandleKind::type_code))])
}
