// Copyright 2018-2026 the Deno authors. MIT license.

//! Methods of the stream kinds (pipes, TCP, TTY).

use smallvec::smallvec;
use uv_bridge::Args;
use uv_bridge::BridgeError;
use uv_bridge::CallbackSlot;
use uv_bridge::HandleFlags;
use uv_bridge::RequestKind;
use uv_bridge::Value;
use uv_bridge::Values;
use uv_bridge::native::RequestOp;
use uv_bridge::native::StartOp;
use uv_bridge::native::StopOp;

use crate::Method;
use crate::check_status;
use crate::this;

const STREAM: HandleFlags = HandleFlags::OPEN.union(HandleFlags::STREAM);

/// Backlog used when `listen` is called without one.
pub const DEFAULT_BACKLOG: i32 = 511;

pub fn method(name: &str) -> Option<Method> {
  Some(match name {
    "listen" => listen,
    "accept" => accept,
    "start_read" => start_read,
    "stop_read" => stop_read,
    "write" => write,
    "try_write" => try_write,
    "shutdown" => shutdown,
    _ => return None,
  })
}

/// `listen([backlog], cb)`. `cb(server, err)` runs for every incoming
/// connection until the handle closes.
pub fn listen(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("listen", values);
  let handle = args.check_handle(1, None, STREAM)?;
  let on_connection = args.check_args_with_cb(3)?;
  let backlog = if args.len() == 3 && !args.is_nil(2) {
    args.check_int_as::<i32>(2)?
  } else {
    DEFAULT_BACKLOG
  };
  handle.start(
    CallbackSlot::Connection,
    on_connection,
    StartOp::Listen { backlog },
  )?;
  this(handle)
}

/// `accept(client)`, called from the connection callback.
pub fn accept(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("accept", values);
  let server = args.check_handle(1, None, STREAM)?;
  let client = args.check_handle(2, None, STREAM)?;
  args.check_none(2)?;
  let status = server
    .with_native(STREAM, |native, id| native.accept(id, client.id()))?;
  check_status(status)?;
  Ok(smallvec![client.into()])
}

/// `start_read(cb)`. `cb(h, nil, data, nread)` per chunk, `cb(h, err)` once
/// on error or end of stream, after which reading is stopped.
pub fn start_read(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("start_read", values);
  let handle = args.check_handle(1, None, STREAM)?;
  let on_read = args.check_args_with_cb(2)?;
  handle.start(CallbackSlot::Read, on_read, StartOp::Read)?;
  this(handle)
}

pub fn stop_read(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("stop_read", values);
  let handle = args.check_handle(1, None, STREAM)?;
  args.check_none(1)?;
  handle.stop(CallbackSlot::Read, StopOp::Read)?;
  this(handle)
}

/// `write(data, cb)`. The data stays retained until `cb(h, err)` runs.
pub fn write(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("write", values);
  let handle = args.check_handle(1, None, STREAM)?;
  let data = args.check_bytes(2)?;
  let on_written = args.check_args_with_cb(3)?;
  handle.submit(
    RequestKind::Write,
    Some(Value::String(data.clone())),
    on_written,
    RequestOp::Write { data: &data },
  )?;
  this(handle)
}

/// `try_write(data)`, returns the number of bytes written.
pub fn try_write(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("try_write", values);
  let handle = args.check_handle(1, None, STREAM)?;
  let data = args.check_bytes(2)?;
  args.check_none(2)?;
  let status =
    handle.with_native(STREAM, |native, id| native.try_write(id, &data))?;
  let written = check_status(status)?;
  Ok(smallvec![Value::Integer(written as i64)])
}

pub fn shutdown(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("shutdown", values);
  let handle = args.check_handle(1, None, STREAM)?;
  let on_shutdown = args.check_args_with_cb(2)?;
  handle.submit(
    RequestKind::Shutdown,
    None,
    on_shutdown,
    RequestOp::Shutdown,
  )?;
  this(handle)
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use pretty_assertions::assert_eq;
  use uv_bridge::BridgeOptions;
  use uv_bridge::RunMode;
  use uv_bridge::UvBridge;
  use uv_bridge::errno;
  use uv_bridge::testing::StubController;
  use uv_bridge::testing::StubLoop;

  use super::*;

  type Seen = Rc<RefCell<Vec<Vec<Value>>>>;

  fn recorder() -> (Value, Seen) {
    let seen: Seen = Default::default();
    let sink = seen.clone();
    let f = Value::function(move |args| {
      sink.borrow_mut().push(args.to_vec());
      Ok(())
    });
    (f, seen)
  }

  fn setup() -> (UvBridge, StubController, Value) {
    let (native, stub) = StubLoop::new();
    let bridge = UvBridge::new(native, BridgeOptions::default());
    let pipe = crate::pipe::create(&bridge, &[]).unwrap().remove(0);
    (bridge, stub, pipe)
  }

  #[test]
  fn listen_with_default_backlog() {
    let (bridge, stub, pipe) = setup();
    let handle = pipe.as_handle().unwrap().clone();
    let (cb, seen) = recorder();
    listen(&[pipe.clone(), cb.clone()]).unwrap();
    assert_eq!(stub.option(&handle, "backlog").as_deref(), Some("511"));
    listen(&[pipe.clone(), Value::Integer(16), cb]).unwrap();
    assert_eq!(stub.option(&handle, "backlog").as_deref(), Some("16"));
    assert_eq!(bridge.registry().len(), 1);

    stub.push_connection(&handle, 0);
    stub.push_connection(&handle, errno::ECONNABORTED);
    bridge.default_loop().run(RunMode::Default).unwrap();
    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert!(seen[0][1].is_nil());
    assert_eq!(
      seen[1][1].as_error().map(|err| err.name()),
      Some("ECONNABORTED")
    );
  }

  #[test]
  fn accept_returns_client() {
    let (bridge, stub, server) = setup();
    let client = crate::pipe::create(&bridge, &[]).unwrap().remove(0);
    let result = accept(&[server.clone(), client.clone()]).unwrap();
    assert_eq!(result[0].as_handle(), client.as_handle());

    stub.fail_next("accept", errno::EAGAIN);
    let err = accept(&[server, client]).unwrap_err();
    assert_eq!(err.as_uv().map(|err| err.name()), Some("EAGAIN"));
  }

  #[test]
  fn read_until_eof() {
    let (bridge, stub, pipe) = setup();
    let handle = pipe.as_handle().unwrap().clone();
    let (cb, seen) = recorder();
    start_read(&[pipe.clone(), cb]).unwrap();
    stub.push_read(&handle, 5, b"hello");
    stub.push_read(&handle, errno::EOF as isize, b"");
    bridge.default_loop().run(RunMode::Default).unwrap();

    let seen = seen.borrow();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0][2].as_str(), Some("hello"));
    assert_eq!(seen[0][3].as_integer(), Some(5));
    assert!(seen[1][1].as_error().is_some_and(|err| err.is_eof()));
    assert_eq!(handle.slot(CallbackSlot::Read), None);
    assert!(bridge.registry().is_empty());
  }

  #[test]
  fn write_retains_data_until_completion() {
    let (bridge, stub, pipe) = setup();
    let (cb, seen) = recorder();
    write(&[pipe.clone(), Value::string("ping"), cb]).unwrap();
    assert_eq!(stub.payloads(), vec![b"ping".to_vec()]);
    assert_eq!(bridge.registry().anchored_len(), 1);

    stub.complete_next(0);
    bridge.default_loop().run(RunMode::Default).unwrap();
    assert_eq!(seen.borrow().len(), 1);
    assert!(seen.borrow()[0][1].is_nil());
    assert_eq!(bridge.registry().anchored_len(), 0);
    assert!(bridge.registry().is_empty());
  }

  #[test]
  fn write_requires_callback() {
    let (bridge, stub, pipe) = setup();
    let err = write(&[pipe, Value::string("ping")]).unwrap_err();
    assert_eq!(
      err.to_string(),
      "bad argument #2 to 'write' (function expected, got string)"
    );
    assert_eq!(stub.count("submit"), 0);
    assert!(bridge.registry().is_empty());
  }

  #[test]
  fn try_write_reports_count() {
    let (_bridge, stub, pipe) = setup();
    let result = try_write(&[pipe.clone(), Value::string("abc")]).unwrap();
    assert_eq!(result[0].as_integer(), Some(3));
    stub.fail_next("try_write", errno::EAGAIN);
    assert!(try_write(&[pipe, Value::string("abc")]).is_err());
  }

  #[test]
  fn shutdown_canceled_by_close() {
    let (bridge, _stub, pipe) = setup();
    let (cb, seen) = recorder();
    shutdown(&[pipe.clone(), cb]).unwrap();
    crate::handle::close(&[pipe]).unwrap();
    bridge.default_loop().run(RunMode::Default).unwrap();
    let seen = seen.borrow();
    assert_eq!(seen.len(), 1);
    assert!(seen[0][1].as_error().is_some_and(|err| err.is_canceled()));
  }

  #[test]
  fn non_stream_rejected() {
    let (bridge, stub, _pipe) = setup();
    let udp = crate::udp::create(&bridge, &[]).unwrap().remove(0);
    let err = start_read(&[udp, Value::function(|_| Ok(()))]).unwrap_err();
    assert!(matches!(
      err,
      BridgeError::TypeMismatch {
        expected: "stream",
        found: "udp"
      }
    ));
    assert_eq!(stub.count("start"), 0);
  }
}
