// Copyright 2018-2026 the Deno authors. MIT license.

//! UDP sockets.

use std::ffi::c_int;

use smallvec::smallvec;
use uv_bridge::Args;
use uv_bridge::BridgeError;
use uv_bridge::CallbackSlot;
use uv_bridge::HandleFlags;
use uv_bridge::HandleKind;
use uv_bridge::InitParams;
use uv_bridge::RequestKind;
use uv_bridge::UvBridge;
use uv_bridge::UvError;
use uv_bridge::Value;
use uv_bridge::Values;
use uv_bridge::marshal::addr_values;
use uv_bridge::marshal::to_addr;
use uv_bridge::native::Membership;
use uv_bridge::native::RequestOp;
use uv_bridge::native::StartOp;
use uv_bridge::native::StopOp;

use crate::Method;
use crate::check_status;
use crate::native_error;
use crate::this;

pub const UDP_IPV6ONLY: u32 = 1;
pub const UDP_PARTIAL: u32 = 2;
pub const UDP_REUSEADDR: u32 = 4;
pub const LEAVE_GROUP: i64 = Membership::LeaveGroup as i64;
pub const JOIN_GROUP: i64 = Membership::JoinGroup as i64;

const UDP: Option<HandleKind> = Some(HandleKind::Udp);

pub fn method(name: &str) -> Option<Method> {
  Some(match name {
    "bind" => bind,
    "try_send" => try_send,
    "send" => send,
    "getsockname" => getsockname,
    "start_recv" => start_recv,
    "stop_recv" => stop_recv,
    "set_membership" => set_membership,
    "set_multicast_loop" => set_multicast_loop,
    "set_multicast_ttl" => set_multicast_ttl,
    "set_multicast_interface" => set_multicast_interface,
    "set_broadcast" => set_broadcast,
    "set_ttl" => set_ttl,
    _ => return None,
  })
}

/// `udp([loop])`
pub fn create(
  bridge: &UvBridge,
  values: &[Value],
) -> Result<Values, BridgeError> {
  let args = Args::new("udp", values);
  let uv_loop = args.opt_loop(1, &bridge.default_loop())?;
  args.check_none(1)?;
  this(uv_loop.create(HandleKind::Udp, InitParams::default())?)
}

/// Projects `status`, tagging a failure with the address it was about.
fn check_addr_status(
  status: c_int,
  host: &str,
  port: i64,
) -> Result<u32, BridgeError> {
  uv_bridge::error::project(status).map_err(|err| {
    native_error(UvError::with_context(err.code(), format!("{host}:{port}")))
  })
}

/// `bind(host, port, [flags])`
pub fn bind(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("bind", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  let host = args.check_str(2)?;
  let port = args.check_int(3)?;
  let flags = args.opt_int(4, 0)?;
  args.check_none(4)?;
  let flags = u32::try_from(flags).map_err(|_| {
    BridgeError::argument("bind", 4, format!("{flags} is out of range"))
  })?;
  let addr = to_addr(host, port).map_err(native_error)?;
  let status = handle.with_native(HandleFlags::OPEN, |native, id| {
    native.udp_bind(id, addr, flags)
  })?;
  check_addr_status(status, host, port)?;
  this(handle)
}

/// `try_send(host, port, data)`, returns the number of bytes sent.
pub fn try_send(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("try_send", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  let host = args.check_str(2)?;
  let port = args.check_int(3)?;
  let data = args.check_bytes(4)?;
  args.check_none(4)?;
  let addr = to_addr(host, port).map_err(native_error)?;
  let status = handle.with_native(HandleFlags::OPEN, |native, id| {
    native.udp_try_send(id, &data, addr)
  })?;
  let sent = check_addr_status(status, host, port)?;
  Ok(smallvec![Value::Integer(sent as i64)])
}

/// `send(host, port, data, cb)`. The data stays retained until `cb(h, err)`
/// runs.
pub fn send(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("send", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  let host = args.check_str(2)?;
  let port = args.check_int(3)?;
  let data = args.check_bytes(4)?;
  let on_sent = args.check_args_with_cb(5)?;
  let addr = to_addr(host, port).map_err(native_error)?;
  handle
    .submit(
      RequestKind::Send,
      Some(Value::String(data.clone())),
      on_sent,
      RequestOp::Send { data: &data, addr },
    )
    .map_err(|err| match err {
      BridgeError::NativeSubmit(err) => native_error(UvError::with_context(
        err.code(),
        format!("{host}:{port}"),
      )),
      err => err,
    })?;
  this(handle)
}

/// The bound address as `host, port`.
pub fn getsockname(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("getsockname", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  args.check_none(1)?;
  let addr = handle
    .with_native(HandleFlags::OPEN, |native, id| native.udp_getsockname(id))?
    .map_err(|code| native_error(UvError::new(code)))?;
  Ok(addr_values(Some(addr)))
}

/// `start_recv(cb)`. `cb(h, nil, data, flags, host, port)` per datagram,
/// `cb(h, err, nil, flags)` once on error, after which receiving is stopped.
pub fn start_recv(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("start_recv", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  let on_recv = args.check_args_with_cb(2)?;
  handle.start(CallbackSlot::Read, on_recv, StartOp::Recv)?;
  this(handle)
}

pub fn stop_recv(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("stop_recv", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  args.check_none(1)?;
  handle.stop(CallbackSlot::Read, StopOp::Recv)?;
  this(handle)
}

/// `set_membership(multicast_addr, interface_addr, LEAVE_GROUP|JOIN_GROUP)`
pub fn set_membership(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("set_membership", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  let multicast_addr = args.check_str(2)?;
  let interface_addr = args.check_str(3)?;
  let membership = match args.check_int(4)? {
    LEAVE_GROUP => Membership::LeaveGroup,
    JOIN_GROUP => Membership::JoinGroup,
    other => {
      return Err(BridgeError::argument(
        "set_membership",
        4,
        format!("invalid membership {other}"),
      ));
    }
  };
  args.check_none(4)?;
  let status = handle.with_native(HandleFlags::OPEN, |native, id| {
    native.udp_set_membership(id, multicast_addr, interface_addr, membership)
  })?;
  check_status(status)?;
  this(handle)
}

pub fn set_multicast_loop(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("set_multicast_loop", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  let on = args.to_bool(2);
  args.check_none(2)?;
  let status = handle.with_native(HandleFlags::OPEN, |native, id| {
    native.udp_set_multicast_loop(id, on)
  })?;
  check_status(status)?;
  this(handle)
}

pub fn set_multicast_ttl(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("set_multicast_ttl", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  let ttl = args.check_int_as::<i32>(2)?;
  args.check_none(2)?;
  let status = handle.with_native(HandleFlags::OPEN, |native, id| {
    native.udp_set_multicast_ttl(id, ttl)
  })?;
  check_status(status)?;
  this(handle)
}

pub fn set_multicast_interface(
  values: &[Value],
) -> Result<Values, BridgeError> {
  let args = Args::new("set_multicast_interface", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  let interface_addr = args.check_str(2)?;
  args.check_none(2)?;
  let status = handle.with_native(HandleFlags::OPEN, |native, id| {
    native.udp_set_multicast_interface(id, interface_addr)
  })?;
  check_status(status)?;
  this(handle)
}

pub fn set_broadcast(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("set_broadcast", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  let on = args.to_bool(2);
  args.check_none(2)?;
  let status = handle.with_native(HandleFlags::OPEN, |native, id| {
    native.udp_set_broadcast(id, on)
  })?;
  check_status(status)?;
  this(handle)
}

pub fn set_ttl(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("set_ttl", values);
  let handle = args.check_handle(1, UDP, HandleFlags::OPEN)?;
  let ttl = args.check_int_as::<i32>(2)?;
  args.check_none(2)?;
  let status = handle
    .with_native(HandleFlags::OPEN, |native, id| native.udp_set_ttl(id, ttl))?;
  check_status(status)?;
  this(handle)
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::net::SocketAddr;
  use std::rc::Rc;

  use pretty_assertions::assert_eq;
  use uv_bridge::BridgeOptions;
  use uv_bridge::Handle;
  use uv_bridge::RunMode;
  use uv_bridge::errno;
  use uv_bridge::testing::StubController;
  use uv_bridge::testing::StubLoop;

  use super::*;

  type Seen = Rc<RefCell<Vec<Vec<Value>>>>;

  fn setup() -> (UvBridge, StubController, Value, Handle) {
    let (native, stub) = StubLoop::new();
    let bridge = UvBridge::new(native, BridgeOptions::default());
    let udp = create(&bridge, &[]).unwrap().remove(0);
    let handle = udp.as_handle().unwrap().clone();
    (bridge, stub, udp, handle)
  }

  fn recorder() -> (Value, Seen) {
    let seen: Seen = Default::default();
    let sink = seen.clone();
    let f = Value::function(move |args| {
      sink.borrow_mut().push(args.to_vec());
      Ok(())
    });
    (f, seen)
  }

  #[test]
  fn bind_and_getsockname() {
    let (_bridge, stub, udp, handle) = setup();
    let err = getsockname(&[udp.clone()]).unwrap_err();
    assert_eq!(err.as_uv().map(|err| err.name()), Some("EBADF"));

    bind(&[
      udp.clone(),
      Value::string("127.0.0.1"),
      Value::Integer(5353),
      Value::Integer(UDP_REUSEADDR as i64),
    ])
    .unwrap();
    assert_eq!(
      stub.sockname(&handle),
      Some("127.0.0.1:5353".parse::<SocketAddr>().unwrap())
    );
    assert_eq!(stub.option(&handle, "bind_flags").as_deref(), Some("4"));

    let result = getsockname(&[udp]).unwrap();
    assert_eq!(result[0].as_str(), Some("127.0.0.1"));
    assert_eq!(result[1].as_integer(), Some(5353));
  }

  #[test]
  fn address_errors_carry_context() {
    let (_bridge, stub, udp, _handle) = setup();
    let err = bind(&[udp.clone(), Value::string("nowhere"), Value::Integer(53)])
      .unwrap_err();
    let uv = err.as_uv().unwrap();
    assert_eq!(uv.name(), "EINVAL");
    assert_eq!(uv.context(), Some("nowhere:53"));
    assert_eq!(stub.count("udp_bind"), 0);

    stub.fail_next("udp_bind", errno::EADDRINUSE);
    let err = bind(&[udp, Value::string("::1"), Value::Integer(53)])
      .unwrap_err();
    let uv = err.as_uv().unwrap();
    assert_eq!(uv.name(), "EADDRINUSE");
    assert_eq!(uv.context(), Some("::1:53"));
  }

  #[test]
  fn try_send_and_send() {
    let (bridge, stub, udp, _handle) = setup();
    let sent = try_send(&[
      udp.clone(),
      Value::string("127.0.0.1"),
      Value::Integer(9),
      Value::string("hi"),
    ])
    .unwrap();
    assert_eq!(sent[0].as_integer(), Some(2));

    let (cb, seen) = recorder();
    send(&[
      udp.clone(),
      Value::string("127.0.0.1"),
      Value::Integer(9),
      Value::string("there"),
      cb,
    ])
    .unwrap();
    assert_eq!(stub.payloads(), vec![b"hi".to_vec(), b"there".to_vec()]);
    assert_eq!(bridge.registry().anchored_len(), 1);
    stub.complete_next(0);
    bridge.default_loop().run(RunMode::Default).unwrap();
    assert_eq!(seen.borrow().len(), 1);
    assert_eq!(bridge.registry().anchored_len(), 0);
  }

  #[test]
  fn failed_send_keeps_nothing() {
    let (bridge, stub, udp, _handle) = setup();
    stub.fail_next("submit", errno::ENETUNREACH);
    let err = send(&[
      udp,
      Value::string("10.0.0.1"),
      Value::Integer(9),
      Value::string("lost"),
      Value::function(|_| Ok(())),
    ])
    .unwrap_err();
    let uv = err.as_uv().unwrap();
    assert_eq!(uv.name(), "ENETUNREACH");
    assert_eq!(uv.context(), Some("10.0.0.1:9"));
    assert!(bridge.registry().is_empty());
    assert_eq!(bridge.registry().anchored_len(), 0);
    assert_eq!(bridge.default_loop().pending_requests(), 0);
  }

  #[test]
  fn recv_delivery() {
    let (bridge, stub, udp, handle) = setup();
    let (cb, seen) = recorder();
    start_recv(&[udp.clone(), cb]).unwrap();
    let from = "192.168.1.7:4000".parse::<SocketAddr>().ok();
    stub.push_recv(&handle, 0, b"", None, 0);
    stub.push_recv(&handle, 4, b"ping", from, 0);
    stub.push_recv(&handle, 0, b"", from, 0);
    bridge.default_loop().run(RunMode::Default).unwrap();

    {
      let seen = seen.borrow();
      assert_eq!(seen.len(), 2);
      assert_eq!(seen[0][2].as_str(), Some("ping"));
      assert_eq!(seen[0][4].as_str(), Some("192.168.1.7"));
      assert_eq!(seen[0][5].as_integer(), Some(4000));
      assert_eq!(seen[1][2].as_str(), Some(""));
    }

    stop_recv(&[udp]).unwrap();
    assert!(bridge.registry().is_empty());
    assert!(!stub.is_active(&handle));
  }

  #[test]
  fn membership_validation() {
    let (_bridge, stub, udp, handle) = setup();
    set_membership(&[
      udp.clone(),
      Value::string("239.0.0.1"),
      Value::string("0.0.0.0"),
      Value::Integer(JOIN_GROUP),
    ])
    .unwrap();
    assert_eq!(
      stub.option(&handle, "membership").as_deref(),
      Some("239.0.0.1 0.0.0.0 JoinGroup")
    );

    let err = set_membership(&[
      udp,
      Value::string("239.0.0.1"),
      Value::string("0.0.0.0"),
      Value::Integer(7),
    ])
    .unwrap_err();
    assert_eq!(
      err.to_string(),
      "bad argument #4 to 'set_membership' (invalid membership 7)"
    );
    assert_eq!(stub.count("udp_set_membership"), 1);
  }

  #[test]
  fn socket_options() {
    let (_bridge, stub, udp, handle) = setup();
    set_multicast_loop(&[udp.clone(), Value::Boolean(true)]).unwrap();
    set_multicast_ttl(&[udp.clone(), Value::Integer(8)]).unwrap();
    set_multicast_interface(&[udp.clone(), Value::string("0.0.0.0")]).unwrap();
    set_broadcast(&[udp.clone(), Value::Boolean(false)]).unwrap();
    set_ttl(&[udp.clone(), Value::Integer(32)]).unwrap();
    let option = |name| stub.option(&handle, name);
    assert_eq!(option("multicast_loop").as_deref(), Some("true"));
    assert_eq!(option("multicast_ttl").as_deref(), Some("8"));
    assert_eq!(option("multicast_interface").as_deref(), Some("0.0.0.0"));
    assert_eq!(option("broadcast").as_deref(), Some("false"));
    assert_eq!(option("ttl").as_deref(), Some("32"));

    stub.fail_next("udp_set_ttl", errno::EINVAL);
    assert!(set_ttl(&[udp.clone(), Value::Integer(999)]).is_err());
    let err = set_ttl(&[udp, Value::Integer(1 << 40)]).unwrap_err();
    assert!(matches!(err, BridgeError::Argument { position: 2, .. }));
  }
}
