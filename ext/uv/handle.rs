// Copyright 2018-2026 the Deno authors. MIT license.

//! Methods shared by every handle kind.

use smallvec::smallvec;
use uv_bridge::Args;
use uv_bridge::BridgeError;
use uv_bridge::HandleFlags;
use uv_bridge::Value;
use uv_bridge::Values;

use crate::Method;
use crate::this;

pub fn method(name: &str) -> Option<Method> {
  Some(match name {
    "close" => close,
    "ref" => ref_,
    "unref" => unref,
    "has_ref" => has_ref,
    "is_active" => is_active,
    "is_closing" => is_closing,
    "loop" => loop_,
    _ => return None,
  })
}

/// `close([cb])`. Closing a handle that is already closing does nothing.
pub fn close(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("close", values);
  let handle = args.check_handle(1, None, HandleFlags::empty())?;
  let on_closed = args.opt_callable(2)?;
  args.check_none(2)?;
  handle.close(on_closed)?;
  this(handle)
}

pub fn ref_(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("ref", values);
  let handle = args.check_handle(1, None, HandleFlags::OPEN)?;
  args.check_none(1)?;
  handle.with_native(HandleFlags::OPEN, |native, id| native.ref_handle(id))?;
  this(handle)
}

pub fn unref(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("unref", values);
  let handle = args.check_handle(1, None, HandleFlags::OPEN)?;
  args.check_none(1)?;
  handle
    .with_native(HandleFlags::OPEN, |native, id| native.unref_handle(id))?;
  this(handle)
}

pub fn has_ref(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("has_ref", values);
  let handle = args.check_handle(1, None, HandleFlags::OPEN)?;
  let referenced =
    handle.with_native(HandleFlags::OPEN, |native, id| native.has_ref(id))?;
  Ok(smallvec![Value::Boolean(referenced)])
}

pub fn is_active(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("is_active", values);
  let handle = args.check_handle(1, None, HandleFlags::OPEN)?;
  let active =
    handle.with_native(HandleFlags::OPEN, |native, id| native.is_active(id))?;
  Ok(smallvec![Value::Boolean(active)])
}

/// True once close was requested. Valid on closing and closed handles.
pub fn is_closing(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("is_closing", values);
  let handle = args.check_handle(1, None, HandleFlags::empty())?;
  Ok(smallvec![Value::Boolean(handle.is_closing())])
}

pub fn loop_(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("loop", values);
  let handle = args.check_handle(1, None, HandleFlags::empty())?;
  Ok(smallvec![Value::Loop(handle.uv_loop()?)])
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;
  use std::rc::Rc;

  use pretty_assertions::assert_eq;
  use uv_bridge::BridgeOptions;
  use uv_bridge::RunMode;
  use uv_bridge::UvBridge;
  use uv_bridge::testing::StubController;
  use uv_bridge::testing::StubLoop;

  use super::*;

  fn setup() -> (UvBridge, StubController, Value) {
    let (native, stub) = StubLoop::new();
    let bridge = UvBridge::new(native, BridgeOptions::default());
    let idle = crate::tick::idle(&bridge, &[]).unwrap().remove(0);
    (bridge, stub, idle)
  }

  #[test]
  fn ref_and_unref() {
    let (_bridge, stub, idle) = setup();
    let handle = idle.as_handle().unwrap().clone();
    assert!(has_ref(&[idle.clone()]).unwrap()[0].to_bool());
    unref(&[idle.clone()]).unwrap();
    assert!(!stub.is_referenced(&handle));
    assert!(!has_ref(&[idle.clone()]).unwrap()[0].to_bool());
    ref_(&[idle.clone()]).unwrap();
    assert!(stub.is_referenced(&handle));
    assert_eq!(
      unref(&[idle.clone(), Value::Integer(1)])
        .unwrap_err()
        .to_string(),
      "bad argument #2 to 'unref' (no value expected)"
    );
  }

  #[test]
  fn close_is_idempotent() {
    let (bridge, stub, idle) = setup();
    let closed = Rc::new(Cell::new(0));
    let c = closed.clone();
    let on_close = Value::function(move |_| {
      c.set(c.get() + 1);
      Ok(())
    });
    close(&[idle.clone(), on_close.clone()]).unwrap();
    assert!(is_closing(&[idle.clone()]).unwrap()[0].to_bool());
    close(&[idle.clone(), on_close]).unwrap();
    assert_eq!(stub.count("close"), 1);

    bridge.default_loop().run(RunMode::Default).unwrap();
    assert_eq!(closed.get(), 1);
    assert!(is_closing(&[idle.clone()]).unwrap()[0].to_bool());
  }

  #[test]
  fn open_only_methods_fail_after_close() {
    let (_bridge, stub, idle) = setup();
    close(&[idle.clone()]).unwrap();
    let calls = stub.calls();
    for method in [ref_, unref, has_ref, is_active] {
      let err = method(&[idle.clone()]).unwrap_err();
      assert!(matches!(err, BridgeError::InvalidState { .. }));
    }
    assert_eq!(stub.calls(), calls);
  }

  #[test]
  fn loop_of_handle() {
    let (bridge, _stub, idle) = setup();
    let result = loop_(&[idle]).unwrap();
    match &result[0] {
      Value::Loop(uv_loop) => assert!(uv_loop.ptr_eq(&bridge.default_loop())),
      other => panic!("loop expected, got {other:?}"),
    }
  }

  #[test]
  fn is_active_follows_start() {
    let (_bridge, _stub, idle) = setup();
    assert!(!is_active(&[idle.clone()]).unwrap()[0].to_bool());
    crate::tick::start(&[idle.clone(), Value::function(|_| Ok(()))]).unwrap();
    assert!(is_active(&[idle.clone()]).unwrap()[0].to_bool());
  }
}
