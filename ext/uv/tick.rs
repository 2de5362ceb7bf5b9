// Copyright 2018-2026 the Deno authors. MIT license.

//! Idle, check and prepare handles. They share one surface and differ only in
//! the loop phase the native side runs them in.

use uv_bridge::Args;
use uv_bridge::BridgeError;
use uv_bridge::CallbackSlot;
use uv_bridge::Handle;
use uv_bridge::HandleFlags;
use uv_bridge::HandleKind;
use uv_bridge::InitParams;
use uv_bridge::UvBridge;
use uv_bridge::Value;
use uv_bridge::Values;
use uv_bridge::native::StartOp;
use uv_bridge::native::StopOp;

use crate::Method;
use crate::this;

pub fn method(name: &str) -> Option<Method> {
  Some(match name {
    "start" => start,
    "stop" => stop,
    _ => return None,
  })
}

fn create(
  bridge: &UvBridge,
  kind: HandleKind,
  values: &[Value],
) -> Result<Values, BridgeError> {
  let args = Args::new(kind.name(), values);
  let uv_loop = args.opt_loop(1, &bridge.default_loop())?;
  args.check_none(1)?;
  this(uv_loop.create(kind, InitParams::default())?)
}

/// `idle([loop])`
pub fn idle(
  bridge: &UvBridge,
  values: &[Value],
) -> Result<Values, BridgeError> {
  create(bridge, HandleKind::Idle, values)
}

/// `check([loop])`
pub fn check(
  bridge: &UvBridge,
  values: &[Value],
) -> Result<Values, BridgeError> {
  create(bridge, HandleKind::Check, values)
}

/// `prepare([loop])`
pub fn prepare(
  bridge: &UvBridge,
  values: &[Value],
) -> Result<Values, BridgeError> {
  create(bridge, HandleKind::Prepare, values)
}

fn check_tick(args: &Args<'_>) -> Result<Handle, BridgeError> {
  let handle = args.check_handle(1, None, HandleFlags::OPEN)?;
  match handle.kind() {
    HandleKind::Idle | HandleKind::Check | HandleKind::Prepare => Ok(handle),
    other => Err(BridgeError::TypeMismatch {
      expected: "idle, check or prepare",
      found: other.name(),
    }),
  }
}

/// `start(cb)`. `cb(h)` runs once per loop iteration until stopped.
pub fn start(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("start", values);
  let handle = check_tick(&args)?;
  let on_tick = args.check_args_with_cb(2)?;
  handle.start(CallbackSlot::Start, on_tick, StartOp::Tick)?;
  this(handle)
}

pub fn stop(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("stop", values);
  let handle = check_tick(&args)?;
  args.check_none(1)?;
  handle.stop(CallbackSlot::Start, StopOp::Tick)?;
  this(handle)
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;
  use std::rc::Rc;

  use pretty_assertions::assert_eq;
  use uv_bridge::BridgeOptions;
  use uv_bridge::RunMode;
  use uv_bridge::testing::StubLoop;

  use super::*;

  #[test]
  fn constructors_pick_kind() {
    let (native, stub) = StubLoop::new();
    let bridge = UvBridge::new(native, BridgeOptions::default());
    let cases: [(crate::Constructor, HandleKind); 3] = [
      (idle, HandleKind::Idle),
      (check, HandleKind::Check),
      (prepare, HandleKind::Prepare),
    ];
    for (create, kind) in cases {
      let value = create(&bridge, &[]).unwrap().remove(0);
      let handle = value.as_handle().unwrap();
      assert_eq!(handle.kind(), kind);
      assert_eq!(stub.kind(handle), kind);
      assert!(handle.flags().contains(HandleFlags::DEFAULT_LOOP));
    }
    let err = idle(&bridge, &[Value::Integer(1)]).unwrap_err();
    assert_eq!(
      err.to_string(),
      "bad argument #1 to 'idle' (loop expected, got number)"
    );
  }

  #[test]
  fn ticks_until_stopped() {
    let (native, stub) = StubLoop::new();
    let bridge = UvBridge::new(native, BridgeOptions::default());
    let value = prepare(&bridge, &[]).unwrap().remove(0);
    let handle = value.as_handle().unwrap().clone();
    let ticks = Rc::new(Cell::new(0));
    let t = ticks.clone();
    start(&[
      value.clone(),
      Value::function(move |_| {
        t.set(t.get() + 1);
        Ok(())
      }),
    ])
    .unwrap();
    stub.push_tick(&handle);
    stub.push_tick(&handle);
    bridge.default_loop().run(RunMode::Default).unwrap();
    assert_eq!(ticks.get(), 2);

    stop(&[value]).unwrap();
    stub.push_tick(&handle);
    bridge.default_loop().run(RunMode::Default).unwrap();
    assert_eq!(ticks.get(), 2);
    assert!(bridge.registry().is_empty());
  }

  #[test]
  fn rejects_other_kinds() {
    let (native, _stub) = StubLoop::new();
    let bridge = UvBridge::new(native, BridgeOptions::default());
    let timer = crate::timer::create(&bridge, &[]).unwrap().remove(0);
    let err = start(&[timer, Value::function(|_| Ok(()))]).unwrap_err();
    assert!(matches!(
      err,
      BridgeError::TypeMismatch {
        expected: "idle, check or prepare",
        found: "timer"
      }
    ));
  }
}
