// Copyright 2018-2026 the Deno authors. MIT license.

//! Timers. Timeouts and repeat intervals are in milliseconds.

use smallvec::smallvec;
use uv_bridge::Args;
use uv_bridge::BridgeError;
use uv_bridge::CallbackSlot;
use uv_bridge::HandleFlags;
use uv_bridge::HandleKind;
use uv_bridge::InitParams;
use uv_bridge::UvBridge;
use uv_bridge::Value;
use uv_bridge::Values;
use uv_bridge::native::StartOp;
use uv_bridge::native::StopOp;

use crate::Method;
use crate::check_status;
use crate::this;

const TIMER: Option<HandleKind> = Some(HandleKind::Timer);

pub fn method(name: &str) -> Option<Method> {
  Some(match name {
    "start" => start,
    "stop" => stop,
    "again" => again,
    "set_repeat" => set_repeat,
    "get_repeat" => get_repeat,
    _ => return None,
  })
}

/// `timer([loop])`
pub fn create(
  bridge: &UvBridge,
  values: &[Value],
) -> Result<Values, BridgeError> {
  let args = Args::new("timer", values);
  let uv_loop = args.opt_loop(1, &bridge.default_loop())?;
  args.check_none(1)?;
  this(uv_loop.create(HandleKind::Timer, InitParams::default())?)
}

/// `start(timeout, [repeat], cb)`. `cb(h)` runs when the timer fires, and
/// again every `repeat` milliseconds if it is non-zero.
pub fn start(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("start", values);
  let handle = args.check_handle(1, TIMER, HandleFlags::OPEN)?;
  let on_timeout = args.check_args_with_cb(4)?;
  let timeout = args.check_int_as::<u64>(2)?;
  let repeat = if args.len() == 4 && !args.is_nil(3) {
    args.check_int_as::<u64>(3)?
  } else {
    0
  };
  handle.start(
    CallbackSlot::Start,
    on_timeout,
    StartOp::Timer { timeout, repeat },
  )?;
  this(handle)
}

pub fn stop(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("stop", values);
  let handle = args.check_handle(1, TIMER, HandleFlags::OPEN)?;
  args.check_none(1)?;
  handle.stop(CallbackSlot::Start, StopOp::Timer)?;
  this(handle)
}

/// Restarts a repeating timer with its repeat interval as the timeout.
pub fn again(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("again", values);
  let handle = args.check_handle(1, TIMER, HandleFlags::OPEN)?;
  args.check_none(1)?;
  let status = handle
    .with_native(HandleFlags::OPEN, |native, id| native.timer_again(id))?;
  check_status(status)?;
  this(handle)
}

pub fn set_repeat(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("set_repeat", values);
  let handle = args.check_handle(1, TIMER, HandleFlags::OPEN)?;
  let repeat = args.check_int_as::<u64>(2)?;
  args.check_none(2)?;
  handle.with_native(HandleFlags::OPEN, |native, id| {
    native.timer_set_repeat(id, repeat)
  })?;
  this(handle)
}

pub fn get_repeat(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("get_repeat", values);
  let handle = args.check_handle(1, TIMER, HandleFlags::OPEN)?;
  args.check_none(1)?;
  let repeat = handle
    .with_native(HandleFlags::OPEN, |native, id| native.timer_get_repeat(id))?;
  Ok(smallvec![Value::Integer(repeat as i64)])
}

#[cfg(test)]
mod tests {
  use std::cell::Cell;
  use std::rc::Rc;

  use pretty_assertions::assert_eq;
  use uv_bridge::BridgeOptions;
  use uv_bridge::RunMode;
  use uv_bridge::testing::StubController;
  use uv_bridge::testing::StubLoop;

  use super::*;

  fn setup() -> (UvBridge, StubController, Value) {
    let (native, stub) = StubLoop::new();
    let bridge = UvBridge::new(native, BridgeOptions::default());
    let timer = create(&bridge, &[]).unwrap().remove(0);
    (bridge, stub, timer)
  }

  #[test]
  fn start_with_and_without_repeat() {
    let (_bridge, stub, timer) = setup();
    let handle = timer.as_handle().unwrap().clone();
    let cb = Value::function(|_| Ok(()));
    start(&[timer.clone(), Value::Integer(100), cb.clone()]).unwrap();
    assert_eq!(stub.timer(&handle), Some((100, 0)));
    start(&[timer.clone(), Value::Integer(10), Value::Integer(50), cb.clone()])
      .unwrap();
    assert_eq!(stub.timer(&handle), Some((10, 50)));

    let err = start(&[timer.clone(), Value::Integer(-1), cb]).unwrap_err();
    assert_eq!(
      err.to_string(),
      "bad argument #2 to 'start' (-1 is out of range)"
    );
    let err = start(&[timer, Value::Integer(5)]).unwrap_err();
    assert_eq!(
      err.to_string(),
      "bad argument #2 to 'start' (function expected, got number)"
    );
  }

  #[test]
  fn repeat_and_again() {
    let (_bridge, stub, timer) = setup();
    let handle = timer.as_handle().unwrap().clone();
    let err = again(&[timer.clone()]).unwrap_err();
    assert_eq!(err.as_uv().map(|err| err.name()), Some("EINVAL"));

    set_repeat(&[timer.clone(), Value::Integer(250)]).unwrap();
    let repeat = get_repeat(&[timer.clone()]).unwrap();
    assert_eq!(repeat[0].as_integer(), Some(250));
    again(&[timer]).unwrap();
    assert!(stub.is_active(&handle));
  }

  #[test]
  fn fires_until_stopped() {
    let (bridge, stub, timer) = setup();
    let handle = timer.as_handle().unwrap().clone();
    let fired = Rc::new(Cell::new(0));
    let f = fired.clone();
    let timer_in_cb = timer.clone();
    start(&[
      timer.clone(),
      Value::Integer(0),
      Value::Integer(10),
      Value::function(move |args| {
        assert_eq!(args[0].as_handle(), timer_in_cb.as_handle());
        f.set(f.get() + 1);
        Ok(())
      }),
    ])
    .unwrap();
    stub.push_tick(&handle);
    stub.push_tick(&handle);
    bridge.default_loop().run(RunMode::Once).unwrap();
    assert_eq!(fired.get(), 2);

    stop(&[timer.clone()]).unwrap();
    assert!(!stub.is_active(&handle));
    assert!(bridge.registry().is_empty());
  }
}
