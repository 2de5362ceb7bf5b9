// Copyright 2018-2026 the Deno authors. MIT license.

//! Argument checking at the managed call boundary. Positions are 1-based,
//! the receiver of a method call is argument #1.

use bytes::Bytes;

use crate::error::BridgeError;
use crate::event_loop::UvLoop;
use crate::handle::Handle;
use crate::handle::HandleFlags;
use crate::handle::HandleKind;
use crate::value::Callable;
use crate::value::Value;

/// The arguments of one managed call.
#[derive(Clone, Copy)]
pub struct Args<'a> {
  method: &'static str,
  values: &'a [Value],
}

impl<'a> Args<'a> {
  pub fn new(method: &'static str, values: &'a [Value]) -> Self {
    Self { method, values }
  }

  pub fn method(&self) -> &'static str {
    self.method
  }

  pub fn len(&self) -> usize {
    self.values.len()
  }

  pub fn is_empty(&self) -> bool {
    self.values.is_empty()
  }

  /// Argument `i`, `None` if absent.
  pub fn get(&self, i: usize) -> Option<&'a Value> {
    i.checked_sub(1).and_then(|i| self.values.get(i))
  }

  /// True if argument `i` is absent or nil.
  pub fn is_nil(&self, i: usize) -> bool {
    self.get(i).is_none_or(Value::is_nil)
  }

  fn error(&self, i: usize, expected: &str) -> BridgeError {
    let found = self.get(i).map(Value::type_name).unwrap_or("no value");
    BridgeError::argument(
      self.method,
      i,
      format!("{expected} expected, got {found}"),
    )
  }

  /// A live handle of `kind` (any kind if `None`) with `required` flags set.
  /// A closing handle fails with `InvalidState`.
  pub fn check_handle(
    &self,
    i: usize,
    kind: Option<HandleKind>,
    required: HandleFlags,
  ) -> Result<Handle, BridgeError> {
    match self.get(i) {
      Some(value @ Value::Handle(_)) => {
        Handle::check_and_cast(value, kind, required)
      }
      _ => Err(self.error(i, kind.map(HandleKind::name).unwrap_or("handle"))),
    }
  }

  pub fn check_str(&self, i: usize) -> Result<&'a str, BridgeError> {
    match self.get(i) {
      Some(Value::String(bytes)) => std::str::from_utf8(bytes).map_err(|_| {
        BridgeError::argument(self.method, i, "invalid utf-8 string")
      }),
      _ => Err(self.error(i, "string")),
    }
  }

  /// A string or a byte payload, returned without copying.
  pub fn check_bytes(&self, i: usize) -> Result<Bytes, BridgeError> {
    match self.get(i) {
      Some(Value::String(bytes)) => Ok(bytes.clone()),
      _ => Err(self.error(i, "string")),
    }
  }

  pub fn check_int(&self, i: usize) -> Result<i64, BridgeError> {
    match self.get(i) {
      Some(value @ (Value::Integer(_) | Value::Number(_))) => value
        .as_integer()
        .ok_or_else(|| self.error(i, "integer")),
      _ => Err(self.error(i, "number")),
    }
  }

  /// Like [`Args::check_int`], failing unless the value fits in `T`.
  pub fn check_int_as<T: TryFrom<i64>>(
    &self,
    i: usize,
  ) -> Result<T, BridgeError> {
    let n = self.check_int(i)?;
    T::try_from(n).map_err(|_| {
      BridgeError::argument(self.method, i, format!("{n} is out of range"))
    })
  }

  pub fn opt_int(&self, i: usize, default: i64) -> Result<i64, BridgeError> {
    if self.is_nil(i) {
      Ok(default)
    } else {
      self.check_int(i)
    }
  }

  /// Truthiness of argument `i`; absent is false.
  pub fn to_bool(&self, i: usize) -> bool {
    self.get(i).is_some_and(Value::to_bool)
  }

  pub fn check_callable(&self, i: usize) -> Result<Callable, BridgeError> {
    match self.get(i) {
      Some(Value::Function(f)) => Ok(f.clone()),
      _ => Err(self.error(i, "function")),
    }
  }

  pub fn opt_callable(
    &self,
    i: usize,
  ) -> Result<Option<Callable>, BridgeError> {
    if self.is_nil(i) {
      Ok(None)
    } else {
      self.check_callable(i).map(Some)
    }
  }

  /// Fails if any argument after `i` is given.
  pub fn check_none(&self, i: usize) -> Result<(), BridgeError> {
    if self.values.len() > i {
      return Err(BridgeError::argument(
        self.method,
        i + 1,
        "no value expected",
      ));
    }
    Ok(())
  }

  /// Checks that at most `n` arguments are given and the last one is a
  /// callable, which is returned. Optional arguments before the callback
  /// are only present if all `n` are given.
  pub fn check_args_with_cb(&self, n: usize) -> Result<Callable, BridgeError> {
    self.check_none(n)?;
    self.check_callable(self.len().max(1))
  }

  /// The loop in argument `i`, or `default` if absent.
  pub fn opt_loop(
    &self,
    i: usize,
    default: &UvLoop,
  ) -> Result<UvLoop, BridgeError> {
    match self.get(i) {
      None | Some(Value::Nil) => Ok(default.clone()),
      Some(Value::Loop(uv_loop)) => Ok(uv_loop.clone()),
      _ => Err(self.error(i, "loop")),
    }
  }
}

#[cfg(test)]
mod tests {
  use pretty_assertions::assert_eq;

  use super::*;

  fn message(err: BridgeError) -> String {
    err.to_string()
  }

  #[test]
  fn positions_are_one_based() {
    let values = [Value::string("a"), Value::Integer(3)];
    let args = Args::new("bind", &values);
    assert_eq!(args.check_str(1).unwrap(), "a");
    assert_eq!(args.check_int(2).unwrap(), 3);
    assert!(args.get(0).is_none());
    assert!(args.get(3).is_none());
    assert_eq!(
      message(args.check_str(3).unwrap_err()),
      "bad argument #3 to 'bind' (string expected, got no value)"
    );
    assert_eq!(
      message(args.check_int(1).unwrap_err()),
      "bad argument #1 to 'bind' (number expected, got string)"
    );
  }

  #[test]
  fn optional_values() {
    let values = [Value::Nil, Value::Number(2.0)];
    let args = Args::new("pipe", &values);
    assert_eq!(args.opt_int(1, 7).unwrap(), 7);
    assert_eq!(args.opt_int(2, 7).unwrap(), 2);
    assert!(!args.to_bool(3));
    assert!(args.opt_callable(1).unwrap().is_none());

    let values = [Value::Number(1.5)];
    let args = Args::new("set_ttl", &values);
    assert_eq!(
      message(args.check_int(1).unwrap_err()),
      "bad argument #1 to 'set_ttl' (integer expected, got number)"
    );
  }

  #[test]
  fn int_range() {
    let values = [Value::Integer(-1)];
    let args = Args::new("pending_instances", &values);
    assert_eq!(args.check_int_as::<i32>(1).unwrap(), -1);
    assert_eq!(
      message(args.check_int_as::<u32>(1).unwrap_err()),
      "bad argument #1 to 'pending_instances' (-1 is out of range)"
    );
  }

  #[test]
  fn callback_arity() {
    let values = [Value::Nil, Value::function(|_| Ok(()))];
    let args = Args::new("start", &values);
    assert!(args.check_args_with_cb(2).is_ok());
    assert_eq!(
      message(args.check_args_with_cb(1).unwrap_err()),
      "bad argument #2 to 'start' (no value expected)"
    );

    assert!(args.check_args_with_cb(3).is_ok());

    let values = [Value::Nil, Value::Integer(1)];
    let args = Args::new("start", &values);
    assert_eq!(
      message(args.check_args_with_cb(2).unwrap_err()),
      "bad argument #2 to 'start' (function expected, got number)"
    );
  }

  #[test]
  fn handle_expected() {
    let values = [Value::string("nope")];
    let args = Args::new("close", &values);
    assert_eq!(
      message(args.check_handle(1, None, HandleFlags::OPEN).unwrap_err()),
      "bad argument #1 to 'close' (handle expected, got string)"
    );
  }
}
