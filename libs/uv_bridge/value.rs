// Copyright 2018-2026 the Deno authors. MIT license.

use std::fmt;
use std::rc::Rc;

use bytes::Bytes;
use deno_error::JsErrorBox;
use smallvec::SmallVec;

use crate::error::UvError;
use crate::event_loop::UvLoop;
use crate::handle::Handle;

/// Results of a managed call. Most calls return the receiver or one or two
/// values, so they stay inline.
pub type Values = SmallVec<[Value; 2]>;

type CallableFn = dyn Fn(&[Value]) -> Result<(), JsErrorBox>;

/// A managed function. Cloning a `Callable` takes a retaining reference, the
/// same way the callback registry keeps functions alive while the native side
/// still owes a completion.
#[derive(Clone)]
pub struct Callable(Rc<CallableFn>);

impl Callable {
  pub fn new(
    f: impl Fn(&[Value]) -> Result<(), JsErrorBox> + 'static,
  ) -> Self {
    Self(Rc::new(f))
  }

  pub fn call(&self, args: &[Value]) -> Result<(), JsErrorBox> {
    (self.0)(args)
  }

  /// Number of live references, the registry's included.
  pub fn retain_count(&self) -> usize {
    Rc::strong_count(&self.0)
  }

  pub fn ptr_eq(&self, other: &Callable) -> bool {
    Rc::ptr_eq(&self.0, &other.0)
  }
}

impl fmt::Debug for Callable {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Callable({:p})", Rc::as_ptr(&self.0))
  }
}

/// A value on the managed side of the bridge.
#[derive(Clone, Debug, Default)]
pub enum Value {
  #[default]
  Nil,
  Boolean(bool),
  Integer(i64),
  Number(f64),
  String(Bytes),
  Function(Callable),
  Handle(Handle),
  Loop(UvLoop),
  Error(UvError),
}

impl Value {
  pub fn string(s: impl Into<Bytes>) -> Self {
    Self::String(s.into())
  }

  pub fn function(
    f: impl Fn(&[Value]) -> Result<(), JsErrorBox> + 'static,
  ) -> Self {
    Self::Function(Callable::new(f))
  }

  pub fn is_nil(&self) -> bool {
    matches!(self, Self::Nil)
  }

  pub fn type_name(&self) -> &'static str {
    match self {
      Self::Nil => "nil",
      Self::Boolean(_) => "boolean",
      Self::Integer(_) | Self::Number(_) => "number",
      Self::String(_) => "string",
      Self::Function(_) => "function",
      Self::Handle(_) => "handle",
      Self::Loop(_) => "loop",
      Self::Error(_) => "error",
    }
  }

  /// Truthiness as the scripting language sees it.
  pub fn to_bool(&self) -> bool {
    !matches!(self, Self::Nil | Self::Boolean(false))
  }

  pub fn as_integer(&self) -> Option<i64> {
    match self {
      Self::Integer(i) => Some(*i),
      Self::Number(n) if n.fract() == 0.0 => Some(*n as i64),
      _ => None,
    }
  }

  pub fn as_bytes(&self) -> Option<&Bytes> {
    match self {
      Self::String(b) => Some(b),
      _ => None,
    }
  }

  pub fn as_str(&self) -> Option<&str> {
    self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
  }

  pub fn as_handle(&self) -> Option<&Handle> {
    match self {
      Self::Handle(h) => Some(h),
      _ => None,
    }
  }

  pub fn as_error(&self) -> Option<&UvError> {
    match self {
      Self::Error(e) => Some(e),
      _ => None,
    }
  }
}

impl From<Handle> for Value {
  fn from(handle: Handle) -> Self {
    Self::Handle(handle)
  }
}

impl From<UvError> for Value {
  fn from(err: UvError) -> Self {
    Self::Error(err)
  }
}

impl From<Option<UvError>> for Value {
  fn from(err: Option<UvError>) -> Self {
    err.map(Self::Error).unwrap_or_default()
  }
}

impl From<i64> for Value {
  fn from(i: i64) -> Self {
    Self::Integer(i)
  }
}

impl From<bool> for Value {
  fn from(b: bool) -> Self {
    Self::Boolean(b)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn truthiness() {
    assert!(!Value::Nil.to_bool());
    assert!(!Value::Boolean(false).to_bool());
    assert!(Value::Integer(0).to_bool());
    assert!(Value::string("").to_bool());
  }

  #[test]
  fn integer_coercion() {
    assert_eq!(Value::Number(3.0).as_integer(), Some(3));
    assert_eq!(Value::Number(3.5).as_integer(), None);
    assert_eq!(Value::string("3").as_integer(), None);
  }

  #[test]
  fn callable_retain_count() {
    let f = Callable::new(|_| Ok(()));
    assert_eq!(f.retain_count(), 1);
    let g = f.clone();
    assert_eq!(f.retain_count(), 2);
    assert!(f.ptr_eq(&g));
    drop(g);
    assert_eq!(f.retain_count(), 1);
  }
}
