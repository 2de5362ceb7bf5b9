// Copyright 2018-2026 the Deno authors. MIT license.

// Once a callable has been handed to the native side, the registry may hold
// the only reference to it. Every key in the table stands for a completion the
// native loop still owes us, so entries must be removed exactly once.

use std::collections::HashMap;
use std::fmt;

use crate::request::RequestId;
use crate::value::Callable;
use crate::value::Value;

/// Opaque key minted by [`CallbackRegistry::register`]. Keys are never
/// reused within one registry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallbackKey(u64);

impl fmt::Debug for CallbackKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "CallbackKey({})", self.0)
  }
}

/// Retains managed callables (and payload values of in-flight requests) on
/// behalf of the native loop. One registry per runtime instance.
#[derive(Default)]
pub struct CallbackRegistry {
  callbacks: HashMap<CallbackKey, Callable>,
  anchors: HashMap<RequestId, Value>,
  next_key: u64,
  shut_down: bool,
}

impl CallbackRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Stores `callable` and returns the key that identifies it.
  pub fn register(&mut self, callable: Callable) -> CallbackKey {
    self.next_key += 1;
    let key = CallbackKey(self.next_key);
    let prev = self.callbacks.insert(key, callable);
    debug_assert!(prev.is_none());
    key
  }

  /// Looks up a persistent callback without releasing it.
  pub fn resolve(&self, key: CallbackKey) -> Option<Callable> {
    self.callbacks.get(&key).cloned()
  }

  /// Looks up and removes a one-shot callback. Returns `None` only for keys
  /// dropped by [`CallbackRegistry::drain`].
  ///
  /// # Panics
  /// If `key` is not registered and the registry was not drained. That means
  /// the key was already released and the caller's lifecycle bookkeeping is
  /// broken.
  pub fn resolve_and_release(
    &mut self,
    key: CallbackKey,
  ) -> Option<Callable> {
    match self.callbacks.remove(&key) {
      Some(callable) => Some(callable),
      None if self.shut_down => None,
      None => panic!("{key:?} resolved after it was released"),
    }
  }

  /// Drops a callback without invoking it. Keys dropped by
  /// [`CallbackRegistry::drain`] are ignored.
  ///
  /// # Panics
  /// If `key` is not registered and the registry was not drained.
  pub fn release(&mut self, key: CallbackKey) {
    if self.callbacks.remove(&key).is_none() && !self.shut_down {
      panic!("{key:?} released twice");
    }
  }

  /// Whether [`CallbackRegistry::drain`] ran. Keys minted before that point
  /// may no longer resolve.
  pub fn is_shut_down(&self) -> bool {
    self.shut_down
  }

  pub fn contains(&self, key: CallbackKey) -> bool {
    self.callbacks.contains_key(&key)
  }

  pub fn len(&self) -> usize {
    self.callbacks.len()
  }

  pub fn is_empty(&self) -> bool {
    self.callbacks.is_empty()
  }

  /// Keeps `value` reachable until the request completes.
  pub fn anchor(&mut self, req: RequestId, value: Value) {
    let prev = self.anchors.insert(req, value);
    debug_assert!(prev.is_none(), "{req:?} anchored twice");
  }

  pub fn unanchor(&mut self, req: RequestId) -> Option<Value> {
    self.anchors.remove(&req)
  }

  pub fn anchored_len(&self) -> usize {
    self.anchors.len()
  }

  /// Removes every entry without invoking anything. Dropping a callable may
  /// run arbitrary destructors, so the caller drops the returned values once
  /// the registry is no longer borrowed.
  ///
  /// Handles may still hold keys afterwards. Releasing them is a no-op.
  pub fn drain(&mut self) -> (Vec<Callable>, Vec<Value>) {
    self.shut_down = true;
    (
      self.callbacks.drain().map(|(_, callable)| callable).collect(),
      self.anchors.drain().map(|(_, value)| value).collect(),
    )
  }
}
