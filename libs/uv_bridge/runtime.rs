// Copyright 2018-2026 the Deno authors. MIT license.

use std::cell::Ref;
use std::cell::RefCell;
use std::rc::Rc;

use crate::callback::CallbackRegistry;
use crate::event_loop::UvLoop;
use crate::marshal::BufferPool;
use crate::native::NativeLoop;
use crate::options::BridgeOptions;

/// One scripting-runtime instance. Owns the callback registry shared by all
/// of its loops.
pub struct UvBridge {
  registry: Rc<RefCell<CallbackRegistry>>,
  pool: BufferPool,
  options: Rc<BridgeOptions>,
  default_loop: UvLoop,
}

impl UvBridge {
  pub fn new(
    native: impl NativeLoop + 'static,
    options: BridgeOptions,
  ) -> Self {
    let registry = Rc::new(RefCell::new(CallbackRegistry::new()));
    let pool = BufferPool::new(options.read_buffer_size);
    let options = Rc::new(options);
    let default_loop = UvLoop::new(
      Box::new(native),
      registry.clone(),
      pool.clone(),
      options.clone(),
      true,
    );
    Self {
      registry,
      pool,
      options,
      default_loop,
    }
  }

  pub fn default_loop(&self) -> UvLoop {
    self.default_loop.clone()
  }

  /// Wraps another native loop. Callbacks of its handles live in the same
  /// registry as the default loop's.
  pub fn new_loop(&self, native: impl NativeLoop + 'static) -> UvLoop {
    UvLoop::new(
      Box::new(native),
      self.registry.clone(),
      self.pool.clone(),
      self.options.clone(),
      false,
    )
  }

  pub fn options(&self) -> &BridgeOptions {
    &self.options
  }

  pub fn registry(&self) -> Ref<'_, CallbackRegistry> {
    self.registry.borrow()
  }

  /// Drops every callback and payload still registered without invoking
  /// them. Returns how many callbacks were dropped.
  pub fn shutdown(&self) -> usize {
    let (callbacks, anchors) = self.registry.borrow_mut().drain();
    let dropped = callbacks.len();
    drop(callbacks);
    drop(anchors);
    if dropped > 0 {
      log::debug!("runtime shutdown dropped {dropped} pending callbacks");
    }
    dropped
  }
}

impl Drop for UvBridge {
  fn drop(&mut self) {
    self.shutdown();
  }
}
