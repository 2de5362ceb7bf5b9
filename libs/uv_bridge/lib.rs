// Copyright 2018-2026 the Deno authors. MIT license.

//! Bridges a callback driven native event loop to a garbage collected
//! scripting runtime.
//!
//! Every native handle is paired with a managed [`Handle`] wrapper, managed
//! callables are retained in a [`CallbackRegistry`] for as long as the native
//! side owes a completion, and completions pulled from a [`NativeLoop`] are
//! marshaled into managed values and dispatched by [`UvLoop::run`].

#![deny(clippy::print_stderr)]
#![deny(clippy::print_stdout)]
#![deny(clippy::unnecessary_wraps)]

pub mod args;
mod callback;
pub mod error;
mod event_loop;
mod handle;
pub mod marshal;
pub mod native;
mod options;
mod request;
mod runtime;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
mod value;

// Re-exports
pub use bytes;
pub use deno_error;

pub use crate::args::Args;
pub use crate::callback::CallbackKey;
pub use crate::callback::CallbackRegistry;
pub use crate::error::BridgeError;
pub use crate::error::UvError;
pub use crate::error::errno;
pub use crate::event_loop::UvLoop;
pub use crate::handle::CallbackSlot;
pub use crate::handle::Handle;
pub use crate::handle::HandleFlags;
pub use crate::handle::HandleKind;
pub use crate::handle::HandleState;
pub use crate::native::InitParams;
pub use crate::native::NativeLoop;
pub use crate::native::RunMode;
pub use crate::options::BridgeOptions;
pub use crate::options::CallbackErrorPolicy;
pub use crate::request::RequestId;
pub use crate::request::RequestKind;
pub use crate::runtime::UvBridge;
pub use crate::value::Callable;
pub use crate::value::Value;
pub use crate::value::Values;
