// Copyright 2018-2026 the Deno authors. MIT license.

use serde::Deserialize;

/// What happens when a managed callback invoked from the loop raises.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackErrorPolicy {
  /// Stop dispatching and return the error from the loop's `run`.
  /// Completions not yet dispatched are kept and delivered on the next run.
  #[default]
  Propagate,
  /// Log the error and keep dispatching.
  Log,
}

/// Runtime wide settings of the bridge.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BridgeOptions {
  /// Size of the scratch buffers lent to the native loop for reads.
  pub read_buffer_size: usize,
  /// Initial buffer size for name queries such as `getsockname` on pipes.
  pub name_buffer_capacity: usize,
  pub callback_error_policy: CallbackErrorPolicy,
}

impl Default for BridgeOptions {
  fn default() -> Self {
    Self {
      read_buffer_size: 64 * 1024,
      name_buffer_capacity: 255,
      callback_error_policy: CallbackErrorPolicy::Propagate,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use pretty_assertions::assert_eq;

  #[test]
  fn defaults() {
    let options = BridgeOptions::default();
    assert_eq!(options.read_buffer_size, 65536);
    assert_eq!(options.name_buffer_capacity, 255);
    assert_eq!(options.callback_error_policy, CallbackErrorPolicy::Propagate);
  }

  #[test]
  fn deserialize_partial() {
    let options: BridgeOptions = serde_json::from_str(
      r#"{ "readBufferSize": 1024, "callbackErrorPolicy": "log" }"#,
    )
    .unwrap();
    assert_eq!(
      options,
      BridgeOptions {
        read_buffer_size: 1024,
        name_buffer_capacity: 255,
        callback_error_policy: CallbackErrorPolicy::Log,
      }
    );
  }
}
