// Copyright 2018-2026 the Deno authors. MIT license.

use std::borrow::Cow;
use std::ffi::c_int;
use std::fmt;

use crate::handle::HandleKind;
use crate::handle::HandleState;

macro_rules! errno_table {
  ($($name:ident = $win:literal, $msg:literal;)*) => {
    /// Native status codes. Negative `errno` values on unix, libuv's fixed
    /// numbering everywhere else.
    #[allow(non_upper_case_globals)]
    pub mod errno {
      use std::ffi::c_int;

      pub const EOF: c_int = -4095;
      pub const UNKNOWN: c_int = -4094;
      $(
        #[cfg(unix)]
        pub const $name: c_int = -libc::$name;
        #[cfg(not(unix))]
        pub const $name: c_int = $win;
      )*
    }

    const ERRNO_TABLE: &[(c_int, &str, &str)] = &[
      (errno::EOF, "EOF", "end of file"),
      (errno::UNKNOWN, "UNKNOWN", "unknown error"),
      $((errno::$name, stringify!($name), $msg),)*
    ];
  };
}

errno_table! {
  E2BIG = -4093, "argument list too long";
  EACCES = -4092, "permission denied";
  EADDRINUSE = -4091, "address already in use";
  EADDRNOTAVAIL = -4090, "address not available";
  EAFNOSUPPORT = -4089, "address family not supported";
  EAGAIN = -4088, "resource temporarily unavailable";
  EALREADY = -4084, "connection already in progress";
  EBADF = -4083, "bad file descriptor";
  EBUSY = -4082, "resource busy or locked";
  ECANCELED = -4081, "operation canceled";
  ECONNABORTED = -4079, "software caused connection abort";
  ECONNREFUSED = -4078, "connection refused";
  ECONNRESET = -4077, "connection reset by peer";
  EEXIST = -4075, "file already exists";
  EFAULT = -4074, "bad address in system call argument";
  EHOSTUNREACH = -4073, "host is unreachable";
  EINTR = -4072, "interrupted system call";
  EINVAL = -4071, "invalid argument";
  EIO = -4070, "i/o error";
  EISCONN = -4069, "socket is already connected";
  EISDIR = -4068, "illegal operation on a directory";
  ELOOP = -4067, "too many symbolic links encountered";
  EMFILE = -4066, "too many open files";
  EMSGSIZE = -4065, "message too long";
  ENAMETOOLONG = -4064, "name too long";
  ENETDOWN = -4063, "network is down";
  ENETUNREACH = -4062, "network is unreachable";
  ENFILE = -4061, "file table overflow";
  ENOBUFS = -4060, "no buffer space available";
  ENODEV = -4059, "no such device";
  ENOENT = -4058, "no such file or directory";
  ENOMEM = -4057, "not enough memory";
  ENOSPC = -4055, "no space left on device";
  ENOSYS = -4054, "function not implemented";
  ENOTCONN = -4053, "socket is not connected";
  ENOTDIR = -4052, "not a directory";
  ENOTEMPTY = -4051, "directory not empty";
  ENOTSOCK = -4050, "socket operation on non-socket";
  ENOTSUP = -4049, "operation not supported on socket";
  EPERM = -4048, "operation not permitted";
  EPIPE = -4047, "broken pipe";
  EPROTO = -4046, "protocol error";
  EPROTONOSUPPORT = -4045, "protocol not supported";
  EPROTOTYPE = -4044, "protocol wrong type for socket";
  EROFS = -4043, "read-only file system";
  ESHUTDOWN = -4042, "cannot send after transport endpoint shutdown";
  ESPIPE = -4041, "invalid seek";
  ESRCH = -4040, "no such process";
  ETIMEDOUT = -4039, "connection timed out";
  ETXTBSY = -4038, "text file is busy";
  EXDEV = -4037, "cross-device link not permitted";
  EFBIG = -4036, "file too large";
  ENOPROTOOPT = -4035, "protocol not available";
  ERANGE = -4034, "result too large";
  ENXIO = -4033, "no such device or address";
  EMLINK = -4032, "too many links";
}

fn lookup(code: c_int) -> Option<&'static (c_int, &'static str, &'static str)> {
  ERRNO_TABLE.iter().find(|(c, _, _)| *c == code)
}

/// Symbolic name of a native status code, e.g. `ECONNREFUSED`.
pub fn err_name(code: c_int) -> &'static str {
  lookup(code).map(|(_, name, _)| *name).unwrap_or("UNKNOWN")
}

/// Human readable message for a native status code.
pub fn strerror(code: c_int) -> &'static str {
  lookup(code).map(|(_, _, msg)| *msg).unwrap_or("unknown error")
}

/// A failed native status, projected into a value the managed side can
/// inspect. Exposed to scripts as an `Error` whose `code` property is the
/// symbolic errno name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, deno_error::JsError)]
#[class(generic)]
#[property("code" = self.name().to_string())]
pub struct UvError {
  code: c_int,
  context: Option<Cow<'static, str>>,
}

impl UvError {
  pub fn new(code: c_int) -> Self {
    debug_assert!(code < 0, "status {code} is not an error");
    Self {
      code,
      context: None,
    }
  }

  pub fn with_context(
    code: c_int,
    context: impl Into<Cow<'static, str>>,
  ) -> Self {
    Self {
      code,
      context: Some(context.into()),
    }
  }

  pub fn code(&self) -> c_int {
    self.code
  }

  pub fn name(&self) -> &'static str {
    err_name(self.code)
  }

  pub fn message(&self) -> &'static str {
    strerror(self.code)
  }

  pub fn context(&self) -> Option<&str> {
    self.context.as_deref()
  }

  pub fn is_canceled(&self) -> bool {
    self.code == errno::ECANCELED
  }

  pub fn is_eof(&self) -> bool {
    self.code == errno::EOF
  }
}

impl fmt::Display for UvError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}: {}", self.name(), self.message())?;
    if let Some(context) = &self.context {
      write!(f, " ({context})")?;
    }
    Ok(())
  }
}

/// Splits a native status into its success magnitude or a projected error.
/// Zero and positive values are results (byte counts, handle types, ...).
pub fn project(status: c_int) -> Result<u32, UvError> {
  if status < 0 {
    Err(UvError::new(status))
  } else {
    Ok(status as u32)
  }
}

/// Same as [`project`] for the `ssize_t` style statuses of read callbacks.
pub fn project_len(nread: isize) -> Result<usize, UvError> {
  if nread < 0 {
    Err(UvError::new(nread as c_int))
  } else {
    Ok(nread as usize)
  }
}

/// Errors raised synchronously at a managed call boundary.
#[derive(Debug, thiserror::Error, deno_error::JsError)]
pub enum BridgeError {
  #[class(type)]
  #[error("bad argument #{position} to '{method}' ({message})")]
  Argument {
    method: &'static str,
    position: usize,
    message: Cow<'static, str>,
  },
  #[class("InvalidStateError")]
  #[error("{kind} handle is {state}")]
  InvalidState {
    kind: HandleKind,
    state: HandleState,
  },
  #[class("InvalidStateError")]
  #[error("loop is closed")]
  LoopClosed,
  #[class(type)]
  #[error("{expected} expected, got {found}")]
  TypeMismatch {
    expected: &'static str,
    found: &'static str,
  },
  #[class(inherit)]
  #[error(transparent)]
  NativeInit(UvError),
  #[class(inherit)]
  #[error(transparent)]
  NativeSubmit(UvError),
}

impl BridgeError {
  pub fn argument(
    method: &'static str,
    position: usize,
    message: impl Into<Cow<'static, str>>,
  ) -> Self {
    Self::Argument {
      method,
      position,
      message: message.into(),
    }
  }

  /// The native error carried by this error, if it came from the native
  /// layer.
  pub fn as_uv(&self) -> Option<&UvError> {
    match self {
      Self::NativeInit(err) | Self::NativeSubmit(err) => Some(err),
      _ => None,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use deno_error::JsErrorClass;
  use pretty_assertions::assert_eq;

  #[test]
  fn projects_negative_status_only() {
    assert_eq!(project(0), Ok(0));
    assert_eq!(project(17), Ok(17));
    let err = project(errno::ECONNREFUSED).unwrap_err();
    assert_eq!(err.code(), errno::ECONNREFUSED);
    assert_eq!(err.name(), "ECONNREFUSED");
    assert_eq!(err.to_string(), "ECONNREFUSED: connection refused");
  }

  #[test]
  fn eof_and_unknown_codes() {
    let eof = project_len(errno::EOF as isize).unwrap_err();
    assert!(eof.is_eof());
    assert_eq!(eof.name(), "EOF");
    assert_eq!(err_name(-123456), "UNKNOWN");
    assert_eq!(strerror(-123456), "unknown error");
  }

  #[test]
  fn context_is_appended() {
    let err = UvError::with_context(errno::EINVAL, "300.1.1.1:53");
    assert_eq!(err.to_string(), "EINVAL: invalid argument (300.1.1.1:53)");
    assert_eq!(err.context(), Some("300.1.1.1:53"));
  }

  #[test]
  fn error_classes() {
    let err = BridgeError::argument("send", 4, "string expected");
    assert_eq!(err.get_class(), "TypeError");
    assert_eq!(
      err.to_string(),
      "bad argument #4 to 'send' (string expected)"
    );

    let err = BridgeError::InvalidState {
      kind: HandleKind::Udp,
      state: HandleState::Closing,
    };
    assert_eq!(err.get_class(), "InvalidStateError");
    assert_eq!(err.to_string(), "udp handle is closing");

    let err = BridgeError::NativeSubmit(UvError::new(errno::EPIPE));
    assert_eq!(err.get_class(), "Error");
    assert_eq!(err.as_uv().map(UvError::name), Some("EPIPE"));
  }
}
