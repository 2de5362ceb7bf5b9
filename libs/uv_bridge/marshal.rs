// Copyright 2018-2026 the Deno authors. MIT license.

//! Buffer and address conversion between the managed and native sides.
//!
//! Inbound data is read into pooled scratch buffers and copied into an
//! immutable managed string before any callback runs, so the native buffer
//! can go back to the pool no matter what the callback does. Outbound data
//! is borrowed from the managed string, which stays anchored in the callback
//! registry until the request completes.

use std::cell::Cell;
use std::cell::RefCell;
use std::ffi::c_int;
use std::fmt;
use std::net::IpAddr;
use std::net::SocketAddr;
use std::rc::Rc;

use bytes::Bytes;

use crate::error::UvError;
use crate::error::errno;
use crate::value::Value;
use crate::value::Values;

const MAX_FREE_BUFFERS: usize = 8;

struct PoolInner {
  buffer_size: usize,
  free: RefCell<Vec<Box<[u8]>>>,
  outstanding: Cell<usize>,
}

/// Scratch buffers handed to the native loop for inbound reads.
#[derive(Clone)]
pub struct BufferPool(Rc<PoolInner>);

impl BufferPool {
  pub fn new(buffer_size: usize) -> Self {
    Self(Rc::new(PoolInner {
      buffer_size: buffer_size.max(1),
      free: RefCell::new(Vec::new()),
      outstanding: Cell::new(0),
    }))
  }

  pub fn buffer_size(&self) -> usize {
    self.0.buffer_size
  }

  /// Takes a buffer of [`BufferPool::buffer_size`] bytes. It returns to the
  /// pool when dropped.
  pub fn take(&self) -> ReadBuf {
    let data = self
      .0
      .free
      .borrow_mut()
      .pop()
      .unwrap_or_else(|| vec![0; self.0.buffer_size].into_boxed_slice());
    self.0.outstanding.set(self.0.outstanding.get() + 1);
    ReadBuf {
      data: Some(data),
      filled: 0,
      pool: self.0.clone(),
    }
  }

  /// Buffers currently lent out.
  pub fn outstanding(&self) -> usize {
    self.0.outstanding.get()
  }
}

impl fmt::Debug for BufferPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BufferPool")
      .field("buffer_size", &self.0.buffer_size)
      .field("outstanding", &self.0.outstanding.get())
      .finish()
  }
}

/// A pooled read buffer. Only the first [`ReadBuf::filled`] bytes hold data
/// from the current read; the rest may be left over from earlier reads.
pub struct ReadBuf {
  data: Option<Box<[u8]>>,
  filled: usize,
  pool: Rc<PoolInner>,
}

impl ReadBuf {
  pub fn as_slice(&self) -> &[u8] {
    self.data.as_deref().unwrap_or_default()
  }

  pub fn as_mut_slice(&mut self) -> &mut [u8] {
    self.data.as_deref_mut().unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.as_slice().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Copies as much of `src` as fits. Returns the number of bytes copied.
  pub fn fill(&mut self, src: &[u8]) -> usize {
    let dst = self.as_mut_slice();
    let n = src.len().min(dst.len());
    dst[..n].copy_from_slice(&src[..n]);
    self.filled = n;
    n
  }

  /// Bytes written by the current read.
  pub fn filled(&self) -> usize {
    self.filled
  }

  /// Records how many bytes a native read wrote through
  /// [`ReadBuf::as_mut_slice`]. Clamped to the capacity.
  pub fn set_filled(&mut self, n: usize) {
    self.filled = n.min(self.len());
  }
}

impl Drop for ReadBuf {
  fn drop(&mut self) {
    self.pool.outstanding.set(self.pool.outstanding.get() - 1);
    if let Some(data) = self.data.take() {
      let mut free = self.pool.free.borrow_mut();
      if free.len() < MAX_FREE_BUFFERS {
        free.push(data);
      }
    }
  }
}

impl fmt::Debug for ReadBuf {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ReadBuf").field("len", &self.len()).finish()
  }
}

/// Copies the first `nread` bytes of an inbound buffer into a managed string
/// and returns the buffer to its pool. Never copies past the filled length.
pub fn copy_inbound(buf: Option<ReadBuf>, nread: usize) -> Bytes {
  match buf {
    Some(buf) => {
      let src = buf.as_slice();
      Bytes::copy_from_slice(&src[..nread.min(buf.filled())])
    }
    None => Bytes::new(),
  }
}

/// Host and port values for a native address, or a single nil if there is
/// none.
pub fn addr_values(addr: Option<SocketAddr>) -> Values {
  match addr {
    Some(addr) => [
      Value::string(addr.ip().to_string()),
      Value::Integer(addr.port() as i64),
    ]
    .into_iter()
    .collect(),
    None => [Value::Nil].into_iter().collect(),
  }
}

/// Parses a managed `host`/`port` pair. Both IPv4 and IPv6 literals are
/// accepted; anything else fails with `EINVAL`.
pub fn to_addr(host: &str, port: i64) -> Result<SocketAddr, UvError> {
  let invalid =
    || UvError::with_context(errno::EINVAL, format!("{host}:{port}"));
  let port = u16::try_from(port).map_err(|_| invalid())?;
  let ip = host.parse::<IpAddr>().map_err(|_| invalid())?;
  Ok(SocketAddr::new(ip, port))
}

/// Reads a name through a buffer-filling native call. If the first attempt
/// fails with `ENOBUFS`, the call reported the size it needs and is retried
/// once with a buffer of that size.
pub fn read_name(
  capacity: usize,
  mut fill: impl FnMut(&mut [u8], &mut usize) -> c_int,
) -> Result<Bytes, UvError> {
  let mut buf = vec![0; capacity];
  let mut len = capacity;
  let mut status = fill(&mut buf, &mut len);
  if status == errno::ENOBUFS && len > capacity {
    buf = vec![0; len];
    status = fill(&mut buf, &mut len);
  }
  if status < 0 {
    return Err(UvError::new(status));
  }
  buf.truncate(len.min(buf.len()));
  Ok(Bytes::from(buf))
}
