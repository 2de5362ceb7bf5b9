// Copyright 2018-2026 the Deno authors. MIT license.

//! Filesystem watchers.

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
use uv_bridge::marshal::read_name;
use uv_bridge::native::StartOp;
use uv_bridge::native::StopOp;

use crate::Method;
use crate::native_error;
use crate::this;

/// Event bits passed to the watch callback.
pub const RENAME: i64 = 1;
pub const CHANGE: i64 = 2;

/// Flags of `start`.
pub const FS_EVENT_WATCH_ENTRY: u32 = 1;
pub const FS_EVENT_STAT: u32 = 2;
pub const FS_EVENT_RECURSIVE: u32 = 4;

const FLAG_NAMES: [(&str, u32); 3] = [
  ("watch_entry", FS_EVENT_WATCH_ENTRY),
  ("stat", FS_EVENT_STAT),
  ("recursive", FS_EVENT_RECURSIVE),
];

const FS_EVENT: Option<HandleKind> = Some(HandleKind::FsEvent);

pub fn method(name: &str) -> Option<Method> {
  Some(match name {
    "start" => start,
    "stop" => stop,
    "getpath" => getpath,
    _ => return None,
  })
}

/// `fs_event([loop])`
pub fn create(
  bridge: &UvBridge,
  values: &[Value],
) -> Result<Values, BridgeError> {
  let args = Args::new("fs_event", values);
  let uv_loop = args.opt_loop(1, &bridge.default_loop())?;
  args.check_none(1)?;
  this(uv_loop.create(HandleKind::FsEvent, InitParams::default())?)
}

/// Flags given as a number or as names separated by commas or whitespace.
fn watch_flags(args: &Args<'_>, i: usize) -> Result<u32, BridgeError> {
  match args.get(i) {
    None | Some(Value::Nil) => Ok(0),
    Some(Value::String(_)) => {
      let names = args.check_str(i)?;
      names
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|name| !name.is_empty())
        .try_fold(0, |flags, name| {
          FLAG_NAMES
            .iter()
            .find(|(known, _)| *known == name)
            .map(|(_, flag)| flags | flag)
            .ok_or_else(|| {
              BridgeError::argument(
                args.method(),
                i,
                format!("unknown flag '{name}'"),
              )
            })
        })
    }
    Some(_) => args.check_int_as::<u32>(i),
  }
}

/// `start(path, [flags], cb)`. `cb(h, err, filename, events)` for every
/// change until stopped.
pub fn start(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("start", values);
  let handle = args.check_handle(1, FS_EVENT, HandleFlags::OPEN)?;
  let path = args.check_str(2)?;
  let on_change = args.check_args_with_cb(4)?;
  let flags = if args.len() == 4 {
    watch_flags(&args, 3)?
  } else {
    0
  };
  handle.start(
    CallbackSlot::Start,
    on_change,
    StartOp::Watch { path, flags },
  )?;
  this(handle)
}

pub fn stop(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("stop", values);
  let handle = args.check_handle(1, FS_EVENT, HandleFlags::OPEN)?;
  args.check_none(1)?;
  handle.stop(CallbackSlot::Start, StopOp::Watch)?;
  this(handle)
}

/// The watched path.
pub fn getpath(values: &[Value]) -> Result<Values, BridgeError> {
  let args = Args::new("getpath", values);
  let handle = args.check_handle(1, FS_EVENT, HandleFlags::OPEN)?;
  args.check_none(1)?;
  let capacity = handle.uv_loop()?.options().name_buffer_capacity;
  let path = handle
    .with_native(HandleFlags::OPEN, |native, id| {
      read_name(capacity, |buf, len| native.fs_event_getpath(id, buf, len))
    })?
    .map_err(native_error)?;
  Ok(smallvec![Value::String(path)])
}

#[cfg(test)]
mod tests {
  use std::cell::RefCell;
  use std::rc::Rc;

  use pretty_assertions::assert_eq;
  use uv_bridge::BridgeOptions;
  use uv_bridge::RunMode;
  use uv_bridge::errno;
  use uv_bridge::testing::StubController;
  use uv_bridge::testing::StubLoop;

  use super::*;

  fn setup() -> (UvBridge, StubController, Value) {
    let (native, stub) = StubLoop::new();
    let bridge = UvBridge::new(native, BridgeOptions::default());
    let watcher = create(&bridge, &[]).unwrap().remove(0);
    (bridge, stub, watcher)
  }

  #[test]
  fn flags_as_names_or_number() {
    let (_bridge, stub, watcher) = setup();
    let handle = watcher.as_handle().unwrap().clone();
    let cb = Value::function(|_| Ok(()));

    start(&[watcher.clone(), Value::string("/tmp"), cb.clone()]).unwrap();
    assert_eq!(stub.watch(&handle), Some(("/tmp".to_string(), 0)));

    start(&[
      watcher.clone(),
      Value::string("/tmp"),
      Value::string("stat, recursive"),
      cb.clone(),
    ])
    .unwrap();
    assert_eq!(
      stub.watch(&handle),
      Some(("/tmp".to_string(), FS_EVENT_STAT | FS_EVENT_RECURSIVE))
    );

    start(&[
      watcher.clone(),
      Value::string("/var"),
      Value::Integer(FS_EVENT_WATCH_ENTRY as i64),
      cb.clone(),
    ])
    .unwrap();
    assert_eq!(
      stub.watch(&handle),
      Some(("/var".to_string(), FS_EVENT_WATCH_ENTRY))
    );

    let calls = stub.calls();
    let err = start(&[
      watcher,
      Value::string("/tmp"),
      Value::string("stat,bogus"),
      cb,
    ])
    .unwrap_err();
    assert_eq!(
      err.to_string(),
      "bad argument #3 to 'start' (unknown flag 'bogus')"
    );
    assert_eq!(stub.calls(), calls);
  }

  #[test]
  fn change_delivery() {
    let (bridge, stub, watcher) = setup();
    let handle = watcher.as_handle().unwrap().clone();
    let seen: Rc<RefCell<Vec<Vec<Value>>>> = Default::default();
    let sink = seen.clone();
    let cb = Value::function(move |args| {
      sink.borrow_mut().push(args.to_vec());
      Ok(())
    });
    start(&[watcher.clone(), Value::string("/tmp"), cb]).unwrap();
    stub.push_fs_event(&handle, Some("a.txt"), CHANGE as i32, 0);
    stub.push_fs_event(&handle, None, RENAME as i32, errno::ENOENT);
    bridge.default_loop().run(RunMode::Default).unwrap();

    {
      let seen = seen.borrow();
      assert_eq!(seen.len(), 2);
      assert!(seen[0][1].is_nil());
      assert_eq!(seen[0][2].as_str(), Some("a.txt"));
      assert_eq!(seen[0][3].as_integer(), Some(CHANGE));
      assert_eq!(
        seen[1][1].as_error().map(|err| err.name()),
        Some("ENOENT")
      );
      assert!(seen[1][2].is_nil());
    }

    stop(&[watcher.clone()]).unwrap();
    stub.push_fs_event(&handle, Some("b.txt"), CHANGE as i32, 0);
    bridge.default_loop().run(RunMode::Default).unwrap();
    assert_eq!(seen.borrow().len(), 2);
    assert!(bridge.registry().is_empty());
  }

  #[test]
  fn getpath_of_watch() {
    let (_bridge, _stub, watcher) = setup();
    let err = getpath(&[watcher.clone()]).unwrap_err();
    assert_eq!(err.as_uv().map(|err| err.name()), Some("EINVAL"));
    start(&[
      watcher.clone(),
      Value::string("/srv/data"),
      Value::function(|_| Ok(())),
    ])
    .unwrap();
    assert_eq!(getpath(&[watcher]).unwrap()[0].as_str(), Some("/srv/data"));
  }
}
