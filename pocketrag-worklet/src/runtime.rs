//! The isolated side of the channel: a sandboxed Lua 5.4 VM on its own thread.
//!
//! # Script API
//!
//! | Global | Functions |
//! |--------|-----------|
//! | `IPC`  | `write(bytes)`, `on('data', fn)` |
//! | `log`  | `info`, `warn`, `error`, `debug` |
//!
//! `os`, `io`, `debug`, `loadfile` and `dofile` are removed.

use crate::worklet::{Shared, Status};
use bytes::Bytes;
use mlua::prelude::*;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::Ordering;

/// Registry slot holding the list of `IPC.on('data', fn)` handlers
const DATA_HANDLERS: &str = "pocketrag.ipc.data_handlers";

/// Instructions between interrupt checks
const HOOK_INTERVAL: u32 = 1_000;

/// Host-to-worklet traffic.
#[derive(Debug)]
pub(crate) enum Inbound {
    Data(Bytes),
    Stop,
}

/// Everything the worklet thread needs, moved in at spawn time.
pub(crate) struct Runtime {
    pub(crate) entry_point: String,
    pub(crate) source: String,
    pub(crate) inbound: flume::Receiver<Inbound>,
    pub(crate) outbound: flume::Sender<Bytes>,
    pub(crate) shared: Arc<Shared>,
    pub(crate) ready: flume::Sender<Result<(), String>>,
}

impl Runtime {
    /// Thread body. Returns once stopped, crashed, or abandoned by the host.
    pub(crate) fn run(self) {
        let Runtime {
            entry_point,
            source,
            inbound,
            outbound,
            shared,
            ready,
        } = self;

        let lua = match build_vm(&entry_point, outbound, &shared) {
            Ok(lua) => lua,
            Err(e) => {
                shared.set(Status::Crashed(e.to_string()));
                let _ = ready.send(Err(e.to_string()));
                return;
            }
        };

        if let Err(e) = lua.load(source.as_str()).set_name(entry_point.as_str()).exec() {
            shared.set(Status::Crashed(e.to_string()));
            let _ = ready.send(Err(e.to_string()));
            return;
        }
        let _ = ready.send(Ok(()));
        tracing::debug!(entry_point = %entry_point, "worklet program loaded");

        let mut pending: VecDeque<Bytes> = VecDeque::new();
        while let Ok(Inbound::Data(bytes)) = inbound.recv() {
            pending.push_back(bytes);
            if let Err(e) = deliver(&lua, &mut pending) {
                if shared.interrupted.load(Ordering::Acquire) {
                    break;
                }
                tracing::error!(entry_point = %entry_point, error = %e, "worklet handler failed");
                shared.set(Status::Crashed(e.to_string()));
                return;
            }
        }

        shared.stop();
        tracing::debug!(entry_point = %entry_point, "worklet thread exiting");
    }
}

fn build_vm(entry_point: &str, outbound: flume::Sender<Bytes>, shared: &Arc<Shared>) -> LuaResult<Lua> {
    let lua = Lua::new();

    let flag = Arc::clone(shared);
    lua.set_hook(
        mlua::HookTriggers::new().every_nth_instruction(HOOK_INTERVAL),
        move |_lua, _debug| {
            if flag.interrupted.load(Ordering::Acquire) {
                Err(LuaError::RuntimeError("worklet stopped by host".to_string()))
            } else {
                Ok(mlua::VmState::Continue)
            }
        },
    );

    sandbox_globals(&lua)?;
    register_ipc_api(&lua, outbound)?;
    register_log_api(&lua, entry_point)?;
    Ok(lua)
}

fn sandbox_globals(lua: &Lua) -> LuaResult<()> {
    let globals = lua.globals();
    for name in ["os", "io", "loadfile", "dofile", "debug"] {
        globals.set(name, LuaValue::Nil)?;
    }
    Ok(())
}

fn register_ipc_api(lua: &Lua, outbound: flume::Sender<Bytes>) -> LuaResult<()> {
    lua.set_named_registry_value(DATA_HANDLERS, lua.create_table()?)?;
    let ipc = lua.create_table()?;

    // IPC.write(bytes)
    ipc.set(
        "write",
        lua.create_function(move |_lua, data: LuaString| {
            outbound
                .send(Bytes::copy_from_slice(&data.as_bytes()))
                .map_err(|_| LuaError::RuntimeError("host end of the channel is gone".to_string()))
        })?,
    )?;

    // IPC.on('data', fn)
    ipc.set(
        "on",
        lua.create_function(|lua, (event, handler): (String, LuaFunction)| {
            if event != "data" {
                return Err(LuaError::RuntimeError(format!(
                    "unsupported IPC event {event:?}"
                )));
            }
            let handlers: LuaTable = lua.named_registry_value(DATA_HANDLERS)?;
            handlers.push(handler)
        })?,
    )?;

    lua.globals().set("IPC", ipc)?;
    Ok(())
}

fn register_log_api(lua: &Lua, entry_point: &str) -> LuaResult<()> {
    let log = lua.create_table()?;

    let n = entry_point.to_string();
    log.set(
        "info",
        lua.create_function(move |_lua, msg: String| {
            tracing::info!(target: "worklet", entry_point = %n, "{msg}");
            Ok(())
        })?,
    )?;

    let n = entry_point.to_string();
    log.set(
        "warn",
        lua.create_function(move |_lua, msg: String| {
            tracing::warn!(target: "worklet", entry_point = %n, "{msg}");
            Ok(())
        })?,
    )?;

    let n = entry_point.to_string();
    log.set(
        "error",
        lua.create_function(move |_lua, msg: String| {
            tracing::error!(target: "worklet", entry_point = %n, "{msg}");
            Ok(())
        })?,
    )?;

    let n = entry_point.to_string();
    log.set(
        "debug",
        lua.create_function(move |_lua, msg: String| {
            tracing::debug!(target: "worklet", entry_point = %n, "{msg}");
            Ok(())
        })?,
    )?;

    lua.globals().set("log", log)?;
    Ok(())
}

/// Hand queued messages to the script's data handlers, oldest first.
///
/// Messages stay queued until the script has registered at least one handler.
fn deliver(lua: &Lua, pending: &mut VecDeque<Bytes>) -> LuaResult<()> {
    let handlers: LuaTable = lua.named_registry_value(DATA_HANDLERS)?;
    while handlers.raw_len() > 0 {
        let Some(bytes) = pending.pop_front() else {
            break;
        };
        let message = lua.create_string(&bytes)?;
        for handler in handlers.sequence_values::<LuaFunction>() {
            handler?.call::<()>(message.clone())?;
        }
    }
    Ok(())
}
