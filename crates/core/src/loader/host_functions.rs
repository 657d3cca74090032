// crates/core/src/loader/host_functions.rs

//! `host` imports available to agent modules.
//!
//! Strings cross the boundary as (ptr, len) pairs in the guest's exported
//! `memory`. Calls that produce output take an (out_ptr, out_cap) buffer and
//! return the number of bytes written, or a negative code:
//!
//! | code | meaning                                   |
//! |------|-------------------------------------------|
//! | -1   | module exports no `memory`                |
//! | -2   | pointer/length outside guest memory       |
//! | -3   | input is not valid UTF-8 / JSON           |
//! | -4   | capability call failed (see run report)   |
//! | -5   | output does not fit in the buffer         |
//! | -6   | no result (no completion, no such message)|

use serde::Deserialize;
use tokio::runtime::Handle;
use wasmtime::{Caller, Extern, Linker, Memory};
use wasmtime_wasi::preview1::WasiP1Ctx;

use crate::environment::Environment;
use crate::error::ShimError;
use crate::types::{ChatMessage, SortOrder};

/// Import module name of the functions below.
pub const HOST_MODULE: &str = "host";
/// Import module name of the WASI preview1 functions.
pub const WASI_MODULE: &str = "wasi_snapshot_preview1";

pub const ERR_NO_MEMORY: i32 = -1;
pub const ERR_BOUNDS: i32 = -2;
pub const ERR_INVALID_INPUT: i32 = -3;
pub const ERR_CAPABILITY: i32 = -4;
pub const ERR_BUFFER_TOO_SMALL: i32 = -5;
pub const ERR_NO_RESULT: i32 = -6;

/// Store data for one agent run.
pub struct AgentState {
    pub(crate) wasi: WasiP1Ctx,
    env: Environment,
    runtime: Handle,
    capability_errors: Vec<String>,
}

impl AgentState {
    pub fn new(wasi: WasiP1Ctx, env: Environment, runtime: Handle) -> Self {
        Self {
            wasi,
            env,
            runtime,
            capability_errors: Vec::new(),
        }
    }

    pub(crate) fn into_capability_errors(self) -> Vec<String> {
        self.capability_errors
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum GuestCompletionRequest {
    Bare(Vec<ChatMessage>),
    Full {
        messages: Vec<ChatMessage>,
        #[serde(default)]
        model: Option<String>,
    },
}

impl GuestCompletionRequest {
    fn into_parts(self) -> (Vec<ChatMessage>, Option<String>) {
        match self {
            GuestCompletionRequest::Bare(messages) => (messages, None),
            GuestCompletionRequest::Full { messages, model } => (messages, model),
        }
    }
}

pub fn add_host_functions(linker: &mut Linker<AgentState>) -> anyhow::Result<()> {
    // host::read_file(name_ptr, name_len, out_ptr, out_cap) -> i32
    // A file missing from the thread reads as empty (returns 0).
    linker.func_wrap(
        HOST_MODULE,
        "read_file",
        |mut caller: Caller<'_, AgentState>,
         name_ptr: i32,
         name_len: i32,
         out_ptr: i32,
         out_cap: i32|
         -> i32 {
            let name = match read_guest_string(&mut caller, name_ptr, name_len) {
                Ok(s) => s,
                Err(code) => return code,
            };
            let (env, runtime) = bridge(&caller);
            match runtime.block_on(env.read_file(&name)) {
                Ok(content) => write_guest_bytes(&mut caller, out_ptr, out_cap, content.as_bytes()),
                Err(e) => capability_failed(&mut caller, "read_file", e),
            }
        },
    )?;

    // host::completion(req_ptr, req_len, out_ptr, out_cap) -> i32
    // The request is `{"messages": [...], "model": "..."}` or a bare message array.
    linker.func_wrap(
        HOST_MODULE,
        "completion",
        |mut caller: Caller<'_, AgentState>,
         req_ptr: i32,
         req_len: i32,
         out_ptr: i32,
         out_cap: i32|
         -> i32 {
            let raw = match read_guest_string(&mut caller, req_ptr, req_len) {
                Ok(s) => s,
                Err(code) => return code,
            };
            let (messages, model) = match serde_json::from_str::<GuestCompletionRequest>(&raw) {
                Ok(request) => request.into_parts(),
                Err(_) => return ERR_INVALID_INPUT,
            };
            let (env, runtime) = bridge(&caller);
            match runtime.block_on(env.completion(&messages, model.as_deref())) {
                Ok(Some(text)) => write_guest_bytes(&mut caller, out_ptr, out_cap, text.as_bytes()),
                Ok(None) => ERR_NO_RESULT,
                Err(e) => capability_failed(&mut caller, "completion", e),
            }
        },
    )?;

    // host::add_reply(msg_ptr, msg_len) -> i32
    // Returns 0 once the reply is appended to the thread.
    linker.func_wrap(
        HOST_MODULE,
        "add_reply",
        |mut caller: Caller<'_, AgentState>, msg_ptr: i32, msg_len: i32| -> i32 {
            let message = match read_guest_string(&mut caller, msg_ptr, msg_len) {
                Ok(s) => s,
                Err(code) => return code,
            };
            let (env, runtime) = bridge(&caller);
            match runtime.block_on(env.add_reply(&message, None)) {
                Ok(_) => 0,
                Err(e) => capability_failed(&mut caller, "add_reply", e),
            }
        },
    )?;

    // host::list_messages(out_ptr, out_cap) -> i32
    // Writes the thread's messages, oldest first, as a JSON array.
    linker.func_wrap(
        HOST_MODULE,
        "list_messages",
        |mut caller: Caller<'_, AgentState>, out_ptr: i32, out_cap: i32| -> i32 {
            let (env, runtime) = bridge(&caller);
            let messages =
                match runtime.block_on(env.list_messages(None, None, SortOrder::Ascending)) {
                    Ok(messages) => messages,
                    Err(e) => return capability_failed(&mut caller, "list_messages", e),
                };
            match serde_json::to_vec(&messages) {
                Ok(json) => write_guest_bytes(&mut caller, out_ptr, out_cap, &json),
                Err(e) => capability_failed(
                    &mut caller,
                    "list_messages",
                    ShimError::MalformedResponse(e.to_string()),
                ),
            }
        },
    )?;

    // host::get_last_message(role_ptr, role_len, out_ptr, out_cap) -> i32
    // Writes the content of the newest message with that role.
    linker.func_wrap(
        HOST_MODULE,
        "get_last_message",
        |mut caller: Caller<'_, AgentState>,
         role_ptr: i32,
         role_len: i32,
         out_ptr: i32,
         out_cap: i32|
         -> i32 {
            let role = match read_guest_string(&mut caller, role_ptr, role_len) {
                Ok(s) => s,
                Err(code) => return code,
            };
            let (env, runtime) = bridge(&caller);
            match runtime.block_on(env.get_last_message(&role)) {
                Ok(Some(message)) => {
                    write_guest_bytes(&mut caller, out_ptr, out_cap, message.content.as_bytes())
                }
                Ok(None) => ERR_NO_RESULT,
                Err(e) => capability_failed(&mut caller, "get_last_message", e),
            }
        },
    )?;

    // host::log(ptr, len)
    linker.func_wrap(
        HOST_MODULE,
        "log",
        |mut caller: Caller<'_, AgentState>, ptr: i32, len: i32| {
            match read_guest_string(&mut caller, ptr, len) {
                Ok(text) => tracing::info!(target: "agent", "{text}"),
                Err(code) => tracing::debug!(code, "agent log call with unreadable message"),
            }
        },
    )?;

    // host::current_time_millis() -> i64
    linker.func_wrap(HOST_MODULE, "current_time_millis", || -> i64 {
        chrono::Utc::now().timestamp_millis()
    })?;

    // host::current_time_secs() -> i64
    linker.func_wrap(HOST_MODULE, "current_time_secs", || -> i64 {
        chrono::Utc::now().timestamp()
    })?;

    Ok(())
}

fn bridge(caller: &Caller<'_, AgentState>) -> (Environment, Handle) {
    let state = caller.data();
    (state.env.clone(), state.runtime.clone())
}

fn capability_failed(caller: &mut Caller<'_, AgentState>, operation: &str, error: ShimError) -> i32 {
    tracing::warn!(operation, %error, "agent capability call failed");
    caller
        .data_mut()
        .capability_errors
        .push(format!("{operation}: {error}"));
    ERR_CAPABILITY
}

fn guest_memory(caller: &mut Caller<'_, AgentState>) -> Option<Memory> {
    match caller.get_export("memory") {
        Some(Extern::Memory(memory)) => Some(memory),
        _ => None,
    }
}

/// Byte range `[ptr, ptr + len)` if it lies within `size`.
fn guest_range(ptr: i32, len: i32, size: usize) -> Option<std::ops::Range<usize>> {
    let start = usize::try_from(ptr).ok()?;
    let len = usize::try_from(len).ok()?;
    let end = start.checked_add(len)?;
    (end <= size).then_some(start..end)
}

fn read_guest_string(caller: &mut Caller<'_, AgentState>, ptr: i32, len: i32) -> Result<String, i32> {
    let memory = guest_memory(caller).ok_or(ERR_NO_MEMORY)?;
    let data = memory.data(&*caller);
    let range = guest_range(ptr, len, data.len()).ok_or(ERR_BOUNDS)?;
    String::from_utf8(data[range].to_vec()).map_err(|_| ERR_INVALID_INPUT)
}

fn write_guest_bytes(caller: &mut Caller<'_, AgentState>, ptr: i32, cap: i32, bytes: &[u8]) -> i32 {
    let Some(memory) = guest_memory(caller) else {
        return ERR_NO_MEMORY;
    };
    let Ok(written) = i32::try_from(bytes.len()) else {
        return ERR_BUFFER_TOO_SMALL;
    };
    if written > cap {
        return ERR_BUFFER_TOO_SMALL;
    }
    let data = memory.data_mut(&mut *caller);
    let Some(range) = guest_range(ptr, written, data.len()) else {
        return ERR_BOUNDS;
    };
    data[range].copy_from_slice(bytes);
    written
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guest_range_bounds() {
        assert_eq!(guest_range(0, 4, 4), Some(0..4));
        assert_eq!(guest_range(2, 0, 4), Some(2..2));
        assert_eq!(guest_range(2, 3, 4), None);
        assert_eq!(guest_range(-1, 1, 4), None);
        assert_eq!(guest_range(0, -1, 4), None);
    }

    #[test]
    fn completion_request_shapes() {
        let bare: GuestCompletionRequest =
            serde_json::from_str(r#"[{"role":"user","content":"hi"}]"#).unwrap();
        let (messages, model) = bare.into_parts();
        assert_eq!(messages.len(), 1);
        assert!(model.is_none());

        let full: GuestCompletionRequest = serde_json::from_str(
            r#"{"messages":[{"role":"system","content":"be brief"}],"model":"small"}"#,
        )
        .unwrap();
        let (messages, model) = full.into_parts();
        assert_eq!(messages[0].role, "system");
        assert_eq!(model.as_deref(), Some("small"));
    }
}
