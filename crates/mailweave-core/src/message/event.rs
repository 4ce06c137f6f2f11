//! Events travelling on an emitter/receiver queue.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Args;
use crate::domain::{CallId, RemoteError};

/// What a synchronous call produced: the handler's value or its error.
pub type Reply = Result<Value, RemoteError>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Event {
    /// Invoke the handler registered under `name`. `reply_to` is set for
    /// synchronous calls only.
    Call {
        name: String,
        #[serde(default)]
        args: Args,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reply_to: Option<CallId>,
    },
    /// The dispatch loop must exit.
    StopServing,
    /// Outcome of the synchronous call `call`.
    Reply { call: CallId, reply: Reply },
}

impl Event {
    pub fn call(name: &str, args: Args) -> Self {
        Event::Call {
            name: name.to_string(),
            args,
            reply_to: None,
        }
    }

    pub fn call_sync(name: &str, args: Args, id: CallId) -> Self {
        Event::Call {
            name: name.to_string(),
            args,
            reply_to: Some(id),
        }
    }
}
