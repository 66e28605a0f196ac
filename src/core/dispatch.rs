//! Request/response shell around a scripting [`Handler`].
//!
//! One request in, one reply out. Nothing a request does (bad bytes, a failing
//! command, a panicking handler) gets past [`Dispatcher::handle`]; the client
//! sees `nil` and the worker keeps serving.

use std::panic::{self, AssertUnwindSafe};

use tracing::{debug, warn};

use crate::wire::{self, Tensor, Value, NIL};

/// Fixed reply to the handshake request, independent of any state.
pub const HANDSHAKE: &[u8] = b"connected";

pub const TAG_HANDSHAKE: u8 = b'a';
pub const TAG_EVALUATE: u8 = b'e';
pub const TAG_EXECUTE: u8 = b'x';

/// The command surface a dispatcher drives.
pub trait Handler {
    type Error: std::error::Error;

    /// Evaluate an expression and return its value.
    fn evaluate(&mut self, text: &str, tensors: Vec<Tensor>) -> Result<Value, Self::Error>;

    /// Run statements for their side effects.
    fn execute(&mut self, text: &str, tensors: Vec<Tensor>) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Send(Vec<u8>),
    /// The client asked the worker to stop.
    Shutdown,
}

pub struct Dispatcher<H> {
    handler: H,
    served: u64,
    failed: u64,
}

impl<H: Handler> Dispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            served: 0,
            failed: 0,
        }
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    /// Requests answered so far, and how many of those failed.
    pub fn counts(&self) -> (u64, u64) {
        (self.served, self.failed)
    }

    pub fn handle(&mut self, request: &[u8]) -> Reply {
        let Some((&tag, body)) = request.split_first() else {
            return Reply::Shutdown;
        };
        self.served += 1;

        if tag == TAG_HANDSHAKE {
            return Reply::Send(HANDSHAKE.to_vec());
        }

        let handler = &mut self.handler;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(handler, tag, body)));
        match outcome {
            Ok(Ok(bytes)) => Reply::Send(bytes),
            Ok(Err(reason)) => {
                self.failed += 1;
                warn!(tag = %char::from(tag), "request failed: {reason}");
                Reply::Send(NIL.to_vec())
            }
            Err(payload) => {
                self.failed += 1;
                let msg = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(tag = %char::from(tag), "handler panicked: {msg}");
                Reply::Send(NIL.to_vec())
            }
        }
    }
}

fn run<H: Handler>(handler: &mut H, tag: u8, body: &[u8]) -> Result<Vec<u8>, String> {
    match tag {
        TAG_EVALUATE => {
            let (text, tensors) = wire::decode_request(body).map_err(|e| e.to_string())?;
            debug!(tensors = tensors.len(), "evaluate: {text}");
            let value = handler
                .evaluate(&text, tensors)
                .map_err(|e| e.to_string())?;
            wire::encode(&value).map_err(|e| e.to_string())
        }
        TAG_EXECUTE => {
            let (text, tensors) = wire::decode_request(body).map_err(|e| e.to_string())?;
            debug!(tensors = tensors.len(), "execute: {text}");
            handler
                .execute(&text, tensors)
                .map_err(|e| e.to_string())?;
            Ok(NIL.to_vec())
        }
        other => Err(format!("unknown request tag 0x{other:02x}")),
    }
}
