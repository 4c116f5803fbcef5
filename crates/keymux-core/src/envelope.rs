//! Request / Response envelope
//!
//! 呼び出し側 (`submit`) と shard worker の橋渡しをする。
//!
//! - `Request`: key, value, 一度だけ使える reply slot（oneshot sender）
//! - `Response`: `Completed(Result)` か `Crashed(HandlerCrash)` のどちらか
//! - 送信で sender を消費するので二重送信は型で起こり得ない

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;

use bytes::Bytes;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::error::DispatchError;
use crate::handler::Handler;

/// Correlates the log lines of one request across caller and worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RequestId(Ulid);

impl RequestId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req-{}", self.0)
    }
}

/// A panic captured inside the handler.
///
/// Keeps the original payload so that re-raising it in the caller reports
/// the same message as the handler's own panic.
pub struct HandlerCrash {
    shard: usize,
    payload: Box<dyn Any + Send + 'static>,
}

impl HandlerCrash {
    pub fn new(shard: usize, payload: Box<dyn Any + Send + 'static>) -> Self {
        Self { shard, payload }
    }

    /// Shard whose worker caught the panic.
    pub fn shard(&self) -> usize {
        self.shard
    }

    /// Panic message, when the payload is a `&str` or `String`.
    pub fn message(&self) -> Option<&str> {
        if let Some(s) = self.payload.downcast_ref::<&'static str>() {
            Some(s)
        } else {
            self.payload.downcast_ref::<String>().map(String::as_str)
        }
    }

    /// Continue the original panic in the current task.
    pub fn resume(self) -> ! {
        std::panic::resume_unwind(self.payload)
    }
}

impl fmt::Debug for HandlerCrash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCrash")
            .field("shard", &self.shard)
            .field("message", &self.message().unwrap_or("<non-string payload>"))
            .finish()
    }
}

/// Exactly one of these is produced per accepted request.
#[derive(Debug)]
pub enum Response<O, E> {
    /// The handler returned normally, successfully or not.
    Completed(Result<O, E>),
    /// The handler panicked.
    Crashed(HandlerCrash),
}

impl<O, E> Response<O, E> {
    pub fn is_crash(&self) -> bool {
        matches!(self, Response::Crashed(_))
    }

    /// Caller-side view: handler errors become `DispatchError::Handler`,
    /// a crash is re-raised as a panic with its original payload.
    pub fn into_result(self) -> Result<O, DispatchError<E>> {
        match self {
            Response::Completed(Ok(output)) => Ok(output),
            Response::Completed(Err(err)) => Err(DispatchError::Handler(err)),
            Response::Crashed(crash) => crash.resume(),
        }
    }
}

/// Sending half of a request's reply slot. Consumed by delivery.
pub struct ReplySlot<O, E> {
    tx: oneshot::Sender<Response<O, E>>,
}

impl<O, E> ReplySlot<O, E> {
    /// Deliver the response. Hands it back if the caller stopped waiting.
    pub fn deliver(self, response: Response<O, E>) -> Result<(), Response<O, E>> {
        self.tx.send(response)
    }
}

/// Receiving half, held by the submitting caller.
pub struct PendingReply<O, E> {
    rx: oneshot::Receiver<Response<O, E>>,
}

impl<O, E> PendingReply<O, E> {
    /// Wait for the worker's response.
    ///
    /// `Err(Abandoned)` when the worker dropped the request without replying.
    pub async fn wait(self) -> Result<Response<O, E>, DispatchError<E>> {
        self.rx.await.map_err(|_| DispatchError::Abandoned)
    }

    /// Blocking variant of [`PendingReply::wait`]. Panics inside an async context.
    pub fn blocking_wait(self) -> Result<Response<O, E>, DispatchError<E>> {
        self.rx.blocking_recv().map_err(|_| DispatchError::Abandoned)
    }
}

pub type ResponseFor<H> = Response<<H as Handler>::Output, <H as Handler>::Error>;
pub type PendingReplyFor<H> = PendingReply<<H as Handler>::Output, <H as Handler>::Error>;

/// One submitted `(key, value)` pair plus its reply slot.
pub struct Request<H: Handler> {
    id: RequestId,
    key: Bytes,
    value: H::Value,
    reply: ReplySlot<H::Output, H::Error>,
}

impl<H: Handler> Request<H> {
    pub fn new(key: Bytes, value: H::Value) -> (Self, PendingReplyFor<H>) {
        let (tx, rx) = oneshot::channel();
        let request = Self {
            id: RequestId::new(),
            key,
            value,
            reply: ReplySlot { tx },
        };
        (request, PendingReply { rx })
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Run the handler inside a panic guard.
    ///
    /// Returns the response together with the reply slot it must be
    /// delivered to; delivery is left to the worker so it can record the
    /// outcome first.
    pub(crate) async fn execute(
        self,
        handler: &H,
        shard: usize,
    ) -> (ResponseFor<H>, ReplySlot<H::Output, H::Error>) {
        let Request { key, value, reply, .. } = self;

        let response = match AssertUnwindSafe(handler.handle(&key, value)).catch_unwind().await {
            Ok(result) => Response::Completed(result),
            Err(payload) => Response::Crashed(HandlerCrash::new(shard, payload)),
        };
        (response, reply)
    }
}
