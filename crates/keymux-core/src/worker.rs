use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, error, trace};

use crate::envelope::{Request, Response};
use crate::handler::Handler;
use crate::observability::DispatchStats;
use crate::shard_queue::ShardQueue;

/// Shard worker state.
///
/// State transitions:
/// - Idle -> Processing -> Idle (queue open)
/// - Idle/Processing -> Draining (queue closed)
/// - Draining -> Terminated (queue closed and empty)
///
/// A worker never leaves `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkerState {
    /// Parked on an empty, open queue.
    Idle,

    /// Running the handler for one request.
    Processing,

    /// Queue closed; finishing what was accepted before the close.
    /// Every worker passes through here on its way out, even with nothing left.
    Draining,

    /// Queue closed and drained; the task has exited.
    Terminated,
}

impl WorkerState {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkerState::Terminated)
    }

    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Idle => 0,
            WorkerState::Processing => 1,
            WorkerState::Draining => 2,
            WorkerState::Terminated => 3,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::Idle,
            1 => WorkerState::Processing,
            2 => WorkerState::Draining,
            _ => WorkerState::Terminated,
        }
    }
}

/// One queue plus the state of the single worker that consumes it.
pub(crate) struct Shard<H: Handler> {
    index: usize,
    queue: ShardQueue<Request<H>>,
    state: AtomicU8,
    #[cfg(test)]
    history: std::sync::Mutex<Vec<WorkerState>>,
}

impl<H: Handler> Shard<H> {
    pub(crate) fn new(index: usize, capacity: usize) -> Self {
        Self {
            index,
            queue: ShardQueue::new(capacity),
            state: AtomicU8::new(WorkerState::Idle.as_u8()),
            #[cfg(test)]
            history: std::sync::Mutex::new(vec![WorkerState::Idle]),
        }
    }

    pub(crate) fn queue(&self) -> &ShardQueue<Request<H>> {
        &self.queue
    }

    pub(crate) fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, next: WorkerState) {
        let prev = WorkerState::from_u8(self.state.swap(next.as_u8(), Ordering::AcqRel));
        if prev != next {
            trace!(shard = self.index, from = ?prev, to = ?next, "worker state changed");
            #[cfg(test)]
            self.history.lock().unwrap().push(next);
        }
    }

    #[cfg(test)]
    fn history(&self) -> Vec<WorkerState> {
        self.history.lock().unwrap().clone()
    }
}

/// Spawn the worker task for `shard`.
pub(crate) fn spawn_worker<H: Handler>(
    shard: Arc<Shard<H>>,
    handler: Arc<H>,
    stats: Arc<DispatchStats>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        worker_loop(&shard, &handler, &stats).await;
    })
}

async fn worker_loop<H: Handler>(shard: &Shard<H>, handler: &H, stats: &DispatchStats) {
    debug!(shard = shard.index, "shard worker started");

    // pop は close 済みかつ空になるまで None を返さない（= drain してから抜ける）。
    // close を見た後は必ず Draining を経由して Terminated になる
    loop {
        let next = shard.queue.pop().await;
        let closed = shard.queue.is_closed();
        if closed {
            shard.set_state(WorkerState::Draining);
        }
        let Some(request) = next else {
            break;
        };
        if !closed {
            shard.set_state(WorkerState::Processing);
        }

        process(shard.index, request, handler, stats).await;

        if !shard.queue.is_closed() {
            shard.set_state(WorkerState::Idle);
        }
    }

    shard.set_state(WorkerState::Terminated);
    debug!(shard = shard.index, "shard worker exiting");
}

async fn process<H: Handler>(
    shard: usize,
    request: Request<H>,
    handler: &H,
    stats: &DispatchStats,
) {
    let request_id = request.id();
    trace!(shard, request_id = %request_id, "processing request");

    // handler の panic は execute 内で捕捉済み。ここまで unwind してこない
    let (response, reply) = request.execute(handler, shard).await;

    match &response {
        Response::Completed(Ok(_)) => stats.record_completed(),
        Response::Completed(Err(_)) => stats.record_handler_error(),
        Response::Crashed(crash) => {
            stats.record_crash();
            error!(
                shard,
                request_id = %request_id,
                panic_message = crash.message().unwrap_or("<non-string payload>"),
                "Handler panicked; re-raising in caller"
            );
        }
    }

    if reply.deliver(response).is_err() {
        debug!(shard, request_id = %request_id, "caller stopped waiting; response discarded");
    }
}
