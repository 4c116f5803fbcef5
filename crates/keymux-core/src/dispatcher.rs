//! Dispatcher - key で shard を選び、shard worker にリクエストを渡す
//!
//! # フロー
//! 1. `submit(key, value)` → `crc32(key) % workers` で shard を決定
//! 2. shard queue に non-blocking で push（満杯なら `BufferFull`）
//! 3. worker が FIFO で処理し、reply slot に Response を返す
//! 4. 呼び出し側は Response を待つ（crash なら panic として再送出）
//!
//! # 状態
//! - `Stopped`: queue も worker も存在しない
//! - `Running`: shard ごとに queue 1 本 + worker 1 本
//!
//! 状態は `RwLock` で守る。submit は read（並行可）、start / stop は write。

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::DispatcherConfig;
use crate::envelope::{PendingReplyFor, Request};
use crate::error::{ConfigError, DispatchError, StartError};
use crate::handler::Handler;
use crate::observability::{DispatchCounts, DispatchStats};
use crate::routing::ShardRouter;
use crate::shard_queue::PushError;
use crate::worker::{Shard, WorkerState, spawn_worker};

struct RunningShards<H: Handler> {
    router: ShardRouter,
    shards: Vec<Arc<Shard<H>>>,
    workers: Vec<JoinHandle<()>>,
}

impl<H: Handler> RunningShards<H> {
    fn shard_for(&self, key: &[u8]) -> &Arc<Shard<H>> {
        &self.shards[self.router.route(key)]
    }

    fn close_all(&self) {
        for shard in &self.shards {
            shard.queue().close();
        }
    }
}

enum DispatcherState<H: Handler> {
    Stopped,
    Running(RunningShards<H>),
}

/// Key-sharded dispatcher.
///
/// Requests with equal keys run one at a time in submission order; requests
/// whose keys land on different shards run concurrently.
///
/// # Example
/// ```ignore
/// let dispatcher = Dispatcher::spawn(Arc::new(MyHandler), DispatcherConfig::new(4, 16)).await;
/// let out = dispatcher.submit("user-1", request).await?;
/// dispatcher.stop().await;
/// ```
pub struct Dispatcher<H: Handler> {
    state: RwLock<DispatcherState<H>>,
    stats: Arc<DispatchStats>,
}

impl<H: Handler> Dispatcher<H> {
    /// A dispatcher in the stopped state.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(DispatcherState::Stopped),
            stats: Arc::new(DispatchStats::new()),
        }
    }

    /// Create and start in one step.
    ///
    /// # Panics
    /// On an invalid `config` (see [`Dispatcher::start`]).
    pub async fn spawn(handler: Arc<H>, config: DispatcherConfig) -> Self {
        let dispatcher = Self::new();
        dispatcher.start(handler, config).await;
        dispatcher
    }

    /// Spawn one worker per shard.
    ///
    /// # Panics
    /// If already running or if `config.workers == 0`: both are caller bugs,
    /// not runtime conditions. Use [`Dispatcher::try_start`] to get them as
    /// a value instead.
    pub async fn start(&self, handler: Arc<H>, config: DispatcherConfig) {
        if let Err(err) = self.try_start(handler, config).await {
            panic!("{err}");
        }
    }

    /// Like [`Dispatcher::start`], but reports misuse as `StartError`.
    ///
    /// Nothing is spawned when an error is returned.
    pub async fn try_start(
        &self,
        handler: Arc<H>,
        config: DispatcherConfig,
    ) -> Result<(), StartError> {
        let mut state = self.state.write().await;
        if matches!(*state, DispatcherState::Running(_)) {
            return Err(StartError::AlreadyStarted);
        }
        config.validate()?;
        let workers = NonZeroUsize::new(config.workers).ok_or(ConfigError::ZeroWorkers)?;

        let shards: Vec<Arc<Shard<H>>> = (0..workers.get())
            .map(|index| Arc::new(Shard::new(index, config.buffer_size)))
            .collect();
        let join_handles = shards
            .iter()
            .map(|shard| {
                spawn_worker(Arc::clone(shard), Arc::clone(&handler), Arc::clone(&self.stats))
            })
            .collect();

        *state = DispatcherState::Running(RunningShards {
            router: ShardRouter::new(workers),
            shards,
            workers: join_handles,
        });

        info!(
            workers = config.workers,
            buffer_size = config.buffer_size,
            "Dispatcher started"
        );
        Ok(())
    }

    /// Close every shard and wait until all accepted requests are answered
    /// and every worker has exited. A no-op when already stopped.
    pub async fn stop(&self) {
        // write lock を drain 完了まで保持する。並行する submit は解放後に Stopped を見る
        let mut state = self.state.write().await;
        let DispatcherState::Running(running) =
            std::mem::replace(&mut *state, DispatcherState::Stopped)
        else {
            debug!("Dispatcher already stopped");
            return;
        };

        running.close_all();
        for (shard, join) in running.workers.into_iter().enumerate() {
            if let Err(e) = join.await {
                error!(shard, error = %e, "Shard worker terminated abnormally");
            }
        }

        info!("Dispatcher stopped");
    }

    pub async fn is_running(&self) -> bool {
        matches!(*self.state.read().await, DispatcherState::Running(_))
    }

    /// Number of shards; 0 while stopped.
    pub async fn workers(&self) -> usize {
        match &*self.state.read().await {
            DispatcherState::Running(running) => running.router.shards(),
            DispatcherState::Stopped => 0,
        }
    }

    /// Shard a key would be routed to, or `None` while stopped.
    pub async fn shard_for(&self, key: impl AsRef<[u8]>) -> Option<usize> {
        match &*self.state.read().await {
            DispatcherState::Running(running) => Some(running.router.route(key.as_ref())),
            DispatcherState::Stopped => None,
        }
    }

    /// Pending (not yet picked up) requests per shard; empty while stopped.
    pub async fn queue_depths(&self) -> Vec<usize> {
        match &*self.state.read().await {
            DispatcherState::Running(running) => {
                running.shards.iter().map(|s| s.queue().len()).collect()
            }
            DispatcherState::Stopped => Vec::new(),
        }
    }

    /// Current state of each shard worker; empty while stopped.
    ///
    /// Only `Idle` and `Processing` show up here: workers drain and terminate
    /// while `stop` holds the state lock.
    pub async fn worker_states(&self) -> Vec<WorkerState> {
        match &*self.state.read().await {
            DispatcherState::Running(running) => running.shards.iter().map(|s| s.state()).collect(),
            DispatcherState::Stopped => Vec::new(),
        }
    }

    pub fn counts(&self) -> DispatchCounts {
        self.stats.snapshot()
    }

    /// Route `(key, value)` to its shard and wait for the handler's result.
    ///
    /// Fails fast with `Stopped` or `BufferFull` without invoking the
    /// handler. If the handler panics, the panic is resumed here with its
    /// original payload.
    pub async fn submit(
        &self,
        key: impl Into<Bytes>,
        value: H::Value,
    ) -> Result<H::Output, DispatchError<H::Error>> {
        let pending = {
            let state = self.state.read().await;
            self.enqueue(&state, key.into(), value)?
        };
        pending.wait().await?.into_result()
    }

    /// [`Dispatcher::submit`] with a deadline on the whole call.
    ///
    /// On expiry the request keeps running on its shard; its result is
    /// discarded.
    pub async fn submit_timeout(
        &self,
        key: impl Into<Bytes>,
        value: H::Value,
        timeout: Duration,
    ) -> Result<H::Output, DispatchError<H::Error>> {
        tokio::time::timeout(timeout, self.submit(key, value))
            .await
            .unwrap_or(Err(DispatchError::Timeout(timeout)))
    }

    /// Synchronous [`Dispatcher::submit`] for callers outside the runtime.
    ///
    /// # Panics
    /// When called from within an async execution context.
    pub fn blocking_submit(
        &self,
        key: impl Into<Bytes>,
        value: H::Value,
    ) -> Result<H::Output, DispatchError<H::Error>> {
        let pending = {
            let state = self.state.blocking_read();
            self.enqueue(&state, key.into(), value)?
        };
        pending.blocking_wait()?.into_result()
    }

    fn enqueue(
        &self,
        state: &DispatcherState<H>,
        key: Bytes,
        value: H::Value,
    ) -> Result<PendingReplyFor<H>, DispatchError<H::Error>> {
        let DispatcherState::Running(running) = state else {
            self.stats.record_rejected_stopped();
            return Err(DispatchError::Stopped);
        };

        let shard = running.shard_for(&key);
        let (request, pending) = Request::<H>::new(key, value);
        let request_id = request.id();

        match shard.queue().try_push(request) {
            Ok(()) => {
                self.stats.record_accepted();
                Ok(pending)
            }
            Err(PushError::Full(_)) => {
                self.stats.record_rejected_full();
                debug!(
                    request_id = %request_id,
                    capacity = shard.queue().capacity(),
                    "Shard buffer full; request rejected"
                );
                Err(DispatchError::BufferFull)
            }
            // Running の間は close されない。念のため Stopped 扱い
            Err(PushError::Closed(_)) => {
                self.stats.record_rejected_stopped();
                Err(DispatchError::Stopped)
            }
        }
    }
}

impl<H: Handler> Default for Dispatcher<H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Handler> Drop for Dispatcher<H> {
    fn drop(&mut self) {
        // stop() されずに drop された場合、worker が永遠に park しないよう close だけする
        if let DispatcherState::Running(running) = self.state.get_mut() {
            running.close_all();
        }
    }
}
