//! keymux-core
//!
//! Key-sharded dispatcher: requests with the same key run one at a time in
//! submission order, requests with different keys run concurrently.
//!
//! # モジュール構成
//! - **dispatcher**: start / submit / stop（shard の管理とルーティング）
//! - **worker**: shard worker のループと状態
//! - **envelope**: Request / Response / reply slot
//! - **shard_queue**: shard ごとの bounded FIFO（backpressure）
//! - **routing**: key → shard index（CRC-32）
//! - **handler**: Handler trait と closure adapter
//! - **config**: DispatcherConfig（環境変数からの読み込み）
//! - **error**: DispatchError / StartError / ConfigError
//! - **observability**: カウンタとスナップショット

pub mod config;
pub mod dispatcher;
pub mod envelope;
pub mod error;
pub mod handler;
pub mod observability;
pub mod routing;
pub mod shard_queue;
pub mod worker;

pub use config::DispatcherConfig;
pub use dispatcher::Dispatcher;
pub use envelope::{HandlerCrash, RequestId, Response};
pub use error::{ConfigError, DispatchError, StartError};
pub use handler::{FnHandler, Handler, handler_fn};
pub use observability::DispatchCounts;
pub use worker::WorkerState;
