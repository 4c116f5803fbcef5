//! Handler trait - key ごとに直列化されたリクエストを処理する capability
//!
//! # ポイント
//! - 関連型 (Value / Output / Error) で入出力の型を固定する
//! - `Send + Sync + 'static` を要求（全 shard worker から `Arc` で共有される）
//! - `FnHandler` で同期クロージャを Handler に変換（PhantomData パターン）

use std::marker::PhantomData;

use async_trait::async_trait;

/// Computes a result for one `(key, value)` request.
///
/// One handler instance is shared by every shard worker, so `handle` may run
/// concurrently for keys that live on different shards. Calls for the same
/// key never overlap. A panic inside `handle` is contained by the worker and
/// re-raised in the submitting caller.
///
/// # Example
/// ```ignore
/// struct Upper;
///
/// #[async_trait]
/// impl Handler for Upper {
///     type Value = String;
///     type Output = String;
///     type Error = std::convert::Infallible;
///
///     async fn handle(&self, _key: &[u8], value: String) -> Result<String, Self::Error> {
///         Ok(value.to_uppercase())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    type Value: Send + 'static;
    type Output: Send + 'static;
    type Error: Send + 'static;

    async fn handle(&self, key: &[u8], value: Self::Value) -> Result<Self::Output, Self::Error>;
}

/// Adapter turning a synchronous closure into a [`Handler`].
///
/// The closure runs on a runtime thread, so it blocks its shard (and that
/// thread) for its whole duration.
pub struct FnHandler<F, V, O, E> {
    f: F,
    _marker: PhantomData<fn(V) -> Result<O, E>>,
}

impl<F, V, O, E> FnHandler<F, V, O, E>
where
    F: Fn(&[u8], V) -> Result<O, E>,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<F, V, O, E> Handler for FnHandler<F, V, O, E>
where
    F: Fn(&[u8], V) -> Result<O, E> + Send + Sync + 'static,
    V: Send + 'static,
    O: Send + 'static,
    E: Send + 'static,
{
    type Value = V;
    type Output = O;
    type Error = E;

    async fn handle(&self, key: &[u8], value: V) -> Result<O, E> {
        (self.f)(key, value)
    }
}

/// Shorthand for [`FnHandler::new`].
pub fn handler_fn<F, V, O, E>(f: F) -> FnHandler<F, V, O, E>
where
    F: Fn(&[u8], V) -> Result<O, E>,
{
    FnHandler::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fn_handler_passes_key_and_value() {
        let handler = handler_fn(|key: &[u8], n: u32| -> Result<String, ()> {
            Ok(format!("{}:{n}", String::from_utf8_lossy(key)))
        });
        let out = handler.handle(b"user-1", 7).await.unwrap();
        assert_eq!(out, "user-1:7");
    }

    #[tokio::test]
    async fn fn_handler_returns_error_verbatim() {
        let handler = handler_fn(|_key: &[u8], _v: ()| -> Result<(), &'static str> {
            Err("unknown value type")
        });
        assert_eq!(handler.handle(b"k", ()).await, Err("unknown value type"));
    }
}
