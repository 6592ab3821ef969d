//! 流处理器
//! Callback driven stream consumption

use super::StreamItem;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::{AgentError, AgentResult};
use std::pin::pin;
use std::time::Duration;

/// 流处理器
/// Receives the chunks of one stream.
///
/// An error from `on_chunk` or `on_complete` stops processing; `on_error`
/// is told about it and cannot fail.
#[async_trait]
pub trait StreamHandler<T: Send + Sync>: Send + Sync {
    async fn on_chunk(&self, chunk: &T) -> AgentResult<()>;

    async fn on_complete(&self) -> AgentResult<()> {
        Ok(())
    }

    async fn on_error(&self, _error: &AgentError) {}
}

type ChunkFn<T> = Box<dyn Fn(&T) -> AgentResult<()> + Send + Sync>;
type CompleteFn = Box<dyn Fn() -> AgentResult<()> + Send + Sync>;
type ErrorFn = Box<dyn Fn(&AgentError) + Send + Sync>;

/// 闭包处理器
/// Handler assembled from closures; unset hooks do nothing.
pub struct FnStreamHandler<T> {
    on_chunk: Option<ChunkFn<T>>,
    on_complete: Option<CompleteFn>,
    on_error: Option<ErrorFn>,
}

impl<T> Default for FnStreamHandler<T> {
    fn default() -> Self {
        Self {
            on_chunk: None,
            on_complete: None,
            on_error: None,
        }
    }
}

impl<T> FnStreamHandler<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_chunk(mut self, f: impl Fn(&T) -> AgentResult<()> + Send + Sync + 'static) -> Self {
        self.on_chunk = Some(Box::new(f));
        self
    }

    pub fn on_complete(mut self, f: impl Fn() -> AgentResult<()> + Send + Sync + 'static) -> Self {
        self.on_complete = Some(Box::new(f));
        self
    }

    pub fn on_error(mut self, f: impl Fn(&AgentError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

#[async_trait]
impl<T: Send + Sync> StreamHandler<T> for FnStreamHandler<T> {
    async fn on_chunk(&self, chunk: &T) -> AgentResult<()> {
        match &self.on_chunk {
            Some(f) => f(chunk),
            None => Ok(()),
        }
    }

    async fn on_complete(&self) -> AgentResult<()> {
        match &self.on_complete {
            Some(f) => f(),
            None => Ok(()),
        }
    }

    async fn on_error(&self, error: &AgentError) {
        if let Some(f) = &self.on_error {
            f(error);
        }
    }
}

/// 处理流
/// Feed `stream` to `handler` until it ends or sends a terminal chunk.
///
/// Error chunks, handler errors, cancellation and the `timeout` deadline all
/// go to `on_error` and are returned. Returns the number of chunks handled.
pub async fn process_stream<S, H>(
    ctx: &AgentContext,
    stream: S,
    handler: &H,
    timeout: Duration,
) -> AgentResult<usize>
where
    S: Stream,
    S::Item: StreamItem + Send + Sync,
    H: StreamHandler<S::Item> + ?Sized,
{
    let ctx = ctx.child().with_timeout(timeout);
    let mut stream = pin!(stream);
    let mut handled = 0;
    let result = async {
        loop {
            let Some(chunk) = ctx.guard(async { Ok(stream.next().await) }).await? else {
                return handler.on_complete().await;
            };
            if let Some(error) = chunk.error() {
                return Err(error);
            }
            handler.on_chunk(&chunk).await?;
            handled += 1;
            if chunk.is_done() {
                return handler.on_complete().await;
            }
        }
    }
    .await;

    match result {
        Ok(()) => Ok(handled),
        Err(e) => {
            tracing::debug!(error = %e, handled, "stream processing stopped");
            handler.on_error(&e).await;
            Err(e)
        }
    }
}
