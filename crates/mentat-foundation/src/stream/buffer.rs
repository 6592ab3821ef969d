//! 缓冲汇聚通道
//! Buffered fan-in channel

use super::StreamConfig;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::AgentResult;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// 汇聚通道
/// Bounded channel merging any number of producers into one stream.
///
/// Producers wait once `capacity` items are queued. The merged stream ends
/// when every producer is gone, and yields a single timeout error if the
/// overall deadline passes first.
pub struct FanIn<T> {
    tx: mpsc::Sender<T>,
    rx: mpsc::Receiver<T>,
    timeout: Duration,
}

impl<T: Send + 'static> FanIn<T> {
    pub fn new(config: &StreamConfig) -> AgentResult<Self> {
        config.validate()?;
        let (tx, rx) = mpsc::channel(config.capacity);
        Ok(Self {
            tx,
            rx,
            timeout: config.timeout(),
        })
    }

    /// Producer handle; clone freely.
    pub fn sender(&self) -> mpsc::Sender<T> {
        self.tx.clone()
    }

    /// Forward a whole stream into the channel on its own task.
    pub fn attach<S>(&self, source: S) -> JoinHandle<()>
    where
        S: Stream<Item = T> + Send + 'static,
    {
        let tx = self.tx.clone();
        tokio::spawn(async move {
            let mut source = Box::pin(source);
            while let Some(item) = source.next().await {
                if tx.send(item).await.is_err() {
                    tracing::debug!("fan-in receiver dropped, producer stopping");
                    break;
                }
            }
        })
    }

    /// Merged stream, bounded by the overall timeout and by `ctx`.
    pub fn into_stream(self, ctx: &AgentContext) -> BoxStream<'static, AgentResult<T>> {
        let Self { tx, rx, timeout } = self;
        drop(tx);
        let deadline_ctx = ctx.child().with_timeout(timeout);
        futures::stream::unfold(Some((rx, deadline_ctx)), |state| async move {
            let (mut rx, ctx) = state?;
            match ctx.guard(async { Ok(rx.recv().await) }).await {
                Ok(Some(item)) => Some((Ok(item), Some((rx, ctx)))),
                Ok(None) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "fan-in stream stopped");
                    Some((Err(e), None))
                }
            }
        })
        .boxed()
    }
}
