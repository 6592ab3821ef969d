//! 流多路复用
//! Stream multiplexer

use super::StreamItem;
use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use mentat_kernel::agent::context::AgentContext;
use mentat_kernel::agent::error::AgentResult;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

/// 多路复用器
/// Broadcast one producer to several consumers.
///
/// Each consumer owns a bounded buffer. Every chunk is delivered to every
/// live consumer before the next one is read, so a full buffer holds the
/// whole broadcast back and the producer is paced by the slowest consumer.
/// Dropped consumers are skipped from then on.
pub struct Multiplexer<T> {
    source: BoxStream<'static, T>,
    consumers: Vec<mpsc::Sender<T>>,
}

impl<T> Multiplexer<T>
where
    T: StreamItem + Clone + Send + 'static,
{
    pub fn new<S>(source: S) -> Self
    where
        S: Stream<Item = T> + Send + 'static,
    {
        Self {
            source: source.boxed(),
            consumers: Vec::new(),
        }
    }

    /// 添加消费者
    /// Register a consumer with its own buffer; a zero buffer counts as one.
    pub fn add_consumer(&mut self, buffer: usize) -> ReceiverStream<T> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.consumers.push(tx);
        ReceiverStream::new(rx)
    }

    pub fn consumer_count(&self) -> usize {
        self.consumers.len()
    }

    /// 运行广播
    /// Pump chunks until the source ends, a terminal chunk passes, or every
    /// consumer is gone. Returns how many chunks were read from the source.
    ///
    /// Consumers are closed on return, including on cancellation.
    pub async fn run(self, ctx: &AgentContext) -> AgentResult<usize> {
        let Self {
            mut source,
            mut consumers,
        } = self;
        let mut forwarded = 0;
        loop {
            let Some(chunk) = ctx.guard(async { Ok(source.next().await) }).await? else {
                break;
            };
            forwarded += 1;
            let done = chunk.is_done();

            let mut live = Vec::with_capacity(consumers.len());
            for consumer in consumers {
                // the send future owns its copy so `T` need not be `Sync`
                let copy = chunk.clone();
                let delivered = ctx
                    .guard(async { Ok(consumer.send(copy).await.is_ok()) })
                    .await?;
                if delivered {
                    live.push(consumer);
                } else {
                    tracing::debug!("multiplexer consumer dropped");
                }
            }
            consumers = live;

            if consumers.is_empty() {
                tracing::debug!(forwarded, "all multiplexer consumers gone");
                break;
            }
            if done {
                break;
            }
        }
        Ok(forwarded)
    }

    /// Run on a background task.
    pub fn spawn(self, ctx: AgentContext) -> JoinHandle<AgentResult<usize>> {
        tokio::spawn(async move { self.run(&ctx).await })
    }
}
