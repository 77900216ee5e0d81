use crate::renderer::FlightEncoder;
use futures::Stream;
use genui_evaluator::{ReferenceRegistry, Value};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// A new current tree, with the state it was produced from
#[derive(Debug, Clone)]
pub struct TreeUpdate {
    pub tree: Arc<Value>,
    /// Registry as of this update; the renderer reads new entries from it
    pub registry: ReferenceRegistry,
    /// Raw source accumulated when the update was applied
    pub source: String,
}

/// The draining side went away
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("live tree stream closed")]
pub struct SinkClosed;

/// One serialized update and the source it was produced from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedChunk {
    pub rsc: String,
    pub source: String,
}

/// Create a connected sink and renderer stream.
///
/// The channel is bounded, so `update` suspends while the stream's consumer
/// is behind.
pub fn live_tree(capacity: usize) -> (LiveTreeSink, TreeStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sink = LiveTreeSink {
        tx,
        current: None,
        updates: 0,
    };
    let stream = TreeStream {
        rx: ReceiverStream::new(rx),
        encoder: FlightEncoder::new(),
        pending: None,
    };
    (sink, stream)
}

/// Producer side: holds the current tree and forwards replacements in order.
#[derive(Debug)]
pub struct LiveTreeSink {
    tx: mpsc::Sender<TreeUpdate>,
    current: Option<Arc<Value>>,
    updates: usize,
}

impl LiveTreeSink {
    /// Replace the current tree and queue it for rendering
    pub async fn update(&mut self, update: TreeUpdate) -> Result<(), SinkClosed> {
        let tree = Arc::clone(&update.tree);
        self.tx.send(update).await.map_err(|_| SinkClosed)?;
        self.current = Some(tree);
        self.updates += 1;
        Ok(())
    }

    pub fn current(&self) -> Option<&Value> {
        self.current.as_deref()
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the stream side has been dropped
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    /// Mark the stream terminal. Queued updates are still rendered, then the
    /// stream ends.
    pub fn done(self) {
        debug!(updates = self.updates, "Live tree done");
    }
}

/// Renderer side: yields one rendered chunk per update, ending after `done`
/// or when the sink is dropped.
///
/// An update is rendered once the next one arrives or the sink finishes, so
/// the last update can close the row chain.
#[derive(Debug)]
pub struct TreeStream {
    rx: ReceiverStream<TreeUpdate>,
    encoder: FlightEncoder,
    pending: Option<TreeUpdate>,
}

impl Stream for TreeStream {
    type Item = RenderedChunk;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        loop {
            match ready!(Pin::new(&mut this.rx).poll_next(cx)) {
                Some(update) => {
                    if let Some(previous) = this.pending.replace(update) {
                        let rsc = this.encoder.render(&previous.tree, &previous.registry);
                        return Poll::Ready(Some(RenderedChunk {
                            rsc,
                            source: previous.source,
                        }));
                    }
                }
                None => {
                    return Poll::Ready(this.pending.take().map(|last| {
                        let rsc = this.encoder.finish(&last.tree, &last.registry);
                        RenderedChunk {
                            rsc,
                            source: last.source,
                        }
                    }));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use genui_evaluator::Element;

    fn update(text: &str) -> TreeUpdate {
        TreeUpdate {
            tree: Arc::new(Value::Element(Box::new(
                Element::intrinsic("p").with_child(Value::String(text.into())),
            ))),
            registry: ReferenceRegistry::new(),
            source: format!("<p>{}</p>", text),
        }
    }

    #[tokio::test]
    async fn test_updates_render_in_order_then_end() {
        let (mut sink, stream) = live_tree(4);

        sink.update(update("a")).await.unwrap();
        sink.update(update("b")).await.unwrap();
        assert!(matches!(sink.current(), Some(Value::Element(_))));
        sink.done();

        let chunks: Vec<RenderedChunk> = stream.collect().await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].source, "<p>a</p>");
        assert_eq!(
            chunks[0].rsc,
            "0:[\"$\",\"$Sreact.suspense\",null,{\"children\":\"$L1\",\"fallback\":[\"$\",\"p\",null,{\"children\":\"a\"}]}]\n"
        );
        assert_eq!(chunks[1].rsc, "1:[\"$\",\"p\",null,{\"children\":\"b\"}]\n");
    }

    #[tokio::test]
    async fn test_update_is_held_until_the_next_one() {
        let (mut sink, mut stream) = live_tree(4);

        sink.update(update("a")).await.unwrap();
        assert!(futures::poll!(stream.next()).is_pending());

        sink.update(update("b")).await.unwrap();
        let first = stream.next().await.unwrap();
        assert_eq!(first.source, "<p>a</p>");
        assert!(futures::poll!(stream.next()).is_pending());

        sink.done();
        let last = stream.next().await.unwrap();
        assert_eq!(last.source, "<p>b</p>");
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn test_current_shares_the_queued_tree() {
        let (mut sink, mut stream) = live_tree(4);
        let tree = update("a");
        let shared = Arc::clone(&tree.tree);

        sink.update(tree).await.unwrap();
        assert!(std::ptr::eq(sink.current().unwrap(), shared.as_ref()));
        sink.done();
        assert!(stream.next().await.is_some());
    }

    #[tokio::test]
    async fn test_closed_resolves_when_stream_dropped() {
        let (sink, stream) = live_tree(1);
        drop(stream);
        sink.closed().await;
        assert!(sink.is_closed());
    }

    #[tokio::test]
    async fn test_update_fails_after_stream_dropped() {
        let (mut sink, stream) = live_tree(1);
        drop(stream);

        assert!(sink.is_closed());
        assert_eq!(sink.update(update("x")).await, Err(SinkClosed));
        assert!(sink.current().is_none());
    }

    #[tokio::test]
    async fn test_dropping_sink_ends_stream() {
        let (sink, mut stream) = live_tree(1);
        drop(sink);
        assert!(stream.next().await.is_none());
    }
}
