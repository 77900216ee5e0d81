use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Incremental byte source of one generation
pub type FragmentStream = BoxStream<'static, Result<Bytes, GeneratorError>>;

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("upstream generator failed: {0}")]
    Upstream(String),
}

/// Produces the markup for a prompt, fragment by fragment
pub trait Generator: Send + Sync {
    fn generate(&self, prompt: &str) -> FragmentStream;
}

/// Markup streamed by [`SimulatedGenerator::demo`]
pub const DEMO_SOURCE: &str = r#"<div className="min-h-screen bg-red-500 text-white">
  <div className="w-full max-w-2xl mx-auto py-10 flex flex-col gap-4">
    <h1 className="font-medium text-2xl">Truly Generative UI</h1>
    <p>No framework, standalone React Server Components stream-rendering UI as the LLM generates it 🤌</p>
    <div className="rounded-md bg-blue-700 w-full h-32 flex justify-center items-center">later</div>
    <Counter />
    <div className="rounded-md bg-green-700 w-full h-32 flex justify-center items-center">done</div>
  </div>
</div>"#;

/// Replays a fixed document in equal slices with a delay before each one.
/// Stands in for a model while the real generator is out of the loop.
#[derive(Debug, Clone)]
pub struct SimulatedGenerator {
    source: String,
    chunks: usize,
    delay: Duration,
}

impl SimulatedGenerator {
    pub fn new(source: impl Into<String>, chunks: usize, delay: Duration) -> Self {
        Self {
            source: source.into(),
            chunks: chunks.max(1),
            delay,
        }
    }

    pub fn demo(chunks: usize, delay: Duration) -> Self {
        Self::new(DEMO_SOURCE, chunks, delay)
    }

    /// Slice the source into `chunks` pieces of equal character count; the
    /// last piece takes the remainder.
    pub fn split(&self) -> Vec<String> {
        let boundaries: Vec<usize> = self
            .source
            .char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(self.source.len()))
            .collect();
        let char_count = boundaries.len() - 1;
        let per_chunk = char_count / self.chunks;

        (0..self.chunks)
            .map(|i| {
                let start = boundaries[i * per_chunk];
                let end = if i == self.chunks - 1 {
                    self.source.len()
                } else {
                    boundaries[(i + 1) * per_chunk]
                };
                self.source[start..end].to_string()
            })
            .filter(|chunk| !chunk.is_empty())
            .collect()
    }
}

impl Generator for SimulatedGenerator {
    fn generate(&self, prompt: &str) -> FragmentStream {
        debug!(prompt_len = prompt.len(), chunks = self.chunks, "Simulating generation");
        let delay = self.delay;

        stream::iter(self.split())
            .then(move |chunk| async move {
                tokio::time::sleep(delay).await;
                Ok(Bytes::from(chunk))
            })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_covers_source() {
        let generator = SimulatedGenerator::demo(5, Duration::ZERO);
        let chunks = generator.split();

        assert_eq!(chunks.len(), 5);
        assert_eq!(chunks.concat(), DEMO_SOURCE);
    }

    #[test]
    fn test_last_chunk_takes_remainder() {
        let generator = SimulatedGenerator::new("abcdefg", 3, Duration::ZERO);
        assert_eq!(generator.split(), vec!["ab", "cd", "efg"]);
    }

    #[test]
    fn test_more_chunks_than_characters() {
        let generator = SimulatedGenerator::new("ab", 5, Duration::ZERO);
        assert_eq!(generator.split().concat(), "ab");
    }

    #[tokio::test]
    async fn test_generate_streams_all_fragments() {
        let generator = SimulatedGenerator::new("<p>🤌</p>", 4, Duration::ZERO);
        let fragments: Vec<Bytes> = generator
            .generate("anything")
            .map(|fragment| fragment.unwrap())
            .collect()
            .await;

        assert_eq!(fragments.concat(), "<p>🤌</p>".as_bytes());
    }
}
