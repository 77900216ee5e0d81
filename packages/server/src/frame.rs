use crate::sink::RenderedChunk;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

/// Content type of the streamed response
pub const CONTENT_TYPE: &str = "text/x-component";

/// One record on the wire: a serialized tree chunk and the full source that
/// produced it. Frames are independent; the client never merges them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundFrame {
    pub rsc: String,
    pub jsx: String,
}

impl OutboundFrame {
    pub fn to_bytes(&self) -> Result<Bytes, serde_json::Error> {
        serde_json::to_vec(self).map(Bytes::from)
    }
}

impl From<RenderedChunk> for OutboundFrame {
    fn from(chunk: RenderedChunk) -> Self {
        Self {
            rsc: chunk.rsc,
            jsx: chunk.source,
        }
    }
}

/// JSON-encode every rendered chunk as one frame, preserving order
pub fn encode_frames<S>(chunks: S) -> impl Stream<Item = Result<Bytes, serde_json::Error>>
where
    S: Stream<Item = RenderedChunk>,
{
    chunks.map(|chunk| OutboundFrame::from(chunk).to_bytes())
}

/// Split a response body of back-to-back JSON frames
pub fn decode_frames(body: &[u8]) -> Result<Vec<OutboundFrame>, serde_json::Error> {
    serde_json::Deserializer::from_slice(body)
        .into_iter::<OutboundFrame>()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frames_pair_chunk_with_source() {
        let chunks = futures::stream::iter(vec![
            RenderedChunk {
                rsc: "0:\"a\"\n".into(),
                source: "'a'".into(),
            },
            RenderedChunk {
                rsc: "1:\"ab\"\n".into(),
                source: "'ab'".into(),
            },
        ]);

        let encoded: Vec<Bytes> = encode_frames(chunks)
            .map(|frame| frame.unwrap())
            .collect()
            .await;

        assert_eq!(encoded[0], Bytes::from_static(br#"{"rsc":"0:\"a\"\n","jsx":"'a'"}"#));

        let body: Vec<u8> = encoded.concat();
        let frames = decode_frames(&body).unwrap();
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].jsx, "'ab'");
    }
}
