//! SSE decoding into frames.

use duckling_core::frame::Frame;
use eventsource_stream::Eventsource;
use futures::{Stream, StreamExt};

use crate::reconciler::ReconcileError;

/// Decode an SSE byte stream into one [`Frame`] per event.
///
/// Chunks may split lines or UTF-8 sequences anywhere. Events without data,
/// such as keep-alive comments, are skipped; `event:` names are ignored since
/// each frame carries its kind.
pub fn decode_frames<S, B, E>(bytes: S) -> impl Stream<Item = Result<Frame, ReconcileError>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    bytes.eventsource().filter_map(|event| async move {
        match event {
            Err(e) => Some(Err(ReconcileError::Stream(e.to_string()))),
            Ok(event) if event.data.trim().is_empty() => None,
            Ok(event) => Some(
                serde_json::from_str(&event.data)
                    .map_err(|e| ReconcileError::MalformedFrame(e.to_string())),
            ),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use duckling_core::frame::FrameEvent;
    use std::convert::Infallible;

    const DELTA: &str = r#"{"seq":2,"messageId":"msg_1","partId":"txt_a","partSeq":1,"event":{"kind":"text-delta","delta":"Hi"}}"#;

    async fn decode(chunks: Vec<Vec<u8>>) -> Vec<Result<Frame, ReconcileError>> {
        let bytes = futures::stream::iter(chunks.into_iter().map(Ok::<_, Infallible>));
        decode_frames(bytes).collect().await
    }

    #[tokio::test]
    async fn decodes_split_events_and_skips_comments() {
        let raw = format!("event: text-delta\ndata: {DELTA}\n\n: keep-alive\n\n");
        let (head, tail) = raw.as_bytes().split_at(30);

        let frames = decode(vec![head.to_vec(), tail.to_vec()]).await;
        assert_eq!(frames.len(), 1);
        let frame = frames[0].as_ref().unwrap();
        assert_eq!(frame.seq, 2);
        assert_eq!(frame.event, FrameEvent::TextDelta { delta: "Hi".into() });
    }

    #[tokio::test]
    async fn keeps_characters_split_across_chunks() {
        let raw = format!("data: {}\n\n", DELTA.replace("Hi", "naïve"));
        let split = raw.find('ï').unwrap() + 1;
        let (head, tail) = raw.as_bytes().split_at(split);

        let frames = decode(vec![head.to_vec(), tail.to_vec()]).await;
        assert_eq!(
            frames[0].as_ref().unwrap().event,
            FrameEvent::TextDelta {
                delta: "naïve".into()
            }
        );
    }

    #[tokio::test]
    async fn handles_crlf_line_endings() {
        let raw = format!("data: {DELTA}\r\n\r\ndata: {DELTA}\r\n\r\n");
        let frames = decode(vec![raw.into_bytes()]).await;
        assert_eq!(frames.len(), 2);
        assert!(frames.iter().all(Result::is_ok));
    }

    #[tokio::test]
    async fn malformed_data_is_an_error() {
        let frames = decode(vec![b"data: {not json}\n\n".to_vec()]).await;
        assert!(matches!(frames[0], Err(ReconcileError::MalformedFrame(_))));
    }
}
