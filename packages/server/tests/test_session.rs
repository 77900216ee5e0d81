use bytes::Bytes;
use futures::{stream, StreamExt};
use genui_evaluator::{ComponentReference, ReferenceCatalog};
use genui_server::{live_tree, OutboundFrame, Session, SessionSummary};
use std::sync::Arc;

async fn run_session(parts: &[&str], catalog: ReferenceCatalog) -> (SessionSummary, Vec<OutboundFrame>) {
    let (sink, frames) = live_tree(4);
    let input = stream::iter(
        parts
            .iter()
            .map(|part| Ok(Bytes::from(part.to_string())))
            .collect::<Vec<_>>(),
    );

    let handle = tokio::spawn(Session::new(Arc::new(catalog)).run(input, sink));
    let frames: Vec<OutboundFrame> = frames.map(OutboundFrame::from).collect().await;
    let summary = handle.await.unwrap();
    (summary, frames)
}

#[tokio::test]
async fn test_single_fragment_renders_one_frame() {
    let (summary, frames) = run_session(&["<div>hello</div>"], ReferenceCatalog::with_defaults()).await;

    assert_eq!(summary.updates, 1);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].rsc, "0:[\"$\",\"div\",null,{\"children\":\"hello\"}]\n");
    assert_eq!(frames[0].jsx, "<div>hello</div>");
}

#[tokio::test]
async fn test_split_element_renders_once_complete() {
    let (summary, frames) = run_session(&["<div>", "hello</div>"], ReferenceCatalog::with_defaults()).await;

    assert_eq!(summary.fragments, 2);
    assert_eq!(summary.syntax_failures, 1);
    assert_eq!(summary.updates, 1);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].rsc, "0:[\"$\",\"div\",null,{\"children\":\"hello\"}]\n");
    assert_eq!(frames[0].jsx, "<div>hello</div>");
}

#[tokio::test]
async fn test_client_reference_gets_import_row() {
    let (_, frames) = run_session(&["<Counter />"], ReferenceCatalog::with_defaults()).await;

    assert_eq!(frames.len(), 1);
    let rows: Vec<&str> = frames[0].rsc.lines().collect();
    assert_eq!(rows[0], r#"1:I{"id":"/g/test.js","chunks":[],"name":"Counter","async":true}"#);
    assert_eq!(rows[1], r#"0:["$","$L1",null,{}]"#);
}

#[tokio::test]
async fn test_import_row_not_repeated_in_later_frames() {
    let (_, frames) = run_session(
        &["<div><Counter />", "</div>", " "],
        ReferenceCatalog::with_defaults(),
    )
    .await;

    assert_eq!(frames.len(), 2);
    assert!(frames[0].rsc.contains(":I{"));
    assert!(!frames[1].rsc.contains(":I{"));
    assert!(frames[0].rsc.contains("\"children\":\"$L2\""));
    assert_eq!(
        frames[1].rsc,
        "2:[\"$\",\"div\",null,{\"children\":[\"$\",\"$L1\",null,{}]}]\n"
    );
}

#[tokio::test]
async fn test_frames_follow_fragment_order() {
    let (summary, frames) = run_session(&["1", "2", "3"], ReferenceCatalog::new()).await;

    assert_eq!(summary.updates, 3);
    let jsx: Vec<&str> = frames.iter().map(|frame| frame.jsx.as_str()).collect();
    let rsc: Vec<&str> = frames.iter().map(|frame| frame.rsc.as_str()).collect();
    assert_eq!(jsx, vec!["1", "12", "123"]);
    assert_eq!(
        rsc,
        vec![
            "0:[\"$\",\"$Sreact.suspense\",null,{\"children\":\"$L1\",\"fallback\":1}]\n",
            "1:[\"$\",\"$Sreact.suspense\",null,{\"children\":\"$L2\",\"fallback\":12}]\n",
            "2:123\n",
        ]
    );
}

#[tokio::test]
async fn test_incomplete_prefixes_are_skipped() {
    let (summary, frames) = run_session(
        &["<div class", "Name=\"a\">he", "llo</d", "iv>"],
        ReferenceCatalog::new(),
    )
    .await;

    assert_eq!(summary.fragments, 4);
    assert_eq!(summary.syntax_failures, 3);
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].jsx, "<div className=\"a\">hello</div>");
}

#[tokio::test]
async fn test_evaluation_failure_recovers_on_more_input() {
    let (summary, frames) = run_session(&["tru", "e ? <p>ok</p> : null"], ReferenceCatalog::new()).await;

    assert_eq!(summary.evaluation_failures, 1);
    assert_eq!(summary.updates, 1);
    assert_eq!(frames[0].jsx, "true ? <p>ok</p> : null");
    assert_eq!(frames[0].rsc, "0:[\"$\",\"p\",null,{\"children\":\"ok\"}]\n");
}

#[tokio::test]
async fn test_never_renderable_generation_finishes_cleanly() {
    let (summary, frames) = run_session(&["<div>", "{missing()}", "</div>"], ReferenceCatalog::new()).await;

    assert!(frames.is_empty());
    assert_eq!(summary.updates, 0);
    assert_eq!(summary.evaluation_failures, 1);
}

#[tokio::test]
async fn test_jsx_channel_carries_raw_source() {
    let (_, frames) = run_session(&["```jsx\n<div>", "hi</div>\n```"], ReferenceCatalog::new()).await;

    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].jsx, "```jsx\n<div>hi</div>\n```");
    assert_eq!(frames[0].rsc, "0:[\"$\",\"div\",null,{\"children\":\"hi\"}]\n");
}

#[tokio::test]
async fn test_configured_catalog_is_used() {
    let catalog = ReferenceCatalog::new().with_reference(ComponentReference::new(
        "__client.Chart",
        "Chart",
        "/g/chart.js",
    ));
    let (_, frames) = run_session(&["<Chart />"], catalog.clone()).await;
    assert!(frames[0].rsc.starts_with(r#"1:I{"id":"/g/chart.js","chunks":[],"name":"Chart","async":true}"#));

    let (summary, frames) = run_session(&["<Counter />"], catalog).await;
    assert!(frames.is_empty());
    assert_eq!(summary.evaluation_failures, 1);
}

#[tokio::test]
async fn test_disconnect_stops_session() {
    let (sink, frames) = live_tree(1);
    drop(frames);

    let input = stream::iter(vec![
        Ok(Bytes::from_static(b"<b>x</b>")),
        Ok(Bytes::from_static(b" ")),
        Ok(Bytes::from_static(b" ")),
    ]);
    let summary = Session::new(Arc::new(ReferenceCatalog::new())).run(input, sink).await;

    assert_eq!(summary.fragments, 0);
    assert_eq!(summary.updates, 0);
}

#[tokio::test]
async fn test_disconnect_stops_unrenderable_session() {
    let (sink, frames) = live_tree(1);
    drop(frames);

    // Nothing here ever renders, so no update can notice the disconnect
    let mut parts = vec![Ok(Bytes::from_static(b"<div>"))];
    parts.extend((0..10_000).map(|_| Ok(Bytes::from_static(b"{missing"))));
    let summary = Session::new(Arc::new(ReferenceCatalog::new()))
        .run(stream::iter(parts), sink)
        .await;

    assert_eq!(summary.fragments, 0);
    assert_eq!(summary.syntax_failures + summary.evaluation_failures, 0);
}

#[tokio::test]
async fn test_disconnect_mid_generation() {
    let (sink, mut frames) = live_tree(4);
    let (tx, rx) = tokio::sync::mpsc::channel(4);
    let input = tokio_stream::wrappers::ReceiverStream::new(rx);
    let handle = tokio::spawn(Session::new(Arc::new(ReferenceCatalog::new())).run(input, sink));

    tx.send(Ok(Bytes::from_static(b"<p>a</p>"))).await.unwrap();
    tx.send(Ok(Bytes::from_static(b" "))).await.unwrap();
    let first = frames.next().await.map(OutboundFrame::from).unwrap();
    assert_eq!(first.jsx, "<p>a</p>");
    drop(frames);

    let summary = handle.await.unwrap();
    assert_eq!(summary.updates, 2);
    assert!(tx.send(Ok(Bytes::from_static(b"<p>"))).await.is_err());
}
