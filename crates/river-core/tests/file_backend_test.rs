//! Resumption across engine restarts on the file backend

mod common;

use common::{drain, scripted, test_config, texts};
use river_core::config::{RiverConfig, StoreConfig};
use river_core::{DeliveryEvent, EndFrame, ResumptionToken, StartRequest, StreamEngine};
use std::time::Duration;
use tempfile::TempDir;

fn file_config(dir: &TempDir) -> RiverConfig {
    let mut config = test_config();
    config.store = StoreConfig::file(dir.path())
        .with_poll_interval(Duration::from_millis(20))
        .with_read_batch_size(2);
    config
}

#[tokio::test]
async fn test_token_survives_engine_restart() {
    let dir = TempDir::new().unwrap();

    let first = StreamEngine::from_config(&file_config(&dir)).await.unwrap();
    let live = drain(
        first
            .start(StartRequest::new("letters", scripted(&["a", "b", "c"], Duration::ZERO)))
            .await
            .unwrap(),
    )
    .await;
    assert_eq!(texts(&live), vec!["a", "b", "c"]);
    let token = live
        .iter()
        .filter_map(|event| match event {
            DeliveryEvent::Chunk(chunk) => chunk.resumption_token.clone(),
            _ => None,
        })
        .next()
        .unwrap();
    assert!(first.shutdown(Duration::from_secs(1)).await);
    drop(first);

    let second = StreamEngine::from_config(&file_config(&dir)).await.unwrap();
    let resumed = drain(second.resume(&token.encode()).await.unwrap()).await;

    assert_eq!(texts(&resumed), vec!["b", "c"]);
    assert_eq!(resumed.last(), Some(&DeliveryEvent::End(EndFrame::completed())));
}

#[tokio::test]
async fn test_reader_in_another_engine_tails_by_polling() {
    let dir = TempDir::new().unwrap();
    let writer = StreamEngine::from_config(&file_config(&dir)).await.unwrap();
    let reader = StreamEngine::from_config(&file_config(&dir)).await.unwrap();

    let subscription = writer
        .start(StartRequest::new(
            "letters",
            scripted(&["a", "b", "c"], Duration::from_millis(40)),
        ))
        .await
        .unwrap();
    let token = ResumptionToken::new(subscription.session_id().clone(), 0);

    let tailed = drain(reader.resume(&token.encode()).await.unwrap()).await;
    assert_eq!(texts(&tailed), vec!["a", "b", "c"]);
    assert!(tailed.last().unwrap().is_terminal());

    drain(subscription).await;
}
