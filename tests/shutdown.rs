mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use common::*;
use stonenet::{AppError, Engine, Stats, WireMode};
use tokio::time;

#[tokio::test]
async fn test_global_shutdown_closes_everything() {
    let (handler, mut events) = RecordingHandler::new(true, false);
    let (engine, listener) =
        start_listener(test_config(30, 0), WireMode::Framed, handler.clone(), None).await;

    let mut clients = Vec::new();
    for _ in 0..4 {
        clients.push(connect(&listener).await);
        expect_new(&mut events).await;
    }
    assert_eq!(engine.stats().connection_count, 5);

    time::timeout(WAIT, engine.stop())
        .await
        .expect("engine stop hung");

    assert_eq!(
        engine.stats(),
        Stats {
            task_count: 0,
            connection_count: 0
        }
    );
    assert_eq!(handler.closed_count(), 5);
    assert!(listener.is_stopped());
    for client in clients.iter_mut() {
        assert!(read_to_close(client).await.is_empty());
    }
}

#[tokio::test]
async fn test_stop_twice_returns_immediately() {
    let (handler, _events) = RecordingHandler::new(true, false);
    let (engine, _listener) =
        start_listener(test_config(30, 0), WireMode::Line, handler, None).await;

    engine.stop().await;
    time::timeout(WAIT, engine.stop())
        .await
        .expect("second stop must not wait");
    assert!(engine.is_stopped());
}

#[tokio::test]
async fn test_cancellable_tasks_released_on_stop() {
    stonenet::setup_local_tracing().unwrap();
    let engine = Engine::new(test_config(30, 0));
    let released = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        let released = released.clone();
        assert!(engine.spawn_with_cancel(move |token| async move {
            token.cancelled().await;
            released.fetch_add(1, Ordering::SeqCst);
        }));
    }
    let plain = Arc::new(AtomicUsize::new(0));
    let counter = plain.clone();
    engine.spawn(async move {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    time::timeout(WAIT, engine.stop())
        .await
        .expect("cancellable tasks did not exit");
    assert_eq!(released.load(Ordering::SeqCst), 3);
    assert_eq!(plain.load(Ordering::SeqCst), 1);
    assert!(!engine.spawn_with_cancel(|_token| async {}));
}

#[tokio::test]
async fn test_listen_refused_after_stop() {
    stonenet::setup_local_tracing().unwrap();
    let engine = Engine::new(test_config(30, 0));
    engine.stop().await;

    let (handler, _events) = RecordingHandler::new(true, false);
    let result = engine
        .listen("127.0.0.1:0", WireMode::Framed, handler, None)
        .await;
    assert!(matches!(result, Err(AppError::ShuttingDown)));
}

#[tokio::test]
async fn test_shutdown_drains_queued_messages() {
    let (handler, mut events) = RecordingHandler::new(true, false);
    let (engine, listener) =
        start_listener(test_config(30, 0), WireMode::Line, handler, None).await;

    let mut client = connect(&listener).await;
    let conn = expect_new(&mut events).await;
    for i in 0..10 {
        assert!(conn.send_line(&format!("bye {}", i)).await);
    }
    engine.stop().await;

    let expected: String = (0..10).map(|i| format!("bye {}\n", i)).collect();
    assert_eq!(read_to_close(&mut client).await, expected.into_bytes());
}
