use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;

use anyhost_exec::{InterruptHandler, TerminationSignal};

async fn wait_for(counter: &AtomicUsize, expected: usize) {
    for _ in 0..100 {
        if counter.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

// Signals are process-wide, so the whole lifecycle lives in one test
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_interrupt_handler_lifecycle() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);

    let mut handler = InterruptHandler::install(move || {
        let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
        if n == 2 {
            Err("cleanup went wrong")
        } else {
            Ok(())
        }
    })
    .unwrap();

    // one signal, one cleanup, process keeps running
    kill(Pid::this(), Signal::SIGHUP).unwrap();
    wait_for(&calls, 1).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(handler.try_next_failure().is_none());

    // cleanup errors are reported, not dropped
    kill(Pid::this(), Signal::SIGTERM).unwrap();
    let failure = tokio::time::timeout(Duration::from_secs(2), handler.next_failure())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failure.signal, TerminationSignal::Terminate);
    assert_eq!(failure.error, "cleanup went wrong");
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // handler keeps listening after a failure
    kill(Pid::this(), Signal::SIGINT).unwrap();
    wait_for(&calls, 3).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    // after stop no more cleanups run
    handler.stop().await;
    kill(Pid::this(), Signal::SIGHUP).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}
