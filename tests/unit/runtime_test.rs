//! Tests for the async reply adapter

use std::time::Duration;

use prometheus_sequence_manager::runtime::SchedulerThread;
use prometheus_sequence_manager::util::TaskType;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_post_task_and_reply_with_result() {
    let thread = SchedulerThread::spawn("reply-test", TaskType::Default).expect("spawned");
    let runner = thread.default_task_runner();

    let reply = runner
        .post_task_and_reply_with_result(|| 6 * 7)
        .expect("posted");
    let value = tokio::time::timeout(Duration::from_secs(5), reply)
        .await
        .expect("reply in time")
        .expect("task produced a value");
    assert_eq!(value, 42);

    thread.stop().expect("stopped");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reply_fails_when_task_panics() {
    let thread = SchedulerThread::spawn("reply-panic", TaskType::Default).expect("spawned");
    let runner = thread.default_task_runner();

    let reply = runner
        .post_task_and_reply_with_result(|| -> u32 { panic!("task failed") })
        .expect("posted");
    let outcome = tokio::time::timeout(Duration::from_secs(5), reply)
        .await
        .expect("reply in time");
    assert!(outcome.is_err());

    // The scheduler keeps running after a task panics.
    let reply = runner.post_task_and_reply_with_result(|| "alive").unwrap();
    assert_eq!(reply.await.unwrap(), "alive");
}
