// Copyright 2025 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end behavior of submit/execute/complete: terminal-state
//! uniqueness, callback ordering, cancellation, bounded concurrency,
//! timeouts and shutdown.

use async_operation_dispatcher::dispatcher::{Dispatcher, DispatcherConfig};
use async_operation_dispatcher::error::{OperationError, SubmitError};
use async_operation_dispatcher::handle::{CompletionHandler, OperationStatus};
use async_operation_dispatcher::worker_pool::ShutdownMode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::oneshot;

fn dispatcher_with(workers: usize) -> Dispatcher {
    Dispatcher::new(DispatcherConfig {
        workers,
        queue_capacity: 256,
        affinity_ttl: Duration::from_secs(30),
    })
}

#[tokio::test]
async fn outcome_is_stable_across_repeated_waits() {
    let dispatcher = dispatcher_with(2);
    let handle = dispatcher
        .submit("GetThing", None, 5u64, |n| async move {
            Ok::<_, OperationError>(n + 1)
        })
        .unwrap();

    let first = handle.wait().await;
    let second = handle.wait().await;
    let third = handle.wait().await;
    assert_eq!(first, Ok(6));
    assert_eq!(second, first);
    assert_eq!(third, first);
    assert_eq!(handle.poll(), OperationStatus::Completed(6));
}

#[tokio::test]
async fn success_callback_runs_exactly_once_and_before_wait_returns() {
    let dispatcher = dispatcher_with(2);
    let successes = Arc::new(AtomicUsize::new(0));
    let failures = Arc::new(AtomicUsize::new(0));

    let s = Arc::clone(&successes);
    let f = Arc::clone(&failures);
    let handle = dispatcher
        .submit_with_handler(
            "GetThing",
            None,
            (),
            |_| async { Ok::<_, OperationError>("value".to_string()) },
            CompletionHandler::new(
                move |resp: &String| {
                    assert_eq!(resp, "value");
                    s.fetch_add(1, Ordering::SeqCst);
                },
                move |_err| {
                    f.fetch_add(1, Ordering::SeqCst);
                },
            ),
        )
        .unwrap();

    assert_eq!(handle.wait().await, Ok("value".to_string()));
    // Callback invocation is sequenced before waiters are woken.
    assert_eq!(successes.load(Ordering::SeqCst), 1);
    assert_eq!(failures.load(Ordering::SeqCst), 0);

    handle.wait().await.unwrap();
    assert_eq!(successes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn transport_failure_reaches_handle_and_callback_with_same_tag() {
    let dispatcher = dispatcher_with(2);
    let (tag_tx, tag_rx) = std::sync::mpsc::channel::<&'static str>();

    let handle = dispatcher
        .submit_with_handler(
            "GetThing",
            None,
            (),
            |_| async {
                Err::<String, _>(OperationError::transport("connection reset"))
            },
            CompletionHandler::new(
                |_resp| panic!("success branch must not run"),
                move |err| {
                    let _ = tag_tx.send(err.tag());
                },
            ),
        )
        .unwrap();

    match handle.wait().await {
        Err(OperationError::Transport { message }) => assert_eq!(message, "connection reset"),
        other => panic!("expected transport failure, got {:?}", other.map(|_| ())),
    }
    assert_eq!(tag_rx.try_recv(), Ok("transport"));
}

#[tokio::test]
async fn service_fault_passes_code_and_message_verbatim() {
    let dispatcher = dispatcher_with(1);
    let handle = dispatcher
        .submit("PutThing", None, (), |_| async {
            Err::<(), _>(OperationError::service_fault(
                "ThrottlingException",
                "rate exceeded",
            ))
        })
        .unwrap();

    assert_eq!(
        handle.wait().await,
        Err(OperationError::ServiceFault {
            code: "ThrottlingException".to_string(),
            message: "rate exceeded".to_string(),
        })
    );
}

#[tokio::test]
async fn cancellation_before_dequeue_skips_the_unit() {
    let dispatcher = dispatcher_with(1);

    // Occupy the only worker so the victim stays queued.
    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    let blocker = dispatcher
        .submit("Blocker", None, (), move |_| async move {
            let _ = gate_rx.await;
            Ok::<_, OperationError>(())
        })
        .unwrap();

    let ran = Arc::new(AtomicBool::new(false));
    let ran_flag = Arc::clone(&ran);
    let victim = dispatcher
        .submit("Victim", None, (), move |_| async move {
            ran_flag.store(true, Ordering::SeqCst);
            Ok::<_, OperationError>(())
        })
        .unwrap();

    assert!(victim.request_cancellation());
    gate_tx.send(()).unwrap();

    assert_eq!(blocker.wait().await, Ok(()));
    assert_eq!(victim.wait().await, Err(OperationError::Cancelled));
    assert!(!ran.load(Ordering::SeqCst), "cancelled unit must never run");
    assert!(!victim.request_cancellation(), "already terminal");
}

#[tokio::test]
async fn cancellation_after_start_is_a_no_op() {
    let dispatcher = dispatcher_with(1);
    let (started_tx, started_rx) = oneshot::channel::<()>();
    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    let effect = Arc::new(AtomicBool::new(false));

    let effect_flag = Arc::clone(&effect);
    let handle = dispatcher
        .submit("SlowOp", None, (), move |_| async move {
            let _ = started_tx.send(());
            let _ = gate_rx.await;
            effect_flag.store(true, Ordering::SeqCst);
            Ok::<_, OperationError>("done".to_string())
        })
        .unwrap();

    started_rx.await.unwrap();
    // Requested too late to stop the unit, but not yet terminal.
    assert!(handle.request_cancellation());
    gate_tx.send(()).unwrap();

    assert_eq!(handle.wait().await, Ok("done".to_string()));
    assert!(effect.load(Ordering::SeqCst), "unit side effects must occur");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pool_of_four_never_runs_more_than_four_units_at_once() {
    let dispatcher = dispatcher_with(4);
    let inflight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for i in 0..100u64 {
        let inflight = Arc::clone(&inflight);
        let peak = Arc::clone(&peak);
        let handle = dispatcher
            .submit("CountedOp", None, i, move |i| async move {
                let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(3)).await;
                inflight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, OperationError>(i)
            })
            .unwrap();
        handles.push(handle);
    }

    let mut completed = 0;
    for (i, handle) in handles.iter().enumerate() {
        assert_eq!(handle.wait().await, Ok(i as u64));
        completed += 1;
    }
    assert_eq!(completed, 100);
    assert!(
        peak.load(Ordering::SeqCst) <= 4,
        "in-flight peak {} exceeded pool size",
        peak.load(Ordering::SeqCst)
    );
}

#[tokio::test]
async fn wait_timeout_expires_then_full_wait_succeeds() {
    let dispatcher = dispatcher_with(1);
    let handle = dispatcher
        .submit("SlowOp", None, (), |_| async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, OperationError>("ok".to_string())
        })
        .unwrap();

    assert!(
        handle
            .wait_timeout(Duration::from_millis(10))
            .await
            .is_none()
    );
    let status = handle.poll();
    assert!(!status.is_terminal());
    assert_eq!(status, OperationStatus::Pending);

    assert_eq!(handle.wait().await, Ok("ok".to_string()));
    assert!(handle.poll().is_terminal());
}

#[tokio::test]
async fn units_sharing_a_routing_key_run_in_submission_order() {
    let dispatcher = dispatcher_with(4);
    let order = Arc::new(std::sync::Mutex::new(Vec::new()));

    let mut handles = Vec::new();
    for i in 0..20u32 {
        let order = Arc::clone(&order);
        let handle = dispatcher
            .submit("UpdateThing", Some("resource-7"), i, move |i| async move {
                if let Ok(mut seen) = order.lock() {
                    seen.push(i);
                }
                Ok::<_, OperationError>(i)
            })
            .unwrap();
        handles.push(handle);
    }
    for handle in &handles {
        handle.wait().await.unwrap();
    }

    let seen = order.lock().unwrap().clone();
    assert_eq!(seen, (0..20).collect::<Vec<_>>());
}

#[tokio::test]
async fn forced_shutdown_cancels_queued_units_and_rejects_new_work() {
    let dispatcher = dispatcher_with(1);

    // Hold the worker on a gate that is never released.
    let (_gate_tx, gate_rx) = oneshot::channel::<()>();
    let blocker = dispatcher
        .submit("Blocker", None, (), move |_| async move {
            let _ = gate_rx.await;
            Ok::<_, OperationError>(())
        })
        .unwrap();

    let mut queued = Vec::new();
    for _ in 0..3 {
        let handle = dispatcher
            .submit("Queued", None, (), |_| async {
                Ok::<_, OperationError>(())
            })
            .unwrap();
        queued.push(handle);
    }

    dispatcher.shutdown(ShutdownMode::Forced).await;

    assert_eq!(blocker.wait().await, Err(OperationError::Cancelled));
    for handle in queued {
        assert_eq!(handle.wait().await, Err(OperationError::Cancelled));
    }

    let rejected = dispatcher.submit("Late", None, (), |_| async {
        Ok::<_, OperationError>(())
    });
    assert!(matches!(rejected, Err(SubmitError::ShutDown)));
}

#[tokio::test]
async fn graceful_shutdown_finishes_queued_units() {
    let dispatcher = dispatcher_with(2);
    let done = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
        let done = Arc::clone(&done);
        let handle = dispatcher
            .submit("Work", None, (), move |_| async move {
                tokio::time::sleep(Duration::from_millis(2)).await;
                done.fetch_add(1, Ordering::SeqCst);
                Ok::<_, OperationError>(())
            })
            .unwrap();
        handles.push(handle);
    }

    dispatcher.shutdown(ShutdownMode::Graceful).await;
    assert_eq!(done.load(Ordering::SeqCst), 10);
    for handle in handles {
        assert_eq!(handle.wait().await, Ok(()));
    }
}

#[tokio::test]
async fn saturated_queue_fails_fast() {
    let dispatcher = Dispatcher::new(DispatcherConfig {
        workers: 1,
        queue_capacity: 1,
        affinity_ttl: Duration::from_secs(30),
    });

    // One unit holds the worker; the queue then fits exactly one more.
    let (gate_tx, gate_rx) = oneshot::channel::<()>();
    let blocker = dispatcher
        .submit("Blocker", None, (), move |_| async move {
            let _ = gate_rx.await;
            Ok::<_, OperationError>(())
        })
        .unwrap();
    // Let the worker dequeue the blocker before filling the queue.
    tokio::time::sleep(Duration::from_millis(10)).await;

    let queued = dispatcher
        .submit("Queued", None, (), |_| async { Ok::<_, OperationError>(()) })
        .unwrap();
    let overflow = dispatcher.submit("Overflow", None, (), |_| async {
        Ok::<_, OperationError>(())
    });
    assert!(matches!(overflow, Err(SubmitError::Saturated)));

    gate_tx.send(()).unwrap();
    assert_eq!(blocker.wait().await, Ok(()));
    assert_eq!(queued.wait().await, Ok(()));
}
