//! Concurrency tests for the queue service
//!
//! Many threads share one service; these check the races that matter:
//! receipt checks, checkouts and queue lifecycle.

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Duration;
use queuestack_queue::{QueueError, QueueService, SharedKey};

const THREADS: usize = 16;

fn service() -> QueueService {
    QueueService::new("devstoreaccount1", SharedKey::generate())
}

/// Run `f` on THREADS threads released together, collecting the results
fn race<T, F>(f: F) -> Vec<T>
where
    T: Send + 'static,
    F: Fn(usize) -> T + Send + Sync + 'static,
{
    let barrier = Arc::new(Barrier::new(THREADS));
    let f = Arc::new(f);

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let barrier = Arc::clone(&barrier);
            let f = Arc::clone(&f);
            thread::spawn(move || {
                barrier.wait();
                f(i)
            })
        })
        .collect();

    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_one_deleter_wins_a_receipt() {
    let s = service();
    s.create_queue("race", None, false).unwrap();
    s.put_message("race", "message1", None, None).unwrap();
    let message = s.get_messages("race", None, None).unwrap().next().unwrap();
    let receipt = message.pop_receipt.unwrap();

    let shared = s.clone();
    let results = race(move |_| shared.delete_message("race", &message.id, &receipt));

    let wins = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(wins, 1);
    assert!(results
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, QueueError::InvalidReceipt { .. })));
}

#[test]
fn test_one_updater_wins_a_receipt() {
    let s = service();
    s.create_queue("race", None, false).unwrap();
    s.put_message("race", "message1", None, None).unwrap();
    let message = s.get_messages("race", None, None).unwrap().next().unwrap();
    let receipt = message.pop_receipt.unwrap();

    let shared = s.clone();
    let results = race(move |i| {
        shared.update_message(
            "race",
            &message.id,
            &receipt,
            Duration::seconds(30),
            Some(format!("update{}", i).into()),
        )
    });

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
}

#[test]
fn test_each_message_checked_out_once() {
    let s = service();
    s.create_queue("work", None, false).unwrap();
    for i in 0..(THREADS * 4) {
        s.put_message("work", format!("job{}", i), None, None).unwrap();
    }

    let shared = s.clone();
    let results = race(move |_| {
        shared
            .get_messages("work", Some(4), Some(Duration::seconds(60)))
            .unwrap()
            .map(|m| m.id)
            .collect::<Vec<_>>()
    });

    let mut ids: Vec<_> = results.into_iter().flatten().collect();
    let total = ids.len();
    ids.sort();
    ids.dedup();
    assert_eq!(ids.len(), total);
    assert_eq!(total, THREADS * 4);
}

#[test]
fn test_one_creator_wins_a_name() {
    let s = service();

    let shared = s.clone();
    let results = race(move |_| shared.create_queue("contended", None, false).unwrap());

    assert_eq!(results.iter().filter(|created| **created).count(), 1);
    assert!(s.exists("contended").unwrap());
}

#[test]
fn test_puts_racing_a_delete() {
    let s = service();
    s.create_queue("doomed", None, false).unwrap();

    let shared = s.clone();
    let results = race(move |i| {
        if i == 0 {
            shared.delete_queue("doomed", true).map(|_| ())
        } else {
            shared.put_message("doomed", "late", None, None).map(|_| ())
        }
    });

    assert!(results[0].is_ok());
    assert!(results[1..]
        .iter()
        .filter_map(|r| r.as_ref().err())
        .all(|e| matches!(e, QueueError::QueueNotFound(_))));
    assert!(!s.exists("doomed").unwrap());
    assert_eq!(s.resident_messages(), 0);
}
