//! Scheduler behaviour through the public API.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pixelheal::tasking::{QueueKind, Scheduler, SchedulerConfig, Task};
use pixelheal::util::Error;

#[test]
fn test_sync_drain_counts_follow_up_tasks() {
    let scheduler = Scheduler::new(SchedulerConfig::sync()).unwrap();
    let count = Arc::new(AtomicUsize::new(0));

    for i in 0..3 {
        let count = Arc::clone(&count);
        let s = Arc::clone(&scheduler);
        scheduler
            .background()
            .submit(format!("task {i}"), move || {
                count.fetch_add(1, Ordering::SeqCst);
                if i == 1 {
                    let count = Arc::clone(&count);
                    s.background().submit("follow-up", move || {
                        count.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })?;
                }
                Ok(())
            })
            .unwrap();
    }

    assert_eq!(scheduler.background().execute_all_pending_sync().unwrap(), 4);
    assert_eq!(count.load(Ordering::SeqCst), 4);
}

#[test]
fn test_affine_queue_rejects_other_threads() {
    let scheduler = Scheduler::new(SchedulerConfig::sync()).unwrap();
    scheduler.push(Task::engine("mutate", || Ok(()))).unwrap();

    let s = Arc::clone(&scheduler);
    let result = std::thread::spawn(move || s.engine().execute_all_pending_sync().map(|_| ()))
        .join()
        .unwrap();
    assert!(matches!(result, Err(Error::WrongThread(QueueKind::Engine))));
    assert_eq!(scheduler.engine().len(), 1);

    assert!(matches!(
        scheduler.ui().execute_all_pending_async(),
        Err(Error::WrongThread(QueueKind::Ui))
    ));
}

#[test]
fn test_async_wait_reports_completions() {
    let scheduler = Scheduler::new(SchedulerConfig::asynchronous(2)).unwrap();
    for i in 0..2 {
        scheduler
            .background()
            .submit(format!("sleep {i}"), || {
                std::thread::sleep(Duration::from_millis(10));
                Ok(())
            })
            .unwrap();
    }
    assert_eq!(scheduler.background().execute_all_pending_async().unwrap(), 2);

    let mut completed = 0;
    while completed < 2 {
        let n = scheduler.background().wait(Duration::from_secs(5));
        assert!(n > 0, "wait timed out");
        completed += n;
    }
    assert_eq!(scheduler.background().outstanding(), 0);
}

#[test]
fn test_panicking_task_does_not_break_drain() {
    let scheduler = Scheduler::new(SchedulerConfig::asynchronous(1)).unwrap();
    scheduler.background().submit("boom", || panic!("corrupt file")).unwrap();
    scheduler.ui().submit("fine", || Ok(())).unwrap();

    let stats = scheduler.drain().unwrap();
    assert_eq!(stats.failures, 1);
    assert_eq!(scheduler.pending(), 0);
}
