//! Kernel mutex under real multiprocessor contention
//!
//! Exercises the fast path, the sleeping slow path, handoff and
//! interruption together through the public API.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use mach_kio::kern::{KernError, KMutex, KMutexCell, KmutexState, WaitQueueScheduler};

#[test]
fn counter_is_exact_under_contention() {
    const THREADS: usize = 4;
    const ITERS: usize = 250;

    let sched = Arc::new(WaitQueueScheduler::new());
    let cell = Arc::new(KMutexCell::new(Vec::new()));

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let sched = Arc::clone(&sched);
            let cell = Arc::clone(&cell);
            thread::spawn(move || {
                for i in 0..ITERS {
                    let mut log = cell.lock(&*sched, false).unwrap();
                    log.push((t, i));
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let log = cell.lock(&*sched, false).unwrap();
    assert_eq!(log.len(), THREADS * ITERS);
    // Each thread's own entries stay in program order.
    for t in 0..THREADS {
        let mine: Vec<usize> = log.iter().filter(|(o, _)| *o == t).map(|(_, i)| *i).collect();
        assert_eq!(mine, (0..ITERS).collect::<Vec<_>>());
    }
    drop(log);
    assert_eq!(cell.mutex().state(), KmutexState::Available);
}

#[test]
fn interrupted_lockers_never_enter() {
    const THREADS: usize = 4;
    const ITERS: usize = 200;

    let sched = Arc::new(WaitQueueScheduler::new());
    let mtx = Arc::new(KMutex::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let entered = Arc::new(AtomicUsize::new(0));
    let interrupted = Arc::new(AtomicUsize::new(0));
    let stop = Arc::new(AtomicBool::new(false));

    let signaller = {
        let sched = Arc::clone(&sched);
        let mtx = Arc::clone(&mtx);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                sched.interrupt_event(mtx.event());
                thread::yield_now();
            }
        })
    };

    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let sched = Arc::clone(&sched);
            let mtx = Arc::clone(&mtx);
            let inside = Arc::clone(&inside);
            let entered = Arc::clone(&entered);
            let interrupted = Arc::clone(&interrupted);
            thread::spawn(move || {
                for _ in 0..ITERS {
                    match mtx.lock(&*sched, true) {
                        Ok(()) => {
                            assert_eq!(inside.fetch_add(1, Ordering::SeqCst), 0);
                            entered.fetch_add(1, Ordering::SeqCst);
                            thread::yield_now();
                            inside.fetch_sub(1, Ordering::SeqCst);
                            mtx.unlock(&*sched);
                        }
                        Err(KernError::Interrupted) => {
                            interrupted.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(other) => panic!("unexpected lock failure: {other}"),
                    }
                }
            })
        })
        .collect();
    for w in workers {
        w.join().unwrap();
    }
    stop.store(true, Ordering::Release);
    signaller.join().unwrap();

    assert_eq!(
        entered.load(Ordering::SeqCst) + interrupted.load(Ordering::SeqCst),
        THREADS * ITERS
    );
    assert_eq!(sched.waiter_count(mtx.event()), 0);

    // Whatever state the last unlock left, the mutex is free again.
    assert!(mtx.try_lock());
    mtx.unlock(&*sched);
    assert_eq!(mtx.state(), KmutexState::Available);
}
