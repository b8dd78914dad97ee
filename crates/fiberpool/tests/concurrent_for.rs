use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Mutex};

use fiberpool::{
    block_on, concurrent_for, default_pool, spawn, yield_now, ConcurrentFor, Pool, PoolConfig,
    PoolState, SchedError, Scheduler, SharedWorkPool,
};

fn pool() -> Pool {
    Pool::with_config(&PoolConfig::new().stack_size(128 * 1024)).unwrap()
}

/// Three workers share a counter that starts at 3 and stops at 10
#[test]
fn counter_three_to_ten() {
    let counter = Cell::new(3);
    let increments = Cell::new(0);

    concurrent_for(3, |_| {
        while counter.get() < 10 {
            counter.set(counter.get() + 1);
            increments.set(increments.get() + 1);
            yield_now();
        }
    })
    .unwrap();

    assert_eq!(counter.get(), 10);
    assert_eq!(increments.get(), 7);
}

/// Pushes `("old", index)` when the first-generation task ends
struct ExitMark<'a> {
    log: &'a RefCell<Vec<(&'static str, usize)>>,
    index: usize,
}

impl Drop for ExitMark<'_> {
    fn drop(&mut self) {
        self.log.borrow_mut().push(("old", self.index));
    }
}

#[test]
fn resize_three_to_sixty_four() {
    let pool = pool();
    let log = RefCell::new(Vec::new());
    pool.dispatch(3, |i| {
        let _mark = ExitMark { log: &log, index: i };
        yield_now();
    })
    .unwrap();
    assert_eq!(pool.num_workers(), 3);
    let small = pool.worker_ids();

    let live_seen = RefCell::new(Vec::new());
    let report = pool
        .dispatch(64, |i| {
            live_seen.borrow_mut().push(pool.scheduler().live_fibers());
            log.borrow_mut().push(("new", i));
        })
        .unwrap();
    assert!(!report.reused_workers());
    assert_eq!(pool.num_workers(), 64);
    assert_eq!(pool.scheduler().live_fibers(), 64);
    assert!(pool.worker_ids().iter().all(|id| !small.contains(id)));

    // the old generation was gone before any new worker ran
    assert!(live_seen.borrow().iter().all(|&live| live == 64));
    let log = log.into_inner();
    let first_new = log.iter().position(|(generation, _)| *generation == "new").unwrap();
    assert_eq!(first_new, 3);
    assert!(log[first_new..].iter().all(|(generation, _)| *generation == "new"));

    let mut ran: Vec<usize> = log[first_new..].iter().map(|&(_, i)| i).collect();
    ran.sort_unstable();
    assert_eq!(ran, (0..64).collect::<Vec<_>>());

    let stats = pool.stats();
    assert_eq!(stats.workers_spawned, 3 + 64);
    assert_eq!(stats.workers_joined, 3);
    assert_eq!(stats.resizes, 1);
    assert_eq!(stats.rounds, 2);
}

fn transform(x: f64) -> f64 {
    (x * 1.000_001 + 0.5) % 1000.0
}

fn interleaved_matches_sequential(total: u64) {
    let pool = pool();
    let done = Cell::new(0u64);
    let x = Cell::new(1.0f64);

    pool.dispatch(64, |_| {
        while done.get() < total {
            done.set(done.get() + 1);
            x.set(transform(x.get()));
            yield_now();
        }
    })
    .unwrap()
    .into_result()
    .unwrap();

    let mut expected = 1.0f64;
    for _ in 0..total {
        expected = transform(expected);
    }
    assert_eq!(done.get(), total);
    assert_eq!(x.get(), expected);
}

#[test]
fn sixty_four_workers_match_sequential_loop() {
    interleaved_matches_sequential(1_000_000);
}

#[test]
#[ignore = "long running: 10^8 operations"]
fn sixty_four_workers_match_sequential_loop_large() {
    interleaved_matches_sequential(100_000_000);
}

#[test]
fn dispatch_inside_own_task_is_rejected() {
    let pool = pool();
    let nested = RefCell::new(None);
    pool.dispatch(1, |_| {
        *nested.borrow_mut() = Some(pool.dispatch(2, |_| {}));
    })
    .unwrap();
    assert_eq!(nested.into_inner(), Some(Err(SchedError::Reentrant)));

    // free function: nested use of the default pool
    let nested = RefCell::new(None);
    concurrent_for(2, |i| {
        if i == 0 {
            *nested.borrow_mut() = Some(concurrent_for(1, |_| {}));
        }
    })
    .unwrap();
    assert_eq!(nested.into_inner(), Some(Err(SchedError::Reentrant)));
}

#[test]
fn equal_size_keeps_worker_ids() {
    let pool = pool();
    pool.dispatch(8, |_| {}).unwrap();
    let first = pool.worker_ids();
    for _ in 0..5 {
        let report = pool.dispatch(8, |_| yield_now()).unwrap();
        assert!(report.reused_workers());
        assert_eq!(pool.worker_ids(), first);
    }
    assert_eq!(pool.stats().rounds, 6);
}

#[test]
fn each_round_runs_each_index_exactly_once() {
    let pool = pool();
    for round in 1..=4u32 {
        // Some indices finish at once, others keep yielding; early finishers
        // must not pick the task up again.
        let hits = RefCell::new(vec![0u32; 6]);
        pool.dispatch(6, |i| {
            for _ in 0..i {
                yield_now();
            }
            hits.borrow_mut()[i] += 1;
        })
        .unwrap();
        assert_eq!(*hits.borrow(), vec![1; 6], "round {}", round);
    }
}

#[test]
fn teardown_leaves_no_workers_and_is_repeatable() {
    let pool = pool();
    pool.dispatch(5, |_| yield_now()).unwrap();
    let sched = pool.scheduler().clone();
    assert_eq!(sched.live_fibers(), 5);

    pool.teardown();
    assert_eq!(pool.num_workers(), 0);
    assert_eq!(sched.live_fibers(), 0);
    pool.teardown();
    assert_eq!(pool.state(), PoolState::Terminated);
    assert_eq!(pool.dispatch(5, |_| {}), Err(SchedError::Cancelled));
}

#[test]
fn drop_joins_workers() {
    let sched = Scheduler::current().unwrap();
    {
        let pool = pool();
        pool.dispatch(7, |_| {}).unwrap();
        assert_eq!(sched.live_fibers(), 7);
    }
    assert_eq!(sched.live_fibers(), 0);
}

#[test]
fn drop_during_unwind_joins_workers() {
    let sched = Scheduler::current().unwrap();
    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        let pool = pool();
        pool.dispatch(4, |_| yield_now()).unwrap();
        panic!("caller failed after the round");
    }));
    assert!(result.is_err());
    assert_eq!(sched.live_fibers(), 0);
}

#[test]
fn cancellation_mid_round_returns_cancelled() {
    let pool = pool();
    let token = pool.cancel_token();
    let iterations = Cell::new(0u32);

    let result = pool.dispatch(8, |_| loop {
        iterations.set(iterations.get() + 1);
        if iterations.get() == 20 {
            token.cancel();
        }
        yield_now();
    });

    assert_eq!(result, Err(SchedError::Cancelled));
    assert_eq!(pool.state(), PoolState::Terminated);
    assert_eq!(pool.scheduler().live_fibers(), 0);
    // every worker stopped at its next suspension point
    assert!(iterations.get() <= 20 + 8);
}

#[test]
fn cancelling_from_another_fiber() {
    let pool = Rc::new(pool());
    let p = Rc::clone(&pool);
    let canceller = spawn(move |_| {
        for _ in 0..3 {
            yield_now();
        }
        p.cancel();
    })
    .unwrap();

    let result = pool.dispatch(4, |_| loop {
        yield_now();
    });
    assert_eq!(result, Err(SchedError::Cancelled));
    canceller.join().unwrap();
}

#[test]
fn panics_are_reported_per_index() {
    let pool = pool();
    let completed = Cell::new(0);
    let report = pool
        .dispatch(4, |i| {
            yield_now();
            if i % 2 == 1 {
                panic!("odd index {}", i);
            }
            completed.set(completed.get() + 1);
        })
        .unwrap();

    assert_eq!(completed.get(), 2);
    let failed: Vec<_> = report.failures().map(|f| (f.worker, f.message.clone())).collect();
    assert_eq!(failed, [(1, "odd index 1".to_string()), (3, "odd index 3".to_string())]);
    match report.into_result() {
        Err(SchedError::TaskFailed(f)) => assert_eq!(f.len(), 2),
        other => panic!("unexpected: {:?}", other),
    }
}

#[test]
fn zero_workers_completes_immediately() {
    concurrent_for(0, |_| unreachable!()).unwrap();
    let pool = pool();
    let report = pool.dispatch(0, |_| unreachable!()).unwrap();
    assert_eq!(report.workers(), 0);
    assert_eq!(pool.num_workers(), 0);
}

#[test]
fn dispatcher_inside_a_fiber() {
    let total = block_on(|| {
        let pool = Pool::new().unwrap();
        let sum = Cell::new(0);
        pool.dispatch(10, |i| {
            yield_now();
            sum.set(sum.get() + i);
        })
        .unwrap();
        sum.get()
    })
    .unwrap();
    assert_eq!(total, 45);
}

#[test]
fn nested_round_on_a_different_pool() {
    let outer = pool();
    let inner = [pool(), pool()];
    let cells = RefCell::new(vec![0; 6]);

    outer
        .dispatch(2, |i| {
            inner[i]
                .dispatch(3, |j| {
                    yield_now();
                    cells.borrow_mut()[i * 3 + j] += 1;
                })
                .unwrap();
        })
        .unwrap();

    assert_eq!(*cells.borrow(), vec![1; 6]);
    assert!(inner.iter().all(|p| p.stats().rounds == 1));
}

#[test]
fn default_pool_is_torn_down_at_thread_exit() {
    let token = std::thread::spawn(|| {
        concurrent_for(16, |_| yield_now()).unwrap();
        assert_eq!(Scheduler::current().unwrap().live_fibers(), 16);
        let token = default_pool().unwrap().cancel_token();
        assert!(!token.is_cancelled());
        token
    })
    .join()
    .unwrap();
    assert!(token.is_cancelled());
}

#[test]
fn default_pool_is_torn_down_when_thread_panics() {
    let (tx, rx) = mpsc::channel();
    let result = std::thread::spawn(move || {
        concurrent_for(4, |_| yield_now()).unwrap();
        tx.send(default_pool().unwrap().cancel_token()).unwrap();
        panic!("thread body failed");
    })
    .join();
    assert!(result.is_err());
    assert!(rx.recv().unwrap().is_cancelled());
}

/// Yields `n` times from its destructor
struct YieldOnDrop(u32);

impl Drop for YieldOnDrop {
    fn drop(&mut self) {
        for _ in 0..self.0 {
            yield_now();
        }
    }
}

#[test]
fn cancel_reaches_siblings_of_an_unwinding_worker() {
    let pool = pool();
    let token = pool.cancel_token();
    let steps = Cell::new(0u32);

    let result = pool.dispatch(2, |i| {
        if i == 0 {
            let _slow = YieldOnDrop(50);
            panic!("worker 0 failed");
        }
        loop {
            steps.set(steps.get() + 1);
            if steps.get() == 5 {
                token.cancel();
            }
            yield_now();
        }
    });

    assert_eq!(result, Err(SchedError::Cancelled));
    // worker 1 stopped at the first yield after the cancel
    assert_eq!(steps.get(), 5);
    assert_eq!(pool.scheduler().live_fibers(), 0);
}

#[test]
fn lifo_policy_runs_rounds_to_completion() {
    std::thread::spawn(|| {
        let config = PoolConfig::new()
            .stack_size(64 * 1024)
            .ready_policy(fiberpool::ReadyPolicy::Lifo);
        Scheduler::init_current(&config).unwrap();
        let pool = Pool::with_config(&config).unwrap();
        let counter = Cell::new(0);
        pool.dispatch(5, |_| {
            for _ in 0..10 {
                counter.set(counter.get() + 1);
                yield_now();
            }
        })
        .unwrap();
        assert_eq!(counter.get(), 50);
    })
    .join()
    .unwrap();
}

#[test]
fn shared_work_strategy() {
    let pool = SharedWorkPool::new(&PoolConfig::new().share_threads(4)).unwrap();
    let sum = AtomicU64::new(0);
    let order = Mutex::new(Vec::new());

    let report = pool
        .concurrent_for(1000, |i| {
            sum.fetch_add(i as u64, Ordering::Relaxed);
            if i < 4 {
                order.lock().unwrap().push(i);
            }
        })
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.workers(), 1000);
    assert_eq!(sum.load(Ordering::Relaxed), 999 * 1000 / 2);
    assert_eq!(order.lock().unwrap().len(), 4);
}
