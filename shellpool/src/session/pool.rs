//! Blocking, fixed-size pool of sessions.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use log::{debug, warn};

use super::Session;
use crate::error::PoolError;

/// Callback applied to sessions once teardown has started.
type OnTeardown<S> = Box<dyn FnMut(S) + Send>;

/// State guarded by the pool mutex.
struct PoolState<S> {
    /// Sessions ready to be handed out, oldest release first.
    available: VecDeque<S>,

    /// Sessions handed out and not yet released.
    checked_out: usize,

    /// Sessions that were checked out and will never come back.
    forfeited: usize,

    /// Set once teardown starts; acquire fails from then on.
    torn_down: bool,

    /// Teardown callback, kept for sessions released after teardown.
    on_teardown: Option<OnTeardown<S>>,
}

impl<S> fmt::Debug for PoolState<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolState")
            .field("available", &self.available.len())
            .field("checked_out", &self.checked_out)
            .field("forfeited", &self.forfeited)
            .field("torn_down", &self.torn_down)
            .finish()
    }
}

/// A fixed-size multiset of sessions shared by concurrent callers.
///
/// [`acquire`](Self::acquire) moves a session out of the pool, so a checked
/// out session is held by exactly one caller and needs no locking of its
/// own. [`release`](Self::release) puts it back and wakes one waiter.
///
/// `available + checked_out + forfeited == size` holds at all times.
#[derive(Debug)]
pub struct SessionPool<S = Session> {
    state: Mutex<PoolState<S>>,
    ready: Condvar,
    size: usize,
}

impl<S> SessionPool<S> {
    /// Build a pool from an already created batch of sessions.
    pub fn new(sessions: impl IntoIterator<Item = S>) -> Self {
        let available: VecDeque<S> = sessions.into_iter().collect();
        let size = available.len();
        debug!("session pool created with {} sessions", size);

        Self {
            state: Mutex::new(PoolState {
                available,
                checked_out: 0,
                forfeited: 0,
                torn_down: false,
                on_teardown: None,
            }),
            ready: Condvar::new(),
            size,
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState<S>> {
        self.state.lock().unwrap_or_else(|e| {
            warn!("session pool lock was poisoned, recovering");
            e.into_inner()
        })
    }

    /// Take a session, blocking until one is released.
    pub fn acquire(&self) -> Result<S, PoolError> {
        let mut state = self.lock();
        loop {
            if let Some(session) = self.try_take(&mut state)? {
                return Ok(session);
            }
            state = self.ready.wait(state).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Take a session, giving up after `timeout`.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<S, PoolError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if let Some(session) = self.try_take(&mut state)? {
                return Ok(session);
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(PoolError::Timeout(timeout));
            }
            state = self
                .ready
                .wait_timeout(state, remaining)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
    }

    /// Take a session if one is available right now.
    pub fn try_acquire(&self) -> Result<Option<S>, PoolError> {
        let mut state = self.lock();
        self.try_take(&mut state)
    }

    fn try_take(&self, state: &mut PoolState<S>) -> Result<Option<S>, PoolError> {
        if state.torn_down {
            return Err(PoolError::TornDown);
        }
        if let Some(session) = state.available.pop_front() {
            state.checked_out += 1;
            return Ok(Some(session));
        }
        if state.checked_out == 0 {
            return Err(PoolError::Exhausted { size: self.size });
        }
        Ok(None)
    }

    /// Return a session taken with `acquire` and wake one waiter.
    ///
    /// Once teardown has started the session goes straight to the teardown
    /// callback instead of back into the pool.
    pub fn release(&self, session: S) {
        let mut state = self.lock();
        state.checked_out = state.checked_out.saturating_sub(1);

        if state.torn_down {
            if let Some(on_teardown) = state.on_teardown.as_mut() {
                on_teardown(session);
            }
            drop(state);
            self.ready.notify_all();
            return;
        }

        state.available.push_back(session);
        drop(state);
        self.ready.notify_one();
    }

    /// Record that a checked out session failed and will not be released.
    ///
    /// The pool keeps its constructed size; the slot simply stays empty.
    pub fn forfeit(&self) {
        let mut state = self.lock();
        if state.checked_out == 0 {
            warn!("forfeit called with no session checked out");
            return;
        }
        state.checked_out -= 1;
        state.forfeited += 1;
        let idle = state.checked_out == 0;
        drop(state);

        // Waiters must observe exhaustion rather than sleep forever.
        if idle {
            self.ready.notify_all();
        }
    }

    /// Destroy every session with `on_teardown` and refuse further acquires.
    ///
    /// Available sessions are handed to the callback right away. Sessions
    /// still checked out are handed to it when their holder releases them.
    /// Calling it again does nothing.
    pub fn teardown(&self, on_teardown: impl FnMut(S) + Send + 'static) {
        let mut state = self.lock();
        if state.torn_down {
            return;
        }
        state.torn_down = true;

        let mut on_teardown: OnTeardown<S> = Box::new(on_teardown);
        let sessions: Vec<S> = state.available.drain(..).collect();
        debug!(
            "tearing down {} pooled sessions, {} still checked out",
            sessions.len(),
            state.checked_out
        );
        for session in sessions {
            on_teardown(session);
        }
        state.on_teardown = Some(on_teardown);
        drop(state);
        self.ready.notify_all();
    }

    /// Block until no session is checked out, giving up after `timeout`.
    ///
    /// Returns `true` if every session was released or forfeited in time.
    pub fn wait_released(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.checked_out > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return false;
            }
            state = self
                .ready
                .wait_timeout(state, remaining)
                .unwrap_or_else(|e| e.into_inner())
                .0;
        }
        true
    }

    /// Number of sessions the pool was built with.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Sessions ready to be acquired.
    pub fn available(&self) -> usize {
        self.lock().available.len()
    }

    /// Sessions currently held by callers.
    pub fn checked_out(&self) -> usize {
        self.lock().checked_out
    }

    /// Sessions lost to failures.
    pub fn forfeited(&self) -> usize {
        self.lock().forfeited
    }

    /// Whether teardown has started.
    pub fn is_torn_down(&self) -> bool {
        self.lock().torn_down
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::*;

    fn counts<S>(pool: &SessionPool<S>) -> (usize, usize, usize) {
        let state = pool.lock();
        (state.available.len(), state.checked_out, state.forfeited)
    }

    #[test]
    fn test_acquire_release_fifo() {
        let pool = SessionPool::new([1, 2, 3]);
        assert_eq!(pool.size(), 3);

        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert_eq!((a, b), (1, 2));
        assert_eq!(pool.checked_out(), 2);
        assert_eq!(pool.available(), 1);

        pool.release(a);
        assert_eq!(pool.acquire().unwrap(), 3);
        assert_eq!(pool.acquire().unwrap(), 1);
    }

    #[test]
    fn test_acquire_blocks_until_release() {
        let pool = Arc::new(SessionPool::new(["only"]));
        let held = pool.acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire().unwrap())
        };

        thread::sleep(Duration::from_millis(50));
        assert!(!waiter.is_finished());

        pool.release(held);
        assert_eq!(waiter.join().unwrap(), "only");
    }

    #[test]
    fn test_acquire_timeout() {
        let pool = SessionPool::new([0u8]);
        let _held = pool.acquire().unwrap();

        let err = pool.acquire_timeout(Duration::from_millis(30)).unwrap_err();
        assert!(matches!(err, PoolError::Timeout(_)));
        assert!(pool.try_acquire().unwrap().is_none());
    }

    #[test]
    fn test_concurrent_checkout_is_exclusive() {
        const SESSIONS: usize = 4;
        const WORKERS: usize = 8;
        const ROUNDS: usize = 200;

        let pool = Arc::new(SessionPool::new(0..SESSIONS));
        let in_use = Arc::new(Mutex::new(HashSet::new()));
        let barrier = Arc::new(Barrier::new(WORKERS));

        let handles: Vec<_> = (0..WORKERS)
            .map(|_| {
                let pool = Arc::clone(&pool);
                let in_use = Arc::clone(&in_use);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    for _ in 0..ROUNDS {
                        let id = pool.acquire().unwrap();
                        assert!(in_use.lock().unwrap().insert(id), "session {id} handed out twice");

                        let (available, checked_out, forfeited) = counts(pool.as_ref());
                        assert_eq!(available + checked_out + forfeited, SESSIONS);

                        thread::yield_now();
                        assert!(in_use.lock().unwrap().remove(&id));
                        pool.release(id);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(pool.available(), SESSIONS);
        assert_eq!(pool.checked_out(), 0);
    }

    #[test]
    fn test_forfeit_keeps_size_and_exhausts() {
        let pool = Arc::new(SessionPool::new(["a", "b"]));
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();

        let waiter = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire())
        };

        pool.forfeit();
        drop(a);
        assert_eq!(pool.size(), 2);
        assert_eq!(counts(pool.as_ref()), (0, 1, 1));

        pool.forfeit();
        drop(b);
        let err = waiter.join().unwrap().unwrap_err();
        assert!(matches!(err, PoolError::Exhausted { size: 2 }));
    }

    fn recorder() -> (Arc<Mutex<Vec<i32>>>, impl FnMut(i32) + Send + 'static) {
        let destroyed = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&destroyed);
        (destroyed, move |s| sink.lock().unwrap().push(s))
    }

    #[test]
    fn test_teardown_destroys_available() {
        let pool = SessionPool::new([1, 2, 3]);
        let held = pool.acquire().unwrap();

        let (destroyed, on_teardown) = recorder();
        pool.teardown(on_teardown);
        assert_eq!(*destroyed.lock().unwrap(), vec![2, 3]);
        assert!(pool.is_torn_down());
        assert!(matches!(pool.acquire(), Err(PoolError::TornDown)));

        pool.release(held);
        assert_eq!(*destroyed.lock().unwrap(), vec![2, 3, 1]);
        assert_eq!(counts(&pool), (0, 0, 0));
    }

    #[test]
    fn test_teardown_reaches_checked_out_sessions() {
        let pool = Arc::new(SessionPool::new([1, 2]));
        let held = pool.acquire().unwrap();

        let (destroyed, on_teardown) = recorder();
        pool.teardown(on_teardown);
        assert!(!pool.wait_released(Duration::from_millis(20)));

        let holder = {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(50));
                pool.release(held);
            })
        };

        assert!(pool.wait_released(Duration::from_secs(5)));
        holder.join().unwrap();

        let mut destroyed = destroyed.lock().unwrap().clone();
        destroyed.sort_unstable();
        assert_eq!(destroyed, vec![1, 2]);
        assert_eq!(pool.available(), 0);
    }

    #[test]
    fn test_teardown_runs_once() {
        let pool = SessionPool::new([1]);
        let (first, on_teardown) = recorder();
        pool.teardown(on_teardown);

        let (second, on_teardown) = recorder();
        pool.teardown(on_teardown);
        assert_eq!(*first.lock().unwrap(), vec![1]);
        assert!(second.lock().unwrap().is_empty());
    }

    #[test]
    fn test_teardown_wakes_waiters() {
        let pool = Arc::new(SessionPool::new([1]));
        let _held = pool.acquire().unwrap();

        let woke = Arc::new(AtomicBool::new(false));
        let waiter = {
            let pool = Arc::clone(&pool);
            let woke = Arc::clone(&woke);
            thread::spawn(move || {
                let result = pool.acquire();
                woke.store(true, Ordering::SeqCst);
                result
            })
        };

        thread::sleep(Duration::from_millis(50));
        pool.teardown(drop);

        let result = waiter.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
        assert!(matches!(result, Err(PoolError::TornDown)));
    }
}
