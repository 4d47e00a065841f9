//! Worker pool and synchronization primitives shared across the core

use std::cmp::Ordering;
use std::collections::VecDeque;

use parking_lot::{Condvar, Mutex};
use rayon::prelude::*;

use crate::error::{Error, Result};

/// Owns the fixed worker pool that services `parallel_for` requests.
///
/// One manager is created per process (or per test) and shared by the
/// subsystems that fan work out across threads.
pub struct ThreadingManager {
    pool: rayon::ThreadPool,
}

impl ThreadingManager {
    /// Creates a manager with the given worker count; 0 means one worker
    /// per logical CPU.
    pub fn new(num_threads: usize) -> Result<Self> {
        let threads = if num_threads == 0 {
            num_cpus::get()
        } else {
            num_threads
        };

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build()
            .map_err(|e| Error::InvalidParameter(format!("worker pool: {}", e)))?;

        Ok(Self { pool })
    }

    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `body(i)` for every i in `[begin, end)` across the pool.
    ///
    /// Partitioning is left to the pool; there are no ordering guarantees
    /// across partitions.
    pub fn parallel_for<F>(&self, begin: usize, end: usize, body: F)
    where
        F: Fn(usize) + Send + Sync,
    {
        if begin >= end {
            return;
        }
        self.pool
            .install(|| (begin..end).into_par_iter().for_each(|i| body(i)));
    }

    /// Runs a closure inside the pool so nested rayon iterators use it
    pub fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        self.pool.install(op)
    }
}

/// Stable parallel sort by a comparator.
///
/// Stability is load-bearing: column sorting relies on equal keys keeping
/// their index order.
pub fn parallel_sort_by<T, F>(items: &mut [T], compare: F)
where
    T: Send,
    F: Fn(&T, &T) -> Ordering + Sync,
{
    items.par_sort_by(compare);
}

/// Stable parallel sort by the natural order
pub fn parallel_sort<T: Ord + Send>(items: &mut [T]) {
    items.par_sort();
}

struct RwState {
    readers: usize,
    writer_active: bool,
    writer_queue: VecDeque<u64>,
    next_ticket: u64,
}

/// Reader/writer mutex with FIFO writers.
///
/// Many readers may hold the lock at once; writers are exclusive and enter
/// in the order they first requested access. A reader arriving while any
/// writer is active or queued blocks until those writers have completed,
/// so a stream of readers cannot starve a writer. Writers may not upgrade
/// from a reader.
pub struct QueuingRwMutex {
    state: Mutex<RwState>,
    readers_cv: Condvar,
    writers_cv: Condvar,
}

impl Default for QueuingRwMutex {
    fn default() -> Self {
        Self::new()
    }
}

impl QueuingRwMutex {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(RwState {
                readers: 0,
                writer_active: false,
                writer_queue: VecDeque::new(),
                next_ticket: 0,
            }),
            readers_cv: Condvar::new(),
            writers_cv: Condvar::new(),
        }
    }

    /// Enters the critical section as a reader
    pub fn read(&self) -> QueuingReadGuard<'_> {
        let mut state = self.state.lock();
        while state.writer_active || !state.writer_queue.is_empty() {
            self.readers_cv.wait(&mut state);
        }
        state.readers += 1;
        QueuingReadGuard { lock: self }
    }

    /// Enters the critical section as a writer, queued FIFO
    pub fn write(&self) -> QueuingWriteGuard<'_> {
        let mut state = self.state.lock();
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.writer_queue.push_back(ticket);

        while state.readers > 0 || state.writer_active || state.writer_queue.front() != Some(&ticket)
        {
            self.writers_cv.wait(&mut state);
        }
        state.writer_queue.pop_front();
        state.writer_active = true;
        QueuingWriteGuard { lock: self }
    }

    fn reader_leave(&self) {
        let mut state = self.state.lock();
        state.readers -= 1;
        if state.readers == 0 && !state.writer_queue.is_empty() {
            self.writers_cv.notify_all();
        }
    }

    fn writer_leave(&self) {
        let mut state = self.state.lock();
        state.writer_active = false;
        if state.writer_queue.is_empty() {
            self.readers_cv.notify_all();
        } else {
            self.writers_cv.notify_all();
        }
    }
}

/// Scoped reader access; leaves the critical section on drop
pub struct QueuingReadGuard<'a> {
    lock: &'a QueuingRwMutex,
}

impl Drop for QueuingReadGuard<'_> {
    fn drop(&mut self) {
        self.lock.reader_leave();
    }
}

/// Scoped writer access; leaves the critical section on drop
pub struct QueuingWriteGuard<'a> {
    lock: &'a QueuingRwMutex,
}

impl Drop for QueuingWriteGuard<'_> {
    fn drop(&mut self) {
        self.lock.writer_leave();
    }
}
