//! LazySMP thread pool.
//!
//! Every thread runs its own iterative deepening on a private copy of the
//! root position. They share the transposition table and the stop signal;
//! at the end the main thread picks the result to report.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, PoisonError, Weak};
use std::thread::{JoinHandle, sleep};
use std::time::Duration;

use crate::search::history::HistoryTables;
use crate::search::root_move::RootMoves;
use crate::search::search_result::SearchResult;
use crate::search::{SearchTask, deepening};
use crate::types::{Depth, Value};
use crate::util::spinlock::SpinMutex;

/// Snapshot of a thread's root moves after its last iteration.
#[derive(Clone, Debug, Default)]
pub struct ThreadResult {
    pub root_moves: RootMoves,
    pub completed_depth: Depth,
    pub n_nodes: u64,
}

impl ThreadResult {
    #[inline]
    fn score(&self) -> Value {
        self.root_moves
            .get_best()
            .map_or(-Value::INF, |rm| rm.score)
    }
}

/// Index of the result to report: the highest score among threads that got
/// at least as deep as the main thread, then the greater depth, then the
/// fewer nodes. The main thread sits at index 0.
pub fn select_best_thread(results: &[ThreadResult]) -> usize {
    let Some(main) = results.first() else {
        return 0;
    };
    let mut best = 0;
    for (i, r) in results.iter().enumerate().skip(1) {
        if r.root_moves.is_empty() || r.completed_depth < main.completed_depth {
            continue;
        }
        let b = &results[best];
        let better = r.score() > b.score()
            || (r.score() == b.score() && r.completed_depth > b.completed_depth)
            || (r.score() == b.score()
                && r.completed_depth == b.completed_depth
                && r.n_nodes < b.n_nodes);
        if better {
            best = i;
        }
    }
    best
}

/// A worker thread in the thread pool.
pub struct Thread {
    /// Mutex used with the condition variable for thread sleeping.
    mutex_for_sleep_condition: Mutex<()>,

    /// Condition variable for waking up idle threads.
    sleep_condition: Condvar,

    /// Unique index of this thread in the pool. Thread 0 is the main thread.
    idx: usize,

    /// Weak reference to the thread pool this thread belongs to.
    pool: Weak<ThreadPool>,

    /// Shared flag indicating if the engine is thinking.
    thinking: Arc<AtomicBool>,

    /// Flag indicating if the thread has completed initialization.
    ready: AtomicBool,

    /// Flag indicating if this thread is currently searching.
    searching: AtomicBool,

    /// Flag signaling the thread to exit.
    exit: AtomicBool,

    /// Nodes searched in the current search, published periodically.
    nodes: AtomicU64,

    /// Task handed to a helper before it is woken.
    task: Mutex<Option<SearchTask>>,

    /// Root moves published after each iteration.
    result: SpinMutex<Option<ThreadResult>>,

    /// Move ordering tables kept between searches.
    history: Mutex<HistoryTables>,
}

impl Thread {
    fn new(idx: usize, thinking: Arc<AtomicBool>, pool: Weak<ThreadPool>) -> Thread {
        Thread {
            mutex_for_sleep_condition: Mutex::new(()),
            sleep_condition: Condvar::new(),
            idx,
            pool,
            thinking,
            ready: AtomicBool::new(false),
            searching: AtomicBool::new(false),
            exit: AtomicBool::new(false),
            nodes: AtomicU64::new(0),
            task: Mutex::new(None),
            result: SpinMutex::new(None),
            history: Mutex::new(HistoryTables::default()),
        }
    }

    #[inline]
    pub fn idx(&self) -> usize {
        self.idx
    }

    #[inline]
    pub fn is_main(&self) -> bool {
        self.idx == 0
    }

    #[inline]
    pub fn nodes(&self) -> u64 {
        self.nodes.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn publish_nodes(&self, nodes: u64) {
        self.nodes.store(nodes, Ordering::Relaxed);
    }

    /// Total nodes of the pool this thread belongs to.
    pub fn nodes_searched(&self) -> u64 {
        self.pool
            .upgrade()
            .map_or_else(|| self.nodes(), |pool| pool.nodes_searched())
    }

    pub fn publish_result(&self, root_moves: &RootMoves, completed_depth: Depth, n_nodes: u64) {
        *self.result.lock() = Some(ThreadResult {
            root_moves: root_moves.clone(),
            completed_depth,
            n_nodes,
        });
    }

    fn take_result(&self) -> Option<ThreadResult> {
        self.result.lock().take()
    }

    fn reset_counters(&self) {
        self.nodes.store(0, Ordering::Relaxed);
        *self.result.lock() = None;
    }

    fn clear_history(&self) {
        self.history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn notify_one(&self) {
        let _lock = self
            .mutex_for_sleep_condition
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.sleep_condition.notify_one();
    }

    /// Hands `task` to this helper and wakes it.
    fn start_search(&self, task: SearchTask) {
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        let _lock = self
            .mutex_for_sleep_condition
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.searching.store(true, Ordering::Release);
        self.sleep_condition.notify_one();
    }

    /// Runs iterative deepening for `task` with this thread's tables.
    fn search(&self, task: &SearchTask) {
        let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        deepening::search_root(task, self, &mut history);
    }

    /// Main loop for helper threads: sleep until handed a task, search it,
    /// go back to sleep.
    fn idle_loop(&self) {
        while !self.exit.load(Ordering::Acquire) {
            if self.searching.load(Ordering::Acquire) {
                let task = self
                .task
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
                if let Some(task) = task {
                    self.search(&task);
                }
                self.searching.store(false, Ordering::Release);
            }

            let lock = self
                .mutex_for_sleep_condition
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            self.ready.store(true, Ordering::Release);
            let _guard = self
                .sleep_condition
                .wait_while(lock, |_| {
                    !self.exit.load(Ordering::Acquire) && !self.searching.load(Ordering::Acquire)
                })
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Main thread message processing loop.
    fn main_thread_loop(&self, receiver: Arc<Mutex<Receiver<Message>>>) {
        self.ready.store(true, Ordering::Release);
        while !self.exit.load(Ordering::Acquire) {
            let message = receiver
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .recv();
            match message {
                Ok(Message::StartThinking(task, result_sender)) => {
                    let result = self.think(&task);
                    self.thinking.store(false, Ordering::Release);
                    // The caller may have dropped the receiver; nothing to report to then.
                    let _ = result_sender.send(result);
                }
                Ok(Message::Exit) | Err(_) => {
                    self.exit.store(true, Ordering::Release);
                    break;
                }
            }
        }
    }

    /// Runs a whole search from the main thread: wakes the helpers, searches,
    /// holds the result while pondering, stops everyone and votes.
    fn think(&self, task: &SearchTask) -> SearchResult {
        let Some(pool) = self.pool.upgrade() else {
            return SearchResult::default();
        };

        for thread in &pool.threads {
            thread.reset_counters();
        }
        for helper in pool.threads.iter().skip(1) {
            helper.start_search(task.clone());
        }

        self.searching.store(true, Ordering::Release);
        self.search(task);
        self.searching.store(false, Ordering::Release);

        // A ponder or infinite search must not report before the GUI says so.
        task.signals.wait_for_release(task.limits.infinite);
        task.signals.request_stop();
        pool.wait_for_helpers();

        let nodes = pool.nodes_searched();
        let us = task.position.side_to_move();
        task.time_manager.finish_search(&task.limits, us, nodes);

        if let Some(report) = task.stats.dbg_print() {
            log::debug!("search stats:\n{report}");
        }

        pool.collect_result(task, nodes)
    }
}

/// Messages that can be sent to the main thread.
enum Message {
    /// Start a new search with the given task and return results via the sender.
    StartThinking(SearchTask, Sender<SearchResult>),

    /// Signal the thread to exit.
    Exit,
}

/// Thread pool for parallel game tree search.
pub struct ThreadPool {
    /// Collection of all threads in the pool.
    threads: Vec<Arc<Thread>>,

    /// Join handles for thread cleanup on shutdown.
    thread_handles: Vec<JoinHandle<()>>,

    /// Number of threads in the pool.
    pub size: usize,

    /// Global flag indicating if the engine is thinking.
    thinking: Arc<AtomicBool>,

    /// Channel sender for sending messages to the main thread.
    sender: Sender<Message>,

    /// Channel receiver for the main thread (protected by mutex).
    receiver: Arc<Mutex<Receiver<Message>>>,
}

impl ThreadPool {
    /// Create a new thread pool with `n_threads` threads (at least one) and
    /// wait until all of them are parked.
    pub fn new(n_threads: usize) -> Arc<ThreadPool> {
        Arc::new_cyclic(|weak| {
            let (sender, receiver) = std::sync::mpsc::channel();

            let mut pool = ThreadPool {
                threads: Vec::new(),
                thread_handles: Vec::new(),
                size: n_threads.max(1),
                thinking: Arc::new(AtomicBool::new(false)),
                sender,
                receiver: Arc::new(Mutex::new(receiver)),
            };

            pool.init(weak);
            pool
        })
    }

    fn init(&mut self, pool: &Weak<ThreadPool>) {
        self.create_main_thread(pool);
        self.create_worker_threads(pool);
        self.wait_for_threads_ready();
        log::debug!("thread pool ready: {} threads", self.size);
    }

    /// Create and start the main thread that handles control messages.
    fn create_main_thread(&mut self, pool: &Weak<ThreadPool>) {
        let main_thread = Arc::new(Thread::new(0, self.thinking.clone(), pool.clone()));
        let main_thread_clone = main_thread.clone();
        let receiver_clone = self.receiver.clone();

        let handle = std::thread::spawn(move || main_thread_clone.main_thread_loop(receiver_clone));

        self.threads.push(main_thread);
        self.thread_handles.push(handle);
    }

    /// Create and start helper threads that wait in idle loops.
    fn create_worker_threads(&mut self, pool: &Weak<ThreadPool>) {
        for i in 1..self.size {
            let thread = Arc::new(Thread::new(i, self.thinking.clone(), pool.clone()));
            let thread_clone = thread.clone();

            let handle = std::thread::spawn(move || thread_clone.idle_loop());

            self.threads.push(thread);
            self.thread_handles.push(handle);
        }
    }

    /// Wait for all threads to signal they are ready.
    fn wait_for_threads_ready(&self) {
        while !self.all_threads_ready() {
            sleep(Duration::from_millis(1));
        }
    }

    fn all_threads_ready(&self) -> bool {
        self.threads
            .iter()
            .all(|thread| thread.ready.load(Ordering::Acquire))
    }

    /// Blocks until every helper has left its search.
    fn wait_for_helpers(&self) {
        while self
            .threads
            .iter()
            .skip(1)
            .any(|thread| thread.searching.load(Ordering::Acquire))
        {
            sleep(Duration::from_millis(1));
        }
    }

    /// Merges the per-thread root moves into the reported result.
    fn collect_result(&self, task: &SearchTask, nodes: u64) -> SearchResult {
        let results: Vec<ThreadResult> = self
            .threads
            .iter()
            .map(|thread| thread.take_result().unwrap_or_default())
            .collect();

        let best_idx = select_best_thread(&results);
        let best = &results[best_idx];
        let Some(best_move) = best.root_moves.get_best() else {
            // No legal move at the root, or stopped before anything was published.
            let pos = &task.position;
            return match pos.legal_moves().next() {
                Some(mv) => SearchResult {
                    best_move: Some(mv),
                    pv_line: vec![mv],
                    n_nodes: nodes,
                    ..Default::default()
                },
                None if pos.in_check() => SearchResult::no_move(Value::mated_in(0)),
                None => SearchResult::no_move(Value::DRAW),
            };
        };

        if best_idx != 0 {
            log::debug!(
                "thread {best_idx} selected: depth {} score {}",
                best.completed_depth,
                best_move.score
            );
        }

        let mut best_move = best_move.clone();
        if best_move.pv.len() == 1 {
            let mut pos = task.position.clone();
            best_move.extract_ponder_from_tt(&mut pos, &task.tt);
        }

        SearchResult::from_root_move(
            &best.root_moves,
            &best_move,
            nodes,
            best.completed_depth,
            task.time_manager.elapsed_ms(),
        )
    }

    /// Start a new search task on the thread pool.
    ///
    /// # Arguments
    ///
    /// * `task` - The search task containing position and parameters
    ///
    /// # Returns
    ///
    /// A receiver channel that will receive the search result
    pub fn start_thinking(&self, task: SearchTask) -> Receiver<SearchResult> {
        let (result_sender, result_receiver) = std::sync::mpsc::channel();

        self.thinking.store(true, Ordering::Release);
        if self
            .sender
            .send(Message::StartThinking(task, result_sender))
            .is_err()
        {
            // The main thread is gone; the receiver reports a disconnect.
            self.thinking.store(false, Ordering::Release);
        }

        result_receiver
    }

    /// Get a reference to the main thread (thread 0).
    pub fn main(&self) -> &Arc<Thread> {
        &self.threads[0]
    }

    /// Sum of the node counts published by every thread.
    pub fn nodes_searched(&self) -> u64 {
        self.threads.iter().map(|thread| thread.nodes()).sum()
    }

    #[inline]
    pub fn is_thinking(&self) -> bool {
        self.thinking.load(Ordering::Acquire)
    }

    /// Wait for the current search to complete.
    pub fn wait_for_think_finished(&self) {
        while self.is_thinking() {
            sleep(Duration::from_millis(1));
        }
    }

    /// Clears the move ordering tables of every thread. Only valid while idle.
    pub fn clear(&self) {
        for thread in &self.threads {
            thread.clear_history();
        }
    }

    /// Shut down the thread pool and wait for all threads to exit.
    fn exit(&mut self) {
        for thread in &self.threads {
            let lock = thread.mutex_for_sleep_condition.lock();
            thread.exit.store(true, Ordering::Release);
            drop(lock);

            thread.sleep_condition.notify_one();
        }

        // Fails only if the main thread already left its loop.
        let _ = self.sender.send(Message::Exit);

        for thread_handle in self.thread_handles.drain(..) {
            if thread_handle.join().is_err() {
                log::warn!("search thread panicked during shutdown");
            }
        }

        self.threads.clear();
        log::debug!("thread pool stopped");
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.exit();
    }
}
