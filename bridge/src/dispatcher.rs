//! Foreground dispatch - marshals listener calls onto the primary thread.
//!
//! The thread that constructs the dispatcher is the primary thread. Calls
//! made on it run synchronously; calls from any other thread are queued
//! and run when the primary thread pumps its [`PrimaryQueue`]. Ordering is
//! FIFO per sending thread (the queue is a single channel); nothing is
//! promised across threads.

use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, ThreadId};

use tokio::sync::mpsc;

use herald_types::{BridgeError, BridgeMap};

/// A named listener. Runs only on the primary thread and owns the payload.
pub type Listener = Arc<dyn Fn(BridgeMap) + Send + Sync>;

type Job = Box<dyn FnOnce() + Send>;

type ListenerMap = Arc<Mutex<HashMap<String, Listener>>>;

/// Cloneable handle used by every component to reach listener code.
#[derive(Clone)]
pub struct ForegroundDispatcher {
    primary: ThreadId,
    job_tx: mpsc::UnboundedSender<Job>,
    listeners: ListenerMap,
}

impl fmt::Debug for ForegroundDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForegroundDispatcher")
            .field("primary", &self.primary)
            .field("closed", &self.job_tx.is_closed())
            .finish_non_exhaustive()
    }
}

impl ForegroundDispatcher {
    /// Create a dispatcher whose primary thread is the calling thread.
    #[must_use]
    pub fn new() -> (Self, PrimaryQueue) {
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            primary: thread::current().id(),
            job_tx,
            listeners: Arc::new(Mutex::new(HashMap::new())),
        };
        let queue = PrimaryQueue {
            job_rx,
            _not_send: PhantomData,
        };
        (dispatcher, queue)
    }

    #[must_use]
    pub fn is_primary_thread(&self) -> bool {
        thread::current().id() == self.primary
    }

    /// Install (or replace) the listener for `name`.
    pub fn set_listener(
        &self,
        name: impl Into<String>,
        listener: impl Fn(BridgeMap) + Send + Sync + 'static,
    ) {
        let name = name.into();
        tracing::debug!(method = %name, "Listener registered");
        lock(&self.listeners).insert(name, Arc::new(listener));
    }

    pub fn remove_listener(&self, name: &str) -> bool {
        lock(&self.listeners).remove(name).is_some()
    }

    #[must_use]
    pub fn has_listener(&self, name: &str) -> bool {
        lock(&self.listeners).contains_key(name)
    }

    /// Deliver `payload` to the listener for `name`.
    ///
    /// Fire-and-forget: off the primary thread this only enqueues. The
    /// listener is looked up when the call runs, not when it is queued.
    pub fn invoke(&self, name: &str, payload: BridgeMap) -> Result<(), BridgeError> {
        let listeners = Arc::clone(&self.listeners);
        let name = name.to_string();
        self.run_on_primary(move || {
            deliver(&listeners, &name, payload);
        })
    }

    /// Like [`ForegroundDispatcher::invoke`], but runs `on_undelivered` if the
    /// call never reaches a listener: none is registered when the job runs,
    /// the listener panics, or the job is dropped unrun.
    pub fn invoke_or_else(
        &self,
        name: &str,
        payload: BridgeMap,
        on_undelivered: impl FnOnce() + Send + 'static,
    ) -> Result<(), BridgeError> {
        let listeners = Arc::clone(&self.listeners);
        let name = name.to_string();
        let guard = DeliveryGuard {
            on_undelivered: Some(on_undelivered),
        };
        self.run_on_primary(move || {
            if deliver(&listeners, &name, payload) {
                guard.delivered();
            }
        })
    }

    /// Run an arbitrary job on the primary thread.
    pub fn run_on_primary(&self, job: impl FnOnce() + Send + 'static) -> Result<(), BridgeError> {
        if self.is_primary_thread() {
            job();
            return Ok(());
        }
        self.job_tx
            .send(Box::new(job))
            .map_err(|_| BridgeError::ChannelClosed)
    }
}

fn deliver(listeners: &ListenerMap, name: &str, payload: BridgeMap) -> bool {
    // Clone the listener out so it can register or remove listeners itself.
    let listener = lock(listeners).get(name).cloned();
    match listener {
        Some(listener) => {
            listener(payload);
            true
        }
        None => {
            tracing::debug!(method = %name, "No listener registered, dropping call");
            false
        }
    }
}

/// Runs its fallback on drop unless marked delivered.
struct DeliveryGuard<F: FnOnce()> {
    on_undelivered: Option<F>,
}

impl<F: FnOnce()> DeliveryGuard<F> {
    fn delivered(mut self) {
        self.on_undelivered = None;
    }
}

impl<F: FnOnce()> Drop for DeliveryGuard<F> {
    fn drop(&mut self) {
        if let Some(on_undelivered) = self.on_undelivered.take() {
            on_undelivered();
        }
    }
}

fn lock(listeners: &ListenerMap) -> std::sync::MutexGuard<'_, HashMap<String, Listener>> {
    listeners.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Work queue drained by the primary thread.
///
/// Not `Send`: it stays on the thread that created the dispatcher.
pub struct PrimaryQueue {
    job_rx: mpsc::UnboundedReceiver<Job>,
    _not_send: PhantomData<*const ()>,
}

impl PrimaryQueue {
    /// Run queued jobs, up to `budget`. Non-blocking.
    pub fn pump(&mut self, budget: usize) -> usize {
        let mut count = 0;
        while count < budget {
            match self.job_rx.try_recv() {
                Ok(job) => {
                    job();
                    count += 1;
                }
                Err(mpsc::error::TryRecvError::Empty | mpsc::error::TryRecvError::Disconnected) => {
                    break;
                }
            }
        }
        count
    }

    /// Block until one job runs. Returns `false` once the channel is closed
    /// and drained.
    pub fn run_one(&mut self) -> bool {
        match self.job_rx.blocking_recv() {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }

    /// Run jobs until every dispatcher handle is gone.
    pub fn run(&mut self) {
        while self.run_one() {}
    }

    /// Refuse further work. Already-queued jobs can still be pumped.
    pub fn close(&mut self) {
        self.job_rx.close();
    }
}

impl Drop for PrimaryQueue {
    /// Jobs still queued are dropped unrun, which fires their
    /// undelivered fallbacks.
    fn drop(&mut self) {
        self.job_rx.close();
        let mut discarded = 0usize;
        while let Ok(job) = self.job_rx.try_recv() {
            drop(job);
            discarded += 1;
        }
        if discarded > 0 {
            tracing::debug!(discarded, "Primary queue dropped with pending jobs");
        }
    }
}

impl fmt::Debug for PrimaryQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrimaryQueue")
            .field("queued", &self.job_rx.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use herald_types::BridgeValue;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn payload(n: i64) -> BridgeMap {
        let mut map = BridgeMap::new();
        map.insert("n".into(), BridgeValue::Int(n));
        map
    }

    fn recorder(
        dispatcher: &ForegroundDispatcher,
        name: &str,
    ) -> Arc<Mutex<Vec<(ThreadId, i64)>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        dispatcher.set_listener(name, move |map: BridgeMap| {
            let n = map["n"].as_i64().unwrap();
            sink.lock().unwrap().push((thread::current().id(), n));
        });
        seen
    }

    #[test]
    fn primary_thread_invokes_synchronously() {
        let (dispatcher, _queue) = ForegroundDispatcher::new();
        let seen = recorder(&dispatcher, "evt");

        dispatcher.invoke("evt", payload(1)).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn other_threads_enqueue_in_fifo_order() {
        let (dispatcher, mut queue) = ForegroundDispatcher::new();
        let seen = recorder(&dispatcher, "evt");

        let worker = dispatcher.clone();
        thread::spawn(move || {
            assert!(!worker.is_primary_thread());
            for n in 0..5 {
                worker.invoke("evt", payload(n)).unwrap();
            }
        })
        .join()
        .unwrap();

        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(queue.pump(3), 3);
        assert_eq!(queue.pump(10), 2);

        let seen = seen.lock().unwrap();
        let order: Vec<i64> = seen.iter().map(|(_, n)| *n).collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert!(seen.iter().all(|(tid, _)| *tid == thread::current().id()));
    }

    #[test]
    fn missing_listener_drops_call() {
        let (dispatcher, mut queue) = ForegroundDispatcher::new();
        let worker = dispatcher.clone();
        thread::spawn(move || worker.invoke("nobody", payload(0)).unwrap())
            .join()
            .unwrap();
        assert_eq!(queue.pump(10), 1);
    }

    #[test]
    fn closed_queue_reports_channel_closed() {
        let (dispatcher, mut queue) = ForegroundDispatcher::new();
        queue.close();
        let worker = dispatcher.clone();
        let result = thread::spawn(move || worker.invoke("evt", payload(0)))
            .join()
            .unwrap();
        assert_eq!(result, Err(BridgeError::ChannelClosed));
    }

    #[test]
    fn listener_registry() {
        let (dispatcher, _queue) = ForegroundDispatcher::new();
        assert!(!dispatcher.has_listener("evt"));
        dispatcher.set_listener("evt", |_| {});
        assert!(dispatcher.has_listener("evt"));
        assert!(dispatcher.remove_listener("evt"));
        assert!(!dispatcher.remove_listener("evt"));
    }

    fn fallback_counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let hit = Arc::clone(&count);
        let fallback = move || {
            hit.fetch_add(1, Ordering::SeqCst);
        };
        (count, fallback)
    }

    fn count_of(count: &AtomicUsize) -> usize {
        count.load(Ordering::SeqCst)
    }

    #[test]
    fn delivered_call_skips_fallback() {
        let (dispatcher, mut queue) = ForegroundDispatcher::new();
        let seen = recorder(&dispatcher, "evt");
        let (count, fallback) = fallback_counter();

        let worker = dispatcher.clone();
        thread::spawn(move || worker.invoke_or_else("evt", payload(1), fallback).unwrap())
            .join()
            .unwrap();
        assert_eq!(queue.pump(10), 1);
        assert_eq!(seen.lock().unwrap().len(), 1);
        assert_eq!(count_of(&count), 0);
    }

    #[test]
    fn listener_removed_before_job_runs_fires_fallback() {
        let (dispatcher, mut queue) = ForegroundDispatcher::new();
        dispatcher.set_listener("evt", |_| {});
        let (count, fallback) = fallback_counter();

        let worker = dispatcher.clone();
        thread::spawn(move || worker.invoke_or_else("evt", payload(1), fallback).unwrap())
            .join()
            .unwrap();
        assert!(dispatcher.remove_listener("evt"));
        assert_eq!(count_of(&count), 0);
        assert_eq!(queue.pump(10), 1);
        assert_eq!(count_of(&count), 1);
    }

    #[test]
    fn dropping_queue_fires_fallback_for_queued_jobs() {
        let (dispatcher, queue) = ForegroundDispatcher::new();
        dispatcher.set_listener("evt", |_| {});
        let (count, fallback) = fallback_counter();

        let worker = dispatcher.clone();
        thread::spawn(move || worker.invoke_or_else("evt", payload(1), fallback).unwrap())
            .join()
            .unwrap();
        drop(queue);
        assert_eq!(count_of(&count), 1);
    }

    #[test]
    fn send_on_closed_queue_fires_fallback() {
        let (dispatcher, mut queue) = ForegroundDispatcher::new();
        queue.close();
        let (count, fallback) = fallback_counter();

        let worker = dispatcher.clone();
        let result = thread::spawn(move || worker.invoke_or_else("evt", payload(1), fallback))
            .join()
            .unwrap();
        assert_eq!(result, Err(BridgeError::ChannelClosed));
        assert_eq!(count_of(&count), 1);
    }

    #[test]
    fn run_returns_when_senders_drop() {
        let (dispatcher, mut queue) = ForegroundDispatcher::new();
        let seen = recorder(&dispatcher, "evt");
        let worker = dispatcher.clone();
        drop(dispatcher);
        thread::spawn(move || worker.invoke("evt", payload(9)).unwrap())
            .join()
            .unwrap();
        queue.run();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
