use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

use crate::runtime::{ContainerEvent, EventSource, Subscription};

use super::{Error, Handler, Result};

/// Ordered handler chains per event status. `None` entries are skipped.
pub type HandlerMap = HashMap<String, Vec<Option<Arc<dyn Handler>>>>;

/// Dispatches container events to their handler chains on a bounded pool of workers.
///
/// Events are never dropped: if every worker is busy, the dispatch loop waits, and with it the
/// event channel fills up and pushes back on the source.
pub struct Router<S> {
    source: Arc<S>,
    handlers: Arc<HandlerMap>,
    tx: mpsc::Sender<ContainerEvent>,
    rx: Option<mpsc::Receiver<ContainerEvent>>,
    workers: Arc<Semaphore>,
    worker_timeout: Duration,
    dispatcher: Option<JoinHandle<()>>,
    subscription: Option<Subscription>,
}

impl<S: EventSource> Router<S> {
    /// Creates a router with room for `buffer_size` queued events and `pool_size` concurrently
    /// running handler chains. Both are at least one.
    pub fn new(
        buffer_size: usize,
        pool_size: usize,
        worker_timeout: Duration,
        source: Arc<S>,
        handlers: HandlerMap,
    ) -> Self {
        let (tx, rx) = mpsc::channel(buffer_size.max(1));
        Self {
            source,
            handlers: Arc::new(handlers),
            tx,
            rx: Some(rx),
            workers: Arc::new(Semaphore::new(pool_size.max(1))),
            worker_timeout,
            dispatcher: None,
            subscription: None,
        }
    }

    /// Starts the dispatch loop and subscribes to the event source.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AlreadyStarted`] on a second call and [`Error::Subscribe`] if the source
    /// refuses the subscription. The dispatch loop keeps running in the latter case, events can
    /// still be submitted through [`Router::sender`].
    pub async fn start(&mut self) -> Result<()> {
        let rx = self.rx.take().ok_or(Error::AlreadyStarted)?;
        log::info!("Starting event router");

        self.dispatcher = Some(tokio::spawn(route_events(
            rx,
            Arc::clone(&self.workers),
            Arc::clone(&self.handlers),
            self.worker_timeout,
        )));

        let subscription = self
            .source
            .subscribe(self.tx.clone())
            .await
            .map_err(Error::Subscribe)?;
        self.subscription = Some(subscription);
        Ok(())
    }

    /// Handle to submit events that do not come from the source.
    pub fn sender(&self) -> mpsc::Sender<ContainerEvent> {
        self.tx.clone()
    }

    /// Unsubscribes from the source.
    ///
    /// Events that are already queued are still dispatched, and so are events submitted through
    /// [`Router::sender`]. Dispatching ends when the router is dropped.
    pub fn stop(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.stop();
        }
        log::info!("Stopped event router");
    }
}

impl<S> Drop for Router<S> {
    fn drop(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.abort();
        }
    }
}

async fn route_events(
    mut rx: mpsc::Receiver<ContainerEvent>,
    workers: Arc<Semaphore>,
    handlers: Arc<HandlerMap>,
    worker_timeout: Duration,
) {
    while let Some(event) = rx.recv().await {
        let permit = loop {
            match tokio::time::timeout(worker_timeout, Arc::clone(&workers).acquire_owned()).await
            {
                Ok(Ok(permit)) => break permit,
                Ok(Err(_)) => return,
                Err(_) => log::info!("Timed out waiting for worker. Re-initializing wait."),
            }
        };

        let handlers = Arc::clone(&handlers);
        tokio::spawn(async move {
            // Released when the task ends, even if a handler panics.
            let _permit = permit;
            process(&handlers, &event).await;
        });
    }
}

async fn process(handlers: &HandlerMap, event: &ContainerEvent) {
    let Some(chain) = handlers.get(&event.status) else {
        return;
    };
    log::debug!(
        "Processing event: cid={}, status={}, from={}",
        event.id,
        event.status,
        event.from
    );

    for handler in chain.iter().flatten() {
        if let Err(err) = handler.handle(event).await {
            log::error!(
                "Error processing event: cid={}, status={}, error={}",
                event.id,
                event.status,
                err
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::container::ContainerID;
    use crate::events::{HandlerError, HandlerFuture};
    use crate::runtime::{STATUS_DIE, STATUS_START};

    /// Source that hands out the subscribed sender so tests can push events through it.
    #[derive(Default)]
    struct StubSource {
        tx: Mutex<Option<mpsc::Sender<ContainerEvent>>>,
    }

    impl StubSource {
        fn sender(&self) -> mpsc::Sender<ContainerEvent> {
            self.tx.lock().unwrap().clone().unwrap()
        }
    }

    impl EventSource for StubSource {
        async fn subscribe(
            &self,
            tx: mpsc::Sender<ContainerEvent>,
        ) -> crate::runtime::Result<Subscription> {
            *self.tx.lock().unwrap() = Some(tx);
            Ok(Subscription::detached())
        }
    }

    /// Appends `<name>:<id>` to a shared log, optionally sleeping and failing.
    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        delay: Duration,
        fail: bool,
        active: AtomicUsize,
        max_active: Arc<AtomicUsize>,
    }

    impl Recorder {
        fn new(name: &'static str, log: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                log: Arc::clone(log),
                delay: Duration::ZERO,
                fail: false,
                active: AtomicUsize::new(0),
                max_active: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl Handler for Recorder {
        fn handle<'a>(&'a self, event: &'a ContainerEvent) -> HandlerFuture<'a> {
            Box::pin(async move {
                let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_active.fetch_max(active, Ordering::SeqCst);
                if !self.delay.is_zero() {
                    tokio::time::sleep(self.delay).await;
                }
                self.active.fetch_sub(1, Ordering::SeqCst);
                self.log
                    .lock()
                    .unwrap()
                    .push(format!("{}:{}", self.name, event.id));
                let result: std::result::Result<(), HandlerError> = if self.fail {
                    Err("handler failed".into())
                } else {
                    Ok(())
                };
                result
            })
        }
    }

    fn event(id: &str, status: &str) -> ContainerEvent {
        ContainerEvent::new(ContainerID::new(id).unwrap(), status, "busybox")
    }

    async fn wait_for(log: &Arc<Mutex<Vec<String>>>, len: usize) {
        for _ in 0..1000 {
            if log.lock().unwrap().len() >= len {
                return;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        panic!("only {} of {len} events handled", log.lock().unwrap().len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_more_events_than_workers_are_all_handled() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut recorder = Recorder::new("slow", &log);
        recorder.delay = Duration::from_secs(1);
        let max_active = Arc::clone(&recorder.max_active);
        let handlers = HandlerMap::from([(
            STATUS_START.to_owned(),
            vec![Some(Arc::new(recorder) as Arc<dyn Handler>)],
        )]);

        let source = Arc::new(StubSource::default());
        let mut router = Router::new(4, 2, Duration::from_secs(60), source, handlers);
        router.start().await.unwrap();

        let sender = router.sender();
        for i in 0..20 {
            sender.send(event(&format!("c{i}"), STATUS_START)).await.unwrap();
        }
        wait_for(&log, 20).await;

        assert_eq!(log.lock().unwrap().len(), 20);
        assert_eq!(max_active.load(Ordering::SeqCst), 2);
        router.stop();
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_timeout_does_not_drop_events() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut recorder = Recorder::new("slow", &log);
        recorder.delay = Duration::from_secs(5);
        let handlers = HandlerMap::from([(
            STATUS_START.to_owned(),
            vec![Some(Arc::new(recorder) as Arc<dyn Handler>)],
        )]);

        let source = Arc::new(StubSource::default());
        let mut router = Router::new(10, 1, Duration::from_secs(1), source, handlers);
        router.start().await.unwrap();

        let sender = router.sender();
        for i in 0..3 {
            sender.send(event(&format!("c{i}"), STATUS_START)).await.unwrap();
        }
        wait_for(&log, 3).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec!["slow:c0".to_owned(), "slow:c1".to_owned(), "slow:c2".to_owned()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_chain_runs_in_order_past_failures() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut first = Recorder::new("first", &log);
        first.fail = true;
        let second = Recorder::new("second", &log);
        let on_die = Recorder::new("die", &log);
        let handlers = HandlerMap::from([
            (
                STATUS_START.to_owned(),
                vec![
                    Some(Arc::new(first) as Arc<dyn Handler>),
                    None,
                    Some(Arc::new(second) as Arc<dyn Handler>),
                ],
            ),
            (
                STATUS_DIE.to_owned(),
                vec![Some(Arc::new(on_die) as Arc<dyn Handler>)],
            ),
        ]);

        let source = Arc::new(StubSource::default());
        let mut router = Router::new(10, 4, Duration::from_secs(60), Arc::clone(&source), handlers);
        router.start().await.unwrap();

        // Events from the source and submitted ones take the same path.
        source.sender().send(event("c1", STATUS_START)).await.unwrap();
        wait_for(&log, 2).await;
        router.sender().send(event("c1", "pause")).await.unwrap();
        router.sender().send(event("c2", STATUS_DIE)).await.unwrap();
        wait_for(&log, 3).await;
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "first:c1".to_owned(),
                "second:c1".to_owned(),
                "die:c2".to_owned()
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_dispatches_queued_events() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut recorder = Recorder::new("slow", &log);
        recorder.delay = Duration::from_secs(1);
        let handlers = HandlerMap::from([(
            STATUS_START.to_owned(),
            vec![Some(Arc::new(recorder) as Arc<dyn Handler>)],
        )]);

        let source = Arc::new(StubSource::default());
        let mut router = Router::new(10, 1, Duration::from_secs(60), source, handlers);
        router.start().await.unwrap();

        let sender = router.sender();
        for i in 0..5 {
            sender.send(event(&format!("c{i}"), STATUS_START)).await.unwrap();
        }
        router.stop();
        wait_for(&log, 5).await;

        assert_eq!(log.lock().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let source = Arc::new(StubSource::default());
        let mut router = Router::new(1, 1, Duration::from_secs(60), source, HandlerMap::new());
        router.start().await.unwrap();
        assert!(matches!(router.start().await, Err(Error::AlreadyStarted)));
        router.stop();
    }
}
