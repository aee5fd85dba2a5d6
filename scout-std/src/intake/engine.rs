//! The intake engine.
//!
//! Requests arrive over a bounded channel. The receive loop takes a permit
//! from a semaphore before spawning each handler task, so at most
//! `concurrency` handlers run at once. When a handler finishes its permit is
//! returned and the follow-up generators of its responses feed new requests
//! back into the channel.
//!
//! Two tokens govern shutdown: `listen` stops the loop and refuses new work,
//! `work` aborts handlers still running when the grace period runs out.

use super::handler::{DynIntakeHandler, IntakeContext, IntakeHandler};
use scout_core::{BoxError, HandlerError, IntakeError, Request};
use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};
use tokio::{
    sync::{Semaphore, mpsc},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;

/// Default request buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 256;
/// Default number of concurrent handler tasks.
pub const DEFAULT_CONCURRENCY: usize = 16;
/// Default drain polling interval.
pub const DEFAULT_DRAIN_POLL: Duration = Duration::from_millis(10);

/// Engine settings. Zero sizes are raised to one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Capacity of the request channel.
    pub buffer_size: usize,
    /// Handler tasks allowed in flight.
    pub concurrency: usize,
    /// How often `stop` checks for outstanding handlers.
    pub drain_poll: Duration,
}

impl EngineConfig {
    fn normalized(self) -> Self {
        Self {
            buffer_size: self.buffer_size.max(1),
            concurrency: self.concurrency.max(1),
            drain_poll: if self.drain_poll.is_zero() {
                DEFAULT_DRAIN_POLL
            } else {
                self.drain_poll
            },
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            drain_poll: DEFAULT_DRAIN_POLL,
        }
    }
}

/// Clonable handle for pushing requests into an engine.
#[derive(Debug, Clone)]
pub struct Submitter {
    sender: mpsc::Sender<Request>,
    listen: CancellationToken,
}

impl Submitter {
    /// Queue a request, waiting for buffer space.
    pub async fn submit(&self, request: Request) -> Result<(), IntakeError> {
        if self.listen.is_cancelled() {
            return Err(IntakeError::Closed);
        }
        self.sender
            .send(request)
            .await
            .map_err(|_| IntakeError::Closed)
    }

    /// Queue a request without waiting.
    pub fn try_submit(&self, request: Request) -> Result<(), IntakeError> {
        if self.listen.is_cancelled() {
            return Err(IntakeError::Closed);
        }
        self.sender.try_send(request).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => IntakeError::Full,
            mpsc::error::TrySendError::Closed(_) => IntakeError::Closed,
        })
    }
}

/// Bounded-concurrency request processor.
pub struct Engine {
    config: EngineConfig,
    sender: mpsc::Sender<Request>,
    receiver: Mutex<Option<mpsc::Receiver<Request>>>,
    permits: Arc<Semaphore>,
    listen: CancellationToken,
    work: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Engine {
    /// Create a stopped engine.
    pub fn new(config: EngineConfig) -> Self {
        let config = config.normalized();
        let (sender, receiver) = mpsc::channel(config.buffer_size);
        Self {
            config,
            sender,
            receiver: Mutex::new(Some(receiver)),
            permits: Arc::new(Semaphore::new(config.concurrency)),
            listen: CancellationToken::new(),
            work: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    /// Effective settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// A handle for pushing requests.
    pub fn submitter(&self) -> Submitter {
        Submitter {
            sender: self.sender.clone(),
            listen: self.listen.clone(),
        }
    }

    /// Queue a request, waiting for buffer space.
    pub async fn submit(&self, request: Request) -> Result<(), IntakeError> {
        self.submitter().submit(request).await
    }

    /// Handler tasks currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.config
            .concurrency
            .saturating_sub(self.permits.available_permits())
    }

    /// Whether `stop` has been called.
    pub fn is_stopped(&self) -> bool {
        self.listen.is_cancelled()
    }

    /// Spawn the receive loop. Fails if the engine was already started.
    pub fn start(&self, handler: impl IntakeHandler) -> Result<(), IntakeError> {
        let receiver = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(IntakeError::AlreadyStarted)?;
        if self.listen.is_cancelled() {
            return Err(IntakeError::Closed);
        }

        let worker = Worker {
            handler: Arc::new(handler),
            sender: self.sender.clone(),
            permits: self.permits.clone(),
            listen: self.listen.clone(),
            work: self.work.clone(),
        };
        let task = tokio::spawn(worker.run(receiver));
        *self.task.lock().unwrap_or_else(PoisonError::into_inner) = Some(task);
        tracing::debug!(
            concurrency = self.config.concurrency,
            buffer_size = self.config.buffer_size,
            "intake engine started"
        );
        Ok(())
    }

    /// Stop accepting requests and wait up to `grace` for in-flight handlers.
    ///
    /// When the grace period runs out, in-flight handlers are cancelled and
    /// `DrainTimeout` reports how many were still running.
    pub async fn stop(&self, grace: Duration) -> Result<(), IntakeError> {
        self.listen.cancel();
        self.permits.close();

        let deadline = Instant::now() + grace;
        let result = loop {
            let in_flight = self.in_flight();
            if in_flight == 0 {
                break Ok(());
            }
            let now = Instant::now();
            if now >= deadline {
                self.work.cancel();
                tracing::warn!(in_flight, ?grace, "intake drain timed out, cancelling handlers");
                break Err(IntakeError::DrainTimeout { in_flight });
            }
            tokio::time::sleep(self.config.drain_poll.min(deadline - now)).await;
        };

        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                tracing::warn!(%err, "intake loop ended abnormally");
            }
        }
        tracing::debug!("intake engine stopped");
        result
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.config)
            .field("in_flight", &self.in_flight())
            .field("stopped", &self.is_stopped())
            .finish()
    }
}

struct Worker {
    handler: Arc<dyn DynIntakeHandler>,
    sender: mpsc::Sender<Request>,
    permits: Arc<Semaphore>,
    listen: CancellationToken,
    work: CancellationToken,
}

impl Worker {
    async fn run(self, mut receiver: mpsc::Receiver<Request>) {
        let worker = Arc::new(self);
        loop {
            let request = tokio::select! {
                biased;
                _ = worker.listen.cancelled() => break,
                request = receiver.recv() => match request {
                    Some(request) => request,
                    None => break,
                },
            };
            // Blocks while every permit is taken; fails once the semaphore closes.
            let Ok(permit) = worker.permits.clone().acquire_owned().await else {
                tracing::debug!(session = %request.session_id, "intake stopping, request dropped");
                break;
            };

            let task = worker.clone();
            tokio::spawn(async move {
                let ctx = IntakeContext::new(request, task.work.clone());
                let result = tokio::select! {
                    biased;
                    _ = task.work.cancelled() => Err(Box::new(HandlerError::Cancelled) as BoxError),
                    result = task.handler.handle_dyn(&ctx) => result,
                };
                drop(permit);

                if let Err(err) = result {
                    tracing::warn!(
                        session = %ctx.request.session_id,
                        asset = %ctx.request.asset.asset_key(),
                        error = %err,
                        "intake handler failed"
                    );
                }
                task.push_follow_ups(&ctx).await;
            });
        }
        tracing::debug!(pending = receiver.len(), "intake loop exited");
    }

    async fn push_follow_ups(&self, ctx: &IntakeContext) {
        for response in ctx.responses.take() {
            for request in response.into_requests() {
                if self.listen.is_cancelled() {
                    return;
                }
                let sent = tokio::select! {
                    biased;
                    _ = self.listen.cancelled() => return,
                    sent = self.sender.send(request) => sent,
                };
                if sent.is_err() {
                    return;
                }
            }
        }
    }
}
