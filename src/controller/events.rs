//! Event dispatch for the controller.
//!
//! The host delivers lifecycle and traffic events through an explicit
//! dispatch table; every handler returns a future the host holds on to, so
//! teardown is deferred until outstanding cache work has completed. Handlers
//! for different events interleave at await points; within one handler the
//! work is strictly ordered.

use std::sync::Arc;

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::domain::{ControlMessage, FetchRequest};
use crate::store::StoreError;

use super::{CacheController, FetchOutcome, InstallError};

/// Backpressure bound on the host → controller event queue.
const EVENT_QUEUE_CAPACITY: usize = 256;

/// An event delivered to the controller by its host.
#[derive(Debug)]
pub enum WorkerEvent {
    Install,
    Activate,
    Fetch(FetchRequest),
    Message(ControlMessage),
}

/// What a completed handler produced.
#[derive(Debug)]
pub enum EventOutcome {
    Installed,
    Activated,
    Fetched(FetchOutcome),
    MessageHandled,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Install(#[from] InstallError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("controller event loop is not running")]
    Closed,
    #[error(transparent)]
    Controller(#[from] ControllerError),
}

impl CacheController {
    /// The dispatch table: event kind → handler future.
    ///
    /// Futures are `'static` so the host can spawn them and keep the
    /// controller alive until they resolve.
    pub fn dispatch(
        self: &Arc<Self>,
        event: WorkerEvent,
    ) -> BoxFuture<'static, Result<EventOutcome, ControllerError>> {
        let controller = Arc::clone(self);
        match event {
            WorkerEvent::Install => Box::pin(async move {
                controller.install().await?;
                Ok(EventOutcome::Installed)
            }),
            WorkerEvent::Activate => Box::pin(async move {
                controller.activate().await?;
                Ok(EventOutcome::Activated)
            }),
            WorkerEvent::Fetch(request) => Box::pin(async move {
                let outcome = controller.handle_fetch(&request).await;
                Ok(EventOutcome::Fetched(outcome))
            }),
            WorkerEvent::Message(message) => Box::pin(async move {
                controller.handle_message(message).await;
                Ok(EventOutcome::MessageHandled)
            }),
        }
    }
}

struct Envelope {
    event: WorkerEvent,
    reply: Option<oneshot::Sender<Result<EventOutcome, ControllerError>>>,
}

/// Submits events into a running [`EventLoop`].
#[derive(Clone)]
pub struct EventLoopHandle {
    sender: mpsc::Sender<Envelope>,
}

impl EventLoopHandle {
    /// Deliver an event and wait for its handler to complete.
    pub async fn submit(&self, event: WorkerEvent) -> Result<EventOutcome, DispatchError> {
        let (reply, outcome) = oneshot::channel();
        self.sender
            .send(Envelope {
                event,
                reply: Some(reply),
            })
            .await
            .map_err(|_| DispatchError::Closed)?;
        outcome
            .await
            .map_err(|_| DispatchError::Closed)?
            .map_err(DispatchError::from)
    }

    /// Deliver an event without waiting for completion.
    pub async fn post(&self, event: WorkerEvent) -> Result<(), DispatchError> {
        self.sender
            .send(Envelope { event, reply: None })
            .await
            .map_err(|_| DispatchError::Closed)
    }
}

/// Single-threaded, event-driven host loop for one controller.
///
/// Each received event is spawned to completion; events from concurrent
/// clients interleave at await points. Once every handle is dropped the
/// loop drains its outstanding handlers before returning, so in-flight
/// cache writes are never silently dropped at shutdown.
pub struct EventLoop {
    controller: Arc<CacheController>,
    receiver: mpsc::Receiver<Envelope>,
    pending: JoinSet<()>,
}

impl EventLoop {
    pub fn new(controller: Arc<CacheController>) -> (Self, EventLoopHandle) {
        let (sender, receiver) = mpsc::channel(EVENT_QUEUE_CAPACITY);
        (
            Self {
                controller,
                receiver,
                pending: JoinSet::new(),
            },
            EventLoopHandle { sender },
        )
    }

    pub async fn run(mut self) {
        while let Some(envelope) = self.receiver.recv().await {
            let handler = self.controller.dispatch(envelope.event);
            let reply = envelope.reply;
            self.pending.spawn(async move {
                let result = handler.await;
                match reply {
                    Some(reply) => {
                        // The submitter may have given up waiting; that does
                        // not cancel the handler's side effects.
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(error) = result {
                            warn!(error = %error, "posted event handler failed");
                        }
                    }
                }
            });

            // Reap handlers that already finished.
            while self.pending.try_join_next().is_some() {}
        }

        debug!(
            outstanding = self.pending.len(),
            "event loop closing, draining handlers"
        );
        while self.pending.join_next().await.is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use bytes::Bytes;
    use std::time::Duration;
    use url::Url;

    use crate::controller::{
        CacheMode, ControllerConfig, FetchError, LifecycleState, NetworkFetcher,
    };
    use crate::domain::ResponseSnapshot;
    use crate::store::MemoryStore;

    use super::*;

    /// Fetcher that simulates a slow origin.
    struct SlowFetcher;

    #[async_trait]
    impl NetworkFetcher for SlowFetcher {
        async fn fetch(
            &self,
            _request: &FetchRequest,
            _mode: CacheMode,
        ) -> Result<ResponseSnapshot, FetchError> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(ResponseSnapshot::new(
                StatusCode::OK,
                Vec::new(),
                Bytes::from_static(b"slow"),
            ))
        }
    }

    fn controller(store: Arc<MemoryStore>) -> Arc<CacheController> {
        Arc::new(CacheController::new(
            ControllerConfig {
                origin: Url::parse("http://127.0.0.1:3000").expect("origin"),
                app_prefix: "app".to_string(),
                generation: "v1".to_string(),
                static_manifest: vec!["/".to_string()],
                api_prefix: "/api/".to_string(),
                image_prefixes: vec!["/uploads/".to_string()],
            },
            store,
            Arc::new(SlowFetcher),
        ))
    }

    #[tokio::test]
    async fn lifecycle_events_run_through_the_loop() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(store.clone());
        let (event_loop, handle) = EventLoop::new(controller.clone());
        let loop_task = tokio::spawn(event_loop.run());

        assert!(matches!(
            handle.submit(WorkerEvent::Install).await.expect("install"),
            EventOutcome::Installed
        ));
        assert!(matches!(
            handle.submit(WorkerEvent::Activate).await.expect("activate"),
            EventOutcome::Activated
        ));
        assert_eq!(controller.state(), LifecycleState::Active);

        drop(handle);
        loop_task.await.expect("loop task");
    }

    #[tokio::test]
    async fn loop_drains_in_flight_handlers_on_shutdown() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(store.clone());
        controller.install().await.expect("install");
        controller.activate().await.expect("activate");

        let (event_loop, handle) = EventLoop::new(controller);
        let loop_task = tokio::spawn(event_loop.run());

        // Fire-and-forget a fetch whose handler writes back after a delay,
        // then drop the handle immediately.
        let request = FetchRequest::get(
            Url::parse("http://127.0.0.1:3000/late.css").expect("url"),
        );
        handle
            .post(WorkerEvent::Fetch(request))
            .await
            .expect("post");
        drop(handle);

        // run() must not return until the handler's cache write landed:
        // the app-shell root from install plus the late fill.
        loop_task.await.expect("loop task");
        assert_eq!(store.partition_len("app-static-v1"), Some(2));
    }

    #[tokio::test]
    async fn submit_after_shutdown_reports_closed() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(store);
        let (event_loop, handle) = EventLoop::new(controller);
        drop(event_loop);

        let result = handle.submit(WorkerEvent::Install).await;
        assert!(matches!(result, Err(DispatchError::Closed)));
    }
}
