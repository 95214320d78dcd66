//! Asynchronous webhook delivery.
//!
//! `dispatch` fans an event out to the device's matching webhooks and
//! enqueues one task per webhook without ever waiting: when the bounded
//! queue is full the task is dropped and counted. A fixed pool of workers
//! drains the queue, signing each payload and retrying failed POSTs with
//! linear backoff. Every task ends in exactly one delivery log row.

use std::{
    sync::{
        Arc, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::{Duration, Instant},
};

use {
    reqwest::header::CONTENT_TYPE,
    serde::Serialize,
    serde_json::json,
    switchboard_common::{Event, EventType},
    switchboard_config::WebhooksConfig,
    tokio::{
        sync::{Mutex, mpsc, mpsc::error::TrySendError},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::{debug, error, info, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, histogram, webhooks as webhook_metrics};

use crate::{
    egress::EgressPolicy,
    error::WebhookError,
    model::{DeliveryStatus, Webhook},
    signing::{EVENT_HEADER, HUB_SIGNATURE_HEADER, SIGNATURE_HEADER, USER_AGENT, signature_header},
    store::WebhookStore,
};

/// One (webhook, event) pairing waiting for delivery.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    pub webhook: Webhook,
    pub event: Arc<Event>,
}

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub enabled: bool,
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry_limit: u32,
    pub retry_base_delay: Duration,
    pub request_timeout: Duration,
    pub egress: EgressPolicy,
}

impl From<&WebhooksConfig> for EngineSettings {
    fn from(config: &WebhooksConfig) -> Self {
        Self {
            enabled: config.enabled,
            workers: config.workers,
            queue_capacity: config.queue_capacity,
            retry_limit: config.retry_limit,
            retry_base_delay: config.retry_base_delay(),
            request_timeout: config.request_timeout(),
            egress: EgressPolicy::from(&config.egress),
        }
    }
}

/// What happened to a single `dispatch` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchSummary {
    /// Active webhooks subscribed to the event type.
    pub matched: usize,
    pub enqueued: usize,
    /// Dropped because the queue was full or the engine was shutting down.
    pub dropped: usize,
}

/// Terminal result of one delivery task, as written to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

// ── Stats ────────────────────────────────────────────────────────────────────

/// In-process counters, readable without a metrics recorder.
#[derive(Debug, Default)]
pub struct EngineStats {
    enqueued: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

// ── Engine ───────────────────────────────────────────────────────────────────

struct Deliverer {
    store: Arc<dyn WebhookStore>,
    client: reqwest::Client,
    retry_limit: u32,
    retry_base_delay: Duration,
    egress: EgressPolicy,
    stats: Arc<EngineStats>,
}

pub struct WebhookEngine {
    deliverer: Arc<Deliverer>,
    store: Arc<dyn WebhookStore>,
    stats: Arc<EngineStats>,
    sender: RwLock<Option<mpsc::Sender<DeliveryTask>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    cancel: CancellationToken,
    enabled: bool,
}

impl WebhookEngine {
    /// Build the engine and, if enabled, start its workers. Must be called
    /// from within a tokio runtime.
    pub fn start(
        store: Arc<dyn WebhookStore>,
        settings: EngineSettings,
    ) -> Result<Arc<Self>, WebhookError> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        let stats = Arc::new(EngineStats::default());
        let deliverer = Arc::new(Deliverer {
            store: Arc::clone(&store),
            client,
            retry_limit: settings.retry_limit.max(1),
            retry_base_delay: settings.retry_base_delay,
            egress: settings.egress,
            stats: Arc::clone(&stats),
        });
        let cancel = CancellationToken::new();

        let (sender, workers) = if settings.enabled {
            let (tx, rx) = mpsc::channel(settings.queue_capacity.max(1));
            let rx = Arc::new(Mutex::new(rx));
            let workers = (0..settings.workers.max(1))
                .map(|id| {
                    tokio::spawn(worker_loop(
                        id,
                        Arc::clone(&rx),
                        Arc::clone(&deliverer),
                        cancel.clone(),
                    ))
                })
                .collect();
            info!(
                workers = settings.workers.max(1),
                queue_capacity = settings.queue_capacity,
                retry_limit = settings.retry_limit,
                "webhook engine started"
            );
            (Some(tx), workers)
        } else {
            info!("webhook engine disabled");
            (None, Vec::new())
        };

        Ok(Arc::new(Self {
            deliverer,
            store,
            stats,
            sender: RwLock::new(sender),
            workers: Mutex::new(workers),
            cancel,
            enabled: settings.enabled,
        }))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    fn sender(&self) -> Option<mpsc::Sender<DeliveryTask>> {
        self.sender
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Enqueue the event for every active webhook of its device that
    /// subscribes to its type. Never blocks on the queue and never fails:
    /// problems are logged and reflected in the summary.
    pub async fn dispatch(&self, event: &Event) -> DispatchSummary {
        let Some(sender) = self.sender() else {
            return DispatchSummary::default();
        };
        let webhooks = match self.store.active_webhooks(&event.device_id).await {
            Ok(webhooks) => webhooks,
            Err(e) => {
                error!(device_id = %event.device_id, error = %e, "failed to load webhooks");
                return DispatchSummary::default();
            },
        };

        let event = Arc::new(event.clone());
        let mut summary = DispatchSummary::default();
        for webhook in webhooks
            .into_iter()
            .filter(|w| w.active && w.subscribes_to(event.event_type))
        {
            summary.matched += 1;
            self.enqueue(
                &sender,
                DeliveryTask {
                    webhook,
                    event: Arc::clone(&event),
                },
                &mut summary,
            );
        }
        if summary.matched > 0 {
            debug!(
                device_id = %event.device_id,
                event = %event.event_type,
                matched = summary.matched,
                enqueued = summary.enqueued,
                "event dispatched"
            );
        }
        summary
    }

    /// Enqueue a `webhook.test` event for one webhook, ignoring its
    /// subscriptions.
    pub fn dispatch_test(&self, webhook: &Webhook) -> DispatchSummary {
        let mut summary = DispatchSummary {
            matched: 1,
            ..Default::default()
        };
        let Some(sender) = self.sender() else {
            summary.dropped = 1;
            return summary;
        };
        self.enqueue(&sender, Self::test_task(webhook), &mut summary);
        summary
    }

    /// The `webhook.test` delivery for one webhook.
    pub fn test_task(webhook: &Webhook) -> DeliveryTask {
        let event = Event::new(
            EventType::WebhookTest,
            webhook.device_id.clone(),
            json!({
                "webhook_id": webhook.id,
                "message": "test delivery",
            }),
        );
        DeliveryTask {
            webhook: webhook.clone(),
            event: Arc::new(event),
        }
    }

    fn enqueue(
        &self,
        sender: &mpsc::Sender<DeliveryTask>,
        task: DeliveryTask,
        summary: &mut DispatchSummary,
    ) {
        match sender.try_send(task) {
            Ok(()) => {
                summary.enqueued += 1;
                self.stats.enqueued.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!(webhook_metrics::DISPATCHED_TOTAL).increment(1);
            },
            Err(TrySendError::Full(task)) => {
                summary.dropped += 1;
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!(webhook_metrics::DROPPED_TOTAL).increment(1);
                warn!(
                    webhook_id = %task.webhook.id,
                    event = %task.event.event_type,
                    "webhook queue full, dropping delivery"
                );
            },
            Err(TrySendError::Closed(task)) => {
                summary.dropped += 1;
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                debug!(webhook_id = %task.webhook.id, "webhook engine stopped, dropping delivery");
            },
        }
    }

    /// Run one task to completion on the caller's task.
    pub async fn deliver(&self, task: DeliveryTask) -> DeliveryOutcome {
        self.deliverer.deliver(task).await
    }

    /// Stop accepting tasks, signal the workers and wait for in-flight
    /// deliveries to finish. Tasks still queued are abandoned.
    pub async fn shutdown(&self) {
        self.sender
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.cancel.cancel();
        let workers = std::mem::take(&mut *self.workers.lock().await);
        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "webhook worker panicked");
            }
        }
        if self.enabled {
            info!("webhook engine stopped");
        }
    }
}

async fn worker_loop(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<DeliveryTask>>>,
    deliverer: Arc<Deliverer>,
    cancel: CancellationToken,
) {
    loop {
        let task = {
            let mut rx = queue.lock().await;
            tokio::select! {
                _ = cancel.cancelled() => None,
                task = rx.recv() => task,
            }
        };
        let Some(task) = task else {
            break;
        };
        deliverer.deliver(task).await;
    }
    debug!(worker = id, "webhook worker stopped");
}

// ── Delivery ─────────────────────────────────────────────────────────────────

impl Deliverer {
    async fn deliver(&self, task: DeliveryTask) -> DeliveryOutcome {
        let DeliveryTask { webhook, event } = task;
        let started = Instant::now();

        if let Err(violation) = self.egress.check(&webhook.url) {
            warn!(
                webhook_id = %webhook.id,
                error = %violation,
                "webhook url rejected by egress policy"
            );
            return self
                .finish(&webhook, &event, started, DeliveryOutcome {
                    status: DeliveryStatus::Failed,
                    attempts: 0,
                    last_error: Some(violation.to_string()),
                })
                .await;
        }

        let prepared = serde_json::to_vec(&*event)
            .map_err(WebhookError::from)
            .and_then(|payload| {
                let signature = signature_header(&webhook.secret, &payload)?;
                Ok((payload, signature))
            });
        let (payload, signature) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(webhook_id = %webhook.id, error = %e, "failed to prepare webhook payload");
                return self
                    .finish(&webhook, &event, started, DeliveryOutcome {
                        status: DeliveryStatus::Failed,
                        attempts: 0,
                        last_error: Some(e.to_string()),
                    })
                    .await;
            },
        };

        let mut last_error = None;
        for attempt in 1..=self.retry_limit {
            #[cfg(feature = "metrics")]
            counter!(webhook_metrics::ATTEMPTS_TOTAL).increment(1);
            match self.post(&webhook, &event, &payload, &signature).await {
                Ok(()) => {
                    debug!(webhook_id = %webhook.id, attempt, "webhook delivered");
                    return self
                        .finish(&webhook, &event, started, DeliveryOutcome {
                            status: DeliveryStatus::Success,
                            attempts: attempt,
                            last_error: None,
                        })
                        .await;
                },
                Err(e) => {
                    debug!(webhook_id = %webhook.id, attempt, error = %e, "delivery attempt failed");
                    last_error = Some(e);
                    if attempt < self.retry_limit {
                        tokio::time::sleep(self.retry_base_delay * attempt).await;
                    }
                },
            }
        }

        warn!(
            webhook_id = %webhook.id,
            event = %event.event_type,
            attempts = self.retry_limit,
            error = last_error.as_deref().unwrap_or(""),
            "webhook delivery failed"
        );
        self.finish(&webhook, &event, started, DeliveryOutcome {
            status: DeliveryStatus::Failed,
            attempts: self.retry_limit,
            last_error,
        })
        .await
    }

    async fn post(
        &self,
        webhook: &Webhook,
        event: &Event,
        payload: &[u8],
        signature: &str,
    ) -> Result<(), String> {
        let response = self
            .client
            .post(&webhook.url)
            .header(CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(HUB_SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, event.event_type.as_str())
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| e.to_string())?;
        let status = response.status();
        // Drain so the connection can be reused.
        let _ = response.bytes().await;
        if status.is_success() {
            Ok(())
        } else {
            Err(format!("HTTP {status}"))
        }
    }

    async fn finish(
        &self,
        webhook: &Webhook,
        event: &Event,
        started: Instant,
        outcome: DeliveryOutcome,
    ) -> DeliveryOutcome {
        match outcome.status {
            DeliveryStatus::Success => {
                self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!(webhook_metrics::DELIVERED_TOTAL).increment(1);
            },
            _ => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                #[cfg(feature = "metrics")]
                counter!(webhook_metrics::FAILED_TOTAL).increment(1);
            },
        }
        #[cfg(feature = "metrics")]
        histogram!(webhook_metrics::DELIVERY_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        #[cfg(not(feature = "metrics"))]
        let _ = started;

        if let Err(e) = self
            .store
            .log_delivery(
                &webhook.id,
                event.event_type,
                outcome.status,
                outcome.attempts,
                outcome.last_error.as_deref(),
            )
            .await
        {
            error!(webhook_id = %webhook.id, error = %e, "failed to write delivery log");
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use {
        super::*,
        crate::{signing::verify_signature, sqlite::tests::memory_store},
        axum::{
            Router,
            body::Bytes,
            extract::State,
            http::{HeaderMap, StatusCode},
            routing::post,
        },
        serde_json::Value,
    };

    #[derive(Default)]
    struct Receiver {
        hits: AtomicUsize,
        /// Respond 2xx starting at this hit number (1-based). 0 never succeeds.
        succeed_from: usize,
        last: std::sync::Mutex<Option<(HeaderMap, Bytes)>>,
    }

    async fn receive(
        State(state): State<Arc<Receiver>>,
        headers: HeaderMap,
        body: Bytes,
    ) -> StatusCode {
        let hit = state.hits.fetch_add(1, Ordering::SeqCst) + 1;
        *state.last.lock().unwrap() = Some((headers, body));
        if state.succeed_from != 0 && hit >= state.succeed_from {
            StatusCode::OK
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }

    async fn serve(receiver: Arc<Receiver>) -> String {
        let app = Router::new()
            .route("/hook", post(receive))
            .with_state(receiver);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/hook")
    }

    fn settings(enabled: bool) -> EngineSettings {
        EngineSettings {
            enabled,
            workers: 2,
            queue_capacity: 16,
            retry_limit: 3,
            retry_base_delay: Duration::from_millis(10),
            request_timeout: Duration::from_secs(5),
            egress: EgressPolicy::permissive(),
        }
    }

    async fn engine_with(settings: EngineSettings) -> (Arc<dyn WebhookStore>, Arc<WebhookEngine>) {
        let store: Arc<dyn WebhookStore> = Arc::new(memory_store().await);
        let engine = WebhookEngine::start(Arc::clone(&store), settings).unwrap();
        (store, engine)
    }

    /// Workers log asynchronously; poll until `n` rows exist.
    async fn wait_for_logs(
        store: &Arc<dyn WebhookStore>,
        webhook_id: &str,
        n: usize,
    ) -> Vec<crate::model::DeliveryLog> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let logs = store.delivery_logs(webhook_id, 10).await.unwrap();
                if logs.len() >= n {
                    return logs;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap()
    }

    fn message_event(device: &str) -> Event {
        Event::new(
            EventType::MessageReceived,
            device,
            json!({ "text": "hello" }),
        )
    }

    #[tokio::test]
    async fn test_always_failing_endpoint_uses_every_attempt() {
        let receiver = Arc::new(Receiver::default());
        let url = serve(Arc::clone(&receiver)).await;
        let (store, engine) = engine_with(settings(false)).await;
        let webhook = store.create_webhook("dev-1", &url, "s", &[]).await.unwrap();

        let outcome = engine
            .deliver(DeliveryTask {
                webhook: webhook.clone(),
                event: Arc::new(message_event("dev-1")),
            })
            .await;

        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(receiver.hits.load(Ordering::SeqCst), 3);

        let logs = store.delivery_logs(&webhook.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Failed);
        assert_eq!(logs[0].attempt_count, 3);
        assert!(logs[0].last_error.as_deref().unwrap().contains("500"));
    }

    #[tokio::test]
    async fn test_success_on_second_attempt_stops_retrying() {
        let receiver = Arc::new(Receiver {
            succeed_from: 2,
            ..Default::default()
        });
        let url = serve(Arc::clone(&receiver)).await;
        let (store, engine) = engine_with(settings(false)).await;
        let webhook = store.create_webhook("dev-1", &url, "s", &[]).await.unwrap();

        let outcome = engine
            .deliver(DeliveryTask {
                webhook: webhook.clone(),
                event: Arc::new(message_event("dev-1")),
            })
            .await;

        assert_eq!(outcome.status, DeliveryStatus::Success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(receiver.hits.load(Ordering::SeqCst), 2);

        let logs = store.delivery_logs(&webhook.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].status, DeliveryStatus::Success);
        assert_eq!(logs[0].attempt_count, 2);
        assert_eq!(engine.stats().delivered, 1);
    }

    #[tokio::test]
    async fn test_request_is_signed() {
        let receiver = Arc::new(Receiver {
            succeed_from: 1,
            ..Default::default()
        });
        let url = serve(Arc::clone(&receiver)).await;
        let (store, engine) = engine_with(settings(false)).await;
        let webhook = store
            .create_webhook("dev-1", &url, "topsecret", &[])
            .await
            .unwrap();

        engine
            .deliver(DeliveryTask {
                webhook,
                event: Arc::new(message_event("dev-1")),
            })
            .await;

        let (headers, body) = receiver.last.lock().unwrap().clone().unwrap();
        let signature = headers[SIGNATURE_HEADER].to_str().unwrap();
        assert!(verify_signature("topsecret", &body, signature));
        assert_eq!(headers[HUB_SIGNATURE_HEADER], headers[SIGNATURE_HEADER]);
        assert_eq!(headers[EVENT_HEADER], "message.received");
        assert_eq!(headers["content-type"], "application/json");
        assert!(
            headers["user-agent"]
                .to_str()
                .unwrap()
                .starts_with("switchboard-webhooks/")
        );

        let json: Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["event_type"], "message.received");
        assert_eq!(json["device_id"], "dev-1");
        assert_eq!(json["data"]["text"], "hello");
        assert!(json["timestamp"].as_str().is_some());
    }

    #[tokio::test]
    async fn test_egress_violation_fails_without_attempts() {
        let (store, _) = engine_with(settings(false)).await;
        let strict = WebhookEngine::start(Arc::clone(&store), EngineSettings {
            egress: EgressPolicy::default(),
            ..settings(false)
        })
        .unwrap();
        let receiver = Arc::new(Receiver::default());
        let url = serve(Arc::clone(&receiver)).await;
        // Stored directly, bypassing create-time validation.
        let webhook = store.create_webhook("dev-1", &url, "s", &[]).await.unwrap();

        let outcome = strict
            .deliver(DeliveryTask {
                webhook: webhook.clone(),
                event: Arc::new(message_event("dev-1")),
            })
            .await;

        assert_eq!(outcome.status, DeliveryStatus::Failed);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(receiver.hits.load(Ordering::SeqCst), 0);
        let logs = store.delivery_logs(&webhook.id, 10).await.unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].attempt_count, 0);
    }

    #[tokio::test]
    async fn test_dispatch_filters_by_event_type() {
        let receiver = Arc::new(Receiver {
            succeed_from: 1,
            ..Default::default()
        });
        let url = serve(Arc::clone(&receiver)).await;
        let (store, engine) = engine_with(settings(true)).await;
        let webhook = store
            .create_webhook("dev-1", &url, "s", &[EventType::MessageReceived])
            .await
            .unwrap();

        let summary = engine.dispatch(&message_event("dev-1")).await;
        assert_eq!(summary, DispatchSummary {
            matched: 1,
            enqueued: 1,
            dropped: 0,
        });

        let connected = Event::new(EventType::Connected, "dev-1", json!({}));
        assert_eq!(engine.dispatch(&connected).await, DispatchSummary::default());

        // Other devices' webhooks are not considered.
        assert_eq!(
            engine.dispatch(&message_event("dev-2")).await,
            DispatchSummary::default()
        );

        let logs = wait_for_logs(&store, &webhook.id, 1).await;
        assert_eq!(logs[0].event_type, "message.received");
        assert_eq!(receiver.hits.load(Ordering::SeqCst), 1);
        assert_eq!(engine.stats().delivered, 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_disabled_engine_skips_dispatch() {
        let (store, engine) = engine_with(settings(false)).await;
        store
            .create_webhook("dev-1", "https://example.com/hook", "s", &[])
            .await
            .unwrap();

        assert!(!engine.is_enabled());
        assert_eq!(
            engine.dispatch(&message_event("dev-1")).await,
            DispatchSummary::default()
        );
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        // Accepts connections but never answers, so the single worker stays
        // busy until the request timeout.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let (store, engine) = engine_with(EngineSettings {
            workers: 1,
            queue_capacity: 1,
            retry_limit: 1,
            request_timeout: Duration::from_secs(2),
            ..settings(true)
        })
        .await;
        for i in 0..5 {
            store
                .create_webhook("dev-1", &format!("http://{addr}/hook/{i}"), "s", &[])
                .await
                .unwrap();
        }

        let started = Instant::now();
        let summary = tokio::time::timeout(
            Duration::from_secs(1),
            engine.dispatch(&message_event("dev-1")),
        )
        .await
        .unwrap();
        assert!(started.elapsed() < Duration::from_secs(1));

        assert_eq!(summary.matched, 5);
        assert_eq!(summary.enqueued + summary.dropped, 5);
        // At most one task in the worker plus one in the queue.
        assert!(summary.enqueued <= 2, "{summary:?}");
        assert!(summary.dropped >= 3, "{summary:?}");
        assert_eq!(engine.stats().dropped, summary.dropped as u64);
    }

    #[tokio::test]
    async fn test_dispatch_test_ignores_subscriptions() {
        let receiver = Arc::new(Receiver {
            succeed_from: 1,
            ..Default::default()
        });
        let url = serve(Arc::clone(&receiver)).await;
        let (store, engine) = engine_with(settings(true)).await;
        let webhook = store
            .create_webhook("dev-1", &url, "s", &[EventType::CallOffer])
            .await
            .unwrap();

        let summary = engine.dispatch_test(&webhook);
        assert_eq!(summary.enqueued, 1);

        let logs = wait_for_logs(&store, &webhook.id, 1).await;
        assert_eq!(logs[0].event_type, "webhook.test");
        let (headers, _) = receiver.last.lock().unwrap().clone().unwrap();
        assert_eq!(headers[EVENT_HEADER], "webhook.test");
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_dispatch_after_shutdown_is_noop() {
        let (store, engine) = engine_with(settings(true)).await;
        let webhook = store
            .create_webhook("dev-1", "https://example.com/hook", "s", &[])
            .await
            .unwrap();
        engine.shutdown().await;

        assert_eq!(
            engine.dispatch(&message_event("dev-1")).await,
            DispatchSummary::default()
        );
        assert_eq!(engine.dispatch_test(&webhook).dropped, 1);
    }
}
