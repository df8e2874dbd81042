//! Relay message ingestion.
//!
//! The ingestor owns the operator's single relay connection. It subscribes
//! to the report topic after every (re)connect, turns each report frame
//! into its own task and sends one response per processed report.
//!
//! ## Scheduling
//!
//! Reports from different senders run concurrently. Reports from the same
//! sender take turns on a per-sender lane in arrival order: [`dispatch`]
//! numbers each report on its lane before spawning it, so a sender's pin
//! retention is always settled before its next report starts. A report
//! that runs past [`IngestorConfig::report_timeout`] is abandoned: its
//! pending pins are evicted before the lane is released.
//!
//! [`dispatch`]: MessageIngestor::dispatch
//!
//! The ingestor is also the [`EventSubscription`] a
//! [`rrs_relay::SubscriptionSupervisor`] keeps alive: the subscription is live
//! between a successful subscribe frame and the next disconnect.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use rrs_core::Address;
use rrs_relay::{
    EventSubscription, InboundMessage, RelayError, RelayEvent, RelayTransport, ReportPayload,
    ReportResponse, ResponseData, SubscribeMessage, REPORT_TOPIC,
};

use crate::error::{OperatorError, Result};
use crate::operator::{ReportHandler, ReportOutcome};

/// Configuration for the ingestor.
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Topic devices publish reports on.
    pub topic: String,
    /// Deadline for one report. `None` lets reports run as long as needed.
    pub report_timeout: Option<Duration>,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            topic: REPORT_TOPIC.to_string(),
            report_timeout: None,
        }
    }
}

/// Arrival-ordered queue of one sender's reports.
struct Lane {
    next: AtomicU64,
    serving: watch::Sender<u64>,
}

impl Lane {
    fn new() -> Self {
        let (serving, _) = watch::channel(0);
        Self {
            next: AtomicU64::new(0),
            serving,
        }
    }

    /// Take the next place in line.
    fn claim(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// Wait until `place` is served. The turn passes on when dropped.
    async fn turn(&self, place: u64) -> Turn<'_> {
        let mut serving = self.serving.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = serving.wait_for(|&current| current == place).await;
        Turn { lane: self }
    }
}

struct Turn<'a> {
    lane: &'a Lane,
}

impl Drop for Turn<'_> {
    fn drop(&mut self) {
        self.lane.serving.send_modify(|current| *current += 1);
    }
}

/// Reads reports from the relay and answers them.
pub struct MessageIngestor {
    transport: Arc<dyn RelayTransport>,
    handler: Arc<dyn ReportHandler>,
    lanes: Mutex<HashMap<Address, Arc<Lane>>>,
    listening: AtomicBool,
    config: IngestorConfig,
}

impl MessageIngestor {
    /// Create an ingestor.
    pub fn new(
        transport: Arc<dyn RelayTransport>,
        handler: Arc<dyn ReportHandler>,
        config: IngestorConfig,
    ) -> Self {
        Self {
            transport,
            handler,
            lanes: Mutex::new(HashMap::new()),
            listening: AtomicBool::new(false),
            config,
        }
    }

    /// Consume transport events until the transport closes.
    pub async fn run(self: Arc<Self>) -> Result<()> {
        loop {
            match self.transport.recv().await {
                Ok(RelayEvent::Connected) => {
                    if let Err(e) = self.listen().await {
                        warn!(topic = %self.config.topic, error = %e, "subscribe failed");
                    }
                }
                Ok(RelayEvent::Text(text)) => {
                    self.dispatch(&text);
                }
                Ok(RelayEvent::Disconnected(reason)) => {
                    self.listening.store(false, Ordering::SeqCst);
                    warn!(%reason, "relay disconnected");
                }
                Err(RelayError::Closed) => {
                    info!("relay transport closed");
                    return Ok(());
                }
                Err(e) => warn!(error = %e, "relay receive failed"),
            }
        }
    }

    /// Send the subscribe frame for the report topic.
    async fn listen(&self) -> rrs_relay::Result<()> {
        let message = serde_json::to_string(&SubscribeMessage::topic(&self.config.topic))?;
        self.transport.send(message).await?;
        self.listening.store(true, Ordering::SeqCst);
        info!(topic = %self.config.topic, "subscribed to report topic");
        Ok(())
    }

    /// Handle one inbound text frame. Returns the report task, if one was
    /// started.
    pub fn dispatch(self: &Arc<Self>, text: &str) -> Option<JoinHandle<()>> {
        let payload = match InboundMessage::parse(text) {
            Ok(InboundMessage::Report { data }) => data,
            Ok(InboundMessage::Heartbeat { .. }) => return None,
            Ok(InboundMessage::Other(_)) => {
                debug!("ignoring frame without a report");
                return None;
            }
            Err(e) => {
                warn!(error = %e, "dropping unparsable frame");
                return None;
            }
        };

        let sender = match Address::parse(&payload.address) {
            Ok(sender) => sender,
            Err(e) => {
                warn!(address = %payload.address, error = %e, "dropping report from invalid address");
                return None;
            }
        };

        let (lane, place) = self.claim_lane(&sender);
        let ingestor = Arc::clone(self);
        Some(tokio::spawn(async move {
            ingestor.process(sender, payload, lane, place).await;
        }))
    }

    async fn process(&self, sender: Address, payload: ReportPayload, lane: Arc<Lane>, place: u64) {
        {
            let _turn = lane.turn(place).await;
            debug!(sender = %sender, id = %payload.id, "processing report");

            let work = self.handler.handle(&sender, &payload.report);
            let result = match self.config.report_timeout {
                Some(limit) => match tokio::time::timeout(limit, work).await {
                    Ok(result) => result,
                    Err(_) => {
                        self.handler.abandon(&sender).await;
                        Err(OperatorError::Timeout(limit))
                    }
                },
                None => work.await,
            };

            match result {
                Ok(Some(outcome)) => self.respond(&payload, outcome).await,
                Ok(None) => {}
                Err(e) => error!(sender = %sender, id = %payload.id, error = %e, "report failed"),
            }
        }
        drop(lane);
        self.release_lane(&sender);
    }

    async fn respond(&self, payload: &ReportPayload, outcome: ReportOutcome) {
        let data = ResponseData {
            datalog: outcome.paid,
            ticket_ids: outcome.ticket_ids.iter().map(|t| t.0).collect(),
            id: payload.id.clone(),
        };
        let response = ReportResponse::new(&self.config.topic, &payload.address, data);
        let sent = match response.to_text() {
            Ok(text) => self.transport.send(text).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            warn!(address = %payload.address, error = %e, "could not send report response");
        }
    }

    /// The sender's lane and this report's place on it.
    fn claim_lane(&self, sender: &Address) -> (Arc<Lane>, u64) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        let lane = Arc::clone(
            lanes
                .entry(sender.clone())
                .or_insert_with(|| Arc::new(Lane::new())),
        );
        let place = lane.claim();
        (lane, place)
    }

    /// Drop a sender's lane once nobody holds or waits on it.
    fn release_lane(&self, sender: &Address) {
        let mut lanes = self.lanes.lock().unwrap_or_else(PoisonError::into_inner);
        if lanes.get(sender).is_some_and(|lane| Arc::strong_count(lane) == 1) {
            lanes.remove(sender);
        }
    }

    /// Number of senders with a report running or waiting.
    pub fn active_lanes(&self) -> usize {
        self.lanes.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[async_trait]
impl EventSubscription for MessageIngestor {
    async fn subscribe(&self) -> rrs_relay::Result<()> {
        self.listen().await
    }

    async fn cancel(&self) -> rrs_relay::Result<()> {
        self.listening.store(false, Ordering::SeqCst);
        Ok(())
    }

    async fn is_alive(&self) -> bool {
        self.listening.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::RetentionOutcome;
    use rrs_core::{Keypair, TicketId};
    use rrs_relay::{
        MemoryRelay, RelayPeer, SubscriptionState, SubscriptionSupervisor, SupervisorConfig,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    struct FakeHandler {
        delay: Duration,
        seen: Mutex<Vec<Value>>,
        fail: bool,
        unregistered: bool,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        handled: AtomicUsize,
        abandoned: AtomicUsize,
    }

    #[async_trait]
    impl ReportHandler for FakeHandler {
        async fn handle(&self, _sender: &Address, report: &Value) -> Result<Option<ReportOutcome>> {
            self.seen.lock().unwrap().push(report.clone());
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.handled.fetch_add(1, Ordering::SeqCst);

            if self.fail {
                return Err(OperatorError::MissingDescription);
            }
            if self.unregistered {
                return Ok(None);
            }
            Ok(Some(ReportOutcome {
                ticket_ids: vec![TicketId(7)],
                paid: true,
                retention: RetentionOutcome::default(),
            }))
        }

        async fn abandon(&self, _sender: &Address) {
            self.abandoned.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn start(handler: Arc<FakeHandler>, config: IngestorConfig) -> (Arc<MessageIngestor>, RelayPeer) {
        let (relay, peer) = MemoryRelay::pair();
        let ingestor = Arc::new(MessageIngestor::new(Arc::new(relay), handler, config));
        (ingestor, peer)
    }

    fn report_frame(sender: &Address, id: &str) -> String {
        json!({"data": {"address": sender.as_str(), "report": format!("QmDir{id}"), "id": id}})
            .to_string()
    }

    fn sender(n: u8) -> Address {
        Keypair::from_seed(&[n; 32]).address()
    }

    #[tokio::test]
    async fn test_subscribes_on_every_connect() {
        let (ingestor, peer) = start(Arc::new(FakeHandler::default()), IngestorConfig::default());
        let task = tokio::spawn(Arc::clone(&ingestor).run());

        peer.connect();
        peer.disconnect("relay restart");
        peer.connect();
        for _ in 0..2 {
            let sent = peer.next_sent(Duration::from_secs(1)).await.unwrap();
            assert_eq!(sent, r#"{"protocols_to_listen":["/report"]}"#);
        }

        drop(peer);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_report_is_answered_with_echoed_id() {
        let handler = Arc::new(FakeHandler::default());
        let (ingestor, peer) = start(handler.clone(), IngestorConfig::default());
        let sender = sender(1);

        assert!(ingestor.dispatch(r#"{"peerId":"12D3KooW"}"#).is_none());
        assert!(ingestor.dispatch("not json").is_none());
        assert!(ingestor.dispatch(r#"{"data":{"address":"nope","report":"x"}}"#).is_none());
        ingestor
            .dispatch(&report_frame(&sender, "42"))
            .unwrap()
            .await
            .unwrap();

        let sent: Value =
            serde_json::from_str(&peer.next_sent(Duration::from_secs(1)).await.unwrap()).unwrap();
        assert_eq!(sent["protocol"], json!(format!("/report/{sender}")));
        assert_eq!(sent["data"], json!({"datalog": true, "ticket_ids": [7], "id": "42"}));
        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        assert_eq!(ingestor.active_lanes(), 0);
    }

    #[tokio::test]
    async fn test_unregistered_sender_gets_no_response() {
        let handler = Arc::new(FakeHandler {
            unregistered: true,
            ..FakeHandler::default()
        });
        let (ingestor, peer) = start(handler, IngestorConfig::default());

        ingestor.dispatch(&report_frame(&sender(1), "1")).unwrap().await.unwrap();
        assert!(peer.next_sent(Duration::from_millis(50)).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_same_sender_reports_take_turns() {
        let handler = Arc::new(FakeHandler {
            delay: Duration::from_millis(100),
            ..FakeHandler::default()
        });
        let (ingestor, _peer) = start(handler.clone(), IngestorConfig::default());
        let sender = sender(1);

        let first = ingestor.dispatch(&report_frame(&sender, "1")).unwrap();
        let second = ingestor.dispatch(&report_frame(&sender, "2")).unwrap();
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(handler.handled.load(Ordering::SeqCst), 2);
        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
        assert_eq!(ingestor.active_lanes(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_same_sender_reports_run_in_arrival_order() {
        let expected: Vec<Value> = (0..6).map(|n| json!(format!("QmDir{n}"))).collect();
        for _ in 0..100 {
            let handler = Arc::new(FakeHandler::default());
            let (ingestor, _peer) = start(handler.clone(), IngestorConfig::default());
            let sender = sender(1);

            let tasks: Vec<_> = (0..6)
                .map(|n| ingestor.dispatch(&report_frame(&sender, &n.to_string())).unwrap())
                .collect();
            for task in tasks {
                task.await.unwrap();
            }

            assert_eq!(*handler.seen.lock().unwrap(), expected);
            assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 1);
            assert_eq!(ingestor.active_lanes(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_senders_run_concurrently() {
        let handler = Arc::new(FakeHandler {
            delay: Duration::from_millis(100),
            ..FakeHandler::default()
        });
        let (ingestor, _peer) = start(handler.clone(), IngestorConfig::default());

        let first = ingestor.dispatch(&report_frame(&sender(1), "1")).unwrap();
        let second = ingestor.dispatch(&report_frame(&sender(2), "2")).unwrap();
        first.await.unwrap();
        second.await.unwrap();

        assert_eq!(handler.max_in_flight.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_report_is_abandoned() {
        let handler = Arc::new(FakeHandler {
            delay: Duration::from_secs(3600),
            ..FakeHandler::default()
        });
        let config = IngestorConfig {
            report_timeout: Some(Duration::from_secs(30)),
            ..IngestorConfig::default()
        };
        let (ingestor, peer) = start(handler.clone(), config);

        ingestor.dispatch(&report_frame(&sender(1), "1")).unwrap().await.unwrap();

        assert_eq!(handler.abandoned.load(Ordering::SeqCst), 1);
        assert_eq!(handler.handled.load(Ordering::SeqCst), 0);
        assert!(peer.next_sent(Duration::from_millis(10)).await.is_none());
    }

    #[tokio::test]
    async fn test_failed_report_is_not_answered() {
        let handler = Arc::new(FakeHandler {
            fail: true,
            ..FakeHandler::default()
        });
        let (ingestor, peer) = start(handler.clone(), IngestorConfig::default());

        ingestor.dispatch(&report_frame(&sender(1), "1")).unwrap().await.unwrap();

        assert_eq!(handler.handled.load(Ordering::SeqCst), 1);
        assert_eq!(handler.abandoned.load(Ordering::SeqCst), 0);
        assert!(peer.next_sent(Duration::from_millis(50)).await.is_none());
        assert_eq!(ingestor.active_lanes(), 0);
    }

    #[tokio::test]
    async fn test_supervisor_resubscribes_after_disconnect() {
        let (ingestor, peer) = start(Arc::new(FakeHandler::default()), IngestorConfig::default());
        let task = tokio::spawn(Arc::clone(&ingestor).run());
        let supervisor =
            SubscriptionSupervisor::new(ingestor.clone(), SupervisorConfig::default());

        peer.connect();
        peer.next_sent(Duration::from_secs(1)).await.unwrap();
        assert!(ingestor.is_alive().await);

        peer.disconnect("relay restart");
        tokio::time::timeout(Duration::from_secs(1), async {
            while ingestor.is_alive().await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        assert_eq!(supervisor.probe().await, SubscriptionState::Active);
        assert!(ingestor.is_alive().await);
        let sent = peer.next_sent(Duration::from_secs(1)).await.unwrap();
        assert_eq!(sent, r#"{"protocols_to_listen":["/report"]}"#);

        drop(peer);
        task.await.unwrap().unwrap();
    }
}
