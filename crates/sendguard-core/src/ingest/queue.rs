//! Bounded webhook queue and its worker.

use std::collections::HashMap;

use sendguard_acct::{AccountingParser, record_from_fields};
use sendguard_arf::FeedbackReport;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::sinks::Fanout;
use super::{IngestEvent, UnsubscribeRequest};
use crate::tracker::EngagementEvent;
use crate::{Error, Result};

/// Outcome of a batch submission.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Records queued.
    pub accepted: usize,
    /// Records that could not be parsed.
    pub rejected: usize,
}

/// Front door for inbound events.
///
/// Submissions never wait: a full queue is reported as [`Error::QueueFull`]
/// so the webhook can answer 503 and the sender retries.
pub struct Ingestor {
    tx: mpsc::Sender<IngestEvent>,
    capacity: usize,
    parser: AccountingParser,
}

/// Drains the ingest queue into the sinks.
pub struct IngestWorker {
    rx: mpsc::Receiver<IngestEvent>,
    fanout: Fanout,
}

impl Ingestor {
    /// Creates the queue and the worker that drains it into `fanout`.
    #[must_use]
    pub fn new(capacity: usize, fanout: Fanout) -> (Self, IngestWorker) {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                capacity,
                parser: AccountingParser::new(),
            },
            IngestWorker { rx, fanout },
        )
    }

    /// Events waiting in the queue.
    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.capacity - self.tx.capacity()
    }

    /// Queues one event.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` if the queue is full, or `Shutdown` once the
    /// worker has stopped.
    pub fn submit(&self, event: IngestEvent) -> Result<()> {
        self.tx.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => Error::QueueFull,
            mpsc::error::TrySendError::Closed(_) => Error::Shutdown,
        })
    }

    /// Queues accounting CSV lines. A header line switches the column layout
    /// for the lines after it.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` or `Shutdown` if a record cannot be queued; records
    /// before it remain queued.
    pub fn submit_accounting_csv(&self, text: &str) -> Result<IngestReport> {
        let mut report = IngestReport::default();
        for result in self.parser.parse_document(text) {
            match result {
                Ok(record) => {
                    self.submit(IngestEvent::Accounting(Box::new(record)))?;
                    report.accepted += 1;
                }
                Err(e) => {
                    debug!(error = %e, "Rejected accounting line");
                    report.rejected += 1;
                }
            }
        }
        Ok(report)
    }

    /// Queues accounting records posted as a JSON object or array of objects.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the body is neither, or `QueueFull` /
    /// `Shutdown` if a record cannot be queued.
    pub fn submit_accounting_json(&self, body: &Value) -> Result<IngestReport> {
        let objects: Vec<&serde_json::Map<String, Value>> = match body {
            Value::Object(object) => vec![object],
            Value::Array(items) => items.iter().filter_map(Value::as_object).collect(),
            _ => {
                return Err(Error::InvalidInput(
                    "expected a JSON object or array of objects".to_string(),
                ));
            }
        };
        let skipped = match body {
            Value::Array(items) => items.len() - objects.len(),
            _ => 0,
        };

        let mut report = IngestReport {
            rejected: skipped,
            ..IngestReport::default()
        };
        for object in objects {
            let fields: HashMap<String, String> = object
                .iter()
                .filter_map(|(k, v)| {
                    let value = match v {
                        Value::String(s) => s.clone(),
                        Value::Number(n) => n.to_string(),
                        Value::Bool(b) => b.to_string(),
                        _ => return None,
                    };
                    Some((k.clone(), value))
                })
                .collect();

            match record_from_fields(&fields) {
                Ok(record) => {
                    self.submit(IngestEvent::Accounting(Box::new(record)))?;
                    report.accepted += 1;
                }
                Err(e) => {
                    debug!(error = %e, "Rejected accounting object");
                    report.rejected += 1;
                }
            }
        }
        Ok(report)
    }

    /// Parses and queues an abuse report.
    ///
    /// # Errors
    ///
    /// Returns `Report` if the message cannot be parsed, or `QueueFull` /
    /// `Shutdown` if it cannot be queued.
    pub fn submit_arf(&self, raw: &str) -> Result<()> {
        let report = FeedbackReport::parse(raw)?;
        self.submit(IngestEvent::Feedback(Box::new(report)))
    }

    /// Queues an unsubscribe.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` for an unusable address, or `QueueFull` /
    /// `Shutdown` if it cannot be queued.
    pub fn submit_unsubscribe(&self, request: UnsubscribeRequest) -> Result<()> {
        sendguard_acct::Address::new(&request.email)?;
        self.submit(IngestEvent::Unsubscribe(request))
    }

    /// Queues an open or click.
    ///
    /// # Errors
    ///
    /// Returns `QueueFull` or `Shutdown` if it cannot be queued.
    pub fn submit_engagement(&self, event: EngagementEvent) -> Result<()> {
        self.submit(IngestEvent::Engagement(event))
    }
}

impl IngestWorker {
    /// Drains the queue until `shutdown` flips to true, then finishes the
    /// events already queued.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Ingest worker started");
        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => self.fanout.dispatch(&event).await,
                    None => break,
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.rx.close();
        let mut drained = 0usize;
        while let Some(event) = self.rx.recv().await {
            self.fanout.dispatch(&event).await;
            drained += 1;
        }
        if drained > 0 {
            warn!(drained, "Drained queued events during shutdown");
        }
        info!("Ingest worker stopped");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;

    use super::*;
    use crate::ingest::AccountingSink;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<&'static str>>);

    #[async_trait]
    impl AccountingSink for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn handle(&self, event: &IngestEvent) {
            self.0.lock().unwrap().push(event.kind());
        }
    }

    #[test]
    fn test_full_queue_reported() {
        let (ingestor, _worker) = Ingestor::new(1, Fanout::new(Vec::new()));
        let csv = "d,2024-01-15 10:00:00+0000,,,a@gmail.com\nd,2024-01-15 10:00:01+0000,,,b@gmail.com\n";
        assert!(matches!(ingestor.submit_accounting_csv(csv), Err(Error::QueueFull)));
        assert_eq!(ingestor.queue_depth(), 1);
    }

    #[test]
    fn test_csv_counts_rejects() {
        let (ingestor, _worker) = Ingestor::new(10, Fanout::new(Vec::new()));
        let csv = "type,timeLogged,rcpt\nd,2024-01-15 10:00:00+0000,a@gmail.com\nx,2024-01-15 10:00:00+0000,b@gmail.com\nb,2024-01-15 10:00:00+0000,not-an-address\n";
        let report = ingestor.submit_accounting_csv(csv).unwrap();
        assert_eq!(report, IngestReport { accepted: 1, rejected: 2 });
    }

    #[test]
    fn test_json_object_and_array() {
        let (ingestor, _worker) = Ingestor::new(10, Fanout::new(Vec::new()));
        let body = serde_json::json!([
            {"type": "b", "rcpt": "a@yahoo.com", "dsnStatus": "5.1.1", "bounceCat": "bad-mailbox"},
            {"type": "d"},
            42
        ]);
        let report = ingestor.submit_accounting_json(&body).unwrap();
        assert_eq!(report, IngestReport { accepted: 1, rejected: 2 });
        assert!(ingestor.submit_accounting_json(&serde_json::json!("x")).is_err());
    }

    #[tokio::test]
    async fn test_worker_drains_on_shutdown() {
        let recorder = Arc::new(Recorder::default());
        let (ingestor, worker) = Ingestor::new(10, Fanout::new(vec![recorder.clone()]));
        let (tx, rx) = watch::channel(false);

        ingestor
            .submit_unsubscribe(UnsubscribeRequest {
                email: "a@b.com".to_string(),
                campaign_id: None,
                one_click: true,
                received_at: chrono::Utc::now(),
            })
            .unwrap();
        ingestor
            .submit_engagement(EngagementEvent {
                kind: crate::tracker::EngagementKind::Open,
                email: "a@b.com".to_string(),
                campaign_id: None,
                timestamp: None,
            })
            .unwrap();

        tx.send(true).unwrap();
        worker.run(rx).await;

        assert_eq!(*recorder.0.lock().unwrap(), vec!["unsubscribe", "engagement"]);
        assert!(matches!(
            ingestor.submit_engagement(EngagementEvent {
                kind: crate::tracker::EngagementKind::Click,
                email: "a@b.com".to_string(),
                campaign_id: None,
                timestamp: None,
            }),
            Err(Error::Shutdown)
        ));
    }

    #[test]
    fn test_unsubscribe_rejects_bad_address() {
        let (ingestor, _worker) = Ingestor::new(10, Fanout::new(Vec::new()));
        let result = ingestor.submit_unsubscribe(UnsubscribeRequest {
            email: "nobody".to_string(),
            campaign_id: None,
            one_click: false,
            received_at: chrono::Utc::now(),
        });
        assert!(matches!(result, Err(Error::Accounting(_))));
    }
}
