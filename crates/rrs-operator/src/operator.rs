//! The report pipeline.
//!
//! [`Operator`] runs one report end to end: e-mail resolution, artifact
//! retrieval, classification, ticket reconciliation and the retention
//! decision. It holds no per-report state; everything a report touches is
//! either in the remotes or in the injected [`rrs_store::PinRetention`].

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};

use rrs_core::{Address, FormatRules, ProblemReport, ReportFormat, TicketId};

use crate::artifacts::{ArtifactStore, RetentionOutcome};
use crate::error::Result;
use crate::reconciler::TicketReconciler;

/// What a processed report produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub ticket_ids: Vec<TicketId>,
    pub paid: bool,
    pub retention: RetentionOutcome,
}

/// Handles reports on behalf of the ingestor.
#[async_trait]
pub trait ReportHandler: Send + Sync {
    /// Process one report. `Ok(None)` when the sender is not registered.
    ///
    /// A report that fails has already released what it left pending.
    async fn handle(&self, sender: &Address, report: &Value) -> Result<Option<ReportOutcome>>;

    /// Release whatever a cancelled report left pending for `sender`.
    async fn abandon(&self, sender: &Address);
}

/// Report pipeline over an artifact store and a ticket reconciler.
pub struct Operator {
    artifacts: ArtifactStore,
    reconciler: TicketReconciler,
    rules: FormatRules,
}

impl Operator {
    /// Assemble the pipeline.
    pub fn new(artifacts: ArtifactStore, reconciler: TicketReconciler, rules: FormatRules) -> Self {
        Self {
            artifacts,
            reconciler,
            rules,
        }
    }

    /// The artifact store.
    pub fn artifacts(&self) -> &ArtifactStore {
        &self.artifacts
    }

    /// The ticket reconciler.
    pub fn reconciler(&self) -> &TicketReconciler {
        &self.reconciler
    }

    /// Process one report from `sender`.
    ///
    /// A failed report evicts whatever it republished before returning the
    /// error.
    pub async fn process_report(&self, sender: &Address, report: &Value) -> Result<Option<ReportOutcome>> {
        let Some(email) = self.reconciler.resolve_email(sender).await? else {
            debug!(sender = %sender, "sender not registered, dropping report");
            return Ok(None);
        };

        match self.run(sender, &email, report).await {
            Ok(outcome) => Ok(Some(outcome)),
            Err(e) => {
                self.evict_pending(sender).await;
                Err(e)
            }
        }
    }

    async fn run(&self, sender: &Address, email: &str, report: &Value) -> Result<ReportOutcome> {
        let format = ReportFormat::detect(report, &self.rules);
        let work = self.artifacts.fetch_and_decrypt(&format, sender).await?;
        let problem = ProblemReport::from_issue(work.issue())?;
        debug!(
            sender = %sender,
            format = format.name(),
            problem_type = ?problem.problem_type,
            descriptions = problem.descriptions.len(),
            "report classified"
        );

        let reconciliation = self
            .reconciler
            .reconcile(sender, email, &problem, &work.republished())
            .await?;
        let retention = self
            .artifacts
            .settle_retention(sender, reconciliation.paid)
            .await;

        info!(
            sender = %sender,
            tickets = ?reconciliation.ticket_ids,
            paid = reconciliation.paid,
            "report processed"
        );
        Ok(ReportOutcome {
            ticket_ids: reconciliation.ticket_ids,
            paid: reconciliation.paid,
            retention,
        })
    }

    async fn evict_pending(&self, sender: &Address) {
        let outcome = self.artifacts.settle_retention(sender, false).await;
        if outcome.evicted + outcome.failed > 0 {
            warn!(
                sender = %sender,
                evicted = outcome.evicted,
                failed = outcome.failed,
                "evicted artifacts of aborted report"
            );
        }
    }

    /// Unpin every artifact noted on a ticket from the archival node.
    ///
    /// The notes are removed once every pin is released, so a failed unpin
    /// is tried again by the next sweep.
    pub async fn release_ticket_artifacts(&self, ticket: TicketId) -> Result<RetentionOutcome> {
        let hashes = self.reconciler.ticket_artifact_hashes(ticket).await?;
        let outcome = self.artifacts.release_hashes(&hashes).await;
        if outcome.failed == 0 {
            self.reconciler.forget_ticket_artifacts(ticket).await?;
        }
        info!(
            ticket_id = ticket.0,
            released = outcome.evicted,
            failed = outcome.failed,
            "ticket artifacts released"
        );
        Ok(outcome)
    }

    /// Release the artifacts of every ticket that has left the open stages.
    pub async fn sweep_closed_tickets(&self) -> Result<RetentionOutcome> {
        let mut total = RetentionOutcome::default();
        for ticket in self.reconciler.closed_tickets_with_artifacts().await? {
            let outcome = self.release_ticket_artifacts(ticket).await?;
            total.evicted += outcome.evicted;
            total.failed += outcome.failed;
        }
        Ok(total)
    }
}

#[async_trait]
impl ReportHandler for Operator {
    async fn handle(&self, sender: &Address, report: &Value) -> Result<Option<ReportOutcome>> {
        self.process_report(sender, report).await
    }

    async fn abandon(&self, sender: &Address) {
        self.evict_pending(sender).await;
    }
}
