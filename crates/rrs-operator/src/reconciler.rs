//! Ticket reconciliation against the ERP backend.
//!
//! Every description of a report either continues an open ticket or opens a
//! new one. Which ticket a description continues is decided by its
//! [`DedupKey`]: the description text itself, or the source tag when the
//! device set one. The report's republished artifact hashes are attached to
//! every touched ticket as notes.
//!
//! ## ERP Models
//!
//! | Model             | Use                                             |
//! |-------------------|-------------------------------------------------|
//! | `rrs.register`    | sender address to e-mail and paid status        |
//! | `helpdesk.ticket` | the tickets                                     |
//! | `mail.message`    | notes on a ticket (artifact hashes, fixes)      |
//! | `mail.mail`       | outgoing fix suggestions                        |

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use rrs_core::{Address, ContentHash, DedupKey, ProblemReport, TicketId};
use rrs_store::{Domain, ErpBackend, Record, RetryPolicy};

use crate::advisor::FixAdvisor;
use crate::error::Result;

/// Device registrations.
pub const REGISTER_MODEL: &str = "rrs.register";
/// Helpdesk tickets.
pub const TICKET_MODEL: &str = "helpdesk.ticket";
/// Notes attached to records.
pub const NOTE_MODEL: &str = "mail.message";
/// Outgoing e-mail queue.
pub const MAIL_MODEL: &str = "mail.mail";

/// Body prefix of an artifact hash note.
pub const HASH_NOTE_PREFIX: &str = "Logs hash: ";

/// Prefix of the description of a ticket opened by a report.
pub const TICKET_DESCRIPTION_PREFIX: &str = "Issue from HA: ";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Configuration for the reconciler.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Retry policy wrapped around every ERP call.
    pub retry: RetryPolicy,
    /// Ticket field holding the stage.
    pub stage_field: String,
    /// Stages in which a ticket still accepts new occurrences.
    pub open_stages: Vec<i64>,
    /// Stage of newly created tickets.
    pub new_stage: i64,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::unbounded_fixed(Duration::from_secs(5)),
            stage_field: "stage_id".to_string(),
            open_stages: vec![1, 2],
            new_stage: 1,
        }
    }
}

/// Result of reconciling one report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Touched tickets, in description order, without duplicates.
    pub ticket_ids: Vec<TicketId>,
    /// Paid status of the sender, read once per report.
    pub paid: bool,
    /// Tickets opened by this report with the description that opened them.
    pub created: Vec<(TicketId, String)>,
}

/// Maps problem reports onto helpdesk tickets.
pub struct TicketReconciler {
    erp: Arc<dyn ErpBackend>,
    advisor: Option<Arc<dyn FixAdvisor>>,
    config: ReconcilerConfig,
}

impl TicketReconciler {
    /// Create a reconciler without a fix advisor.
    pub fn new(erp: Arc<dyn ErpBackend>, config: ReconcilerConfig) -> Self {
        Self {
            erp,
            advisor: None,
            config,
        }
    }

    /// Send tickets opened for paid senders to `advisor`.
    pub fn with_advisor(mut self, advisor: Arc<dyn FixAdvisor>) -> Self {
        self.advisor = Some(advisor);
        self
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Registrations
    // ─────────────────────────────────────────────────────────────────────────

    /// Registration record of an address, matched as controller first and
    /// owner second.
    async fn registration(&self, address: &Address, fields: &[&str]) -> Result<Option<Record>> {
        for field in ["controller_address", "owner_address"] {
            let domain = Domain::new().eq(field, address.as_str());
            if let Some(&id) = self.search(REGISTER_MODEL, &domain).await?.first() {
                return Ok(self.read(REGISTER_MODEL, &[id], fields).await?.into_iter().next());
            }
        }
        Ok(None)
    }

    /// E-mail registered for an address, if any.
    pub async fn resolve_email(&self, address: &Address) -> Result<Option<String>> {
        let email = self
            .registration(address, &["customer_email"])
            .await?
            .and_then(|record| record.get("customer_email").and_then(Value::as_str).map(String::from))
            .filter(|email| !email.trim().is_empty());
        Ok(email)
    }

    /// Whether an address has a paid subscription.
    pub async fn is_paid(&self, address: &Address) -> Result<bool> {
        Ok(self
            .registration(address, &["subscription"])
            .await?
            .and_then(|record| record.get("subscription").and_then(Value::as_bool))
            .unwrap_or(false))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Tickets
    // ─────────────────────────────────────────────────────────────────────────

    /// Create or update one ticket per description of `report`.
    ///
    /// A non-retryable failure aborts the remaining descriptions.
    pub async fn reconcile(
        &self,
        sender: &Address,
        email: &str,
        report: &ProblemReport,
        hashes: &[ContentHash],
    ) -> Result<Reconciliation> {
        let paid = self.is_paid(sender).await?;
        let mut result = Reconciliation {
            paid,
            ..Reconciliation::default()
        };

        for description in &report.descriptions {
            if description.trim().is_empty() {
                debug!(sender = %sender, "skipping blank description");
                continue;
            }

            let ticket = match self.find_open_ticket(email, report.dedup_key(description)).await? {
                Some(ticket) => {
                    self.record_occurrence(ticket, description).await?;
                    ticket
                }
                None => {
                    let ticket = self.open_ticket(sender, email, description, report).await?;
                    result.created.push((ticket, description.clone()));
                    ticket
                }
            };

            if !result.ticket_ids.contains(&ticket) {
                for hash in hashes {
                    self.add_note(ticket, &format!("{HASH_NOTE_PREFIX}{hash}")).await?;
                }
                result.ticket_ids.push(ticket);
            }
        }

        if paid {
            self.advise(email, &result.created).await;
        }
        Ok(result)
    }

    /// Open ticket of `email` continued by `key`.
    ///
    /// Description keys match a whole line of the stored description, never
    /// a substring of it.
    async fn find_open_ticket(&self, email: &str, key: DedupKey<'_>) -> Result<Option<TicketId>> {
        let domain = Domain::new()
            .eq("partner_email", email)
            .is_in(&self.config.stage_field, self.config.open_stages.iter().copied());
        let text = match key {
            DedupKey::Source(source) => {
                let ids = self.search(TICKET_MODEL, &domain.eq("source", source)).await?;
                return Ok(ids.first().map(|&id| TicketId(id)));
            }
            DedupKey::Description(text) => text,
        };

        let ids = self.search(TICKET_MODEL, &domain).await?;
        if ids.is_empty() {
            return Ok(None);
        }
        let ticket = self
            .read(TICKET_MODEL, &ids, &["description"])
            .await?
            .into_iter()
            .find(|ticket| {
                ticket
                    .get("description")
                    .and_then(Value::as_str)
                    .is_some_and(|stored| describes(stored, text))
            })
            .and_then(|ticket| ticket.get("id").and_then(Value::as_i64))
            .map(TicketId);
        Ok(ticket)
    }

    async fn record_occurrence(&self, ticket: TicketId, description: &str) -> Result<()> {
        let current = self
            .read(TICKET_MODEL, &[ticket.0], &["count", "description"])
            .await?
            .into_iter()
            .next()
            .unwrap_or_default();
        let count = current.get("count").and_then(Value::as_i64).unwrap_or(0) + 1;
        let text = current.get("description").and_then(Value::as_str).unwrap_or("");

        let mut fields = Record::new();
        fields.insert("count".into(), json!(count));
        fields.insert("last_occurred".into(), json!(now()));
        if !describes(text, description) {
            fields.insert("description".into(), json!(format!("{text}\n{description}")));
        }
        self.update(TICKET_MODEL, ticket.0, fields).await?;
        info!(ticket_id = ticket.0, count, "ticket occurrence recorded");
        Ok(())
    }

    async fn open_ticket(
        &self,
        sender: &Address,
        email: &str,
        description: &str,
        report: &ProblemReport,
    ) -> Result<TicketId> {
        let mut fields = Record::new();
        fields.insert("name".into(), json!(format!("Issue from {sender}")));
        fields.insert("partner_email".into(), json!(email));
        fields.insert(
            "description".into(),
            json!(format!("{TICKET_DESCRIPTION_PREFIX}{description}")),
        );
        fields.insert("priority".into(), json!(report.priority.as_str()));
        fields.insert("source".into(), json!(report.source));
        fields.insert("count".into(), json!(1));
        fields.insert("last_occurred".into(), json!(now()));
        fields.insert(self.config.stage_field.clone(), json!(self.config.new_stage));

        let id = self.create(TICKET_MODEL, fields).await?;
        info!(ticket_id = id, sender = %sender, priority = %report.priority, "ticket opened");
        Ok(TicketId(id))
    }

    async fn add_note(&self, ticket: TicketId, body: &str) -> Result<i64> {
        let mut fields = Record::new();
        fields.insert("body".into(), json!(body));
        fields.insert("model".into(), json!(TICKET_MODEL));
        fields.insert("res_id".into(), json!(ticket.0));
        fields.insert("message_type".into(), json!("comment"));
        self.create(NOTE_MODEL, fields).await
    }

    /// Artifact hashes noted on a ticket, in note order.
    pub async fn ticket_artifact_hashes(&self, ticket: TicketId) -> Result<Vec<ContentHash>> {
        let mut hashes = Vec::new();
        for note in self.hash_notes(Some(ticket)).await? {
            if !hashes.contains(&note.hash) {
                hashes.push(note.hash);
            }
        }
        Ok(hashes)
    }

    /// Tickets outside the open stages that still carry artifact notes.
    pub async fn closed_tickets_with_artifacts(&self) -> Result<Vec<TicketId>> {
        let mut tickets: Vec<i64> = self
            .hash_notes(None)
            .await?
            .into_iter()
            .map(|note| note.ticket.0)
            .collect();
        tickets.sort_unstable();
        tickets.dedup();
        if tickets.is_empty() {
            return Ok(Vec::new());
        }

        let stage_field = self.config.stage_field.as_str();
        let closed = self
            .read(TICKET_MODEL, &tickets, &[stage_field])
            .await?
            .into_iter()
            .filter(|ticket| {
                ticket
                    .get(stage_field)
                    .and_then(stage_id)
                    .is_some_and(|stage| !self.config.open_stages.contains(&stage))
            })
            .filter_map(|ticket| ticket.get("id").and_then(Value::as_i64).map(TicketId))
            .collect();
        Ok(closed)
    }

    /// Delete the artifact notes of a ticket once its pins are released.
    pub async fn forget_ticket_artifacts(&self, ticket: TicketId) -> Result<()> {
        let ids: Vec<i64> = self
            .hash_notes(Some(ticket))
            .await?
            .into_iter()
            .map(|note| note.id)
            .collect();
        if !ids.is_empty() {
            self.unlink(NOTE_MODEL, &ids).await?;
            debug!(ticket_id = ticket.0, notes = ids.len(), "artifact notes removed");
        }
        Ok(())
    }

    /// Artifact hash notes, of one ticket or of every ticket.
    async fn hash_notes(&self, ticket: Option<TicketId>) -> Result<Vec<HashNote>> {
        let mut domain = Domain::new()
            .eq("model", TICKET_MODEL)
            .ilike("body", HASH_NOTE_PREFIX);
        if let Some(ticket) = ticket {
            domain = domain.eq("res_id", ticket.0);
        }
        let ids = self.search(NOTE_MODEL, &domain).await?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let notes = self
            .read(NOTE_MODEL, &ids, &["body", "res_id"])
            .await?
            .into_iter()
            .filter_map(|note| {
                Some(HashNote {
                    id: note.get("id").and_then(Value::as_i64)?,
                    ticket: TicketId(note.get("res_id").and_then(Value::as_i64)?),
                    hash: note.get("body").and_then(Value::as_str).and_then(parse_hash_note)?,
                })
            })
            .collect();
        Ok(notes)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Fix suggestions
    // ─────────────────────────────────────────────────────────────────────────

    async fn advise(&self, email: &str, created: &[(TicketId, String)]) {
        let Some(advisor) = &self.advisor else {
            return;
        };
        for (ticket, description) in created {
            let suggestion = match advisor.suggest(description).await {
                Ok(suggestion) => suggestion,
                Err(e) => {
                    warn!(ticket_id = ticket.0, error = %e, "no fix suggestion");
                    continue;
                }
            };
            if let Err(e) = self.deliver_suggestion(*ticket, email, &suggestion).await {
                warn!(ticket_id = ticket.0, error = %e, "could not store fix suggestion");
            }
        }
    }

    async fn deliver_suggestion(&self, ticket: TicketId, email: &str, html: &str) -> Result<()> {
        self.add_note(ticket, html).await?;

        let mut mail = Record::new();
        mail.insert("subject".into(), json!(format!("Suggested fix for ticket #{ticket}")));
        mail.insert("email_to".into(), json!(email));
        mail.insert("body_html".into(), json!(html));
        mail.insert("model".into(), json!(TICKET_MODEL));
        mail.insert("res_id".into(), json!(ticket.0));
        self.create(MAIL_MODEL, mail).await?;
        info!(ticket_id = ticket.0, "fix suggestion queued");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Retried ERP calls
    // ─────────────────────────────────────────────────────────────────────────

    async fn search(&self, model: &str, domain: &Domain) -> Result<Vec<i64>> {
        let erp = &self.erp;
        Ok(self
            .config
            .retry
            .run("search", move || erp.search(model, domain))
            .await?)
    }

    async fn read(&self, model: &str, ids: &[i64], fields: &[&str]) -> Result<Vec<Record>> {
        let erp = &self.erp;
        Ok(self
            .config
            .retry
            .run("read", move || erp.read(model, ids, fields))
            .await?)
    }

    async fn create(&self, model: &str, fields: Record) -> Result<i64> {
        let erp = &self.erp;
        let fields = &fields;
        Ok(self
            .config
            .retry
            .run("create", move || erp.create(model, fields.clone()))
            .await?)
    }

    async fn unlink(&self, model: &str, ids: &[i64]) -> Result<bool> {
        let erp = &self.erp;
        Ok(self
            .config
            .retry
            .run("unlink", move || erp.unlink(model, ids))
            .await?)
    }

    async fn update(&self, model: &str, id: i64, fields: Record) -> Result<bool> {
        let erp = &self.erp;
        let fields = &fields;
        Ok(self
            .config
            .retry
            .run("update", move || erp.update(model, id, fields.clone()))
            .await?)
    }
}

/// A note carrying one artifact hash.
struct HashNote {
    id: i64,
    ticket: TicketId,
    hash: ContentHash,
}

/// Stage id of a ticket. The ERP reads many2one fields as `[id, name]`.
fn stage_id(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_array()?.first()?.as_i64())
}

fn now() -> String {
    Utc::now().format(TIMESTAMP_FORMAT).to_string()
}

/// Whether a stored ticket description already holds `description` as one
/// of its lines. The ERP may wrap the text in `<p>` and `<br>` markup.
fn describes(stored: &str, description: &str) -> bool {
    let description = description.trim();
    stored
        .split(['\n', '\r'])
        .flat_map(|line| line.split("<br>"))
        .map(|line| {
            let line = line.trim();
            let line = line.strip_prefix("<p>").unwrap_or(line);
            let line = line.strip_suffix("</p>").unwrap_or(line).trim();
            line.strip_prefix(TICKET_DESCRIPTION_PREFIX).unwrap_or(line).trim()
        })
        .any(|line| line == description)
}

/// Hash carried by a note body, tolerating the `<p>` wrapper the ERP adds.
fn parse_hash_note(body: &str) -> Option<ContentHash> {
    let body = body.trim();
    let body = body
        .strip_prefix("<p>")
        .and_then(|b| b.strip_suffix("</p>"))
        .unwrap_or(body);
    body.strip_prefix(HASH_NOTE_PREFIX)
        .map(str::trim)
        .filter(|hash| !hash.is_empty())
        .map(ContentHash::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OperatorError;
    use async_trait::async_trait;
    use rrs_core::{Priority, ProblemType};
    use rrs_store::StoreError;
    use rrs_testkit::TestFixture;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const EMAIL: &str = "owner@example.com";

    fn test_config() -> ReconcilerConfig {
        ReconcilerConfig {
            retry: RetryPolicy::unbounded_fixed(Duration::from_millis(5)),
            ..ReconcilerConfig::default()
        }
    }

    fn reconciler(fixture: &TestFixture) -> TicketReconciler {
        TicketReconciler::new(fixture.erp.clone(), test_config())
    }

    fn errors(text: &str) -> ProblemReport {
        ProblemReport::from_json(&json!({ "description": text }).to_string()).unwrap()
    }

    fn typed(kind: &str, text: &str, source: &str) -> ProblemReport {
        ProblemReport::from_json(
            &json!({"description": {"type": kind, "description": text, "source": source}}).to_string(),
        )
        .unwrap()
    }

    struct CannedAdvisor {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl FixAdvisor for CannedAdvisor {
        async fn suggest(&self, description: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(OperatorError::Advisor("rate limited".into()));
            }
            Ok(format!("<p>Try restarting: {description}</p>"))
        }
    }

    #[tokio::test]
    async fn test_resolve_email_prefers_controller_then_owner() {
        let fixture = TestFixture::new();
        let owner = rrs_core::Keypair::from_seed(&[1; 32]).address();
        let controller = rrs_core::Keypair::from_seed(&[2; 32]).address();
        let stranger = rrs_core::Keypair::from_seed(&[3; 32]).address();
        fixture.register_as(&controller, &owner, EMAIL, false).await;
        let reconciler = reconciler(&fixture);

        assert_eq!(reconciler.resolve_email(&controller).await.unwrap().as_deref(), Some(EMAIL));
        assert_eq!(reconciler.resolve_email(&owner).await.unwrap().as_deref(), Some(EMAIL));
        assert_eq!(reconciler.resolve_email(&stranger).await.unwrap(), None);
        assert!(!reconciler.is_paid(&stranger).await.unwrap());
    }

    #[tokio::test]
    async fn test_same_description_twice_updates_one_ticket() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, false).await;
        let sender = fixture.sender_address();
        let reconciler = reconciler(&fixture);
        let report = errors("boiler error");

        let first = reconciler.reconcile(&sender, EMAIL, &report, &[]).await.unwrap();
        let second = reconciler.reconcile(&sender, EMAIL, &report, &[]).await.unwrap();

        assert_eq!(first.ticket_ids, second.ticket_ids);
        assert_eq!(first.created.len(), 1);
        assert!(second.created.is_empty());

        let tickets = fixture.erp.records(TICKET_MODEL);
        assert_eq!(tickets.len(), 1);
        assert_eq!(tickets[0]["count"], json!(2));
        assert_eq!(tickets[0]["description"], json!("Issue from HA: boiler error"));
        assert_eq!(tickets[0]["priority"], json!("3"));
        assert_eq!(tickets[0]["name"], json!(format!("Issue from {sender}")));
    }

    #[tokio::test]
    async fn test_unresponded_devices_open_one_ticket_each() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, false).await;
        let reconciler = reconciler(&fixture);
        let report = typed("unresponded_devices", "device A*device B*device C", "devices");

        let result = reconciler
            .reconcile(&fixture.sender_address(), EMAIL, &report, &[])
            .await
            .unwrap();

        assert_eq!(result.ticket_ids.len(), 3);
        for ticket in fixture.erp.records(TICKET_MODEL) {
            assert_eq!(ticket["priority"], json!("2"));
        }
    }

    #[tokio::test]
    async fn test_source_tag_groups_descriptions() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, false).await;
        let reconciler = reconciler(&fixture);
        let report = typed("warnings", "battery low*signal weak", "zigbee");
        assert_eq!(report.priority, Priority::Low);

        let result = reconciler
            .reconcile(&fixture.sender_address(), EMAIL, &report, &[])
            .await
            .unwrap();

        assert_eq!(result.ticket_ids.len(), 1);
        let ticket = fixture.erp.record(TICKET_MODEL, result.ticket_ids[0].0).unwrap();
        assert_eq!(ticket["count"], json!(2));
        assert_eq!(
            ticket["description"],
            json!("Issue from HA: battery low\nsignal weak")
        );
    }

    #[tokio::test]
    async fn test_closed_ticket_is_not_reopened() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, false).await;
        let reconciler = reconciler(&fixture);
        let report = errors("boiler error");

        let first = reconciler
            .reconcile(&fixture.sender_address(), EMAIL, &report, &[])
            .await
            .unwrap();
        let mut closed = Record::new();
        closed.insert("stage_id".into(), json!(4));
        fixture
            .erp
            .update(TICKET_MODEL, first.ticket_ids[0].0, closed)
            .await
            .unwrap();

        let second = reconciler
            .reconcile(&fixture.sender_address(), EMAIL, &report, &[])
            .await
            .unwrap();
        assert_ne!(first.ticket_ids, second.ticket_ids);
        assert_eq!(fixture.erp.records(TICKET_MODEL).len(), 2);
    }

    #[tokio::test]
    async fn test_hashes_are_noted_and_read_back() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, false).await;
        let reconciler = reconciler(&fixture);
        let hashes = vec![ContentHash::from("QmLog"), ContentHash::from("QmTrace")];

        let result = reconciler
            .reconcile(&fixture.sender_address(), EMAIL, &errors("boiler error"), &hashes)
            .await
            .unwrap();

        let notes = fixture.erp.records(NOTE_MODEL);
        assert_eq!(notes.len(), 2);
        assert_eq!(notes[0]["body"], json!("Logs hash: QmLog"));
        assert_eq!(
            reconciler.ticket_artifact_hashes(result.ticket_ids[0]).await.unwrap(),
            hashes
        );
    }

    #[tokio::test]
    async fn test_paid_sender_gets_fix_suggestion() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, true).await;
        let advisor = Arc::new(CannedAdvisor {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let reconciler = reconciler(&fixture).with_advisor(advisor.clone());

        let result = reconciler
            .reconcile(&fixture.sender_address(), EMAIL, &errors("boiler error"), &[])
            .await
            .unwrap();

        assert!(result.paid);
        assert_eq!(advisor.calls.load(Ordering::SeqCst), 1);
        let mails = fixture.erp.records(MAIL_MODEL);
        assert_eq!(mails.len(), 1);
        assert_eq!(mails[0]["email_to"], json!(EMAIL));
        assert_eq!(fixture.erp.records(NOTE_MODEL).len(), 1);

        // Continuing the ticket asks for no new suggestion.
        reconciler
            .reconcile(&fixture.sender_address(), EMAIL, &errors("boiler error"), &[])
            .await
            .unwrap();
        assert_eq!(advisor.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_advisor_failure_does_not_abort() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, true).await;
        let advisor = Arc::new(CannedAdvisor {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let reconciler = reconciler(&fixture).with_advisor(advisor);

        let result = reconciler
            .reconcile(&fixture.sender_address(), EMAIL, &errors("boiler error"), &[])
            .await
            .unwrap();
        assert_eq!(result.ticket_ids.len(), 1);
        assert!(fixture.erp.records(MAIL_MODEL).is_empty());
    }

    #[tokio::test]
    async fn test_unpaid_sender_gets_no_suggestion() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, false).await;
        let advisor = Arc::new(CannedAdvisor {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let reconciler = reconciler(&fixture).with_advisor(advisor.clone());

        reconciler
            .reconcile(&fixture.sender_address(), EMAIL, &errors("boiler error"), &[])
            .await
            .unwrap();
        assert_eq!(advisor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_erp_failure_is_retried() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, false).await;
        fixture.erp.faults.push(StoreError::Rpc("server busy".into()));
        fixture.erp.faults.push(StoreError::Transport("reset".into()));
        let reconciler = reconciler(&fixture);

        let result = reconciler
            .reconcile(&fixture.sender_address(), EMAIL, &errors("boiler error"), &[])
            .await
            .unwrap();
        assert_eq!(result.ticket_ids.len(), 1);
    }

    #[tokio::test]
    async fn test_permanent_erp_failure_propagates() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, false).await;
        fixture.erp.faults.push(StoreError::Unauthorized("bad password".into()));
        let reconciler = reconciler(&fixture);

        let result = reconciler
            .reconcile(&fixture.sender_address(), EMAIL, &errors("boiler error"), &[])
            .await;
        assert!(matches!(result, Err(OperatorError::Store(StoreError::Unauthorized(_)))));
        assert!(fixture.erp.records(TICKET_MODEL).is_empty());
    }

    #[tokio::test]
    async fn test_substring_description_opens_its_own_ticket() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, false).await;
        let sender = fixture.sender_address();
        let reconciler = reconciler(&fixture);

        let long = reconciler
            .reconcile(&sender, EMAIL, &errors("boiler pressure error"), &[])
            .await
            .unwrap();
        let short = reconciler
            .reconcile(&sender, EMAIL, &errors("error"), &[])
            .await
            .unwrap();
        let wildcard = reconciler
            .reconcile(&sender, EMAIL, &errors("boiler%"), &[])
            .await
            .unwrap();

        assert_ne!(long.ticket_ids, short.ticket_ids);
        assert_eq!(short.created.len(), 1);
        assert_eq!(wildcard.created.len(), 1);
        let tickets = fixture.erp.records(TICKET_MODEL);
        assert_eq!(tickets.len(), 3);
        for ticket in tickets {
            assert_eq!(ticket["count"], json!(1));
        }
    }

    #[tokio::test]
    async fn test_source_ticket_appends_substring_description() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, false).await;
        let reconciler = reconciler(&fixture);
        let sender = fixture.sender_address();

        reconciler
            .reconcile(&sender, EMAIL, &typed("warnings", "signal weak on hub", "zigbee"), &[])
            .await
            .unwrap();
        let result = reconciler
            .reconcile(&sender, EMAIL, &typed("warnings", "signal weak", "zigbee"), &[])
            .await
            .unwrap();

        let ticket = fixture.erp.record(TICKET_MODEL, result.ticket_ids[0].0).unwrap();
        assert_eq!(ticket["count"], json!(2));
        assert_eq!(
            ticket["description"],
            json!("Issue from HA: signal weak on hub\nsignal weak")
        );
    }

    #[test]
    fn test_describes_matches_whole_lines() {
        assert!(describes("Issue from HA: boiler error", "boiler error"));
        assert!(describes("Issue from HA: battery low\nsignal weak", "signal weak"));
        assert!(describes("<p>Issue from HA: boiler error</p>", "boiler error"));
        assert!(describes("<p>Issue from HA: a<br>b</p>", "b"));
        assert!(!describes("Issue from HA: boiler pressure error", "error"));
        assert!(!describes("Issue from HA: boiler error", "Boiler Error"));
    }

    #[tokio::test]
    async fn test_closed_tickets_with_artifacts() {
        let fixture = TestFixture::new();
        fixture.register(EMAIL, false).await;
        let reconciler = reconciler(&fixture);
        let sender = fixture.sender_address();
        let hashes = [ContentHash::from("QmLog")];

        let open = reconciler
            .reconcile(&sender, EMAIL, &errors("boiler error"), &hashes)
            .await
            .unwrap();
        let closing = reconciler
            .reconcile(&sender, EMAIL, &errors("sensor offline"), &hashes)
            .await
            .unwrap();
        reconciler
            .reconcile(&sender, EMAIL, &errors("door open"), &[])
            .await
            .unwrap();
        let mut closed = Record::new();
        closed.insert("stage_id".into(), json!([4, "Solved"]));
        fixture
            .erp
            .update(TICKET_MODEL, closing.ticket_ids[0].0, closed)
            .await
            .unwrap();

        assert_eq!(
            reconciler.closed_tickets_with_artifacts().await.unwrap(),
            closing.ticket_ids
        );

        reconciler.forget_ticket_artifacts(closing.ticket_ids[0]).await.unwrap();
        assert!(reconciler.closed_tickets_with_artifacts().await.unwrap().is_empty());
        assert!(reconciler
            .ticket_artifact_hashes(closing.ticket_ids[0])
            .await
            .unwrap()
            .is_empty());
        assert_eq!(
            reconciler.ticket_artifact_hashes(open.ticket_ids[0]).await.unwrap(),
            hashes
        );
    }

    #[test]
    fn test_stage_id_forms() {
        assert_eq!(stage_id(&json!(2)), Some(2));
        assert_eq!(stage_id(&json!([4, "Solved"])), Some(4));
        assert_eq!(stage_id(&json!(false)), None);
    }

    #[test]
    fn test_parse_hash_note() {
        assert_eq!(parse_hash_note("Logs hash: QmA"), Some(ContentHash::from("QmA")));
        assert_eq!(parse_hash_note("<p>Logs hash: QmB</p>"), Some(ContentHash::from("QmB")));
        assert_eq!(parse_hash_note("<p>Try restarting</p>"), None);
        assert_eq!(parse_hash_note("Logs hash: "), None);
    }

    proptest::proptest! {
        #[test]
        fn prop_star_list_opens_at_most_one_ticket_per_entry(
            (raw, entries) in rrs_testkit::star_list(5)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .unwrap();
            let tickets = runtime.block_on(async {
                let fixture = TestFixture::new();
                fixture.register(EMAIL, false).await;
                let report = typed("unresponded_devices", &raw, "");
                assert_eq!(report.problem_type, ProblemType::UnrespondedDevices);
                reconciler(&fixture)
                    .reconcile(&fixture.sender_address(), EMAIL, &report, &[])
                    .await
                    .unwrap();
                fixture.erp.records(TICKET_MODEL)
            });
            proptest::prop_assert!(!tickets.is_empty());
            proptest::prop_assert!(tickets.len() <= entries.len());
            for ticket in tickets {
                proptest::prop_assert_eq!(&ticket["priority"], &json!("2"));
            }
        }
    }
}
