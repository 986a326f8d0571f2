mod admission;
mod availability;
mod error;
mod ledger;
mod lifecycle;
mod queries;
mod settings;

pub use admission::evaluate;
pub use availability::{day_slots, merge_overlapping, open_slots, subtract_intervals};
pub use error::EngineError;
pub use ledger::DayLedger;
pub use lifecycle::{allowed_actions, authorize, next_status};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, RwLockReadGuard, mpsc, oneshot};
use tracing::{info, warn};
use ulid::Ulid;

use crate::audit::{AuditEntry, AuditSink, TracingAudit};
use crate::calendar::BusinessCalendar;
use crate::directory::Directory;
use crate::model::*;
use crate::notify::{Notification, Notifier, TracingNotifier};
use crate::observability::{WAL_FLUSH_BATCH_SIZE, WAL_FLUSH_DURATION_SECONDS};
use crate::rules::{RuleSet, validate_daily_limit};
use crate::wal::Wal;

use availability::CachedDay;

pub type SharedDay = Arc<RwLock<DayLedger>>;

pub(crate) fn now_ms() -> Ms {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as Ms)
}

// ── Group-commit WAL channel ─────────────────────────────

type Ack = oneshot::Sender<io::Result<()>>;

pub(super) enum WalCommand {
    Append { event: Event, response: Ack },
    Compact { events: Vec<Event>, response: Ack },
    AppendsSinceCompact { response: oneshot::Sender<u64> },
    /// Point the writer at another file.
    #[cfg(test)]
    Redirect { path: PathBuf, response: Ack },
}

/// Owns the WAL. Appends that queue up while a flush is running are written
/// together and acknowledged after a single fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let WalCommand::Append { event, response } = cmd else {
            handle_control(&mut wal, cmd);
            continue;
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(cmd) = deferred {
            handle_control(&mut wal, cmd);
        }
    }
    info!("WAL writer stopped");
}

fn commit_batch(wal: &mut Wal, batch: Vec<(Event, Ack)>) {
    metrics::histogram!(WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = Instant::now();

    let mut result = Ok(());
    for (event, _) in &batch {
        if let Err(e) = wal.append_buffered(event) {
            result = Err(e);
            break;
        }
    }
    if result.is_ok() {
        result = wal.flush_sync();
    }
    metrics::histogram!(WAL_FLUSH_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

    if let Err(e) = &result {
        warn!(error = %e, events = batch.len(), "WAL flush failed");
        if let Err(e) = wal.rollback() {
            warn!(error = %e, "WAL rollback failed");
        }
    }
    for (_, ack) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = ack.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => commit_batch(wal, vec![(event, response)]),
        #[cfg(test)]
        WalCommand::Redirect { path, response } => {
            let _ = response.send(Wal::open(&path).map(|next| *wal = next));
        }
    }
}

// ── Collaborators ───────────────────────────────────────

/// External collaborators the engine consults or informs.
#[derive(Clone)]
pub struct Services {
    pub directory: Arc<dyn Directory>,
    pub notifier: Arc<dyn Notifier>,
    pub audit: Arc<dyn AuditSink>,
}

impl Services {
    /// Tracing-backed notifications and audit log.
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            notifier: Arc::new(TracingNotifier),
            audit: Arc::new(TracingAudit),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }
}

// ── Engine ──────────────────────────────────────────────

pub struct Engine {
    days: DashMap<NaiveDate, SharedDay>,
    /// Which day each appointment lives on. Also reserves ids during admission.
    appointment_dates: DashMap<Ulid, NaiveDate>,
    rules: ArcSwap<RuleSet>,
    /// Serializes rule edits; readers go through `rules` without locking.
    rules_write: Mutex<()>,
    /// Every WAL writer holds this shared; compaction takes it exclusively.
    write_gate: RwLock<()>,
    calendar: BusinessCalendar,
    slot_cache: DashMap<NaiveDate, CachedDay>,
    wal_tx: mpsc::Sender<WalCommand>,
    services: Services,
}

impl Engine {
    /// Replay the WAL at `wal_path` and start the background writer.
    /// Must be called inside a tokio runtime.
    pub fn new(
        wal_path: PathBuf,
        calendar: BusinessCalendar,
        default_daily_limit: u32,
        services: Services,
    ) -> Result<Self, EngineError> {
        validate_daily_limit(default_daily_limit)?;
        let store_err = |e: io::Error| EngineError::StoreUnavailable(format!("{}: {e}", wal_path.display()));

        let replayed = Wal::replay(&wal_path).map_err(store_err)?;
        if replayed.discarded_bytes > 0 {
            warn!(
                path = %wal_path.display(),
                bytes = replayed.discarded_bytes,
                "discarding torn WAL tail"
            );
            Wal::truncate(&wal_path, replayed.valid_bytes).map_err(store_err)?;
        }

        let mut rules = RuleSet::new(DailyQuotaPolicy::initial(default_daily_limit));
        let mut days: HashMap<NaiveDate, DayLedger> = HashMap::new();
        let appointment_dates = DashMap::new();
        for event in &replayed.events {
            match event.ledger_date() {
                Some(date) => {
                    if let Event::AppointmentAdmitted { record } = event {
                        appointment_dates.insert(record.id, date);
                    }
                    days.entry(date).or_insert_with(|| DayLedger::new(date)).apply(event);
                }
                None => rules.apply(event),
            }
        }
        info!(
            events = replayed.events.len(),
            days = days.len(),
            appointments = appointment_dates.len(),
            "replayed WAL"
        );

        let wal = Wal::open(&wal_path).map_err(store_err)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            days: days
                .into_iter()
                .map(|(date, ledger)| (date, Arc::new(RwLock::new(ledger))))
                .collect(),
            appointment_dates,
            rules: ArcSwap::from_pointee(rules),
            rules_write: Mutex::new(()),
            write_gate: RwLock::new(()),
            calendar,
            slot_cache: DashMap::new(),
            wal_tx,
            services,
        })
    }

    pub fn calendar(&self) -> &BusinessCalendar {
        &self.calendar
    }

    /// Current rule snapshot.
    pub fn rules(&self) -> Arc<RuleSet> {
        self.rules.load_full()
    }

    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))
    }

    pub(super) fn get_day(&self, date: &NaiveDate) -> Option<SharedDay> {
        self.days.get(date).map(|e| e.value().clone())
    }

    /// Enter the write gate, then take the day's exclusive lock.
    pub(super) async fn lock_day(
        &self,
        date: NaiveDate,
    ) -> (RwLockReadGuard<'_, ()>, OwnedRwLockWriteGuard<DayLedger>) {
        let gate = self.write_gate.read().await;
        let day = self
            .days
            .entry(date)
            .or_insert_with(|| Arc::new(RwLock::new(DayLedger::new(date))))
            .clone();
        (gate, day.write_owned().await)
    }

    /// WAL append, then apply to the locked day. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(&self, day: &mut DayLedger, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        day.apply(event);
        Ok(())
    }

    /// WAL append, then publish a new rule snapshot. Caller holds `rules_write`.
    pub(super) async fn persist_rule_change(&self, event: &Event) -> Result<(), EngineError> {
        let _gate = self.write_gate.read().await;
        self.wal_append(event).await?;
        let mut next = RuleSet::clone(&self.rules.load());
        next.apply(event);
        self.rules.store(Arc::new(next));
        Ok(())
    }

    /// Directory role of `user_id`, or `UnknownUser`.
    pub async fn role_of(&self, user_id: Ulid) -> Result<Role, EngineError> {
        self.services
            .directory
            .role_of(user_id)
            .await
            .ok_or(EngineError::UnknownUser(user_id))
    }

    /// Dispatched on its own task, off the request path. A failed dispatch is
    /// logged and otherwise ignored.
    pub(super) fn notify(&self, notification: Notification) {
        let notifier = self.services.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = notifier.dispatch(&notification).await {
                metrics::counter!(crate::observability::NOTIFY_FAILURES_TOTAL).increment(1);
                warn!(
                    appointment = %notification.appointment_id,
                    kind = notification.kind.as_str(),
                    error = %e,
                    "notification dispatch failed"
                );
            }
        });
    }

    pub(super) async fn audit(&self, entry: AuditEntry) {
        if let Err(e) = self.services.audit.record(&entry).await {
            warn!(action = entry.action, error = %e, "audit append failed");
        }
    }

    /// Rewrite the WAL as the smallest event list that rebuilds current state.
    /// Blocks writers for the duration.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _exclusive = self.write_gate.write().await;

        let rules = self.rules.load_full();
        let mut events: Vec<Event> = Vec::new();
        events.extend(
            rules
                .capacity_rules()
                .iter()
                .map(|rule| Event::CapacityRuleSaved { rule: rule.clone() }),
        );
        events.extend(
            rules
                .blackout_rules()
                .iter()
                .map(|rule| Event::BlackoutRuleSaved { rule: rule.clone() }),
        );
        events.extend(
            rules
                .quota_history()
                .iter()
                .map(|policy| Event::QuotaPolicySet { policy: policy.clone() }),
        );

        let mut days: Vec<(NaiveDate, SharedDay)> =
            self.days.iter().map(|e| (*e.key(), e.value().clone())).collect();
        days.sort_by_key(|(date, _)| *date);
        for (_, day) in days {
            let ledger = day.read().await;
            events.extend(
                ledger
                    .records()
                    .iter()
                    .map(|record| Event::AppointmentAdmitted { record: record.clone() }),
            );
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::StoreUnavailable("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))?;
        info!(events = count, "compacted WAL");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
