use std::fmt::Debug;
use std::io;
use std::ops::Range;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldInfo, QueryResponse, Response,
    Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, METADATA_USER, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::SlotgateAuthSource;
use crate::directory::Directory;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, AppointmentFilter, Command, SqlError};

pub struct SlotgateHandler {
    engine: Arc<Engine>,
    query_parser: Arc<SlotgateQueryParser>,
}

impl SlotgateHandler {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            query_parser: Arc::new(SlotgateQueryParser),
        }
    }

    /// The acting user: the login name, which authentication already checked.
    fn actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<Ulid> {
        let user = client.metadata().get(METADATA_USER).cloned().unwrap_or_default();
        Ulid::from_string(&user).map_err(|_| user_error("28000", format!("user name {user:?} is not a ULID")))
    }

    async fn run(&self, actor: Ulid, sql: &str, format: &Format) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(actor, cmd, format).await;
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        result
    }

    async fn execute_command(&self, actor: Ulid, cmd: Command, format: &Format) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::SelectSlots { date } => {
                let day = engine.available_slots(date).await.map_err(engine_err)?;
                Ok(vec![query_response(schema(SLOTS, format), day.slots.iter().copied(), |enc, slot| {
                    enc.encode_field(&date.to_string())?;
                    enc.encode_field(&hhmm(slot.time))?;
                    enc.encode_field(&i64::from(slot.booked))?;
                    enc.encode_field(&i64::from(slot.capacity))?;
                    enc.encode_field(&i64::from(slot.remaining))?;
                    enc.encode_field(&slot.is_available())
                })])
            }
            Command::SelectDayStatus { date } => {
                let day = engine.available_slots(date).await.map_err(engine_err)?;
                Ok(vec![query_response(schema(DAY_STATUS, format), [day], |enc, day| {
                    enc.encode_field(&day.date.to_string())?;
                    enc.encode_field(&day.closed.is_none())?;
                    enc.encode_field(&day.closed)?;
                    enc.encode_field(&(day.slots.len() as i64))?;
                    enc.encode_field(&(day.slots.iter().filter(|s| s.is_available()).count() as i64))
                })])
            }
            Command::SelectQuotaStatus { user_id, date } => {
                self.require_self_or_staff(actor, user_id, "view another user's quota").await?;
                let status = engine.daily_limit_status(user_id, date).await.map_err(engine_err)?;
                Ok(vec![query_response(schema(QUOTA_STATUS, format), vec![status], |enc, s| {
                    enc.encode_field(&s.user_id.to_string())?;
                    enc.encode_field(&s.date.to_string())?;
                    enc.encode_field(&s.limit.map(i64::from))?;
                    enc.encode_field(&i64::from(s.used))?;
                    enc.encode_field(&s.remaining.map(i64::from))?;
                    enc.encode_field(&s.reached)?;
                    enc.encode_field(&s.next_available.map(|at| at.format("%Y-%m-%d %H:%M").to_string()))
                })])
            }
            Command::InsertAppointment { id, user_id, date, time } => {
                match engine.book_for(actor, id, user_id, date, time).await.map_err(engine_err)? {
                    Admission::Admitted(_) => Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))]),
                    Admission::Rejected(rejection) => Err(user_error("P0001", rejection.to_string())),
                }
            }
            Command::InsertTransition {
                appointment_id,
                action,
                reason,
            } => {
                engine
                    .transition(appointment_id, action, actor, reason)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectAppointments { filter } => {
                let records = self.visible_appointments(actor, filter).await?;
                Ok(vec![query_response(schema(APPOINTMENTS, format), records, encode_appointment)])
            }
            Command::InsertCapacityRule { rule } => {
                engine.save_capacity_rule(actor, rule).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteCapacityRule { id } => {
                engine.remove_capacity_rule(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertBlackoutRule { rule } => {
                engine.save_blackout_rule(actor, rule).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::DeleteBlackoutRule { id } => {
                engine.remove_blackout_rule(actor, id).await.map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("DELETE").with_rows(1))])
            }
            Command::InsertQuotaPolicy {
                max_per_day,
                active,
                note,
            } => {
                engine
                    .set_quota_policy(actor, max_per_day, active, note)
                    .await
                    .map_err(engine_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::SelectCapacityRules => Ok(vec![query_response(
                schema(CAPACITY_RULES, format),
                engine.capacity_rules(),
                |enc, rule| {
                    enc.encode_field(&rule.id.to_string())?;
                    enc.encode_field(&rule.weekday.map(|d| d.to_string().to_lowercase()))?;
                    enc.encode_field(&minute_text(rule.span.start))?;
                    enc.encode_field(&minute_text(rule.span.end))?;
                    enc.encode_field(&i64::from(rule.max_concurrent))?;
                    enc.encode_field(&rule.active)
                },
            )]),
            Command::SelectBlackoutRules => Ok(vec![query_response(
                schema(BLACKOUT_RULES, format),
                engine.blackout_rules(),
                |enc, rule| {
                    let (date, weekdays) = match &rule.scope {
                        BlackoutScope::Date(d) => (Some(d.to_string()), None),
                        BlackoutScope::Recurring(days) => (None, Some(days.to_string())),
                    };
                    enc.encode_field(&rule.id.to_string())?;
                    enc.encode_field(&date)?;
                    enc.encode_field(&weekdays)?;
                    enc.encode_field(&rule.window.map(|w| minute_text(w.start)))?;
                    enc.encode_field(&rule.window.map(|w| minute_text(w.end)))?;
                    enc.encode_field(&rule.reason)
                },
            )]),
            Command::SelectQuotaPolicy => Ok(vec![query_response(
                schema(QUOTA_POLICY, format),
                vec![engine.quota_policy()],
                encode_policy,
            )]),
            Command::SelectQuotaHistory => Ok(vec![query_response(
                schema(QUOTA_POLICY, format),
                engine.quota_history(),
                encode_policy,
            )]),
        }
    }

    async fn require_self_or_staff(&self, actor: Ulid, user_id: Ulid, action: &'static str) -> PgWireResult<()> {
        if actor == user_id {
            return Ok(());
        }
        match self.engine.role_of(actor).await.map_err(engine_err)? {
            Role::Client => Err(engine_err(EngineError::Forbidden { actor, action })),
            Role::Staff | Role::Admin => Ok(()),
        }
    }

    /// Clients see only their own appointments; staff and admins see all.
    async fn visible_appointments(
        &self,
        actor: Ulid,
        filter: AppointmentFilter,
    ) -> PgWireResult<Vec<AppointmentRecord>> {
        let engine = &self.engine;
        let role = engine.role_of(actor).await.map_err(engine_err)?;
        let mut records = match filter {
            AppointmentFilter::Id(id) => vec![engine.get_appointment(id).await.map_err(engine_err)?],
            AppointmentFilter::Date(date) => engine.appointments_on(date).await,
            AppointmentFilter::User(user_id) => {
                self.require_self_or_staff(actor, user_id, "view another user's appointments")
                    .await?;
                engine.appointments_for_user(user_id).await
            }
            AppointmentFilter::Mine => engine.appointments_for_user(actor).await,
        };
        if role == Role::Client {
            records.retain(|r| r.user_id == actor);
        }
        Ok(records)
    }
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, &item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn encode_appointment(enc: &mut DataRowEncoder, r: &AppointmentRecord) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.user_id.to_string())?;
    enc.encode_field(&r.staff_id.map(|s| s.to_string()))?;
    enc.encode_field(&r.date.to_string())?;
    enc.encode_field(&hhmm(r.time))?;
    enc.encode_field(&r.status.as_str().to_string())?;
    enc.encode_field(&r.reason)?;
    enc.encode_field(&r.created_at)?;
    enc.encode_field(&r.updated_at)
}

fn encode_policy(enc: &mut DataRowEncoder, p: &DailyQuotaPolicy) -> PgWireResult<()> {
    enc.encode_field(&i64::from(p.max_per_day))?;
    enc.encode_field(&p.active)?;
    enc.encode_field(&p.note)?;
    enc.encode_field(&p.modified_by.map(|u| u.to_string()))?;
    enc.encode_field(&p.modified_at)
}

fn hhmm(time: chrono::NaiveTime) -> String {
    time.format("%H:%M").to_string()
}

fn minute_text(minute: Minute) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

// ── Row schemas ──────────────────────────────────────────────────

type Columns = &'static [(&'static str, Type)];

const SLOTS: Columns = &[
    ("date", Type::VARCHAR),
    ("time", Type::VARCHAR),
    ("booked", Type::INT8),
    ("capacity", Type::INT8),
    ("remaining", Type::INT8),
    ("available", Type::BOOL),
];

const DAY_STATUS: Columns = &[
    ("date", Type::VARCHAR),
    ("open", Type::BOOL),
    ("closed_reason", Type::VARCHAR),
    ("slots", Type::INT8),
    ("available", Type::INT8),
];

const QUOTA_STATUS: Columns = &[
    ("user_id", Type::VARCHAR),
    ("date", Type::VARCHAR),
    ("limit", Type::INT8),
    ("used", Type::INT8),
    ("remaining", Type::INT8),
    ("reached", Type::BOOL),
    ("next_available", Type::VARCHAR),
];

const APPOINTMENTS: Columns = &[
    ("id", Type::VARCHAR),
    ("user_id", Type::VARCHAR),
    ("staff_id", Type::VARCHAR),
    ("date", Type::VARCHAR),
    ("time", Type::VARCHAR),
    ("status", Type::VARCHAR),
    ("reason", Type::VARCHAR),
    ("created_at", Type::INT8),
    ("updated_at", Type::INT8),
];

const CAPACITY_RULES: Columns = &[
    ("id", Type::VARCHAR),
    ("weekday", Type::VARCHAR),
    ("start", Type::VARCHAR),
    ("end", Type::VARCHAR),
    ("max", Type::INT8),
    ("active", Type::BOOL),
];

const BLACKOUT_RULES: Columns = &[
    ("id", Type::VARCHAR),
    ("date", Type::VARCHAR),
    ("weekdays", Type::VARCHAR),
    ("start", Type::VARCHAR),
    ("end", Type::VARCHAR),
    ("reason", Type::VARCHAR),
];

const QUOTA_POLICY: Columns = &[
    ("max_per_day", Type::INT8),
    ("active", Type::BOOL),
    ("note", Type::VARCHAR),
    ("modified_by", Type::VARCHAR),
    ("modified_at", Type::INT8),
];

/// Field descriptions in the result format the client asked for.
fn schema(columns: Columns, format: &Format) -> Vec<FieldInfo> {
    columns
        .iter()
        .enumerate()
        .map(|(i, (name, ty))| FieldInfo::new((*name).into(), None, None, ty.clone(), format.format_for(i)))
        .collect()
}

/// Result columns for a statement, found from the table after `FROM`.
/// Statements without a result set describe as empty.
fn result_schema(sql: &str, format: &Format) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let mut words = lower.split_whitespace();
    if words.next() != Some("select") {
        return vec![];
    }
    let table = words
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_matches(|c: char| c == ';' || c == '"'));
    let columns = match table {
        Some("slots") => SLOTS,
        Some("day_status") => DAY_STATUS,
        Some("quota_status") => QUOTA_STATUS,
        Some("appointments") => APPOINTMENTS,
        Some("capacity_rules") => CAPACITY_RULES,
        Some("blackout_rules") => BLACKOUT_RULES,
        Some("quota_policy" | "quota_history") => QUOTA_POLICY,
        _ => return vec![],
    };
    schema(columns, format)
}

#[async_trait]
impl SimpleQueryHandler for SlotgateHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.actor(client)?;
        self.run(actor, query, &Format::UnifiedText).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SlotgateQueryParser;

#[async_trait]
impl QueryParser for SlotgateQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt, column_format.unwrap_or(&Format::UnifiedText)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SlotgateHandler {
    type Statement = String;
    type QueryParser = SlotgateQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(&self, client: &mut C, portal: &Portal<Self::Statement>, _max_rows: usize) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.actor(client)?;
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        self.run(actor, &sql, &portal.result_column_format)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(&target.statement, &Format::UnifiedText),
        ))
    }

    async fn do_describe_portal<C>(&self, _client: &mut C, target: &Portal<Self::Statement>) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(
            &target.statement.statement,
            &target.result_column_format,
        )))
    }
}

/// `$N` placeholders outside quoted literals: byte range and N.
fn placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut in_literal = false;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // An escaped '' toggles twice and leaves the state unchanged.
            b'\'' => {
                in_literal = !in_literal;
                i += 1;
            }
            b'$' if !in_literal => {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start
                    && let Ok(n) = sql[start..end].parse::<usize>()
                {
                    found.push((i..end, n));
                }
                i = end;
            }
            _ => i += 1,
        }
    }
    found
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    placeholders(sql).into_iter().map(|(_, n)| n).max().unwrap_or(0)
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
/// One left-to-right pass: substituted text is never scanned again.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut copied = 0;
    for (span, n) in placeholders(sql) {
        let Some(param) = n.checked_sub(1).and_then(|i| params.get(i)) else {
            continue;
        };
        result.push_str(&sql[copied..span.start]);
        match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes.as_ref());
                result.push('\'');
                result.push_str(&text.replace('\'', "''"));
                result.push('\'');
            }
            None => result.push_str("NULL"),
        }
        copied = span.end;
    }
    result.push_str(&sql[copied..]);
    result
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE for each engine error class.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) | EngineError::UnknownUser(_) => "22023",
        EngineError::NotFound(_) => "P0002",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::Forbidden { .. } => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::StoreUnavailable(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match &e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::Unsupported(_) => "0A000",
        SqlError::Parse(_) | SqlError::Empty | SqlError::WrongArity(..) | SqlError::MissingFilter(_) => "42601",
    };
    user_error(code, e.to_string())
}

// ── Factory ──────────────────────────────────────────────────────

#[derive(Clone)]
pub struct SlotgateFactory {
    handler: Arc<SlotgateHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SlotgateAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SlotgateFactory {
    pub fn new(engine: Arc<Engine>, directory: Arc<dyn Directory>, password: String) -> Self {
        let auth_source = SlotgateAuthSource::new(password, directory);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(SlotgateHandler::new(engine)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SlotgateFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    factory: SlotgateFactory,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    pgwire::tokio::process_socket(socket, tls, factory).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_params_finds_highest() {
        assert_eq!(count_params("SELECT * FROM slots WHERE date = $1"), 1);
        assert_eq!(count_params("INSERT INTO appointments VALUES ($1, $2, $3, $4)"), 4);
        assert_eq!(count_params("SELECT * FROM capacity_rules"), 0);
        assert_eq!(count_params("VALUES ($2, $10)"), 10);
    }

    #[test]
    fn substitute_quotes_and_nulls() {
        let sql = "INSERT INTO transitions VALUES ($1, $2, $3)";
        let params = vec![
            Some(b"01ARZ3NDEKTSV4RRFFQ69G5FAV".to_vec()),
            Some(b"decline".to_vec()),
            None,
        ];
        assert_eq!(
            substitute_params(sql, &params),
            "INSERT INTO transitions VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV', 'decline', NULL)"
        );

        let params = vec![Some(b"it's".to_vec())];
        assert_eq!(substitute_params("VALUES ($1)", &params), "VALUES ('it''s')");
    }

    #[test]
    fn substitution_does_not_clobber_two_digit_params() {
        let sql = "VALUES ($1, $10)";
        let params: Vec<_> = (1..=10)
            .map(|i| Some(format!("v{i}").into_bytes()))
            .collect();
        assert_eq!(substitute_params(sql, &params), "VALUES ('v1', 'v10')");
    }

    #[test]
    fn bound_values_are_not_rescanned() {
        let sql = "INSERT INTO transitions VALUES ($1, $2, $3)";
        let params = vec![
            Some(b"01ARZ3NDEKTSV4RRFFQ69G5FAV".to_vec()),
            Some(b"decline".to_vec()),
            Some(b"fee is $2, see $1".to_vec()),
        ];
        let substituted = substitute_params(sql, &params);
        assert_eq!(
            substituted,
            "INSERT INTO transitions VALUES ('01ARZ3NDEKTSV4RRFFQ69G5FAV', 'decline', 'fee is $2, see $1')"
        );
        match sql::parse_sql(&substituted).unwrap() {
            Command::InsertTransition { action, reason, .. } => {
                assert_eq!(action, Action::Decline);
                assert_eq!(reason.as_deref(), Some("fee is $2, see $1"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn placeholders_inside_literals_are_text() {
        let sql = "INSERT INTO quota_policy VALUES ($1, true, 'costs $1 or it''s $2')";
        assert_eq!(count_params(sql), 1);
        let params = vec![Some(b"3".to_vec())];
        assert_eq!(
            substitute_params(sql, &params),
            "INSERT INTO quota_policy VALUES ('3', true, 'costs $1 or it''s $2')"
        );
    }

    #[test]
    fn result_schema_by_table() {
        let names = |sql: &str| -> Vec<String> {
            result_schema(sql, &Format::UnifiedText)
                .iter()
                .map(|f| f.name().to_string())
                .collect()
        };
        assert_eq!(names("SELECT * FROM slots WHERE date = $1")[1], "time");
        assert_eq!(names("select * from quota_history;").len(), 5);
        assert!(names("INSERT INTO appointments VALUES ($1, $2, $3, $4)").is_empty());
        assert!(names("SELECT * FROM nowhere").is_empty());
    }

    #[test]
    fn sqlstate_mapping() {
        let id = Ulid::new();
        assert_eq!(sqlstate(&EngineError::Validation("x".into())), "22023");
        assert_eq!(sqlstate(&EngineError::UnknownUser(id)), "22023");
        assert_eq!(sqlstate(&EngineError::NotFound(id)), "P0002");
        assert_eq!(sqlstate(&EngineError::AlreadyExists(id)), "23505");
        assert_eq!(
            sqlstate(&EngineError::InvalidTransition {
                from: Status::Completed,
                action: Action::Cancel,
            }),
            "55000"
        );
        assert_eq!(sqlstate(&EngineError::Forbidden { actor: id, action: "x" }), "42501");
        assert_eq!(sqlstate(&EngineError::StoreUnavailable("disk".into())), "58030");
    }

    #[test]
    fn minute_text_pads() {
        assert_eq!(minute_text(9 * 60 + 5), "09:05");
        assert_eq!(minute_text(MINUTES_PER_DAY), "24:00");
    }
}
