use chrono::{NaiveDate, NaiveTime, Weekday};
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use thiserror::Error;
use ulid::Ulid;

use crate::model::*;

/// Which appointments a `SELECT * FROM appointments` asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppointmentFilter {
    Id(Ulid),
    Date(NaiveDate),
    User(Ulid),
    /// No filter: the acting user's own appointments.
    Mine,
}

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    SelectSlots {
        date: NaiveDate,
    },
    SelectDayStatus {
        date: NaiveDate,
    },
    SelectQuotaStatus {
        user_id: Ulid,
        date: NaiveDate,
    },
    InsertAppointment {
        id: Ulid,
        user_id: Ulid,
        date: NaiveDate,
        time: NaiveTime,
    },
    InsertTransition {
        appointment_id: Ulid,
        action: Action,
        reason: Option<String>,
    },
    SelectAppointments {
        filter: AppointmentFilter,
    },
    InsertCapacityRule {
        rule: SlotCapacityRule,
    },
    DeleteCapacityRule {
        id: Ulid,
    },
    InsertBlackoutRule {
        rule: BlackoutRule,
    },
    DeleteBlackoutRule {
        id: Ulid,
    },
    InsertQuotaPolicy {
        max_per_day: u32,
        active: bool,
        note: Option<String>,
    },
    SelectCapacityRules,
    SelectBlackoutRules,
    SelectQuotaPolicy,
    SelectQuotaHistory,
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.trim().trim_matches(';').trim().is_empty() {
        return Err(SqlError::Empty);
    }

    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "appointments" => {
            require_arity("appointments", 4, &values)?;
            Ok(Command::InsertAppointment {
                id: parse_ulid(&values[0])?,
                user_id: parse_ulid(&values[1])?,
                date: parse_date(&values[2])?,
                time: parse_time(&values[3])?,
            })
        }
        "transitions" => {
            require_arity("transitions", 2, &values)?;
            let action = parse_text(&values[1])?;
            Ok(Command::InsertTransition {
                appointment_id: parse_ulid(&values[0])?,
                action: Action::parse(&action).ok_or(SqlError::Parse(format!("unknown action: {action}")))?,
                reason: values.get(2).map(parse_text_or_null).transpose()?.flatten(),
            })
        }
        "capacity_rules" => {
            require_arity("capacity_rules", 5, &values)?;
            let active = match values.get(5) {
                Some(v) => parse_bool(v)?,
                None => true,
            };
            Ok(Command::InsertCapacityRule {
                rule: SlotCapacityRule {
                    id: parse_ulid(&values[0])?,
                    weekday: parse_weekday_or_null(&values[1])?,
                    span: Span {
                        start: parse_minute(&values[2])?,
                        end: parse_minute(&values[3])?,
                    },
                    max_concurrent: parse_u32(&values[4])?,
                    active,
                },
            })
        }
        "blackout_rules" => {
            require_arity("blackout_rules", 5, &values)?;
            let scope = match (parse_text_or_null(&values[1])?, parse_text_or_null(&values[2])?) {
                (Some(date), None) => BlackoutScope::Date(date_from_str(&date)?),
                (None, Some(days)) => BlackoutScope::Recurring(
                    Weekdays::parse(&days)
                        .filter(|d| !d.is_empty())
                        .ok_or(SqlError::Parse(format!("bad weekday list: {days}")))?,
                ),
                _ => return Err(SqlError::Parse("blackout needs exactly one of date or weekdays".into())),
            };
            let window = match (parse_text_or_null(&values[3])?, parse_text_or_null(&values[4])?) {
                (None, None) => None,
                (Some(start), Some(end)) => Some(Span {
                    start: minute_from_str(&start)?,
                    end: minute_from_str(&end)?,
                }),
                _ => return Err(SqlError::Parse("blackout window needs both start and end, or neither".into())),
            };
            let reason = values.get(5).map(parse_text_or_null).transpose()?.flatten();
            Ok(Command::InsertBlackoutRule {
                rule: BlackoutRule {
                    id: parse_ulid(&values[0])?,
                    scope,
                    window,
                    reason: reason.unwrap_or_default(),
                },
            })
        }
        "quota_policy" => {
            require_arity("quota_policy", 2, &values)?;
            Ok(Command::InsertQuotaPolicy {
                max_per_day: parse_u32(&values[0])?,
                active: parse_bool(&values[1])?,
                note: values.get(2).map(parse_text_or_null).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn require_arity(table: &'static str, min: usize, values: &[Expr]) -> Result<(), SqlError> {
    if values.len() < min {
        return Err(SqlError::WrongArity(table, min, values.len()));
    }
    Ok(())
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "capacity_rules" => Ok(Command::DeleteCapacityRule { id }),
        "blackout_rules" => Ok(Command::DeleteBlackoutRule { id }),
        "appointments" => Err(SqlError::Unsupported(
            "appointments are never deleted; insert a cancel transition".into(),
        )),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let filter = |col: &'static str| filters.iter().find(|(c, _)| c == col).map(|(_, e)| *e);

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            date: parse_date(filter("date").ok_or(SqlError::MissingFilter("date"))?)?,
        }),
        "day_status" => Ok(Command::SelectDayStatus {
            date: parse_date(filter("date").ok_or(SqlError::MissingFilter("date"))?)?,
        }),
        "quota_status" => Ok(Command::SelectQuotaStatus {
            user_id: parse_ulid(filter("user_id").ok_or(SqlError::MissingFilter("user_id"))?)?,
            date: parse_date(filter("date").ok_or(SqlError::MissingFilter("date"))?)?,
        }),
        "appointments" => {
            let which = if let Some(e) = filter("id") {
                AppointmentFilter::Id(parse_ulid(e)?)
            } else if let Some(e) = filter("date") {
                AppointmentFilter::Date(parse_date(e)?)
            } else if let Some(e) = filter("user_id") {
                AppointmentFilter::User(parse_ulid(e)?)
            } else {
                AppointmentFilter::Mine
            };
            Ok(Command::SelectAppointments { filter: which })
        }
        "capacity_rules" => Ok(Command::SelectCapacityRules),
        "blackout_rules" => Ok(Command::SelectBlackoutRules),
        "quota_policy" => Ok(Command::SelectQuotaPolicy),
        "quota_history" => Ok(Command::SelectQuotaHistory),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// Flatten `a = x AND b = y AND ...` into `(column, value)` pairs.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left).ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
                out.push((col, right.as_ref()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("operator {other} in WHERE"))),
        },
        other => Err(SqlError::Unsupported(format!("WHERE clause {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

/// The single VALUES row of an INSERT. Multi-row inserts are refused so
/// every admission gets its own decision and its own error.
fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

/// A string or bare number literal as text.
fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match parse_text_or_null(expr)? {
        Some(s) => Ok(s),
        None => Err(SqlError::Parse("unexpected NULL".into())),
    }
}

fn parse_text_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) | Value::SingleQuotedString(s) => s
                .trim()
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad integer {s}: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    date_from_str(&parse_text(expr)?)
}

fn date_from_str(s: &str) -> Result<NaiveDate, SqlError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    time_from_str(&parse_text(expr)?)
}

fn time_from_str(s: &str) -> Result<NaiveTime, SqlError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M:%S"))
        .map_err(|e| SqlError::Parse(format!("bad time {s}: {e}")))
}

/// Rule window bound. `24:00` is accepted as the end of the day.
fn minute_from_str(s: &str) -> Result<Minute, SqlError> {
    if s.trim() == "24:00" {
        return Ok(MINUTES_PER_DAY);
    }
    Ok(minute_of(time_from_str(s)?))
}

fn parse_minute(expr: &Expr) -> Result<Minute, SqlError> {
    minute_from_str(&parse_text(expr)?)
}

fn parse_weekday_or_null(expr: &Expr) -> Result<Option<Weekday>, SqlError> {
    parse_text_or_null(expr)?
        .map(|s| {
            s.trim()
                .parse::<Weekday>()
                .map_err(|_| SqlError::Parse(format!("bad weekday: {s}")))
        })
        .transpose()
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: expected at least {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const USER: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn parse_insert_appointment() {
        let sql = format!("INSERT INTO appointments (id, user_id, date, time) VALUES ('{ID}', '{USER}', '2026-10-19', '09:30')");
        match parse_sql(&sql).unwrap() {
            Command::InsertAppointment { id, user_id, date: d, time } => {
                assert_eq!(id.to_string(), ID);
                assert_eq!(user_id.to_string(), USER);
                assert_eq!(d, date(2026, 10, 19));
                assert_eq!(time, NaiveTime::from_hms_opt(9, 30, 0).unwrap());
            }
            cmd => panic!("expected InsertAppointment, got {cmd:?}"),
        }
    }

    #[test]
    fn parse_insert_appointment_with_seconds() {
        let sql = format!("INSERT INTO appointments VALUES ('{ID}', '{USER}', '2026-10-19', '14:00:00')");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::InsertAppointment { .. }));
    }

    #[test]
    fn parse_insert_appointment_bad_date() {
        let sql = format!("INSERT INTO appointments VALUES ('{ID}', '{USER}', '2026-02-30', '09:00')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_insert_appointment_too_few_values() {
        let sql = format!("INSERT INTO appointments VALUES ('{ID}', '{USER}', '2026-10-19')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::WrongArity("appointments", 4, 3))));
    }

    #[test]
    fn multi_row_insert_refused() {
        let sql = format!(
            "INSERT INTO appointments VALUES ('{ID}', '{USER}', '2026-10-19', '09:00'), ('{ID}', '{USER}', '2026-10-19', '09:30')"
        );
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn parse_transition_with_and_without_reason() {
        let sql = format!("INSERT INTO transitions VALUES ('{ID}', 'decline', 'double booked')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertTransition {
                appointment_id: Ulid::from_string(ID).unwrap(),
                action: Action::Decline,
                reason: Some("double booked".into()),
            }
        );

        let sql = format!("INSERT INTO transitions VALUES ('{ID}', 'APPROVE')");
        match parse_sql(&sql).unwrap() {
            Command::InsertTransition { action, reason, .. } => {
                assert_eq!(action, Action::Approve);
                assert_eq!(reason, None);
            }
            cmd => panic!("expected InsertTransition, got {cmd:?}"),
        }

        let sql = format!("INSERT INTO transitions VALUES ('{ID}', 'cancel', NULL)");
        assert!(matches!(
            parse_sql(&sql).unwrap(),
            Command::InsertTransition { reason: None, .. }
        ));
    }

    #[test]
    fn parse_transition_unknown_action() {
        let sql = format!("INSERT INTO transitions VALUES ('{ID}', 'reopen')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_select_slots_and_day_status() {
        assert_eq!(
            parse_sql("SELECT * FROM slots WHERE date = '2026-10-19'").unwrap(),
            Command::SelectSlots { date: date(2026, 10, 19) }
        );
        assert_eq!(
            parse_sql("SELECT * FROM day_status WHERE date = '2026-10-24';").unwrap(),
            Command::SelectDayStatus { date: date(2026, 10, 24) }
        );
        assert!(matches!(
            parse_sql("SELECT * FROM slots"),
            Err(SqlError::MissingFilter("date"))
        ));
    }

    #[test]
    fn parse_select_quota_status() {
        let sql = format!("SELECT * FROM quota_status WHERE date = '2026-10-19' AND user_id = '{USER}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectQuotaStatus {
                user_id: Ulid::from_string(USER).unwrap(),
                date: date(2026, 10, 19),
            }
        );
    }

    #[test]
    fn parse_select_appointments_filters() {
        let cases = [
            (format!("SELECT * FROM appointments WHERE id = '{ID}'"), AppointmentFilter::Id(Ulid::from_string(ID).unwrap())),
            ("SELECT * FROM appointments WHERE date = '2026-10-19'".to_string(), AppointmentFilter::Date(date(2026, 10, 19))),
            (format!("SELECT * FROM appointments WHERE user_id = '{USER}'"), AppointmentFilter::User(Ulid::from_string(USER).unwrap())),
            ("SELECT * FROM appointments".to_string(), AppointmentFilter::Mine),
        ];
        for (sql, expected) in cases {
            assert_eq!(parse_sql(&sql).unwrap(), Command::SelectAppointments { filter: expected }, "{sql}");
        }
    }

    #[test]
    fn where_rejects_ranges() {
        assert!(matches!(
            parse_sql("SELECT * FROM appointments WHERE date >= '2026-10-19'"),
            Err(SqlError::Unsupported(_))
        ));
    }

    #[test]
    fn parse_capacity_rule() {
        let sql = format!(r#"INSERT INTO capacity_rules (id, weekday, start, "end", max, active) VALUES ('{ID}', 'fri', '14:00', '16:00', 3, false)"#);
        match parse_sql(&sql).unwrap() {
            Command::InsertCapacityRule { rule } => {
                assert_eq!(rule.weekday, Some(Weekday::Fri));
                assert_eq!(rule.span, Span::new(14 * 60, 16 * 60));
                assert_eq!(rule.max_concurrent, 3);
                assert!(!rule.active);
            }
            cmd => panic!("expected InsertCapacityRule, got {cmd:?}"),
        }

        let sql = format!("INSERT INTO capacity_rules VALUES ('{ID}', NULL, '09:00', '24:00', '2')");
        match parse_sql(&sql).unwrap() {
            Command::InsertCapacityRule { rule } => {
                assert_eq!(rule.weekday, None);
                assert_eq!(rule.span.end, MINUTES_PER_DAY);
                assert_eq!(rule.max_concurrent, 2);
                assert!(rule.active);
            }
            cmd => panic!("expected InsertCapacityRule, got {cmd:?}"),
        }
    }

    #[test]
    fn negative_capacity_is_a_parse_error() {
        let sql = format!("INSERT INTO capacity_rules VALUES ('{ID}', NULL, '09:00', '10:00', -1)");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_blackout_rules() {
        let sql = format!("INSERT INTO blackout_rules VALUES ('{ID}', '2026-12-25', NULL, NULL, NULL, 'holiday')");
        match parse_sql(&sql).unwrap() {
            Command::InsertBlackoutRule { rule } => {
                assert_eq!(rule.scope, BlackoutScope::Date(date(2026, 12, 25)));
                assert_eq!(rule.window, None);
                assert_eq!(rule.reason, "holiday");
            }
            cmd => panic!("expected InsertBlackoutRule, got {cmd:?}"),
        }

        let sql = format!("INSERT INTO blackout_rules VALUES ('{ID}', NULL, 'mon,wed', '15:00', '16:00')");
        match parse_sql(&sql).unwrap() {
            Command::InsertBlackoutRule { rule } => {
                let days: Weekdays = [Weekday::Mon, Weekday::Wed].into_iter().collect();
                assert_eq!(rule.scope, BlackoutScope::Recurring(days));
                assert_eq!(rule.window, Some(Span::new(15 * 60, 16 * 60)));
                assert_eq!(rule.reason, "");
            }
            cmd => panic!("expected InsertBlackoutRule, got {cmd:?}"),
        }
    }

    #[test]
    fn blackout_scope_must_be_exactly_one() {
        let both = format!("INSERT INTO blackout_rules VALUES ('{ID}', '2026-12-25', 'mon', NULL, NULL)");
        let neither = format!("INSERT INTO blackout_rules VALUES ('{ID}', NULL, NULL, NULL, NULL)");
        let half_window = format!("INSERT INTO blackout_rules VALUES ('{ID}', '2026-12-25', NULL, '10:00', NULL)");
        for sql in [both, neither, half_window] {
            assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))), "{sql}");
        }
    }

    #[test]
    fn parse_quota_policy() {
        assert_eq!(
            parse_sql("INSERT INTO quota_policy VALUES (3, true, 'peak season')").unwrap(),
            Command::InsertQuotaPolicy {
                max_per_day: 3,
                active: true,
                note: Some("peak season".into()),
            }
        );
        assert_eq!(
            parse_sql("INSERT INTO quota_policy VALUES ('2', 'f')").unwrap(),
            Command::InsertQuotaPolicy {
                max_per_day: 2,
                active: false,
                note: None,
            }
        );
    }

    #[test]
    fn parse_deletes() {
        let sql = format!("DELETE FROM capacity_rules WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteCapacityRule { .. }));
        let sql = format!("DELETE FROM blackout_rules WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql).unwrap(), Command::DeleteBlackoutRule { .. }));
        let sql = format!("DELETE FROM appointments WHERE id = '{ID}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
        assert!(matches!(
            parse_sql("DELETE FROM capacity_rules"),
            Err(SqlError::MissingFilter("id"))
        ));
    }

    #[test]
    fn parse_listings() {
        assert_eq!(parse_sql("SELECT * FROM capacity_rules").unwrap(), Command::SelectCapacityRules);
        assert_eq!(parse_sql("select * from BLACKOUT_RULES").unwrap(), Command::SelectBlackoutRules);
        assert_eq!(parse_sql("SELECT * FROM quota_policy").unwrap(), Command::SelectQuotaPolicy);
        assert_eq!(parse_sql("SELECT * FROM quota_history").unwrap(), Command::SelectQuotaHistory);
    }

    #[test]
    fn parse_unknown_table_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{ID}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(t)) if t == "foobar"));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(parse_sql("  ;"), Err(SqlError::Empty)));
    }
}
