use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_postgres::{Client, Config, NoTls, SimpleQueryMessage, SimpleQueryRow};
use ulid::Ulid;

use slotgate::calendar::BusinessCalendar;
use slotgate::directory::MemoryDirectory;
use slotgate::engine::{Engine, Services};
use slotgate::model::Role;
use slotgate::wire::{self, SlotgateFactory};

const PASSWORD: &str = "slotgate";

// ── Test infrastructure ──────────────────────────────────────

struct Users {
    admin: Ulid,
    staff: Ulid,
    alice: Ulid,
    bob: Ulid,
}

async fn start_test_server() -> (SocketAddr, Users) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let users = Users {
        admin: Ulid::new(),
        staff: Ulid::new(),
        alice: Ulid::new(),
        bob: Ulid::new(),
    };
    let directory = Arc::new(MemoryDirectory::with_users([
        (users.admin, Role::Admin),
        (users.staff, Role::Staff),
        (users.alice, Role::Client),
        (users.bob, Role::Client),
    ]));

    let dir = std::env::temp_dir().join(format!("slotgate_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let engine = Arc::new(
        Engine::new(
            dir.join("slotgate.wal"),
            BusinessCalendar::default(),
            2,
            Services::new(directory.clone()),
        )
        .unwrap(),
    );
    let factory = SlotgateFactory::new(engine, directory, PASSWORD.to_string());

    tokio::spawn(async move {
        loop {
            let (socket, _) = match listener.accept().await {
                Ok(conn) => conn,
                Err(_) => break,
            };
            let factory = factory.clone();
            tokio::spawn(async move {
                let _ = wire::process_connection(socket, factory, None).await;
            });
        }
    });

    (addr, users)
}

async fn try_connect(addr: SocketAddr, user: &str) -> Result<Client, tokio_postgres::Error> {
    let mut config = Config::new();
    config
        .host(addr.ip().to_string())
        .port(addr.port())
        .dbname("slotgate")
        .user(user)
        .password(PASSWORD);

    let (client, connection) = config.connect(NoTls).await?;
    tokio::spawn(async move {
        let _ = connection.await;
    });
    Ok(client)
}

async fn connect(addr: SocketAddr, user: Ulid) -> Client {
    try_connect(addr, &user.to_string()).await.unwrap()
}

async fn rows(client: &Client, sql: &str) -> Vec<SimpleQueryRow> {
    client
        .simple_query(sql)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|m| match m {
            SimpleQueryMessage::Row(row) => Some(row),
            _ => None,
        })
        .collect()
}

/// SQLSTATE and message of a failed statement.
async fn sql_error(client: &Client, sql: &str) -> (String, String) {
    let err = client.simple_query(sql).await.unwrap_err();
    let db = err.as_db_error().expect("server error");
    (db.code().code().to_string(), db.message().to_string())
}

async fn book(client: &Client, user: Ulid, date: &str, time: &str) -> Ulid {
    let id = Ulid::new();
    client
        .simple_query(&format!(
            "INSERT INTO appointments (id, user_id, date, time) VALUES ('{id}', '{user}', '{date}', '{time}')"
        ))
        .await
        .unwrap();
    id
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn unknown_user_cannot_log_in() {
    let (addr, _) = start_test_server().await;
    assert!(try_connect(addr, &Ulid::new().to_string()).await.is_err());
    assert!(try_connect(addr, "not-a-ulid").await.is_err());
}

#[tokio::test]
async fn slots_reflect_bookings() {
    let (addr, users) = start_test_server().await;
    let alice = connect(addr, users.alice).await;

    let before = rows(&alice, "SELECT * FROM slots WHERE date = '2026-10-19'").await;
    assert_eq!(before.len(), 16);
    assert_eq!(before[0].get("time"), Some("09:00"));
    assert!(before.iter().all(|r| r.get("time") != Some("12:00")));

    book(&alice, users.alice, "2026-10-19", "09:00").await;

    let after = rows(&alice, "SELECT * FROM slots WHERE date = '2026-10-19'").await;
    assert_eq!(after[0].get("booked"), Some("1"));
    assert_eq!(after[0].get("remaining"), Some("0"));
    assert_eq!(after[0].get("available"), Some("f"));
}

#[tokio::test]
async fn weekend_day_status() {
    let (addr, users) = start_test_server().await;
    let alice = connect(addr, users.alice).await;

    let status = rows(&alice, "SELECT * FROM day_status WHERE date = '2026-10-24'").await;
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].get("open"), Some("f"));
    assert_eq!(status[0].get("closed_reason"), Some("weekend"));
    assert!(rows(&alice, "SELECT * FROM slots WHERE date = '2026-10-24'").await.is_empty());
}

#[tokio::test]
async fn rejections_carry_reason() {
    let (addr, users) = start_test_server().await;
    let alice = connect(addr, users.alice).await;
    let bob = connect(addr, users.bob).await;

    book(&alice, users.alice, "2026-10-19", "09:00").await;
    let (code, message) = sql_error(
        &bob,
        &format!(
            "INSERT INTO appointments VALUES ('{}', '{}', '2026-10-19', '09:00')",
            Ulid::new(),
            users.bob
        ),
    )
    .await;
    assert_eq!(code, "P0001");
    assert!(message.starts_with("capacity_exceeded: "), "{message}");

    book(&alice, users.alice, "2026-10-19", "10:00").await;
    let (code, message) = sql_error(
        &alice,
        &format!(
            "INSERT INTO appointments VALUES ('{}', '{}', '2026-10-19', '11:00')",
            Ulid::new(),
            users.alice
        ),
    )
    .await;
    assert_eq!(code, "P0001");
    assert!(message.starts_with("quota_exceeded: "), "{message}");

    let quota = rows(
        &alice,
        &format!("SELECT * FROM quota_status WHERE user_id = '{}' AND date = '2026-10-19'", users.alice),
    )
    .await;
    assert_eq!(quota[0].get("used"), Some("2"));
    assert_eq!(quota[0].get("reached"), Some("t"));
    assert_eq!(quota[0].get("next_available"), Some("2026-10-20 09:00"));
}

#[tokio::test]
async fn lifecycle_over_extended_protocol() {
    let (addr, users) = start_test_server().await;
    let alice = connect(addr, users.alice).await;
    let staff = connect(addr, users.staff).await;

    let id = Ulid::new().to_string();
    let inserted = alice
        .execute(
            "INSERT INTO appointments VALUES ($1, $2, $3, $4)",
            &[&id, &users.alice.to_string(), &"2026-10-20", &"14:30"],
        )
        .await
        .unwrap();
    assert_eq!(inserted, 1);

    staff
        .execute(
            "INSERT INTO transitions VALUES ($1, $2, $3)",
            &[&id, &"approve", &None::<&str>],
        )
        .await
        .unwrap();

    let row = alice
        .query_one("SELECT * FROM appointments WHERE id = $1", &[&id])
        .await
        .unwrap();
    assert_eq!(row.get::<_, String>("status"), "approved");
    assert_eq!(row.get::<_, Option<String>>("staff_id"), Some(users.staff.to_string()));
    assert_eq!(row.get::<_, String>("time"), "14:30");
    assert!(row.get::<_, i64>("updated_at") >= row.get::<_, i64>("created_at"));

    staff
        .execute("INSERT INTO transitions VALUES ($1, $2)", &[&id, &"complete"])
        .await
        .unwrap();

    let (code, _) = sql_error(&alice, &format!("INSERT INTO transitions VALUES ('{id}', 'cancel')")).await;
    assert_eq!(code, "55000");
}

#[tokio::test]
async fn error_classes_map_to_sqlstate() {
    let (addr, users) = start_test_server().await;
    let alice = connect(addr, users.alice).await;
    let bob = connect(addr, users.bob).await;

    let id = book(&alice, users.alice, "2026-10-19", "09:00").await;

    let (code, _) = sql_error(&bob, &format!("INSERT INTO transitions VALUES ('{id}', 'approve')")).await;
    assert_eq!(code, "42501");

    let (code, _) = sql_error(&alice, &format!("INSERT INTO transitions VALUES ('{}', 'cancel')", Ulid::new())).await;
    assert_eq!(code, "P0002");

    let (code, _) = sql_error(
        &alice,
        &format!("INSERT INTO appointments VALUES ('{id}', '{}', '2026-10-20', '09:00')", users.alice),
    )
    .await;
    assert_eq!(code, "23505");

    let (code, _) = sql_error(
        &alice,
        &format!("INSERT INTO appointments VALUES ('{}', '{}', '2026-10-20', '09:10')", Ulid::new(), users.alice),
    )
    .await;
    assert_eq!(code, "22023");

    let (code, _) = sql_error(&alice, "SELECT * FROM bookings").await;
    assert_eq!(code, "42P01");

    let (code, _) = sql_error(&alice, "INSERT INTO quota_policy VALUES (5, true)").await;
    assert_eq!(code, "42501");
}

#[tokio::test]
async fn clients_see_only_their_own_appointments() {
    let (addr, users) = start_test_server().await;
    let alice = connect(addr, users.alice).await;
    let bob = connect(addr, users.bob).await;
    let staff = connect(addr, users.staff).await;

    book(&alice, users.alice, "2026-10-19", "09:00").await;
    book(&bob, users.bob, "2026-10-19", "09:30").await;

    assert_eq!(rows(&alice, "SELECT * FROM appointments WHERE date = '2026-10-19'").await.len(), 1);
    assert_eq!(rows(&alice, "SELECT * FROM appointments").await.len(), 1);
    assert_eq!(rows(&staff, "SELECT * FROM appointments WHERE date = '2026-10-19'").await.len(), 2);

    let (code, _) = sql_error(
        &alice,
        &format!("SELECT * FROM appointments WHERE user_id = '{}'", users.bob),
    )
    .await;
    assert_eq!(code, "42501");
}

#[tokio::test]
async fn admin_rules_shape_availability() {
    let (addr, users) = start_test_server().await;
    let admin = connect(addr, users.admin).await;
    let alice = connect(addr, users.alice).await;

    admin
        .simple_query(&format!(
            "INSERT INTO blackout_rules VALUES ('{}', '2026-10-21', NULL, NULL, NULL, 'staff training')",
            Ulid::new()
        ))
        .await
        .unwrap();
    let status = rows(&alice, "SELECT * FROM day_status WHERE date = '2026-10-21'").await;
    assert_eq!(status[0].get("closed_reason"), Some("staff training"));

    let rule_id = Ulid::new();
    admin
        .simple_query(&format!(
            "INSERT INTO capacity_rules VALUES ('{rule_id}', 'thu', '09:00', '12:00', 3, true)"
        ))
        .await
        .unwrap();
    let slots = rows(&alice, "SELECT * FROM slots WHERE date = '2026-10-22'").await;
    assert_eq!(slots[0].get("capacity"), Some("3"));

    let listed = rows(&alice, "SELECT * FROM capacity_rules").await;
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].get("weekday"), Some("thu"));

    admin
        .simple_query(&format!("DELETE FROM capacity_rules WHERE id = '{rule_id}'"))
        .await
        .unwrap();
    let slots = rows(&alice, "SELECT * FROM slots WHERE date = '2026-10-22'").await;
    assert_eq!(slots[0].get("capacity"), Some("1"));

    admin
        .simple_query("INSERT INTO quota_policy VALUES (3, true, 'busy week')")
        .await
        .unwrap();
    let policy = rows(&alice, "SELECT * FROM quota_policy").await;
    assert_eq!(policy[0].get("max_per_day"), Some("3"));
    assert_eq!(policy[0].get("note"), Some("busy week"));
    assert_eq!(policy[0].get("modified_by"), Some(users.admin.to_string().as_str()));
    assert_eq!(rows(&alice, "SELECT * FROM quota_history").await.len(), 1);
}
