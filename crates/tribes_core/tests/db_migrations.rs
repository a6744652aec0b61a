use rusqlite::{params, Connection};
use tribes_core::db::migrations::latest_version;
use tribes_core::db::{open_db, open_db_in_memory, DbError};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    for table in [
        "tribes",
        "tribe_members",
        "tribe_member_requests",
        "tribe_invite_tokens",
        "tribe_items",
        "tribe_proposals",
        "tribe_proposal_actions",
        "appointments",
        "todos",
        "routines",
        "grocery_items",
        "personal_item_suppressions",
        "tribe_messages",
        "tribe_activities",
        "notification_log",
        "job_locks",
    ] {
        assert_table_exists(&conn, table);
    }
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tribes.db");

    let conn_first = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "tribe_proposals");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn failed_migration_names_its_version_and_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clash.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("CREATE TABLE tribe_members (id TEXT);").unwrap();
    drop(conn);

    match open_db(&path).unwrap_err() {
        DbError::Migration { version, .. } => assert_eq!(version, 1),
        other => panic!("unexpected error: {other}"),
    }

    let conn = Connection::open(&path).unwrap();
    assert_eq!(schema_version(&conn), 0);
    let tribes_tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'tribes';",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(tribes_tables, 0);
}

#[test]
fn file_databases_use_wal_and_memory_databases_do_not() {
    let dir = tempfile::tempdir().unwrap();
    let file_conn = open_db(dir.path().join("tribes.db")).unwrap();
    assert_eq!(journal_mode(&file_conn), "wal");

    let memory_conn = open_db_in_memory().unwrap();
    assert_eq!(journal_mode(&memory_conn), "memory");
}

#[test]
fn foreign_keys_are_enforced() {
    let conn = open_db_in_memory().unwrap();
    let enabled: i64 = conn
        .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(enabled, 1);

    let orphan = conn.execute(
        "INSERT INTO tribe_items (id, tribe_id, created_by, item_type, data, created_at)
         VALUES ('i1', 'missing-tribe', 'alice', 'task', '{}', 1);",
        [],
    );
    assert!(orphan.is_err());
}

#[test]
fn proposal_triggers_reject_other_initial_states_and_illegal_moves() {
    let conn = open_db_in_memory().unwrap();
    seed_item(&conn);

    let accepted_insert = conn.execute(
        "INSERT INTO tribe_proposals (id, item_id, recipient_id, state, created_at, state_changed_at)
         VALUES ('p0', 'i1', 'm1', 'accepted', 1, 1);",
        [],
    );
    assert!(accepted_insert.is_err());

    conn.execute(
        "INSERT INTO tribe_proposals (id, item_id, recipient_id, created_at, state_changed_at)
         VALUES ('p1', 'i1', 'm1', 1, 1);",
        [],
    )
    .unwrap();
    let state: String = conn
        .query_row("SELECT state FROM tribe_proposals WHERE id = 'p1';", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(state, "proposed");

    set_state(&conn, "p1", "not_now").unwrap();
    assert!(set_state(&conn, "p1", "proposed").is_err());
    set_state(&conn, "p1", "accepted").unwrap();
    assert!(set_state(&conn, "p1", "dismissed").is_err());
    assert!(set_state(&conn, "p1", "not_now").is_err());
}

#[test]
fn dedup_key_is_unique_per_user() {
    let conn = open_db_in_memory().unwrap();
    seed_item(&conn);
    conn.execute(
        "INSERT INTO tribe_proposals (id, item_id, recipient_id, created_at, state_changed_at)
         VALUES ('p1', 'i1', 'm1', 1, 1);",
        [],
    )
    .unwrap();

    let insert_action = |id: &str, user_id: &str| {
        conn.execute(
            "INSERT INTO tribe_proposal_actions
                (id, user_id, proposal_id, idempotency_key, action, result_state, created_at)
             VALUES (?1, ?2, 'p1', 'key-1', 'accepted', 'accepted', 1);",
            params![id, user_id],
        )
    };
    insert_action("a1", "bob").unwrap();
    assert!(insert_action("a2", "bob").is_err());
    insert_action("a3", "carol").unwrap();
}

fn seed_item(conn: &Connection) {
    conn.execute_batch(
        "INSERT INTO tribes (id, name, owner_id, tribe_type, created_at)
         VALUES ('t1', 'Home', 'alice', 'family', 1);
         INSERT INTO tribe_members (id, tribe_id, user_id, invited_by, invited_at, accepted_at)
         VALUES ('m1', 't1', 'bob', 'alice', 1, 1);
         INSERT INTO tribe_items (id, tribe_id, created_by, item_type, data, created_at)
         VALUES ('i1', 't1', 'alice', 'grocery', '{\"content\":\"Milk\"}', 1);",
    )
    .unwrap();
}

fn set_state(conn: &Connection, proposal_id: &str, state: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE tribe_proposals SET state = ?2 WHERE id = ?1;",
        params![proposal_id, state],
    )
}

fn journal_mode(conn: &Connection) -> String {
    conn.query_row("PRAGMA journal_mode;", [], |row| row.get(0))
        .unwrap()
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
