//! End-to-end byte-stream scenarios from spec.md §8, run against a real TCP
//! socket with a hand-scripted mock node on the other end (see
//! `support/mod.rs`) rather than asserting on the crate's internal encoder
//! output — the point is to prove the public `Connection` API produces and
//! consumes the wire bytes a real Cassandra node would.
mod support;

use cassandra_cql::{Connection, Consistency, ProtocolVersion, QueryOptions, QueryResult};
use tokio::net::{TcpListener, TcpStream};

use support::*;

async fn mock_node(mut stream: TcpStream) {
    // STARTUP/READY (spec.md §8 scenario 1).
    let startup = read_request(&mut stream).await.unwrap();
    assert_eq!(startup.opcode, OP_STARTUP);
    write_ready(&mut stream, startup.stream_id).await.unwrap();

    loop {
        let req = match read_request(&mut stream).await {
            Ok(r) => r,
            Err(_) => return,
        };
        match req.opcode {
            OP_QUERY => {
                let (cql, _) = read_long_string(&req.body, 0);
                let body = if cql.starts_with("USE ") {
                    set_keyspace_result("test")
                } else if cql.starts_with("SELECT a,b") {
                    rows_result(
                        &[("a", TYPE_VARCHAR), ("b", TYPE_INT)],
                        &[vec![varchar("hello"), int_val(100)]],
                    )
                } else if cql.starts_with("DROP TABLE") {
                    schema_change_result("DROPPED", "test", "users")
                } else {
                    void_result()
                };
                write_response(&mut stream, req.stream_id, OP_RESULT, &body).await.unwrap();
            }
            OP_PREPARE => {
                let id = b"0123456789ABCDEF".to_vec();
                let body = prepared_result(&id, &["f"]);
                write_response(&mut stream, req.stream_id, OP_RESULT, &body).await.unwrap();
            }
            OP_EXECUTE => {
                write_response(&mut stream, req.stream_id, OP_RESULT, &void_result()).await.unwrap();
            }
            _ => return,
        }
    }
}

async fn spawn_mock() -> std::net::SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        mock_node(stream).await;
    });
    addr
}

#[tokio::test]
async fn scenario_1_startup_ready() {
    let addr = spawn_mock().await;
    let conn = Connection::connect(addr, ProtocolVersion::V1).await.unwrap();
    let config = cassandra_cql::Config::parse(&format!("cassandra://{}", addr.ip())).unwrap();
    conn.startup(&config).await.unwrap();
}

#[tokio::test]
async fn scenario_2_use_returns_set_keyspace() {
    let addr = spawn_mock().await;
    let conn = Connection::connect(addr, ProtocolVersion::V1).await.unwrap();
    let config = cassandra_cql::Config::parse(&format!("cassandra://{}", addr.ip())).unwrap();
    conn.startup(&config).await.unwrap();

    let result = conn.query("USE test;", Consistency::Any, &QueryOptions::default()).await.unwrap();
    match result {
        QueryResult::SetKeyspace(ks) => assert_eq!(ks, "test"),
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test]
async fn scenario_3_select_returns_rows() {
    let addr = spawn_mock().await;
    let conn = Connection::connect(addr, ProtocolVersion::V1).await.unwrap();
    let config = cassandra_cql::Config::parse(&format!("cassandra://{}", addr.ip())).unwrap();
    conn.startup(&config).await.unwrap();

    let result = conn
        .query("SELECT a,b FROM c;", Consistency::One, &QueryOptions::default())
        .await
        .unwrap();
    let rows = result.into_rows().unwrap();
    assert_eq!(rows.rows.len(), 1);
    let a: String = rows.rows[0].try_get("a").unwrap();
    let b: i32 = rows.rows[0].try_get("b").unwrap();
    assert_eq!(a, "hello");
    assert_eq!(b, 100);
}

#[tokio::test]
async fn scenario_4_prepare_then_execute() {
    let addr = spawn_mock().await;
    let conn = Connection::connect(addr, ProtocolVersion::V1).await.unwrap();
    let config = cassandra_cql::Config::parse(&format!("cassandra://{}", addr.ip())).unwrap();
    conn.startup(&config).await.unwrap();

    let prepared = conn.prepare("INSERT INTO t (f) = (?)").await.unwrap();
    assert_eq!(&prepared.id[..], b"0123456789ABCDEF");
    assert_eq!(prepared.params.columns.len(), 1);

    let values = vec![Some(b"bound-value".to_vec())];
    let result = conn
        .execute_prepared(&prepared.id, Consistency::One, &values, &QueryOptions::default())
        .await
        .unwrap();
    assert!(matches!(result, QueryResult::Void));
}

#[tokio::test]
async fn scenario_5_schema_change() {
    let addr = spawn_mock().await;
    let conn = Connection::connect(addr, ProtocolVersion::V1).await.unwrap();
    let config = cassandra_cql::Config::parse(&format!("cassandra://{}", addr.ip())).unwrap();
    conn.startup(&config).await.unwrap();

    let result = conn
        .query("DROP TABLE users;", Consistency::One, &QueryOptions::default())
        .await
        .unwrap();
    match result {
        QueryResult::SchemaChange(change) => {
            assert_eq!(change.change_type, "DROPPED");
            assert_eq!(change.keyspace, "test");
            assert_eq!(change.table, "users");
        }
        other => panic!("unexpected {other:?}"),
    }
}
