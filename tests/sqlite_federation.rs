// SPDX-License-Identifier: Apache-2.0

//! End-to-end federation over SQLite files.

use std::path::Path;

use dorm::engine::drivers::sqlite::SqliteDriver;
use dorm::engine::{
    BackendKind, ColumnFilter, ColumnShape, ConnectionConfig, Driver, FilterOperator, NodeId,
    TableShape, Value,
};
use dorm::federation::{Endpoint, NodeRegistry, Placement};
use dorm::schema::{Model, ModelInstance};
use dorm::FederationConfig;

fn sqlite_config(path: &Path) -> ConnectionConfig {
    ConnectionConfig {
        driver: BackendKind::Sqlite,
        host: String::new(),
        port: 0,
        username: String::new(),
        password: String::new().into(),
        database: Some(path.display().to_string()),
        pool_max_connections: Some(2),
        pool_acquire_timeout_secs: Some(5),
    }
}

async fn seed(path: &Path, orders: &[(i64, i64)]) {
    let driver = SqliteDriver::new(&sqlite_config(path)).unwrap();
    driver
        .execute("CREATE TABLE users (id integer NOT NULL PRIMARY KEY, name text)")
        .await
        .unwrap();
    driver
        .execute("CREATE TABLE orders (id integer NOT NULL, user_id integer REFERENCES users(id))")
        .await
        .unwrap();
    driver
        .execute("INSERT INTO users (id, name) VALUES (1, 'ada'), (2, 'grace')")
        .await
        .unwrap();
    for (id, user_id) in orders {
        driver
            .execute(&format!("INSERT INTO orders (id, user_id) VALUES ({}, {})", id, user_id))
            .await
            .unwrap();
    }
    driver.commit().await.unwrap();
    driver.close().await.unwrap();
}

fn endpoint_url(path: &Path, handle: &str) -> String {
    format!("sqlite://{}?id={}", path.display(), handle)
}

fn sorted_ids(records: &[dorm::Record]) -> Vec<i64> {
    let mut ids: Vec<i64> = records
        .iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .collect();
    ids.sort_unstable();
    ids
}

#[tokio::test]
async fn test_orders_federate_across_two_nodes() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.db");
    let b = dir.path().join("b.db");
    seed(&a, &[(10, 1), (11, 2)]).await;
    seed(&b, &[(20, 2)]).await;

    let config = FederationConfig {
        endpoints: vec![endpoint_url(&a, "node-a"), endpoint_url(&b, "node-b")],
        ..FederationConfig::default()
    };
    let registry = NodeRegistry::from_config(config).unwrap();
    let report = registry.discover_nodes().await.unwrap();
    assert!(report.is_complete());
    assert_eq!(registry.len().await, 2);

    let orders = registry.find_model("orders").await;
    assert_eq!(orders.len(), 2);
    let records = orders.fetch_all().await.unwrap();
    assert_eq!(records.len(), 3);

    let mut ids: Vec<i64> = records
        .iter()
        .filter_map(|r| r.get("id").and_then(Value::as_i64))
        .collect();
    ids.sort_unstable();
    assert_eq!(ids, vec![10, 11, 20]);

    for node in registry.nodes().await {
        let schema = node.schema();
        let orders = schema.model("orders").unwrap();
        let target = schema.foreign_target(orders.field("user_id").unwrap()).unwrap();
        assert_eq!(target.name(), "Users");
        assert_eq!(target.field_count(), 2);
    }

    let filtered = orders.where_eq("user_id", 2).fetch_all().await.unwrap();
    assert_eq!(filtered.len(), 2);

    registry.rollback_all().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
async fn test_create_and_save_through_registry() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.db");
    let b = dir.path().join("b.db");
    seed(&a, &[]).await;
    seed(&b, &[]).await;

    let config = FederationConfig {
        endpoints: vec![endpoint_url(&a, "node-a"), endpoint_url(&b, "node-b")],
        ..FederationConfig::default()
    };
    let registry = NodeRegistry::from_config(config).unwrap();
    registry.discover_nodes().await.unwrap();

    let tags = Model::detached(
        TableShape::new("tags")
            .column(ColumnShape::new("id", "integer").not_null())
            .column(ColumnShape::new("label", "text")),
    );
    let node_a = NodeId::from_handle("node-a");
    let report = registry
        .create_model(&tags, Some(Placement::Node(node_a)))
        .await
        .unwrap();
    assert!(report.is_complete());

    let tag = ModelInstance::new("tags").set("id", 1).set("label", "rust");
    let saved = registry.save_instance(&tag, None).await.unwrap();
    assert_eq!(saved.succeeded, vec![(node_a, 1)]);
    assert_eq!(saved.skipped.len(), 1);

    // the row was committed and survives a fresh discovery
    registry.discover_nodes().await.unwrap();
    let records = registry.find_model("tags").await.fetch_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].node, node_a);
    assert_eq!(records[0].get("label"), Some(&Value::Text("rust".to_string())));

    // creating it again with the same shape is a no-op
    registry
        .create_model(&tags, Some(Placement::Node(node_a)))
        .await
        .unwrap();

    registry.rollback_all().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
async fn test_reads_see_new_commits_and_do_not_block_writes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.db");
    seed(&path, &[]).await;

    let config = FederationConfig {
        endpoints: vec![endpoint_url(&path, "node-a")],
        ..FederationConfig::default()
    };
    let registry = NodeRegistry::from_config(config).unwrap();
    registry.discover_nodes().await.unwrap();

    let users = registry.find_model("users").await;
    assert_eq!(sorted_ids(&users.fetch_all().await.unwrap()), vec![1, 2]);

    // another client commits a row between two federated reads
    let writer = SqliteDriver::new(&sqlite_config(&path)).unwrap();
    writer
        .execute("INSERT INTO users (id, name) VALUES (3, 'edsger')")
        .await
        .unwrap();
    writer.commit().await.unwrap();
    writer.close().await.unwrap();

    assert_eq!(sorted_ids(&users.fetch_all().await.unwrap()), vec![1, 2, 3]);

    let user = ModelInstance::new("users").set("id", 4).set("name", "barbara");
    let saved = registry.save_instance(&user, None).await.unwrap();
    assert_eq!(saved.succeeded, vec![(NodeId::from_handle("node-a"), 1)]);

    assert_eq!(sorted_ids(&users.fetch_all().await.unwrap()), vec![1, 2, 3, 4]);

    let reader = SqliteDriver::new(&sqlite_config(&path)).unwrap();
    let seen = reader.execute("SELECT id FROM users").await.unwrap();
    assert_eq!(seen.rows.len(), 4);
    reader.close().await.unwrap();

    registry.shutdown().await;
}

#[tokio::test]
async fn test_select_filter_and_limit_against_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.db");
    let b = dir.path().join("b.db");
    seed(&a, &[(10, 1), (11, 2), (12, 2)]).await;
    seed(&b, &[(20, 1), (21, 2)]).await;

    let config = FederationConfig {
        endpoints: vec![endpoint_url(&a, "node-a"), endpoint_url(&b, "node-b")],
        ..FederationConfig::default()
    };
    let registry = NodeRegistry::from_config(config).unwrap();
    registry.discover_nodes().await.unwrap();
    let orders = registry.find_model("orders").await;

    // projection keeps the requested column order
    let projected = orders
        .select(["user_id", "id"])
        .where_eq("user_id", 2)
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(sorted_ids(&projected), vec![11, 12, 21]);
    for record in &projected {
        assert_eq!(record.columns().collect::<Vec<_>>(), vec!["user_id", "id"]);
        assert_eq!(record.get("user_id"), Some(&Value::Int(2)));
    }

    let later = orders
        .filter(ColumnFilter::new("id", FilterOperator::Gt, 11))
        .fetch_all()
        .await
        .unwrap();
    assert_eq!(sorted_ids(&later), vec![12, 20, 21]);

    // the limit bounds each node, not the merged result
    let limited = orders.limit(1).fetch_all().await.unwrap();
    assert_eq!(limited.len(), 2);
    let a_id = NodeId::from_handle("node-a");
    assert_eq!(limited.iter().filter(|r| r.node == a_id).count(), 1);

    let narrowed = orders.where_eq("user_id", 2).limit(5).fetch_all().await.unwrap();
    assert_eq!(narrowed.len(), 3);

    // the base handle is unaffected by the branches above
    assert_eq!(orders.fetch_all().await.unwrap().len(), 5);

    registry.rollback_all().await.unwrap();
    registry.shutdown().await;
}

#[tokio::test]
async fn test_sqlite_endpoint_parses_to_node() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.db");
    let ep = Endpoint::parse(&endpoint_url(&path, "node-c")).unwrap();

    assert_eq!(ep.backend, Some(BackendKind::Sqlite));
    assert_eq!(ep.database.as_deref(), Some(path.display().to_string().as_str()));
    assert_eq!(ep.node_id(), NodeId::from_handle("node-c"));
}
