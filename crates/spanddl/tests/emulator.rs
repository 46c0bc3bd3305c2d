//! End-to-end reconciliation against the PGAdapter emulator image.
//!
//! Needs Docker, or a running PGAdapter given by `SPANDDL_TEST_HOST` and
//! `SPANDDL_TEST_PORT`. Run with `cargo test -- --ignored`.

use std::time::Duration;

use spanddl::{
    ColumnDescriptor, Config, Dialect, LogicalType, Migrator, PgSession, Schema, TableDescriptor,
};
use testcontainers::core::{IntoContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, GenericImage};

const DATABASE: &str = "test-database";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Keeps the container alive for as long as the client is used.
struct Emulator {
    _container: Option<ContainerAsync<GenericImage>>,
    client: tokio_postgres::Client,
}

async fn connect(host: &str, port: u16) -> Result<tokio_postgres::Client, tokio_postgres::Error> {
    let (client, connection) = tokio_postgres::connect(
        &format!("host={host} port={port} user=postgres dbname={DATABASE}"),
        tokio_postgres::NoTls,
    )
    .await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            eprintln!("Database connection error: {}", e);
        }
    });
    Ok(client)
}

async fn emulator() -> Emulator {
    if let (Ok(host), Ok(port)) = (
        std::env::var("SPANDDL_TEST_HOST"),
        std::env::var("SPANDDL_TEST_PORT"),
    ) {
        let client = connect(&host, port.parse().unwrap()).await.unwrap();
        return Emulator {
            _container: None,
            client,
        };
    }

    let container = GenericImage::new("gcr.io/cloud-spanner-pg-adapter/pgadapter-emulator", "latest")
        .with_exposed_port(5432.tcp())
        .with_wait_for(WaitFor::seconds(5))
        .start()
        .await
        .unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();

    // The emulator keeps starting up for a while after the port opens
    let mut attempts = 0;
    let client = loop {
        match connect("127.0.0.1", port).await {
            Ok(client) => break client,
            Err(e) if attempts < 30 => {
                attempts += 1;
                eprintln!("waiting for emulator: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            Err(e) => panic!("emulator did not come up: {}", e),
        }
    };
    Emulator {
        _container: Some(container),
        client,
    }
}

fn music() -> Schema {
    let singers = TableDescriptor::new("singers")
        .column(
            ColumnDescriptor::new("id", LogicalType::Int64)
                .not_null()
                .auto_increment(),
        )
        .column(ColumnDescriptor::new("first_name", LogicalType::String).length(200))
        .column(ColumnDescriptor::new("last_name", LogicalType::String).not_null())
        .column(ColumnDescriptor::new("active", LogicalType::Bool).default_expr("true"))
        .column(ColumnDescriptor::new("deleted_at", LogicalType::Timestamp))
        .primary_key(&["id"])
        .index("idx_singers_last_name", &["last_name"]);
    let albums = TableDescriptor::new("albums")
        .column(ColumnDescriptor::new("id", LogicalType::Int64).not_null())
        .column(ColumnDescriptor::new("singer_id", LogicalType::Int64).not_null())
        .column(ColumnDescriptor::new("title", LogicalType::String))
        .primary_key(&["id"])
        .foreign_key(&["singer_id"], "singers", &["id"]);
    Schema::from_tables([singers, albums]).unwrap()
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_reconcile_against_emulator() {
    init_tracing();
    let emulator = emulator().await;
    let config = Config::new(Dialect::PostgreSql).database(DATABASE);
    let mut migrator = Migrator::new(PgSession::new(emulator.client), config);

    let dry = migrator.auto_migrate_dry_run(&music()).await.unwrap();
    assert!(!dry.is_empty());
    assert!(!migrator.has_table("singers").await.unwrap());

    let plan = migrator.auto_migrate(&music()).await.unwrap();
    assert!(!plan.is_empty());
    assert!(migrator.has_table("singers").await.unwrap());
    assert!(migrator.has_index("singers", "idx_singers_deleted_at").await.unwrap());
    assert!(migrator.has_constraint("albums", "fk_singers_albums").await.unwrap());

    let again = migrator.auto_migrate(&music()).await.unwrap();
    assert!(again.is_empty(), "second run planned:\n{}", again);

    let columns = migrator.column_types("singers").await.unwrap();
    assert_eq!(columns[0].name, "id");
    assert!(columns[0].auto_increment);

    migrator.drop_tables(&["singers", "albums"]).await.unwrap();
    assert!(migrator.get_tables().await.unwrap().is_empty());
}
