use anyhow::Result;
use booking_service::api::{self, AppState};
use booking_service::config::Config;
use booking_service::coordinator::BookingCoordinator;
use booking_service::identity::GatewayHeaderIdentity;
use booking_service::notifications::KafkaNotificationSink;
use booking_service::payments::PaymentEventHandler;
use booking_service::store::PgStore;
use booking_service::sweeper::CompletionSweeper;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::{bb8::Pool, AsyncDieselConnectionManager};
use diesel_async::AsyncPgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let config = Config::parse();

    info!("Running database migrations...");
    let mut conn = PgConnection::establish(&config.database_url)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");

    let manager = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&config.database_url);
    let pool = Pool::builder()
        .max_size(config.database_pool_size)
        .connection_timeout(config.coordinator().store_timeout)
        .build(manager)
        .await?;

    let producer: FutureProducer = ClientConfig::new()
        .set("bootstrap.servers", &config.kafka_brokers)
        .set("message.timeout.ms", "5000")
        .create()?;

    let payment_consumer: StreamConsumer = ClientConfig::new()
        .set("group.id", &config.payment_consumer_group)
        .set("bootstrap.servers", &config.kafka_brokers)
        .set("enable.partition.eof", "false")
        .set("session.timeout.ms", "6000")
        .set("enable.auto.commit", "false")
        .create()?;
    payment_consumer.subscribe(&[&config.payment_topic])?;

    let store = Arc::new(PgStore::new(pool));
    let notifier = Arc::new(KafkaNotificationSink::new(producer, config.notification_topic.clone()));
    let coordinator = Arc::new(BookingCoordinator::new(
        store.clone(),
        store,
        notifier,
        config.coordinator(),
    ));

    let payment_handler = PaymentEventHandler::new(coordinator.clone());
    let sweeper = CompletionSweeper::new(coordinator.clone(), config.completion_sweep_interval());

    tokio::spawn(async move {
        payment_handler.run(payment_consumer).await;
    });

    tokio::spawn(async move {
        sweeper.run().await;
    });

    let app = api::create_router(AppState {
        coordinator,
        identity: Arc::new(GatewayHeaderIdentity::new(config.user_id_header.clone())),
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port)).await?;

    info!("Booking service web server started on port {}", config.port);

    axum::serve(listener, app).await?;

    Ok(())
}
