//! jobroute CLI: run the worker, set up broker topology, submit test jobs.

use clap::{Parser, Subcommand};
use jobroute_rs::broker::{AmqpBroker, Broker, REQUEST_EXCHANGE, Topology};
use jobroute_rs::config::Config;
use jobroute_rs::config::secrets::ExposeSecret;
use jobroute_rs::dispatch::Dispatcher;
use jobroute_rs::engine::{Consumer, Pipeline};
use jobroute_rs::envelope::{MESSAGE_KEY, MESSAGE_TYPE_KEY};
use jobroute_rs::model::JobType;
use jobroute_rs::publish::CompletionPublisher;
use jobroute_rs::storage::FsStorage;
use jobroute_rs::telemetry::{TelemetryConfig, init_telemetry};
use jobroute_rs::worker::{WorkerCatalog, WorkerRegistry};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "jobroute", about = "Routes AI generation jobs from RabbitMQ to workers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Consume job requests until interrupted
    Serve,
    /// Declare exchanges, queues and bindings, then exit
    Topology,
    /// Publish a test job request
    Submit {
        /// Job type, e.g. TalkingHead
        job_type: JobType,
        /// JSON object payload
        #[arg(long, default_value = "{}")]
        payload: String,
        /// Wrap the payload in a MassTransit-style envelope with type hints
        #[arg(long)]
        envelope: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config = Config::from_env()?;

    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "jobroute".to_string(),
        default_level: config.log_level.clone(),
    })?;

    match cli.command {
        Command::Serve => cmd_serve(config).await,
        Command::Topology => {
            let broker = AmqpBroker::connect(config.amqp_url.expose_secret(), 1).await?;
            Topology::default().setup(&broker).await?;
            broker.close().await;
            Ok(())
        }
        Command::Submit {
            job_type,
            payload,
            envelope,
        } => cmd_submit(config, job_type, payload, envelope).await,
    }
}

async fn cmd_serve(config: Config) -> anyhow::Result<()> {
    info!(
        prefetch = config.prefetch_count,
        workers_dir = %config.workers_dir.display(),
        storage_root = %config.storage_root.display(),
        "starting jobroute worker"
    );

    let catalog = WorkerCatalog::load_from_dir(&config.workers_dir, config.work_dir.clone())?;
    info!(workers = catalog.len(), "worker catalog loaded");

    let broker = Arc::new(
        AmqpBroker::connect(config.amqp_url.expose_secret(), config.prefetch_count).await?,
    );
    let topology = Topology::default();
    topology.setup(broker.as_ref()).await?;

    let storage = FsStorage::new(config.storage_root.clone(), config.public_base_url.clone());
    let dispatcher = Dispatcher::new(
        WorkerRegistry::new(Arc::new(catalog)),
        Arc::new(storage),
    );
    let publisher = CompletionPublisher::new(
        Arc::clone(&broker) as Arc<dyn Broker>,
        topology.completion_exchange.clone(),
    );
    let pipeline = Pipeline::new(Arc::new(dispatcher), publisher);

    let consumer = Consumer::new(Arc::new(pipeline), config.prefetch_count);
    let deliveries = broker.consume_all().await?;

    let ctrl = consumer.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("interrupt received, finishing in-flight jobs");
        ctrl.shutdown();
    });

    let outcome = consumer.run(deliveries).await;
    broker.close().await;
    outcome?;
    Ok(())
}

async fn cmd_submit(
    config: Config,
    job_type: JobType,
    payload: String,
    envelope: bool,
) -> anyhow::Result<()> {
    let route = job_type
        .route()
        .ok_or_else(|| anyhow::anyhow!("cannot submit {job_type} jobs"))?;

    let mut payload: serde_json::Value = serde_json::from_str(&payload)?;
    let fields = payload
        .as_object_mut()
        .ok_or_else(|| anyhow::anyhow!("payload must be a JSON object"))?;
    if !fields.contains_key("jobId") && !fields.contains_key("JobId") {
        fields.insert(
            "jobId".to_string(),
            serde_json::Value::String(uuid::Uuid::new_v4().to_string()),
        );
    }
    let job_id = fields
        .get("jobId")
        .or_else(|| fields.get("JobId"))
        .map(|v| v.as_str().map(str::to_owned).unwrap_or_else(|| v.to_string()))
        .unwrap_or_default();

    let body = if envelope {
        serde_json::json!({
            "messageId": uuid::Uuid::new_v4().to_string(),
            MESSAGE_TYPE_KEY: [format!("urn:message:{}", route.binding_key)],
            MESSAGE_KEY: payload,
        })
    } else {
        payload
    };

    let broker = AmqpBroker::connect(config.amqp_url.expose_secret(), 1).await?;
    Topology::default().setup(&broker).await?;
    broker
        .publish(REQUEST_EXCHANGE, route.binding_key, &serde_json::to_vec(&body)?)
        .await?;
    broker.close().await;

    println!("Submitted {job_type} job {job_id} (routing key {})", route.binding_key);
    Ok(())
}
