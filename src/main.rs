use std::{path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Error, Result};
use delivery_service::{
    admin::QueueAdminService,
    api::{AppState, run_api_server},
    clients::{
        health::HealthChecker,
        mailer::SmtpMailer,
        producer::MessageProducer,
        rbmq::{BrokerAdmin, RabbitMqClient},
        redis::RedisIdempotencyStore,
        renderer::TemplateRegistry,
    },
    config::Config,
    dead_letter::{DeadLetterInbox, DeadLetterListener},
    dispatcher::Dispatcher,
    monitor::QueueMonitor,
    utils::init_tracing,
};
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;

    init_tracing(config.json_logs());

    info!("Configuration validated, starting delivery service");

    let client = RabbitMqClient::connect_with_backoff(&config)
        .await
        .context("Failed to connect to RabbitMQ")?;

    let store = RedisIdempotencyStore::connect_with_backoff(&config)
        .await
        .context("Failed to connect to Redis")?;

    client
        .declare_topology()
        .await
        .context("Failed to declare RabbitMQ topology")?;

    let topology = client.topology().clone();

    let renderer = TemplateRegistry::load_dir(Path::new(&config.template_dir))
        .await
        .context("Failed to load email templates")?;

    let mailer = SmtpMailer::new(&config.smtp_config()).context("Failed to build SMTP transport")?;

    let producer = MessageProducer::new(Arc::new(client.clone()));

    let dispatcher = Dispatcher::new(
        Arc::new(renderer),
        Arc::new(mailer),
        producer,
        topology.clone(),
        config.retry_policy(),
        Arc::new(store.clone()),
    );

    let inbox = Arc::new(DeadLetterInbox::new(config.dead_letter_inbox_capacity));
    let listener = DeadLetterListener::new(Arc::clone(&inbox));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut dispatcher_handle = client
        .subscribe(&topology.request.queue, Arc::new(dispatcher), shutdown_rx.clone())
        .await
        .context("Failed to subscribe to request queue")?;

    let mut dead_letter_handle = client
        .subscribe(&topology.dead_letter.queue, Arc::new(listener), shutdown_rx.clone())
        .await
        .context("Failed to subscribe to dead-letter queue")?;

    let broker: Arc<dyn BrokerAdmin> = Arc::new(client.clone());
    let monitor = QueueMonitor::new(Arc::clone(&broker), topology.clone());

    let monitor_handle = tokio::spawn(monitor.clone().run(
        Duration::from_secs(config.monitor_interval_seconds.max(1)),
        shutdown_rx.clone(),
    ));

    let state = Arc::new(AppState {
        health_checker: HealthChecker::for_services(client.clone(), store),
        admin: QueueAdminService::new(broker, topology.clone()),
        monitor,
        inbox,
        admin_token: config.admin_token.clone().filter(|token| !token.is_empty()),
    });

    let server_handle = tokio::spawn(run_api_server(state, config.server_port, shutdown_rx));

    info!(
        request_queue = %topology.request.queue,
        dead_letter_queue = %topology.dead_letter.queue,
        "Delivery service ready"
    );

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        }
        _ = &mut dispatcher_handle => {
            error!(queue = %topology.request.queue, "Request consumer stopped unexpectedly");
        }
        _ = &mut dead_letter_handle => {
            error!(queue = %topology.dead_letter.queue, "Dead-letter consumer stopped unexpectedly");
        }
    }

    let _ = shutdown_tx.send(true);

    for (name, handle) in [
        ("request consumer", dispatcher_handle),
        ("dead-letter consumer", dead_letter_handle),
        ("queue monitor", monitor_handle),
    ] {
        if handle.is_finished() {
            continue;
        }

        if let Err(e) = handle.await {
            error!(task = name, error = %e, "Task terminated abnormally");
        }
    }

    match server_handle.await {
        Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
        Err(e) => error!(error = %e, "HTTP server task terminated abnormally"),
        Ok(Ok(())) => {}
    }

    info!("Delivery service stopped");

    Ok(())
}
