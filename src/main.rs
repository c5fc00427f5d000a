use std::error::Error;
use std::sync::Arc;

use log::{error, info};
use teloxide::prelude::*;

use expense_assistant_bot::{http, telegram};
use expense_assistant_bot::{
    initialize_metrics, Config, Dialog, JsonRepository, Metrics, MetricsInitState, PrometheusClient, Repository,
    RESTORE_INTERVAL, RESTORE_MAX_RETRIES,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();
    env_logger::init();

    info!("");
    info!("---------------------------");
    info!("Starting expense assistant bot");

    let config = Config::from_env()?;

    let repository: Arc<dyn Repository> = Arc::new(JsonRepository::open(config.data_file_path.clone()).await?);
    let metrics = Arc::new(Metrics::new());

    let http_state = http::HttpState::new(repository.clone(), metrics.clone());
    let http_addr = config.http_addr;
    tokio::spawn(async move {
        if let Err(e) = http::serve(http_addr, http_state).await {
            error!("HTTP server stopped: {}", e);
        }
    });

    match PrometheusClient::new(config.prometheus_url.clone(), config.external_call_timeout) {
        Ok(client) => {
            let metrics = metrics.clone();
            let repository = repository.clone();
            tokio::spawn(async move {
                initialize_metrics(metrics, repository, Arc::new(client), RESTORE_INTERVAL, RESTORE_MAX_RETRIES).await;
            });
        }
        Err(e) => {
            error!("Metrics will not be restored: {}", e);
            metrics.set_init_state(MetricsInitState::GaveUp);
        }
    }

    let bot = Bot::new(&config.telegram_token);
    let messenger = Arc::new(telegram::TelegramMessenger::new(bot.clone()));
    let dialog = Arc::new(Dialog::new(
        repository,
        config.extractor(),
        config.transcriber(),
        messenger,
        metrics,
    ));

    telegram::run(bot, dialog).await;

    info!("Bot stopped");
    Ok(())
}
