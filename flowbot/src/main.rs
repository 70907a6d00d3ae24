mod callback_data;
mod commands;
mod config;
mod handlers;
mod message_log;
mod render;
mod reply_target;
mod storages;

use std::{error::Error, sync::Arc, time::Duration};

use callback_data::{CallbackDataStorage, CallbackDataStorageTrait};
use chatflow::{
    flow::Flow,
    interpreter::Interpreter,
    storage::{FallbackProfileStorage, ProfileStorageTrait, SessionStorage, SessionStorageTrait},
};
use clap::Parser;
use commands::register_commands;
use config::{Args, SESSION_PURGE_INTERVAL_SECONDS};
use handlers::{handle_callback_query, handle_text_message};
use message_log::{ApiMessageLog, MessageLog};
use storages::{PgMessageLog, PgProfileStorage};
use teloxide::prelude::*;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    pretty_env_logger::init();
    log::info!("Starting flow bot...");

    let flow = Arc::new(Flow::load(&args.flow).await?);
    log::info!(
        "Loaded flow `{}` from {:?}: {} nodes, start at `{}`",
        flow.name,
        args.flow,
        flow.nodes.len(),
        flow.start_node()
    );

    let token = args.get_token()?;
    let bot = Bot::new(token);

    // Without a database the bot keeps profiles in memory for the lifetime of the process
    let pool = match &args.database_url {
        Some(url) => match storages::connect(url).await {
            Ok(pool) => {
                log::info!("Connected to Postgres");
                Some(pool)
            }
            Err(e) => {
                log::error!("Failed to connect to Postgres, using in-memory profiles: {}", e);
                None
            }
        },
        None => {
            log::info!("DATABASE_URL not set, using in-memory profiles");
            None
        }
    };

    let profiles = FallbackProfileStorage::new(
        pool.clone()
            .map(|pool| Arc::new(PgProfileStorage::new(pool)) as Arc<dyn ProfileStorageTrait>),
    );
    if profiles.is_durable() {
        log::info!("Profiles are saved to Postgres with an in-memory fallback");
    }
    let profiles: Arc<dyn ProfileStorageTrait> = Arc::new(profiles);
    let sessions: Arc<dyn SessionStorageTrait> =
        Arc::new(SessionStorage::with_ttl(args.session_ttl()));
    let interpreter = Arc::new(Interpreter::new(flow.clone(), sessions, profiles));

    let mut message_log = MessageLog::new();
    if let Some(pool) = &pool {
        message_log =
            message_log.with_observer(Arc::new(PgMessageLog::new(pool.clone(), args.project_id.clone())));
    }
    if let Some(project_id) = &args.project_id {
        let base_url = args.resolve_api_base_url();
        match ApiMessageLog::new(&base_url, project_id) {
            Ok(api) => {
                log::info!("Logging messages to {}", base_url);
                message_log = message_log.with_observer(Arc::new(api));
            }
            Err(e) => log::error!("Failed to build API client: {}", e),
        }
    }

    if message_log.is_empty() {
        log::info!("Message logging is off");
    }

    let callbacks: Arc<dyn CallbackDataStorageTrait> = Arc::new(CallbackDataStorage::new());

    register_commands(&bot, &flow).await;

    let purge_interpreter = interpreter.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(SESSION_PURGE_INTERVAL_SECONDS));
        loop {
            interval.tick().await;
            let purged = purge_interpreter.purge_idle().await;
            if purged > 0 {
                log::info!("Purged {} idle sessions", purged);
            }
        }
    });

    let handler = dptree::entry()
        .branch(
            Update::filter_message()
                .branch(
                    dptree::filter(|msg: Message| msg.text().is_some())
                        .endpoint(handle_text_message),
                ),
        )
        .branch(Update::filter_callback_query().endpoint(handle_callback_query));

    let mut dispatcher = Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![interpreter, callbacks, message_log])
        .enable_ctrlc_handler()
        .build();

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        if wait_for_sigterm().await {
            log::info!("SIGTERM received, shutting down");
            if let Ok(done) = shutdown.shutdown() {
                done.await;
            }
        }
    });

    dispatcher.dispatch().await;

    if let Some(pool) = pool {
        pool.close().await;
    }
    log::info!("Flow bot stopped");
    Ok(())
}

#[cfg(unix)]
async fn wait_for_sigterm() -> bool {
    use tokio::signal::unix::{SignalKind, signal};

    match signal(SignalKind::terminate()) {
        Ok(mut stream) => stream.recv().await.is_some(),
        Err(e) => {
            log::warn!("Failed to listen for SIGTERM: {}", e);
            false
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() -> bool {
    std::future::pending().await
}
