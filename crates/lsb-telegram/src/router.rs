use std::{collections::HashMap, sync::Arc, time::Duration};

use anyhow::Context;
use teloxide::{dispatching::Dispatcher, dptree, prelude::*};

use tokio::sync::Mutex;

use lsb_core::{
    broadcast::{BroadcastDispatcher, BroadcastTarget},
    collator::MessageCollator,
    config::Config,
    domain::ChatId,
    messaging::{
        port::MessagingPort,
        types::{IncomingContent, Payload},
    },
    schedule::{ingest::ScheduleIngestor, LayoutTable},
    security::RateLimiter,
    storage::{ScheduleRepository, SqliteRepository},
    supervisor::{supervise, ErrorDedup},
    utils::AuditLogger,
};

use crate::handlers;
use crate::TelegramMessenger;

const RESTART_BACKOFF: Duration = Duration::from_secs(5);
const STARTUP_NOTICE: &str = "бот запущен 🚀";

#[derive(Clone)]
pub struct AppState {
    pub cfg: Arc<Config>,
    pub repo: Arc<dyn ScheduleRepository>,
    pub layouts: Arc<LayoutTable>,
    pub messenger: Arc<dyn MessagingPort>,
    pub dispatcher: Arc<BroadcastDispatcher>,
    pub ingestor: Arc<ScheduleIngestor>,
    pub collator: Arc<MessageCollator<IncomingContent>>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
    pub flows: Arc<AdminFlows>,
    pub audit: Arc<AuditLogger>,
}

impl AppState {
    pub fn build(cfg: Arc<Config>, messenger: Arc<dyn MessagingPort>) -> anyhow::Result<Self> {
        let repo: Arc<dyn ScheduleRepository> = Arc::new(
            SqliteRepository::open(&cfg.database_path)
                .with_context(|| format!("open database {}", cfg.database_path.display()))?,
        );
        let layouts = Arc::new(cfg.layouts()?);

        Ok(Self {
            dispatcher: Arc::new(BroadcastDispatcher::new(
                messenger.clone(),
                repo.clone(),
                cfg.broadcast_delay,
            )),
            ingestor: Arc::new(ScheduleIngestor::new(
                repo.clone(),
                layouts.clone(),
                cfg.retention_days,
            )),
            collator: Arc::new(MessageCollator::new(cfg.album_latency)),
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
                cfg.throttle_enabled,
                cfg.throttle_capacity,
                cfg.throttle_window,
            ))),
            flows: Arc::new(AdminFlows::default()),
            audit: Arc::new(AuditLogger::new(
                cfg.audit_log_path.clone(),
                cfg.audit_log_json,
            )),
            cfg,
            repo,
            layouts,
            messenger,
        })
    }
}

/// Where an admin is inside a multi-step command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminFlow {
    AwaitingUpload,
    AwaitingContent {
        target: BroadcastTarget,
    },
    AwaitingConfirm {
        target: BroadcastTarget,
        payload: Payload,
    },
}

/// Per-chat admin flow state.
#[derive(Default)]
pub struct AdminFlows {
    inner: Mutex<HashMap<i64, AdminFlow>>,
}

impl AdminFlows {
    pub async fn get(&self, chat_id: i64) -> Option<AdminFlow> {
        self.inner.lock().await.get(&chat_id).cloned()
    }

    pub async fn set(&self, chat_id: i64, flow: AdminFlow) {
        self.inner.lock().await.insert(chat_id, flow);
    }

    pub async fn take(&self, chat_id: i64) -> Option<AdminFlow> {
        self.inner.lock().await.remove(&chat_id)
    }

    /// Attach the content to a pending broadcast. Returns the target, or
    /// `None` when the chat is no longer waiting for content.
    pub async fn attach(&self, chat_id: i64, payload: Payload) -> Option<BroadcastTarget> {
        let mut map = self.inner.lock().await;
        let target = match map.get(&chat_id) {
            Some(AdminFlow::AwaitingContent { target }) => *target,
            _ => return None,
        };
        map.insert(chat_id, AdminFlow::AwaitingConfirm { target, payload });
        Some(target)
    }

    /// Remove and return a broadcast that is ready to go.
    pub async fn take_confirmed(&self, chat_id: i64) -> Option<(BroadcastTarget, Payload)> {
        let mut map = self.inner.lock().await;
        if !matches!(map.get(&chat_id), Some(AdminFlow::AwaitingConfirm { .. })) {
            return None;
        }
        match map.remove(&chat_id) {
            Some(AdminFlow::AwaitingConfirm { target, payload }) => Some((target, payload)),
            _ => None,
        }
    }
}

/// Build the shared state once, then keep long-polling under supervision until
/// Ctrl-C.
pub async fn run(cfg: Arc<Config>) -> anyhow::Result<()> {
    let bot = Bot::new(cfg.telegram_bot_token.clone());
    let messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let state = Arc::new(AppState::build(cfg.clone(), messenger.clone())?);

    tracing::info!(
        admins = cfg.admin_ids.len(),
        database = %cfg.database_path.display(),
        "bot starting"
    );

    // Startup notification (best-effort).
    {
        let admin_ids = cfg.admin_ids.clone();
        tokio::spawn(async move {
            for id in admin_ids {
                if let Err(e) = messenger.send_text(ChatId(id), STARTUP_NOTICE).await {
                    tracing::warn!(admin = id, error = %e, "startup notice failed");
                }
            }
        });
    }

    let restarts = supervise(
        "telegram-polling",
        ErrorDedup::new(cfg.error_dedup_window),
        RESTART_BACKOFF,
        move || run_polling(bot.clone(), state.clone()),
    )
    .await;

    tracing::info!(restarts, "bot stopped");
    Ok(())
}

async fn run_polling(bot: Bot, state: Arc<AppState>) -> anyhow::Result<()> {
    let me = bot.get_me().await.context("telegram getMe failed")?;
    tracing::info!(username = %me.username(), "polling started");

    let handler = dptree::entry()
        .branch(Update::filter_my_chat_member().endpoint(handlers::handle_my_chat_member))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    // Album parts must reach the collator concurrently, so updates from one
    // chat are not serialized.
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .distribution_function(|_| None::<std::convert::Infallible>)
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}
