//! Telegram update handlers.
//!
//! Admin messages drive the upload and broadcast flows; everything else goes
//! through the rate limiter to the recipient commands.

use std::sync::Arc;

use teloxide::{prelude::*, types::ChatMemberUpdated};

use lsb_core::{
    domain::UserId,
    security::{is_authorized, ThrottleDecision},
    utils::AuditEvent,
};

use crate::router::{AdminFlow, AppState};

mod broadcast;
mod commands;
mod upload;

const THROTTLE_NOTICE: &str = "подождите 5 секунд и повторите запрос";
const ADMIN_COMMANDS: [&str; 4] = ["upload", "broadcast", "send", "cancel"];

pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);
    let username = user.username.clone().unwrap_or_default();

    if is_authorized(Some(user_id), &state.cfg.admin_ids) {
        if handle_admin(&bot, &msg, &state).await? {
            return Ok(());
        }
        return commands::handle_command(&bot, &msg, &state).await;
    }

    let decision = state.rate_limiter.lock().await.check(user_id);
    match decision {
        ThrottleDecision::Allow => {}
        ThrottleDecision::Warn => {
            state
                .audit
                .record(AuditEvent::throttled(user_id.0, &username, true));
            let _ = bot.send_message(msg.chat.id, THROTTLE_NOTICE).await;
            return Ok(());
        }
        ThrottleDecision::Drop => {
            tracing::debug!(user_id = user_id.0, "throttled update dropped");
            return Ok(());
        }
    }

    if let Some(text) = msg.text().filter(|t| t.starts_with('/')) {
        let (cmd, _) = commands::parse_command(text);
        if ADMIN_COMMANDS.contains(&cmd.as_str()) {
            tracing::warn!(user_id = user_id.0, %cmd, "admin command from non-admin");
            state
                .audit
                .record(AuditEvent::auth(user_id.0, &username, false));
            let _ = bot.send_message(msg.chat.id, "команда доступна только администраторам").await;
            return Ok(());
        }
    }

    commands::handle_command(&bot, &msg, &state).await
}

/// Admin commands and in-flow messages. Returns false when the message is not
/// part of an admin flow and should be treated as a recipient command.
async fn handle_admin(bot: &Bot, msg: &Message, state: &Arc<AppState>) -> ResponseResult<bool> {
    let chat_id = msg.chat.id.0;

    if let Some(text) = msg.text().filter(|t| t.starts_with('/')) {
        let (cmd, args) = commands::parse_command(text);
        match cmd.as_str() {
            "upload" => upload::begin(bot, msg, state).await?,
            "broadcast" => broadcast::begin(bot, msg, state, &args).await?,
            "send" => broadcast::send(bot, msg, state).await?,
            "cancel" => {
                let reply = match state.flows.take(chat_id).await {
                    Some(_) => "действие отменено",
                    None => "нечего отменять",
                };
                let _ = bot.send_message(msg.chat.id, reply).await;
            }
            _ => return Ok(false),
        }
        return Ok(true);
    }

    match state.flows.get(chat_id).await {
        Some(AdminFlow::AwaitingUpload) => upload::receive(bot, msg, state).await?,
        Some(AdminFlow::AwaitingContent { target }) => {
            broadcast::receive(bot, msg, state, target).await?
        }
        Some(AdminFlow::AwaitingConfirm { .. }) => {
            let _ = bot
                .send_message(msg.chat.id, "/send - отправить, /cancel - отменить")
                .await;
        }
        None => return Ok(false),
    }
    Ok(true)
}

/// A user who blocks the bot stops being a recipient right away.
pub async fn handle_my_chat_member(
    upd: ChatMemberUpdated,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    if !upd.chat.is_private() || !upd.new_chat_member.kind.is_banned() {
        return Ok(());
    }
    match state.repo.remove_recipient(upd.chat.id.0).await {
        Ok(removed) => {
            tracing::info!(chat_id = upd.chat.id.0, removed, "bot blocked by user");
        }
        Err(e) => {
            tracing::warn!(chat_id = upd.chat.id.0, error = %e, "failed to remove recipient");
        }
    }
    Ok(())
}
