use std::sync::Arc;

use teloxide::prelude::*;

use lsb_core::{
    broadcast::{BroadcastJob, BroadcastTarget},
    collator::Collated,
    domain::{ChatId, MessageId},
    messaging::{
        port::deliver,
        types::{IncomingContent, Payload},
    },
    utils::AuditEvent,
};

use crate::router::{AdminFlow, AppState};

const USAGE: &str = "использование: /broadcast <10|11|all>";

pub(super) async fn begin(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    args: &str,
) -> ResponseResult<()> {
    let Some(target) = BroadcastTarget::parse(args) else {
        let _ = bot.send_message(msg.chat.id, USAGE).await;
        return Ok(());
    };
    state
        .flows
        .set(msg.chat.id.0, AdminFlow::AwaitingContent { target })
        .await;
    let _ = bot
        .send_message(
            msg.chat.id,
            format!("получатели: {target}\nотправьте сообщение для рассылки\n/cancel - отменить"),
        )
        .await;
    Ok(())
}

fn confirmation_prompt(target: BroadcastTarget) -> String {
    format!("подтвердите отправку сообщения\nполучатели: {target}\n/send - отправить, /cancel - отменить")
}

/// Everything a broadcast can carry. Photos use the largest size.
fn payload_of(msg: &Message) -> Option<Payload> {
    let caption = msg.caption().map(str::to_string);

    if let Some(text) = msg.text() {
        return Some(Payload::Text(text.to_string()));
    }
    if let Some(sizes) = msg.photo() {
        let largest = sizes.last()?;
        return Some(Payload::Photo {
            file_id: largest.file.id.clone(),
            caption,
        });
    }
    if let Some(v) = msg.video() {
        return Some(Payload::Video {
            file_id: v.file.id.clone(),
            caption,
        });
    }
    if let Some(d) = msg.document() {
        return Some(Payload::Document {
            file_id: d.file.id.clone(),
            caption,
        });
    }
    if let Some(v) = msg.voice() {
        return Some(Payload::Voice {
            file_id: v.file.id.clone(),
            caption,
        });
    }
    if let Some(n) = msg.video_note() {
        return Some(Payload::VideoNote {
            file_id: n.file.id.clone(),
        });
    }
    None
}

pub(super) async fn receive(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
    target: BroadcastTarget,
) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;

    let Some(payload) = payload_of(msg) else {
        let _ = bot
            .send_message(msg.chat.id, "такое сообщение нельзя разослать, попробуйте другое")
            .await;
        return Ok(());
    };
    let content = IncomingContent {
        message_id: MessageId(msg.id.0),
        media_group_id: msg.media_group_id().map(str::to_string),
        payload,
    };

    let payload = match state.collator.collate(content).await {
        Collated::Single(c) => c.payload,
        Collated::Batch(parts) => {
            match Payload::album(parts.into_iter().map(|c| c.payload).collect()) {
                Some(p) => p,
                None => {
                    let _ = bot
                        .send_message(msg.chat.id, "в альбоме могут быть только фото и видео")
                        .await;
                    return Ok(());
                }
            }
        }
        Collated::Absorbed => return Ok(()),
    };

    if state.flows.attach(chat_id, payload.clone()).await.is_none() {
        return Ok(());
    }

    // Preview exactly what recipients will get.
    if let Err(e) = deliver(state.messenger.as_ref(), ChatId(chat_id), &payload).await {
        tracing::warn!(chat_id, error = %e, "broadcast preview failed");
    }
    let _ = bot
        .send_message(msg.chat.id, confirmation_prompt(target))
        .await;
    Ok(())
}

pub(super) async fn send(bot: &Bot, msg: &Message, state: &Arc<AppState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    let user_id = msg.from().map(|u| u.id.0 as i64);

    let Some((target, payload)) = state.flows.take_confirmed(chat_id).await else {
        let _ = bot
            .send_message(msg.chat.id, format!("нечего отправлять\n{USAGE}"))
            .await;
        return Ok(());
    };

    let recipients = match state.dispatcher.recipients(target).await {
        Ok(r) => r,
        Err(e) => {
            tracing::error!(chat_id, error = %e, "failed to load recipients");
            state.audit.record(AuditEvent::error(
                user_id,
                &e.to_string(),
                Some("broadcast recipients"),
            ));
            let _ = bot
                .send_message(msg.chat.id, "не удалось получить список получателей")
                .await;
            return Ok(());
        }
    };

    let kind = payload.kind();
    let job = BroadcastJob::new(recipients, payload);
    let state = state.clone();
    tokio::spawn(async move {
        let summary = state.dispatcher.dispatch(job, Some(ChatId(chat_id))).await;
        state.audit.record(AuditEvent::broadcast(
            user_id,
            &target.to_string(),
            kind,
            summary.total,
            summary.delivered,
            summary.pruned.len(),
            summary.failed,
        ));
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lsb_core::schedule::Grade;

    #[test]
    fn confirmation_names_the_recipients() {
        assert_eq!(
            confirmation_prompt(BroadcastTarget::Grade(Grade::Tenth)),
            "подтвердите отправку сообщения\nполучатели: 10 классы\n/send - отправить, /cancel - отменить"
        );
        assert!(confirmation_prompt(BroadcastTarget::All).contains("получатели: все классы"));
    }
}
