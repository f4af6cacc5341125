use std::{
    path::{Path, PathBuf},
    sync::Arc,
};

use chrono::Local;
use teloxide::{net::Download, prelude::*};

use lsb_core::{
    schedule::{ingest::is_workbook_name, lookup},
    utils::AuditEvent,
};

use crate::router::{AdminFlow, AppState};

const XLSX_ONLY: &str = "Файл с расписанием должен быть формата .xlsx, попробуйте снова";

pub(super) async fn begin(bot: &Bot, msg: &Message, state: &Arc<AppState>) -> ResponseResult<()> {
    state
        .flows
        .set(msg.chat.id.0, AdminFlow::AwaitingUpload)
        .await;
    let _ = bot
        .send_message(
            msg.chat.id,
            "пришлите файл расписания в формате дд.мм.xlsx\n/cancel - отменить",
        )
        .await;
    Ok(())
}

/// Only the last path component of a client-supplied name is kept.
fn intake_name(raw: &str) -> Option<String> {
    Path::new(raw.trim())
        .file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .filter(|n| is_workbook_name(n))
}

pub(super) async fn receive(bot: &Bot, msg: &Message, state: &Arc<AppState>) -> ResponseResult<()> {
    let chat_id = msg.chat.id.0;
    let user_id = msg.from().map(|u| u.id.0 as i64).unwrap_or(chat_id);

    let Some(doc) = msg.document() else {
        let _ = bot.send_message(msg.chat.id, XLSX_ONLY).await;
        return Ok(());
    };
    let Some(file_name) = doc.file_name.as_deref().and_then(intake_name) else {
        let _ = bot.send_message(msg.chat.id, XLSX_ONLY).await;
        return Ok(());
    };

    state.flows.take(chat_id).await;

    let path = match download(bot, state, doc, &file_name).await {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!(user_id, file = %file_name, error = %e, "schedule download failed");
            state.audit.record(AuditEvent::error(
                Some(user_id),
                &e.to_string(),
                Some("schedule download"),
            ));
            let _ = bot
                .send_message(msg.chat.id, "не удалось скачать файл, попробуйте снова: /upload")
                .await;
            return Ok(());
        }
    };

    let today = Local::now().date_naive();
    let report = match state.ingestor.ingest_upload(&path, &file_name, today).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(user_id, file = %file_name, error = %e, "schedule upload rejected");
            let status = format!("Ошибка при обработке файла {file_name}:\n{e}");
            state
                .audit
                .record(AuditEvent::ingest(user_id, &file_name, None, &status, false));
            let _ = bot.send_message(msg.chat.id, status).await;
            return Ok(());
        }
    };

    let status = report.to_string();
    state.audit.record(AuditEvent::ingest(
        user_id,
        &file_name,
        Some(report.date.to_string()),
        &status,
        report.is_success(),
    ));
    let _ = bot.send_message(msg.chat.id, status).await;

    if report.is_success() {
        let text = lookup::announcement(report.date, today);
        let dispatcher = state.dispatcher.clone();
        tokio::spawn(async move {
            match dispatcher.announce(&text).await {
                Ok(summary) => tracing::info!(
                    delivered = summary.delivered,
                    pruned = summary.pruned.len(),
                    failed = summary.failed,
                    "schedule announced"
                ),
                Err(e) => tracing::warn!(error = %e, "schedule announcement failed"),
            }
        });
    }

    Ok(())
}

async fn download(
    bot: &Bot,
    state: &AppState,
    doc: &teloxide::types::Document,
    file_name: &str,
) -> anyhow::Result<PathBuf> {
    let file = bot.get_file(doc.file.id.clone()).await?;

    let path = state.cfg.uploads_dir.join(file_name);
    let mut dst = tokio::fs::File::create(&path).await?;
    if let Err(e) = bot.download_file(&file.path, &mut dst).await {
        let _ = tokio::fs::remove_file(&path).await;
        return Err(e.into());
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intake_name_drops_directories_and_requires_xlsx() {
        assert_eq!(intake_name("12.09.xlsx").as_deref(), Some("12.09.xlsx"));
        assert_eq!(intake_name("../../etc/12.09.XLSX").as_deref(), Some("12.09.XLSX"));
        assert_eq!(intake_name("12.09.Xlsx").as_deref(), Some("12.09.Xlsx"));
        assert_eq!(intake_name("12.09.xls"), None);
        assert_eq!(intake_name("schedule.pdf"), None);
    }
}
