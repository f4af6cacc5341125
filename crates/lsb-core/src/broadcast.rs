//! Fan-out of one payload to many recipients.
//!
//! Sends are strictly sequential with a fixed pause between them, which keeps
//! the bot under Telegram's global send limit without any feedback loop. A
//! recipient that blocked the bot is removed from the registry on the spot.

use std::{fmt, sync::Arc, time::Duration};

use tokio::time::sleep;

use crate::{
    domain::{ChatId, MessageRef},
    messaging::{port::deliver, port::MessagingPort, types::Payload},
    schedule::Grade,
    storage::ScheduleRepository,
    Result,
};

const PROGRESS_SEGMENTS: usize = 10;
pub const DONE_TEXT: &str = "Рассылка завершена✅";

/// Who a broadcast goes to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BroadcastTarget {
    Grade(Grade),
    All,
}

impl BroadcastTarget {
    /// `10`, `11` or `all` (also `все`).
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "all" | "все" => Some(BroadcastTarget::All),
            other => Grade::parse(other).map(BroadcastTarget::Grade),
        }
    }

    pub fn class_prefix(self) -> Option<&'static str> {
        match self {
            BroadcastTarget::Grade(g) => Some(g.tag()),
            BroadcastTarget::All => None,
        }
    }
}

impl fmt::Display for BroadcastTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BroadcastTarget::Grade(g) => write!(f, "{g} классы"),
            BroadcastTarget::All => f.write_str("все классы"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct BroadcastJob {
    recipients: Vec<i64>,
    payload: Payload,
    processed: usize,
}

impl BroadcastJob {
    pub fn new(recipients: Vec<i64>, payload: Payload) -> Self {
        Self {
            recipients,
            payload,
            processed: 0,
        }
    }

    pub fn total(&self) -> usize {
        self.recipients.len()
    }

    pub fn processed(&self) -> usize {
        self.processed
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BroadcastSummary {
    pub total: usize,
    pub delivered: usize,
    /// Recipients removed because they blocked the bot.
    pub pruned: Vec<i64>,
    pub failed: usize,
}

/// `рассылка в процессе` with a ten-segment bar and `processed/total`.
pub fn progress_text(processed: usize, total: usize) -> String {
    if total == 0 {
        return format!("рассылка в процессе\n{}", "⬜️".repeat(PROGRESS_SEGMENTS));
    }
    let filled = (processed.min(total) * 100 / total) / PROGRESS_SEGMENTS;
    format!(
        "рассылка в процессе\n{}{} {processed}/{total}",
        "🟩".repeat(filled),
        "⬜️".repeat(PROGRESS_SEGMENTS - filled)
    )
}

pub struct BroadcastDispatcher {
    messenger: Arc<dyn MessagingPort>,
    repo: Arc<dyn ScheduleRepository>,
    delay: Duration,
}

impl BroadcastDispatcher {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        repo: Arc<dyn ScheduleRepository>,
        delay: Duration,
    ) -> Self {
        Self {
            messenger,
            repo,
            delay,
        }
    }

    pub async fn recipients(&self, target: BroadcastTarget) -> Result<Vec<i64>> {
        self.repo.recipient_ids(target.class_prefix()).await
    }

    /// Deliver `job` to every recipient in order.
    ///
    /// With `progress_chat`, a progress message is posted there first, edited
    /// after each attempt and finally replaced by the done text. Per-recipient
    /// failures never abort the run.
    pub async fn dispatch(&self, mut job: BroadcastJob, progress_chat: Option<ChatId>) -> BroadcastSummary {
        let total = job.total();
        let mut summary = BroadcastSummary {
            total,
            ..Default::default()
        };

        let progress = match progress_chat {
            Some(chat) => self.post(chat, &progress_text(0, total)).await,
            None => None,
        };

        tracing::info!(total, kind = job.payload.kind(), "broadcast started");

        for (i, &id) in job.recipients.iter().enumerate() {
            match deliver(self.messenger.as_ref(), ChatId(id), &job.payload).await {
                Ok(_) => summary.delivered += 1,
                Err(e) if e.is_forbidden() => {
                    tracing::info!(recipient = id, "recipient blocked the bot; removing");
                    if let Err(e) = self.repo.remove_recipient(id).await {
                        tracing::warn!(recipient = id, error = %e, "failed to remove recipient");
                    }
                    summary.pruned.push(id);
                }
                Err(e) => {
                    tracing::warn!(recipient = id, error = %e, "broadcast delivery failed");
                    summary.failed += 1;
                }
            }
            job.processed += 1;

            if let Some(msg) = progress {
                self.edit(msg, &progress_text(job.processed, total)).await;
            }
            if i + 1 < total {
                sleep(self.delay).await;
            }
        }

        if let Some(msg) = progress {
            self.edit(msg, DONE_TEXT).await;
        }

        tracing::info!(
            total,
            delivered = summary.delivered,
            pruned = summary.pruned.len(),
            failed = summary.failed,
            "broadcast finished"
        );
        summary
    }

    /// Text fan-out to every recipient, without a progress message.
    pub async fn announce(&self, text: &str) -> Result<BroadcastSummary> {
        let recipients = self.recipients(BroadcastTarget::All).await?;
        let job = BroadcastJob::new(recipients, Payload::Text(text.to_string()));
        Ok(self.dispatch(job, None).await)
    }

    async fn post(&self, chat: ChatId, text: &str) -> Option<MessageRef> {
        match self.messenger.send_text(chat, text).await {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(error = %e, "failed to post broadcast progress");
                None
            }
        }
    }

    async fn edit(&self, msg: MessageRef, text: &str) {
        if let Err(e) = self.messenger.edit_text(msg, text).await {
            tracing::debug!(error = %e, "progress edit failed");
        }
    }
}
