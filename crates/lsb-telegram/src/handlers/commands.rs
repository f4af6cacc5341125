use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Local, NaiveDate};
use teloxide::prelude::*;

use lsb_core::{
    domain::Recipient,
    schedule::{lookup, Grade},
};

use crate::router::AppState;

const HELP: &str = "Команды:\n\
/register <класс> <группа А|Б> <группа УД> - указать свои данные\n\
/profile - мои данные\n\
/today - расписание на сегодня\n\
/tomorrow - расписание на завтра";

const NOT_REGISTERED: &str =
    "сначала укажите свои данные: /register <класс> <группа А|Б> <группа УД>\nнапример: /register 10А А 3";

const NO_SCHEDULE: &str = "расписание ещё не загружено";

pub(super) fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

/// Class letter, sub-group (0 for А, 1 for Б) and university-day group.
#[derive(Debug, PartialEq, Eq)]
struct Registration {
    class_letter: String,
    class_group: u32,
    uday_group: u32,
}

fn parse_registration(args: &str) -> Result<Registration, &'static str> {
    let parts: Vec<&str> = args.split_whitespace().collect();
    let [class, group, uday] = parts.as_slice() else {
        return Err(NOT_REGISTERED);
    };

    let class_letter = class.to_uppercase();
    if Grade::of_class(&class_letter).is_none() {
        return Err("класс должен начинаться с 10 или 11, например 10А");
    }

    let class_group = match group.to_lowercase().as_str() {
        "а" | "a" => 0,
        "б" | "b" => 1,
        _ => return Err("группа класса: А или Б"),
    };

    let uday_group = uday
        .parse::<u32>()
        .ok()
        .filter(|g| *g > 0)
        .ok_or("группа универдня должна быть положительным числом")?;

    Ok(Registration {
        class_letter,
        class_group,
        uday_group,
    })
}

fn profile_text(r: &Recipient) -> String {
    let group = if r.class_group == 0 { "А" } else { "Б" };
    format!(
        "📚 Твои данные:\n📙 {} класс, группа {group}\n📗 {} группа универдня",
        r.class_letter, r.uday_group
    )
}

pub(super) async fn handle_command(
    bot: &Bot,
    msg: &Message,
    state: &Arc<AppState>,
) -> ResponseResult<()> {
    let Some(text) = msg.text() else {
        let _ = bot.send_message(msg.chat.id, HELP).await;
        return Ok(());
    };
    let (cmd, args) = parse_command(text);
    let user_id = msg.chat.id.0;

    let reply = match cmd.as_str() {
        "start" | "help" => HELP.to_string(),
        "register" => register(state, user_id, &args).await,
        "profile" => match state.repo.recipient(user_id).await {
            Ok(Some(r)) => profile_text(&r),
            Ok(None) => NOT_REGISTERED.to_string(),
            Err(e) => storage_failure(user_id, &e),
        },
        "today" => day_schedule(state, user_id, today()).await,
        "tomorrow" => day_schedule(state, user_id, today() + ChronoDuration::days(1)).await,
        _ => HELP.to_string(),
    };

    let _ = bot.send_message(msg.chat.id, reply).await;
    Ok(())
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

fn storage_failure(user_id: i64, e: &lsb_core::Error) -> String {
    tracing::error!(user_id, error = %e, "storage request failed");
    "не удалось получить данные, попробуйте позже".to_string()
}

async fn register(state: &AppState, user_id: i64, args: &str) -> String {
    let reg = match parse_registration(args) {
        Ok(r) => r,
        Err(hint) => return hint.to_string(),
    };
    let recipient = Recipient {
        id: user_id,
        class_letter: reg.class_letter,
        class_group: reg.class_group,
        uday_group: reg.uday_group,
    };
    match state.repo.upsert_recipient(&recipient).await {
        Ok(()) => {
            tracing::info!(user_id, class = %recipient.class_letter, "recipient registered");
            profile_text(&recipient)
        }
        Err(e) => storage_failure(user_id, &e),
    }
}

async fn day_schedule(state: &AppState, user_id: i64, date: NaiveDate) -> String {
    let recipient = match state.repo.recipient(user_id).await {
        Ok(Some(r)) => r,
        Ok(None) => return NOT_REGISTERED.to_string(),
        Err(e) => return storage_failure(user_id, &e),
    };
    match state.repo.schedule_exists(date).await {
        Ok(true) => {}
        Ok(false) => return NO_SCHEDULE.to_string(),
        Err(e) => return storage_failure(user_id, &e),
    }
    match lookup::lessons_for(state.repo.as_ref(), &state.layouts, &recipient, date).await {
        Ok(lessons) => lookup::render_day(&lessons),
        Err(e) => storage_failure(user_id, &e),
    }
}
