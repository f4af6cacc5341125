use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{errors::Error, schedule::LayoutTable, Result};

/// Typed bot configuration, read from the environment.
#[derive(Clone, Debug)]
pub struct Config {
    // Core
    pub telegram_bot_token: String,
    pub admin_ids: Vec<i64>,

    // Storage
    pub database_path: PathBuf,
    pub uploads_dir: PathBuf,
    pub layout_file: Option<PathBuf>,
    pub retention_days: i64,

    // Broadcast
    pub broadcast_delay: Duration,

    // Throttling
    pub throttle_enabled: bool,
    pub throttle_window: Duration,
    pub throttle_capacity: usize,

    // Albums
    pub album_latency: Duration,

    // Service loop
    pub error_dedup_window: Duration,

    // Audit
    pub audit_log_path: PathBuf,
    pub audit_log_json: bool,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        // Required env vars
        let telegram_bot_token = env_str("TELEGRAM_BOT_TOKEN").unwrap_or_default();
        let admin_ids = parse_csv_i64(env_str("ADMIN_IDS"));

        if telegram_bot_token.trim().is_empty() {
            return Err(Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required".to_string(),
            ));
        }
        if admin_ids.is_empty() {
            return Err(Error::Config(
                "ADMIN_IDS environment variable is required".to_string(),
            ));
        }

        // Storage
        let database_path = env_path("DATABASE_PATH").unwrap_or_else(|| PathBuf::from("lyceum.db"));
        let uploads_dir = env_path("UPLOADS_DIR").unwrap_or_else(|| PathBuf::from("uploads"));
        let layout_file = env_path("LAYOUT_FILE");
        let retention_days = env_u64("RETENTION_DAYS").unwrap_or(2) as i64;

        fs::create_dir_all(&uploads_dir)?;

        // Broadcast pacing (Telegram allows ~30 messages/s per bot)
        let broadcast_delay = Duration::from_millis(env_u64("BROADCAST_DELAY_MS").unwrap_or(35));

        // Throttling
        let throttle_enabled = env_bool("THROTTLE_ENABLED").unwrap_or(true);
        let throttle_window = Duration::from_millis(env_u64("THROTTLE_WINDOW_MS").unwrap_or(4000));
        let throttle_capacity = env_usize("THROTTLE_CAPACITY").unwrap_or(400);

        // Albums
        let album_latency = Duration::from_millis(env_u64("ALBUM_LATENCY_MS").unwrap_or(150));

        let error_dedup_window =
            Duration::from_secs(env_u64("ERROR_DEDUP_WINDOW_SECS").unwrap_or(120));

        // Audit logging
        let audit_log_path = PathBuf::from(
            env_str("AUDIT_LOG_PATH").unwrap_or("/tmp/lyceum-schedule-audit.log".to_string()),
        );
        let audit_log_json = env_bool("AUDIT_LOG_JSON").unwrap_or(false);

        Ok(Self {
            telegram_bot_token,
            admin_ids,
            database_path,
            uploads_dir,
            layout_file,
            retention_days,
            broadcast_delay,
            throttle_enabled,
            throttle_window,
            throttle_capacity,
            album_latency,
            error_dedup_window,
            audit_log_path,
            audit_log_json,
        })
    }

    /// Layout table from `LAYOUT_FILE`, or the built-in one.
    pub fn layouts(&self) -> Result<LayoutTable> {
        match &self.layout_file {
            Some(path) => {
                let table = LayoutTable::load(path)?;
                tracing::info!(path = %path.display(), "layout table loaded");
                Ok(table)
            }
            None => Ok(LayoutTable::default()),
        }
    }
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_some() {
            continue; // do not override existing env
        }
        env::set_var(key, val);
    }
}

fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        out.push((key.to_string(), val));
    }
    out
}

fn env_bool(key: &str) -> Option<bool> {
    env_str(key).map(|s| {
        matches!(
            s.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn env_path(key: &str) -> Option<PathBuf> {
    env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn parse_csv_i64(v: Option<String>) -> Vec<i64> {
    v.unwrap_or_default()
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .filter_map(|s| s.parse::<i64>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_ids_skip_blanks_and_garbage() {
        assert_eq!(
            parse_csv_i64(Some(" 12, ,x,-5,7 ".to_string())),
            vec![12, -5, 7]
        );
        assert!(parse_csv_i64(None).is_empty());
    }

    #[test]
    fn dotenv_lines_strip_quotes_and_comments() {
        let parsed = parse_dotenv(
            "# comment\nTELEGRAM_BOT_TOKEN=\"123:abc\"\n\nADMIN_IDS = 1,2\nbroken line\n=novalue\n",
        );
        assert_eq!(
            parsed,
            vec![
                ("TELEGRAM_BOT_TOKEN".to_string(), "123:abc".to_string()),
                ("ADMIN_IDS".to_string(), "1,2".to_string()),
            ]
        );
    }
}
