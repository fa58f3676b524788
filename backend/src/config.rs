use std::env;

pub const DEFAULT_MODERATION_API_URL: &str = "https://api.deepseek.com/v1/chat/completions";
pub const DEFAULT_MODERATION_MODEL: &str = "deepseek-chat";

#[derive(Clone, Debug)]
pub struct ModerationConfig {
    pub enabled: bool,
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout_seconds: u64,
    pub daily_limit: i64,
    pub worker_count: usize,
    pub queue_depth: usize,
    pub comment_db_path: String,
    pub quota_db_path: String,
}

impl ModerationConfig {
    pub fn from_env() -> Self {
        let enabled = env::var("MODERATION_ENABLED")
            .ok()
            .map(|value| parse_bool_env(&value))
            .unwrap_or(true);
        let api_url = env::var("MODERATION_API_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_MODERATION_API_URL.to_string());
        let api_key = env::var("MODERATION_API_KEY")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty());
        let model = env::var("MODERATION_MODEL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_MODERATION_MODEL.to_string());
        let timeout_seconds = env::var("MODERATION_TIMEOUT_SECONDS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(10)
            .max(1);
        let daily_limit = env::var("MODERATION_DAILY_LIMIT")
            .ok()
            .and_then(|value| value.parse::<i64>().ok())
            .unwrap_or(500)
            .max(0);
        let worker_count = env::var("MODERATION_WORKER_COUNT")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(2)
            .max(1);
        let queue_depth = env::var("MODERATION_QUEUE_DEPTH")
            .ok()
            .and_then(|value| value.parse::<usize>().ok())
            .unwrap_or(128)
            .max(1);
        let comment_db_path =
            env::var("COMMENT_DB_PATH").unwrap_or_else(|_| "./data/comments.db".to_string());
        let quota_db_path =
            env::var("QUOTA_DB_PATH").unwrap_or_else(|_| "./data/quota.db".to_string());

        Self {
            enabled,
            api_url,
            api_key,
            model,
            timeout_seconds,
            daily_limit,
            worker_count,
            queue_depth,
            comment_db_path,
            quota_db_path,
        }
    }
}

pub(crate) fn parse_bool_env(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "y" | "on")
}
