/// Default HTTP API port
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Telegram Bot API base URL
pub const TELEGRAM_API_URL: &str = "https://api.telegram.org";

/// Telegram error code returned when the recipient blocked the bot
pub const BLOCKED_ERROR_CODE: i64 = 403;

/// Maximum caption length attached to media
pub const MAX_CAPTION_LEN: usize = 1024;

/// Maximum number of images attached to one broadcast
pub const MAX_ATTACHMENTS: usize = 10;

/// Maximum size of a single uploaded attachment (10 MiB)
pub const MAX_UPLOAD_SIZE: usize = 10 * 1024 * 1024;

/// Parallel sends per broadcast fan-out
pub const DEFAULT_BROADCAST_CONCURRENCY: usize = 8;

/// Outbound messages per live session queued before frames are dropped
pub const SESSION_QUEUE_DEPTH: usize = 256;
