//! Default configuration constants used across the system.

/// Default settings file location.
pub const DEFAULT_SETTINGS_PATH: &str = "data/app_config.json";

/// Default control-surface port.
pub const DEFAULT_SERVER_PORT: u16 = 8000;

/// Default bind host.
pub const DEFAULT_SERVER_BIND: &str = "127.0.0.1";

/// Default model.
pub const DEFAULT_MODEL: &str = "llama3-8b-8192";

pub const DEFAULT_TEMPERATURE: f64 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 2048;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default agent system prompt.
pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful advisor. Answer concisely and use the available tools when they help.";

/// Reply used when the agent cannot produce an answer.
pub const DEFAULT_FALLBACK_RESPONSE: &str =
    "Sorry, I can't answer right now. Please try again in a moment.";

pub const DEFAULT_WELCOME_MESSAGE: &str =
    "Thanks for following! Send a message any time and we'll get back to you.";

/// Minimum seconds between opportunistic tool refreshes.
pub const DEFAULT_TOOL_REFRESH_INTERVAL_SECS: u64 = 60;

/// Maximum model/tool round trips per invocation.
pub const DEFAULT_MAX_TOOL_ITERATIONS: u32 = 8;

/// Per-request timeout for tool HTTP calls.
pub const DEFAULT_TOOL_TIMEOUT_SECS: u64 = 10;

/// Concurrent fetches per content-extraction call.
pub const DEFAULT_EXTRACT_CONCURRENCY: usize = 10;

/// Extracted text shorter than this counts as a failed extraction.
pub const MIN_EXTRACTED_CONTENT_CHARS: usize = 200;

/// Upper bound on extracted text returned per page.
pub const MAX_EXTRACTED_CONTENT_CHARS: usize = 20_000;

pub const BRAVE_SEARCH_URL: &str = "https://api.search.brave.com/res/v1/web/search";

pub const ZALO_OA_API_BASE: &str = "https://openapi.zalo.me";

pub const DEFAULT_BRIDGE_URL: &str = "http://127.0.0.1:3010";

/// Long-poll timeout for the personal-account bridge.
pub const DEFAULT_POLL_TIMEOUT_SECS: u64 = 25;

/// Default reconnect backoff initial delay.
pub const DEFAULT_RECONNECT_INITIAL_MS: u64 = 1000;

/// Default reconnect backoff max delay.
pub const DEFAULT_RECONNECT_MAX_MS: u64 = 30_000;

/// Default reconnect backoff factor.
pub const DEFAULT_RECONNECT_FACTOR: f64 = 2.0;

/// How long `disable()` waits for a listener to observe cancellation.
pub const LISTENER_JOIN_TIMEOUT_MS: u64 = 5_000;

/// Capacity of the inbound message channel.
pub const INBOUND_CHANNEL_CAPACITY: usize = 256;
