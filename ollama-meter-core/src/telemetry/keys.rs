/// Log field keys for metered calls.
/// Keep these stable; changing them is a breaking change for log queries.
pub const KEY_PROVIDER: &str = "llm.provider";
pub const KEY_MODEL: &str = "llm.model";
pub const KEY_TRANSACTION_ID: &str = "txn.id";
pub const KEY_OPERATION: &str = "llm.operation";
pub const KEY_STREAMED: &str = "llm.streamed";

pub const KEY_LATENCY_MS: &str = "latency.ms";
pub const KEY_STOP_REASON: &str = "stop.reason";
pub const KEY_TOKENS_PROMPT: &str = "tokens.prompt";
pub const KEY_TOKENS_COMPLETION: &str = "tokens.completion";
pub const KEY_TOKENS_TOTAL: &str = "tokens.total";

/// Error-related (if applicable)
pub const KEY_ERROR_MESSAGE: &str = "error.message";
pub const KEY_ERROR_DETAIL: &str = "error.detail";
