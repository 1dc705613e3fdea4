//! Resolution of trace-visualization fields.
//!
//! Each field is looked up in call-supplied metadata first, then in a fixed,
//! prioritized list of environment variables. Nothing found yields `None`
//! (or `0` for the retry number).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::usage::UsageMetadata;

pub const ENV_ENVIRONMENT: [&str; 3] = ["REVENIUM_ENVIRONMENT", "ENVIRONMENT", "DEPLOYMENT_ENV"];
pub const ENV_REGION: [&str; 4] = ["REVENIUM_REGION", "AWS_REGION", "AZURE_REGION", "GCP_REGION"];
pub const ENV_CREDENTIAL_ALIAS: &str = "REVENIUM_CREDENTIAL_ALIAS";
pub const ENV_TRACE_TYPE: &str = "REVENIUM_TRACE_TYPE";
pub const ENV_TRACE_NAME: &str = "REVENIUM_TRACE_NAME";
pub const ENV_PARENT_TRANSACTION_ID: &str = "REVENIUM_PARENT_TRANSACTION_ID";
pub const ENV_TRANSACTION_NAME: &str = "REVENIUM_TRANSACTION_NAME";
pub const ENV_RETRY_NUMBER: &str = "REVENIUM_RETRY_NUMBER";

pub const TRACE_TYPE_MAX_LEN: usize = 128;
pub const TRACE_NAME_MAX_LEN: usize = 256;

/// Source of environment variables. Empty values count as unset.
pub trait EnvSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok().filter(|v| !v.is_empty())
    }
}

impl EnvSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).filter(|v| !v.is_empty()).cloned()
    }
}

fn first_of(env: &dyn EnvSource, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| env.var(k))
}

pub fn environment(env: &dyn EnvSource) -> Option<String> {
    first_of(env, &ENV_ENVIRONMENT)
}

pub fn region(env: &dyn EnvSource) -> Option<String> {
    first_of(env, &ENV_REGION)
}

pub fn credential_alias(env: &dyn EnvSource) -> Option<String> {
    env.var(ENV_CREDENTIAL_ALIAS)
}

pub fn trace_type(env: &dyn EnvSource) -> Option<String> {
    env.var(ENV_TRACE_TYPE).and_then(|s| validate_trace_type(&s))
}

pub fn trace_name(env: &dyn EnvSource) -> Option<String> {
    env.var(ENV_TRACE_NAME).map(|s| validate_trace_name(&s))
}

pub fn parent_transaction_id(env: &dyn EnvSource) -> Option<String> {
    env.var(ENV_PARENT_TRANSACTION_ID)
}

/// Environment first, then `transactionName`, `transaction_name`, and finally `task_type`.
pub fn transaction_name(metadata: Option<&UsageMetadata>, env: &dyn EnvSource) -> Option<String> {
    env.var(ENV_TRANSACTION_NAME).or_else(|| {
        let meta = metadata?;
        meta.transaction_name_camel
            .clone()
            .or_else(|| meta.transaction_name.clone())
            .or_else(|| meta.task_type.clone())
    })
}

/// Unset, negative, or non-numeric values all resolve to `0`.
pub fn retry_number(env: &dyn EnvSource) -> u32 {
    env.var(ENV_RETRY_NUMBER)
        .and_then(|s| s.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

/// Accepts `[A-Za-z0-9_-]{1,128}`; anything else is rejected, not truncated.
pub fn validate_trace_type(s: &str) -> Option<String> {
    let ok = !s.is_empty()
        && s.len() <= TRACE_TYPE_MAX_LEN
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if ok {
        Some(s.to_string())
    } else {
        tracing::warn!(trace_type = %s, "ignoring invalid trace type");
        None
    }
}

/// Truncates to the first 256 characters.
pub fn validate_trace_name(s: &str) -> String {
    if s.chars().count() > TRACE_NAME_MAX_LEN {
        tracing::debug!(max = TRACE_NAME_MAX_LEN, "truncating trace name");
        s.chars().take(TRACE_NAME_MAX_LEN).collect()
    } else {
        s.to_string()
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Chat,
    ToolCall,
    Generate,
    Embed,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "CHAT",
            Self::ToolCall => "TOOL_CALL",
            Self::Generate => "GENERATE",
            Self::Embed => "EMBED",
        }
    }
}

/// Classify a call by endpoint name, looking at the request body only for tools.
pub fn detect_operation_type(endpoint: &str, request_body: &serde_json::Value) -> OperationType {
    let endpoint = endpoint.to_ascii_lowercase();
    if endpoint.contains("chat") {
        let has_tools = request_body
            .get("tools")
            .and_then(|t| t.as_array())
            .is_some_and(|t| !t.is_empty());
        if has_tools {
            OperationType::ToolCall
        } else {
            OperationType::Chat
        }
    } else if endpoint.contains("generate") {
        OperationType::Generate
    } else if endpoint.contains("embed") {
        OperationType::Embed
    } else {
        OperationType::Chat
    }
}

/// All trace fields for one call.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TraceFields {
    pub environment: Option<String>,
    pub region: Option<String>,
    pub credential_alias: Option<String>,
    pub trace_type: Option<String>,
    pub trace_name: Option<String>,
    pub parent_transaction_id: Option<String>,
    pub transaction_name: Option<String>,
    pub retry_number: u32,
}

impl TraceFields {
    pub fn resolve(metadata: &UsageMetadata, env: &dyn EnvSource) -> Self {
        Self {
            environment: metadata.environment.clone().or_else(|| environment(env)),
            region: metadata.region.clone().or_else(|| region(env)),
            credential_alias: metadata
                .credential_alias
                .clone()
                .or_else(|| credential_alias(env)),
            trace_type: match metadata.trace_type.as_deref() {
                Some(t) => validate_trace_type(t),
                None => trace_type(env),
            },
            trace_name: match metadata.trace_name.as_deref() {
                Some(n) => Some(validate_trace_name(n)),
                None => trace_name(env),
            },
            parent_transaction_id: metadata
                .parent_transaction_id
                .clone()
                .or_else(|| parent_transaction_id(env)),
            transaction_name: transaction_name(Some(metadata), env),
            retry_number: retry_number(env),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env_of(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn environment_priority_order() {
        let mut env = env_of(&[("REVENIUM_ENVIRONMENT", "production"), ("ENVIRONMENT", "staging")]);
        assert_eq!(environment(&env).as_deref(), Some("production"));

        env.remove("REVENIUM_ENVIRONMENT");
        assert_eq!(environment(&env).as_deref(), Some("staging"));

        env.remove("ENVIRONMENT");
        env.insert("DEPLOYMENT_ENV".into(), "dev".into());
        assert_eq!(environment(&env).as_deref(), Some("dev"));
    }

    #[test]
    fn region_falls_back_through_cloud_providers() {
        let mut env = env_of(&[("REVENIUM_REGION", "custom"), ("AWS_REGION", "us-east-1")]);
        assert_eq!(region(&env).as_deref(), Some("custom"));

        env.remove("REVENIUM_REGION");
        assert_eq!(region(&env).as_deref(), Some("us-east-1"));

        env.remove("AWS_REGION");
        env.insert("AZURE_REGION".into(), "eastus".into());
        assert_eq!(region(&env).as_deref(), Some("eastus"));

        env.remove("AZURE_REGION");
        env.insert("GCP_REGION".into(), "us-central1".into());
        assert_eq!(region(&env).as_deref(), Some("us-central1"));
    }

    #[test]
    fn single_variable_fields() {
        let env = env_of(&[
            ("REVENIUM_CREDENTIAL_ALIAS", "prod-api-key"),
            ("REVENIUM_TRACE_TYPE", "api-request"),
            ("REVENIUM_TRACE_NAME", "User Authentication Flow"),
            ("REVENIUM_PARENT_TRANSACTION_ID", "parent-123"),
        ]);
        assert_eq!(credential_alias(&env).as_deref(), Some("prod-api-key"));
        assert_eq!(trace_type(&env).as_deref(), Some("api-request"));
        assert_eq!(trace_name(&env).as_deref(), Some("User Authentication Flow"));
        assert_eq!(parent_transaction_id(&env).as_deref(), Some("parent-123"));
    }

    #[test]
    fn transaction_name_prefers_env_then_metadata_then_task_type() {
        let mut env = env_of(&[("REVENIUM_TRANSACTION_NAME", "env-transaction")]);
        let meta = UsageMetadata {
            transaction_name_camel: Some("metadata-transaction".into()),
            task_type: Some("task".into()),
            ..Default::default()
        };
        assert_eq!(transaction_name(Some(&meta), &env).as_deref(), Some("env-transaction"));

        env.clear();
        assert_eq!(
            transaction_name(Some(&meta), &env).as_deref(),
            Some("metadata-transaction")
        );

        let task_only = UsageMetadata {
            task_type: Some("classification".into()),
            ..Default::default()
        };
        assert_eq!(transaction_name(Some(&task_only), &env).as_deref(), Some("classification"));
        assert_eq!(transaction_name(None, &env), None);
    }

    #[test]
    fn retry_number_parses_or_defaults_to_zero() {
        let env = env_of(&[("REVENIUM_RETRY_NUMBER", "3")]);
        assert_eq!(retry_number(&env), 3);
        assert_eq!(retry_number(&HashMap::new()), 0);
        let env = env_of(&[("REVENIUM_RETRY_NUMBER", "invalid")]);
        assert_eq!(retry_number(&env), 0);
    }

    #[test]
    fn negative_retry_number_is_zero() {
        let env = env_of(&[("REVENIUM_RETRY_NUMBER", "-1")]);
        assert_eq!(retry_number(&env), 0);
        let env = env_of(&[("REVENIUM_RETRY_NUMBER", " 2 ")]);
        assert_eq!(retry_number(&env), 2);
    }

    #[test]
    fn fields_are_none_without_env() {
        let env = HashMap::new();
        assert_eq!(environment(&env), None);
        assert_eq!(region(&env), None);
        assert_eq!(credential_alias(&env), None);
        assert_eq!(trace_type(&env), None);
        assert_eq!(trace_name(&env), None);
        assert_eq!(parent_transaction_id(&env), None);
        assert_eq!(transaction_name(None, &env), None);
    }

    #[test]
    fn empty_env_value_counts_as_unset() {
        let env = env_of(&[("REVENIUM_REGION", ""), ("AWS_REGION", "eu-west-1")]);
        assert_eq!(region(&env).as_deref(), Some("eu-west-1"));
    }

    #[test]
    fn trace_type_validation() {
        assert_eq!(validate_trace_type("api-request").as_deref(), Some("api-request"));
        assert_eq!(validate_trace_type("user_action").as_deref(), Some("user_action"));
        assert_eq!(validate_trace_type("API123").as_deref(), Some("API123"));
        assert_eq!(validate_trace_type("api request"), None);
        assert_eq!(validate_trace_type("api@request"), None);

        let max = "a".repeat(128);
        assert_eq!(validate_trace_type(&max), Some(max.clone()));
        assert_eq!(validate_trace_type(&"a".repeat(129)), None);
    }

    #[test]
    fn invalid_trace_type_from_env_is_dropped() {
        let env = env_of(&[("REVENIUM_TRACE_TYPE", "not valid!")]);
        assert_eq!(trace_type(&env), None);
    }

    #[test]
    fn trace_name_truncation() {
        assert_eq!(validate_trace_name("User Login Flow"), "User Login Flow");
        let out = validate_trace_name(&"a".repeat(300));
        assert_eq!(out.len(), 256);
        assert_eq!(out, "a".repeat(256));
        let max = "a".repeat(256);
        assert_eq!(validate_trace_name(&max), max);
    }

    #[test]
    fn trace_name_truncates_on_char_boundary() {
        let out = validate_trace_name(&"é".repeat(300));
        assert_eq!(out.chars().count(), 256);
    }

    #[test]
    fn operation_type_detection() {
        assert_eq!(detect_operation_type("chat", &json!({})), OperationType::Chat);
        assert_eq!(
            detect_operation_type("chat", &json!({"tools": [{"type": "function", "function": {}}]})),
            OperationType::ToolCall
        );
        assert_eq!(detect_operation_type("chat", &json!({"tools": []})), OperationType::Chat);
        assert_eq!(detect_operation_type("generate", &json!({})), OperationType::Generate);
        assert_eq!(detect_operation_type("embeddings", &json!({})), OperationType::Embed);
        assert_eq!(detect_operation_type("embed", &json!({})), OperationType::Embed);
        assert_eq!(detect_operation_type("unknown", &json!({})), OperationType::Chat);
        assert_eq!(OperationType::ToolCall.as_str(), "TOOL_CALL");
    }

    #[test]
    fn resolve_prefers_call_metadata_over_env() {
        let env = env_of(&[
            ("REVENIUM_ENVIRONMENT", "production"),
            ("AWS_REGION", "us-east-1"),
            ("REVENIUM_TRACE_TYPE", "batch"),
            ("REVENIUM_RETRY_NUMBER", "2"),
        ]);
        let meta = UsageMetadata {
            environment: Some("canary".into()),
            trace_type: Some("bad type".into()),
            trace_name: Some("n".repeat(400)),
            task_type: Some("summarize".into()),
            ..Default::default()
        };
        let fields = TraceFields::resolve(&meta, &env);
        assert_eq!(fields.environment.as_deref(), Some("canary"));
        assert_eq!(fields.region.as_deref(), Some("us-east-1"));
        // an invalid override is rejected rather than falling back to env
        assert_eq!(fields.trace_type, None);
        assert_eq!(fields.trace_name.map(|n| n.len()), Some(256));
        assert_eq!(fields.transaction_name.as_deref(), Some("summarize"));
        assert_eq!(fields.retry_number, 2);
        assert_eq!(fields.credential_alias, None);
    }
}
