//! Caller-supplied usage metadata attached to a single chat/generate call.
//!
//! Unknown keys are ignored on decode. Absent keys stay `None` and are
//! reported as `null` in the telemetry record, never omitted.

use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Credential {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq, Default)]
pub struct Subscriber {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Present whenever the input carried a non-empty credential object,
    /// even if neither `name` nor `value` is set.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "credential_if_non_empty"
    )]
    pub credential: Option<Credential>,
}

fn credential_if_non_empty<'de, D>(deserializer: D) -> Result<Option<Credential>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    let Some(serde_json::Value::Object(map)) = raw else {
        return Ok(None);
    };
    if map.is_empty() {
        return Ok(None);
    }
    let text = |key: &str| map.get(key).and_then(|v| v.as_str()).map(str::to_string);
    Ok(Some(Credential {
        name: text("name"),
        value: text("value"),
    }))
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Default)]
pub struct UsageMetadata {
    #[serde(default)]
    pub subscriber: Option<Subscriber>,
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub task_type: Option<String>,
    #[serde(default)]
    pub organization_id: Option<String>,
    #[serde(default)]
    pub subscription_id: Option<String>,
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub agent: Option<String>,
    #[serde(default)]
    pub response_quality_score: Option<f64>,

    // trace visualization overrides
    #[serde(default)]
    pub environment: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub credential_alias: Option<String>,
    #[serde(default)]
    pub trace_type: Option<String>,
    #[serde(default)]
    pub trace_name: Option<String>,
    #[serde(default)]
    pub parent_transaction_id: Option<String>,
    #[serde(default, rename = "transactionName")]
    pub transaction_name_camel: Option<String>,
    #[serde(default)]
    pub transaction_name: Option<String>,
}

impl UsageMetadata {
    /// Decode from an arbitrary JSON mapping. `null` decodes to the empty metadata.
    pub fn from_value(value: serde_json::Value) -> crate::error::CoreResult<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| {
            crate::error::MeterError::Validation(format!("invalid usage metadata: {e}"))
        })
    }

    /// Subscriber block for the metering record, built only from keys that
    /// carry a value. Returns `None` when nothing usable is present.
    pub fn subscriber_payload(&self) -> Option<Subscriber> {
        let nested = self.subscriber.as_ref()?;
        let out = Subscriber {
            id: non_empty(nested.id.as_deref()),
            email: non_empty(nested.email.as_deref()),
            credential: nested.credential.clone(),
        };
        if out.id.is_none() && out.email.is_none() && out.credential.is_none() {
            None
        } else {
            Some(out)
        }
    }
}

fn non_empty(s: Option<&str>) -> Option<String> {
    s.filter(|v| !v.is_empty()).map(str::to_string)
}
