//! Attaching the transaction id to responses and stream fragments.

use std::ops::Deref;
use std::sync::Arc;

use serde::ser::Error as _;
use serde::{Serialize, Serializer};

use crate::telemetry::KEY_TRANSACTION_ID;

/// JSON key the transaction id is exposed under when a response is serialized.
pub const TRANSACTION_ID_FIELD: &str = "_revenium_transaction_id";

/// A response (or fragment) together with the transaction id of the call
/// that produced it. Derefs to the untouched inner value.
#[derive(Debug, Clone, PartialEq)]
pub struct Annotated<T> {
    inner: T,
    transaction_id: Arc<str>,
}

impl<T> Annotated<T> {
    pub fn new(inner: T, transaction_id: Arc<str>) -> Self {
        Self { inner, transaction_id }
    }

    pub fn transaction_id(&self) -> &str {
        &self.transaction_id
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }
}

impl<T> Deref for Annotated<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.inner
    }
}

impl<T> AsRef<T> for Annotated<T> {
    fn as_ref(&self) -> &T {
        &self.inner
    }
}

impl<T: Serialize> Serialize for Annotated<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut value = serde_json::to_value(&self.inner).map_err(S::Error::custom)?;
        attach_transaction_id(&mut value, &self.transaction_id);
        value.serialize(serializer)
    }
}

pub fn annotate<T>(inner: T, transaction_id: &Arc<str>) -> Annotated<T> {
    tracing::trace!({ KEY_TRANSACTION_ID } = %transaction_id, "added transaction id to response");
    Annotated::new(inner, transaction_id.clone())
}

/// Adds the transaction id key to a JSON object. Any other JSON value is left
/// as-is with a warning; returns whether the id was attached.
pub fn attach_transaction_id(value: &mut serde_json::Value, transaction_id: &str) -> bool {
    match value.as_object_mut() {
        Some(map) => {
            map.insert(TRANSACTION_ID_FIELD.to_string(), transaction_id.into());
            true
        }
        None => {
            tracing::warn!(
                { KEY_TRANSACTION_ID } = %transaction_id,
                "could not add transaction id: response is not a JSON object"
            );
            false
        }
    }
}
