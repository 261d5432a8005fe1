//! Typed entity kinds stored as record payloads

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

use super::payload::Payload;
use super::record::TableName;

/// An entity kind whose fields travel as a [`Payload`].
pub trait Entity: Serialize + DeserializeOwned {
    /// Collection this kind is synced in
    const TABLE: &'static str;

    /// Collection name as a validated [`TableName`]
    fn table() -> Result<TableName> {
        TableName::new(Self::TABLE)
    }

    /// Check field-level constraints before a revision is written
    fn validate(&self) -> Result<()> {
        Ok(())
    }

    fn to_payload(&self) -> Result<Payload> {
        self.validate()?;
        Payload::try_from(serde_json::to_value(self)?)
    }

    fn from_payload(payload: &Payload) -> Result<Self> {
        let value = serde_json::Value::from(payload.clone());
        serde_json::from_value(value).map_err(|error| {
            Error::InvalidInput(format!("Payload is not a valid {}: {error}", Self::TABLE))
        })
    }
}
