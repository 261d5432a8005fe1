//! Row model: one filled-in form entry of a user-defined table

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

use super::entity::Entity;

/// A row of a project table, optionally carrying a geometry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// User-defined table this row belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    /// Parent row for hierarchical tables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// GeoJSON geometry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<String>,
    /// Bounding box north
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_n: Option<f64>,
    /// Bounding box east
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_e: Option<f64>,
    /// Bounding box south
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_s: Option<f64>,
    /// Bounding box west
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry_w: Option<f64>,
    /// Field values as JSON text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

impl Row {
    /// Create a row for the given user table with JSON field data
    #[must_use]
    pub fn new(table_id: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            table_id: Some(table_id.into()),
            data: Some(data.into()),
            ..Self::default()
        }
    }
}

impl Entity for Row {
    const TABLE: &'static str = "rows";

    fn validate(&self) -> Result<()> {
        if let Some(data) = &self.data {
            serde_json::from_str::<serde_json::Value>(data).map_err(|error| {
                Error::InvalidInput(format!("Row data must be valid JSON: {error}"))
            })?;
        }

        if let (Some(north), Some(south)) = (self.geometry_n, self.geometry_s) {
            if north < south {
                return Err(Error::InvalidInput(
                    "Row bounding box north must not be below south".to_string(),
                ));
            }
        }
        Ok(())
    }
}
