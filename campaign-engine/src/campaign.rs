//! Campaign definitions
//!
//! A campaign file is TOML:
//!
//! ```toml
//! id = "spring-checkups"
//! agent_id = "agent_42"
//! prompt = "Llama a {{nombre}} para confirmar su cita del {{fecha}}."
//! phone_column = "phone"
//!
//! [calling]
//! from_number = "+34910000000"
//! concurrency_limit = 3
//!
//! [[columns]]
//! id = "name"
//! label = "Nombre"
//!
//! [[rows]]
//! data = { name = "Ana", phone = "600 111 222" }
//! ```
//!
//! Rows without an `id` get a monotonic ULID so file order is dispatch order.

use serde::Deserialize;
use shared_types::{
    sanitize_column_key, CallingConfig, CampaignColumn, CampaignRow, DEFAULT_PHONE_COLUMN,
};
use std::collections::HashMap;
use std::path::Path;
use validator::Validate;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CampaignFileError {
    #[error("failed to read campaign file: {0}")]
    Io(String),

    #[error("failed to parse campaign file: {0}")]
    Parse(String),

    #[error("invalid campaign definition: {0}")]
    Invalid(String),
}

impl From<validator::ValidationErrors> for CampaignFileError {
    fn from(e: validator::ValidationErrors) -> Self {
        CampaignFileError::Invalid(e.to_string())
    }
}

/// Everything the initiator needs to place calls for one campaign
#[derive(Debug, Clone, PartialEq)]
pub struct CampaignContext {
    pub campaign_id: String,
    pub agent_id: String,
    pub prompt_template: String,
    pub columns: Vec<CampaignColumn>,
    pub phone_column: String,
    pub calling: CallingConfig,
}

impl CampaignContext {
    pub fn new(campaign_id: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            campaign_id: campaign_id.into(),
            agent_id: agent_id.into(),
            prompt_template: String::new(),
            columns: Vec::new(),
            phone_column: DEFAULT_PHONE_COLUMN.to_string(),
            calling: CallingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ColumnDefinition {
    #[validate(length(min = 1, message = "column id is required"))]
    pub id: String,
    #[serde(default)]
    pub label: String,
    /// Explicit template variable name; derived from `label` when absent
    #[serde(default)]
    pub key: Option<String>,
}

impl ColumnDefinition {
    fn to_column(&self) -> CampaignColumn {
        let label = if self.label.trim().is_empty() {
            self.id.clone()
        } else {
            self.label.clone()
        };
        match self.key.as_deref().map(str::trim) {
            Some(key) if !key.is_empty() => CampaignColumn {
                id: self.id.clone(),
                key: key.to_string(),
                label,
            },
            _ => CampaignColumn {
                id: self.id.clone(),
                key: sanitize_column_key(&label),
                label,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RowSeed {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub data: HashMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CampaignDefinition {
    #[validate(length(min = 1, message = "campaign id is required"))]
    pub id: String,
    #[validate(length(min = 1, message = "agent_id is required"))]
    pub agent_id: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default = "default_phone_column")]
    #[validate(length(min = 1, message = "phone_column cannot be empty"))]
    pub phone_column: String,
    #[serde(default)]
    #[validate(nested)]
    pub columns: Vec<ColumnDefinition>,
    #[validate(nested)]
    pub calling: CallingConfig,
    #[serde(default)]
    pub rows: Vec<RowSeed>,
}

fn default_phone_column() -> String {
    DEFAULT_PHONE_COLUMN.to_string()
}

impl CampaignDefinition {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CampaignFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| CampaignFileError::Io(format!("{}: {e}", path.display())))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, CampaignFileError> {
        let definition: Self =
            toml::from_str(content).map_err(|e| CampaignFileError::Parse(e.to_string()))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn columns(&self) -> Vec<CampaignColumn> {
        self.columns.iter().map(ColumnDefinition::to_column).collect()
    }

    pub fn context(&self) -> CampaignContext {
        CampaignContext {
            campaign_id: self.id.clone(),
            agent_id: self.agent_id.clone(),
            prompt_template: self.prompt.clone(),
            columns: self.columns(),
            phone_column: self.phone_column.clone(),
            calling: self.calling.clone(),
        }
    }

    /// Rows declared in the file, as fresh `pending` rows.
    pub fn seed_rows(&self) -> Result<Vec<CampaignRow>, CampaignFileError> {
        let mut ids = ulid::Generator::new();
        self.rows
            .iter()
            .map(|seed| {
                let id = match seed.id.as_deref().map(str::trim) {
                    Some(id) if !id.is_empty() => id.to_string(),
                    _ => ids
                        .generate()
                        .map_err(|e| CampaignFileError::Invalid(e.to_string()))?
                        .to_string(),
                };
                let data = seed
                    .data
                    .iter()
                    .map(|(field, value)| Ok((field.clone(), cell_text(field, value)?)))
                    .collect::<Result<HashMap<_, _>, CampaignFileError>>()?;
                Ok(CampaignRow::new(id, self.id.clone(), data))
            })
            .collect()
    }
}

fn cell_text(field: &str, value: &toml::Value) -> Result<String, CampaignFileError> {
    match value {
        toml::Value::String(text) => Ok(text.clone()),
        toml::Value::Integer(n) => Ok(n.to_string()),
        toml::Value::Float(n) => Ok(n.to_string()),
        toml::Value::Boolean(b) => Ok(b.to_string()),
        toml::Value::Datetime(dt) => Ok(dt.to_string()),
        toml::Value::Array(_) | toml::Value::Table(_) => Err(CampaignFileError::Invalid(
            format!("row field '{field}' must be a scalar value"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
id = "spring-checkups"
agent_id = "agent_42"
prompt = "Hola {{Nombre}}"

[calling]
from_number = "+34910000000"
concurrency_limit = 2

[[columns]]
id = "name"
label = "Nombre"

[[columns]]
id = "date"
label = "Fecha de Cita"

[[columns]]
id = "ref"
label = "Reference"
key = "ref_code"

[[rows]]
data = { name = "Ana", phone = "600 111 222" }

[[rows]]
id = "row-explicit"
data = { name = "Luis", phone = 600111223 }

[[rows]]
data = { name = "Marta", phone = "600111224" }
"#;

    #[test]
    fn test_parse_sample_campaign() {
        let def = CampaignDefinition::parse(SAMPLE).unwrap();
        assert_eq!(def.id, "spring-checkups");
        assert_eq!(def.phone_column, "phone");
        assert_eq!(def.calling.concurrency_limit, 2);
        assert!(!def.calling.retry_failed);

        let keys: Vec<String> = def.columns().into_iter().map(|c| c.key).collect();
        assert_eq!(keys, vec!["nombre", "fecha_de_cita", "ref_code"]);
    }

    #[test]
    fn test_seed_rows_generate_ordered_ids_and_stringify_cells() {
        let def = CampaignDefinition::parse(SAMPLE).unwrap();
        let rows = def.seed_rows().unwrap();

        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].id, "row-explicit");
        assert_eq!(rows[1].phone("phone"), Some("600111223"));
        assert!(rows[0].id < rows[2].id);
        assert!(rows.iter().all(|r| r.campaign_id == "spring-checkups"));
    }

    #[test]
    fn test_context_carries_prompt_and_calling() {
        let ctx = CampaignDefinition::parse(SAMPLE).unwrap().context();
        assert_eq!(ctx.campaign_id, "spring-checkups");
        assert_eq!(ctx.agent_id, "agent_42");
        assert_eq!(ctx.prompt_template, "Hola {{Nombre}}");
        assert_eq!(ctx.calling.from_number, "+34910000000");
        assert_eq!(ctx.columns.len(), 3);
    }

    #[test]
    fn test_zero_concurrency_is_invalid() {
        let content = SAMPLE.replace("concurrency_limit = 2", "concurrency_limit = 0");
        let err = CampaignDefinition::parse(&content).unwrap_err();
        assert!(matches!(err, CampaignFileError::Invalid(_)), "{err:?}");
    }

    #[test]
    fn test_missing_agent_is_invalid() {
        let content = SAMPLE.replace("agent_id = \"agent_42\"", "agent_id = \"\"");
        assert!(matches!(
            CampaignDefinition::parse(&content),
            Err(CampaignFileError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_toml_is_parse_error() {
        assert!(matches!(
            CampaignDefinition::parse("id = "),
            Err(CampaignFileError::Parse(_))
        ));
    }

    #[test]
    fn test_nested_row_value_is_rejected() {
        let content = format!("{SAMPLE}\n[[rows]]\ndata = {{ phone = [1, 2] }}\n");
        let def = CampaignDefinition::parse(&content).unwrap();
        assert!(matches!(
            def.seed_rows(),
            Err(CampaignFileError::Invalid(_))
        ));
    }
}
