//! User configuration model.
//!
//! # Responsibility
//! - Define the stored shape of one client's CRM module configuration.
//! - Convert caller input into that shape, dropping unset values.
//!
//! # Invariants
//! - Unset fields are omitted from storage instead of persisted as `null`.
//! - `client_id` is the natural lookup key; it is not the document id.

use serde::{Deserialize, Serialize};

/// Name of the field holding the natural key.
pub const CLIENT_ID_FIELD: &str = "client_id";

/// Stored user configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crm_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crm_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub module_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freeze: Option<bool>,
}

/// Caller-facing input for user creation.
///
/// String fields default to empty and flags default to `Some(false)`,
/// matching what an HTTP body with missing keys decodes to. An explicit
/// `null` flag stays unset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserInput {
    pub client_id: String,
    pub crm_url: String,
    pub crm_api_key: String,
    pub module_name: String,
    pub module_code: String,
    pub active: Option<bool>,
    pub freeze: Option<bool>,
}

impl Default for UserInput {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            crm_url: String::new(),
            crm_api_key: String::new(),
            module_name: String::new(),
            module_code: String::new(),
            active: Some(false),
            freeze: Some(false),
        }
    }
}

impl UserInput {
    /// Converts input to the stored shape, treating blank strings as unset.
    pub fn into_config(self) -> UserConfig {
        UserConfig {
            client_id: non_empty(self.client_id),
            crm_url: non_empty(self.crm_url),
            crm_api_key: non_empty(self.crm_api_key),
            module_name: non_empty(self.module_name),
            module_code: non_empty(self.module_code),
            active: self.active,
            freeze: self.freeze,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
