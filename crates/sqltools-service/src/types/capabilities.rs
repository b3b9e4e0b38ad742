//! Capability and initialization types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

pub const SERVICE_NAME: &str = "sqltools-service";
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

pub const PROTOCOL_VERSION: &str = "1.0";
pub const PROVIDER_NAME: &str = "MSSQL";
pub const PROVIDER_DISPLAY_NAME: &str = "Microsoft SQL Server";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeParams {
    #[serde(default)]
    pub process_id: Option<i64>,
    #[serde(default)]
    pub root_path: Option<String>,
    #[serde(default)]
    pub root_uri: Option<String>,
    #[serde(default)]
    pub capabilities: Value,
    #[serde(default)]
    pub initialization_options: Option<Value>,
    #[serde(default)]
    pub trace: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum TextDocumentSyncKind {
    None,
    #[default]
    Full,
    Incremental,
}

impl From<TextDocumentSyncKind> for u8 {
    fn from(kind: TextDocumentSyncKind) -> u8 {
        match kind {
            TextDocumentSyncKind::None => 0,
            TextDocumentSyncKind::Full => 1,
            TextDocumentSyncKind::Incremental => 2,
        }
    }
}

impl TryFrom<u8> for TextDocumentSyncKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TextDocumentSyncKind::None),
            1 => Ok(TextDocumentSyncKind::Full),
            2 => Ok(TextDocumentSyncKind::Incremental),
            other => Err(format!("unknown text document sync kind {other}")),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletionOptions {
    #[serde(default)]
    pub resolve_provider: bool,
    #[serde(default)]
    pub trigger_characters: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureHelpOptions {
    #[serde(default)]
    pub trigger_characters: Vec<String>,
}

/// Capabilities returned from `initialize`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerCapabilities {
    #[serde(default)]
    pub text_document_sync: TextDocumentSyncKind,
    #[serde(default)]
    pub hover_provider: bool,
    #[serde(default)]
    pub definition_provider: bool,
    #[serde(default)]
    pub references_provider: bool,
    #[serde(default)]
    pub document_formatting_provider: bool,
    #[serde(default)]
    pub document_range_formatting_provider: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_provider: Option<CompletionOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature_help_provider: Option<SignatureHelpOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub experimental: Option<HashMap<String, Value>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InitializeResult {
    pub capabilities: ServerCapabilities,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesRequest {
    #[serde(default)]
    pub host_name: Option<String>,
    #[serde(default)]
    pub host_version: Option<String>,
}

/// One feature area advertised through `capabilities/list`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureMetadata {
    pub feature_name: String,
    pub enabled: bool,
    #[serde(default)]
    pub options_metadata: Vec<Value>,
}

impl FeatureMetadata {
    pub fn enabled(name: impl Into<String>) -> Self {
        Self {
            feature_name: name.into(),
            enabled: true,
            options_metadata: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DmpServerCapabilities {
    pub protocol_version: String,
    pub provider_name: String,
    pub provider_display_name: String,
    #[serde(default)]
    pub features: Vec<FeatureMetadata>,
}

impl DmpServerCapabilities {
    pub fn new(features: Vec<FeatureMetadata>) -> Self {
        Self {
            protocol_version: PROTOCOL_VERSION.to_string(),
            provider_name: PROVIDER_NAME.to_string(),
            provider_display_name: PROVIDER_DISPLAY_NAME.to_string(),
            features,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilitiesResult {
    pub capabilities: DmpServerCapabilities,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_initialize_params_tolerate_missing_fields() {
        let params: InitializeParams = serde_json::from_value(json!({"processId": 42})).unwrap();
        assert_eq!(params.process_id, Some(42));
        assert!(params.root_uri.is_none());
        assert!(params.capabilities.is_null());
    }

    #[test]
    fn test_server_capabilities_wire_names() {
        let caps = ServerCapabilities {
            hover_provider: true,
            completion_provider: Some(CompletionOptions {
                resolve_provider: false,
                trigger_characters: vec![".".into()],
            }),
            ..Default::default()
        };
        let value = serde_json::to_value(&caps).unwrap();
        assert_eq!(value["textDocumentSync"], 1);
        assert_eq!(value["hoverProvider"], true);
        assert_eq!(value["completionProvider"]["triggerCharacters"], json!(["."]));
        assert!(value.get("signatureHelpProvider").is_none());
    }

    #[test]
    fn test_sync_kind_rejects_unknown() {
        assert!(serde_json::from_value::<TextDocumentSyncKind>(json!(7)).is_err());
    }
}
