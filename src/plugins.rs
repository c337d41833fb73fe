//! Backend plugins
//!
//! A plugin is a directory holding a `config.json` descriptor that names a
//! backend type and the fields needed to configure a remote of that type.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{RemoteError, Result};
use crate::rclone::{RemoteDefinition, RemoteProperties};

/// Field carrying the remote's section name in submitted values
pub const REMOTE_NAME_FIELD: &str = "remote_name";

/// Kind of input a field expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", from = "String")]
pub enum FieldType {
    #[default]
    Text,
    Password,
    Checkbox,
    File,
    Number,
}

impl From<String> for FieldType {
    /// Unknown kinds are treated as free text
    fn from(kind: String) -> Self {
        match kind.trim().to_ascii_lowercase().as_str() {
            "password" => FieldType::Password,
            "checkbox" | "bool" | "boolean" => FieldType::Checkbox,
            "file" => FieldType::File,
            "number" | "int" | "integer" => FieldType::Number,
            _ => FieldType::Text,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, alias = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    #[serde(default)]
    pub placeholder: Option<String>,
    #[serde(default)]
    pub tooltip: Option<String>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            field_type,
            required: false,
            default: None,
            placeholder: None,
            tooltip: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<serde_json::Value>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Human-facing name, falling back to the key
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Default rendered as a config value; JSON booleans and numbers are accepted
    pub fn default_string(&self) -> Option<String> {
        match self.default.as_ref()? {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) if s.trim().is_empty() => None,
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginDescriptor {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    /// Remotes of this type carry credentials worth flagging in listings
    #[serde(default)]
    pub secure: bool,
    #[serde(default)]
    pub basic_fields: Vec<FieldSpec>,
    #[serde(default)]
    pub advanced_fields: Vec<FieldSpec>,
    /// Older descriptors list everything here
    #[serde(default, skip_serializing)]
    fields: Vec<FieldSpec>,
}

impl PluginDescriptor {
    /// Descriptor without fields, for backend types no plugin describes
    pub fn bare(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            description: None,
            version: None,
            author: None,
            secure: false,
            basic_fields: Vec::new(),
            advanced_fields: Vec::new(),
            fields: Vec::new(),
        }
    }

    /// Parse a descriptor, folding legacy `fields` into `basic_fields`
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let mut plugin: PluginDescriptor = serde_json::from_str(json)?;
        if plugin.basic_fields.is_empty() {
            plugin.basic_fields = std::mem::take(&mut plugin.fields);
        } else {
            plugin.fields.clear();
        }
        Ok(plugin)
    }

    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    /// Basic fields followed by advanced ones
    pub fn all_fields(&self) -> impl Iterator<Item = &FieldSpec> {
        self.basic_fields.iter().chain(self.advanced_fields.iter())
    }

    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.all_fields().find(|f| f.name == name)
    }

    /// Whether `remote_type` names this plugin
    pub fn matches_type(&self, remote_type: &str) -> bool {
        self.name.eq_ignore_ascii_case(remote_type.trim())
    }
}

/// Plugins found on disk
#[derive(Debug, Clone, Default)]
pub struct PluginCatalog {
    plugins: Vec<PluginDescriptor>,
}

impl PluginCatalog {
    pub fn from_plugins(plugins: Vec<PluginDescriptor>) -> Self {
        Self { plugins }
    }

    /// Where plugins are looked for when nothing is configured
    pub fn default_dirs() -> Vec<PathBuf> {
        let mut found = Vec::new();
        if let Some(exe_dir) = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
        {
            found.push(exe_dir.join("plugins"));
        }
        if let Ok(cwd) = std::env::current_dir() {
            found.push(cwd.join("plugins"));
        }
        if let Some(config_dir) = dirs::config_dir() {
            found.push(config_dir.join("rclone-mountctl").join("plugins"));
        }
        found
    }

    /// Load `<dir>/<plugin>/config.json` from each directory.
    ///
    /// Missing directories are skipped and unreadable descriptors are logged and
    /// skipped. When two directories define the same name the earlier one wins.
    pub async fn discover(dirs: &[PathBuf]) -> Self {
        let mut plugins: Vec<PluginDescriptor> = Vec::new();
        for dir in dirs {
            let mut entries = match tokio::fs::read_dir(dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            let mut candidates = Vec::new();
            while let Ok(Some(entry)) = entries.next_entry().await {
                candidates.push(entry.path().join("config.json"));
            }
            candidates.sort();

            for path in candidates {
                let Ok(json) = tokio::fs::read_to_string(&path).await else {
                    continue;
                };
                match PluginDescriptor::from_json(&json) {
                    Ok(plugin) => {
                        if plugins.iter().any(|p| p.matches_type(&plugin.name)) {
                            tracing::debug!("Plugin {} at {:?} shadowed by an earlier directory", plugin.name, path);
                            continue;
                        }
                        tracing::debug!("Loaded plugin {} from {:?}", plugin.name, path);
                        plugins.push(plugin);
                    }
                    Err(e) => tracing::warn!("Skipping plugin {:?}: {}", path, e),
                }
            }
        }
        Self { plugins }
    }

    pub fn plugins(&self) -> &[PluginDescriptor] {
        &self.plugins
    }

    /// Case-insensitive lookup by name
    pub fn find(&self, name: &str) -> Option<&PluginDescriptor> {
        self.plugins.iter().find(|p| p.matches_type(name))
    }

    pub fn get(&self, name: &str) -> Result<&PluginDescriptor> {
        self.find(name)
            .ok_or_else(|| RemoteError::PluginNotFound(name.to_string()))
    }
}

fn parse_checkbox(field: &FieldSpec, value: &str) -> Result<String> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok("true".to_string()),
        "false" | "0" | "no" | "off" | "" => Ok("false".to_string()),
        other => Err(RemoteError::Validation(format!(
            "Field '{}' must be true or false, got '{}'",
            field.label(),
            other
        ))),
    }
}

/// Final value for one field.
///
/// `submitted` is what the user entered (`None` when the field was not given at
/// all), `existing` the value currently stored for the remote being edited.
/// An empty password keeps the stored one; an omitted field keeps the stored
/// value; an explicitly emptied field falls back to the default.
pub fn resolve_field(
    field: &FieldSpec,
    submitted: Option<&str>,
    existing: Option<&str>,
) -> Result<Option<String>> {
    let value = match field.field_type {
        FieldType::Checkbox => {
            let raw = submitted
                .map(str::to_string)
                .or_else(|| existing.map(str::to_string))
                .or_else(|| field.default_string())
                .unwrap_or_default();
            return parse_checkbox(field, &raw).map(Some);
        }
        FieldType::Password => match submitted.filter(|v| !v.is_empty()) {
            Some(v) => Some(v.to_string()),
            None => existing
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .or_else(|| field.default_string()),
        },
        FieldType::Text | FieldType::File | FieldType::Number => match submitted {
            Some(v) if !v.trim().is_empty() => Some(v.trim().to_string()),
            Some(_) => field.default_string(),
            None => existing
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .or_else(|| field.default_string()),
        },
    };

    let Some(value) = value else {
        if field.required {
            return Err(RemoteError::Validation(format!(
                "Required field '{}' is missing",
                field.label()
            )));
        }
        return Ok(None);
    };

    if field.field_type == FieldType::Number && value.parse::<f64>().is_err() {
        return Err(RemoteError::Validation(format!(
            "Field '{}' must be a number, got '{}'",
            field.label(),
            value
        )));
    }
    Ok(Some(value))
}

/// Build the definition for a remote of `plugin`'s type from submitted values.
///
/// The section name comes from `remote_name`. Submitted keys the plugin does not
/// declare are passed through as plain options.
pub fn build_definition(
    plugin: &PluginDescriptor,
    values: &BTreeMap<String, String>,
    existing: Option<&RemoteProperties>,
) -> Result<RemoteDefinition> {
    let name = values
        .get(REMOTE_NAME_FIELD)
        .map(|n| n.trim())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| RemoteError::Validation(format!("{} is required", REMOTE_NAME_FIELD)))?;

    let mut definition = RemoteDefinition::new(name, plugin.name.clone());
    for field in plugin.all_fields() {
        if field.name == REMOTE_NAME_FIELD || field.name == "type" {
            continue;
        }
        let submitted = values.get(&field.name).map(String::as_str);
        let current = existing.and_then(|p| p.get(&field.name));
        if let Some(value) = resolve_field(field, submitted, current)? {
            definition.properties.insert(field.name.clone(), value);
        }
    }

    for (key, value) in values {
        if key == REMOTE_NAME_FIELD || key == "type" || plugin.field(key).is_some() {
            continue;
        }
        definition.properties.insert(key.clone(), value.clone());
    }

    // Options the plugin does not know about survive an edit untouched
    if let Some(existing) = existing {
        for (key, value) in existing.iter() {
            if key != "type" && !definition.properties.contains_key(key) && plugin.field(key).is_none() {
                definition.properties.insert(key, value);
            }
        }
    }

    Ok(definition)
}

/// Password fields that received a new plaintext value and must be obscured
pub fn fields_to_obscure(plugin: &PluginDescriptor, values: &BTreeMap<String, String>) -> Vec<String> {
    plugin
        .all_fields()
        .filter(|f| f.field_type == FieldType::Password)
        .filter(|f| values.get(&f.name).is_some_and(|v| !v.is_empty()))
        .map(|f| f.name.clone())
        .collect()
}
