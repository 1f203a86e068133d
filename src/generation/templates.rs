//! Template catalog: which document, assets, script and fields make up each
//! renderable template.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::models::GenerationRequest;
use super::validation::{validate_required, ValidationError, ValidationErrors};
use crate::runscript::NamedValue;

const EOTM_SCRIPT: &str = include_str!("../../static/scripts/eotm.jsx");
const CERTIFICAT_SCRIPT: &str = include_str!("../../static/scripts/certificat.jsx");
const CERTIFICATE_FONT_KEY: &str = "fonts/Brush Script MT Italic.ttf";
const CERTIFICATE_FONT_PATH: &str = "Document Fonts/Brush Script MT Italic.ttf";

#[derive(Debug, thiserror::Error)]
pub enum TemplateError {
    #[error("failed to read template catalog {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse template catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("template '{0}' has neither script nor script_file")]
    MissingScript(String),
    #[error("template '{0}' is defined more than once")]
    Duplicate(String),
}

/// A stored object copied into the remote job's working folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct AssetRef {
    /// Key in the object store.
    pub key: String,
    /// Path inside the job folder, as the script expects it.
    pub path: String,
}

impl AssetRef {
    pub fn new(key: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            path: path.into(),
        }
    }
}

/// A request field the template requires, and the script argument it feeds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
pub struct TemplateField {
    pub name: String,
    pub arg: String,
    pub label: String,
}

impl TemplateField {
    pub fn new(name: &str, arg: &str, label: &str) -> Self {
        Self {
            name: name.to_string(),
            arg: arg.to_string(),
            label: label.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateDefinition {
    pub id: String,
    pub label: String,
    pub document: AssetRef,
    #[serde(default)]
    pub assets: Vec<AssetRef>,
    pub script: String,
    pub fields: Vec<TemplateField>,
    /// File the script exports, relative to the job folder.
    #[serde(default = "default_output_path")]
    pub output_path: String,
}

fn default_output_path() -> String {
    "certificate.pdf".to_string()
}

impl TemplateDefinition {
    pub fn validate(&self, request: &GenerationRequest) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();
        for field in &self.fields {
            validate_required(
                request.field(&field.name),
                &field.name,
                &field.label,
                &mut errors,
            );
        }
        errors.into_result()
    }

    /// One script argument per placeholder, in template order.
    pub fn script_args(&self, request: &GenerationRequest) -> Vec<NamedValue> {
        self.fields
            .iter()
            .map(|field| {
                let value = request.field(&field.name).unwrap_or_default().trim();
                NamedValue::new(field.arg.clone(), value)
            })
            .collect()
    }

    /// The value of the first declared field, used for naming and metadata.
    pub fn recipient<'a>(&self, request: &'a GenerationRequest) -> Option<&'a str> {
        self.fields
            .first()
            .and_then(|field| request.field(&field.name))
            .map(str::trim)
    }

    /// The document followed by every supporting asset.
    pub fn inputs(&self) -> impl Iterator<Item = &AssetRef> {
        std::iter::once(&self.document).chain(self.assets.iter())
    }
}

/// Shape of a template in a catalog file; the script may live beside it.
#[derive(Deserialize)]
struct TemplateEntry {
    id: String,
    label: Option<String>,
    document: AssetRef,
    #[serde(default)]
    assets: Vec<AssetRef>,
    script: Option<String>,
    script_file: Option<PathBuf>,
    fields: Vec<TemplateField>,
    #[serde(default = "default_output_path")]
    output_path: String,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TemplateSummary {
    pub id: String,
    pub label: String,
    pub fields: Vec<TemplateField>,
}

#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: IndexMap<String, TemplateDefinition>,
}

impl TemplateCatalog {
    pub fn new(definitions: Vec<TemplateDefinition>) -> Result<Self, TemplateError> {
        let mut templates = IndexMap::new();
        for definition in definitions {
            if templates.contains_key(&definition.id) {
                return Err(TemplateError::Duplicate(definition.id));
            }
            templates.insert(definition.id.clone(), definition);
        }
        Ok(Self { templates })
    }

    /// Templates shipped with the service.
    pub fn builtin() -> Self {
        let font = AssetRef::new(CERTIFICATE_FONT_KEY, CERTIFICATE_FONT_PATH);
        let eotm = TemplateDefinition {
            id: "eotm".to_string(),
            label: "Employee of the month".to_string(),
            document: AssetRef::new("templates/eotm.indd", "eotm.indd"),
            assets: vec![
                AssetRef::new("templates/eotm.pdf", "eotm.pdf"),
                font.clone(),
            ],
            script: EOTM_SCRIPT.to_string(),
            fields: vec![TemplateField::new("name", "Name", "Recipient name")],
            output_path: "certificate.pdf".to_string(),
        };
        let certificat = TemplateDefinition {
            id: "certificat".to_string(),
            label: "Commendation certificate".to_string(),
            document: AssetRef::new(
                "templates/Commendation-mountains.indd",
                "Commendation-mountains.indd",
            ),
            assets: vec![font],
            script: CERTIFICAT_SCRIPT.to_string(),
            fields: vec![
                TemplateField::new("name", "Nom", "Recipient name"),
                TemplateField::new("date", "Date", "Date"),
            ],
            output_path: "certificat.pdf".to_string(),
        };

        let mut templates = IndexMap::new();
        templates.insert(eotm.id.clone(), eotm);
        templates.insert(certificat.id.clone(), certificat);
        Self { templates }
    }

    /// Load a JSON array of templates. `script_file` paths resolve relative to
    /// the catalog file.
    pub fn from_json_file(path: &Path) -> Result<Self, TemplateError> {
        let raw = fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json_str(&raw, base)
    }

    pub fn from_json_str(raw: &str, base: &Path) -> Result<Self, TemplateError> {
        let entries: Vec<TemplateEntry> = serde_json::from_str(raw)?;
        let mut definitions = Vec::with_capacity(entries.len());

        for entry in entries {
            let script = match (entry.script, entry.script_file) {
                (Some(script), _) => script,
                (None, Some(file)) => {
                    let script_path = base.join(file);
                    fs::read_to_string(&script_path).map_err(|source| TemplateError::Io {
                        path: script_path,
                        source,
                    })?
                }
                (None, None) => return Err(TemplateError::MissingScript(entry.id)),
            };

            definitions.push(TemplateDefinition {
                label: entry.label.unwrap_or_else(|| entry.id.clone()),
                id: entry.id,
                document: entry.document,
                assets: entry.assets,
                script,
                fields: entry.fields,
                output_path: entry.output_path,
            });
        }

        Self::new(definitions)
    }

    pub fn get(&self, template_id: &str) -> Result<&TemplateDefinition, ValidationError> {
        self.templates
            .get(template_id)
            .ok_or_else(|| ValidationError::unknown_template(template_id, &self.ids()))
    }

    pub fn ids(&self) -> Vec<&str> {
        self.templates.keys().map(String::as_str).collect()
    }

    pub fn summaries(&self) -> Vec<TemplateSummary> {
        self.templates
            .values()
            .map(|t| TemplateSummary {
                id: t.id.clone(),
                label: t.label.clone(),
                fields: t.fields.clone(),
            })
            .collect()
    }
}

/// Lowercase ASCII slug for object keys; `fallback` when nothing survives.
pub fn slugify(name: &str, fallback: &str) -> String {
    let mut result = String::new();
    let mut last_dash = false;

    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            result.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if (ch.is_whitespace() || ch == '-' || ch == '_') && !last_dash && !result.is_empty()
        {
            result.push('-');
            last_dash = true;
        }
    }

    let trimmed = result.trim_matches('-');
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}
