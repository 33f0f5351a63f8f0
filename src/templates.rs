//! Prompt template registry.
//!
//! Templates are loaded from a YAML file mapping template names to prompt
//! text plus the set of fields the model is expected to return. The loaded
//! set is held behind an [`ArcSwap`] so that `reload` replaces it atomically
//! with respect to concurrent `get`/`list` calls: readers always see either
//! the fully-old or fully-new set. A reload that fails validation leaves the
//! previous set untouched.

use arc_swap::ArcSwap;
use chrono::NaiveDate;
use figment::{
    Figment,
    providers::{Format, Yaml},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};
use tracing::info;

use crate::errors::{Error, Result};

/// Semantic kind of an expected extraction field, used for validation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Text,
    Number,
    Date,
    Currency,
    PaymentMethod,
}

/// One named prompt template. Immutable once loaded; a configuration reload
/// replaces the whole set, never individual fields.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Template {
    #[serde(skip)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    pub system_prompt: String,
    pub user_prompt: String,
    /// Expected response fields by name; drives validation of model output
    #[serde(default)]
    pub fields: BTreeMap<String, FieldKind>,
}

/// Context injected into prompt placeholders when rendering
#[derive(Debug, Clone)]
pub struct PromptContext<'a> {
    pub buyer: Option<&'a str>,
    pub today: NaiveDate,
}

/// Prompts ready to send to the model
#[derive(Debug, Clone)]
pub struct RenderedPrompt {
    pub system: String,
    pub user: String,
}

impl Template {
    /// Render the system and user prompts against the given context.
    ///
    /// Substitution only touches the recognized placeholders
    /// `{buyer_context}` and `{current_date}`; any other `{...}` span is left
    /// verbatim so custom templates stay forgiving.
    pub fn render(&self, context: &PromptContext<'_>) -> RenderedPrompt {
        let buyer_context = match context.buyer {
            Some(buyer) => format!("Note: The buyer/customer for this invoice is: {buyer}"),
            None => String::new(),
        };
        let date = context.today.format("%Y-%m-%d").to_string();

        let substitute =
            |text: &str| text.replace("{buyer_context}", &buyer_context).replace("{current_date}", &date);

        // Date context lets the model resolve partial dates like "Jan 15"
        let system = format!(
            "{}\n\nCurrent date: {date}. When inferring dates without an explicit year, \
             assume the current year unless context suggests otherwise.",
            substitute(self.system_prompt.trim_end())
        );
        let user = substitute(&self.user_prompt);

        RenderedPrompt { system, user }
    }
}

type TemplateSet = BTreeMap<String, Arc<Template>>;

/// In-memory registry over the templates file, reloadable without restart
pub struct TemplateRegistry {
    path: PathBuf,
    templates: ArcSwap<TemplateSet>,
}

impl TemplateRegistry {
    /// Load the registry from the given YAML file. Fails if the file is
    /// missing, unparseable, or contains an invalid template.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let set = read_template_set(&path)?;
        info!(templates = set.len(), path = %path.display(), "Loaded prompt templates");
        Ok(Self {
            path,
            templates: ArcSwap::from_pointee(set),
        })
    }

    pub fn get(&self, name: &str) -> Result<Arc<Template>> {
        self.templates
            .load()
            .get(name)
            .cloned()
            .ok_or_else(|| Error::TemplateNotFound { name: name.to_string() })
    }

    /// All loaded templates, ordered by name
    pub fn list(&self) -> Vec<Arc<Template>> {
        self.templates.load().values().cloned().collect()
    }

    /// Re-read the templates file and atomically replace the loaded set.
    ///
    /// Validation runs against the candidate set before the swap, so a failed
    /// reload never partially applies. Returns the number of templates loaded.
    pub fn reload(&self) -> Result<usize> {
        let set = read_template_set(&self.path)?;
        let count = set.len();
        self.templates.store(Arc::new(set));
        info!(templates = count, "Reloaded prompt templates");
        Ok(count)
    }
}

fn read_template_set(path: &Path) -> Result<TemplateSet> {
    if !path.exists() {
        return Err(Error::Other(anyhow::anyhow!(
            "templates file not found: {}",
            path.display()
        )));
    }

    let raw: BTreeMap<String, Template> = Figment::new()
        .merge(Yaml::file(path))
        .extract()
        .map_err(|e| Error::Other(anyhow::anyhow!("failed to parse templates file {}: {e}", path.display())))?;

    let mut set = TemplateSet::new();
    for (name, mut template) in raw {
        if template.system_prompt.trim().is_empty() {
            return Err(Error::Other(anyhow::anyhow!(
                "template '{name}' has an empty system prompt"
            )));
        }
        if template.user_prompt.trim().is_empty() {
            return Err(Error::Other(anyhow::anyhow!(
                "template '{name}' has an empty user prompt"
            )));
        }
        template.name = name.clone();
        set.insert(name, Arc::new(template));
    }

    if set.is_empty() {
        return Err(Error::Other(anyhow::anyhow!(
            "templates file {} contains no templates",
            path.display()
        )));
    }

    Ok(set)
}
