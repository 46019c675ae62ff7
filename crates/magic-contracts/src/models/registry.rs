use indexmap::IndexMap;

pub const EDIT_CAPABILITY: &str = "edit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name.trim())
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    // First edit-capable entry is the default.
    insert("gemini-2.5-flash-image", "gemini", &["image", "edit"]);
    insert("gemini-2.5-flash-image-preview", "gemini", &["image", "edit"]);
    insert("gemini-3-pro-image-preview", "gemini", &["image", "edit"]);
    insert("gemini-2.0-flash-preview-image-generation", "gemini", &["image"]);
    insert("dryrun-edit-1", "dryrun", &["image", "edit"]);

    map
}

#[cfg(test)]
mod tests {
    use super::{ModelRegistry, EDIT_CAPABILITY};

    #[test]
    fn default_registry_lists_gemini_first() {
        let registry = ModelRegistry::new(None);
        let editors = registry.by_capability(EDIT_CAPABILITY);
        assert_eq!(
            editors.first().map(|model| model.name.as_str()),
            Some("gemini-2.5-flash-image")
        );
        assert!(editors.iter().any(|model| model.provider == "dryrun"));
    }

    #[test]
    fn ensure_checks_capability() {
        let registry = ModelRegistry::new(None);
        assert!(registry
            .ensure("gemini-2.0-flash-preview-image-generation", EDIT_CAPABILITY)
            .is_none());
        assert!(registry.ensure(" dryrun-edit-1 ", EDIT_CAPABILITY).is_some());
        assert!(registry.ensure("missing", EDIT_CAPABILITY).is_none());
    }
}
