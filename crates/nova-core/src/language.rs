//! Registry of evaluable languages.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

/// A language that code cells can be evaluated in.
///
/// `module` and `evaluator` name the callable inside the host
/// [`Environment`](crate::host::Environment) that runs source strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageDefinition {
    pub language_id: String,
    pub display_name: String,
    /// Where the plugin was fetched from. `None` for built-in languages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub module: String,
    pub evaluator: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keybinding: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_mirror_mode: Option<String>,
}

/// Mapping from language id to definition. Only grows.
#[derive(Debug, Default)]
pub struct LanguageRegistry {
    languages: FxHashMap<String, LanguageDefinition>,
}

impl LanguageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in languages.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(crate::host::builtin::expr_definition());
        registry
    }

    /// Register a language, returning the definition it replaced, if any.
    pub fn register(&mut self, definition: LanguageDefinition) -> Option<LanguageDefinition> {
        self.languages
            .insert(definition.language_id.clone(), definition)
    }

    pub fn get(&self, language_id: &str) -> Option<&LanguageDefinition> {
        self.languages.get(language_id)
    }

    pub fn contains(&self, language_id: &str) -> bool {
        self.languages.contains_key(language_id)
    }

    pub fn len(&self) -> usize {
        self.languages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    /// All definitions, sorted by language id.
    pub fn definitions(&self) -> Vec<&LanguageDefinition> {
        let mut definitions: Vec<_> = self.languages.values().collect();
        definitions.sort_by(|a, b| a.language_id.cmp(&b.language_id));
        definitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition(id: &str) -> LanguageDefinition {
        LanguageDefinition {
            language_id: id.to_string(),
            display_name: id.to_uppercase(),
            url: Some(format!("https://plugins.test/{id}.so")),
            module: format!("{id}_module"),
            evaluator: "run".to_string(),
            keybinding: None,
            code_mirror_mode: None,
        }
    }

    #[test]
    fn test_builtins_include_expr() {
        let registry = LanguageRegistry::with_builtins();
        assert!(registry.contains(crate::host::builtin::EXPR_LANGUAGE));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_register_and_list() {
        let mut registry = LanguageRegistry::new();
        assert!(registry.register(definition("py")).is_none());
        assert!(registry.register(definition("lua")).is_none());

        let ids: Vec<_> = registry
            .definitions()
            .iter()
            .map(|d| d.language_id.as_str())
            .collect();
        assert_eq!(ids, vec!["lua", "py"]);
        assert_eq!(registry.get("py").unwrap().module, "py_module");
    }

    #[test]
    fn test_definition_wire_format() {
        let json = serde_json::to_value(definition("py")).unwrap();
        assert_eq!(json["languageId"], "py");
        assert_eq!(json["displayName"], "PY");
        assert!(json.get("keybinding").is_none());
    }
}
