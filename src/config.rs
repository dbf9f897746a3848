//! TOML configuration.
//!
//! ```toml
//! providers = ["dictionary", "predefined-values", "english-dates"]
//!
//! [nlp]
//! base_url = "http://localhost:8888/rest/nlp"
//! namespace = "app"
//! model_name = "travel"
//!
//! [[dictionaries]]
//! entity_type = "app:city"
//! values = [{ value = "paris", labels = { en = ["Paris"] } }]
//!
//! [[keywords]]
//! text = "/restart"
//! intent = "restart"
//!
//! [[intents]]
//! name = "app:book_flight"
//! slots = [{ entity_type = "app:city", role = "destination" }]
//! ```
//!
//! The order of `providers` is the registration order, so it also decides which
//! provider serves an entity type two of them support.

use std::env;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::HttpNlpClient;
use crate::context::ApplicationSettings;
use crate::provider::{EntityTypeProvider, ProviderRegistry};
use crate::temporal::{DucklingClient, TemporalProvider};
use crate::turn::{BotDefinition, KeywordTable};
use crate::{
    DictionaryData, DictionaryProvider, Entity, EntityType, Error, Intent, PredefinedValue, PredefinedValuesProvider,
    Result,
};

/// Overrides `[nlp] base_url`.
pub const NLP_URL_ENV: &str = "SLOTFOLD_NLP_URL";
/// Overrides `[duckling] base_url`.
pub const DUCKLING_URL_ENV: &str = "SLOTFOLD_DUCKLING_URL";

const ENGLISH_DATES: &str = "english-dates";

fn default_providers() -> Vec<String> {
    vec![DictionaryProvider::NAME.into(), PredefinedValuesProvider::NAME.into(), ENGLISH_DATES.into()]
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_true() -> bool {
    true
}

fn default_namespace() -> String {
    "app".into()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NlpSettings {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    pub model_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DucklingSettings {
    pub base_url: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// Either `text` (exact, case-insensitive) or `pattern` (regex).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeywordSettings {
    pub text: Option<String>,
    pub pattern: Option<String>,
    pub intent: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSettings {
    pub entity_type: String,
    pub role: String,
    #[serde(default)]
    pub predefined_values: Vec<PredefinedValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentSettings {
    pub name: String,
    #[serde(default)]
    pub slots: Vec<SlotSettings>,
}

impl IntentSettings {
    pub fn to_intent(&self) -> Intent {
        let entities = self
            .slots
            .iter()
            .map(|slot| {
                let entity_type = EntityType::new(slot.entity_type.clone()).with_predefined_values(slot.predefined_values.clone());
                Entity::new(entity_type, slot.role.clone())
            })
            .collect();
        Intent::new(self.name.clone(), entities)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: Vec<String>,
    pub application: ApplicationSettings,
    pub nlp: Option<NlpSettings>,
    pub duckling: Option<DucklingSettings>,
    pub dictionaries: Vec<DictionaryData>,
    pub keywords: Vec<KeywordSettings>,
    pub intents: Vec<IntentSettings>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            providers: default_providers(),
            application: ApplicationSettings::default(),
            nlp: None,
            duckling: None,
            dictionaries: Vec::new(),
            keywords: Vec::new(),
            intents: Vec::new(),
        }
    }
}

impl Config {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        Ok(toml::from_str(source)?)
    }

    /// Read a file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = Self::from_toml_str(&std::fs::read_to_string(path)?)?;
        config.apply_env();
        info!(path = %path.display(), providers = ?config.providers, "configuration loaded");
        Ok(config)
    }

    pub fn apply_env(&mut self) {
        if let (Ok(url), Some(nlp)) = (env::var(NLP_URL_ENV), self.nlp.as_mut()) {
            debug!(%url, "nlp url from environment");
            nlp.base_url = url;
        }
        if let (Ok(url), Some(duckling)) = (env::var(DUCKLING_URL_ENV), self.duckling.as_mut()) {
            debug!(%url, "duckling url from environment");
            duckling.base_url = url;
        }
    }

    pub fn registry(&self) -> Result<ProviderRegistry> {
        ProviderRegistry::from_config(self)
    }

    pub fn intents(&self) -> Vec<Intent> {
        self.intents.iter().map(IntentSettings::to_intent).collect()
    }

    pub fn intent(&self, name: &str) -> Option<Intent> {
        self.intents.iter().find(|i| i.name == name).map(IntentSettings::to_intent)
    }

    pub fn keyword_table(&self) -> Result<KeywordTable> {
        let mut table = KeywordTable::new();
        for keyword in &self.keywords {
            table = match (&keyword.text, &keyword.pattern) {
                (Some(text), None) => table.with_text(text, keyword.intent.clone()),
                (None, Some(pattern)) => table.with_pattern(pattern, keyword.intent.clone())?,
                _ => {
                    return Err(Error::InvalidInput(format!(
                        "keyword for '{}' needs exactly one of text or pattern",
                        keyword.intent
                    )));
                }
            };
        }
        Ok(table)
    }

    pub fn bot_definition(&self) -> Result<BotDefinition> {
        let (namespace, model_name) = match &self.nlp {
            Some(nlp) => (nlp.namespace.clone(), nlp.model_name.clone()),
            None => (self.application.namespace.clone(), self.application.name.clone()),
        };
        Ok(BotDefinition::new(namespace, model_name, self.intents()).with_keywords(self.keyword_table()?))
    }

    /// Remote parser client, when `[nlp]` is configured.
    pub fn nlp_client(&self) -> Result<Option<HttpNlpClient>> {
        self.nlp
            .as_ref()
            .map(|nlp| HttpNlpClient::new(nlp.base_url.clone(), Duration::from_millis(nlp.timeout_ms)))
            .transpose()
    }

    fn provider(&self, name: &str) -> Result<Arc<dyn EntityTypeProvider>> {
        match name {
            DictionaryProvider::NAME => Ok(Arc::new(DictionaryProvider::new(self.dictionaries.clone())?)),
            PredefinedValuesProvider::NAME => Ok(Arc::new(PredefinedValuesProvider)),
            ENGLISH_DATES => Ok(Arc::new(TemporalProvider::english())),
            TemporalProvider::NAME => match &self.duckling {
                Some(duckling) if duckling.enabled => {
                    let client = DucklingClient::new(duckling.base_url.clone(), Duration::from_millis(duckling.timeout_ms))?;
                    Ok(Arc::new(TemporalProvider::new(Arc::new(client))))
                }
                _ => Err(Error::provider(TemporalProvider::NAME, "listed but [duckling] is missing or disabled")),
            },
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

impl ProviderRegistry {
    /// Providers listed in `config.providers`, registered in that order.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut registry = ProviderRegistry::new();
        for name in &config.providers {
            registry.register(config.provider(name)?);
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::Locale;
    use crate::provider::Capabilities;

    const SAMPLE: &str = r#"
providers = ["predefined-values", "dictionary"]

[application]
namespace = "app"
name = "travel"
normalize_text = true

[nlp]
base_url = "http://localhost:8888/"
model_name = "travel"

[[dictionaries]]
entity_type = "app:city"
values = [{ value = "paris", labels = { en = ["Paris"], fr = ["Paris", "Lutèce"] } }]

[[keywords]]
text = "/restart"
intent = "restart"

[[keywords]]
pattern = "^/help"
intent = "help"

[[intents]]
name = "app:book_flight"
slots = [
  { entity_type = "app:city", role = "origin" },
  { entity_type = "app:city", role = "destination" },
  { entity_type = "app:size", role = "seat", predefined_values = [{ value = "window", labels = { en = ["window"] } }] },
]
"#;

    #[test]
    fn parses_every_section() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.providers, vec!["predefined-values", "dictionary"]);
        assert!(config.application.normalize_text);
        let nlp = config.nlp.as_ref().unwrap();
        assert_eq!(nlp.namespace, "app");
        assert_eq!(nlp.timeout_ms, 5_000);
        assert_eq!(config.dictionaries[0].values[0].synonyms(&Locale::new("fr")), vec!["Paris", "Lutèce"]);

        let intent = config.intent("app:book_flight").unwrap();
        let roles: Vec<&str> = intent.entities.iter().map(|e| e.role.as_str()).collect();
        assert_eq!(roles, vec!["origin", "destination", "seat"]);
        assert_eq!(intent.entities[2].entity_type.predefined_values.len(), 1);
    }

    #[test]
    fn defaults_when_empty() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.registry().unwrap().providers().len(), 3);
    }

    #[test]
    fn registry_follows_listed_order() {
        let config = Config::from_toml_str(SAMPLE).unwrap();
        let registry = config.registry().unwrap();
        let names: Vec<&str> = registry.providers().iter().map(|p| p.name()).collect();
        assert_eq!(names, vec!["predefined-values", "dictionary"]);
        assert_eq!(registry.provider_name(&EntityType::new("app:city"), Capabilities::CLASSIFY), Some("dictionary"));
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let config = Config::from_toml_str(r#"providers = ["crystal-ball"]"#).unwrap();
        assert!(matches!(config.registry(), Err(Error::UnknownProvider(name)) if name == "crystal-ball"));
    }

    #[test]
    fn duckling_needs_its_section() {
        let config = Config::from_toml_str(r#"providers = ["duckling"]"#).unwrap();
        assert!(matches!(config.registry(), Err(Error::Provider { .. })));

        let config = Config::from_toml_str(
            r#"
providers = ["duckling"]
[duckling]
base_url = "http://localhost:8000"
"#,
        )
        .unwrap();
        assert!(config.registry().unwrap().supports_merge(&EntityType::new("duckling:datetime")));
    }

    #[test]
    fn keywords_and_bot_definition() {
        let bot = Config::from_toml_str(SAMPLE).unwrap().bot_definition().unwrap();
        assert_eq!(bot.nlp_model_name, "travel");
        assert_eq!(bot.keywords.find("/Restart"), Some("restart"));
        assert_eq!(bot.keywords.find("/help please"), Some("help"));
        assert_eq!(bot.intent("book_flight").map(|i| i.name.as_str()), Some("app:book_flight"));
    }

    #[test]
    fn keyword_needs_text_or_pattern() {
        let config = Config::from_toml_str(
            r#"
[[keywords]]
intent = "restart"
"#,
        )
        .unwrap();
        assert!(matches!(config.keyword_table(), Err(Error::InvalidInput(_))));
    }

    #[test]
    fn bad_toml_is_a_config_error() {
        assert!(matches!(Config::from_toml_str("providers = 3"), Err(Error::Config(_))));
    }
}
