//! Turn orchestration on the bot side.
//!
//! One user sentence walks through these phases, each recorded in the
//! [`TurnReport`]:
//!
//! ```text
//! KeywordCheck ──(keyword)──────────────────────────────────────────> done
//!      │
//!      v
//! RemoteParse ──(error / no result)── error listeners ─────────────> failed
//!      │
//!      v
//! ListenerDispatch ── EntityEvaluation ── IntentResolution ── StateCommit
//! ```
//!
//! Turns of one dialog are serialized by a per-session lock; different dialogs
//! run concurrently.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::client::{
    EntityEvaluationQuery, EntityToEvaluate, IntentQualifier, MarkAsUnknownQuery, NlpClient, NlpQuery, NlpQueryContext,
    NlpQueryState, NlpResult, wait_availability,
};
use crate::context::now;
use crate::dialog::{ActionRef, Dialog, EntityValue};
use crate::listener::ListenerChain;
use crate::values_merge::CrossTurnMerge;
use crate::{Intent, Locale, Result, without_namespace};

// --- Bot definition ---------------------------------------------------------

#[derive(Debug, Clone)]
enum KeywordMatcher {
    /// Trimmed, lowercased text.
    Exact(String),
    Pattern(Regex),
}

/// Sentences answered by a reserved intent without calling the parser.
#[derive(Debug, Clone, Default)]
pub struct KeywordTable {
    entries: Vec<(KeywordMatcher, String)>,
}

impl KeywordTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(mut self, text: &str, intent: impl Into<String>) -> Self {
        self.entries.push((KeywordMatcher::Exact(text.trim().to_lowercase()), intent.into()));
        self
    }

    pub fn with_pattern(mut self, pattern: &str, intent: impl Into<String>) -> Result<Self> {
        self.entries.push((KeywordMatcher::Pattern(Regex::new(pattern)?), intent.into()));
        Ok(self)
    }

    /// Intent of the first entry matching `text`.
    pub fn find(&self, text: &str) -> Option<&str> {
        let normalized = text.trim().to_lowercase();
        self.entries
            .iter()
            .find(|(matcher, _)| match matcher {
                KeywordMatcher::Exact(keyword) => *keyword == normalized,
                KeywordMatcher::Pattern(regex) => regex.is_match(text),
            })
            .map(|(_, intent)| intent.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct BotDefinition {
    pub namespace: String,
    pub nlp_model_name: String,
    pub intents: Vec<Intent>,
    pub keywords: KeywordTable,
}

impl BotDefinition {
    pub fn new(namespace: impl Into<String>, nlp_model_name: impl Into<String>, intents: Vec<Intent>) -> Self {
        Self { namespace: namespace.into(), nlp_model_name: nlp_model_name.into(), intents, keywords: KeywordTable::new() }
    }

    pub fn with_keywords(mut self, keywords: KeywordTable) -> Self {
        self.keywords = keywords;
        self
    }

    /// Catalog intent by name, with or without namespace.
    pub fn intent(&self, name: &str) -> Option<&Intent> {
        self.intents.iter().find(|i| without_namespace(&i.name) == without_namespace(name))
    }

    /// Catalog intent, or the unknown intent.
    pub fn find_intent(&self, name: &str) -> Intent {
        self.intent(name).cloned().unwrap_or_else(Intent::unknown)
    }
}

// --- Turn input and report --------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    pub locale: Locale,
    pub connector_id: String,
    #[serde(default)]
    pub test: bool,
    #[serde(default)]
    pub bot_disabled: bool,
}

impl UserContext {
    pub fn new(locale: Locale) -> Self {
        Self { locale, connector_id: String::new(), test: false, bot_disabled: false }
    }
}

/// What one parser call produced, kept on the sentence.
#[derive(Debug, Clone, PartialEq)]
pub struct NlpCallStats {
    pub locale: Locale,
    pub intent: Intent,
    pub entity_evaluations: Vec<EntityValue>,
    pub merged_values: Vec<EntityValue>,
    pub query: NlpQuery,
    pub result: NlpResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserSentence {
    pub id: String,
    pub text: String,
    pub player_id: String,
    /// Parse done upstream; only its entities are evaluated again.
    pub precomputed_nlp: Option<NlpResult>,
    pub entity_values: Vec<EntityValue>,
    pub nlp_stats: Option<NlpCallStats>,
}

impl UserSentence {
    pub fn new(id: impl Into<String>, player_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            player_id: player_id.into(),
            precomputed_nlp: None,
            entity_values: Vec::new(),
            nlp_stats: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    KeywordCheck,
    RemoteParse,
    ListenerDispatch,
    EntityEvaluation,
    IntentResolution,
    StateCommit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    Keyword { intent: String },
    Parsed { intent: String, entities: Vec<EntityValue> },
    /// `error` is `None` when the parser answered without a result.
    Failed { error: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TurnReport {
    pub phases: Vec<TurnPhase>,
    pub outcome: TurnOutcome,
}

impl TurnReport {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, TurnOutcome::Failed { .. })
    }
}

// --- Orchestrator -----------------------------------------------------------

pub struct TurnOrchestrator {
    client: Arc<dyn NlpClient>,
    bot: BotDefinition,
    listeners: ListenerChain,
    sessions: DashMap<String, Arc<Mutex<Dialog>>>,
}

impl std::fmt::Debug for TurnOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnOrchestrator")
            .field("bot", &self.bot.namespace)
            .field("listeners", &self.listeners)
            .field("sessions", &self.sessions.len())
            .finish()
    }
}

impl TurnOrchestrator {
    pub fn new(client: Arc<dyn NlpClient>, bot: BotDefinition) -> Self {
        Self { client, bot, listeners: ListenerChain::new(), sessions: DashMap::new() }
    }

    pub fn with_listeners(mut self, listeners: ListenerChain) -> Self {
        self.listeners = listeners;
        self
    }

    pub fn bot(&self) -> &BotDefinition {
        &self.bot
    }

    /// The dialog of `dialog_id`, created on first use.
    pub fn session(&self, dialog_id: &str) -> Arc<Mutex<Dialog>> {
        self.sessions.entry(dialog_id.to_string()).or_insert_with(|| Arc::new(Mutex::new(Dialog::new(dialog_id)))).clone()
    }

    /// Run one turn of `dialog_id`; waits for any turn of the same dialog in progress.
    pub fn parse_sentence(&self, dialog_id: &str, sentence: &mut UserSentence, user: &UserContext) -> TurnReport {
        // The map shard lock is released before the dialog lock is taken.
        let session = self.session(dialog_id);
        let mut dialog = session.lock();
        self.parse_dialog(&mut dialog, sentence, user)
    }

    /// Run one turn on a dialog the caller already holds exclusively.
    pub fn parse_dialog(&self, dialog: &mut Dialog, sentence: &mut UserSentence, user: &UserContext) -> TurnReport {
        debug!(dialog = %dialog.id, sentence = %sentence.id, "parse sentence");
        let mut phases = vec![TurnPhase::KeywordCheck];

        if let Some(name) = self.find_keyword(&sentence.text) {
            let intent = self.bot.intent(&name).cloned().unwrap_or_else(|| Intent::new(name.clone(), Vec::new()));
            dialog.state.current_intent = Some(intent);
            return TurnReport { phases, outcome: TurnOutcome::Keyword { intent: name } };
        }

        phases.push(TurnPhase::RemoteParse);
        let query = self.query(dialog, sentence, user);
        let parsed = match &sentence.precomputed_nlp {
            Some(precomputed) => Ok(Some(self.evaluate_precomputed(&query, precomputed.clone()))),
            None => self.parse(dialog, &query),
        };

        phases.push(TurnPhase::ListenerDispatch);
        let result = match parsed {
            Ok(Some(result)) => {
                self.listeners.notify_success(&query, &result);
                result
            }
            Ok(None) => {
                warn!(dialog = %dialog.id, "no parse result");
                self.listeners.notify_error(&query, None);
                return TurnReport { phases, outcome: TurnOutcome::Failed { error: None } };
            }
            Err(err) => {
                error!(dialog = %dialog.id, error = %err, "parse failed");
                self.listeners.notify_error(&query, Some(&err));
                return TurnReport { phases, outcome: TurnOutcome::Failed { error: Some(err.to_string()) } };
            }
        };

        phases.push(TurnPhase::EntityEvaluation);
        let mut entity_evaluations = self.listeners.evaluate_entities(dialog, &sentence.text, &result);
        let uncovered: Vec<EntityValue> = result
            .entities
            .iter()
            .filter(|e| entity_evaluations.iter().all(|custom| custom.entity != e.entity))
            .map(|e| EntityValue::from_nlp(&result, e))
            .collect();
        entity_evaluations.extend(uncovered);
        sentence.entity_values.extend(entity_evaluations.iter().cloned());

        phases.push(TurnPhase::IntentResolution);
        let intent = self.listeners.find_intent_override(dialog, &result).unwrap_or_else(|| self.bot.find_intent(&result.intent));

        phases.push(TurnPhase::StateCommit);
        dialog.state.current_intent = Some(intent.clone());
        let action = ActionRef::new(sentence.id.clone(), now());
        let merge = CrossTurnMerge::new(
            self.client.as_ref(),
            &self.listeners,
            &self.bot.namespace,
            &self.bot.nlp_model_name,
            &query.context,
        );
        let merged_values = merge.merge_from_action(&mut dialog.state, &action, &sentence.entity_values);

        sentence.nlp_stats = Some(NlpCallStats {
            locale: user.locale.clone(),
            intent: intent.clone(),
            entity_evaluations,
            merged_values: merged_values.clone(),
            query,
            result,
        });

        TurnReport { phases, outcome: TurnOutcome::Parsed { intent: intent.name, entities: merged_values } }
    }

    fn find_keyword(&self, text: &str) -> Option<String> {
        self.bot.keywords.find(text).map(String::from).or_else(|| self.listeners.handle_keyword(text))
    }

    fn query(&self, dialog: &Dialog, sentence: &UserSentence, user: &UserContext) -> NlpQuery {
        let next = dialog.state.next_action_state.as_ref();
        let states = match next {
            Some(next) => next.states.clone(),
            None => dialog.story_intent.iter().cloned().collect(),
        };

        NlpQuery {
            queries: vec![sentence.text.clone()],
            namespace: self.bot.namespace.clone(),
            application_name: self.bot.nlp_model_name.clone(),
            context: NlpQueryContext {
                connector_id: user.connector_id.clone(),
                test: user.test,
                register_query: !user.test && !user.bot_disabled,
                ..NlpQueryContext::new(user.locale.clone(), sentence.player_id.clone(), dialog.id.clone())
                    .with_reference_date(next.and_then(|n| n.reference_date).unwrap_or_else(now))
            },
            state: NlpQueryState { states },
            intents_subset: Vec::new(),
        }
    }

    /// Parse with the dialog's intent qualifiers; an answer outside them is overridden.
    fn parse(&self, dialog: &Dialog, query: &NlpQuery) -> Result<Option<NlpResult>> {
        let qualifiers: &[IntentQualifier] =
            dialog.state.next_action_state.as_ref().map(|n| n.intents_qualifiers.as_slice()).unwrap_or_default();
        if qualifiers.is_empty() {
            return self.client.parse(query);
        }

        let mut qualified = query.clone();
        qualified.intents_subset = qualifiers
            .iter()
            .map(|q| IntentQualifier::new(format!("{}:{}", self.bot.namespace, without_namespace(&q.intent)), q.modifier))
            .collect();

        let Some(mut result) = self.client.parse(&qualified)? else {
            return Ok(None);
        };
        if !qualifiers.iter().any(|q| without_namespace(&q.intent) == without_namespace(&result.intent)) {
            let forced = qualifiers.iter().fold(&qualifiers[0], |best, q| if q.modifier > best.modifier { q } else { best });
            warn!(intent = %result.intent, forced = %forced.intent, "intent not in qualifiers, forcing");
            result.intent = without_namespace(&forced.intent).to_string();
        }
        Ok(Some(result))
    }

    /// Re-evaluate the entities of an upstream parse; values keyed by start offset replace the originals.
    fn evaluate_precomputed(&self, query: &NlpQuery, result: NlpResult) -> NlpResult {
        if result.entities.is_empty() {
            return result;
        }

        let evaluation = EntityEvaluationQuery {
            namespace: query.namespace.clone(),
            application_name: query.application_name.clone(),
            context: query.context.clone(),
            entities_to_evaluate: result.entities.iter().map(EntityToEvaluate::from).collect(),
            text: result.retained_query.clone(),
        };

        match self.client.evaluate_entities(&evaluation) {
            Ok(Some(evaluated)) => {
                let mut entities = evaluated.values;
                let kept: Vec<_> =
                    result.entities.iter().filter(|e| entities.iter().all(|v| v.start != e.start)).cloned().collect();
                entities.extend(kept);
                NlpResult { entities, ..result }
            }
            Ok(None) => result,
            Err(err) => {
                error!(error = %err, "precomputed entities evaluation failed");
                result
            }
        }
    }

    /// Report a sentence the bot could not handle.
    pub fn mark_as_unknown(&self, sentence: &UserSentence, user: &UserContext) -> Result<()> {
        if sentence.text.trim().is_empty() {
            return Ok(());
        }
        self.client.mark_as_unknown(&MarkAsUnknownQuery {
            namespace: self.bot.namespace.clone(),
            application_name: self.bot.nlp_model_name.clone(),
            language: user.locale.clone(),
            text: sentence.text.clone(),
        })
    }

    /// Startup helper; blocks until the parser is healthy or `timeout` elapses.
    pub fn wait_availability(&self, timeout: Duration) -> bool {
        wait_availability(self.client.as_ref(), timeout)
    }
}

#[cfg(test)]
mod tests;
