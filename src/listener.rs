//! Listener extension points around a turn.
//!
//! Listeners are consulted in registration order. A listener that fails is
//! logged and skipped; it never stops the others from running.

use std::sync::Arc;

use tracing::{debug, error};

use crate::client::{NlpQuery, NlpResult};
use crate::dialog::{Dialog, DialogState, EntityStateValue, EntityValue};
use crate::{Error, Intent, Result};

/// Input of the cross-turn merge for one role.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityMergeContext {
    pub role: String,
    pub retained: Option<EntityStateValue>,
    pub new_values: Vec<EntityValue>,
}

impl EntityMergeContext {
    pub fn new(role: impl Into<String>, retained: Option<EntityStateValue>, new_values: Vec<EntityValue>) -> Self {
        Self { role: role.into(), retained, new_values }
    }
}

/// Hooks a bot can register around NLU calls. Every method has a no-op default.
pub trait NlpListener: Send + Sync {
    fn on_success(&self, _query: &NlpQuery, _result: &NlpResult) -> Result<()> {
        Ok(())
    }

    /// `error` is `None` when the service answered without a result.
    fn on_error(&self, _query: &NlpQuery, _error: Option<&Error>) -> Result<()> {
        Ok(())
    }

    /// Intent name for a keyword sentence.
    fn handle_keyword(&self, _text: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Bot-side evaluation of the parsed entities.
    fn evaluate_entities(&self, _dialog: &Dialog, _text: &str, _result: &NlpResult) -> Result<Vec<EntityValue>> {
        Ok(Vec::new())
    }

    fn find_intent_override(&self, _dialog: &Dialog, _result: &NlpResult) -> Result<Option<Intent>> {
        Ok(None)
    }

    fn sort_roles_to_merge(&self, contexts: &[EntityMergeContext]) -> Result<Vec<EntityMergeContext>> {
        Ok(contexts.to_vec())
    }

    fn rewrite_merge_context(&self, _state: &DialogState, context: &EntityMergeContext) -> Result<EntityMergeContext> {
        Ok(context.clone())
    }
}

#[derive(Default, Clone)]
pub struct ListenerChain {
    listeners: Vec<Arc<dyn NlpListener>>,
}

impl std::fmt::Debug for ListenerChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerChain").field("listeners", &self.listeners.len()).finish()
    }
}

fn logged<T>(hook: &str, result: Result<T>) -> Option<T> {
    result.map_err(|err| error!(hook, error = %err, "nlp listener failed")).ok()
}

impl ListenerChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, listener: Arc<dyn NlpListener>) {
        self.listeners.push(listener);
    }

    pub fn with(mut self, listener: Arc<dyn NlpListener>) -> Self {
        self.register(listener);
        self
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    pub fn notify_success(&self, query: &NlpQuery, result: &NlpResult) {
        for listener in &self.listeners {
            logged("on_success", listener.on_success(query, result));
        }
    }

    pub fn notify_error(&self, query: &NlpQuery, err: Option<&Error>) {
        for listener in &self.listeners {
            logged("on_error", listener.on_error(query, err));
        }
    }

    /// First listener recognizing the keyword wins.
    pub fn handle_keyword(&self, text: &str) -> Option<String> {
        self.listeners.iter().find_map(|l| logged("handle_keyword", l.handle_keyword(text)).flatten())
    }

    /// Values from every listener; an entity already valued by an earlier listener keeps that value.
    pub fn evaluate_entities(&self, dialog: &Dialog, text: &str, result: &NlpResult) -> Vec<EntityValue> {
        let mut values: Vec<EntityValue> = Vec::new();
        for listener in &self.listeners {
            let Some(found) = logged("evaluate_entities", listener.evaluate_entities(dialog, text, result)) else {
                continue;
            };
            let covered: Vec<_> = values.iter().map(|v| v.entity.clone()).collect();
            let fresh: Vec<_> = found.into_iter().filter(|v| !covered.contains(&v.entity)).collect();
            if !fresh.is_empty() {
                debug!(count = fresh.len(), "custom entity values");
            }
            values.extend(fresh);
        }
        values
    }

    /// First non-null override wins.
    pub fn find_intent_override(&self, dialog: &Dialog, result: &NlpResult) -> Option<Intent> {
        self.listeners
            .iter()
            .find_map(|l| logged("find_intent_override", l.find_intent_override(dialog, result)).flatten())
    }

    pub fn sort_roles_to_merge(&self, contexts: Vec<EntityMergeContext>) -> Vec<EntityMergeContext> {
        self.listeners
            .iter()
            .fold(contexts, |acc, l| logged("sort_roles_to_merge", l.sort_roles_to_merge(&acc)).unwrap_or(acc))
    }

    pub fn rewrite_merge_context(&self, state: &DialogState, context: EntityMergeContext) -> EntityMergeContext {
        self.listeners.iter().fold(context, |acc, l| {
            logged("rewrite_merge_context", l.rewrite_merge_context(state, &acc)).unwrap_or(acc)
        })
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use super::*;
    use crate::{Entity, EntityType, Value};

    fn value(role: &str, v: &str) -> EntityValue {
        EntityValue::new(Entity::new(EntityType::new("app:city"), role), Some(Value::custom(v)), Some(v.into()))
    }

    struct Broken;

    impl NlpListener for Broken {
        fn handle_keyword(&self, _text: &str) -> Result<Option<String>> {
            Err(Error::InvalidInput("broken".into()))
        }

        fn on_error(&self, _query: &NlpQuery, _error: Option<&Error>) -> Result<()> {
            Err(Error::InvalidInput("broken".into()))
        }

        fn sort_roles_to_merge(&self, _contexts: &[EntityMergeContext]) -> Result<Vec<EntityMergeContext>> {
            Err(Error::InvalidInput("broken".into()))
        }
    }

    #[derive(Default)]
    struct Recording {
        keyword: Option<&'static str>,
        values: Vec<EntityValue>,
        errors: Mutex<usize>,
    }

    impl NlpListener for Recording {
        fn on_error(&self, _query: &NlpQuery, _error: Option<&Error>) -> Result<()> {
            *self.errors.lock() += 1;
            Ok(())
        }

        fn handle_keyword(&self, _text: &str) -> Result<Option<String>> {
            Ok(self.keyword.map(String::from))
        }

        fn evaluate_entities(&self, _dialog: &Dialog, _text: &str, _result: &NlpResult) -> Result<Vec<EntityValue>> {
            Ok(self.values.clone())
        }

        fn sort_roles_to_merge(&self, contexts: &[EntityMergeContext]) -> Result<Vec<EntityMergeContext>> {
            Ok(contexts.iter().rev().cloned().collect())
        }
    }

    fn query() -> NlpQuery {
        NlpQuery {
            queries: vec!["hello".into()],
            namespace: "app".into(),
            application_name: "app".into(),
            context: crate::client::NlpQueryContext::new(crate::Locale::default(), "u", "d"),
            state: Default::default(),
            intents_subset: Vec::new(),
        }
    }

    #[test]
    fn failing_listener_does_not_block_the_next_one() {
        let recording = Arc::new(Recording { keyword: Some("help"), ..Recording::default() });
        let chain = ListenerChain::new().with(Arc::new(Broken)).with(recording.clone());

        assert_eq!(chain.handle_keyword("/help"), Some("help".to_string()));
        chain.notify_error(&query(), None);
        assert_eq!(*recording.errors.lock(), 1);
    }

    #[test]
    fn first_listener_keeps_its_entity_values() {
        let first = Recording { values: vec![value("to", "nice")], ..Recording::default() };
        let second = Recording { values: vec![value("to", "lyon"), value("from", "paris")], ..Recording::default() };
        let chain = ListenerChain::new().with(Arc::new(first)).with(Arc::new(second));

        let values = chain.evaluate_entities(&Dialog::new("d"), "", &NlpResult::default());

        assert_eq!(values, vec![value("to", "nice"), value("from", "paris")]);
    }

    #[test]
    fn sort_folds_over_listeners_and_skips_failures() {
        let contexts = vec![
            EntityMergeContext::new("a", None, vec![value("a", "x")]),
            EntityMergeContext::new("b", None, vec![value("b", "y")]),
        ];
        let chain = ListenerChain::new().with(Arc::new(Broken)).with(Arc::new(Recording::default()));

        let sorted = chain.sort_roles_to_merge(contexts);

        let roles: Vec<_> = sorted.iter().map(|c| c.role.as_str()).collect();
        assert_eq!(roles, vec!["b", "a"]);
    }

    #[test]
    fn empty_chain_is_identity() {
        let chain = ListenerChain::new();
        let ctx = EntityMergeContext::new("a", None, vec![value("a", "x")]);
        assert_eq!(chain.rewrite_merge_context(&DialogState::default(), ctx.clone()), ctx);
        assert_eq!(chain.handle_keyword("anything"), None);
    }
}
