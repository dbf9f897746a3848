//! Cross-turn merge of slot values.
//!
//! Once per turn, every role that received new values is folded with the value
//! the dialog retained for it:
//!
//! ```text
//! new values ── group by role ── listeners: sort, rewrite ──┐
//!                                                           v
//!                                  eligible = merge support && value present
//!                                                           │
//!           ┌───────────────────────────┬───────────────────┴─────────┐
//!      no retained, < 2            retained, nothing to fold     otherwise
//!           │                           │                             │
//!        default                     default              remote merge strategy
//!                                                        (default when it gives nothing)
//! ```
//!
//! The default is the first new value carrying a value, or the first new value.

use tracing::{debug, error, warn};

use crate::client::{NlpClient, NlpQueryContext, ValueToMerge, ValuesMergeQuery};
use crate::dialog::{ActionRef, DialogState, EntityStateValue, EntityValue};
use crate::listener::{EntityMergeContext, ListenerChain};

pub struct CrossTurnMerge<'a> {
    client: &'a dyn NlpClient,
    listeners: &'a ListenerChain,
    namespace: &'a str,
    application_name: &'a str,
    context: &'a NlpQueryContext,
}

impl<'a> CrossTurnMerge<'a> {
    pub fn new(
        client: &'a dyn NlpClient,
        listeners: &'a ListenerChain,
        namespace: &'a str,
        application_name: &'a str,
        context: &'a NlpQueryContext,
    ) -> Self {
        Self { client, listeners, namespace, application_name, context }
    }

    /// Fold `values` into `state` and return the values stored, in processing order.
    pub fn merge_from_action(&self, state: &mut DialogState, action: &ActionRef, values: &[EntityValue]) -> Vec<EntityValue> {
        let mut by_role: Vec<(String, Vec<EntityValue>)> = Vec::new();
        for value in values {
            match by_role.iter_mut().find(|(role, _)| role == value.role()) {
                Some((_, group)) => group.push(value.clone()),
                None => by_role.push((value.role().to_string(), vec![value.clone()])),
            }
        }

        let contexts = by_role
            .into_iter()
            .map(|(role, new_values)| {
                let retained = state.entity_values.get(&role).cloned();
                EntityMergeContext::new(role, retained, new_values)
            })
            .collect();
        let contexts = self.listeners.sort_roles_to_merge(contexts);

        let mut stored = Vec::with_capacity(contexts.len());
        for context in contexts {
            let context = self.listeners.rewrite_merge_context(state, context);
            let Some(merged) = self.merge_context(&context) else {
                warn!(role = %context.role, "no new value to merge");
                continue;
            };

            debug!(role = %context.role, value = ?merged.value, "slot value merged");
            match state.entity_values.remove(&context.role) {
                Some(mut current) => {
                    current.change_value(Some(merged.clone()), action.clone());
                    state.entity_values.set(context.role.clone(), current);
                }
                None => state.entity_values.set(context.role.clone(), EntityStateValue::new(action.clone(), merged.clone())),
            }
            stored.push(merged);
        }
        stored
    }

    /// Resolved value for one role; `None` only when there is no new value at all.
    pub fn merge_context(&self, context: &EntityMergeContext) -> Option<EntityValue> {
        let default = context.new_values.iter().find(|v| v.value.is_some()).or(context.new_values.first())?.clone();
        let eligible: Vec<&EntityValue> =
            context.new_values.iter().filter(|v| v.merge_support && v.value.is_some()).collect();

        let retained = context.retained.as_ref().and_then(|r| r.value.as_ref());
        match retained {
            None if eligible.len() < 2 => Some(default),
            None => Some(self.delegate(&eligible, None, default)),
            Some(r) if eligible.is_empty() || (eligible.len() == 1 && r.value.is_none()) => Some(default),
            Some(r) => Some(self.delegate(&eligible, Some(r), default)),
        }
    }

    fn delegate(&self, eligible: &[&EntityValue], retained: Option<&EntityValue>, default: EntityValue) -> EntityValue {
        let mut values: Vec<ValueToMerge> = eligible.iter().filter_map(|v| to_merge(v, false)).collect();
        values.extend(retained.and_then(|r| to_merge(r, true)));

        let query = ValuesMergeQuery {
            namespace: self.namespace.to_string(),
            application_name: self.application_name.to_string(),
            context: self.context.clone(),
            entity: default.entity.clone(),
            values,
        };

        match self.client.merge_values(&query) {
            Ok(Some(result)) => match result.value {
                Some(value) => {
                    let mut merged = EntityValue::new(default.entity, Some(value), result.content);
                    merged.merge_support = default.merge_support;
                    merged
                }
                None => default,
            },
            Ok(None) => default,
            Err(err) => {
                error!(entity = %default.entity, error = %err, "values merge failed");
                default
            }
        }
    }
}

fn to_merge(value: &EntityValue, initial: bool) -> Option<ValueToMerge> {
    Some(ValueToMerge {
        value: value.value.clone()?,
        content: value.content.clone(),
        initial,
        position: value.start(),
        probability: value.probability,
    })
}
