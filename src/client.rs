//! Remote NLU service: wire model and clients.
//!
//! The bot side talks to the NLU side through [`NlpClient`]. [`HttpNlpClient`]
//! is the blocking HTTP implementation; [`crate::nlp_core::NlpCore`] implements
//! the same trait in process.
//!
//! Every payload is JSON with camelCase field names.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::context::now;
use crate::{Entity, Error, Locale, Result, Value, ValueDescriptor};

// --- Parse ------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NlpQuery {
    pub queries: Vec<String>,
    pub namespace: String,
    pub application_name: String,
    pub context: NlpQueryContext,
    #[serde(default)]
    pub state: NlpQueryState,
    /// Restricts the intents the service may answer.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub intents_subset: Vec<IntentQualifier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NlpQueryContext {
    pub locale: Locale,
    pub session_id: String,
    pub dialog_id: String,
    pub connector_id: String,
    pub reference_date: DateTime<FixedOffset>,
    pub reference_timezone: String,
    #[serde(default)]
    pub test: bool,
    #[serde(default = "default_true")]
    pub register_query: bool,
}

fn default_true() -> bool {
    true
}

impl NlpQueryContext {
    pub fn new(locale: Locale, session_id: impl Into<String>, dialog_id: impl Into<String>) -> Self {
        let reference_date = now();
        Self {
            locale,
            session_id: session_id.into(),
            dialog_id: dialog_id.into(),
            connector_id: String::new(),
            reference_timezone: reference_date.offset().to_string(),
            reference_date,
            test: false,
            register_query: true,
        }
    }

    /// Reference date, with the timezone sent alongside it.
    pub fn with_reference_date(mut self, reference_date: DateTime<FixedOffset>) -> Self {
        self.reference_timezone = reference_date.offset().to_string();
        self.reference_date = reference_date;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NlpQueryState {
    pub states: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentQualifier {
    pub intent: String,
    pub modifier: f64,
}

impl IntentQualifier {
    pub fn new(intent: impl Into<String>, modifier: f64) -> Self {
        Self { intent: intent.into(), modifier }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NlpEntityValue {
    pub start: usize,
    pub end: usize,
    pub entity: Entity,
    pub value: Option<Value>,
    #[serde(default)]
    pub evaluated: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_entities: Vec<NlpEntityValue>,
    #[serde(default = "full_probability")]
    pub probability: f64,
    #[serde(default)]
    pub merge_support: bool,
}

fn full_probability() -> f64 {
    1.0
}

impl NlpEntityValue {
    pub fn new(start: usize, end: usize, entity: Entity) -> Self {
        Self {
            start,
            end,
            entity,
            value: None,
            evaluated: false,
            sub_entities: Vec::new(),
            probability: 1.0,
            merge_support: false,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self.evaluated = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NlpResult {
    pub intent: String,
    #[serde(default)]
    pub intent_namespace: String,
    #[serde(default)]
    pub language: Locale,
    #[serde(default)]
    pub entities: Vec<NlpEntityValue>,
    #[serde(default)]
    pub not_retained_entities: Vec<NlpEntityValue>,
    pub intent_probability: f64,
    pub entities_probability: f64,
    /// Text actually parsed, after normalization and truncation.
    #[serde(default)]
    pub retained_query: String,
    #[serde(default)]
    pub other_intents_probabilities: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub static_response: Option<String>,
}

// --- Entity evaluation ------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityToEvaluate {
    pub start: usize,
    pub end: usize,
    pub entity: Entity,
    #[serde(default)]
    pub sub_entities: Vec<EntityToEvaluate>,
}

impl From<&NlpEntityValue> for EntityToEvaluate {
    fn from(value: &NlpEntityValue) -> Self {
        Self {
            start: value.start,
            end: value.end,
            entity: value.entity.clone(),
            sub_entities: value.sub_entities.iter().map(EntityToEvaluate::from).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEvaluationQuery {
    pub namespace: String,
    pub application_name: String,
    pub context: NlpQueryContext,
    pub entities_to_evaluate: Vec<EntityToEvaluate>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityEvaluationResult {
    pub values: Vec<NlpEntityValue>,
}

// --- Values merge -----------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueToMerge {
    pub value: Value,
    pub content: Option<String>,
    /// Carried over from an earlier turn.
    #[serde(default)]
    pub initial: bool,
    pub position: Option<usize>,
    #[serde(default = "full_probability")]
    pub probability: f64,
}

impl From<ValueToMerge> for ValueDescriptor {
    fn from(v: ValueToMerge) -> Self {
        ValueDescriptor { value: v.value, content: v.content, retained: v.initial, position: v.position, probability: v.probability }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesMergeQuery {
    pub namespace: String,
    pub application_name: String,
    pub context: NlpQueryContext,
    pub entity: Entity,
    pub values: Vec<ValueToMerge>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValuesMergeResult {
    pub value: Option<Value>,
    pub content: Option<String>,
}

// --- Unknown sentences ------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsUnknownQuery {
    pub namespace: String,
    pub application_name: String,
    pub language: Locale,
    pub text: String,
}

// --- Clients ----------------------------------------------------------------

/// NLU service as seen by the bot.
///
/// `Ok(None)` means the service answered without a result.
pub trait NlpClient: Send + Sync {
    fn parse(&self, query: &NlpQuery) -> Result<Option<NlpResult>>;

    fn evaluate_entities(&self, query: &EntityEvaluationQuery) -> Result<Option<EntityEvaluationResult>>;

    fn merge_values(&self, query: &ValuesMergeQuery) -> Result<Option<ValuesMergeResult>>;

    fn mark_as_unknown(&self, query: &MarkAsUnknownQuery) -> Result<()>;

    fn healthcheck(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct HttpNlpClient {
    base_url: String,
    http: reqwest::blocking::Client,
}

impl HttpNlpClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::blocking::Client::builder().timeout(timeout).build()?;
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self { base_url, http })
    }

    fn post<Q: Serialize, R: DeserializeOwned>(&self, path: &str, body: &Q) -> Result<Option<R>> {
        let url = format!("{}/{path}", self.base_url);
        let response = self.http.post(&url).json(body).send().map_err(|err| Error::from_transport(err, &url))?;

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            debug!(url = %url, "no content");
            return Ok(None);
        }
        if !status.is_success() {
            return Err(Error::Status { status: status.as_u16(), url });
        }
        Ok(Some(response.json()?))
    }
}

impl NlpClient for HttpNlpClient {
    fn parse(&self, query: &NlpQuery) -> Result<Option<NlpResult>> {
        self.post("parse", query)
    }

    fn evaluate_entities(&self, query: &EntityEvaluationQuery) -> Result<Option<EntityEvaluationResult>> {
        self.post("evaluate", query)
    }

    fn merge_values(&self, query: &ValuesMergeQuery) -> Result<Option<ValuesMergeResult>> {
        self.post("merge", query)
    }

    fn mark_as_unknown(&self, query: &MarkAsUnknownQuery) -> Result<()> {
        let url = format!("{}/unknown", self.base_url);
        let response = self.http.post(&url).json(query).send().map_err(|err| Error::from_transport(err, &url))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Status { status: status.as_u16(), url });
        }
        Ok(())
    }

    fn healthcheck(&self) -> bool {
        let url = format!("{}/healthcheck", self.base_url);
        match self.http.get(&url).send() {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!(url = %url, error = %err, "nlp healthcheck failed");
                false
            }
        }
    }
}

/// Delay between two healthcheck attempts.
pub const AVAILABILITY_POLL: Duration = Duration::from_secs(1);

/// Block until the service answers its healthcheck, or `timeout` elapses.
pub fn wait_availability(client: &dyn NlpClient, timeout: Duration) -> bool {
    let started = Instant::now();
    loop {
        if client.healthcheck() {
            info!(elapsed = ?started.elapsed(), "nlp service available");
            return true;
        }
        let elapsed = started.elapsed();
        if elapsed >= timeout {
            warn!(?timeout, "nlp service still unavailable");
            return false;
        }
        thread::sleep(AVAILABILITY_POLL.min(timeout - elapsed));
    }
}
