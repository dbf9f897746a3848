use std::collections::VecDeque;
use std::thread;

use chrono::{DateTime, FixedOffset};
use pretty_assertions::assert_eq;

use super::*;
use crate::client::{
    EntityEvaluationResult, NlpEntityValue, ValuesMergeQuery, ValuesMergeResult,
};
use crate::dialog::NextUserActionState;
use crate::listener::NlpListener;
use crate::nlp_core::{FixedIntentClassifier, NlpCore};
use crate::provider::ProviderRegistry;
use crate::temporal::DateEntityGrain;
use crate::{DictionaryData, DictionaryProvider, Entity, EntityType, Error, PredefinedValue, Value};

fn at(s: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(s).unwrap()
}

fn destination() -> Entity {
    Entity::new(EntityType::new("app:city"), "destination")
}

fn when() -> Entity {
    Entity::new(EntityType::new("duckling:datetime"), "when")
}

fn bot() -> BotDefinition {
    let keywords = KeywordTable::new().with_text("/restart", "restart").with_pattern(r"^/help\b", "help").unwrap();
    BotDefinition::new(
        "app",
        "travel",
        vec![
            Intent::new("app:book_flight", vec![destination(), when()]),
            Intent::new("app:greet", Vec::new()),
            Intent::new("app:cancel", Vec::new()),
        ],
    )
    .with_keywords(keywords)
}

fn user() -> UserContext {
    UserContext::new(Locale::new("en"))
}

fn parsed(intent: &str, text: &str, entities: Vec<NlpEntityValue>) -> NlpResult {
    NlpResult {
        intent: intent.into(),
        intent_namespace: "app".into(),
        language: Locale::new("en"),
        entities,
        intent_probability: 1.0,
        entities_probability: 1.0,
        retained_query: text.into(),
        ..NlpResult::default()
    }
}

enum Answer {
    Parsed(NlpResult),
    Nothing,
    Fail,
}

/// Parser answering from a script, then repeating `fallback`.
#[derive(Default)]
struct Scripted {
    answers: Mutex<VecDeque<Answer>>,
    fallback: Option<NlpResult>,
    queries: Mutex<Vec<NlpQuery>>,
    evaluated: Option<Vec<NlpEntityValue>>,
    evaluations: Mutex<usize>,
    merged: Option<Value>,
    merges: Mutex<Vec<ValuesMergeQuery>>,
    unknown: Mutex<Vec<MarkAsUnknownQuery>>,
}

impl Scripted {
    fn answering(answers: Vec<Answer>) -> Self {
        Self { answers: Mutex::new(answers.into()), ..Self::default() }
    }
}

impl NlpClient for Scripted {
    fn parse(&self, query: &NlpQuery) -> Result<Option<NlpResult>> {
        self.queries.lock().push(query.clone());
        match self.answers.lock().pop_front() {
            Some(Answer::Parsed(result)) => Ok(Some(result)),
            Some(Answer::Nothing) => Ok(None),
            Some(Answer::Fail) => Err(Error::Timeout("http://nlp/parse".into())),
            None => Ok(self.fallback.clone()),
        }
    }

    fn evaluate_entities(&self, _query: &EntityEvaluationQuery) -> Result<Option<EntityEvaluationResult>> {
        *self.evaluations.lock() += 1;
        Ok(self.evaluated.clone().map(|values| EntityEvaluationResult { values }))
    }

    fn merge_values(&self, query: &ValuesMergeQuery) -> Result<Option<ValuesMergeResult>> {
        self.merges.lock().push(query.clone());
        Ok(Some(ValuesMergeResult { value: self.merged.clone(), content: None }))
    }

    fn mark_as_unknown(&self, query: &MarkAsUnknownQuery) -> Result<()> {
        self.unknown.lock().push(query.clone());
        Ok(())
    }

    fn healthcheck(&self) -> bool {
        true
    }
}

#[derive(Default)]
struct Recording {
    successes: Mutex<usize>,
    errors: Mutex<Vec<Option<String>>>,
    custom: Vec<EntityValue>,
    intent: Option<Intent>,
}

impl NlpListener for Recording {
    fn on_success(&self, _query: &NlpQuery, _result: &NlpResult) -> Result<()> {
        *self.successes.lock() += 1;
        Ok(())
    }

    fn on_error(&self, _query: &NlpQuery, error: Option<&Error>) -> Result<()> {
        self.errors.lock().push(error.map(|e| e.to_string()));
        Ok(())
    }

    fn evaluate_entities(&self, _dialog: &Dialog, _text: &str, _result: &NlpResult) -> Result<Vec<EntityValue>> {
        Ok(self.custom.clone())
    }

    fn find_intent_override(&self, _dialog: &Dialog, _result: &NlpResult) -> Result<Option<Intent>> {
        Ok(self.intent.clone())
    }
}

fn orchestrator(client: Arc<Scripted>) -> TurnOrchestrator {
    TurnOrchestrator::new(client, bot())
}

fn current_intent(orchestrator: &TurnOrchestrator, dialog: &str) -> Option<String> {
    orchestrator.session(dialog).lock().state.current_intent.as_ref().map(|i| i.name.clone())
}

#[test]
fn keywords_skip_the_parser() {
    let client = Arc::new(Scripted::default());
    let orchestrator = orchestrator(client.clone());

    let report = orchestrator.parse_sentence("d", &mut UserSentence::new("s1", "u", " /RESTART "), &user());
    assert_eq!(report, TurnReport { phases: vec![TurnPhase::KeywordCheck], outcome: TurnOutcome::Keyword { intent: "restart".into() } });
    assert_eq!(current_intent(&orchestrator, "d").as_deref(), Some("restart"));

    let report = orchestrator.parse_sentence("d", &mut UserSentence::new("s2", "u", "/help me"), &user());
    assert_eq!(report.outcome, TurnOutcome::Keyword { intent: "help".into() });
    assert!(client.queries.lock().is_empty());
}

#[test]
fn flight_to_paris_fills_the_destination() {
    let en = Locale::new("en");
    let cities = DictionaryData::new("app:city", vec![PredefinedValue::new("Paris").with_labels(en, &["Paris"])]);
    let registry = ProviderRegistry::new().with(Arc::new(DictionaryProvider::new(vec![cities]).unwrap()));
    let model = Intent::new("app:book_flight", vec![destination()]);
    let core = NlpCore::new(Arc::new(registry), Arc::new(FixedIntentClassifier::new(model)));
    let orchestrator = TurnOrchestrator::new(Arc::new(core), bot());

    let mut sentence = UserSentence::new("s1", "u", "I want a flight to Paris");
    let report = orchestrator.parse_sentence("d", &mut sentence, &user());

    assert_eq!(
        report.phases,
        vec![
            TurnPhase::KeywordCheck,
            TurnPhase::RemoteParse,
            TurnPhase::ListenerDispatch,
            TurnPhase::EntityEvaluation,
            TurnPhase::IntentResolution,
            TurnPhase::StateCommit,
        ]
    );
    let TurnOutcome::Parsed { intent, entities } = report.outcome else { panic!("expected a parsed turn") };
    assert_eq!(intent, "app:book_flight");
    assert_eq!(entities[0].content.as_deref(), Some("Paris"));

    let session = orchestrator.session("d");
    let dialog = session.lock();
    assert_eq!(dialog.state.entity_values.value("destination"), Some(&Value::custom("Paris")));
    assert_eq!(dialog.state.entity_values.get("destination").and_then(|s| s.last_update.as_ref()).map(|a| a.id.as_str()), Some("s1"));
    assert!(sentence.nlp_stats.is_some());
}

#[test]
fn parser_failure_notifies_error_listeners() {
    let client = Arc::new(Scripted::answering(vec![Answer::Fail, Answer::Nothing]));
    let listener = Arc::new(Recording::default());
    let orchestrator = orchestrator(client).with_listeners(ListenerChain::new().with(listener.clone()));

    let failed = orchestrator.parse_sentence("d", &mut UserSentence::new("s1", "u", "hello"), &user());
    let empty = orchestrator.parse_sentence("d", &mut UserSentence::new("s2", "u", "hello"), &user());

    assert!(failed.is_failed());
    assert_eq!(failed.phases.last(), Some(&TurnPhase::ListenerDispatch));
    assert_eq!(empty.outcome, TurnOutcome::Failed { error: None });
    let errors = listener.errors.lock();
    assert_eq!(errors.len(), 2);
    assert!(errors[0].as_deref().is_some_and(|e| e.contains("timed out")));
    assert_eq!(errors[1], None);
    assert_eq!(*listener.successes.lock(), 0);
    assert_eq!(current_intent(&orchestrator, "d"), None);
}

#[test]
fn unknown_intent_names_resolve_to_unknown() {
    let client = Arc::new(Scripted::answering(vec![Answer::Parsed(parsed("weather", "rain?", Vec::new()))]));
    let orchestrator = orchestrator(client);
    orchestrator.parse_sentence("d", &mut UserSentence::new("s1", "u", "rain?"), &user());
    assert_eq!(current_intent(&orchestrator, "d").as_deref(), Some(Intent::UNKNOWN));
}

#[test]
fn qualifiers_force_the_strongest_intent() {
    let client = Arc::new(Scripted::answering(vec![Answer::Parsed(parsed("weather", "rain?", Vec::new()))]));
    let orchestrator = orchestrator(client.clone());
    orchestrator.session("d").lock().state.next_action_state = Some(NextUserActionState {
        intents_qualifiers: vec![
            IntentQualifier::new("book_flight", 0.5),
            IntentQualifier::new("cancel", 0.9),
            IntentQualifier::new("greet", 0.9),
        ],
        ..NextUserActionState::default()
    });

    orchestrator.parse_sentence("d", &mut UserSentence::new("s1", "u", "rain?"), &user());

    assert_eq!(current_intent(&orchestrator, "d").as_deref(), Some("app:cancel"));
    let subset: Vec<String> = client.queries.lock()[0].intents_subset.iter().map(|q| q.intent.clone()).collect();
    assert_eq!(subset, vec!["app:book_flight", "app:cancel", "app:greet"]);
}

#[test]
fn query_context_follows_the_dialog() {
    let client = Arc::new(Scripted::default());
    let orchestrator = orchestrator(client.clone());
    let reference = at("2013-03-01T10:00:00+01:00");
    {
        let session = orchestrator.session("d");
        let mut dialog = session.lock();
        dialog.story_intent = Some("book_flight".into());
    }
    orchestrator.parse_sentence("d", &mut UserSentence::new("s1", "u", "hi"), &UserContext { test: true, ..user() });
    orchestrator.session("d").lock().state.next_action_state =
        Some(NextUserActionState { reference_date: Some(reference), ..NextUserActionState::default() });
    orchestrator.parse_sentence("d", &mut UserSentence::new("s2", "u", "hi"), &user());

    let queries = client.queries.lock();
    assert_eq!(queries[0].state.states.iter().collect::<Vec<_>>(), vec!["book_flight"]);
    assert!(!queries[0].context.register_query);
    assert_eq!(queries[0].context.dialog_id, "d");
    assert_eq!(queries[0].context.session_id, "u");
    assert!(queries[1].state.states.is_empty());
    assert_eq!(queries[1].context.reference_date, reference);
    assert_eq!(queries[1].context.reference_timezone, "+01:00");
    assert!(queries[1].context.register_query);
}

#[test]
fn dates_of_a_role_merge_across_turns() {
    let monday = Value::date(at("2013-02-18T00:00:00-02:00"), DateEntityGrain::Day);
    let monday_at_ten = Value::date(at("2013-02-18T10:00:00-02:00"), DateEntityGrain::Hour);
    let mut first = NlpEntityValue::new(10, 16, when()).with_value(monday.clone());
    first.merge_support = true;
    let mut second = NlpEntityValue::new(0, 5, when()).with_value(Value::date(at("2013-02-12T10:00:00-02:00"), DateEntityGrain::Hour));
    second.merge_support = true;
    let client = Arc::new(Scripted {
        merged: Some(monday_at_ten.clone()),
        ..Scripted::answering(vec![
            Answer::Parsed(parsed("book_flight", "leave on monday", vec![first])),
            Answer::Parsed(parsed("book_flight", "at 10", vec![second])),
        ])
    });
    let orchestrator = orchestrator(client.clone());

    orchestrator.parse_sentence("d", &mut UserSentence::new("s1", "u", "leave on monday"), &user());
    assert!(client.merges.lock().is_empty());
    orchestrator.parse_sentence("d", &mut UserSentence::new("s2", "u", "at 10"), &user());

    let merges = client.merges.lock();
    assert_eq!(merges.len(), 1);
    let initial: Vec<bool> = merges[0].values.iter().map(|v| v.initial).collect();
    assert_eq!(initial, vec![false, true]);
    assert_eq!(merges[0].values[1].value, monday);

    let session = orchestrator.session("d");
    let dialog = session.lock();
    let state = dialog.state.entity_values.get("when").unwrap();
    assert_eq!(state.typed_value(), Some(&monday_at_ten));
    assert_eq!(state.history.len(), 1);
    assert_eq!(dialog.state.entity_values.len(), 1);
}

#[test]
fn precomputed_entities_are_evaluated_again() {
    let raw = vec![NlpEntityValue::new(7, 11, destination()), NlpEntityValue::new(12, 20, when())];
    let client = Arc::new(Scripted {
        evaluated: Some(vec![NlpEntityValue::new(7, 11, destination()).with_value(Value::custom("nice"))]),
        ..Scripted::default()
    });
    let orchestrator = orchestrator(client.clone());
    let mut sentence = UserSentence::new("s1", "u", "fly to Nice tomorrow");
    sentence.precomputed_nlp = Some(parsed("book_flight", "fly to Nice tomorrow", raw));

    orchestrator.parse_sentence("d", &mut sentence, &user());

    assert!(client.queries.lock().is_empty());
    assert_eq!(*client.evaluations.lock(), 1);
    let contents: Vec<_> = sentence.entity_values.iter().map(|v| (v.role().to_string(), v.content.clone())).collect();
    assert_eq!(
        contents,
        vec![("destination".to_string(), Some("Nice".to_string())), ("when".to_string(), Some("tomorrow".to_string()))]
    );
    assert_eq!(orchestrator.session("d").lock().state.entity_values.value("destination"), Some(&Value::custom("nice")));
}

#[test]
fn listeners_override_entities_and_intent() {
    let paris = NlpEntityValue::new(19, 24, destination()).with_value(Value::custom("paris"));
    let client = Arc::new(Scripted::answering(vec![Answer::Parsed(parsed(
        "book_flight",
        "I want a flight to Paris",
        vec![paris],
    ))]));
    let listener = Recording {
        custom: vec![EntityValue::new(destination(), Some(Value::custom("lyon")), Some("Lyon".into()))],
        intent: Some(Intent::new("app:greet", Vec::new())),
        ..Recording::default()
    };
    let orchestrator = orchestrator(client).with_listeners(ListenerChain::new().with(Arc::new(listener)));

    let mut sentence = UserSentence::new("s1", "u", "I want a flight to Paris");
    orchestrator.parse_sentence("d", &mut sentence, &user());

    assert_eq!(sentence.entity_values.len(), 1);
    assert_eq!(current_intent(&orchestrator, "d").as_deref(), Some("app:greet"));
    assert_eq!(orchestrator.session("d").lock().state.entity_values.value("destination"), Some(&Value::custom("lyon")));
}

#[test]
fn turns_of_one_dialog_run_one_at_a_time() {
    let nice = NlpEntityValue::new(3, 7, destination()).with_value(Value::custom("nice"));
    let client = Arc::new(Scripted { fallback: Some(parsed("book_flight", "to Nice", vec![nice])), ..Scripted::default() });
    let orchestrator = orchestrator(client);

    thread::scope(|scope| {
        for i in 0..8 {
            let orchestrator = &orchestrator;
            scope.spawn(move || {
                let dialog = if i % 2 == 0 { "shared" } else { "other" };
                let mut sentence = UserSentence::new(format!("s{i}"), "u", "to Nice");
                orchestrator.parse_sentence(dialog, &mut sentence, &user());
            });
        }
    });

    for dialog in ["shared", "other"] {
        let session = orchestrator.session(dialog);
        let history = session.lock().state.entity_values.get("destination").map(|s| s.history.len());
        assert_eq!(history, Some(3));
    }
}

#[test]
fn mark_as_unknown_ignores_empty_sentences() {
    let client = Arc::new(Scripted::default());
    let orchestrator = orchestrator(client.clone());

    orchestrator.mark_as_unknown(&UserSentence::new("s1", "u", "  "), &user()).unwrap();
    orchestrator.mark_as_unknown(&UserSentence::new("s2", "u", "blorp"), &user()).unwrap();

    let unknown = client.unknown.lock();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].text, "blorp");
    assert_eq!(unknown[0].application_name, "travel");
    assert!(orchestrator.wait_availability(Duration::from_millis(10)));
}
