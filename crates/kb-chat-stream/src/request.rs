use chrono::{DateTime, TimeZone};
use serde_json::{Map, Value, json};

/// Format of the `cTime` variable injected into every request.
const CTIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S %A";

/// Question sent to the knowledge-base chat backend.
///
/// Only `user_id`, `kb_ids` and `question` are interpreted by the backend's
/// retrieval step; the rest is workflow context passed through untouched.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChatRequest {
    pub user_id: String,
    pub kb_ids: Vec<String>,
    pub question: String,
    pub history: Option<Value>,
    pub prompt: Option<Value>,
    pub app_id: Option<String>,
    pub app_name: Option<String>,
    pub nodes: Option<Value>,
    pub edges: Option<Value>,
    pub variables: Map<String, Value>,
    /// Additional top-level body fields.
    pub extra: Map<String, Value>,
}

impl ChatRequest {
    pub fn new(
        user_id: impl Into<String>,
        kb_ids: impl IntoIterator<Item = impl Into<String>>,
        question: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            kb_ids: kb_ids.into_iter().map(Into::into).collect(),
            question: question.into(),
            ..Self::default()
        }
    }

    /// Sets prior chat turns.
    pub fn history(mut self, history: Value) -> Self {
        self.history = Some(history);
        self
    }

    /// Sets the structured prompt the question was taken from.
    pub fn prompt(mut self, prompt: Value) -> Self {
        self.prompt = Some(prompt);
        self
    }

    /// Identifies the app the chat runs under.
    pub fn app(mut self, app_id: impl Into<String>, app_name: impl Into<String>) -> Self {
        self.app_id = Some(app_id.into());
        self.app_name = Some(app_name.into());
        self
    }

    /// Attaches the workflow node/edge graph.
    pub fn graph(mut self, nodes: Value, edges: Value) -> Self {
        self.nodes = Some(nodes);
        self.edges = Some(edges);
        self
    }

    /// Adds a workflow variable.
    pub fn variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Adds an arbitrary top-level body field.
    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// Builds the JSON body, stamping `cTime` with `now`.
    ///
    /// Later sections override earlier ones: the retrieval fields, then the
    /// pass-through context, then `variables`, `detail` and `stream`.
    pub fn to_body<Tz>(&self, now: &DateTime<Tz>) -> Value
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        let mut body = Map::new();
        body.insert("user_id".into(), json!(self.user_id));
        body.insert("kb_ids".into(), json!(self.kb_ids));
        body.insert("streaming".into(), json!(true));
        body.insert("question".into(), json!(self.question));

        let context = [
            ("history", self.history.clone()),
            ("prompt", self.prompt.clone()),
            ("nodes", self.nodes.clone()),
            ("edges", self.edges.clone()),
            ("appId", self.app_id.clone().map(Value::String)),
            ("appName", self.app_name.clone().map(Value::String)),
        ];
        for (key, value) in context {
            if let Some(value) = value {
                body.insert(key.into(), value);
            }
        }
        for (key, value) in &self.extra {
            body.insert(key.clone(), value.clone());
        }

        let mut variables = self.variables.clone();
        variables.insert(
            "cTime".into(),
            json!(now.format(CTIME_FORMAT).to_string()),
        );
        body.insert("variables".into(), Value::Object(variables));
        body.insert("detail".into(), json!(true));
        body.insert("stream".into(), json!(true));
        Value::Object(body)
    }
}
