//! Shared fakes for the integration tests: an in-memory page, a scripted
//! oracle and agent construction helpers.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use sightline::agent::Agent;
use sightline::browser::{
    ActionOptions, DriverError, DriverResult, ElementOp, KeyboardOp, Navigation, NoopStabilizer,
    PageDriver, PointerOp, StateQuery,
};
use sightline::core::{Message, Viewport};
use sightline::llm::{GenerateOptions, LLMProvider, LLMResponse, Oracle, RetryPolicy};
use sightline::som::scripts;
use sightline::som::TypedSelector;
use sightline::{Config, Result, SightlineError};

/// Everything the fake page was asked to do
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Evaluate(&'static str),
    Screenshot { full_page: bool },
    Navigate(String),
    Perform {
        selector: String,
        op: ElementOp,
        force: bool,
    },
    Pointer(PointerOp),
    Keyboard(KeyboardOp),
    Count(String),
    Query(String),
    WaitForLoad,
    SetTimeout(Duration),
}

impl Call {
    /// Calls that change the page
    pub fn is_dom_action(&self) -> bool {
        matches!(
            self,
            Call::Navigate(_) | Call::Perform { .. } | Call::Pointer(_) | Call::Keyboard(_)
        )
    }
}

fn script_name(script: &str) -> &'static str {
    if script == scripts::SCAN {
        "scan"
    } else if script == scripts::CLEAR {
        "clear"
    } else if script == scripts::MARK {
        "mark"
    } else if script == scripts::RESOLVE {
        "resolve"
    } else if script == scripts::OBSERVE_MUTATIONS {
        "observe"
    } else if script == scripts::COLLECT_MUTATIONS {
        "collect"
    } else if script == scripts::DEBUG_POINT {
        "debug_point"
    } else {
        "unknown"
    }
}

/// In-memory page with canned scan results and per-selector outcomes
pub struct MockDriver {
    scan: Mutex<Value>,
    resolve: Mutex<HashMap<String, Value>>,
    /// Errors returned by `perform`, popped per selector expression
    failures: Mutex<HashMap<String, VecDeque<String>>>,
    /// Errors returned by `evaluate`, popped per script name
    script_failures: Mutex<HashMap<&'static str, VecDeque<String>>>,
    /// Errors returned by `wait_for_load_state`, in order
    load_failures: Mutex<VecDeque<String>>,
    counts: Mutex<HashMap<String, usize>>,
    states: Mutex<HashMap<String, Value>>,
    mutations: Mutex<Value>,
    calls: Mutex<Vec<Call>>,
    pub viewport: Viewport,
}

/// Raw scan node for a visible, unobstructed button
pub fn button_node(node_id: u32, text: &str) -> Value {
    json!({
        "nodeId": node_id,
        "ancestors": [1, 0],
        "tag": "button",
        "attrs": {},
        "classes": ["btn"],
        "style": { "display": "inline-block", "visibility": "visible", "opacity": 1, "cursor": "pointer" },
        "rect": { "x": 100 * node_id, "y": 40, "width": 80, "height": 30 },
        "text": text,
        "parent": { "tag": "nav", "classes": [], "text": "" },
        "inViewport": true,
        "hitSamples": [[node_id, 1, 0], [node_id, 1, 0], [node_id, 1, 0], [node_id, 1, 0], [node_id, 1, 0]],
        "allowListed": true,
        "pointerCursor": true
    })
}

impl MockDriver {
    pub fn new(nodes: Vec<Value>) -> Self {
        Self {
            scan: Mutex::new(json!({ "viewport": { "width": 1280, "height": 720 }, "nodes": nodes })),
            resolve: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            script_failures: Mutex::new(HashMap::new()),
            load_failures: Mutex::new(VecDeque::new()),
            counts: Mutex::new(HashMap::new()),
            states: Mutex::new(HashMap::new()),
            mutations: Mutex::new(json!([])),
            calls: Mutex::new(Vec::new()),
            viewport: Viewport::default(),
        }
    }

    /// A page with one button per label, marked 1..n in order
    pub fn with_buttons(labels: &[&str]) -> Self {
        Self::new(
            labels
                .iter()
                .enumerate()
                .map(|(i, text)| button_node(10 + i as u32, text))
                .collect(),
        )
    }

    pub fn fail(&self, selector: impl Into<String>, message: impl Into<String>) {
        self.failures
            .lock()
            .unwrap()
            .entry(selector.into())
            .or_default()
            .push_back(message.into());
    }

    pub fn fail_script(&self, name: &'static str, message: impl Into<String>) {
        self.script_failures
            .lock()
            .unwrap()
            .entry(name)
            .or_default()
            .push_back(message.into());
    }

    pub fn fail_load(&self, message: impl Into<String>) {
        self.load_failures.lock().unwrap().push_back(message.into());
    }

    pub fn set_resolve(&self, som_id: &str, live: Value) {
        self.resolve.lock().unwrap().insert(som_id.to_string(), live);
    }

    pub fn set_count(&self, selector: impl Into<String>, count: usize) {
        self.counts.lock().unwrap().insert(selector.into(), count);
    }

    pub fn set_state(&self, selector: impl Into<String>, query: &StateQuery, value: Value) {
        self.states
            .lock()
            .unwrap()
            .insert(format!("{}|{:?}", selector.into(), query), value);
    }

    pub fn set_mutations(&self, mutations: Value) {
        *self.mutations.lock().unwrap() = mutations;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn dom_actions(&self) -> Vec<Call> {
        self.calls().into_iter().filter(Call::is_dom_action).collect()
    }

    pub fn performed_selectors(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Perform { selector, .. } => Some(selector),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl PageDriver for MockDriver {
    async fn evaluate(&self, script: &str, arg: Value) -> DriverResult<Value> {
        let name = script_name(script);
        self.record(Call::Evaluate(name));
        if let Some(message) = self
            .script_failures
            .lock()
            .unwrap()
            .get_mut(name)
            .and_then(VecDeque::pop_front)
        {
            return Err(DriverError::new(message));
        }
        Ok(match name {
            "scan" => self.scan.lock().unwrap().clone(),
            "resolve" => {
                let som_id = arg["somId"].as_str().unwrap_or_default().to_string();
                self.resolve
                    .lock()
                    .unwrap()
                    .get(&som_id)
                    .cloned()
                    .unwrap_or_else(|| json!([{ "tag": "button", "classes": ["btn"], "text": "", "bbox": { "x": 0, "y": 0, "width": 80, "height": 30 } }]))
            }
            "collect" => self.mutations.lock().unwrap().clone(),
            "mark" => json!(0),
            _ => Value::Null,
        })
    }

    async fn screenshot(&self, full_page: bool) -> DriverResult<String> {
        self.record(Call::Screenshot { full_page });
        Ok("iVBORw0KGgo=".to_string())
    }

    async fn viewport(&self) -> DriverResult<Viewport> {
        Ok(self.viewport)
    }

    async fn navigate(&self, navigation: &Navigation, _timeout: Duration) -> DriverResult<()> {
        self.record(Call::Navigate(navigation.to_string()));
        Ok(())
    }

    async fn perform(
        &self,
        selector: &TypedSelector,
        op: &ElementOp,
        options: &ActionOptions,
    ) -> DriverResult<()> {
        let selector = selector.to_string();
        self.record(Call::Perform {
            selector: selector.clone(),
            op: op.clone(),
            force: options.force,
        });
        match self
            .failures
            .lock()
            .unwrap()
            .get_mut(&selector)
            .and_then(VecDeque::pop_front)
        {
            Some(message) => Err(DriverError::new(message)),
            None => Ok(()),
        }
    }

    async fn pointer(&self, op: &PointerOp) -> DriverResult<()> {
        self.record(Call::Pointer(op.clone()));
        Ok(())
    }

    async fn keyboard(&self, op: &KeyboardOp) -> DriverResult<()> {
        self.record(Call::Keyboard(op.clone()));
        Ok(())
    }

    async fn count(&self, selector: &TypedSelector) -> DriverResult<usize> {
        let selector = selector.to_string();
        self.record(Call::Count(selector.clone()));
        Ok(self.counts.lock().unwrap().get(&selector).copied().unwrap_or(1))
    }

    async fn query(&self, selector: &TypedSelector, query: &StateQuery) -> DriverResult<Value> {
        let key = format!("{}|{:?}", selector, query);
        self.record(Call::Query(key.clone()));
        Ok(self.states.lock().unwrap().get(&key).cloned().unwrap_or(Value::Null))
    }

    async fn wait_for_load_state(&self, _timeout: Duration) -> DriverResult<()> {
        self.record(Call::WaitForLoad);
        match self.load_failures.lock().unwrap().pop_front() {
            Some(message) => Err(DriverError::new(message)),
            None => Ok(()),
        }
    }

    async fn set_default_timeout(&self, timeout: Duration) -> DriverResult<()> {
        self.record(Call::SetTimeout(timeout));
        Ok(())
    }
}

/// Oracle provider that plays back a queue of replies
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Value>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Value>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        })
    }

    /// User prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl LLMProvider for ScriptedProvider {
    async fn chat(
        &self,
        model: &str,
        messages: &[Message],
        _options: Option<GenerateOptions>,
    ) -> Result<LLMResponse> {
        if let Some(user) = messages.iter().find(|m| m.role == "user") {
            self.prompts.lock().unwrap().push(user.content.clone());
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| SightlineError::protocol("scripted oracle ran out of replies"))?;
        Ok(LLMResponse {
            content: reply.to_string(),
            usage: None,
            model: model.to_string(),
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.agent.max_wait_retries = 3;
    config.agent.confidence_threshold = 70;
    config
}

/// Agent wired to a scripted oracle, without stabilization delays
pub fn agent(provider: Arc<ScriptedProvider>, config: Config) -> Agent {
    let oracle = Oracle::new(provider, "test-model").with_retry(RetryPolicy {
        attempts: 1,
        base_delay: Duration::from_millis(1),
    });
    Agent::new(oracle, config)
        .with_stabilizer(Arc::new(NoopStabilizer))
        .with_wait_pause(Duration::ZERO)
}
