//! Agent step graphs.
//!
//! A graph is a set of typed steps joined by directed edges. Runs start at
//! the single input step and walk edges breadth-first; condition steps
//! follow only the edges labelled with the branch they evaluated to.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// One node of the graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub kind: StepKind,
}

/// Step payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum StepKind {
    /// Entry point. Binds the user message to `input`.
    Input,
    /// Renders the run result.
    Output { template: String },
    /// Sends a rendered prompt to the agent's provider.
    #[serde(rename_all = "camelCase")]
    LlmCall { prompt: String, output: String },
    /// Calls a built-in tool. String leaves of `arguments` are templates.
    #[serde(rename_all = "camelCase")]
    ToolCall {
        tool: String,
        #[serde(default)]
        arguments: Value,
        output: String,
    },
    /// Runs one of the agent's code blocks in the sandbox.
    #[serde(rename_all = "camelCase")]
    CodeBlock {
        block: String,
        /// Input object fields, each a template. Empty passes every variable.
        #[serde(default)]
        inputs: BTreeMap<String, String>,
        output: String,
    },
    /// Chooses between the `true` and `false` outgoing edges.
    #[serde(rename_all = "camelCase")]
    Condition {
        conditions: Vec<Predicate>,
        #[serde(default)]
        mode: MatchMode,
    },
    /// Renders a template into a variable.
    Transform { template: String, output: String },
}

impl StepKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            StepKind::Input => "input",
            StepKind::Output { .. } => "output",
            StepKind::LlmCall { .. } => "llm-call",
            StepKind::ToolCall { .. } => "tool-call",
            StepKind::CodeBlock { .. } => "code-block",
            StepKind::Condition { .. } => "condition",
            StepKind::Transform { .. } => "transform",
        }
    }

    /// Variable the step writes, if any.
    pub fn output_variable(&self) -> Option<&str> {
        match self {
            StepKind::LlmCall { output, .. }
            | StepKind::ToolCall { output, .. }
            | StepKind::CodeBlock { output, .. }
            | StepKind::Transform { output, .. } => Some(output),
            StepKind::Input | StepKind::Output { .. } | StepKind::Condition { .. } => None,
        }
    }
}

/// A single comparison against a run variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    /// Variable path, e.g. `input` or `weather.temp`.
    pub variable: String,
    pub operator: Operator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    IsEmpty,
    IsNotEmpty,
}

/// How a condition combines its predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    #[default]
    All,
    Any,
}

impl Predicate {
    /// Evaluate against the resolved variable value (`None` when unset).
    pub fn evaluate(&self, actual: Option<&Value>) -> bool {
        let actual = actual.unwrap_or(&Value::Null);
        match self.operator {
            Operator::Equals => loosely_equal(actual, &self.value),
            Operator::NotEquals => !loosely_equal(actual, &self.value),
            Operator::Contains => contains(actual, &self.value),
            Operator::NotContains => !contains(actual, &self.value),
            Operator::StartsWith => as_text(actual).starts_with(&as_text(&self.value)),
            Operator::EndsWith => as_text(actual).ends_with(&as_text(&self.value)),
            Operator::GreaterThan => compare(actual, &self.value).is_some_and(|o| o.is_gt()),
            Operator::LessThan => compare(actual, &self.value).is_some_and(|o| o.is_lt()),
            Operator::IsEmpty => is_empty(actual),
            Operator::IsNotEmpty => !is_empty(actual),
        }
    }
}

fn as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn loosely_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a == b,
        _ => as_text(actual) == as_text(expected),
    }
}

fn contains(actual: &Value, needle: &Value) -> bool {
    match actual {
        Value::Array(items) => items.iter().any(|item| loosely_equal(item, needle)),
        Value::Object(map) => map.contains_key(&as_text(needle)),
        other => as_text(other).contains(&as_text(needle)),
    }
}

fn compare(actual: &Value, expected: &Value) -> Option<std::cmp::Ordering> {
    match (as_number(actual), as_number(expected)) {
        (Some(a), Some(b)) => a.partial_cmp(&b),
        _ => Some(as_text(actual).cmp(&as_text(expected))),
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Directed edge. `branch` is set only on edges leaving a condition step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: String,
    pub to: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<bool>,
}

impl Edge {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            branch: None,
        }
    }

    pub fn branch(from: impl Into<String>, to: impl Into<String>, branch: bool) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            branch: Some(branch),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    #[serde(default)]
    pub steps: Vec<Step>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

/// Names reserved for variables bound by the runtime.
const RESERVED_VARIABLES: &[&str] = &["input"];

impl Graph {
    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// The input step, if exactly one exists.
    pub fn entry(&self) -> Option<&Step> {
        let mut inputs = self
            .steps
            .iter()
            .filter(|s| matches!(s.kind, StepKind::Input));
        match (inputs.next(), inputs.next()) {
            (Some(step), None) => Some(step),
            _ => None,
        }
    }

    /// Steps to visit after `id`. `branch` filters edges leaving a condition.
    pub fn successors(&self, id: &str, branch: Option<bool>) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|e| e.from == id)
            .filter(|e| branch.is_none() || e.branch == branch)
            .map(|e| e.to.as_str())
            .collect()
    }

    /// Code block ids referenced by code-block steps.
    pub fn referenced_blocks(&self) -> impl Iterator<Item = &str> {
        self.steps.iter().filter_map(|s| match &s.kind {
            StepKind::CodeBlock { block, .. } => Some(block.as_str()),
            _ => None,
        })
    }

    /// Structural problems, empty when the graph is runnable.
    pub fn problems(&self, known_blocks: &HashSet<&str>) -> Vec<String> {
        let mut problems = Vec::new();

        let mut ids = HashSet::new();
        for step in &self.steps {
            if step.id.trim().is_empty() {
                problems.push("graph: step with empty id".to_string());
            } else if !ids.insert(step.id.as_str()) {
                problems.push(format!("graph: duplicate step id '{}'", step.id));
            }
            self.step_problems(step, known_blocks, &mut problems);
        }

        let inputs = self
            .steps
            .iter()
            .filter(|s| matches!(s.kind, StepKind::Input))
            .count();
        if inputs != 1 {
            problems.push(format!("graph: expected exactly one input step, found {inputs}"));
        }

        for edge in &self.edges {
            for end in [&edge.from, &edge.to] {
                if !ids.contains(end.as_str()) {
                    problems.push(format!("graph: edge references unknown step '{end}'"));
                }
            }
            let from_condition = self
                .step(&edge.from)
                .is_some_and(|s| matches!(s.kind, StepKind::Condition { .. }));
            match (from_condition, edge.branch) {
                (true, None) => problems.push(format!(
                    "graph: edge {} -> {} leaves a condition and needs a branch",
                    edge.from, edge.to
                )),
                (false, Some(_)) => problems.push(format!(
                    "graph: edge {} -> {} has a branch but does not leave a condition",
                    edge.from, edge.to
                )),
                _ => {}
            }
        }

        if self.has_cycle() {
            problems.push("graph: contains a cycle".to_string());
        }
        problems
    }

    fn step_problems(&self, step: &Step, known_blocks: &HashSet<&str>, problems: &mut Vec<String>) {
        if let Some(output) = step.kind.output_variable() {
            if !is_identifier(output) {
                problems.push(format!(
                    "step '{}': output variable '{output}' must be an identifier",
                    step.id
                ));
            } else if RESERVED_VARIABLES.contains(&output) {
                problems.push(format!(
                    "step '{}': output variable '{output}' is reserved",
                    step.id
                ));
            }
        }
        match &step.kind {
            StepKind::CodeBlock { block, .. } if !known_blocks.contains(block.as_str()) => {
                problems.push(format!("step '{}': unknown code block '{block}'", step.id));
            }
            StepKind::ToolCall { tool, .. } if tool.trim().is_empty() => {
                problems.push(format!("step '{}': tool name is empty", step.id));
            }
            StepKind::Condition { conditions, .. } if conditions.is_empty() => {
                problems.push(format!("step '{}': condition has no predicates", step.id));
            }
            _ => {}
        }
    }

    fn has_cycle(&self) -> bool {
        let mut indegree: HashMap<&str, usize> =
            self.steps.iter().map(|s| (s.id.as_str(), 0)).collect();
        for edge in &self.edges {
            if let Some(d) = indegree.get_mut(edge.to.as_str()) {
                *d += 1;
            }
        }
        let mut queue: VecDeque<&str> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for edge in self.edges.iter().filter(|e| e.from == id) {
                if let Some(d) = indegree.get_mut(edge.to.as_str()) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(edge.to.as_str());
                    }
                }
            }
        }
        visited < indegree.len()
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn step(id: &str, kind: StepKind) -> Step {
        Step {
            id: id.to_string(),
            label: None,
            kind,
        }
    }

    fn linear() -> Graph {
        Graph {
            steps: vec![
                step("in", StepKind::Input),
                step(
                    "t",
                    StepKind::Transform {
                        template: "Hello {{input}}".to_string(),
                        output: "greeting".to_string(),
                    },
                ),
                step(
                    "out",
                    StepKind::Output {
                        template: "{{greeting}}".to_string(),
                    },
                ),
            ],
            edges: vec![Edge::new("in", "t"), Edge::new("t", "out")],
        }
    }

    #[test]
    fn test_valid_graph_has_no_problems() {
        let graph = linear();
        assert!(graph.problems(&HashSet::new()).is_empty());
        assert_eq!(graph.entry().unwrap().id, "in");
        assert_eq!(graph.successors("in", None), vec!["t"]);
    }

    #[test]
    fn test_structural_problems() {
        let mut graph = linear();
        graph.edges.push(Edge::new("out", "in"));
        graph.edges.push(Edge::new("t", "ghost"));
        graph.steps.push(step("t", StepKind::Input));
        let problems = graph.problems(&HashSet::new()).join("\n");
        assert!(problems.contains("duplicate step id 't'"));
        assert!(problems.contains("exactly one input step"));
        assert!(problems.contains("unknown step 'ghost'"));
        assert!(problems.contains("cycle"));
    }

    #[test]
    fn test_condition_edges_need_branches() {
        let graph = Graph {
            steps: vec![
                step("in", StepKind::Input),
                step(
                    "c",
                    StepKind::Condition {
                        conditions: vec![Predicate {
                            variable: "input".to_string(),
                            operator: Operator::IsNotEmpty,
                            value: Value::Null,
                        }],
                        mode: MatchMode::All,
                    },
                ),
                step("out", StepKind::Output { template: "x".to_string() }),
            ],
            edges: vec![Edge::branch("in", "c", true), Edge::new("c", "out")],
        };
        let problems = graph.problems(&HashSet::new()).join("\n");
        assert!(problems.contains("in -> c has a branch"));
        assert!(problems.contains("c -> out leaves a condition"));
    }

    #[test]
    fn test_output_variable_and_block_checks() {
        let graph = Graph {
            steps: vec![
                step("in", StepKind::Input),
                step(
                    "code",
                    StepKind::CodeBlock {
                        block: "missing".to_string(),
                        inputs: BTreeMap::new(),
                        output: "input".to_string(),
                    },
                ),
                step(
                    "t",
                    StepKind::Transform {
                        template: "x".to_string(),
                        output: "bad name".to_string(),
                    },
                ),
            ],
            edges: vec![],
        };
        let problems = graph.problems(&HashSet::from(["other"])).join("\n");
        assert!(problems.contains("unknown code block 'missing'"));
        assert!(problems.contains("'input' is reserved"));
        assert!(problems.contains("'bad name' must be an identifier"));
    }

    #[test]
    fn test_step_wire_format() {
        let step: Step = serde_json::from_value(json!({
            "id": "fetch",
            "type": "tool-call",
            "tool": "http_request",
            "arguments": {"url": "https://api.example.com/{{input}}"},
            "output": "body"
        }))
        .unwrap();
        assert_eq!(step.kind.type_name(), "tool-call");
        assert_eq!(step.kind.output_variable(), Some("body"));

        let input: Step = serde_json::from_value(json!({"id": "in", "type": "input"})).unwrap();
        assert_eq!(input.kind, StepKind::Input);
        let json = serde_json::to_value(&input).unwrap();
        assert_eq!(json, json!({"id": "in", "type": "input"}));
    }

    #[test]
    fn test_predicates() {
        let p = |operator, value| Predicate {
            variable: "x".to_string(),
            operator,
            value,
        };
        assert!(p(Operator::Equals, json!(3)).evaluate(Some(&json!("3"))));
        assert!(p(Operator::Contains, json!("err")).evaluate(Some(&json!("an error"))));
        assert!(p(Operator::Contains, json!(2)).evaluate(Some(&json!([1, 2]))));
        assert!(p(Operator::GreaterThan, json!(10)).evaluate(Some(&json!(12.5))));
        assert!(!p(Operator::LessThan, json!(10)).evaluate(Some(&json!(12.5))));
        assert!(p(Operator::IsEmpty, Value::Null).evaluate(None));
        assert!(p(Operator::StartsWith, json!("ok")).evaluate(Some(&json!("ok: done"))));
        assert!(p(Operator::NotEquals, json!("a")).evaluate(Some(&json!("b"))));
    }
}
