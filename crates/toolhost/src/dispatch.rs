//! Tool dispatch: lookup, argument validation, handler invocation, failure rendering.
//!
//! Every outcome of [`Dispatcher::dispatch`] is a `CallToolResult`. Unknown tools, invalid
//! arguments, handler errors and handler panics are reported as `isError: true` content so the
//! calling agent always gets something it can read.

use crate::diagnostics;
use crate::registry::{ToolDefinition, ToolRegistry};
use futures::FutureExt as _;
use jsonschema::error::ValidationErrorKind;
use rmcp::model::{CallToolResult, Content, JsonObject, Tool};
use serde_json::{Value, json};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

/// Binds a frozen registry to one transport instance.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn list_tools(&self) -> Vec<Tool> {
        self.registry.list()
    }

    /// Validate and execute one tool call.
    ///
    /// Must be awaited inside a credential scope when the handler reads credentials.
    pub async fn dispatch(&self, name: &str, arguments: Option<JsonObject>) -> CallToolResult {
        let Some(tool) = self.registry.get(name) else {
            tracing::info!(tool = %name, "unknown tool");
            return error_result(format!("unknown tool: {name}"));
        };

        let args = Value::Object(arguments.unwrap_or_default());
        if let Err(report) = validate_tool_arguments(&tool, &args) {
            tracing::info!(
                tool = %name,
                violations = report.violations.len(),
                "tool arguments rejected"
            );
            return report.into_result();
        }
        let args = match args {
            Value::Object(m) => m,
            _ => JsonObject::new(),
        };

        let started = Instant::now();
        let handler = tool.handler();
        let outcome = AssertUnwindSafe(handler.call(args)).catch_unwind().await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        match outcome {
            Ok(Ok(result)) => {
                tracing::debug!(tool = %name, elapsed_ms, "tool call finished");
                result
            }
            Ok(Err(e)) => {
                tracing::warn!(tool = %name, elapsed_ms, error = %e, "tool call failed");
                error_result(diagnostics::describe(&e))
            }
            Err(panic) => {
                let msg = panic_message(panic.as_ref());
                tracing::error!(tool = %name, elapsed_ms, panic = %msg, "tool handler panicked");
                error_result(format!("Tool failed unexpectedly: {msg}"))
            }
        }
    }
}

fn error_result(text: String) -> CallToolResult {
    CallToolResult::error(vec![Content::text(text)])
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Violations found while validating one call.
#[derive(Debug, Clone)]
pub struct ValidationReport {
    tool: String,
    violations: Vec<Value>,
}

impl ValidationReport {
    /// Structured violation records (`type`, `parameter`/`instancePath`, ...).
    #[must_use]
    pub fn violations(&self) -> &[Value] {
        &self.violations
    }

    /// One line per violation, each naming the offending field.
    #[must_use]
    pub fn summary(&self) -> String {
        let lines: Vec<String> = self.violations.iter().map(describe_violation).collect();
        format!(
            "Invalid arguments for tool '{}':\n- {}",
            self.tool,
            lines.join("\n- ")
        )
    }

    fn into_result(self) -> CallToolResult {
        let mut result = error_result(self.summary());
        result.structured_content = Some(json!({
            "type": "validation-errors",
            "violations": self.violations,
        }));
        result
    }
}

fn describe_violation(v: &Value) -> String {
    let field = |k: &str| v.get(k).and_then(Value::as_str).unwrap_or("?");
    match v.get("type").and_then(Value::as_str) {
        Some("missing-required-parameter") => {
            format!("missing required parameter '{}'", field("parameter"))
        }
        Some("invalid-parameter") => {
            let suggestion = v
                .get("suggestions")
                .and_then(Value::as_array)
                .and_then(|arr| arr.first())
                .and_then(Value::as_str);
            match suggestion {
                Some(s) => format!(
                    "unknown parameter '{}' (did you mean '{s}'?)",
                    field("parameter")
                ),
                None => format!("unknown parameter '{}'", field("parameter")),
            }
        }
        _ => {
            let path = field("instancePath");
            let path = if path.is_empty() { "/" } else { path };
            format!("'{path}': {}", field("message"))
        }
    }
}

/// Check `args` against the tool's input schema.
///
/// # Errors
///
/// Returns a [`ValidationReport`] listing unknown parameters (with suggestions), missing
/// required parameters, and schema constraint violations.
pub fn validate_tool_arguments(
    tool: &ToolDefinition,
    args: &Value,
) -> Result<(), ValidationReport> {
    let schema = tool.schema();
    let props = schema
        .get("properties")
        .and_then(|v| v.as_object())
        .cloned()
        .unwrap_or_default();
    let closed = schema.get("additionalProperties") == Some(&Value::Bool(false));
    let required: Vec<String> = schema
        .get("required")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect();

    let args_obj = args.as_object().cloned().unwrap_or_default();
    let valid_params: Vec<String> = props.keys().cloned().collect();
    let valid_param_refs: Vec<&str> = valid_params.iter().map(String::as_str).collect();

    let mut violations: Vec<Value> = Vec::new();

    // Unknown parameters only count when the schema is closed.
    if closed {
        for k in args_obj.keys() {
            if props.contains_key(k) {
                continue;
            }
            let suggestions = find_similar_strings(k, &valid_param_refs);
            violations.push(json!({
                "type": "invalid-parameter",
                "parameter": k,
                "suggestions": suggestions,
                "validParameters": valid_params,
            }));
        }
    }

    for r in &required {
        if !args_obj.contains_key(r) {
            violations.push(json!({
                "type": "missing-required-parameter",
                "parameter": r,
            }));
        }
    }

    for e in tool.validator().iter_errors(args) {
        let instance_path = e.instance_path().to_string();
        // Top-level required/additional-property errors already have a record above.
        let reported_above = instance_path.is_empty()
            && match e.kind() {
                ValidationErrorKind::Required { property } => property
                    .as_str()
                    .is_some_and(|p| required.iter().any(|r| r == p)),
                ValidationErrorKind::AdditionalProperties { unexpected } => {
                    closed && unexpected.iter().all(|k| !props.contains_key(k))
                }
                _ => false,
            };
        if reported_above {
            continue;
        }
        violations.push(json!({
            "type": "constraint-violation",
            "message": e.to_string(),
            "instancePath": instance_path,
        }));
    }

    if violations.is_empty() {
        return Ok(());
    }
    Err(ValidationReport {
        tool: tool.name().to_string(),
        violations,
    })
}

fn find_similar_strings(unknown: &str, known: &[&str]) -> Vec<String> {
    let mut candidates: Vec<(f64, String)> = Vec::new();
    for k in known {
        let score = strsim::jaro(unknown, k);
        if score > 0.7 {
            candidates.push((score, (*k).to_string()));
        }
    }
    candidates.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
    candidates.into_iter().map(|(_, s)| s).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn text_of(result: &CallToolResult) -> String {
        result
            .content
            .iter()
            .filter_map(|c| c.as_text().map(|t| t.text.clone()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn echo_schema() -> Value {
        json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"],
            "additionalProperties": false
        })
    }

    fn dispatcher_with(defs: Vec<ToolDefinition>) -> Dispatcher {
        let mut reg = ToolRegistry::new();
        for d in defs {
            reg.register(d).expect("register");
        }
        Dispatcher::new(Arc::new(reg))
    }

    async fn echo(args: JsonObject) -> Result<CallToolResult, ToolError> {
        let text = args
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    fn echo_dispatcher() -> Dispatcher {
        dispatcher_with(vec![
            ToolDefinition::new("echo", "Echo text", echo_schema(), echo).expect("echo"),
        ])
    }

    #[tokio::test]
    async fn echo_roundtrip() {
        let d = echo_dispatcher();
        let mut args = JsonObject::new();
        args.insert("text".to_string(), json!("hi"));
        let result = d.dispatch("echo", Some(args)).await;
        assert_ne!(result.is_error, Some(true));
        assert_eq!(text_of(&result), "hi");
        assert_eq!(
            serde_json::to_value(&result.content).expect("json"),
            json!([{ "type": "text", "text": "hi" }])
        );
    }

    #[tokio::test]
    async fn missing_required_field_is_named() {
        let d = echo_dispatcher();
        let result = d.dispatch("echo", Some(JsonObject::new())).await;
        assert_eq!(result.is_error, Some(true));
        let text = text_of(&result);
        assert!(text.contains("missing required parameter 'text'"), "{text}");
    }

    #[tokio::test]
    async fn unknown_tool_is_content_not_panic() {
        let d = echo_dispatcher();
        let result = d.dispatch("echo2", None).await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(text_of(&result), "unknown tool: echo2");
    }

    #[tokio::test]
    async fn typo_gets_suggestion() {
        let d = echo_dispatcher();
        let mut args = JsonObject::new();
        args.insert("txt".to_string(), json!("hi"));
        let result = d.dispatch("echo", Some(args)).await;
        let text = text_of(&result);
        assert!(text.contains("unknown parameter 'txt' (did you mean 'text'?)"), "{text}");
        assert!(text.contains("missing required parameter 'text'"), "{text}");
    }

    #[tokio::test]
    async fn type_mismatch_reports_instance_path() {
        let d = echo_dispatcher();
        let mut args = JsonObject::new();
        args.insert("text".to_string(), json!(42));
        let result = d.dispatch("echo", Some(args)).await;
        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).contains("'/text'"));
        let sc = result.structured_content.expect("structured violations");
        assert_eq!(sc["type"], json!("validation-errors"));
    }

    #[tokio::test]
    async fn invalid_arguments_never_reach_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let spy_calls = Arc::clone(&calls);
        let spy = move |_args: JsonObject| {
            let calls = Arc::clone(&spy_calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ToolError>(CallToolResult::success(vec![Content::text("side effect")]))
            }
        };
        let d = dispatcher_with(vec![
            ToolDefinition::new("spy", "", echo_schema(), spy).expect("spy"),
        ]);

        let _ = d.dispatch("spy", None).await;
        let mut bad = JsonObject::new();
        bad.insert("text".to_string(), json!(["not", "a", "string"]));
        let _ = d.dispatch("spy", Some(bad)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let mut good = JsonObject::new();
        good.insert("text".to_string(), json!("ok"));
        let _ = d.dispatch("spy", Some(good)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn nested_object_violations_block_the_handler() {
        let calls = Arc::new(AtomicUsize::new(0));
        let spy_calls = Arc::clone(&calls);
        let spy = move |_args: JsonObject| {
            let calls = Arc::clone(&spy_calls);
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, ToolError>(CallToolResult::success(vec![Content::text("side effect")]))
            }
        };
        let schema = json!({
            "type": "object",
            "properties": {
                "opts": {
                    "type": "object",
                    "properties": { "path": { "type": "string" } },
                    "required": ["path"],
                    "additionalProperties": false
                }
            },
            "required": ["opts"]
        });
        let d = dispatcher_with(vec![ToolDefinition::new("spy", "", schema, spy).expect("spy")]);

        let mut args = JsonObject::new();
        args.insert("opts".to_string(), json!({ "bogus": 1 }));
        let result = d.dispatch("spy", Some(args)).await;
        assert_eq!(result.is_error, Some(true));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let sc = result.structured_content.as_ref().expect("structured violations");
        let violations = sc["violations"].as_array().expect("violations");
        assert!(
            violations.len() >= 2,
            "missing 'path' and unexpected 'bogus' are both reported: {violations:?}"
        );
        assert!(violations.iter().all(|v| v["instancePath"] == json!("/opts")));
        assert!(text_of(&result).contains("'/opts'"));

        let mut good = JsonObject::new();
        good.insert("opts".to_string(), json!({ "path": "/a" }));
        let result = d.dispatch("spy", Some(good)).await;
        assert_ne!(result.is_error, Some(true));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn handler_errors_become_diagnostics() {
        async fn fails(_args: JsonObject) -> Result<CallToolResult, ToolError> {
            Err(ToolError::upstream(404, None, "not found"))
        }
        let d = dispatcher_with(vec![
            ToolDefinition::new("fails", "", json!({"type": "object"}), fails).expect("def"),
        ]);
        let result = d.dispatch("fails", None).await;
        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).contains("starts with '/'"));
    }

    #[tokio::test]
    async fn handler_panic_is_contained() {
        async fn boom(_args: JsonObject) -> Result<CallToolResult, ToolError> {
            panic!("kaboom")
        }
        let d = dispatcher_with(vec![
            ToolDefinition::new("boom", "", json!({"type": "object"}), boom).expect("def"),
        ]);
        let result = d.dispatch("boom", None).await;
        assert_eq!(result.is_error, Some(true));
        assert!(text_of(&result).contains("kaboom"));

        // The dispatcher stays usable.
        let again = d.dispatch("boom", None).await;
        assert_eq!(again.is_error, Some(true));
    }

    #[test]
    fn required_from_composed_schemas_is_still_enforced() {
        let def = ToolDefinition::new(
            "composed",
            "",
            json!({
                "type": "object",
                "properties": {"a": {"type": "string"}},
                "allOf": [{"required": ["a"]}]
            }),
            echo,
        )
        .expect("def");
        let report = validate_tool_arguments(&def, &json!({})).unwrap_err();
        assert_eq!(report.violations().len(), 1);
        assert_eq!(report.violations()[0]["type"], json!("constraint-violation"));
        assert!(validate_tool_arguments(&def, &json!({"a": "x"})).is_ok());
    }

    #[test]
    fn open_schemas_accept_extra_parameters() {
        let def = ToolDefinition::new(
            "open",
            "",
            json!({"type": "object", "properties": {"a": {"type": "string"}}}),
            echo,
        )
        .expect("def");
        assert!(validate_tool_arguments(&def, &json!({"a": "x", "b": 1})).is_ok());
    }
}
