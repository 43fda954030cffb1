//! Tool executor: validation, permission policy, and timeout enforcement.
//!
//! Execution never returns `Err`. Every failure mode, unknown tool, bad
//! arguments, denied permission, timeout, bridge error, is folded into a
//! failed [`ToolResult`] so batches and plans keep going.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::bridge::BridgeExecutor;
use crate::error::AgentError;
use crate::tool::registry::ToolRegistry;
use crate::tool::types::{ParamType, Parameter, ToolCall, ToolMetadata, ToolResult};

/// Policy and limits applied to every execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Whether destructive tools may run at all.
    pub allow_destructive: bool,
    /// Deadline applied when a call does not carry its own.
    pub default_timeout: Duration,
    /// Concurrency cap for [`ToolExecutor::execute_batch_concurrent`].
    pub max_concurrency: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            allow_destructive: false,
            default_timeout: Duration::from_secs(30),
            max_concurrency: 4,
        }
    }
}

/// Executes tool calls against the bridge.
#[derive(Clone)]
pub struct ToolExecutor {
    registry: Arc<ToolRegistry>,
    bridge: Arc<dyn BridgeExecutor>,
    config: ExecutorConfig,
}

impl ToolExecutor {
    pub fn new(
        registry: Arc<ToolRegistry>,
        bridge: Arc<dyn BridgeExecutor>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            registry,
            bridge,
            config,
        }
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Runs one tool call. Validation, permission, and deadline failures all
    /// come back as failed results.
    pub async fn execute(&self, call: &ToolCall) -> ToolResult {
        let started = Instant::now();

        let Some(tool) = self.registry.get(&call.tool_name) else {
            return ToolResult::err(
                &call.tool_name,
                call.parameters.clone(),
                format!("unknown tool: {}", call.tool_name),
                started.elapsed().as_secs_f64(),
            );
        };
        let metadata = tool.metadata.clone();
        let handler = tool.handler.clone();

        let args = match validate_arguments(&metadata, &call.parameters) {
            Ok(args) => args,
            Err(e) => {
                return ToolResult::err(
                    &call.tool_name,
                    call.parameters.clone(),
                    e.to_string(),
                    started.elapsed().as_secs_f64(),
                );
            }
        };

        if let Err(e) = check_permission(&metadata, &self.config) {
            warn!(tool = %metadata.name, "tool blocked by permission policy");
            return ToolResult::err(
                &call.tool_name,
                call.parameters.clone(),
                e.to_string(),
                started.elapsed().as_secs_f64(),
            );
        }

        let timeout = call
            .timeout_secs
            .or(metadata.timeout)
            .map(Duration::from_secs_f64)
            .unwrap_or(self.config.default_timeout);

        debug!(tool = %metadata.name, timeout_secs = timeout.as_secs_f64(), "executing tool");

        let bridge = self.bridge.clone();
        // The handler runs on its own task so an expired deadline abandons it
        // rather than blocking the caller. The task may keep running detached.
        let handle = tokio::spawn(async move { handler(bridge, Value::Object(args)).await });

        let outcome = match tokio::time::timeout(timeout, handle).await {
            Err(_) => Err(AgentError::Timeout(format!(
                "tool '{}' exceeded {:.1}s",
                call.tool_name,
                timeout.as_secs_f64()
            ))),
            Ok(Err(join_err)) => Err(AgentError::Command(format!(
                "tool '{}' panicked: {join_err}",
                call.tool_name
            ))),
            Ok(Ok(result)) => result,
        };

        let elapsed = started.elapsed().as_secs_f64();
        match outcome {
            Ok(value) => ToolResult::ok(&call.tool_name, call.parameters.clone(), value, elapsed),
            Err(e) => {
                warn!(tool = %call.tool_name, error = %e, "tool execution failed");
                ToolResult::err(&call.tool_name, call.parameters.clone(), e.to_string(), elapsed)
            }
        }
    }

    /// Runs calls strictly in order, collecting every result.
    pub async fn execute_batch(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            results.push(self.execute(call).await);
        }
        results
    }

    /// Runs calls concurrently up to the configured cap, preserving input
    /// order in the output.
    pub async fn execute_batch_concurrent(&self, calls: &[ToolCall]) -> Vec<ToolResult> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrency.max(1)));
        let futures: Vec<_> = calls
            .iter()
            .map(|call| {
                let semaphore = semaphore.clone();
                let executor = self.clone();
                let call = call.clone();
                async move {
                    let _permit = semaphore.acquire().await;
                    executor.execute(&call).await
                }
            })
            .collect();
        futures::future::join_all(futures).await
    }
}

/// A non-destructive tool always runs. A destructive tool without an
/// approval path is blocked unconditionally; with one, it runs only when
/// destructive tools are enabled.
fn check_permission(metadata: &ToolMetadata, config: &ExecutorConfig) -> Result<(), AgentError> {
    if !metadata.destructive {
        return Ok(());
    }
    if !metadata.requires_approval {
        return Err(AgentError::PermissionDenied(format!(
            "tool '{}' is destructive and has no approval path",
            metadata.name
        )));
    }
    if !config.allow_destructive {
        return Err(AgentError::PermissionDenied(format!(
            "tool '{}' is destructive and destructive tools are disabled",
            metadata.name
        )));
    }
    Ok(())
}

/// Checks arguments against declared parameters: required presence, type
/// coercion, and defaults for absent optionals. Unknown arguments pass
/// through unchanged.
fn validate_arguments(
    metadata: &ToolMetadata,
    provided: &HashMap<String, Value>,
) -> Result<Map<String, Value>, AgentError> {
    let mut args = Map::new();

    for param in &metadata.parameters {
        match provided.get(&param.name) {
            Some(value) => {
                let coerced = coerce_value(param, value)?;
                args.insert(param.name.clone(), coerced);
            }
            None if param.required => {
                return Err(AgentError::Validation(format!(
                    "tool '{}' missing required parameter '{}'",
                    metadata.name, param.name
                )));
            }
            None => {
                if let Some(default) = &param.default {
                    args.insert(param.name.clone(), default.clone());
                }
            }
        }
    }

    for (name, value) in provided {
        if metadata.parameter(name).is_none() {
            args.insert(name.clone(), value.clone());
        }
    }

    Ok(args)
}

fn coerce_value(param: &Parameter, value: &Value) -> Result<Value, AgentError> {
    let mismatch = || {
        AgentError::Validation(format!(
            "parameter '{}' expects {:?}, got {value}",
            param.name, param.param_type
        ))
    };

    match param.param_type {
        ParamType::Integer => match value {
            Value::Number(n) if n.is_i64() || n.is_u64() => Ok(value.clone()),
            Value::Number(n) => {
                // Lossy float input is accepted when it is integral.
                let f = n.as_f64().unwrap_or(f64::NAN);
                if f.fract() == 0.0 && f.is_finite() {
                    Ok(Value::from(f as i64))
                } else {
                    Err(mismatch())
                }
            }
            Value::String(s) => parse_integer(s).map(Value::from).ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
        ParamType::Boolean => match value {
            Value::Bool(_) => Ok(value.clone()),
            Value::String(s) => match s.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => Ok(Value::Bool(true)),
                "false" | "0" | "no" => Ok(Value::Bool(false)),
                _ => Err(mismatch()),
            },
            _ => Err(mismatch()),
        },
        ParamType::String => match value {
            Value::String(_) => Ok(value.clone()),
            Value::Number(n) => Ok(Value::String(n.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            _ => Err(mismatch()),
        },
        // Lists are never coerced from scalars.
        ParamType::List => match value {
            Value::Array(_) => Ok(value.clone()),
            _ => Err(mismatch()),
        },
    }
}

/// Parses decimal or `0x`-prefixed hex, the two spellings addresses arrive in.
fn parse_integer(s: &str) -> Option<i64> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16).ok()
    } else {
        s.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::types::ToolCategory;
    use async_trait::async_trait;
    use serde_json::json;

    struct EchoBridge;

    #[async_trait]
    impl BridgeExecutor for EchoBridge {
        async fn command(
            &self,
            method: &str,
            params: Value,
            _timeout: Option<Duration>,
        ) -> Result<Value, AgentError> {
            Ok(json!({"method": method, "params": params}))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(
            ToolMetadata::new(
                "read_memory",
                "read bytes",
                ToolCategory::Memory,
                vec![
                    Parameter::required("address", ParamType::Integer, "target address"),
                    Parameter::optional("size", ParamType::Integer, json!(16), "bytes to read"),
                ],
                false,
            ),
            |bridge, args| async move { bridge.command("read_memory", args, None).await },
        );
        registry.register(
            ToolMetadata::new(
                "write_memory",
                "write bytes",
                ToolCategory::Memory,
                vec![Parameter::required("address", ParamType::Integer, "target address")],
                true,
            ),
            |bridge, args| async move { bridge.command("write_memory", args, None).await },
        );
        registry.register(
            ToolMetadata::new("slow", "never returns", ToolCategory::Analysis, vec![], false),
            |_bridge, _args| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            },
        );
        registry.register(
            ToolMetadata::new("slow_by_default", "never returns", ToolCategory::Analysis, vec![], false)
                .with_timeout(0.05),
            |_bridge, _args| async move {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(Value::Null)
            },
        );
        registry.register(
            ToolMetadata::new("unapproved", "no approval path", ToolCategory::Memory, vec![], true)
                .with_requires_approval(false),
            |bridge, args| async move { bridge.command("unapproved", args, None).await },
        );
        registry
    }

    fn executor(allow_destructive: bool) -> ToolExecutor {
        ToolExecutor::new(
            Arc::new(registry()),
            Arc::new(EchoBridge),
            ExecutorConfig {
                allow_destructive,
                default_timeout: Duration::from_secs(5),
                max_concurrency: 2,
            },
        )
    }

    fn call(name: &str, params: Value) -> ToolCall {
        let map = params
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        ToolCall::new(name, map)
    }

    #[tokio::test]
    async fn applies_defaults_and_forwards() {
        let result = executor(false)
            .execute(&call("read_memory", json!({"address": "0x401000"})))
            .await;

        assert!(result.success);
        let value = result.result.unwrap();
        assert_eq!(value["params"]["address"], json!(0x401000));
        assert_eq!(value["params"]["size"], json!(16));
    }

    #[tokio::test]
    async fn missing_required_parameter_fails_as_data() {
        let result = executor(false).execute(&call("read_memory", json!({}))).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("address"));
    }

    #[tokio::test]
    async fn destructive_tool_blocked_by_default() {
        let result = executor(false)
            .execute(&call("write_memory", json!({"address": 1})))
            .await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("destructive"));
    }

    #[tokio::test]
    async fn destructive_tool_allowed_when_approved() {
        let result = executor(true)
            .execute(&call("write_memory", json!({"address": 1})))
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn validation_runs_before_the_permission_check() {
        // A blocked tool with bad arguments reports the argument problem.
        let result = executor(false).execute(&call("write_memory", json!({}))).await;
        assert!(!result.success);
        let error = result.error.unwrap();
        assert!(error.contains("address"));
        assert!(!error.contains("destructive"));
    }

    #[tokio::test]
    async fn destructive_tool_without_approval_path_is_always_blocked() {
        // Enabling destructive tools does not help a tool that cannot be
        // approved at all.
        let result = executor(true).execute(&call("unapproved", json!({}))).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("approval"));
    }

    #[tokio::test(start_paused = true)]
    async fn metadata_timeout_applies_when_call_has_none() {
        let result = executor(false).execute(&call("slow_by_default", json!({}))).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("exceeded"));
    }

    #[tokio::test]
    async fn unknown_tool_fails_as_data() {
        let result = executor(false).execute(&call("nonesuch", json!({}))).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("unknown tool"));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_yields_timeout_result() {
        let mut c = call("slow", json!({}));
        c.timeout_secs = Some(0.05);

        let result = executor(false).execute(&c).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("exceeded"));
    }

    #[tokio::test]
    async fn batch_preserves_order_and_survives_failures() {
        let exec = executor(false);
        let calls = vec![
            call("read_memory", json!({"address": 1})),
            call("nonesuch", json!({})),
            call("read_memory", json!({"address": 2})),
        ];

        let results = exec.execute_batch(&calls).await;
        assert_eq!(results.len(), 3);
        assert!(results[0].success);
        assert!(!results[1].success);
        assert!(results[2].success);
    }

    #[tokio::test]
    async fn concurrent_batch_preserves_input_order() {
        let exec = executor(false);
        let calls: Vec<_> = (0..6)
            .map(|i| call("read_memory", json!({"address": i})))
            .collect();

        let results = exec.execute_batch_concurrent(&calls).await;
        for (i, result) in results.iter().enumerate() {
            assert_eq!(
                result.result.as_ref().unwrap()["params"]["address"],
                json!(i)
            );
        }
    }

    #[test]
    fn list_parameter_rejects_scalar() {
        let param = Parameter::required("values", ParamType::List, "scan values");
        assert!(coerce_value(&param, &json!("1,2,3")).is_err());
        assert!(coerce_value(&param, &json!([1, 2, 3])).is_ok());
    }

    #[test]
    fn hex_string_coerces_to_integer() {
        let param = Parameter::required("address", ParamType::Integer, "addr");
        assert_eq!(coerce_value(&param, &json!("0xDEAD")).unwrap(), json!(0xDEAD));
        assert_eq!(coerce_value(&param, &json!("42")).unwrap(), json!(42));
    }
}
