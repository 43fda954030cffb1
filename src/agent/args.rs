//! Rule-based argument derivation for planned tool calls.
//!
//! The planner names tools but not their arguments. This module fills them
//! from, in order: declared defaults, patterns in the user request, stored
//! intermediate results, the execution history, and per-tool fallbacks. A
//! derivation that still misses a required parameter yields an empty map so
//! the executor reports a clean validation failure.

use regex::Regex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::{debug, warn};

use crate::context::ExecutionContext;
use crate::tool::{ParamType, ToolMetadata};

/// Derives arguments for one tool call.
pub fn determine_tool_args(
    metadata: &ToolMetadata,
    context: &ExecutionContext,
) -> HashMap<String, Value> {
    let mut args: HashMap<String, Value> = HashMap::new();

    // 1. Declared defaults.
    for param in &metadata.parameters {
        if let Some(default) = &param.default {
            args.insert(param.name.clone(), default.clone());
        }
    }

    // 2. Patterns in the user request.
    for (name, value) in extract_from_request(&context.request) {
        args.insert(name, value);
    }

    // 3. Stored intermediate results.
    for param in &metadata.parameters {
        if !args.contains_key(&param.name) {
            if let Some(value) = find_in_results(&param.name, context) {
                args.insert(param.name.clone(), value);
            }
        }
    }

    // 4. Inference from the execution history.
    for param in &metadata.parameters {
        if !args.contains_key(&param.name) {
            if let Some(value) = infer_from_history(&param.name, param.param_type, context) {
                args.insert(param.name.clone(), value);
            }
        }
    }

    // 5. Per-tool fallbacks.
    apply_tool_specific(&metadata.name, &mut args, context);

    // 6. Required parameters must all be present now.
    for param in &metadata.parameters {
        if param.required && !args.contains_key(&param.name) {
            warn!(
                tool = %metadata.name,
                parameter = %param.name,
                "could not derive required parameter, skipping call"
            );
            return HashMap::new();
        }
    }

    debug!(tool = %metadata.name, count = args.len(), "derived arguments");
    args
}

fn patterns() -> &'static Vec<(&'static str, Regex, ParamType)> {
    static PATTERNS: OnceLock<Vec<(&'static str, Regex, ParamType)>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        let table: &[(&str, &str, ParamType)] = &[
            (
                "address",
                r"(?:at|address|addr)\s*[:=]?\s*(0x[0-9a-f]+|[0-9a-f]{4,16})\b",
                ParamType::Integer,
            ),
            (
                "base",
                r"(?:base|baddr)\s*[:=]?\s*(0x[0-9a-f]+|[0-9a-f]{4,16})\b",
                ParamType::Integer,
            ),
            (
                "value",
                r"(?:value|scan for|search for)\s*[:=]?\s*([^\s,]+)",
                ParamType::String,
            ),
            ("size", r"(?:size|length)\s*[:=]?\s*(\d+)", ParamType::Integer),
            ("count", r"(?:count|number)\s*[:=]?\s*(\d+)", ParamType::Integer),
            (
                "pattern",
                r"(?:pattern|aob|signature)\s*[:=]?\s*([0-9a-f?]{2}(?:\s+[0-9a-f?]{2}){2,})",
                ParamType::String,
            ),
            (
                "symbol",
                r"(?:symbol|function)\s*[:=]?\s*([a-z_][a-z0-9_.]+)",
                ParamType::String,
            ),
            (
                "string",
                r#"(?:string|text)\s*[:=]?\s*["']([^"']+)["']"#,
                ParamType::String,
            ),
            ("max", r"(?:max|limit)\s*[:=]?\s*(\d+)", ParamType::Integer),
            ("limit", r"(?:max|limit)\s*[:=]?\s*(\d+)", ParamType::Integer),
            ("timeout", r"(?:timeout|wait)\s*[:=]?\s*(\d+)", ParamType::Integer),
            (
                "offsets",
                r"(?:offsets?|off)\s*[:=]?\s*\[([^\]]+)\]",
                ParamType::List,
            ),
        ];
        table
            .iter()
            .map(|(name, pattern, t)| {
                (*name, Regex::new(pattern).expect("static pattern"), *t)
            })
            .collect()
    })
}

fn bare_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\b(\d+)\b").expect("static pattern"))
}

fn quoted_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"["']([^"']+)["']"#).expect("static pattern"))
}

/// Pulls recognizable parameters out of the request text.
fn extract_from_request(request: &str) -> Vec<(String, Value)> {
    let lower = request.to_lowercase();
    let mut out = Vec::new();

    for (name, regex, param_type) in patterns() {
        let Some(capture) = regex.captures(&lower).and_then(|c| c.get(1)) else {
            continue;
        };
        let raw = capture.as_str().trim();

        let value = match param_type {
            ParamType::Integer => match parse_number(raw) {
                Some(n) => Value::from(n),
                None => continue,
            },
            ParamType::List => {
                let parsed: Option<Vec<i64>> =
                    raw.split(',').map(|part| parse_number(part.trim())).collect();
                match parsed {
                    Some(items) => json!(items),
                    None => continue,
                }
            }
            _ => Value::String(raw.to_string()),
        };
        out.push((name.to_string(), value));
    }
    out
}

/// Hex when `0x`-prefixed, when hex letters appear, or when longer than
/// eight digits; decimal otherwise.
fn parse_number(s: &str) -> Option<i64> {
    if let Some(hex) = s.strip_prefix("0x") {
        return i64::from_str_radix(hex, 16).ok();
    }
    if s.chars().any(|c| c.is_ascii_hexdigit() && !c.is_ascii_digit()) || s.len() > 8 {
        return i64::from_str_radix(s, 16).ok();
    }
    s.parse().ok()
}

/// Looks a parameter up in the stored intermediate results: by exact key,
/// inside nested objects, inside the first element of object arrays, and
/// finally by fuzzy key substring.
fn find_in_results(name: &str, context: &ExecutionContext) -> Option<Value> {
    let results = &context.intermediate_results;

    if let Some(value) = results.get(name) {
        return Some(value.clone());
    }

    for value in results.values() {
        match value {
            Value::Object(map) => {
                if let Some(inner) = map.get(name) {
                    return Some(inner.clone());
                }
            }
            Value::Array(items) => {
                if let Some(Value::Object(first)) = items.first() {
                    if let Some(inner) = first.get(name) {
                        return Some(inner.clone());
                    }
                }
            }
            _ => {}
        }
    }

    let lower = name.to_lowercase();
    let mut keys: Vec<_> = results.keys().collect();
    keys.sort();
    keys.iter()
        .find(|key| key.to_lowercase().contains(&lower))
        .map(|key| results[key.as_str()].clone())
}

/// Scans the history newest-first for a plausible value: an exact key, then
/// a value matching the declared type, then the address-list special case.
fn infer_from_history(
    name: &str,
    param_type: ParamType,
    context: &ExecutionContext,
) -> Option<Value> {
    for step in context.history.iter().rev() {
        if !step.result.success {
            continue;
        }
        let Some(Value::Object(map)) = &step.result.result else {
            continue;
        };

        if let Some(value) = map.get(name) {
            return Some(value.clone());
        }

        if name == "address" {
            if let Some(Value::Array(addresses)) = map.get("addresses") {
                if let Some(first) = addresses.first() {
                    return Some(first.clone());
                }
            }
        }

        let typed = map.values().find(|v| match param_type {
            ParamType::Integer => v.is_i64() || v.is_u64(),
            ParamType::String => v.as_str().is_some_and(|s| s.len() < 200),
            ParamType::List => v.is_array(),
            ParamType::Boolean => v.is_boolean(),
        });
        if let Some(value) = typed {
            return Some(value.clone());
        }
    }
    None
}

fn latest_address(context: &ExecutionContext) -> Option<Value> {
    infer_from_history("address", ParamType::Integer, context)
}

fn fill(args: &mut HashMap<String, Value>, name: &str, value: Value) {
    args.entry(name.to_string()).or_insert(value);
}

/// Per-tool fallbacks applied after the generic derivation steps.
fn apply_tool_specific(tool: &str, args: &mut HashMap<String, Value>, context: &ExecutionContext) {
    match tool {
        "scan_all" => {
            if !args.contains_key("value") {
                // Any bare number in the request is the likeliest target.
                let number = bare_number_pattern()
                    .captures(&context.request)
                    .and_then(|c| c.get(1).map(|m| m.as_str().to_string()));
                if let Some(n) = number {
                    args.insert("value".to_string(), Value::String(n));
                }
            }
        }
        "disassemble" => {
            fill_address(args, context);
            fill(args, "count", json!(10));
        }
        "read_memory" => {
            fill_address(args, context);
            fill(args, "size", json!(16));
        }
        "aob_scan" => {
            fill(args, "writable", json!(false));
            fill(args, "executable", json!(true));
        }
        "set_breakpoint" | "analyze_function" | "find_references" => {
            fill_address(args, context);
        }
        "set_data_breakpoint" => {
            fill_address(args, context);
            fill(args, "size", json!(4));
            args.insert("access_type".to_string(), json!("rw"));
        }
        "generate_signature" => {
            fill_address(args, context);
            fill(args, "size", json!(256));
        }
        "checksum_memory" => {
            fill_address(args, context);
            fill(args, "size", json!(4096));
        }
        "get_scan_results" => {
            fill(args, "max", json!(100));
        }
        "get_breakpoint_hits" => {
            fill(args, "timeout", json!(5000));
        }
        "read_string" => {
            fill_address(args, context);
            fill(args, "max_length", json!(256));
        }
        "search_string" => {
            if !args.contains_key("string") {
                let quoted = extract_quoted(&context.request);
                if let Some(text) = quoted {
                    args.insert("string".to_string(), Value::String(text));
                }
            }
            fill(args, "case_sensitive", json!(true));
        }
        "start_dbvm_watch" | "stop_dbvm_watch" => {
            fill_address(args, context);
            if tool == "start_dbvm_watch" {
                fill(args, "size", json!(256));
                fill(args, "access_type", json!("rw"));
            }
        }
        "evaluate_lua" => {
            if !args.contains_key("code") {
                if let Some(code) = extract_fenced(&context.request, "lua")
                    .or_else(|| extract_quoted(&context.request))
                {
                    args.insert("code".to_string(), Value::String(code));
                }
            }
        }
        "auto_assemble" => {
            fill_address(args, context);
            if !args.contains_key("script") {
                if let Some(script) = extract_fenced(&context.request, "asm") {
                    args.insert("script".to_string(), Value::String(script));
                }
            }
        }
        "read_pointer_chain" => {
            if !args.contains_key("base") {
                if let Some(address) = latest_address(context) {
                    args.insert("base".to_string(), address);
                }
            }
        }
        _ => {}
    }
}

fn fill_address(args: &mut HashMap<String, Value>, context: &ExecutionContext) {
    if !args.contains_key("address") {
        if let Some(address) = latest_address(context) {
            args.insert("address".to_string(), address);
        }
    }
}

fn extract_fenced(request: &str, language: &str) -> Option<String> {
    let fence = format!("```{language}");
    let start = request
        .find(&fence)
        .map(|i| i + fence.len())
        .or_else(|| request.find("```").map(|i| i + 3))?;
    let body = &request[start..];
    let end = body.find("```")?;
    let code = body[..end].trim();
    (!code.is_empty()).then(|| code.to_string())
}

fn extract_quoted(request: &str) -> Option<String> {
    quoted_pattern()
        .captures(request)
        .and_then(|c| c.get(1).map(|m| m.as_str().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::{engine_registry, ToolResult};

    fn metadata(name: &str) -> ToolMetadata {
        engine_registry().get(name).unwrap().metadata.clone()
    }

    fn context(request: &str) -> ExecutionContext {
        ExecutionContext::new(request)
    }

    fn context_with_step(request: &str, tool: &str, result: Value) -> ExecutionContext {
        let mut ctx = context(request);
        ctx.add_step("s1", ToolResult::ok(tool, HashMap::new(), result, 0.01));
        ctx
    }

    #[test]
    fn address_extracted_from_request_as_hex() {
        let args = determine_tool_args(
            &metadata("disassemble"),
            &context("disassemble at address 0x401000"),
        );
        assert_eq!(args["address"], json!(0x401000));
        assert_eq!(args["count"], json!(10));
    }

    #[test]
    fn bare_hex_address_with_letters_parses_as_hex() {
        let args = determine_tool_args(
            &metadata("analyze_function"),
            &context("analyze the function at 40a000"),
        );
        assert_eq!(args["address"], json!(0x40a000));
    }

    #[test]
    fn read_memory_falls_back_to_last_address_and_size_16() {
        let ctx = context_with_step(
            "read that memory",
            "scan_all",
            json!({"addresses": [0x5000, 0x6000]}),
        );
        let args = determine_tool_args(&metadata("read_memory"), &ctx);
        assert_eq!(args["address"], json!(0x5000));
        assert_eq!(args["size"], json!(16));
    }

    #[test]
    fn missing_required_parameter_yields_empty_args() {
        // No address anywhere: request, results, or history.
        let args = determine_tool_args(&metadata("disassemble"), &context("just disassemble"));
        assert!(args.is_empty());
    }

    #[test]
    fn scan_all_takes_bare_number_as_value() {
        let args = determine_tool_args(&metadata("scan_all"), &context("look for 100 health"));
        assert_eq!(args["value"], json!("100"));
        // Declared defaults survive.
        assert_eq!(args["type"], json!("exact"));
    }

    #[test]
    fn offsets_list_parses_mixed_radix() {
        let args = determine_tool_args(
            &metadata("read_pointer_chain"),
            &context("follow base 0x400000 offsets [0x10, 24, 0x8]"),
        );
        assert_eq!(args["base"], json!(0x400000));
        assert_eq!(args["offsets"], json!([0x10, 24, 8]));
    }

    #[test]
    fn search_string_pulls_quoted_text() {
        let args = determine_tool_args(
            &metadata("search_string"),
            &context("search for the text \"Game Over\""),
        );
        assert_eq!(args["string"], json!("game over"));
        assert_eq!(args["case_sensitive"], json!(true));
    }

    #[test]
    fn evaluate_lua_prefers_fenced_code() {
        let args = determine_tool_args(
            &metadata("evaluate_lua"),
            &context("run this:\n```lua\nprint(getAddress('game.exe'))\n```"),
        );
        assert_eq!(args["code"], json!("print(getAddress('game.exe'))"));
    }

    #[test]
    fn intermediate_results_fill_nested_values() {
        let mut ctx = context("set a data breakpoint");
        ctx.add_step(
            "s1",
            ToolResult::ok(
                "aob_scan",
                HashMap::new(),
                json!({"address": 0x7000, "pattern": "89 45 fc"}),
                0.01,
            ),
        );
        let args = determine_tool_args(&metadata("set_data_breakpoint"), &ctx);
        assert_eq!(args["address"], json!(0x7000));
        assert_eq!(args["size"], json!(4));
        assert_eq!(args["access_type"], json!("rw"));
    }

    #[test]
    fn data_breakpoint_access_type_overrides_declared_default() {
        let ctx = context_with_step("watch it", "scan_all", json!({"address": 0x1234}));
        let args = determine_tool_args(&metadata("set_data_breakpoint"), &ctx);
        // Declared default is "w"; the derivation chain prefers "rw".
        assert_eq!(args["access_type"], json!("rw"));
    }

    #[test]
    fn size_in_request_beats_tool_fallback() {
        let ctx = context_with_step(
            "read memory size 64 from the scan hit",
            "scan_all",
            json!({"address": 0x2000}),
        );
        let args = determine_tool_args(&metadata("read_memory"), &ctx);
        assert_eq!(args["size"], json!(64));
    }

    #[test]
    fn parse_number_disambiguates() {
        assert_eq!(parse_number("0x10"), Some(16));
        assert_eq!(parse_number("100"), Some(100));
        assert_eq!(parse_number("40a000"), Some(0x40a000));
        assert_eq!(parse_number("123456789"), Some(0x123456789));
        assert_eq!(parse_number("zz"), None);
    }
}
