//! The built-in analysis-engine tool table.
//!
//! Every tool forwards its validated arguments to the bridge as a JSON-RPC
//! command of the same name, except `evaluate_lua`, whose wire method is
//! `execute_script` with the code under a `script` key.

use serde_json::{json, Value};

use crate::tool::registry::ToolRegistry;
use crate::tool::types::{ParamType, Parameter, ToolCategory, ToolMetadata};

use ParamType::{Boolean, Integer, List};
use ToolCategory::{Analysis, Dbvm, Debug, Lua, Memory, Pointer, Process, Scan};

fn req(name: &str, t: ParamType, desc: &str) -> Parameter {
    Parameter::required(name, t, desc)
}

fn opt(name: &str, t: ParamType, default: impl Into<Option<Value>>, desc: &str) -> Parameter {
    Parameter::optional(name, t, default, desc)
}

/// Builds a registry holding the full engine tool table.
pub fn engine_registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();

    let mut add = |metadata: ToolMetadata, method: &'static str| {
        registry.register(metadata, move |bridge, args| async move {
            bridge.command(method, args, None).await
        });
    };

    add(
        ToolMetadata::new("ping", "Check that the engine bridge is reachable.", Process, vec![], false),
        "ping",
    );
    add(
        ToolMetadata::new(
            "get_process_info",
            "Describe the currently attached process.",
            Process,
            vec![],
            false,
        ),
        "get_process_info",
    );
    add(
        ToolMetadata::new(
            "enum_modules",
            "List loaded modules with base addresses and sizes.",
            Process,
            vec![],
            false,
        ),
        "enum_modules",
    );
    add(
        ToolMetadata::new(
            "attach_to_process",
            "Attach the engine to a process by name or PID.",
            Process,
            vec![req("identifier", ParamType::String, "Process name or PID")],
            true,
        ),
        "attach_to_process",
    );

    add(
        ToolMetadata::new(
            "read_memory",
            "Read raw bytes from the target process.",
            Memory,
            vec![
                req("address", Integer, "Start address"),
                req("size", Integer, "Number of bytes to read"),
            ],
            false,
        )
        .with_examples(vec!["read_memory address=0x401000 size=16".to_string()]),
        "read_memory",
    );
    add(
        ToolMetadata::new(
            "read_integer",
            "Read a typed integer value from memory.",
            Memory,
            vec![
                req("address", Integer, "Address to read"),
                opt("type", ParamType::String, json!("dword"), "Integer width (byte/word/dword/qword)"),
            ],
            false,
        ),
        "read_integer",
    );
    add(
        ToolMetadata::new(
            "read_string",
            "Read a terminated string from memory.",
            Memory,
            vec![
                req("address", Integer, "Address to read"),
                opt("max_length", Integer, json!(256), "Maximum characters to read"),
                opt("wide", Boolean, json!(false), "Read UTF-16 instead of ASCII"),
            ],
            false,
        ),
        "read_string",
    );
    add(
        ToolMetadata::new(
            "write_memory",
            "Write a value into the target process.",
            Memory,
            vec![
                req("address", Integer, "Address to write"),
                req("value", ParamType::String, "Value to write"),
                opt("type", ParamType::String, json!("dword"), "Value type"),
            ],
            true,
        ),
        "write_memory",
    );
    add(
        ToolMetadata::new(
            "checksum_memory",
            "Checksum a memory range for change detection.",
            Analysis,
            vec![
                req("address", Integer, "Start address"),
                req("size", Integer, "Range size in bytes"),
            ],
            false,
        ),
        "checksum_memory",
    );
    add(
        ToolMetadata::new(
            "read_pointer_chain",
            "Follow a base address through a chain of offsets.",
            Pointer,
            vec![
                req("base", Integer, "Base address of the chain"),
                req("offsets", List, "Offsets applied at each dereference"),
            ],
            false,
        ),
        "read_pointer_chain",
    );

    add(
        ToolMetadata::new(
            "scan_all",
            "Scan all memory for a value.",
            Scan,
            vec![
                req("value", ParamType::String, "Value to search for"),
                opt("type", ParamType::String, json!("exact"), "Scan comparison type"),
                opt("protection", ParamType::String, json!("+W-C"), "Region protection filter"),
            ],
            false,
        )
        .with_examples(vec!["scan_all value=100 type=exact".to_string()])
        .with_timeout(120.0),
        "scan_all",
    );
    add(
        ToolMetadata::new(
            "get_scan_results",
            "Fetch addresses from the last scan.",
            Scan,
            vec![opt("max", Integer, json!(100), "Maximum results to return")],
            false,
        ),
        "get_scan_results",
    );
    add(
        ToolMetadata::new(
            "aob_scan",
            "Scan for an array-of-bytes pattern with wildcards.",
            Scan,
            vec![
                req("pattern", ParamType::String, "Byte pattern, ?? for wildcards"),
                opt("protection", ParamType::String, json!("+X"), "Region protection filter"),
                opt("limit", Integer, json!(100), "Maximum matches"),
            ],
            false,
        )
        .with_examples(vec!["aob_scan pattern=\"89 45 ?? c3\"".to_string()])
        .with_timeout(120.0),
        "aob_scan",
    );
    add(
        ToolMetadata::new(
            "search_string",
            "Search memory for a text string.",
            Scan,
            vec![
                req("string", ParamType::String, "Text to search for"),
                opt("wide", Boolean, json!(false), "Search UTF-16 instead of ASCII"),
                opt("limit", Integer, json!(100), "Maximum matches"),
            ],
            false,
        )
        .with_timeout(120.0),
        "search_string",
    );
    add(
        ToolMetadata::new(
            "generate_signature",
            "Generate a unique byte signature for an address.",
            Scan,
            vec![
                req("address", Integer, "Address to fingerprint"),
                req("size", Integer, "Bytes to include"),
            ],
            false,
        ),
        "generate_signature",
    );

    add(
        ToolMetadata::new(
            "disassemble",
            "Disassemble instructions at an address.",
            Debug,
            vec![
                req("address", Integer, "Start address"),
                opt("count", Integer, json!(10), "Instructions to decode"),
            ],
            false,
        ),
        "disassemble",
    );
    add(
        ToolMetadata::new(
            "analyze_function",
            "Analyze the function containing an address.",
            Analysis,
            vec![req("address", Integer, "Address inside the function")],
            false,
        ),
        "analyze_function",
    );
    add(
        ToolMetadata::new(
            "find_references",
            "Find code references to an address.",
            Debug,
            vec![
                req("address", Integer, "Referenced address"),
                opt("limit", Integer, json!(50), "Maximum references"),
            ],
            false,
        ),
        "find_references",
    );

    add(
        ToolMetadata::new(
            "set_breakpoint",
            "Set an execution breakpoint.",
            Debug,
            vec![
                req("address", Integer, "Breakpoint address"),
                opt("id", ParamType::String, None, "Breakpoint id; engine assigns one if absent"),
                opt("capture_registers", Boolean, json!(true), "Record registers on hit"),
                opt("capture_stack", Boolean, json!(false), "Record a stack snapshot on hit"),
                opt("stack_depth", Integer, json!(16), "Stack entries to capture"),
            ],
            true,
        ),
        "set_breakpoint",
    );
    add(
        ToolMetadata::new(
            "set_data_breakpoint",
            "Set a hardware data breakpoint.",
            Debug,
            vec![
                req("address", Integer, "Watched address"),
                opt("id", ParamType::String, None, "Breakpoint id; engine assigns one if absent"),
                opt("access_type", ParamType::String, json!("w"), "Trigger on r/w/rw access"),
                opt("size", Integer, json!(4), "Watched span in bytes"),
            ],
            true,
        ),
        "set_data_breakpoint",
    );
    add(
        ToolMetadata::new(
            "get_breakpoint_hits",
            "Collect recorded hits for a breakpoint.",
            Debug,
            vec![
                req("id", ParamType::String, "Breakpoint id"),
                opt("clear", Boolean, json!(false), "Clear the hit log after reading"),
            ],
            false,
        ),
        "get_breakpoint_hits",
    );

    add(
        ToolMetadata::new(
            "get_physical_address",
            "Translate a virtual address to physical.",
            Dbvm,
            vec![req("address", Integer, "Virtual address")],
            false,
        ),
        "get_physical_address",
    );
    add(
        ToolMetadata::new(
            "start_dbvm_watch",
            "Start a hypervisor-level memory watch.",
            Dbvm,
            vec![
                req("address", Integer, "Watched address"),
                opt("mode", ParamType::String, json!("w"), "Trigger on r/w/x access"),
                opt("max_entries", Integer, json!(1000), "Hit log capacity"),
            ],
            true,
        ),
        "start_dbvm_watch",
    );
    add(
        ToolMetadata::new(
            "stop_dbvm_watch",
            "Stop a hypervisor-level memory watch.",
            Dbvm,
            vec![req("address", Integer, "Watched address")],
            true,
        ),
        "stop_dbvm_watch",
    );

    add(
        ToolMetadata::new(
            "auto_assemble",
            "Run an auto-assembler script in the engine.",
            Lua,
            vec![req("script", ParamType::String, "Auto-assembler script")],
            true,
        ),
        "auto_assemble",
    );

    // Wire method differs from the tool name here.
    registry.register(
        ToolMetadata::new(
            "evaluate_lua",
            "Execute a Lua snippet inside the engine.",
            Lua,
            vec![req("code", ParamType::String, "Lua code to run")],
            true,
        )
        .with_examples(vec!["evaluate_lua code=\"return getAddress('game.exe')\"".to_string()]),
        |bridge, args| async move {
            let script = args.get("code").cloned().unwrap_or(Value::Null);
            bridge
                .command("execute_script", json!({ "script": script }), None)
                .await
        },
    );

    registry
}
