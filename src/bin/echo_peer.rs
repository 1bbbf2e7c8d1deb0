//! 最小工具服务器：stdin 按行读 JSON-RPC 请求，stdout 按行写响应
//!
//! 用于集成测试与本地试跑 `--mcp-server`：
//! - `tools/list` 返回 `--tools` 指定的工具
//! - `tools/call` 返回 `{content: [{type: "text", text: "<label>:<tool>:<arguments>"}]}`
//! - `--noise` 在每个响应前插入一条通知与一条 id 不匹配的响应
//! - `--mute-calls` 对 `tools/call` 不作回应（用于超时测试）

use std::io::{self, BufRead, Write};

use clap::Parser;
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "trainwreck-echo-peer")]
struct Args {
    #[arg(long, default_value = "echo")]
    label: String,

    /// 逗号分隔的工具名
    #[arg(long, default_value = "echo", value_delimiter = ',')]
    tools: Vec<String>,

    #[arg(long)]
    noise: bool,

    #[arg(long)]
    mute_calls: bool,
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();

    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let request: Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                eprintln!("ignoring malformed request: {}", e);
                continue;
            }
        };
        let id = request.get("id").cloned().unwrap_or(Value::Null);
        let method = request.get("method").and_then(Value::as_str).unwrap_or_default();

        let response = match method {
            "tools/list" => {
                let tools: Vec<Value> = args
                    .tools
                    .iter()
                    .map(|name| json!({ "name": name, "description": format!("{} from {}", name, args.label) }))
                    .collect();
                json!({ "jsonrpc": "2.0", "id": id, "result": { "tools": tools } })
            }
            "tools/call" => {
                if args.mute_calls {
                    continue;
                }
                let params = request.get("params").cloned().unwrap_or(Value::Null);
                let tool = params.get("name").and_then(Value::as_str).unwrap_or_default();
                if !args.tools.iter().any(|t| t == tool) {
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "error": { "code": -32602, "message": format!("unknown tool: {}", tool) }
                    })
                } else {
                    let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
                    let text = format!("{}:{}:{}", args.label, tool, arguments);
                    json!({
                        "jsonrpc": "2.0",
                        "id": id,
                        "result": { "content": [{ "type": "text", "text": text }] }
                    })
                }
            }
            other => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("method not found: {}", other) }
            }),
        };

        if args.noise {
            writeln!(stdout, "{}", json!({ "jsonrpc": "2.0", "method": "notifications/progress", "params": {} }))?;
            writeln!(stdout, "{}", json!({ "jsonrpc": "2.0", "id": 999_999, "result": { "stale": true } }))?;
        }
        writeln!(stdout, "{}", response)?;
        stdout.flush()?;
    }
    Ok(())
}
