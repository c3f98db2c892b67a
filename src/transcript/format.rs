use serde_json::{Map, Value};

/// Renders a tool invocation as a short human-readable command line.
pub fn format_command(tool: &str, args: Option<&Map<String, Value>>) -> String {
    let Some(args) = args else {
        return tool.to_string();
    };
    let field = |key: &str| args.get(key).and_then(Value::as_str).unwrap_or("");
    let path = || {
        let p = field("file_path");
        if p.is_empty() {
            field("path")
        } else {
            p
        }
    };

    match tool {
        "exec" => format!("exec: {}", field("command")),
        "Read" | "read" => format!("read: {}", path()),
        "Write" | "write" => format!("write: {}", path()),
        "Edit" | "edit" => format!("edit: {}", path()),
        "web_search" => format!("search: {}", field("query")),
        "web_fetch" => format!("fetch: {}", field("url")),
        "browser" => format!("browser: {}", field("action")),
        "message" => {
            let target = field("target");
            if target.is_empty() {
                format!("message: {}", field("action"))
            } else {
                format!("message: {} → {}", field("action"), target)
            }
        }
        _ => args
            .values()
            .filter_map(Value::as_str)
            .find(|s| s.chars().count() < 100)
            .map(|s| format!("{}: {}", tool, s))
            .unwrap_or_else(|| tool.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        v.as_object().unwrap().clone()
    }

    #[test]
    fn test_known_tools() {
        assert_eq!(
            format_command("exec", Some(&args(json!({"command": "ls -la"})))),
            "exec: ls -la"
        );
        assert_eq!(
            format_command("Read", Some(&args(json!({"path": "/tmp/a"})))),
            "read: /tmp/a"
        );
        assert_eq!(
            format_command("edit", Some(&args(json!({"file_path": "x.rs", "path": "y.rs"})))),
            "edit: x.rs"
        );
        assert_eq!(
            format_command("web_search", Some(&args(json!({"query": "rust"})))),
            "search: rust"
        );
    }

    #[test]
    fn test_message_tool_with_and_without_target() {
        assert_eq!(
            format_command("message", Some(&args(json!({"action": "send", "target": "forge"})))),
            "message: send → forge"
        );
        assert_eq!(
            format_command("message", Some(&args(json!({"action": "poll"})))),
            "message: poll"
        );
    }

    #[test]
    fn test_unknown_tool_fallbacks() {
        let long = "z".repeat(150);
        assert_eq!(
            format_command("grep", Some(&args(json!({"pattern": long.clone(), "dir": "src", "n": 3})))),
            "grep: src"
        );
        assert_eq!(
            format_command("grep", Some(&args(json!({"pattern": long})))),
            "grep"
        );
        assert_eq!(format_command("grep", None), "grep");
    }
}
