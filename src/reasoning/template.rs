//! 指令模板：`{key}` 占位符在调用时从状态黑板取值
//!
//! 缺失的键替换为空串（循环第一轮时下游键往往尚未写入）；`{{` / `}}` 输出字面花括号；
//! 花括号内不是合法键名（字母、数字、下划线）时原样保留。

use crate::core::StateStore;

fn is_key(s: &str) -> bool {
    !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn render(template: &str, store: &StateStore) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('{') {
            match tail[1..].find('}') {
                Some(end) if is_key(&tail[1..1 + end]) => {
                    out.push_str(&store.get_text(&tail[1..1 + end]));
                    rest = &tail[end + 2..];
                }
                _ => {
                    out.push('{');
                    rest = &tail[1..];
                }
            }
        } else {
            out.push('}');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// 模板引用的键（去重，按出现顺序）
pub fn placeholders(template: &str) -> Vec<String> {
    let mut keys: Vec<String> = Vec::new();
    let mut rest = template;
    while let Some(pos) = rest.find('{') {
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            rest = &tail[2..];
            continue;
        }
        match tail[1..].find('}') {
            Some(end) if is_key(&tail[1..1 + end]) => {
                let key = &tail[1..1 + end];
                if !keys.iter().any(|k| k == key) {
                    keys.push(key.to_string());
                }
                rest = &tail[end + 2..];
            }
            _ => rest = &tail[1..],
        }
    }
    keys
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_substitutes_and_blanks_missing() {
        let store = StateStore::seeded([("requirement", json!("a todo app"))]);
        let out = render("Req: {requirement}\nResults: {test_results}.", &store);
        assert_eq!(out, "Req: a todo app\nResults: .");
    }

    #[test]
    fn test_render_keeps_escapes_and_non_keys() {
        let store = StateStore::seeded([("n", json!(3))]);
        let out = render("{{\"tool\": \"x\"}} {n} { not a key } }", &store);
        assert_eq!(out, "{\"tool\": \"x\"} 3 { not a key } }");
    }

    #[test]
    fn test_placeholders_in_order_without_duplicates() {
        let keys = placeholders("{current_project} {{skip}} {requirement} {current_project}");
        assert_eq!(keys, vec!["current_project", "requirement"]);
    }
}
