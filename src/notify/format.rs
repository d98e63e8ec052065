//! Message formatting for Slack status updates

use serde_json::Value;

use super::Details;

/// Lists longer than this are truncated
const MAX_LIST_ITEMS: usize = 5;

/// `records_processed` → `Records Processed`
fn title_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut prev_alpha = false;
    for ch in key.replace('_', " ").chars() {
        if ch.is_alphabetic() {
            if prev_alpha {
                out.extend(ch.to_lowercase());
            } else {
                out.extend(ch.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(ch);
            prev_alpha = false;
        }
    }
    out
}

fn plain(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Array(items) if items.len() > MAX_LIST_ITEMS => {
            let head: Vec<String> = items.iter().take(MAX_LIST_ITEMS).map(plain).collect();
            format!("{}, ... ({} total)", head.join(", "), items.len())
        }
        Value::Array(items) => items.iter().map(plain).collect::<Vec<_>>().join(", "),
        Value::Object(_) => serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string()),
        Value::Number(n) if n.is_f64() => n
            .as_f64()
            .map(|f| format!("{f:.2}"))
            .unwrap_or_else(|| n.to_string()),
        other => plain(other),
    }
}

/// One `• Key: value` line per entry
pub fn format_details(details: &Details) -> String {
    details
        .iter()
        .map(|(key, value)| format!("• {}: {}", title_case(key), format_value(value)))
        .collect::<Vec<_>>()
        .join("\n")
}

/// `42.0s`, `2.5m`, `1.2h`
pub fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{seconds:.1}s")
    } else if seconds < 3600.0 {
        format!("{:.1}m", seconds / 60.0)
    } else {
        format!("{:.1}h", seconds / 3600.0)
    }
}
