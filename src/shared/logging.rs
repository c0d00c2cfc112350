use chrono::{DateTime, SecondsFormat, Utc};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub fn chronos_log_path(state_root: &Path) -> PathBuf {
    state_root.join("logs/chronos.log")
}

pub fn append_log_line(state_root: &Path, line: &str) -> std::io::Result<()> {
    let path = chronos_log_path(state_root);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)?;
    writeln!(file, "{line}")
}

pub fn format_log_line(at: DateTime<Utc>, fields: &[(&str, &str)]) -> String {
    let mut line = format!("ts={}", at.to_rfc3339_opts(SecondsFormat::Millis, true));
    for (key, value) in fields {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&quote_log_value(value));
    }
    line
}

fn quote_log_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|ch| ch.is_whitespace() || ch == '"' || ch == '=');
    if !needs_quotes {
        return value.to_string();
    }
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
