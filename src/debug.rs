use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// JSONL build log with saturating counters. One logger serves a whole
/// engine; events carry their own page context.
#[derive(Clone)]
pub(crate) struct BuildLogger {
    inner: Arc<Mutex<LoggerState>>,
}

struct LoggerState {
    writer: BufWriter<File>,
    counters: HashMap<String, u64>,
}

impl BuildLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(LoggerState {
                writer: BufWriter::new(file),
                counters: HashMap::new(),
            })),
        })
    }

    pub fn event(&self, kind: &str, fields: &[(&str, &str)]) {
        if let Ok(mut state) = self.inner.lock() {
            let mut json = format!("{{\"type\":\"{}\"", json_escape(kind));
            for (key, value) in fields {
                json.push_str(&format!(
                    ",\"{}\":\"{}\"",
                    json_escape(key),
                    json_escape(value)
                ));
            }
            json.push('}');
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn warn(&self, message: &str, fields: &[(&str, &str)]) {
        let mut all = vec![("message", message)];
        all.extend_from_slice(fields);
        self.event("warn", &all);
        self.increment("warnings", 1);
    }

    pub fn span_ms(&self, name: &str, ms: f64) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = writeln!(
                state.writer,
                "{{\"type\":\"span\",\"name\":\"{}\",\"unit\":\"ms\",\"ms\":{:.3}}}",
                json_escape(name),
                ms
            );
        }
    }

    pub fn increment(&self, key: &str, amount: u64) {
        if let Ok(mut state) = self.inner.lock() {
            let entry = state.counters.entry(key.to_string()).or_insert(0);
            *entry = entry.saturating_add(amount);
        }
    }

    pub fn counter(&self, key: &str) -> u64 {
        self.inner
            .lock()
            .map(|state| state.counters.get(key).copied().unwrap_or(0))
            .unwrap_or(0)
    }

    pub fn emit_summary(&self, context: &str) {
        if let Ok(mut state) = self.inner.lock() {
            let mut counters: Vec<(String, u64)> = state.counters.drain().collect();
            counters.sort_by(|a, b| a.0.cmp(&b.0));
            let mut counts = String::from("{");
            for (idx, (key, value)) in counters.iter().enumerate() {
                if idx > 0 {
                    counts.push(',');
                }
                counts.push_str(&format!("\"{}\":{}", json_escape(key), value));
            }
            counts.push('}');
            let _ = writeln!(
                state.writer,
                "{{\"type\":\"summary\",\"context\":\"{}\",\"counts\":{}}}",
                json_escape(context),
                counts
            );
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

pub(crate) fn json_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    for ch in raw.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out
}
