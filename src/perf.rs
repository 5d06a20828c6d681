use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

/// JSONL timing log. One line per span or counter set; a ranked `_hot.log`
/// summary is written next to it when the last handle is dropped.
#[derive(Clone)]
pub(crate) struct PerfLogger {
    inner: Arc<Mutex<PerfState>>,
}

struct PerfState {
    writer: BufWriter<File>,
    path: PathBuf,
    span_totals: HashMap<String, f64>,
    span_counts: HashMap<String, u64>,
    count_totals: HashMap<String, u64>,
}

impl PerfLogger {
    pub fn new(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::create(&path)?;
        Ok(Self {
            inner: Arc::new(Mutex::new(PerfState {
                writer: BufWriter::new(file),
                path,
                span_totals: HashMap::new(),
                span_counts: HashMap::new(),
                count_totals: HashMap::new(),
            })),
        })
    }

    pub fn log_span_ms(&self, name: &str, render_id: u64, ms: f64) {
        let json = format!(
            "{{\"type\":\"perf.span\",\"name\":\"{}\",\"render_id\":{},\"unit\":\"ms\",\"ms\":{:.3}}}",
            json_escape(name),
            render_id,
            ms
        );
        if let Ok(mut state) = self.inner.lock() {
            *state.span_totals.entry(name.to_string()).or_insert(0.0) += ms;
            let entry = state.span_counts.entry(name.to_string()).or_insert(0);
            *entry = entry.saturating_add(1);
            let _ = writeln!(state.writer, "{json}");
        }
    }

    pub fn log_counts(&self, name: &str, render_id: u64, counts: &[(&str, u64)]) {
        let mut out = format!(
            "{{\"type\":\"perf.counts\",\"name\":\"{}\",\"render_id\":{},\"counts\":{{",
            json_escape(name),
            render_id
        );
        for (idx, (key, value)) in counts.iter().enumerate() {
            if idx > 0 {
                out.push(',');
            }
            out.push_str(&format!("\"{}\":{}", json_escape(key), value));
        }
        out.push_str("}}");
        if let Ok(mut state) = self.inner.lock() {
            for (key, value) in counts {
                let full_key = format!("{name}.{key}");
                let entry = state.count_totals.entry(full_key).or_insert(0);
                *entry = entry.saturating_add(*value);
            }
            let _ = writeln!(state.writer, "{out}");
        }
    }

    pub fn flush(&self) {
        if let Ok(mut state) = self.inner.lock() {
            let _ = state.writer.flush();
        }
    }
}

/// Measures one stage. `finish` returns the elapsed milliseconds and logs
/// them when a logger is attached.
pub(crate) struct Span<'a> {
    name: &'static str,
    render_id: u64,
    started: Instant,
    logger: Option<&'a PerfLogger>,
}

impl<'a> Span<'a> {
    pub fn start(name: &'static str, render_id: u64, logger: Option<&'a PerfLogger>) -> Self {
        Self {
            name,
            render_id,
            started: Instant::now(),
            logger,
        }
    }

    pub fn finish(self) -> f64 {
        let ms = self.started.elapsed().as_secs_f64() * 1000.0;
        if let Some(logger) = self.logger {
            logger.log_span_ms(self.name, self.render_id, ms);
        }
        ms
    }
}

impl Drop for PerfState {
    fn drop(&mut self) {
        let _ = self.writer.flush();
        let hot_path = hot_path_for(&self.path);
        let Ok(file) = File::create(&hot_path) else {
            return;
        };
        let mut writer = BufWriter::new(file);

        let mut spans: Vec<(&String, &f64)> = self.span_totals.iter().collect();
        spans.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
        for (rank, (name, ms)) in spans.into_iter().enumerate() {
            let count = *self.span_counts.get(name).unwrap_or(&1);
            let avg = if count == 0 { 0.0 } else { ms / count as f64 };
            let _ = writeln!(
                writer,
                "{{\"type\":\"perf.hot.span\",\"rank\":{},\"name\":\"{}\",\"unit\":\"ms\",\"agg\":\"sum\",\"ms\":{:.3},\"count\":{},\"avg_ms\":{:.3}}}",
                rank + 1,
                json_escape(name),
                ms,
                count,
                avg
            );
        }

        let mut counts: Vec<(&String, &u64)> = self.count_totals.iter().collect();
        counts.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (rank, (name, value)) in counts.into_iter().enumerate() {
            let _ = writeln!(
                writer,
                "{{\"type\":\"perf.hot.count\",\"rank\":{},\"name\":\"{}\",\"value\":{}}}",
                rank + 1,
                json_escape(name),
                value
            );
        }
    }
}

fn hot_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("mdcard_perf.log");
    let stem = file_name
        .rsplit_once('.')
        .map(|(s, _)| s)
        .unwrap_or(file_name);
    path.with_file_name(format!("{stem}_hot.log"))
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn escapes_quotes_and_control_characters() {
        assert_eq!(json_escape("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }

    #[test]
    fn hot_log_sits_next_to_the_main_log() {
        assert_eq!(
            hot_path_for(Path::new("/tmp/run.jsonl")),
            PathBuf::from("/tmp/run_hot.log")
        );
    }

    #[test]
    fn spans_and_counts_are_written_and_summarized() {
        let dir = std::env::temp_dir().join(format!("mdcard-perf-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("temp dir");
        let path = dir.join("perf.log");
        {
            let logger = PerfLogger::new(&path).expect("create log");
            logger.log_span_ms("layout", 1, 2.5);
            logger.log_span_ms("layout", 2, 1.5);
            logger.log_counts("render", 2, &[("lines", 12), ("emoji_fallbacks", 1)]);
            Span::start("raster", 2, Some(&logger)).finish();
            logger.flush();
        }
        let main = fs::read_to_string(&path).expect("main log");
        assert_eq!(main.lines().count(), 4);
        assert!(main.contains("\"name\":\"layout\",\"render_id\":2"));
        assert!(main.contains("\"counts\":{\"lines\":12,\"emoji_fallbacks\":1}"));

        let hot = fs::read_to_string(dir.join("perf_hot.log")).expect("hot log");
        assert!(hot.contains("\"name\":\"layout\",\"unit\":\"ms\",\"agg\":\"sum\",\"ms\":4.000,\"count\":2"));
        assert!(hot.contains("\"name\":\"render.lines\",\"value\":12"));
        let _ = fs::remove_dir_all(dir);
    }
}
