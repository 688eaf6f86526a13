//! Process-wide counters and latency histograms
//!
//! Label sets are small and bounded (outcomes, error kinds, database names),
//! so a mutex-guarded map is enough; nothing here sits on a per-row hot path.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

/// Latency bucket upper bounds in milliseconds.
const BUCKETS_MS: &[u64] = &[5, 10, 25, 50, 100, 250, 500, 1000, 2500, 5000, 10_000, 30_000];

#[derive(Default)]
struct Histogram {
    buckets: Vec<u64>,
    sum_ms: u64,
    count: u64,
}

impl Histogram {
    fn new() -> Self {
        Self {
            buckets: vec![0; BUCKETS_MS.len()],
            sum_ms: 0,
            count: 0,
        }
    }

    fn observe(&mut self, ms: u64) {
        for (i, bound) in BUCKETS_MS.iter().enumerate() {
            if ms <= *bound {
                self.buckets[i] += 1;
            }
        }
        self.sum_ms += ms;
        self.count += 1;
    }
}

/// Registry of all gateway metrics.
///
/// Keys are `name{label="value",...}` strings in Prometheus label order, so
/// rendering is a straight dump of the maps.
#[derive(Default)]
pub struct Metrics {
    counters: Mutex<BTreeMap<String, u64>>,
    histograms: Mutex<BTreeMap<String, Histogram>>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr_counter(&self, name: &str, labels: &[(&str, &str)]) {
        let key = series_key(name, labels);
        let mut counters = self.counters.lock().expect("metrics counter lock");
        *counters.entry(key).or_insert(0) += 1;
    }

    pub fn observe_ms(&self, name: &str, labels: &[(&str, &str)], ms: u64) {
        let key = series_key(name, labels);
        let mut histograms = self.histograms.lock().expect("metrics histogram lock");
        histograms.entry(key).or_insert_with(Histogram::new).observe(ms);
    }

    // Named helpers for the gateway's metric set.

    pub fn request(&self, outcome: &str) {
        self.incr_counter("nlq_requests_total", &[("outcome", outcome)]);
    }

    pub fn sql_refusal(&self, kind: &str) {
        self.incr_counter("nlq_sql_refusals_total", &[("kind", kind)]);
    }

    pub fn llm_call(&self, op: &str, outcome: &str) {
        self.incr_counter("nlq_llm_calls_total", &[("op", op), ("outcome", outcome)]);
    }

    pub fn pool_acquire(&self, db: &str, outcome: &str) {
        self.incr_counter("nlq_pool_acquires_total", &[("db", db), ("outcome", outcome)]);
    }

    pub fn schema_refresh(&self, db: &str) {
        self.incr_counter("nlq_schema_refresh_total", &[("db", db)]);
    }

    pub fn stage_latency(&self, stage: &str, ms: u64) {
        self.observe_ms("nlq_stage_latency_ms", &[("stage", stage)], ms);
    }

    /// Current value of a counter series, zero if never incremented.
    pub fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        let key = series_key(name, labels);
        let counters = self.counters.lock().expect("metrics counter lock");
        counters.get(&key).copied().unwrap_or(0)
    }

    /// Render every series in Prometheus text exposition format.
    pub fn render_prometheus(&self) -> String {
        let mut out = String::new();

        {
            let counters = self.counters.lock().expect("metrics counter lock");
            for (key, value) in counters.iter() {
                out.push_str(&format!("{key} {value}\n"));
            }
        }

        {
            let histograms = self.histograms.lock().expect("metrics histogram lock");
            for (key, hist) in histograms.iter() {
                let (name, labels) = split_series_key(key);
                for (i, bound) in BUCKETS_MS.iter().enumerate() {
                    out.push_str(&format!(
                        "{name}_bucket{{{labels}le=\"{bound}\"}} {}\n",
                        hist.buckets[i]
                    ));
                }
                out.push_str(&format!(
                    "{name}_bucket{{{labels}le=\"+Inf\"}} {}\n",
                    hist.count
                ));
                out.push_str(&format!("{name}_sum{{{}}} {}\n", labels.trim_end_matches(','), hist.sum_ms));
                out.push_str(&format!("{name}_count{{{}}} {}\n", labels.trim_end_matches(','), hist.count));
            }
        }

        out
    }
}

fn series_key(name: &str, labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", v.replace('"', "'")))
        .collect();
    format!("{name}{{{}}}", rendered.join(","))
}

/// Split `name{labels}` into (`name`, `labels,`) pieces for histogram suffixes.
fn split_series_key(key: &str) -> (&str, String) {
    match key.find('{') {
        Some(i) => {
            let name = &key[..i];
            let labels = &key[i + 1..key.len() - 1];
            if labels.is_empty() {
                (name, String::new())
            } else {
                (name, format!("{labels},"))
            }
        }
        None => (key, String::new()),
    }
}

/// Measures one pipeline stage and records it on drop-free explicit finish.
pub struct StageTimer {
    started: Instant,
}

impl StageTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Record into the given registry and return the elapsed milliseconds.
    pub fn finish(self, metrics: &Metrics, stage: &str) -> u64 {
        let ms = self.elapsed_ms();
        metrics.stage_latency(stage, ms);
        ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_per_label_set() {
        let metrics = Metrics::new();
        metrics.request("success");
        metrics.request("success");
        metrics.request("unsafe_sql");

        assert_eq!(
            metrics.counter_value("nlq_requests_total", &[("outcome", "success")]),
            2
        );
        assert_eq!(
            metrics.counter_value("nlq_requests_total", &[("outcome", "unsafe_sql")]),
            1
        );
    }

    #[test]
    fn prometheus_rendering_includes_series() {
        let metrics = Metrics::new();
        metrics.llm_call("generate_sql", "success");
        metrics.stage_latency("execute", 42);

        let text = metrics.render_prometheus();
        assert!(text.contains("nlq_llm_calls_total{op=\"generate_sql\",outcome=\"success\"} 1"));
        assert!(text.contains("nlq_stage_latency_ms_bucket{stage=\"execute\",le=\"50\"} 1"));
        assert!(text.contains("nlq_stage_latency_ms_count{stage=\"execute\"} 1"));
    }

    #[test]
    fn histogram_buckets_are_cumulative() {
        let metrics = Metrics::new();
        metrics.stage_latency("generate", 3);
        metrics.stage_latency("generate", 80);

        let text = metrics.render_prometheus();
        assert!(text.contains("le=\"5\"} 1"));
        assert!(text.contains("le=\"100\"} 2"));
        assert!(text.contains("le=\"+Inf\"} 2"));
    }
}
