use crate::*;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

pub const DURATION_BUCKETS_SECONDS: [f64; 4] = [0.5, 1.5, 2.5, 3.5];

/// Progress of the one-time counter restoration after a restart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MetricsInitState {
    Uninitialized,
    Retrying(u32),
    Initialized,
    GaveUp,
}

/// Last known labelled counter values, keyed by label value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub commands: HashMap<String, u64>,
    pub messages: HashMap<String, u64>,
    pub buttons: HashMap<String, u64>,
    pub callbacks: HashMap<String, u64>,
    pub errors: HashMap<String, u64>,
}

struct CounterVec {
    name: &'static str,
    help: &'static str,
    label: &'static str,
    values: parking_lot::Mutex<BTreeMap<String, u64>>,
}

impl CounterVec {
    fn new(name: &'static str, help: &'static str, label: &'static str) -> Self {
        CounterVec {
            name,
            help,
            label,
            values: parking_lot::Mutex::new(BTreeMap::new()),
        }
    }

    fn add(&self, label_value: &str, count: u64) {
        *self.values.lock().entry(label_value.to_string()).or_default() += count;
    }

    fn get(&self, label_value: &str) -> u64 {
        self.values.lock().get(label_value).copied().unwrap_or(0)
    }

    fn render(&self, body: &mut String) {
        body.push_str(&format!("# HELP {} {}\n# TYPE {} counter\n", self.name, self.help, self.name));
        for (label_value, count) in self.values.lock().iter() {
            body.push_str(&format!(
                "{}{{{}=\"{}\"}} {}\n",
                self.name,
                self.label,
                escape_label(label_value),
                count
            ));
        }
    }
}

struct Counter {
    name: &'static str,
    help: &'static str,
    value: AtomicU64,
}

impl Counter {
    fn new(name: &'static str, help: &'static str) -> Self {
        Counter {
            name,
            help,
            value: AtomicU64::new(0),
        }
    }

    fn render(&self, body: &mut String) {
        body.push_str(&format!(
            "# HELP {} {}\n# TYPE {} counter\n{} {}\n",
            self.name,
            self.help,
            self.name,
            self.name,
            self.value.load(Ordering::Relaxed)
        ));
    }
}

#[derive(Default)]
struct HistogramData {
    buckets: [u64; DURATION_BUCKETS_SECONDS.len()],
    sum_seconds: f64,
    count: u64,
}

struct Histogram {
    name: &'static str,
    help: &'static str,
    data: parking_lot::Mutex<HistogramData>,
}

impl Histogram {
    fn new(name: &'static str, help: &'static str) -> Self {
        Histogram {
            name,
            help,
            data: parking_lot::Mutex::new(HistogramData::default()),
        }
    }

    fn observe(&self, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        let mut data = self.data.lock();
        for (i, bound) in DURATION_BUCKETS_SECONDS.iter().enumerate() {
            if seconds <= *bound {
                data.buckets[i] += 1;
            }
        }
        data.sum_seconds += seconds;
        data.count += 1;
    }

    fn count(&self) -> u64 {
        self.data.lock().count
    }

    fn render(&self, body: &mut String) {
        let data = self.data.lock();
        body.push_str(&format!("# HELP {} {}\n# TYPE {} histogram\n", self.name, self.help, self.name));
        for (i, bound) in DURATION_BUCKETS_SECONDS.iter().enumerate() {
            body.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", self.name, bound, data.buckets[i]));
        }
        body.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", self.name, data.count));
        body.push_str(&format!("{}_sum {:.9}\n", self.name, data.sum_seconds));
        body.push_str(&format!("{}_count {}\n", self.name, data.count));
    }
}

fn escape_label(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

/// Bot counters and latency histograms, rendered in the Prometheus text
/// exposition format.
pub struct Metrics {
    commands: CounterVec,
    messages: CounterVec,
    buttons: CounterVec,
    callbacks: CounterVec,
    errors: CounterVec,
    expenses_created: Counter,
    categories_created: Counter,
    transcription_duration: Histogram,
    llm_parse_duration: Histogram,
    init_state: parking_lot::Mutex<MetricsInitState>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            commands: CounterVec::new(
                "telegram_commands_processed_total",
                "Total number of processed commands by type",
                "command",
            ),
            messages: CounterVec::new(
                "telegram_messages_processed_total",
                "Total number of processed messages by type",
                "type",
            ),
            buttons: CounterVec::new(
                "telegram_buttons_pressed_total",
                "Total number of button presses by type",
                "button",
            ),
            callbacks: CounterVec::new(
                "telegram_callbacks_processed_total",
                "Total number of processed callback queries by action",
                "action",
            ),
            errors: CounterVec::new("telegram_errors_total", "Total number of errors by type", "type"),
            expenses_created: Counter::new("telegram_expenses_created_total", "Total number of expenses created"),
            categories_created: Counter::new(
                "telegram_categories_created_total",
                "Total number of categories created",
            ),
            transcription_duration: Histogram::new(
                "telegram_transcription_duration_seconds",
                "Duration of voice transcription in seconds",
            ),
            llm_parse_duration: Histogram::new(
                "telegram_llm_parse_duration_seconds",
                "Duration of LLM expense parsing in seconds",
            ),
            init_state: parking_lot::Mutex::new(MetricsInitState::Uninitialized),
        }
    }

    pub fn command(&self, command: &str) {
        self.commands.add(command, 1);
    }

    pub fn message(&self, kind: &str) {
        self.messages.add(kind, 1);
    }

    pub fn button(&self, button: &str) {
        self.buttons.add(button, 1);
    }

    pub fn callback(&self, action: &str) {
        self.callbacks.add(action, 1);
    }

    pub fn error(&self, kind: &str) {
        self.errors.add(kind, 1);
    }

    pub fn expense_created(&self) {
        self.expenses_created.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn category_created(&self) {
        self.categories_created.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn observe_transcription(&self, elapsed: Duration) {
        self.transcription_duration.observe(elapsed);
    }

    pub fn observe_llm_parse(&self, elapsed: Duration) {
        self.llm_parse_duration.observe(elapsed);
    }

    pub fn command_count(&self, command: &str) -> u64 {
        self.commands.get(command)
    }

    pub fn message_count(&self, kind: &str) -> u64 {
        self.messages.get(kind)
    }

    pub fn button_count(&self, button: &str) -> u64 {
        self.buttons.get(button)
    }

    pub fn callback_count(&self, action: &str) -> u64 {
        self.callbacks.get(action)
    }

    pub fn error_count(&self, kind: &str) -> u64 {
        self.errors.get(kind)
    }

    pub fn expenses_created(&self) -> u64 {
        self.expenses_created.value.load(Ordering::Relaxed)
    }

    pub fn categories_created(&self) -> u64 {
        self.categories_created.value.load(Ordering::Relaxed)
    }

    pub fn transcription_count(&self) -> u64 {
        self.transcription_duration.count()
    }

    pub fn llm_parse_count(&self) -> u64 {
        self.llm_parse_duration.count()
    }

    /// Adds row counts from the store to the created-entity counters.
    pub fn seed_from_store(&self, expenses: u64, categories: u64) {
        self.expenses_created.value.fetch_add(expenses, Ordering::Relaxed);
        self.categories_created.value.fetch_add(categories, Ordering::Relaxed);
        info!("Metrics seeded from store: {} expenses, {} categories", expenses, categories);
    }

    pub fn init_state(&self) -> MetricsInitState {
        *self.init_state.lock()
    }

    pub fn set_init_state(&self, state: MetricsInitState) {
        *self.init_state.lock() = state;
    }

    /// Adds restored values to the labelled counters. Returns `false` and
    /// leaves the counters untouched if a snapshot was already applied.
    pub fn apply_snapshot(&self, snapshot: &MetricsSnapshot) -> bool {
        let mut state = self.init_state.lock();
        if *state == MetricsInitState::Initialized {
            return false;
        }

        let families = [
            (&self.commands, &snapshot.commands),
            (&self.messages, &snapshot.messages),
            (&self.buttons, &snapshot.buttons),
            (&self.callbacks, &snapshot.callbacks),
            (&self.errors, &snapshot.errors),
        ];
        for (family, values) in families {
            for (label_value, count) in values {
                family.add(label_value, *count);
            }
        }

        *state = MetricsInitState::Initialized;
        info!(
            "Metrics restored: {} commands, {} messages, {} buttons, {} callbacks, {} errors",
            snapshot.commands.len(),
            snapshot.messages.len(),
            snapshot.buttons.len(),
            snapshot.callbacks.len(),
            snapshot.errors.len()
        );
        true
    }

    pub fn render(&self) -> String {
        let mut body = String::new();
        self.commands.render(&mut body);
        self.messages.render(&mut body);
        self.buttons.render(&mut body);
        self.callbacks.render(&mut body);
        self.expenses_created.render(&mut body);
        self.categories_created.render(&mut body);
        self.errors.render(&mut body);
        self.transcription_duration.render(&mut body);
        self.llm_parse_duration.render(&mut body);
        body
    }
}
