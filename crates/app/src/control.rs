//! In-process control-plane table.
//!
//! Keys hold loosely typed values. Listeners registered with
//! [`ControlPlane::subscribe`] receive the current value right away and then
//! every change, always on the table's dispatcher thread and in the order the
//! changes were made.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Barrier, Mutex, MutexGuard},
};

use crossbeam_channel::{Receiver, Sender, unbounded};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};
use vision::TelemetryPublisher;

use crate::{config::ControlMode, telemetry};

/// A value stored under a control-plane key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ControlValue {
    Number(f64),
    Text(String),
    Boolean(bool),
    Other(Value),
}

impl From<Value> for ControlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Number(n) => match n.as_f64() {
                Some(f) => ControlValue::Number(f),
                None => ControlValue::Other(Value::Number(n)),
            },
            Value::String(s) => ControlValue::Text(s),
            Value::Bool(b) => ControlValue::Boolean(b),
            other => ControlValue::Other(other),
        }
    }
}

impl fmt::Display for ControlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlValue::Number(n) => write!(f, "{n}"),
            ControlValue::Text(s) => write!(f, "{s:?}"),
            ControlValue::Boolean(b) => write!(f, "{b}"),
            ControlValue::Other(v) => write!(f, "{v}"),
        }
    }
}

pub type Listener = Box<dyn FnMut(&ControlValue) + Send>;

/// Key/value signalling between this process and its controller.
pub trait ControlPlane: Send + Sync {
    /// Register `listener` for `key`.
    ///
    /// The current value, if any, is delivered immediately, followed by every
    /// later new or updated value.
    fn subscribe(&self, key: &str, listener: Listener);

    fn get(&self, key: &str) -> Option<ControlValue>;

    fn put(&self, key: &str, value: ControlValue);
}

enum Event {
    Subscribe {
        key: String,
        listener: Listener,
        current: Option<ControlValue>,
    },
    Changed {
        key: String,
        value: ControlValue,
    },
    Flush(Arc<Barrier>),
}

struct TableInner {
    values: Mutex<HashMap<String, ControlValue>>,
    events: Sender<Event>,
}

/// Control-plane table with a single dispatcher thread.
#[derive(Clone)]
pub struct ControlTable {
    inner: Arc<TableInner>,
}

impl ControlTable {
    pub fn start(mode: ControlMode, team: i32) -> anyhow::Result<Self> {
        match mode {
            ControlMode::Server => info!("setting up control table server"),
            ControlMode::Client => info!("setting up control table client for team {team}"),
        }
        let (events, rx) = unbounded();
        telemetry::spawn_thread("control-dispatch", move || dispatch(rx))?;
        Ok(Self {
            inner: Arc::new(TableInner {
                values: Mutex::new(HashMap::new()),
                events,
            }),
        })
    }

    /// Snapshot of every key and its value.
    pub fn entries(&self) -> HashMap<String, ControlValue> {
        self.values().clone()
    }

    /// Block until every event queued before this call has been delivered.
    pub fn flush(&self) {
        let barrier = Arc::new(Barrier::new(2));
        if self.inner.events.send(Event::Flush(barrier.clone())).is_ok() {
            barrier.wait();
        }
    }

    fn values(&self) -> MutexGuard<'_, HashMap<String, ControlValue>> {
        self.inner
            .values
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, event: Event) {
        if self.inner.events.send(event).is_err() {
            debug!("control dispatcher is gone; dropping event");
        }
    }
}

impl ControlPlane for ControlTable {
    fn subscribe(&self, key: &str, listener: Listener) {
        // Reading the value and queueing under the same lock keeps the
        // initial delivery ahead of any later change.
        let values = self.values();
        let current = values.get(key).cloned();
        self.send(Event::Subscribe {
            key: key.to_string(),
            listener,
            current,
        });
    }

    fn get(&self, key: &str) -> Option<ControlValue> {
        self.values().get(key).cloned()
    }

    fn put(&self, key: &str, value: ControlValue) {
        let mut values = self.values();
        if values.get(key) == Some(&value) {
            return;
        }
        values.insert(key.to_string(), value.clone());
        self.send(Event::Changed {
            key: key.to_string(),
            value,
        });
    }
}

impl TelemetryPublisher for ControlTable {
    fn put_number(&self, key: &str, value: f64) {
        self.put(key, ControlValue::Number(value));
    }
}

fn dispatch(rx: Receiver<Event>) {
    let mut listeners: HashMap<String, Vec<Listener>> = HashMap::new();
    for event in rx {
        match event {
            Event::Subscribe {
                key,
                mut listener,
                current,
            } => {
                if let Some(value) = current {
                    listener(&value);
                }
                listeners.entry(key).or_default().push(listener);
            }
            Event::Changed { key, value } => {
                debug!("control key '{key}' = {value}");
                for listener in listeners.get_mut(&key).into_iter().flatten() {
                    listener(&value);
                }
            }
            Event::Flush(barrier) => {
                barrier.wait();
            }
        }
    }
}
