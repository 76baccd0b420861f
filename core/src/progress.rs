use serde::Serialize;
use std::sync::Arc;

/// One progress dimension. `absolute` tracks the overall operation,
/// `relative` the item currently being worked on.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProgressStep {
    pub current: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<String>,
}

impl ProgressStep {
    pub fn counted(description: impl Into<String>, current: u64, total: u64) -> Self {
        Self {
            current,
            total: Some(total),
            percent: (total > 0).then(|| current as f64 / total as f64 * 100.0),
            description: Some(description.into()),
            payload: None,
        }
    }

    pub fn message(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::default()
        }
    }

    pub fn with_payload(mut self, payload: impl Into<String>) -> Self {
        self.payload = Some(payload.into());
        self
    }
}

/// Payload of every progress callback. May fire many times per
/// operation; handlers must not block.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Progress {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub absolute: Option<ProgressStep>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relative: Option<ProgressStep>,
}

impl Progress {
    pub fn absolute(step: ProgressStep) -> Self {
        Self {
            absolute: Some(step),
            relative: None,
        }
    }

    pub fn relative(step: ProgressStep) -> Self {
        Self {
            absolute: None,
            relative: Some(step),
        }
    }

    pub fn both(absolute: ProgressStep, relative: ProgressStep) -> Self {
        Self {
            absolute: Some(absolute),
            relative: Some(relative),
        }
    }
}

pub type ProgressHandler = Arc<dyn Fn(&Progress) + Send + Sync>;

pub fn noop_progress() -> ProgressHandler {
    Arc::new(|_| {})
}
