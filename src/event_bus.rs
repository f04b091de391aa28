use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};

/// Notices emitted by the form controller. The terminal UI renders them the
/// way a web form would show toasts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Catalog events
    CatalogLoaded {
        count: usize,
    },
    CatalogFallback {
        reason: String,
        count: usize,
    },

    // Form events
    ValidationFailed {
        message: String,
    },
    ModelSelected {
        id: String,
    },

    // Conversion events
    ConversionStarted {
        model: String,
    },
    ConversionSucceeded {
        model: String,
    },
    ConversionFailed {
        message: String,
    },
    SubmitIgnored,

    // Export events
    Copied,
    CopyFailed {
        error: String,
    },
    CopiedReset,
    Downloaded {
        path: String,
    },
    DownloadFailed {
        error: String,
    },
}

impl Event {
    /// Whether the notice should be shown as an error.
    pub fn is_destructive(&self) -> bool {
        matches!(
            self,
            Event::ValidationFailed { .. }
                | Event::ConversionFailed { .. }
                | Event::CopyFailed { .. }
                | Event::DownloadFailed { .. }
        )
    }
}

/// Event bus for component communication
pub struct EventBus {
    sender: broadcast::Sender<Event>,
    metrics: Arc<RwLock<Metrics>>,
}

/// Accumulated counts from events
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Metrics {
    pub conversions_started: usize,
    pub conversions_succeeded: usize,
    pub conversions_failed: usize,
    pub validation_failures: usize,
    pub copies: usize,
    pub downloads: usize,
}

impl EventBus {
    /// Create a new event bus with specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            metrics: Arc::new(RwLock::new(Metrics::default())),
        }
    }

    /// Subscribe to events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Emit an event to all subscribers
    pub async fn emit(&self, event: Event) -> Result<()> {
        self.update_metrics(&event).await;

        // No receivers is fine
        let _ = self.sender.send(event);
        Ok(())
    }

    /// Get current metrics
    pub async fn get_metrics(&self) -> Metrics {
        self.metrics.read().await.clone()
    }

    async fn update_metrics(&self, event: &Event) {
        let mut metrics = self.metrics.write().await;

        match event {
            Event::ConversionStarted { .. } => metrics.conversions_started += 1,
            Event::ConversionSucceeded { .. } => metrics.conversions_succeeded += 1,
            Event::ConversionFailed { .. } => metrics.conversions_failed += 1,
            Event::ValidationFailed { .. } => metrics.validation_failures += 1,
            Event::Copied => metrics.copies += 1,
            Event::Downloaded { .. } => metrics.downloads += 1,
            _ => {}
        }
    }
}

/// Trait for components that can emit events
#[async_trait::async_trait]
pub trait EventEmitter {
    fn set_event_bus(&mut self, bus: Arc<EventBus>);

    async fn emit_event(&self, event: Event) -> Result<()>;
}

/// Helper macro to implement EventEmitter trait
#[macro_export]
macro_rules! impl_event_emitter {
    ($type:ty) => {
        #[async_trait::async_trait]
        impl EventEmitter for $type {
            fn set_event_bus(&mut self, bus: Arc<EventBus>) {
                self.event_bus = Some(bus);
            }

            async fn emit_event(&self, event: Event) -> anyhow::Result<()> {
                if let Some(bus) = &self.event_bus {
                    bus.emit(event).await
                } else {
                    Ok(())
                }
            }
        }
    };
}
