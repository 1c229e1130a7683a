//! Availability listeners.
//!
//! Listeners hear about edges only: the moment a consumer goes from having no
//! usable provider to having one, and back. Each notification runs on its own
//! spawned task so a slow or panicking listener cannot hold up the caller or
//! the other listeners.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

/// Receives availability edges of a consumer.
pub trait ConsumerStateListener: Send + Sync {
    fn on_available(&self, service: &str);

    fn on_unavailable(&self, service: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AvailabilityEvent {
    Available,
    Unavailable,
}

impl fmt::Display for AvailabilityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AvailabilityEvent::Available => f.write_str("available"),
            AvailabilityEvent::Unavailable => f.write_str("unavailable"),
        }
    }
}

/// Listeners of one consumer, shared by the cluster and its connection registry.
///
/// Also holds the last availability published to the listeners, so edges
/// detected from either side are only delivered once.
pub struct ListenerSet {
    service: String,
    listeners: RwLock<Vec<Arc<dyn ConsumerStateListener>>>,
    available: AtomicBool,
}

impl ListenerSet {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            listeners: RwLock::new(Vec::new()),
            available: AtomicBool::new(false),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn add(&self, listener: Arc<dyn ConsumerStateListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Availability as last published.
    pub fn last_published(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Records the current availability and notifies listeners if it differs
    /// from the last published value.
    ///
    /// # Returns
    ///
    /// The event fired, or `None` when availability did not change.
    pub fn publish(&self, available: bool) -> Option<AvailabilityEvent> {
        if self.available.swap(available, Ordering::SeqCst) == available {
            return None;
        }
        let event = if available {
            AvailabilityEvent::Available
        } else {
            AvailabilityEvent::Unavailable
        };
        self.notify(event);
        Some(event)
    }

    /// Fires `event` at every listener, each on its own task.
    pub fn notify(&self, event: AvailabilityEvent) {
        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if listeners.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(service = %self.service, %event, "No runtime to deliver availability notification");
            return;
        };

        debug!(service = %self.service, %event, listeners = listeners.len(), "Notifying listeners");
        for listener in listeners {
            let service = self.service.clone();
            let handle = runtime.spawn(async move {
                match event {
                    AvailabilityEvent::Available => listener.on_available(&service),
                    AvailabilityEvent::Unavailable => listener.on_unavailable(&service),
                }
            });

            let service = self.service.clone();
            runtime.spawn(async move {
                if let Err(e) = handle.await {
                    warn!(service = %service, %event, error = %e, "Availability listener failed");
                }
            });
        }
    }
}

impl fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerSet")
            .field("service", &self.service)
            .field("listeners", &self.len())
            .field("available", &self.last_published())
            .finish()
    }
}
