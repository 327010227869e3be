//! Telemetry and notification publishing
//!
//! Two subscriber kinds, always invoked synchronously and in this order for
//! each applied experiment:
//! 1. [`TelemetrySink::record`] with the configured telemetry event name
//! 2. [`NotificationSink::dispatch`] with the configured DOM event name
//!
//! The engine publishes before any navigation triggered by the same pass.

use crate::page::ElementRef;
use serde::Serialize;
use std::sync::Arc;

/// Telemetry payload: which experiment served which variant
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TelemetryPayload {
    /// Experiment id
    pub source: String,
    /// Served variant id
    pub target: String,
}

/// Detail of the DOM-visible notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExperimentationEvent {
    /// Always `experiment`
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Element the experiment was applied to
    pub element: ElementRef,
    /// Experiment id
    pub experiment: String,
    /// Served variant id
    pub variant: String,
    /// Whether the event bubbles
    #[serde(skip)]
    pub bubbles: bool,
}

impl ExperimentationEvent {
    /// Create bubbling experiment event
    #[must_use]
    pub fn new(element: ElementRef, experiment: impl Into<String>, variant: impl Into<String>) -> Self {
        Self {
            kind: "experiment",
            element,
            experiment: experiment.into(),
            variant: variant.into(),
            bubbles: true,
        }
    }
}

/// Receiver of analytics calls
pub trait TelemetrySink: Send + Sync {
    /// Record `event` with `payload`
    fn record(&self, event: &str, payload: &TelemetryPayload);
}

/// Receiver of DOM-visible notifications
pub trait NotificationSink: Send + Sync {
    /// Dispatch the event named `name`
    fn dispatch(&self, name: &str, event: &ExperimentationEvent);
}

/// Ordered fan-out to telemetry and notification subscribers
#[derive(Clone, Default)]
pub struct EventBus {
    telemetry_event: String,
    dom_event: String,
    telemetry: Vec<Arc<dyn TelemetrySink>>,
    notifications: Vec<Arc<dyn NotificationSink>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("telemetry_event", &self.telemetry_event)
            .field("dom_event", &self.dom_event)
            .field("telemetry", &self.telemetry.len())
            .field("notifications", &self.notifications.len())
            .finish()
    }
}

impl EventBus {
    /// Create bus with event names and no subscribers
    #[must_use]
    pub fn new(telemetry_event: impl Into<String>, dom_event: impl Into<String>) -> Self {
        Self {
            telemetry_event: telemetry_event.into(),
            dom_event: dom_event.into(),
            telemetry: Vec::new(),
            notifications: Vec::new(),
        }
    }

    /// Subscribe a telemetry sink
    pub fn subscribe_telemetry(&mut self, sink: Arc<dyn TelemetrySink>) {
        self.telemetry.push(sink);
    }

    /// Subscribe a notification sink
    pub fn subscribe_notifications(&mut self, sink: Arc<dyn NotificationSink>) {
        self.notifications.push(sink);
    }

    /// Publish one applied experiment
    pub fn publish(&self, element: &ElementRef, experiment: &str, variant: &str) {
        let payload = TelemetryPayload {
            source: experiment.to_string(),
            target: variant.to_string(),
        };
        for sink in &self.telemetry {
            sink.record(&self.telemetry_event, &payload);
        }

        let event = ExperimentationEvent::new(element.clone(), experiment, variant);
        for sink in &self.notifications {
            sink.dispatch(&self.dom_event, &event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::{mock, Sequence};

    mock! {
        Telemetry {}
        impl TelemetrySink for Telemetry {
            fn record(&self, event: &str, payload: &TelemetryPayload);
        }
    }

    mock! {
        Notifications {}
        impl NotificationSink for Notifications {
            fn dispatch(&self, name: &str, event: &ExperimentationEvent);
        }
    }

    #[test]
    fn telemetry_precedes_notification() {
        let mut seq = Sequence::new();
        let mut telemetry = MockTelemetry::new();
        let mut notifications = MockNotifications::new();

        telemetry
            .expect_record()
            .withf(|event, payload| {
                event == "experiment" && payload.source == "foo" && payload.target == "challenger-1"
            })
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());
        notifications
            .expect_dispatch()
            .withf(|name, event| {
                name == "aem:experimentation"
                    && event.element == ElementRef::Section(1)
                    && event.variant == "challenger-1"
                    && event.bubbles
            })
            .times(1)
            .in_sequence(&mut seq)
            .return_const(());

        let mut bus = EventBus::new("experiment", "aem:experimentation");
        bus.subscribe_notifications(Arc::new(notifications));
        bus.subscribe_telemetry(Arc::new(telemetry));
        bus.publish(&ElementRef::Section(1), "foo", "challenger-1");
    }

    #[test]
    fn event_detail_shape() {
        let event = ExperimentationEvent::new(ElementRef::Body, "foo", "control");
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({
                "type": "experiment",
                "element": "body",
                "experiment": "foo",
                "variant": "control",
            })
        );
    }

    #[test]
    fn bus_without_subscribers_is_silent() {
        EventBus::new("experiment", "aem:experimentation").publish(&ElementRef::Body, "foo", "control");
    }
}
