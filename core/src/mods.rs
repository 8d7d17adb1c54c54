//! Mod contract and registry: typed handlers bound to event names, grounded
//! on the plugin lifecycle (`init`/`handle_event`/`shutdown`) and the
//! timeout-guarded dispatch pattern of the capability broker, merged into
//! one registry that keeps handler bindings as an *ordered list per name*
//! rather than a last-writer-wins map.

use crate::error::{CoreError, Result};
use crate::event::{Event, EventResponse};
use async_trait::async_trait;
use dashmap::DashMap;
use opentelemetry::metrics::{Counter, Histogram};
use opentelemetry::{global, KeyValue};
use std::sync::Arc;
use std::time::Duration;

/// A pluggable unit of business logic bound to one or more event-name
/// patterns. Handlers are invoked serially per event; a handler that
/// returns `Err` is converted to a failed [`EventResponse`] without
/// aborting the other handlers bound to the same event.
#[async_trait]
pub trait Mod: Send + Sync {
    /// Stable, dotted mod name, e.g. `openagents.mods.workspace.messaging`.
    fn name(&self) -> &str;

    /// Event names or `prefix.*` patterns this mod wants dispatched to it.
    fn bindings(&self) -> Vec<String>;

    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn handle(&self, event: &Event) -> Result<EventResponse>;

    async fn on_agent_registered(&self, _agent_id: &str) {}

    async fn on_agent_unregistered(&self, _agent_id: &str) {}

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// Per-handler invocation timeout. Mods are expected to do their own work
/// off the hot path; a hung handler shouldn't be able to stall the event
/// that triggered it indefinitely.
const HANDLER_TIMEOUT: Duration = Duration::from_secs(10);

/// True if `pattern` (an exact name or `prefix.*` binding) names, or would
/// prefix-match, one of the seven reserved system event names.
fn binding_is_reserved(pattern: &str) -> bool {
    if let Some(prefix) = pattern.strip_suffix(".*") {
        crate::system_events::RESERVED_NAMES
            .iter()
            .any(|name| *name == prefix || name.starts_with(&format!("{prefix}.")))
    } else {
        crate::system_events::is_reserved(pattern)
    }
}

/// Maps event-name-or-pattern to the ordered list of mods bound to it, and
/// dispatches events to every matching handler, exact bindings before
/// prefix bindings.
pub struct ModRegistry {
    exact: DashMap<String, Vec<Arc<dyn Mod>>>,
    prefixes: DashMap<String, Vec<Arc<dyn Mod>>>,
    prefix_order: std::sync::RwLock<Vec<String>>,
    mods_by_name: DashMap<String, Arc<dyn Mod>>,
    dispatched_counter: Counter<u64>,
    handler_error_counter: Counter<u64>,
    handler_timeout_counter: Counter<u64>,
    dispatch_latency: Histogram<f64>,
}

impl ModRegistry {
    pub fn new() -> Self {
        let meter = global::meter("openagents.mod_registry");
        Self {
            exact: DashMap::new(),
            prefixes: DashMap::new(),
            prefix_order: std::sync::RwLock::new(Vec::new()),
            mods_by_name: DashMap::new(),
            dispatched_counter: meter
                .u64_counter("openagents.mod_registry.dispatched_total")
                .init(),
            handler_error_counter: meter
                .u64_counter("openagents.mod_registry.handler_errors_total")
                .init(),
            handler_timeout_counter: meter
                .u64_counter("openagents.mod_registry.handler_timeouts_total")
                .init(),
            dispatch_latency: meter
                .f64_histogram("openagents.mod_registry.dispatch_latency_ms")
                .init(),
        }
    }

    /// Initializes the mod and binds it to each of its declared patterns.
    /// Later registrations for the same pattern are appended, forming an
    /// ordered list rather than replacing a prior registration.
    ///
    /// Rejects the whole registration (before `initialize` runs) if any
    /// binding names, or would prefix-match, one of the seven reserved
    /// system event names — those are gateway-owned and never mod-dispatched.
    pub async fn register_mod(&self, m: Arc<dyn Mod>) -> Result<()> {
        let bindings = m.bindings();
        if let Some(pattern) = bindings.iter().find(|p| binding_is_reserved(p)) {
            return Err(CoreError::ValidationError(format!(
                "mod '{}' cannot bind to '{pattern}': it names or overlaps a reserved system event",
                m.name()
            )));
        }

        m.initialize().await?;
        self.mods_by_name.insert(m.name().to_string(), Arc::clone(&m));
        for pattern in bindings {
            if let Some(prefix) = pattern.strip_suffix(".*") {
                if !self.prefixes.contains_key(prefix) {
                    self.prefix_order.write().unwrap().push(prefix.to_string());
                }
                self.prefixes
                    .entry(prefix.to_string())
                    .or_default()
                    .push(Arc::clone(&m));
            } else {
                self.exact.entry(pattern).or_default().push(Arc::clone(&m));
            }
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Mod>> {
        self.mods_by_name.get(name).map(|m| Arc::clone(&m))
    }

    pub fn mod_names(&self) -> Vec<String> {
        self.mods_by_name.iter().map(|e| e.key().clone()).collect()
    }

    fn handlers_for(&self, event_name: &str) -> Vec<Arc<dyn Mod>> {
        let mut handlers = self
            .exact
            .get(event_name)
            .map(|v| v.clone())
            .unwrap_or_default();
        for prefix in self.prefix_order.read().unwrap().iter() {
            if event_name == prefix.as_str() || event_name.starts_with(&format!("{prefix}.")) {
                if let Some(bound) = self.prefixes.get(prefix) {
                    handlers.extend(bound.iter().cloned());
                }
            }
        }
        handlers
    }

    /// Invokes every handler bound to `event.event_name`, exact bindings
    /// before prefix bindings, in registration order within each. A
    /// handler that errors or times out contributes a failed response and
    /// does not prevent the remaining handlers from running.
    pub async fn dispatch(&self, event: &Event) -> Vec<EventResponse> {
        let handlers = self.handlers_for(&event.event_name);
        let start = std::time::Instant::now();
        let mut responses = Vec::with_capacity(handlers.len());
        for handler in handlers {
            let label = [KeyValue::new("mod", handler.name().to_string())];
            self.dispatched_counter.add(1, &label);
            let response = match tokio::time::timeout(HANDLER_TIMEOUT, handler.handle(event)).await
            {
                Ok(Ok(response)) => response,
                Ok(Err(err)) => {
                    self.handler_error_counter.add(1, &label);
                    tracing::warn!(mod_name = handler.name(), error = %err, "mod handler failed");
                    EventResponse::fail(format!("{}: {err}", handler.name()))
                }
                Err(_) => {
                    self.handler_timeout_counter.add(1, &label);
                    tracing::warn!(mod_name = handler.name(), "mod handler timed out");
                    EventResponse::fail(format!("{} timed out", handler.name()))
                }
            };
            responses.push(response);
        }
        self.dispatch_latency
            .record(start.elapsed().as_secs_f64() * 1000.0, &[]);
        responses
    }

    pub async fn shutdown(&self) -> Result<()> {
        let mods: Vec<(String, Arc<dyn Mod>)> = self
            .mods_by_name
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();
        for (name, m) in mods {
            if let Err(err) = m.shutdown().await {
                tracing::warn!(mod_name = %name, error = %err, "mod shutdown failed");
            }
        }
        Ok(())
    }

    pub async fn notify_agent_registered(&self, agent_id: &str) {
        let mods: Vec<Arc<dyn Mod>> = self
            .mods_by_name
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for m in mods {
            m.on_agent_registered(agent_id).await;
        }
    }

    pub async fn notify_agent_unregistered(&self, agent_id: &str) {
        let mods: Vec<Arc<dyn Mod>> = self
            .mods_by_name
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        for m in mods {
            m.on_agent_unregistered(agent_id).await;
        }
    }
}

impl Default for ModRegistry {
    fn default() -> Self {
        Self::new()
    }
}
