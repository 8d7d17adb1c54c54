//! Reserved system event names, answered by the gateway itself rather than
//! by any pluggable mod — registration/unregistration notices plus the
//! diagnostic listing queries.

use crate::event::{Event, EventResponse};
use crate::gateway::EventGateway;
use crate::value::{Value, ValueMap};

pub const AGENT_REGISTER: &str = "system.agent.register";
pub const AGENT_UNREGISTER: &str = "system.agent.unregister";
pub const AGENT_REGISTERED: &str = "system.agent.registered";
pub const AGENT_UNREGISTERED: &str = "system.agent.unregistered";
pub const CHANNEL_LIST: &str = "system.channel.list";
pub const MOD_LIST: &str = "system.mod.list";
pub const MOD_MANIFEST: &str = "system.mod.manifest";

/// The seven names the gateway owns outright. No mod may bind to any of
/// these, and nothing here is ever routed through [`crate::mods::ModRegistry`].
pub const RESERVED_NAMES: [&str; 7] = [
    AGENT_REGISTER,
    AGENT_UNREGISTER,
    AGENT_REGISTERED,
    AGENT_UNREGISTERED,
    CHANNEL_LIST,
    MOD_LIST,
    MOD_MANIFEST,
];

/// True if `name` is one of the seven gateway-owned names.
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Answers the reserved query events directly from registry state. Returns
/// `None` for anything that isn't a reserved name the gateway owns, so the
/// caller falls through to normal mod dispatch.
pub fn reserved_response(gateway: &EventGateway, event: &Event) -> Option<EventResponse> {
    match event.event_name.as_str() {
        // Registration happens through `EventGateway::register_agent` /
        // `unregister_agent` directly, never by emitting an event — these
        // names are reserved so no mod can shadow them, but emitting one
        // is rejected rather than silently accepted.
        AGENT_REGISTER | AGENT_UNREGISTER => Some(EventResponse::fail(
            "agent registration happens via EventGateway::register_agent/unregister_agent, not by emitting this event",
        )),
        CHANNEL_LIST => {
            let channels: Vec<Value> = gateway
                .channels
                .list_channels()
                .into_iter()
                .map(Value::from)
                .collect();
            let mut data = ValueMap::new();
            data.insert("channels".to_string(), Value::List(channels));
            Some(EventResponse::ok_with_data("channel list", data))
        }
        MOD_LIST => {
            let mods: Vec<Value> = gateway.mods.mod_names().into_iter().map(Value::from).collect();
            let mut data = ValueMap::new();
            data.insert("mods".to_string(), Value::List(mods));
            Some(EventResponse::ok_with_data("mod list", data))
        }
        MOD_MANIFEST => {
            let requested = event.payload.get("mod_name").and_then(Value::as_str);
            match requested.and_then(|name| gateway.mods.get(name)) {
                Some(m) => {
                    let mut data = ValueMap::new();
                    data.insert("name".to_string(), Value::from(m.name().to_string()));
                    data.insert(
                        "bindings".to_string(),
                        Value::List(m.bindings().into_iter().map(Value::from).collect()),
                    );
                    Some(EventResponse::ok_with_data("mod manifest", data))
                }
                None => Some(EventResponse::fail("unknown mod")),
            }
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::value::ValueMap;
    use std::time::Duration;

    #[tokio::test]
    async fn channel_list_reflects_registry_state() {
        let gw = EventGateway::new(NetworkConfig::default());
        gw.channels.add_member("#general", "agent:a");
        gw.register_agent("agent:a", ValueMap::new(), None, false).await.unwrap();

        let event = Event::builder(CHANNEL_LIST, "agent:a")
            .visibility(crate::event::Visibility::Network)
            .requires_response(true)
            .build()
            .unwrap();
        let response = gw.emit(event, Duration::from_secs(1)).await.unwrap();
        assert!(response.success);
        let channels = response.data.get("channels").unwrap().as_list().unwrap();
        assert_eq!(channels.len(), 1);
    }
}
