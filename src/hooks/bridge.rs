// Heartbeat -> Hook event bridge: remaps a heartbeat event kind onto the
// hook event kind it should be re-published as.

use crate::model::{EventContext, EventKind};

/// Maps a heartbeat-originated event kind onto the hook event kind it
/// should be re-published as, per the required table. Event kinds outside
/// the table pass through unchanged, which also covers the common case
/// where the heartbeat and hook vocabularies already agree (e.g.
/// `ProviderRecovered`).
fn mapped_kind(kind: EventKind) -> EventKind {
    match kind {
        EventKind::QuotaCritical => EventKind::QuotaExceeded,
        other => other,
    }
}

/// Re-publishes a heartbeat event onto `bus` under its bridged hook event
/// kind. Called by the heartbeat monitor (or whatever wires it to the
/// event bus) for every event it raises.
pub fn bridge_heartbeat_event(bus: &super::EventBus, event: EventContext) {
    let kind = mapped_kind(event.event);
    if kind == event.event {
        bus.publish_async(event);
    } else {
        let mut bridged = event;
        bridged.event = kind;
        bus.publish_async(bridged);
    }
}
