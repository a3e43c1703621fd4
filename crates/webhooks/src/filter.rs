use relaygate_common::EventType;

const WILDCARD: &str = "All";

/// Whether a tenant subscribed to `subscribed` should receive `event_type`.
///
/// `subscribed` is the stored comma-separated list. Names are compared
/// verbatim; `All` anywhere in the list matches every event type.
pub fn is_subscribed(subscribed: &str, event_type: &str) -> bool {
    if subscribed.is_empty() {
        return false;
    }
    subscribed
        .split(',')
        .any(|name| name == WILDCARD || name == event_type)
}

/// Keep only supported event names and join them for storage.
pub fn normalize<S: AsRef<str>>(names: &[S]) -> String {
    names
        .iter()
        .map(AsRef::as_ref)
        .filter(|name| EventType::is_supported(name))
        .collect::<Vec<_>>()
        .join(",")
}
