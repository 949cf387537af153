use std::collections::HashMap;

use crate::container::ContainerID;

pub const STATUS_START: &str = "start";
pub const STATUS_DIE: &str = "die";

/// `from` value of the events synthesized for containers that were already running at boot.
pub const SIMULATED_EVENT_SOURCE: &str = "-simulated-";

/// A container lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerEvent {
    pub id: ContainerID,
    pub status: String,
    pub from: String,
}

impl ContainerEvent {
    pub fn new(id: ContainerID, status: impl Into<String>, from: impl Into<String>) -> Self {
        Self {
            id,
            status: status.into(),
            from: from.into(),
        }
    }

    /// The event replayed for every known container when the agent starts.
    pub fn simulated_start(id: ContainerID) -> Self {
        Self::new(id, STATUS_START, SIMULATED_EVENT_SOURCE)
    }
}

/// Wire format of the events endpoint. Older engines only send `status`/`id`/`from`, newer ones
/// add `Type`/`Action`/`Actor`.
#[derive(Debug, serde::Deserialize)]
struct RawEvent {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    from: Option<String>,
    #[serde(rename = "Type", default)]
    kind: Option<String>,
    #[serde(rename = "Action", default)]
    action: Option<String>,
    #[serde(rename = "Actor", default)]
    actor: Option<Actor>,
}

#[derive(Debug, serde::Deserialize)]
struct Actor {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(rename = "Attributes", default)]
    attributes: HashMap<String, String>,
}

/// Decodes one line of the events stream.
///
/// Returns `Ok(None)` for events that do not concern a container.
pub(super) fn parse_event_line(line: &[u8]) -> serde_json::Result<Option<ContainerEvent>> {
    let raw: RawEvent = serde_json::from_slice(line)?;
    if raw.kind.as_deref().is_some_and(|kind| kind != "container") {
        return Ok(None);
    }

    let Some(status) = raw.status.or(raw.action) else {
        return Ok(None);
    };
    let id = raw
        .id
        .or_else(|| raw.actor.as_ref().map(|actor| actor.id.clone()));
    let Some(id) = id.and_then(|id| ContainerID::new(id).ok()) else {
        return Ok(None);
    };
    let from = raw
        .from
        .or_else(|| {
            raw.actor
                .and_then(|mut actor| actor.attributes.remove("image"))
        })
        .unwrap_or_default();

    Ok(Some(ContainerEvent { id, status, from }))
}
