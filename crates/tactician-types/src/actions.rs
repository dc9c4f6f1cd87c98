//! The canonical [`Action`] record and the loose shapes coordinators may
//! emit instead of it.
//!
//! An [`Action`] is always well-formed: its [`Priority`] is in `1..=10`
//! and only the fields the [`ActionKind`] needs are set. Coordinators are
//! free to hand back an [`ActionPayload`] or a plain JSON object; those
//! go through [`crate::normalize`] before they reach the merge.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field names owned by the canonical action shape.
///
/// Auxiliary data may not reuse them, otherwise the flattened wire object
/// would carry duplicate keys.
pub const RESERVED_FIELDS: [&str; 9] = [
    "type",
    "priority",
    "target",
    "x",
    "y",
    "skill_id",
    "skill_level",
    "item_id",
    "item_index",
];

/// Errors raised while building or validating an [`Action`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActionError {
    /// The priority is outside `1..=10`.
    #[error("priority {value} is outside 1..=10")]
    PriorityOutOfRange {
        /// The rejected value.
        value: i64,
    },

    /// The action kind string is not recognized.
    #[error("unknown action kind: {kind}")]
    UnknownKind {
        /// The kind as emitted.
        kind: String,
    },

    /// A field the kind requires was not supplied.
    #[error("{kind} action requires {field}")]
    MissingField {
        /// The kind being built.
        kind: ActionKind,
        /// The missing field (or field group).
        field: &'static str,
    },

    /// A skill level of zero was supplied.
    #[error("skill level must be at least 1")]
    InvalidSkillLevel,

    /// An auxiliary key collides with a canonical field.
    #[error("auxiliary field {key} collides with a canonical action field")]
    ReservedField {
        /// The offending key.
        key: String,
    },

    /// A loose payload or map could not be read at all.
    #[error("malformed action: {message}")]
    Malformed {
        /// Description of what was wrong.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Urgency of an action: `1` is the most urgent, `10` the least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    /// Most urgent priority.
    pub const HIGHEST: Self = Self(1);
    /// Priority used when a loose payload does not state one.
    pub const NORMAL: Self = Self(5);
    /// Least urgent priority; also used for fallback no-ops.
    pub const LOWEST: Self = Self(10);

    /// Create a priority, rejecting values outside `1..=10`.
    pub fn new(value: u8) -> Result<Self, ActionError> {
        Self::try_from(value)
    }

    /// Create a priority, clamping any integer into `1..=10`.
    pub fn clamped(value: i64) -> Self {
        let bounded = value.clamp(i64::from(Self::HIGHEST.0), i64::from(Self::LOWEST.0));
        Self(u8::try_from(bounded).unwrap_or(Self::LOWEST.0))
    }

    /// The numeric value.
    pub const fn get(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self::NORMAL
    }
}

impl TryFrom<u8> for Priority {
    type Error = ActionError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if (Self::HIGHEST.0..=Self::LOWEST.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ActionError::PriorityOutOfRange {
                value: i64::from(value),
            })
        }
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.0
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// ActionKind
// ---------------------------------------------------------------------------

/// Discriminant of an [`Action`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Walk to a map coordinate.
    Move,
    /// Attack an actor.
    Attack,
    /// Cast a skill on an actor or a ground position.
    Skill,
    /// Use an inventory item.
    UseItem,
    /// Pick up a ground item.
    Pickup,
    /// Equip an inventory item.
    Equip,
    /// Start a conversation with an NPC.
    TalkNpc,
    /// Say something in chat.
    Chat,
    /// Sit down.
    Sit,
    /// Stand up.
    Stand,
    /// Teleport to a random spot on the current map.
    Teleport,
    /// Do nothing.
    #[serde(rename = "noop")]
    NoOp,
}

impl ActionKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 12] = [
        Self::Move,
        Self::Attack,
        Self::Skill,
        Self::UseItem,
        Self::Pickup,
        Self::Equip,
        Self::TalkNpc,
        Self::Chat,
        Self::Sit,
        Self::Stand,
        Self::Teleport,
        Self::NoOp,
    ];

    /// Wire name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Move => "move",
            Self::Attack => "attack",
            Self::Skill => "skill",
            Self::UseItem => "use_item",
            Self::Pickup => "pickup",
            Self::Equip => "equip",
            Self::TalkNpc => "talk_npc",
            Self::Chat => "chat",
            Self::Sit => "sit",
            Self::Stand => "stand",
            Self::Teleport => "teleport",
            Self::NoOp => "noop",
        }
    }

    /// Parse a kind name as coordinators tend to write it.
    ///
    /// Matching is case-insensitive and tolerates a few aliases
    /// (`item`, `no_op`, `npc`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        let lowered = name.trim().to_ascii_lowercase();
        let kind = match lowered.as_str() {
            "move" | "move_to" | "walk" => Self::Move,
            "attack" => Self::Attack,
            "skill" | "use_skill" | "cast" => Self::Skill,
            "use_item" | "useitem" | "item" => Self::UseItem,
            "pickup" | "pick_up" | "take" => Self::Pickup,
            "equip" => Self::Equip,
            "talk_npc" | "talknpc" | "npc" | "talk" => Self::TalkNpc,
            "chat" | "say" => Self::Chat,
            "sit" => Self::Sit,
            "stand" => Self::Stand,
            "teleport" | "tele" => Self::Teleport,
            "noop" | "no_op" | "none" | "idle" => Self::NoOp,
            _ => return None,
        };
        Some(kind)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Action
// ---------------------------------------------------------------------------

/// One intended operation for the host to execute.
///
/// Serializes to the flat wire object the host expects:
/// `{type, priority, target, x, y, skill_id, skill_level, item_id,
/// item_index, ...auxiliary}`. Fields irrelevant to the kind are `null`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Action {
    #[serde(rename = "type")]
    kind: ActionKind,
    priority: Priority,
    target: Option<u64>,
    x: Option<i32>,
    y: Option<i32>,
    skill_id: Option<u32>,
    skill_level: Option<u32>,
    item_id: Option<u32>,
    item_index: Option<u32>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

impl Action {
    /// An action of `kind` with no parameters at normal priority.
    const fn bare(kind: ActionKind) -> Self {
        Self {
            kind,
            priority: Priority::NORMAL,
            target: None,
            x: None,
            y: None,
            skill_id: None,
            skill_level: None,
            item_id: None,
            item_index: None,
            extra: BTreeMap::new(),
        }
    }

    /// Walk to `(x, y)`.
    pub const fn move_to(x: i32, y: i32) -> Self {
        let mut action = Self::bare(ActionKind::Move);
        action.x = Some(x);
        action.y = Some(y);
        action
    }

    /// Attack the actor `target`.
    pub const fn attack(target: u64) -> Self {
        let mut action = Self::bare(ActionKind::Attack);
        action.target = Some(target);
        action
    }

    /// Cast skill `skill_id` at `level` on the actor `target`.
    pub fn skill_on(skill_id: u32, level: u32, target: u64) -> Result<Self, ActionError> {
        let mut action = Self::skill(skill_id, level)?;
        action.target = Some(target);
        Ok(action)
    }

    /// Cast skill `skill_id` at `level` on the ground at `(x, y)`.
    pub fn skill_at(skill_id: u32, level: u32, x: i32, y: i32) -> Result<Self, ActionError> {
        let mut action = Self::skill(skill_id, level)?;
        action.x = Some(x);
        action.y = Some(y);
        Ok(action)
    }

    fn skill(skill_id: u32, level: u32) -> Result<Self, ActionError> {
        if level == 0 {
            return Err(ActionError::InvalidSkillLevel);
        }
        let mut action = Self::bare(ActionKind::Skill);
        action.skill_id = Some(skill_id);
        action.skill_level = Some(level);
        Ok(action)
    }

    /// Use the first inventory stack of `item_id`.
    pub const fn use_item(item_id: u32) -> Self {
        let mut action = Self::bare(ActionKind::UseItem);
        action.item_id = Some(item_id);
        action
    }

    /// Use the inventory slot `item_index`.
    pub const fn use_item_at(item_index: u32) -> Self {
        let mut action = Self::bare(ActionKind::UseItem);
        action.item_index = Some(item_index);
        action
    }

    /// Pick up the ground item `target`.
    pub const fn pickup(target: u64) -> Self {
        let mut action = Self::bare(ActionKind::Pickup);
        action.target = Some(target);
        action
    }

    /// Equip the inventory slot `item_index`.
    pub const fn equip(item_index: u32) -> Self {
        let mut action = Self::bare(ActionKind::Equip);
        action.item_index = Some(item_index);
        action
    }

    /// Talk to the NPC `target`.
    pub const fn talk_npc(target: u64) -> Self {
        let mut action = Self::bare(ActionKind::TalkNpc);
        action.target = Some(target);
        action
    }

    /// Say `message` in public chat.
    pub fn chat(message: impl Into<String>) -> Self {
        let mut action = Self::bare(ActionKind::Chat);
        action
            .extra
            .insert("message".to_owned(), Value::String(message.into()));
        action
    }

    /// Sit down.
    pub const fn sit() -> Self {
        Self::bare(ActionKind::Sit)
    }

    /// Stand up.
    pub const fn stand() -> Self {
        Self::bare(ActionKind::Stand)
    }

    /// Random teleport.
    pub const fn teleport() -> Self {
        Self::bare(ActionKind::Teleport)
    }

    /// Do nothing.
    pub const fn noop() -> Self {
        Self::bare(ActionKind::NoOp)
    }

    /// The no-op that stands in for an item that could not be normalized.
    pub const fn fallback_noop() -> Self {
        let mut action = Self::bare(ActionKind::NoOp);
        action.priority = Priority::LOWEST;
        action
    }

    /// Replace the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attach an auxiliary field.
    ///
    /// # Errors
    ///
    /// Returns [`ActionError::ReservedField`] if `key` is one of the
    /// canonical field names.
    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Result<Self, ActionError> {
        let key = key.into();
        if RESERVED_FIELDS.contains(&key.as_str()) {
            return Err(ActionError::ReservedField { key });
        }
        self.extra.insert(key, value);
        Ok(self)
    }

    /// The action kind.
    pub const fn kind(&self) -> ActionKind {
        self.kind
    }

    /// The action priority.
    pub const fn priority(&self) -> Priority {
        self.priority
    }

    /// Target actor id, if the kind uses one.
    pub const fn target(&self) -> Option<u64> {
        self.target
    }

    /// Map coordinate, if the kind uses one.
    pub const fn position(&self) -> Option<(i32, i32)> {
        match (self.x, self.y) {
            (Some(x), Some(y)) => Some((x, y)),
            _ => None,
        }
    }

    /// Skill id and level, for skill actions.
    pub const fn skill_ref(&self) -> Option<(u32, u32)> {
        match (self.skill_id, self.skill_level) {
            (Some(id), Some(level)) => Some((id, level)),
            _ => None,
        }
    }

    /// Item id, if set.
    pub const fn item_id(&self) -> Option<u32> {
        self.item_id
    }

    /// Inventory slot, if set.
    pub const fn item_index(&self) -> Option<u32> {
        self.item_index
    }

    /// Auxiliary fields.
    pub const fn extra(&self) -> &BTreeMap<String, Value> {
        &self.extra
    }

    /// Whether this action does nothing.
    pub fn is_noop(&self) -> bool {
        self.kind == ActionKind::NoOp
    }
}

impl TryFrom<ActionPayload> for Action {
    type Error = ActionError;

    /// Validate a loose payload into a canonical action.
    ///
    /// Fields the kind does not use are dropped. A missing priority
    /// becomes [`Priority::NORMAL`]; an out-of-range one is clamped.
    fn try_from(payload: ActionPayload) -> Result<Self, Self::Error> {
        let kind = ActionKind::parse(&payload.kind).ok_or_else(|| ActionError::UnknownKind {
            kind: payload.kind.clone(),
        })?;
        let priority = payload.priority.map_or(Priority::NORMAL, Priority::clamped);
        let position = payload.x.zip(payload.y);

        let mut action = match kind {
            ActionKind::Move => {
                let (x, y) = position.ok_or(ActionError::MissingField {
                    kind,
                    field: "x and y",
                })?;
                Self::move_to(x, y)
            }
            ActionKind::Attack => Self::attack(require(payload.target, kind, "target")?),
            ActionKind::Skill => {
                let skill_id = require(payload.skill_id, kind, "skill_id")?;
                let level = require(payload.skill_level, kind, "skill_level")?;
                match (payload.target, position) {
                    (Some(target), _) => Self::skill_on(skill_id, level, target)?,
                    (None, Some((x, y))) => Self::skill_at(skill_id, level, x, y)?,
                    (None, None) => {
                        return Err(ActionError::MissingField {
                            kind,
                            field: "target or x and y",
                        });
                    }
                }
            }
            ActionKind::UseItem => match (payload.item_id, payload.item_index) {
                (Some(item_id), index) => {
                    let mut action = Self::use_item(item_id);
                    action.item_index = index;
                    action
                }
                (None, Some(index)) => Self::use_item_at(index),
                (None, None) => {
                    return Err(ActionError::MissingField {
                        kind,
                        field: "item_id or item_index",
                    });
                }
            },
            ActionKind::Pickup => Self::pickup(require(payload.target, kind, "target")?),
            ActionKind::Equip => Self::equip(require(payload.item_index, kind, "item_index")?),
            ActionKind::TalkNpc => Self::talk_npc(require(payload.target, kind, "target")?),
            ActionKind::Chat => {
                let has_message = payload
                    .extra
                    .get("message")
                    .and_then(Value::as_str)
                    .is_some_and(|m| !m.is_empty());
                if !has_message {
                    return Err(ActionError::MissingField {
                        kind,
                        field: "message",
                    });
                }
                Self::bare(ActionKind::Chat)
            }
            ActionKind::Sit => Self::sit(),
            ActionKind::Stand => Self::stand(),
            ActionKind::Teleport => Self::teleport(),
            ActionKind::NoOp => Self::noop(),
        };

        action.priority = priority;
        for (key, value) in payload.extra {
            if !RESERVED_FIELDS.contains(&key.as_str()) {
                action.extra.insert(key, value);
            }
        }
        Ok(action)
    }
}

fn require<T>(value: Option<T>, kind: ActionKind, field: &'static str) -> Result<T, ActionError> {
    value.ok_or(ActionError::MissingField { kind, field })
}

// ---------------------------------------------------------------------------
// Loose inputs
// ---------------------------------------------------------------------------

/// A lightweight, structurally compatible action emitted by a coordinator.
///
/// Unlike [`Action`] nothing here is validated: the kind is a free string
/// and any field may be missing. Unknown keys land in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionPayload {
    /// Kind name, matched with [`ActionKind::parse`].
    #[serde(rename = "type", alias = "kind", alias = "action")]
    pub kind: String,
    /// Requested priority; clamped into `1..=10`.
    #[serde(default)]
    pub priority: Option<i64>,
    /// Target actor id.
    #[serde(default)]
    pub target: Option<u64>,
    /// Map x coordinate.
    #[serde(default)]
    pub x: Option<i32>,
    /// Map y coordinate.
    #[serde(default)]
    pub y: Option<i32>,
    /// Skill id.
    #[serde(default)]
    pub skill_id: Option<u32>,
    /// Skill level.
    #[serde(default)]
    pub skill_level: Option<u32>,
    /// Item id.
    #[serde(default)]
    pub item_id: Option<u32>,
    /// Inventory slot.
    #[serde(default)]
    pub item_index: Option<u32>,
    /// Everything else.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl ActionPayload {
    /// A payload of the given kind name with nothing else set.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }
}

/// Anything a coordinator may return from a tick.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionLike {
    /// Already canonical; passes through unchanged.
    Action(Action),
    /// Typed but unvalidated.
    Payload(ActionPayload),
    /// An untyped key/value object.
    Map(serde_json::Map<String, Value>),
}

impl From<Action> for ActionLike {
    fn from(action: Action) -> Self {
        Self::Action(action)
    }
}

impl From<ActionPayload> for ActionLike {
    fn from(payload: ActionPayload) -> Self {
        Self::Payload(payload)
    }
}

impl From<serde_json::Map<String, Value>> for ActionLike {
    fn from(map: serde_json::Map<String, Value>) -> Self {
        Self::Map(map)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn priority_bounds() {
        assert!(Priority::new(0).is_err());
        assert!(Priority::new(11).is_err());
        assert_eq!(Priority::new(1).unwrap(), Priority::HIGHEST);
        assert_eq!(Priority::new(10).unwrap(), Priority::LOWEST);
    }

    #[test]
    fn priority_clamps() {
        assert_eq!(Priority::clamped(-4), Priority::HIGHEST);
        assert_eq!(Priority::clamped(99), Priority::LOWEST);
        assert_eq!(Priority::clamped(7).get(), 7);
    }

    #[test]
    fn kind_parse_accepts_aliases() {
        assert_eq!(ActionKind::parse("ATTACK"), Some(ActionKind::Attack));
        assert_eq!(ActionKind::parse("item"), Some(ActionKind::UseItem));
        assert_eq!(ActionKind::parse("no_op"), Some(ActionKind::NoOp));
        assert_eq!(ActionKind::parse(" talk_npc "), Some(ActionKind::TalkNpc));
        assert_eq!(ActionKind::parse("dance"), None);
    }

    #[test]
    fn kind_wire_names_match_serde() {
        for kind in ActionKind::ALL {
            let encoded = serde_json::to_value(kind).unwrap();
            assert_eq!(encoded, json!(kind.as_str()));
            assert_eq!(ActionKind::parse(kind.as_str()), Some(kind));
        }
    }

    #[test]
    fn skill_requires_positive_level() {
        assert_eq!(
            Action::skill_on(28, 0, 5),
            Err(ActionError::InvalidSkillLevel)
        );
        let heal = Action::skill_on(28, 10, 5).unwrap();
        assert_eq!(heal.skill_ref(), Some((28, 10)));
        assert_eq!(heal.target(), Some(5));
        assert_eq!(heal.position(), None);
    }

    #[test]
    fn unset_fields_serialize_as_null() {
        let action = Action::attack(1001).with_priority(Priority::HIGHEST);
        let wire = serde_json::to_value(&action).unwrap();
        assert_eq!(
            wire,
            json!({
                "type": "attack",
                "priority": 1,
                "target": 1001,
                "x": null,
                "y": null,
                "skill_id": null,
                "skill_level": null,
                "item_id": null,
                "item_index": null,
            })
        );
    }

    #[test]
    fn auxiliary_fields_are_flattened() {
        let action = Action::chat("hello");
        let wire = serde_json::to_value(&action).unwrap();
        assert_eq!(wire["type"], "chat");
        assert_eq!(wire["message"], "hello");
    }

    #[test]
    fn with_extra_rejects_reserved_keys() {
        let err = Action::sit().with_extra("priority", json!(1)).unwrap_err();
        assert_eq!(
            err,
            ActionError::ReservedField {
                key: "priority".to_owned()
            }
        );
        assert!(Action::sit().with_extra("reason", json!("low sp")).is_ok());
    }

    #[test]
    fn payload_drops_fields_the_kind_does_not_use() {
        let payload = ActionPayload {
            kind: "attack".to_owned(),
            priority: Some(2),
            target: Some(77),
            x: Some(10),
            y: Some(12),
            skill_id: Some(5),
            ..ActionPayload::default()
        };
        let action = Action::try_from(payload).unwrap();
        assert_eq!(action.kind(), ActionKind::Attack);
        assert_eq!(action.priority().get(), 2);
        assert_eq!(action.target(), Some(77));
        assert_eq!(action.position(), None);
        assert_eq!(action.skill_ref(), None);
    }

    #[test]
    fn payload_missing_required_field_is_rejected() {
        let payload = ActionPayload {
            x: Some(3),
            ..ActionPayload::new("move")
        };
        assert_eq!(
            Action::try_from(payload),
            Err(ActionError::MissingField {
                kind: ActionKind::Move,
                field: "x and y",
            })
        );
    }

    #[test]
    fn payload_skill_prefers_target_over_position() {
        let payload = ActionPayload {
            skill_id: Some(19),
            skill_level: Some(3),
            target: Some(9),
            x: Some(1),
            y: Some(2),
            ..ActionPayload::new("skill")
        };
        let action = Action::try_from(payload).unwrap();
        assert_eq!(action.target(), Some(9));
        assert_eq!(action.position(), None);
    }

    #[test]
    fn payload_without_priority_defaults_to_normal() {
        let action = Action::try_from(ActionPayload::new("sit")).unwrap();
        assert_eq!(action.priority(), Priority::NORMAL);
    }

    #[test]
    fn chat_payload_requires_message() {
        assert!(Action::try_from(ActionPayload::new("chat")).is_err());

        let mut payload = ActionPayload::new("chat");
        payload.extra.insert("message".to_owned(), json!("buying apples"));
        let action = Action::try_from(payload).unwrap();
        assert_eq!(action.extra().get("message"), Some(&json!("buying apples")));
    }
}
