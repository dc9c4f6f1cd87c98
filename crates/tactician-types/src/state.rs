//! The per-tick world-state snapshot and the parser that builds it from a
//! `state_update` frame.
//!
//! A [`WorldStateSnapshot`] is produced once per tick and only ever shared
//! by reference afterwards; nothing in the decision core mutates it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Errors raised while turning a `state_update` frame into a snapshot.
#[derive(Debug, thiserror::Error)]
pub enum StateParseError {
    /// The frame has no non-negative integer `tick`.
    #[error("state update has no valid tick")]
    MissingTick,

    /// The frame has no `payload` object.
    #[error("state update has no payload object")]
    MissingPayload,

    /// The payload does not match the snapshot schema.
    #[error("invalid state payload: {source}")]
    Payload {
        /// The underlying deserialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// A map coordinate.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate.
    pub x: i32,
    /// Y coordinate.
    pub y: i32,
}

impl Position {
    /// Chebyshev distance in cells, the metric the game uses for range.
    pub fn distance(self, other: Self) -> u32 {
        let dx = self.x.abs_diff(other.x);
        let dy = self.y.abs_diff(other.y);
        dx.max(dy)
    }
}

/// The controlled character.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterState {
    /// Character name.
    #[serde(default)]
    pub name: String,
    /// Job class name.
    #[serde(default)]
    pub job: String,
    /// Base level.
    #[serde(default)]
    pub base_level: u32,
    /// Job level.
    #[serde(default)]
    pub job_level: u32,
    /// Current hit points.
    #[serde(default)]
    pub hp: u32,
    /// Maximum hit points.
    #[serde(default)]
    pub max_hp: u32,
    /// Current spell points.
    #[serde(default)]
    pub sp: u32,
    /// Maximum spell points.
    #[serde(default)]
    pub max_sp: u32,
    /// Current cell.
    #[serde(default)]
    pub position: Position,
    /// Carried weight.
    #[serde(default)]
    pub weight: u32,
    /// Weight limit.
    #[serde(default)]
    pub max_weight: u32,
    /// Money.
    #[serde(default)]
    pub zeny: u64,
    /// Active status effect names.
    #[serde(default)]
    pub status_effects: Vec<String>,
    /// Whether the character is sitting.
    #[serde(default)]
    pub sitting: bool,
}

/// The map the character is on.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapInfo {
    /// Map identifier (e.g. `prt_fild08`).
    pub name: String,
    /// Width in cells, when known.
    #[serde(default)]
    pub width: Option<u32>,
    /// Height in cells, when known.
    #[serde(default)]
    pub height: Option<u32>,
}

/// What kind of thing an observed actor is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    /// A monster.
    Monster,
    /// Another player.
    Player,
    /// A non-player character.
    Npc,
    /// An item lying on the ground.
    Item,
    /// Anything the host could not classify.
    #[default]
    #[serde(other)]
    Other,
}

/// An actor visible to the character.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    /// Host-assigned actor id, used as an action target.
    pub id: u64,
    /// Actor category.
    #[serde(default)]
    pub kind: ActorKind,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Current cell.
    #[serde(default)]
    pub position: Position,
    /// Remaining hit points in percent, when known.
    #[serde(default)]
    pub hp_percent: Option<u8>,
}

/// One inventory slot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    /// Slot index, used by `use_item`/`equip` actions.
    pub index: u32,
    /// Item database id.
    pub item_id: u32,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Stack size.
    #[serde(default)]
    pub amount: u32,
    /// Whether the item is equipped.
    #[serde(default)]
    pub equipped: bool,
}

/// A learned skill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillInfo {
    /// Skill id.
    pub id: u32,
    /// Learned level.
    pub level: u32,
}

/// Observed game state for one tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorldStateSnapshot {
    /// The tick this snapshot describes.
    #[serde(default)]
    pub tick: u64,
    /// The controlled character.
    pub character: CharacterState,
    /// The current map.
    pub map: MapInfo,
    /// Visible actors.
    #[serde(default)]
    pub actors: Vec<ActorState>,
    /// Inventory slots.
    #[serde(default)]
    pub inventory: Vec<InventoryItem>,
    /// Learned skills.
    #[serde(default)]
    pub skills: Vec<SkillInfo>,
    /// Host fields this schema does not model.
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl WorldStateSnapshot {
    /// Parse a `state_update` frame.
    ///
    /// The frame's `tick` is authoritative; a `tick` inside the payload is
    /// ignored.
    ///
    /// # Errors
    ///
    /// Returns [`StateParseError`] if the tick or payload is missing or the
    /// payload does not match the schema.
    pub fn from_frame(frame: &Map<String, Value>) -> Result<Self, StateParseError> {
        let tick = frame
            .get("tick")
            .and_then(Value::as_u64)
            .ok_or(StateParseError::MissingTick)?;
        let payload = frame
            .get("payload")
            .filter(|p| p.is_object())
            .ok_or(StateParseError::MissingPayload)?;
        Self::from_payload(tick, payload.clone())
    }

    /// Parse a bare payload for the given tick.
    ///
    /// # Errors
    ///
    /// Returns [`StateParseError::Payload`] if the payload does not match
    /// the schema.
    pub fn from_payload(tick: u64, payload: Value) -> Result<Self, StateParseError> {
        let mut snapshot: Self = serde_json::from_value(payload)?;
        snapshot.tick = tick;
        Ok(snapshot)
    }

    /// Visible monsters.
    pub fn monsters(&self) -> impl Iterator<Item = &ActorState> {
        self.actors.iter().filter(|a| a.kind == ActorKind::Monster)
    }

    /// Look up a visible actor by id.
    pub fn actor(&self, id: u64) -> Option<&ActorState> {
        self.actors.iter().find(|a| a.id == id)
    }

    /// Look up an inventory slot.
    pub fn inventory_item(&self, index: u32) -> Option<&InventoryItem> {
        self.inventory.iter().find(|i| i.index == index)
    }

    /// Current HP as a fraction of max, `0.0` when max is unknown.
    pub fn hp_ratio(&self) -> f64 {
        ratio(self.character.hp, self.character.max_hp)
    }

    /// Current SP as a fraction of max, `0.0` when max is unknown.
    pub fn sp_ratio(&self) -> f64 {
        ratio(self.character.sp, self.character.max_sp)
    }
}

fn ratio(current: u32, max: u32) -> f64 {
    if max == 0 {
        return 0.0;
    }
    f64::from(current.min(max)) / f64::from(max)
}
