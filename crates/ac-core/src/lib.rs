//! Core types for the rule-resolution engine.
//!
//! This crate is the read-only projection of the host's document model:
//! actors with their items and active effects, placed tokens, the running
//! combat encounter and the profile of a pending roll. Everything here is
//! plain data that can be built programmatically or deserialized from JSON.

/// Actor, item and resource counter snapshots.
pub mod actor;
/// The set of actors and tokens visible to one roll, plus geometry.
pub mod battlefield;
/// Combat encounter and turn order.
pub mod combat;
/// Active effects and their change records.
pub mod effect;
/// Error types used throughout the crate.
pub mod error;
/// String identifiers for host documents.
pub mod id;
/// Hook types and roll profiles.
pub mod roll;
/// Placed tokens and dispositions.
pub mod token;
/// Dynamically typed values used by the evaluation context.
pub mod value;

pub use actor::{ActorSnapshot, Counter, HitPoints, ItemSnapshot};
pub use battlefield::{Battlefield, Geometry, GridGeometry};
pub use combat::{CombatState, Combatant, TurnMarker};
pub use effect::{Effect, EffectChange};
pub use error::{CoreError, CoreResult};
pub use id::{ActorId, DocumentUuid, TokenId};
pub use roll::{DAMAGE_TYPES, HookType, PriorD20, RollProfile, is_damage_type};
pub use token::{Disposition, TokenSnapshot};
pub use value::Value;
