//! Skill lifecycle: discovery, condition checks, intent routing, installation
//! and updates of independently versioned assistant skills.
//!
//! Skills live in one directory each under the skills root, described by a
//! `<Name>.install` JSON file. Install and update requests are queued as
//! ticket files and drained by a single background pipeline.

pub mod conditions;
pub mod config_store;
pub mod error;
pub mod events;
pub mod fetch;
pub mod host;
pub mod intents;
pub mod orchestrator;
pub mod pipeline;
pub mod provision;
pub mod registry;
pub mod skill;
pub mod store;
pub mod ticket;
pub mod types;
pub mod update;
pub mod version;

pub use {
    error::{Error, Result},
    orchestrator::{Collaborators, LifecycleOrchestrator},
    registry::SkillRegistry,
    skill::{EventHandler, Skill, SkillEvent, SkillFactories},
    types::{SkillInfo, SkillState},
    version::Version,
};
