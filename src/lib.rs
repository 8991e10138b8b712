//! Operator utilities for a compose-based home-automation stack.
//!
//! `compose-image-check` reports available image upgrades for the images
//! referenced by compose files. `volume-sync` copies whitelisted
//! configuration files out of container volumes into a git repository.

pub mod command;
pub mod compose;
pub mod config;
pub mod docker_hub;
pub mod image_check;
pub mod image_reference;
pub mod logging;
pub mod sync;
pub mod tag_heuristic;
pub mod vcs;
pub mod volume;
pub mod whitelist;
