// src/contracts/mod.rs
//! Registry contract interfaces.

pub mod did_registry;
