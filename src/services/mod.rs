// src/services/mod.rs

pub mod core;
