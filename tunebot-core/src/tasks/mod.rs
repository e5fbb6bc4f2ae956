// File: src/tasks/mod.rs

pub mod idle_sweep;
