// src/lib.rs

//! chanwatch: imageboard thread monitor library

pub mod error;
pub mod models;
pub mod pipeline;
pub mod services;
pub mod storage;
pub mod utils;
