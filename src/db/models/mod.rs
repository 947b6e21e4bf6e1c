// src/db/models/mod.rs

//! Data models for receipt store entities

mod receipt;

pub use receipt::{InstallReceipt, RECEIPT_FILE};
