// src/services/mod.rs

pub mod accounts;
pub mod analytics;
pub mod reconcile;
pub mod review_queue;
pub mod sampler;
pub mod scoring;
pub mod session;
pub mod transcription;
pub mod visibility;
