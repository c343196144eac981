// src/models/mod.rs

pub mod exam_progress;
pub mod exam_result;
pub mod exam_session;
pub mod question;
pub mod review;
pub mod user;
