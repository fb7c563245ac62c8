//! Tubely backend: authenticated video uploads, fast-start remuxed and
//! stored in S3 under aspect-ratio partitioned keys.

pub mod aspect;
pub mod auth;
pub mod cleanup;
pub mod config;
pub mod db;
pub mod error;
pub mod ffmpeg;
pub mod handlers;
pub mod models;
pub mod staging;
pub mod storage;
pub mod system_info;
pub mod upload;
