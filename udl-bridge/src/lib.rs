//! # udl-bridge
//!
//! Drives a USB display adapter reachable through a UDP bulk tunnel:
//! - **Config**: `BridgeConfig` loaded from TOML
//! - **Pattern**: generated test patterns and raw RGB565 frame files
//! - **Service**: `BridgeService` attach / stream / disconnect loop

pub mod config;
pub mod pattern;
pub mod service;
