//! HTTP Query Surface
//!
//! Thin axum layer over the broker. Data queries are reconciled with online peers
//! before the local answer is read back, so every response reflects the cluster rather
//! than this broker's replica alone.

pub mod handlers;
pub mod protocol;
