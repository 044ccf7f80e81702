//! services/api/src/lib.rs
//!
//! The GreenBot API service: a server-side relay that keeps LLM provider
//! keys off clients, Postgres-backed conversation and credential stores, a
//! local mirror for anonymous sessions, and the WebSocket chat controller
//! that ties them together.

pub mod adapters;
pub mod chat;
pub mod config;
pub mod error;
pub mod web;
