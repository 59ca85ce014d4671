//! Task-planning server library.
//! This crate exposes internal modules for integration testing.
//! The binary entry point is in main.rs.

pub mod admin;
pub mod auth;
pub mod client;
pub mod config;
pub mod db;
pub mod error;
pub mod events;
pub mod mail;
pub mod routes;
pub mod state;
pub mod tasks;
pub mod weather;
pub mod ws;
