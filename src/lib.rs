//! simplebank - authentication core of a banking backend
//!
//! This library provides token issuing and verification, login sessions,
//! user registration and the HTTP surface that exposes them.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod token;
