//! API endpoint handlers module
//!
//! JSON API handlers, health probes and the server-rendered pages.

pub mod account;
pub mod assessments;
pub mod auth;
pub mod health;
pub mod maya;
pub mod pages;
pub mod purchase;
