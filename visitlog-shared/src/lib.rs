//! Types shared between the visitlog server and its HTTP consumers.

pub mod api;
pub mod auth;
pub mod domain;
pub mod jwt;
