//! Formguard - Submission Rate Limiting for Site Forms
//!
//! This crate throttles contact-form and newsletter-signup submissions per
//! client address. Counters live in a shared SQLite database and every
//! accept/reject decision is a single conditional write, so the limit holds
//! across any number of stateless server processes.

pub mod config;
pub mod contact;
pub mod error;
pub mod ratelimit;
pub mod subscribers;
pub mod web;
