//! Shutterbug renders remote web pages to images or PDF documents through a
//! pool of headless Chromium instances.

pub mod application;
pub mod config;
pub mod domain;
pub mod infra;
