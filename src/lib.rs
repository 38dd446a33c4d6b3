// Library for the binary and integration tests

pub mod bot;
pub mod calendar;
pub mod collector;
pub mod commands;
pub mod config;
pub mod error;
pub mod history_repo;
pub mod models;
pub mod panel;
pub mod ranking;
pub mod reader;
pub mod report;
pub mod retry;
pub mod routes;
pub mod scheduler;
pub mod service;
pub mod telegram;
pub mod tracker;
pub mod window;
pub mod worker;
