//! localchat
//!
//! Chat with a locally downloaded language model, either in a desktop window
//! or through an OpenAI-shaped HTTP endpoint. Both front ends share one
//! [`service::ChatService`].

pub mod api;
pub mod app;
pub mod cli;
pub mod inference;
pub mod logging;
pub mod service;
pub mod storage;
pub mod types;
pub mod ui;
