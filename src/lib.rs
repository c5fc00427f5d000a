use std::collections::HashMap;
use std::sync::Arc;
use log::{debug, error, info, warn};
use tokio::sync::Mutex;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use async_trait::async_trait;
use teloxide::{
    types::{ChatId, UserId},
    utils::command::BotCommands,
};

pub use error::*;
pub use bot_structure::*;
pub use state_store::*;
pub use period::*;
pub use repository::*;
pub use extraction::*;
pub use transcription::*;
pub use statistics::*;
pub use dialog::*;
pub use add_expenses::*;
pub use show_statistics::*;
pub use metrics::*;
pub use prometheus::*;
pub use config::*;

pub mod error;
pub mod bot_structure;
pub mod state_store;
pub mod period;
pub mod repository;
pub mod extraction;
pub mod transcription;
pub mod statistics;
pub mod dialog;
pub mod add_expenses;
pub mod add_category;
pub mod show_statistics;
pub mod metrics;
pub mod prometheus;
pub mod http;
pub mod telegram;
pub mod config;
