//! Heartbeat request/response

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingRequest {}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PingResult {}
