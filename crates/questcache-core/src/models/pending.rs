use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(HttpMethod::Get),
            "POST" => Ok(HttpMethod::Post),
            "PUT" => Ok(HttpMethod::Put),
            "PATCH" => Ok(HttpMethod::Patch),
            "DELETE" => Ok(HttpMethod::Delete),
            other => Err(format!("unsupported HTTP method: {}", other)),
        }
    }
}

/// A mutation the caller wants delivered once the remote API is reachable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPendingUpdate {
    pub url: String,
    pub method: HttpMethod,
    #[serde(default)]
    pub data: Value,
}

impl NewPendingUpdate {
    pub fn new(method: HttpMethod, url: impl Into<String>, data: Value) -> Self {
        Self {
            url: url.into(),
            method,
            data,
        }
    }
}

/// A queued mutation. Immutable until it is removed after delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct PendingUpdate {
    pub id: u64,
    pub url: String,
    pub method: HttpMethod,
    pub data: Value,
    pub timestamp: DateTime<Utc>,
}

impl PendingUpdate {
    pub fn request_line(&self) -> String {
        format!("{} {}", self.method, self.url)
    }
}
