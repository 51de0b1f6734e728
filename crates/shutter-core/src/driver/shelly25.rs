//! Shelly 2.5 in roller mode, polled over its Gen1 HTTP API.
//!
//! ```text
//! GET {endpoint}/roller/0                               → Telemetry
//! GET {endpoint}/roller/0?go=to_pos&roller_pos={0-100}  → Telemetry
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::http::{user_agent, ApiError, HttpClient};
use super::{DeviceDriver, DriverFactory, Telemetry};
use crate::error::Result;
use crate::types::Endpoint;

pub const SHELLY25_ROLLER: &str = "Shelly25Roller";

const ROLLER_PATH: &str = "roller/0";

#[derive(Debug, Deserialize)]
struct ShellyApiError {
    #[serde(alias = "message")]
    error: String,
}

impl ApiError for ShellyApiError {
    fn message(&self) -> String {
        self.error.clone()
    }
}

#[derive(Debug, Clone)]
pub struct Shelly25Roller {
    http: HttpClient,
}

impl Shelly25Roller {
    pub fn new(http: reqwest::Client, endpoint: &str) -> Result<Self> {
        let http = HttpClient::new(http, endpoint)?.with_api_error::<ShellyApiError>();
        Ok(Self { http })
    }
}

#[async_trait]
impl DeviceDriver for Shelly25Roller {
    async fn status(&self) -> Result<Telemetry> {
        self.http.get(ROLLER_PATH, &[]).await
    }

    async fn move_to(&self, position: u8) -> Result<Telemetry> {
        let position = position.min(100);
        self.http
            .get(
                ROLLER_PATH,
                &[
                    ("go", "to_pos".to_string()),
                    ("roller_pos", position.to_string()),
                ],
            )
            .await
    }
}

/// Shares one connection pool across every Shelly device.
#[derive(Debug, Clone)]
pub struct Shelly25Factory {
    http: reqwest::Client,
}

impl Shelly25Factory {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(user_agent())
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { http })
    }
}

impl DriverFactory for Shelly25Factory {
    fn device_type(&self) -> &str {
        SHELLY25_ROLLER
    }

    fn connect(&self, endpoint: &Endpoint) -> Result<Box<dyn DeviceDriver>> {
        Ok(Box::new(Shelly25Roller::new(self.http.clone(), &endpoint.url)?))
    }
}
