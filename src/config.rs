use std::ffi::OsStr;
use std::fs::File;
use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use teloxide::types::UserId;

/// Environment variable overriding `telegram.token`.
pub const TOKEN_ENV: &str = "TOKEN";
/// Environment variable adding a bot admin.
pub const ADMIN_ID_ENV: &str = "ADMINID";

#[derive(Serialize, Deserialize, Debug)]
pub struct Config {
    pub telegram: Telegram,
    pub db: String,
    pub server_addr: SocketAddr,
    /// Timezone all reminders fire in.
    pub reference_timezone: Tz,
    pub charts: Charts,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Telegram {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub admins: Vec<UserId>,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct Charts {
    pub dir: PathBuf,
    /// TTF/OTF font for chart text, replaces the bundled one.
    pub font: Option<PathBuf>,
}

impl Config {
    pub fn load(path: &OsStr) -> Result<Self> {
        let mut config: Self = serde_yaml::from_reader(File::open(path)?)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;
        config.apply_env(
            std::env::var(TOKEN_ENV).ok(),
            std::env::var(ADMIN_ID_ENV).ok(),
        )?;
        anyhow::ensure!(
            !config.telegram.token.is_empty(),
            "Telegram token is not set, use telegram.token or ${TOKEN_ENV}"
        );
        Ok(config)
    }

    fn apply_env(
        &mut self,
        token: Option<String>,
        admin_id: Option<String>,
    ) -> Result<()> {
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            self.telegram.token = token;
        }
        if let Some(admin_id) = admin_id.filter(|a| !a.is_empty()) {
            let admin_id = UserId(
                admin_id
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid ${ADMIN_ID_ENV}"))?,
            );
            if !self.telegram.admins.contains(&admin_id) {
                self.telegram.admins.push(admin_id);
            }
        }
        Ok(())
    }

    pub fn is_admin(&self, user_id: UserId) -> bool {
        self.telegram.admins.contains(&user_id)
    }
}

#[cfg(test)]
pub const EXAMPLE: &str = include_str!("../config.example.yaml");

#[cfg(test)]
impl Config {
    pub fn example() -> Self {
        serde_yaml::from_str(EXAMPLE).unwrap()
    }
}
