use anyhow::Context;
use chrono::FixedOffset;
use clap::Parser;

/// Virtual-racing live board backend
#[derive(Parser, Debug, Clone)]
#[command(name = "raceboard", version, about)]
pub struct Config {
    /// HTTP listen address
    #[arg(long, env = "LISTEN_ADDR", default_value = "0.0.0.0:8080")]
    pub listen_addr: String,

    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "raceboard.db")]
    pub database_path: String,

    /// Display-zone offset from UTC in minutes (default 330 = IST, UTC+05:30).
    /// Scraped races are bucketed into calendar days on this clock, and the
    /// current-race selection runs on it.
    #[arg(long, env = "TZ_OFFSET_MINUTES", default_value = "330", allow_hyphen_values = true)]
    pub tz_offset_minutes: i32,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.display_tz()?;
        self.listen_addr
            .parse::<std::net::SocketAddr>()
            .context("listen_addr must be a host:port address")?;
        Ok(())
    }

    /// Resolve the configured offset into a chrono timezone
    pub fn display_tz(&self) -> anyhow::Result<FixedOffset> {
        FixedOffset::east_opt(self.tz_offset_minutes * 60)
            .ok_or_else(|| anyhow::anyhow!("tz_offset_minutes must be within a day of UTC"))
    }
}
