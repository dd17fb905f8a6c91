//! `netmon portal-api` – fetch a captive portal API document.

use anyhow::Result;

use netmon_core::config::MonitorConfig;
use netmon_core::probe::portal_api::{fetch_portal_api, validate_api_url};

use super::system_context;

pub async fn run_portal_api(cfg: MonitorConfig, url: &str) -> Result<()> {
    let url = validate_api_url(url)?;
    let ctx = system_context(cfg);
    let data = fetch_portal_api(&ctx, &url).await?;

    println!("captive:        {}", data.captive);
    println!(
        "user portal:    {}",
        data.user_portal_url.as_deref().unwrap_or("-")
    );
    println!(
        "venue info:     {}",
        data.venue_info_url.as_deref().unwrap_or("-")
    );
    if let Some(bytes) = data.byte_limit {
        println!("bytes left:     {}", bytes);
    }
    if let Some(expiry) = data.expiry_time_millis {
        let secs = (expiry - data.refresh_time_millis) / 1000;
        println!("seconds left:   {}", secs);
    }
    Ok(())
}
