use std::time::Duration;

use anyhow::{anyhow, Context, Result};

/// Loopback URL for a configured bind address.
pub fn server_base_url(addr: &str) -> String {
    let addr = addr.trim();
    let addr = match addr.rsplit_once(':') {
        Some(("0.0.0.0", port)) | Some(("", port)) => format!("127.0.0.1:{port}"),
        Some(("[::]", port)) => format!("[::1]:{port}"),
        _ => addr.to_string(),
    };
    format!("http://{addr}")
}

pub async fn request_manual_capture(addr: &str, device_id: &str) -> Result<serde_json::Value> {
    let url = format!("{}/api/devices/{device_id}/capture", server_base_url(addr));
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .build()?;

    let resp = client
        .post(&url)
        .send()
        .await
        .with_context(|| format!("is camhive running? request to {url} failed"))?;
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.unwrap_or(serde_json::Value::Null);
    if !status.is_success() {
        let message = body["message"].as_str().unwrap_or("no details");
        return Err(anyhow!("server returned {status}: {message}"));
    }
    Ok(body)
}
