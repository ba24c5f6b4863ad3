use anyhow::Result;
use camhive_scheduler::SqliteStore;
use camhive_schema::{Device, DeviceConfig, DeviceStatus, TriggerConfig};
use clap::Subcommand;

#[derive(Subcommand)]
pub enum DeviceCommands {
    #[command(about = "Register a device or update an existing one")]
    Add {
        #[arg(help = "Device ID")]
        device_id: String,
        #[arg(long, help = "Tenant the device belongs to")]
        tenant: String,
        #[arg(long, help = "Display name (defaults to the device ID)")]
        name: Option<String>,
        #[arg(long, help = "Scheduled capture interval in seconds; omit to disable")]
        interval: Option<i64>,
        #[arg(long, default_value = "active", help = "active, inactive or disabled")]
        status: DeviceStatus,
    },
    #[command(about = "List registered devices")]
    List,
}

pub async fn handle_device_command(cmd: DeviceCommands, store: &SqliteStore) -> Result<()> {
    match cmd {
        DeviceCommands::Add {
            device_id,
            tenant,
            name,
            interval,
            status,
        } => {
            let device = build_device(device_id, tenant, name, interval, status);
            store.upsert_device(&device).await?;
            println!("Device '{}' saved.", device.device_id);
        }
        DeviceCommands::List => {
            let devices = store.list_devices().await?;
            if devices.is_empty() {
                println!("No devices registered.");
                return Ok(());
            }
            println!(
                "{:<20} {:<16} {:<10} {:<10} NAME",
                "ID", "TENANT", "STATUS", "INTERVAL"
            );
            for d in devices {
                let interval = if d.config.trigger.enabled {
                    format!("{}s", d.config.trigger.interval_seconds)
                } else {
                    "-".to_string()
                };
                println!(
                    "{:<20} {:<16} {:<10} {:<10} {}",
                    d.device_id,
                    d.tenant_id,
                    d.status.as_str(),
                    interval,
                    d.name
                );
            }
        }
    }
    Ok(())
}

fn build_device(
    device_id: String,
    tenant_id: String,
    name: Option<String>,
    interval: Option<i64>,
    status: DeviceStatus,
) -> Device {
    let trigger = match interval {
        Some(secs) if secs > 0 => TriggerConfig {
            enabled: true,
            interval_seconds: secs,
        },
        _ => TriggerConfig::default(),
    };
    Device {
        name: name.unwrap_or_else(|| device_id.clone()),
        device_id,
        tenant_id,
        status,
        config: DeviceConfig { trigger },
    }
}
