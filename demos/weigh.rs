//! Scale weighing example
//!
//! Scans for KGiTON scales, authenticates with a license key and prints
//! weight samples until Ctrl+C.
//!
//! Run with: cargo run --example weigh -- --key ABCDE-FGHIJ-KLMNO-PQRST-UVWXY
//!
//! `--key` is required. Add `--beep` to sound the buzzer once connected.

use std::time::Duration;

use futures::StreamExt;
use kgiton_ble::{BtleplugTransport, BuzzerCommand, Error, Result, ScaleSession, SessionConfig};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("warn,kgiton_ble=debug")
        .init();

    println!("KGiTON Scale");
    println!("============\n");

    // Parse command line arguments
    let args: Vec<String> = std::env::args().collect();
    let license_key = args
        .iter()
        .position(|arg| arg == "--key")
        .and_then(|i| args.get(i + 1))
        .cloned()
        .ok_or_else(|| Error::LicenseFormat {
            reason: "missing --key <LICENSE-KEY>".to_string(),
        })?;
    let beep = args.iter().any(|arg| arg == "--beep");

    let config = SessionConfig::default().with_data_throttle(Duration::from_millis(200));
    let session = ScaleSession::with_config(BtleplugTransport::new().await?, config);

    let _errors = session.on_error(|kind, message| {
        eprintln!("[{}] {}", kind, message);
    });
    let _states = session.on_state_changed(|change| {
        println!("State: {} -> {}", change.previous, change.current);
    });

    println!("Scanning for scales...\n");
    let scales = session.start_scan().await?.collect_all().await;

    for scale in &scales {
        println!("  {} ({}) RSSI {} dBm", scale.name, scale.id, scale.rssi);
    }

    let scale = scales.first().ok_or_else(|| Error::PeripheralNotFound {
        identifier: "KGiTON".to_string(),
    })?;

    println!("\nConnecting to {}...", scale.name);
    session
        .connect_with_license_key(&scale.id, &license_key)
        .await?;

    if beep {
        let outcome = session.send_buzzer_command(BuzzerCommand::Beep).await?;
        println!("Buzzer: {}", outcome.message);
    }

    println!("\nPress Ctrl+C to stop.\n");

    let mut weights = session.weight_stream()?;
    loop {
        tokio::select! {
            sample = weights.next() => match sample {
                Some(sample) => println!("  {}", sample),
                None => {
                    println!("\nScale disconnected.");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\nStopping...");
                break;
            }
        }
    }

    if let Some(metrics) = session.connection_metrics() {
        println!(
            "Uptime {:?}, average signal {:?} dBm, stable: {}",
            metrics.uptime(),
            metrics.average_signal(),
            session.is_connection_stable()
        );
    }

    session.disconnect().await?;
    Ok(())
}
