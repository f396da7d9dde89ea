//! Field Prime Probe - command-line check of the dashboard data sources
//!
//! Mounts the three socket-first acquisitions against the configured
//! backend, waits for each to settle and reports where its data came from.

use anyhow::Result;
use fieldprime_client::{
    logging, Acquisition, AcquisitionKind, AcquisitionResult, ClientConfig, Transports,
};
use fieldprime_shared::{iot_readings, IotSummary};
use serde_json::Value;

#[tokio::main]
async fn main() -> Result<()> {
    logging::init();

    let config = ClientConfig::from_env()?;
    tracing::info!(
        api = %config.api_base_url,
        socket = %config.socket_endpoint()?,
        "Probing dashboard data sources"
    );

    let (transports, toasts) = Transports::with_toasts(&config)?;

    let handles: Vec<_> = [
        AcquisitionKind::InitialData,
        AcquisitionKind::IotData,
        AcquisitionKind::PredictionMap,
    ]
    .into_iter()
    .map(|kind| Acquisition::new(kind).mount(&transports))
    .collect();

    for handle in &handles {
        let result = handle.settled().await;
        report(handle.kind(), &result);
    }

    for toast in toasts.drain() {
        println!("[{:?}] {}: {}", toast.variant, toast.title, toast.description);
    }

    drop(handles);
    transports.socket.disconnect();
    Ok(())
}

fn report(kind: AcquisitionKind, result: &AcquisitionResult) {
    match (&result.data, &result.error) {
        (Some(data), _) => {
            println!("{}: ok via {}", kind.label(), result.connection_type);
            if kind != AcquisitionKind::PredictionMap {
                print_iot_summary(data);
            }
        }
        (None, Some(error)) => println!("{}: failed ({})", kind.label(), error),
        (None, None) => println!("{}: no data", kind.label()),
    }
}

fn print_iot_summary(data: &Value) {
    match iot_readings(data) {
        Ok(readings) => match IotSummary::from_readings(&readings) {
            Some(summary) => {
                println!(
                    "  {} readings, {:.1} °C, {:.1}% soil moisture",
                    summary.readings, summary.avg_temperature, summary.avg_soil_moisture
                );
                if let Some(humidity) = summary.avg_humidity {
                    println!("  {:.1}% humidity", humidity);
                }
            }
            None => println!("  no IoT readings"),
        },
        Err(e) => tracing::warn!("Unreadable IoT payload: {}", e),
    }
}
