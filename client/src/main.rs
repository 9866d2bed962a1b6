//! Sternfunk – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Client.
//!
//! Aufruf: `sternfunk [config.toml]`

use anyhow::Result;
use sternfunk_client::{config::ClientConfig, logging::logging_initialisieren, Client};

#[tokio::main]
async fn main() -> Result<()> {
    // Pfad: Argument, sonst Umgebungsvariable, sonst Standard
    let config_pfad = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("STERNFUNK_CONFIG").ok())
        .unwrap_or_else(|| "sternfunk.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = ClientConfig::laden(&config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Sternfunk wird initialisiert"
    );

    Client::neu(config).starten().await
}
