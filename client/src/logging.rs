//! Strukturiertes Logging via tracing-subscriber
//!
//! Konfigurierbar per Umgebungsvariable (hat Vorrang vor der Datei):
//! - `SF_LOG_LEVEL`: Filter (z.B. `info` oder `sternfunk_session=debug`), Standard: info
//! - `SF_LOG_FORMAT`: Format (text/json), Standard: text
//!
//! Logs gehen nach stderr, stdout bleibt fuer die Statuszeilen frei.

use tracing_subscriber::{fmt, EnvFilter};

pub const ENV_LOG_LEVEL: &str = "SF_LOG_LEVEL";
pub const ENV_LOG_FORMAT: &str = "SF_LOG_FORMAT";

/// Initialisiert das Logging-System.
///
/// Faellt auf `info` / `text` zurueck, wenn weder Umgebung noch
/// Konfiguration einen gueltigen Wert liefern.
pub fn logging_initialisieren(level: &str, format: &str) {
    let filter = EnvFilter::try_from_env(ENV_LOG_LEVEL)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let format_env = std::env::var(ENV_LOG_FORMAT).ok();
    let format = effektives_format(format_env.as_deref(), format);

    match format {
        "json" => {
            fmt()
                .json()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(true)
                .with_current_span(true)
                .init();
        }
        _ => {
            fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .init();
        }
    }
}

/// Umgebung vor Datei; ungueltige Werte fallen auf `text` zurueck
fn effektives_format<'a>(env: Option<&'a str>, datei: &'a str) -> &'a str {
    let gewaehlt = env.unwrap_or(datei);
    if log_format_gueltig(gewaehlt) {
        gewaehlt
    } else {
        "text"
    }
}

/// Validiert ob ein Log-Level-String gueltig ist.
pub fn log_level_gueltig(level: &str) -> bool {
    matches!(level, "trace" | "debug" | "info" | "warn" | "error")
}

/// Validiert ob ein Log-Format-String gueltig ist.
pub fn log_format_gueltig(format: &str) -> bool {
    matches!(format, "text" | "json")
}
