//! Audio-Geraete: Auflistung und Auswahl per Namensteil

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;
use std::fmt;
use tracing::{debug, warn};

use crate::error::{AudioError, AudioResult};

/// Gaengige Raten, die bei der Auflistung geprueft werden
const GEPRUEFTE_RATEN: [u32; 5] = [8000, 16000, 24000, 44100, 48000];

/// Ein- oder Ausgaberichtung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Richtung {
    Eingabe,
    Ausgabe,
}

impl fmt::Display for Richtung {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eingabe => write!(f, "Eingabe"),
            Self::Ausgabe => write!(f, "Ausgabe"),
        }
    }
}

/// Beschreibung eines Audio-Geraets
#[derive(Debug, Clone)]
pub struct AudioDevice {
    pub name: String,
    pub richtung: Richtung,
    /// Unterstuetzte Raten aus [`GEPRUEFTE_RATEN`]
    pub sample_rates: Vec<u32>,
    pub channels: u16,
    pub ist_standard: bool,
}

impl fmt::Display for AudioDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let raten: Vec<String> = self.sample_rates.iter().map(|r| r.to_string()).collect();
        write!(
            f,
            "[{}] {} ({}ch, {} Hz){}",
            self.richtung,
            self.name,
            self.channels,
            raten.join("/"),
            if self.ist_standard { " *" } else { "" }
        )
    }
}

fn cpal_geraete(richtung: Richtung) -> AudioResult<Vec<Device>> {
    let host = cpal::default_host();
    let geraete: Vec<Device> = match richtung {
        Richtung::Eingabe => host
            .input_devices()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?
            .collect(),
        Richtung::Ausgabe => host
            .output_devices()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?
            .collect(),
    };
    Ok(geraete)
}

fn standard_name(richtung: Richtung) -> Option<String> {
    let host = cpal::default_host();
    let device = match richtung {
        Richtung::Eingabe => host.default_input_device(),
        Richtung::Ausgabe => host.default_output_device(),
    };
    device.and_then(|d| d.name().ok())
}

/// Listet alle Geraete einer Richtung auf
pub fn list_devices(richtung: Richtung) -> AudioResult<Vec<AudioDevice>> {
    let standard = standard_name(richtung);
    let mut result = Vec::new();
    for device in cpal_geraete(richtung)? {
        match beschreiben(&device, richtung) {
            Ok(mut ad) => {
                ad.ist_standard = standard.as_deref() == Some(ad.name.as_str());
                result.push(ad);
            }
            Err(e) => warn!(%richtung, "Geraet konnte nicht gelesen werden: {}", e),
        }
    }
    debug!(%richtung, anzahl = result.len(), "Geraete aufgelistet");
    Ok(result)
}

/// Listet Ein- und Ausgabegeraete auf
pub fn list_all_devices() -> AudioResult<Vec<AudioDevice>> {
    let mut alle = list_devices(Richtung::Eingabe)?;
    alle.extend(list_devices(Richtung::Ausgabe)?);
    Ok(alle)
}

fn laden(richtung: Richtung, name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    let Some(teil) = name else {
        return match richtung {
            Richtung::Eingabe => host
                .default_input_device()
                .ok_or(AudioError::KeinStandardEingabegeraet),
            Richtung::Ausgabe => host
                .default_output_device()
                .ok_or(AudioError::KeinStandardAusgabegeraet),
        };
    };
    cpal_geraete(richtung)?
        .into_iter()
        .find(|d| d.name().map(|n| n.contains(teil)).unwrap_or(false))
        .ok_or_else(|| AudioError::GeraetNichtGefunden(teil.to_string()))
}

/// Laedt das Eingabegeraet (None = Standard, sonst erster Namenstreffer)
pub fn load_cpal_input_device(name: Option<&str>) -> AudioResult<Device> {
    laden(Richtung::Eingabe, name)
}

/// Laedt das Ausgabegeraet (None = Standard, sonst erster Namenstreffer)
pub fn load_cpal_output_device(name: Option<&str>) -> AudioResult<Device> {
    laden(Richtung::Ausgabe, name)
}

fn beschreiben(device: &Device, richtung: Richtung) -> AudioResult<AudioDevice> {
    let name = device
        .name()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?;

    let bereiche: Vec<(u32, u32, u16)> = match richtung {
        Richtung::Eingabe => device
            .supported_input_configs()
            .map(|c| {
                c.map(|c| (c.min_sample_rate().0, c.max_sample_rate().0, c.channels()))
                    .collect()
            })
            .unwrap_or_default(),
        Richtung::Ausgabe => device
            .supported_output_configs()
            .map(|c| {
                c.map(|c| (c.min_sample_rate().0, c.max_sample_rate().0, c.channels()))
                    .collect()
            })
            .unwrap_or_default(),
    };

    let (sample_rates, channels) = raten_aus_bereichen(&bereiche);
    Ok(AudioDevice {
        name,
        richtung,
        sample_rates,
        channels,
        ist_standard: false,
    })
}

// (min, max, kanaele) -> unterstuetzte Raten, maximale Kanalzahl
fn raten_aus_bereichen(bereiche: &[(u32, u32, u16)]) -> (Vec<u32>, u16) {
    let mut raten = Vec::new();
    let mut kanaele = 1u16;
    for &(min, max, ch) in bereiche {
        for rate in GEPRUEFTE_RATEN {
            if (min..=max).contains(&rate) && !raten.contains(&rate) {
                raten.push(rate);
            }
        }
        kanaele = kanaele.max(ch);
    }
    raten.sort_unstable();
    (raten, kanaele)
}
