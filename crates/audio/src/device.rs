//! Geraete-Auflistung und -Auswahl via cpal
//!
//! Geraete werden ueber ihren Namen identifiziert; `None` bedeutet das
//! Standard-Geraet des Hosts.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

use crate::error::{AudioError, AudioResult};

/// Informationen ueber ein Audio-Geraet
#[derive(Debug, Clone)]
pub struct AudioGeraet {
    /// Anzeigename (dient gleichzeitig als ID)
    pub name: String,
    /// Ob dies das Standard-Geraet ist
    pub ist_standard: bool,
}

/// Listet alle verfuegbaren Eingabegeraete auf
pub fn eingabe_geraete_auflisten() -> AudioResult<Vec<AudioGeraet>> {
    let host = cpal::default_host();
    let standard_name = host
        .default_input_device()
        .and_then(|d| d.name().ok());

    let geraete = host
        .input_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .map(|name| AudioGeraet {
            ist_standard: Some(&name) == standard_name.as_ref(),
            name,
        })
        .collect();

    Ok(geraete)
}

/// Listet alle verfuegbaren Ausgabegeraete auf
pub fn ausgabe_geraete_auflisten() -> AudioResult<Vec<AudioGeraet>> {
    let host = cpal::default_host();
    let standard_name = host
        .default_output_device()
        .and_then(|d| d.name().ok());

    let geraete = host
        .output_devices()
        .map_err(|e| AudioError::StreamFehler(e.to_string()))?
        .filter_map(|d| d.name().ok())
        .map(|name| AudioGeraet {
            ist_standard: Some(&name) == standard_name.as_ref(),
            name,
        })
        .collect();

    Ok(geraete)
}

/// Sucht ein Eingabegeraet nach Namen (None = Standard)
pub fn eingabe_geraet_suchen(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_input_device()
            .ok_or(AudioError::KeinStandardEingabegeraet),
        Some(gesucht) => host
            .input_devices()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?
            .find(|d| d.name().map(|n| n == gesucht).unwrap_or(false))
            .ok_or_else(|| AudioError::GeraetNichtGefunden(gesucht.to_string())),
    }
}

/// Sucht ein Ausgabegeraet nach Namen (None = Standard)
pub fn ausgabe_geraet_suchen(name: Option<&str>) -> AudioResult<Device> {
    let host = cpal::default_host();
    match name {
        None => host
            .default_output_device()
            .ok_or(AudioError::KeinStandardAusgabegeraet),
        Some(gesucht) => host
            .output_devices()
            .map_err(|e| AudioError::StreamFehler(e.to_string()))?
            .find(|d| d.name().map(|n| n == gesucht).unwrap_or(false))
            .ok_or_else(|| AudioError::GeraetNichtGefunden(gesucht.to_string())),
    }
}
