//! Media Module - Lokale Medien
//!
//! Dieses Modul beschafft die lokalen Medien vor dem Raumbeitritt:
//! - Auswahl Kamera + Mikrofon oder Bildschirmfreigabe
//! - Erkennung der Audio-Eingabegeräte
//! - Erzeugung der lokalen RTP-Tracks

mod capture;

pub use capture::{
    DeviceAcquirer, LocalMedia, MediaAcquirer, MediaError, MediaSource, AUDIO_CHANNELS,
    AUDIO_SAMPLE_RATE, VIDEO_CLOCK_RATE,
};
