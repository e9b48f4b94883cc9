//! Registry Module - Teilnehmer und Remote-Streams
//!
//! Dieses Modul ordnet verhandelte Media-Lines den Teilnehmern zu:
//! - Bindings aus `streamMapping`-Nachrichten
//! - Remote-Streams pro userId
//! - Tracks, deren Mapping noch fehlt

mod tracks;

pub use tracks::{
    ParticipantBinding, ParticipantView, RemoteStream, TrackPlacement, TrackRegistry,
    UNKNOWN_PARTICIPANT,
};
