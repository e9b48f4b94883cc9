//! Presence Module - Raum-Metadaten
//!
//! Read-only Projektion von Teilnehmerzahl und Call-Start,
//! aktualisiert aus den Signaling-Events.

mod room_state;

pub use room_state::{
    render_lines, CallStart, RoomPresenceView, RoomState, RoomUpdate, CALL_START_FORMAT,
};
