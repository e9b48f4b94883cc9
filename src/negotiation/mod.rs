//! Negotiation Module
//!
//! Enthält:
//! - Media Transport Abstraktion + webrtc-rs Implementierung
//! - Perfect-Negotiation Coordinator
//! - Session pro Raumbeitritt (Drivers, Teardown)

pub mod coordinator;
pub mod session;
pub mod transport;

pub use coordinator::{
    NegotiationCoordinator, NegotiationError, NegotiationFlags, RolePolicy, SessionEvent,
    SignalOutcome, SignalingRole,
};
pub use session::{NegotiationSession, SessionError};
pub use transport::{
    MediaTransport, RtcEvent, RtcTransport, SignalingState, TransportError, TransportEvent,
};
