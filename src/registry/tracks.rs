//! Track Registry
//!
//! Ordnet verhandelte Media-Lines (mid) Teilnehmern zu und sammelt deren
//! Remote-Tracks in Streams. Die Streams liegen in einer Arena, die über die
//! stabile userId adressiert wird. Keine Netzwerk- oder Medienlogik.

use std::collections::HashMap;

// ============================================================================
// TYPES
// ============================================================================

/// mid → Teilnehmer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantBinding {
    pub user_id: String,
    pub display_name: String,
}

/// Alle Remote-Tracks eines Teilnehmers
#[derive(Debug, Clone)]
pub struct RemoteStream<T> {
    user_id: String,
    tracks: Vec<T>,
}

impl<T> RemoteStream<T> {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            tracks: Vec::new(),
        }
    }

    pub fn with_track(user_id: impl Into<String>, track: T) -> Self {
        let mut stream = Self::new(user_id);
        stream.add_track(track);
        stream
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn tracks(&self) -> &[T] {
        &self.tracks
    }

    pub fn add_track(&mut self, track: T) {
        self.tracks.push(track);
    }
}

/// Wohin ein eingehender Track einsortiert wurde
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackPlacement {
    /// Erster Track dieses Teilnehmers, neuer Stream
    Created { user_id: String },
    /// Track an bestehenden Stream angehängt
    Appended { user_id: String },
    /// mid noch unbekannt, Track wartet auf das Mapping
    Pending { mid: String },
}

/// Sicht auf einen Teilnehmer für die Darstellung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParticipantView {
    pub user_id: String,
    pub display_name: String,
    pub track_count: usize,
}

/// Anzeigename für Teilnehmer ohne bekanntes Mapping
pub const UNKNOWN_PARTICIPANT: &str = "Unknown user";

// ============================================================================
// TRACK REGISTRY
// ============================================================================

/// Lookup mid → userId → RemoteStream
#[derive(Debug)]
pub struct TrackRegistry<T> {
    bindings: HashMap<String, ParticipantBinding>,
    names: HashMap<String, String>,
    streams: HashMap<String, RemoteStream<T>>,
    pending: HashMap<String, Vec<T>>,
}

impl<T> Default for TrackRegistry<T> {
    fn default() -> Self {
        Self {
            bindings: HashMap::new(),
            names: HashMap::new(),
            streams: HashMap::new(),
            pending: HashMap::new(),
        }
    }
}

impl<T> TrackRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bindet eine mid an einen Teilnehmer
    ///
    /// Idempotent: dasselbe Mapping erneut ändert nichts. Wartende Tracks
    /// dieser mid werden sofort einsortiert und zurückgemeldet.
    pub fn bind(
        &mut self,
        mid: &str,
        user_id: &str,
        display_name: &str,
    ) -> Vec<TrackPlacement> {
        let binding = ParticipantBinding {
            user_id: user_id.to_string(),
            display_name: display_name.to_string(),
        };

        if let Some(previous) = self.bindings.insert(mid.to_string(), binding) {
            if previous.user_id != user_id {
                tracing::warn!(
                    "mid {} rebound from {} to {}",
                    mid,
                    previous.user_id,
                    user_id
                );
            }
        }
        self.names
            .insert(user_id.to_string(), display_name.to_string());

        self.pending
            .remove(mid)
            .unwrap_or_default()
            .into_iter()
            .map(|track| self.place(user_id, track))
            .collect()
    }

    /// Löst eine mid zur userId auf
    pub fn resolve(&self, mid: &str) -> Option<&str> {
        self.bindings.get(mid).map(|b| b.user_id.as_str())
    }

    /// Vollständiges Binding einer mid
    pub fn binding(&self, mid: &str) -> Option<&ParticipantBinding> {
        self.bindings.get(mid)
    }

    /// Stream eines Teilnehmers
    pub fn stream_for(&self, user_id: &str) -> Option<&RemoteStream<T>> {
        self.streams.get(user_id)
    }

    /// Registriert einen Stream unter der userId (ersetzt einen vorhandenen)
    pub fn register(&mut self, user_id: &str, stream: RemoteStream<T>) {
        self.streams.insert(user_id.to_string(), stream);
    }

    /// Sortiert einen eingehenden Track ein
    pub fn attach(&mut self, mid: &str, track: T) -> TrackPlacement {
        match self.resolve(mid).map(str::to_string) {
            Some(user_id) => self.place(&user_id, track),
            None => {
                self.pending.entry(mid.to_string()).or_default().push(track);
                TrackPlacement::Pending {
                    mid: mid.to_string(),
                }
            }
        }
    }

    fn place(&mut self, user_id: &str, track: T) -> TrackPlacement {
        match self.streams.get_mut(user_id) {
            Some(stream) => {
                stream.add_track(track);
                TrackPlacement::Appended {
                    user_id: user_id.to_string(),
                }
            }
            None => {
                self.register(user_id, RemoteStream::with_track(user_id, track));
                TrackPlacement::Created {
                    user_id: user_id.to_string(),
                }
            }
        }
    }

    /// Anzeigename eines Teilnehmers
    pub fn display_name(&self, user_id: &str) -> Option<&str> {
        self.names.get(user_id).map(String::as_str)
    }

    /// Anzahl Tracks, die noch auf ihr Mapping warten
    pub fn pending_count(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Alle Teilnehmer mit Stream, sortiert nach userId
    pub fn participants(&self) -> Vec<ParticipantView> {
        let mut views: Vec<ParticipantView> = self
            .streams
            .values()
            .map(|stream| ParticipantView {
                user_id: stream.user_id.clone(),
                display_name: self
                    .display_name(&stream.user_id)
                    .unwrap_or(UNKNOWN_PARTICIPANT)
                    .to_string(),
                track_count: stream.tracks.len(),
            })
            .collect();
        views.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        views
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_and_resolve() {
        let mut registry: TrackRegistry<&str> = TrackRegistry::new();
        assert!(registry.bind("0", "u42", "Alice").is_empty());

        assert_eq!(registry.resolve("0"), Some("u42"));
        assert_eq!(registry.display_name("u42"), Some("Alice"));
        assert_eq!(registry.resolve("1"), None);

        assert_eq!(
            registry.attach("0", "video-track"),
            TrackPlacement::Created {
                user_id: "u42".to_string()
            }
        );
        assert_eq!(registry.stream_for("u42").unwrap().tracks(), &["video-track"]);
    }

    #[test]
    fn test_second_track_appends_to_stream() {
        let mut registry: TrackRegistry<&str> = TrackRegistry::new();
        registry.bind("0", "u1", "Bob");
        registry.bind("1", "u1", "Bob");

        registry.attach("0", "audio");
        assert_eq!(
            registry.attach("1", "video"),
            TrackPlacement::Appended {
                user_id: "u1".to_string()
            }
        );
        assert_eq!(registry.stream_for("u1").unwrap().tracks(), &["audio", "video"]);
        assert_eq!(registry.participants().len(), 1);
    }

    #[test]
    fn test_track_before_mapping_is_not_lost() {
        let mut registry: TrackRegistry<&str> = TrackRegistry::new();

        assert_eq!(
            registry.attach("5", "early"),
            TrackPlacement::Pending {
                mid: "5".to_string()
            }
        );
        assert!(registry.stream_for("u9").is_none());
        assert_eq!(registry.pending_count(), 1);

        let placed = registry.bind("5", "u9", "Carol");
        assert_eq!(
            placed,
            vec![TrackPlacement::Created {
                user_id: "u9".to_string()
            }]
        );
        assert_eq!(registry.pending_count(), 0);
        assert_eq!(registry.stream_for("u9").unwrap().tracks(), &["early"]);
    }

    #[test]
    fn test_rebinding_same_mapping_is_noop() {
        let mut registry: TrackRegistry<&str> = TrackRegistry::new();
        registry.bind("0", "u42", "Alice");
        registry.attach("0", "t1");

        assert!(registry.bind("0", "u42", "Alice").is_empty());
        assert_eq!(
            registry.binding("0"),
            Some(&ParticipantBinding {
                user_id: "u42".to_string(),
                display_name: "Alice".to_string(),
            })
        );
        assert_eq!(registry.stream_for("u42").unwrap().tracks().len(), 1);
    }

    #[test]
    fn test_participants_fall_back_to_unknown_name() {
        let mut registry: TrackRegistry<u8> = TrackRegistry::new();
        registry.register("u2", RemoteStream::with_track("u2", 1));
        registry.bind("3", "u1", "Dana");
        registry.attach("3", 2);

        let views = registry.participants();
        assert_eq!(views[0].user_id, "u1");
        assert_eq!(views[0].display_name, "Dana");
        assert_eq!(views[1].display_name, UNKNOWN_PARTICIPANT);
        assert_eq!(views[1].track_count, 1);
    }
}
