//! Raum-Zustand und seine Darstellung
//!
//! `RoomState` wird aus `usersCount`/`callStart`-Nachrichten feldweise
//! überschrieben (last-write-wins). Die View ist eine reine Projektion auf den
//! aktuellen Stand eines `watch`-Kanals.

use chrono::{Duration, NaiveDateTime};
use tokio::sync::watch;

/// Zeitformat des Relays für `callStart`
pub const CALL_START_FORMAT: &str = "%d.%m.%Y %H:%M:%S";

// ============================================================================
// ROOM STATE
// ============================================================================

/// Startzeit des Calls, roh und (falls möglich) geparst
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStart {
    raw: String,
    parsed: Option<NaiveDateTime>,
}

impl CallStart {
    pub fn parse(raw: &str) -> Self {
        let parsed = NaiveDateTime::parse_from_str(raw.trim(), CALL_START_FORMAT).ok();
        if parsed.is_none() {
            tracing::debug!("callStart '{}' does not match relay format", raw);
        }
        Self {
            raw: raw.to_string(),
            parsed,
        }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn started_at(&self) -> Option<NaiveDateTime> {
        self.parsed
    }

    /// Laufzeit des Calls bis `now`, nie negativ
    pub fn elapsed(&self, now: NaiveDateTime) -> Option<Duration> {
        self.parsed
            .map(|start| (now - start).max(Duration::zero()))
    }
}

/// Einzelne Änderung am Raum-Zustand
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomUpdate {
    UsersCount(u32),
    CallStart(String),
}

/// Snapshot der Raum-Metadaten
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoomState {
    pub users_count: Option<u32>,
    pub call_start: Option<CallStart>,
}

impl RoomState {
    /// Übernimmt ein Update, gibt `true` zurück wenn sich etwas geändert hat
    pub fn apply(&mut self, update: RoomUpdate) -> bool {
        match update {
            RoomUpdate::UsersCount(count) => {
                let changed = self.users_count != Some(count);
                self.users_count = Some(count);
                changed
            }
            RoomUpdate::CallStart(raw) => {
                let start = CallStart::parse(&raw);
                let changed = self.call_start.as_ref() != Some(&start);
                self.call_start = Some(start);
                changed
            }
        }
    }
}

// ============================================================================
// PRESENCE VIEW
// ============================================================================

/// Read-only Sicht auf den aktuellen Raum-Zustand
#[derive(Debug, Clone)]
pub struct RoomPresenceView {
    state: watch::Receiver<RoomState>,
}

impl RoomPresenceView {
    pub fn new(state: watch::Receiver<RoomState>) -> Self {
        Self { state }
    }

    /// Aktueller Snapshot
    pub fn current(&self) -> RoomState {
        self.state.borrow().clone()
    }

    /// Wartet auf die nächste Änderung, `false` wenn die Session beendet ist
    pub async fn changed(&mut self) -> bool {
        self.state.changed().await.is_ok()
    }

    /// Anzeigezeilen für den aktuellen Stand
    pub fn lines(&self, now: NaiveDateTime) -> Vec<String> {
        render_lines(&self.state.borrow(), now)
    }
}

/// Formatiert einen Raum-Zustand für die Anzeige
pub fn render_lines(state: &RoomState, now: NaiveDateTime) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(start) = &state.call_start {
        lines.push(format!("Call start: {}", start.raw()));
        if let Some(elapsed) = start.elapsed(now) {
            lines.push(format!("Call duration: {}", format_duration(elapsed)));
        }
    }
    if let Some(count) = state.users_count {
        lines.push(format!("Users count: {}", count));
    }
    lines
}

fn format_duration(duration: Duration) -> String {
    let secs = duration.num_seconds();
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 2)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_fields_are_last_write_wins() {
        let mut state = RoomState::default();
        assert!(state.apply(RoomUpdate::UsersCount(2)));
        assert!(state.apply(RoomUpdate::CallStart("02.01.2024 15:04:05".to_string())));
        assert!(state.apply(RoomUpdate::UsersCount(3)));
        assert!(!state.apply(RoomUpdate::UsersCount(3)));

        assert_eq!(state.users_count, Some(3));
        assert_eq!(
            state.call_start.as_ref().and_then(CallStart::started_at),
            Some(at(15, 4, 5))
        );
    }

    #[test]
    fn test_render_lines() {
        let mut state = RoomState::default();
        assert!(render_lines(&state, at(16, 0, 0)).is_empty());

        state.apply(RoomUpdate::CallStart("02.01.2024 15:04:05".to_string()));
        state.apply(RoomUpdate::UsersCount(4));

        assert_eq!(
            render_lines(&state, at(16, 5, 6)),
            vec![
                "Call start: 02.01.2024 15:04:05".to_string(),
                "Call duration: 01:01:01".to_string(),
                "Users count: 4".to_string(),
            ]
        );
    }

    #[test]
    fn test_unparseable_call_start_is_shown_raw() {
        let mut state = RoomState::default();
        state.apply(RoomUpdate::CallStart("yesterday".to_string()));

        assert_eq!(render_lines(&state, at(0, 0, 0)), vec!["Call start: yesterday".to_string()]);
    }

    #[tokio::test]
    async fn test_view_follows_watch_channel() {
        let (tx, rx) = watch::channel(RoomState::default());
        let mut view = RoomPresenceView::new(rx);

        tx.send_modify(|state| {
            state.apply(RoomUpdate::UsersCount(5));
        });
        assert!(view.changed().await);
        assert_eq!(view.current().users_count, Some(5));

        drop(tx);
        assert!(!view.changed().await);
    }
}
