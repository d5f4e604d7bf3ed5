//! Transport kinds and candidate selection.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Kinds ────────────────────────────────────────────────────────────

/// A concrete hub transport, in the server's wire vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    /// Full-duplex WebSocket.
    Streaming,
    /// Server-push only channel. Recognized in negotiation replies but
    /// never dialed by this client.
    ServerPush,
    /// Plain HTTP long polling.
    LongPoll,
}

impl TransportKind {
    /// The name used in negotiation payloads.
    pub fn wire_name(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::ServerPush => "serverPush",
            Self::LongPoll => "longPoll",
        }
    }

    /// Parse a server-advertised transport name, case-insensitively.
    pub fn from_wire_name(name: &str) -> Option<Self> {
        for kind in [Self::Streaming, Self::ServerPush, Self::LongPoll] {
            if name.eq_ignore_ascii_case(kind.wire_name()) {
                return Some(kind);
            }
        }
        None
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

// ── Candidate sets ───────────────────────────────────────────────────

/// A set of candidate transports.
///
/// Iteration order is fixed by dial priority (streaming first),
/// regardless of insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TransportSet(u8);

impl TransportSet {
    pub const EMPTY: Self = Self(0);

    pub fn of(kinds: &[TransportKind]) -> Self {
        let mut set = Self::EMPTY;
        for &kind in kinds {
            set.insert(kind);
        }
        set
    }

    pub fn insert(&mut self, kind: TransportKind) {
        self.0 |= Self::bit(kind);
    }

    #[must_use]
    pub fn contains(self, kind: TransportKind) -> bool {
        self.0 & Self::bit(kind) != 0
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Members in dial priority order.
    pub fn iter(self) -> impl Iterator<Item = TransportKind> {
        [
            TransportKind::Streaming,
            TransportKind::ServerPush,
            TransportKind::LongPoll,
        ]
        .into_iter()
        .filter(move |&kind| self.contains(kind))
    }

    fn bit(kind: TransportKind) -> u8 {
        match kind {
            TransportKind::Streaming => 1,
            TransportKind::ServerPush => 1 << 1,
            TransportKind::LongPoll => 1 << 2,
        }
    }
}

impl fmt::Display for TransportSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for kind in self.iter() {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            f.write_str(kind.wire_name())?;
        }
        Ok(())
    }
}

// ── Preference mapping ───────────────────────────────────────────────

/// User-configured transport preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransportPreference {
    /// No explicit choice: try everything, fastest first.
    #[default]
    Auto,
    Streaming,
    ServerPush,
    LongPoll,
}

/// Determine the candidate transports for a connection attempt.
///
/// `compatibility_mode` drops streaming for servers behind middleboxes
/// that mishandle WebSocket upgrades; `force_override` insists on the
/// configured preference regardless.
pub fn select_transports(
    preference: TransportPreference,
    compatibility_mode: bool,
    force_override: bool,
) -> TransportSet {
    let mut set = match preference {
        TransportPreference::Auto | TransportPreference::Streaming => {
            TransportSet::of(&[TransportKind::Streaming, TransportKind::LongPoll])
        }
        // Server-push is not dialable, so both remaining preferences
        // collapse to long polling.
        TransportPreference::ServerPush | TransportPreference::LongPoll => {
            TransportSet::of(&[TransportKind::LongPoll])
        }
    };

    if compatibility_mode && !force_override && set.contains(TransportKind::Streaming) {
        set = TransportSet::of(&[TransportKind::LongPoll]);
    }

    set
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(set: TransportSet) -> Vec<TransportKind> {
        set.iter().collect()
    }

    #[test]
    fn auto_prefers_streaming_with_fallback() {
        let set = select_transports(TransportPreference::Auto, false, false);
        assert_eq!(
            kinds(set),
            vec![TransportKind::Streaming, TransportKind::LongPoll]
        );
    }

    #[test]
    fn streaming_preference_keeps_fallback() {
        let set = select_transports(TransportPreference::Streaming, false, false);
        assert_eq!(
            kinds(set),
            vec![TransportKind::Streaming, TransportKind::LongPoll]
        );
    }

    #[test]
    fn server_push_maps_to_long_poll() {
        let set = select_transports(TransportPreference::ServerPush, false, false);
        assert_eq!(kinds(set), vec![TransportKind::LongPoll]);
    }

    #[test]
    fn long_poll_preference_is_exact() {
        let set = select_transports(TransportPreference::LongPoll, false, false);
        assert_eq!(kinds(set), vec![TransportKind::LongPoll]);
    }

    #[test]
    fn compatibility_mode_drops_streaming() {
        let set = select_transports(TransportPreference::Auto, true, false);
        assert_eq!(kinds(set), vec![TransportKind::LongPoll]);
    }

    #[test]
    fn force_override_bypasses_compatibility_mode() {
        let set = select_transports(TransportPreference::Auto, true, true);
        assert_eq!(
            kinds(set),
            vec![TransportKind::Streaming, TransportKind::LongPoll]
        );
    }

    #[test]
    fn compatibility_mode_is_a_no_op_for_long_poll() {
        let set = select_transports(TransportPreference::LongPoll, true, false);
        assert_eq!(kinds(set), vec![TransportKind::LongPoll]);
    }

    #[test]
    fn iteration_order_is_priority_not_insertion() {
        let mut set = TransportSet::EMPTY;
        set.insert(TransportKind::LongPoll);
        set.insert(TransportKind::Streaming);
        assert_eq!(
            kinds(set),
            vec![TransportKind::Streaming, TransportKind::LongPoll]
        );
    }

    #[test]
    fn wire_name_roundtrip_is_case_insensitive() {
        assert_eq!(
            TransportKind::from_wire_name("STREAMING"),
            Some(TransportKind::Streaming)
        );
        assert_eq!(
            TransportKind::from_wire_name("serverpush"),
            Some(TransportKind::ServerPush)
        );
        assert_eq!(TransportKind::from_wire_name("carrier-pigeon"), None);
    }

    #[test]
    fn set_display_lists_members_in_order() {
        let set = TransportSet::of(&[TransportKind::LongPoll, TransportKind::Streaming]);
        assert_eq!(set.to_string(), "streaming, longPoll");
    }
}
