use uuid::Uuid;

use crate::models::{Peer, PeerStatus, UserRecord};
use crate::presence::PresenceTracker;

/// The list of people the user can chat with.
#[derive(Debug, Default)]
pub struct Directory {
    peers: Vec<Peer>,
    pub loading: bool,
    pub error: Option<String>,
}

impl Directory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peers(&self) -> &[Peer] {
        &self.peers
    }

    pub fn get(&self, peer_id: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.id == peer_id)
    }

    pub fn replace(&mut self, records: Vec<UserRecord>) {
        self.peers = records.into_iter().map(peer_from_record).collect();
        self.error = None;
    }

    /// Presence wins over whatever status the directory reported.
    pub fn effective_status(peer: &Peer, presence: &PresenceTracker) -> PeerStatus {
        if presence.is_online(&peer.id) {
            PeerStatus::Online
        } else if peer.status == PeerStatus::Away {
            PeerStatus::Away
        } else {
            PeerStatus::Offline
        }
    }

    pub fn clear(&mut self) {
        self.peers.clear();
        self.loading = false;
        self.error = None;
    }
}

fn peer_from_record(record: UserRecord) -> Peer {
    Peer {
        id: record
            .id
            .or(record.mongo_id)
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        name: record.name.unwrap_or_else(|| "Unknown User".to_string()),
        email: record.email.unwrap_or_else(|| "No email".to_string()),
        status: record
            .status
            .as_deref()
            .and_then(PeerStatus::parse)
            .unwrap_or(PeerStatus::Offline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_get_defaults() {
        let mut directory = Directory::new();
        directory.replace(vec![
            UserRecord {
                mongo_id: Some("m1".to_string()),
                name: Some("Ana".to_string()),
                ..Default::default()
            },
            UserRecord::default(),
        ]);

        let peers = directory.peers();
        assert_eq!(peers[0].id, "m1");
        assert_eq!(peers[0].email, "No email");
        assert_eq!(peers[1].name, "Unknown User");
        assert!(!peers[1].id.is_empty());
        assert_eq!(peers[1].status, PeerStatus::Offline);
    }

    #[test]
    fn presence_overrides_status() {
        let mut directory = Directory::new();
        directory.replace(vec![
            UserRecord {
                id: Some("1".to_string()),
                status: Some("away".to_string()),
                ..Default::default()
            },
            UserRecord {
                id: Some("2".to_string()),
                status: Some("online".to_string()),
                ..Default::default()
            },
        ]);
        let mut presence = PresenceTracker::new();

        let away = directory.get("1").unwrap();
        let stale = directory.get("2").unwrap();
        assert_eq!(Directory::effective_status(away, &presence), PeerStatus::Away);
        assert_eq!(Directory::effective_status(stale, &presence), PeerStatus::Offline);

        presence.peer_online("1");
        assert_eq!(Directory::effective_status(away, &presence), PeerStatus::Online);
    }
}
