use std::collections::HashSet;

/// Which peers are online, and which of them are typing to us right now.
#[derive(Debug, Default, Clone)]
pub struct PresenceTracker {
    online: HashSet<String>,
    typing: HashSet<String>,
}

impl PresenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn peer_online(&mut self, peer_id: &str) {
        if self.online.insert(peer_id.to_string()) {
            log::debug!("Peer {} is online", peer_id);
        }
    }

    pub fn peer_offline(&mut self, peer_id: &str) {
        if self.online.remove(peer_id) {
            log::debug!("Peer {} went offline", peer_id);
        }
        self.typing.remove(peer_id);
    }

    pub fn snapshot<I>(&mut self, peer_ids: I)
    where
        I: IntoIterator<Item = String>,
    {
        self.online = peer_ids.into_iter().collect();
        self.typing.retain(|id| self.online.contains(id));
        log::debug!("Presence snapshot: {} peers online", self.online.len());
    }

    pub fn typing_started(&mut self, peer_id: &str) {
        self.typing.insert(peer_id.to_string());
    }

    pub fn typing_stopped(&mut self, peer_id: &str) {
        self.typing.remove(peer_id);
    }

    pub fn clear(&mut self) {
        self.online.clear();
        self.typing.clear();
    }

    pub fn is_online(&self, peer_id: &str) -> bool {
        self.online.contains(peer_id)
    }

    pub fn is_typing(&self, peer_id: &str) -> bool {
        self.typing.contains(peer_id)
    }

    pub fn online_ids(&self) -> &HashSet<String> {
        &self.online
    }

    pub fn typing_ids(&self) -> &HashSet<String> {
        &self.typing
    }
}
