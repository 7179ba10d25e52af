//! Cluster service: the authoritative, versioned member list.

use std::sync::{Arc, RwLock};

use uuid::Uuid;

use crate::cluster::Member;
use crate::event::{ClientEvent, EventDispatcher};

#[derive(Debug, Default)]
struct MemberList {
    version: i32,
    members: Vec<Member>,
}

/// Maintains the member roster from member-list view frames.
///
/// Each view carries a version and the full list; the service computes the
/// added/removed deltas against the previous version and publishes
/// `members-added` before `members-removed`. Views with a version at or
/// below the installed one are discarded.
#[derive(Debug)]
pub struct ClusterService {
    dispatcher: Arc<EventDispatcher>,
    list: RwLock<MemberList>,
}

impl ClusterService {
    /// Creates a cluster service publishing on the given dispatcher.
    pub fn new(dispatcher: Arc<EventDispatcher>) -> Self {
        Self {
            dispatcher,
            list: RwLock::new(MemberList::default()),
        }
    }

    /// Applies a member-list view.
    ///
    /// Returns `true` if the view was installed, `false` if it was stale.
    pub fn apply_members_view(&self, version: i32, members: Vec<Member>) -> bool {
        let (added, removed) = {
            let mut list = self.list.write().expect("member list poisoned");
            if list.version != 0 && version <= list.version {
                tracing::debug!(
                    incoming = version,
                    installed = list.version,
                    "discarding stale member-list view"
                );
                return false;
            }

            let added: Vec<Member> = members
                .iter()
                .filter(|m| !list.members.iter().any(|old| old.uuid == m.uuid))
                .cloned()
                .collect();
            let removed: Vec<Member> = list
                .members
                .iter()
                .filter(|old| !members.iter().any(|m| m.uuid == old.uuid))
                .cloned()
                .collect();

            list.version = version;
            list.members = members;
            (added, removed)
        };

        tracing::info!(
            version = version,
            added = added.len(),
            removed = removed.len(),
            "installed member-list view"
        );

        if !added.is_empty() {
            self.dispatcher.publish(ClientEvent::MembersAdded(added));
        }
        if !removed.is_empty() {
            self.dispatcher.publish(ClientEvent::MembersRemoved(removed));
        }
        true
    }

    /// Returns the current member list.
    pub fn members(&self) -> Vec<Member> {
        self.list.read().expect("member list poisoned").members.clone()
    }

    /// Returns the member with the given uuid, if present.
    pub fn member(&self, uuid: &Uuid) -> Option<Member> {
        self.list
            .read()
            .expect("member list poisoned")
            .members
            .iter()
            .find(|m| m.uuid == *uuid)
            .cloned()
    }

    /// Returns the number of known members.
    pub fn member_count(&self) -> usize {
        self.list.read().expect("member list poisoned").members.len()
    }

    /// Returns the installed member-list version.
    pub fn version(&self) -> i32 {
        self.list.read().expect("member list poisoned").version
    }
}
