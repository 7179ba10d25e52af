//! Cluster membership and partition ownership services.

mod member;
mod partition;
mod service;
mod views;

pub use member::{Member, MembershipEvent, MembershipEventType};
pub use partition::PartitionService;
pub use service::ClusterService;
pub use views::{MembersView, PartitionsView};
