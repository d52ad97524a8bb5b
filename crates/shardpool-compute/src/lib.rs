//! Compute backend — managed instance group operations.
//!
//! The controller sees one capability set, [`InstanceGroup`]: read
//! the target size, resize, list members, delete one member. Two
//! backends implement it against the GCE Instance Group Manager REST
//! API — [`ZonalGroup`] and [`RegionalGroup`] — selected by
//! configuration, one constructor each. Resize and delete are
//! independent provider calls; nothing here assumes they are atomic.

mod auth;
mod gce;

pub use auth::TokenSource;
pub use gce::{RegionalGroup, ZonalGroup};

use rand::Rng;
use thiserror::Error;

/// Errors from the compute backend.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("compute API request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("compute API returned status {status} for {operation}: {body}")]
    Status {
        operation: &'static str,
        status: u16,
        body: String,
    },

    #[error("failed to obtain access token: {0}")]
    Auth(String),

    #[error("no members in instance group")]
    NoMembers,
}

/// One VM in the managed group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupMember {
    pub name: String,
    pub zone: String,
}

/// Capability set shared by the zonal and regional backends.
pub trait InstanceGroup {
    /// Provider-side target size of the group.
    fn get_target_size(
        &self,
    ) -> impl std::future::Future<Output = Result<u32, ComputeError>> + Send;

    /// Set the target size.
    fn resize(&self, size: u32)
    -> impl std::future::Future<Output = Result<(), ComputeError>> + Send;

    /// Current member set. Authoritative provider state, never cached
    /// by callers across iterations.
    fn list_members(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<GroupMember>, ComputeError>> + Send;

    /// Delete one member, shrinking the group by one.
    fn delete_member(
        &self,
        member: &GroupMember,
    ) -> impl std::future::Future<Output = Result<(), ComputeError>> + Send;
}

/// Pick a scale-down victim uniformly at random.
pub fn pick_victim(members: &[GroupMember]) -> Result<&GroupMember, ComputeError> {
    if members.is_empty() {
        return Err(ComputeError::NoMembers);
    }
    let i = rand::thread_rng().gen_range(0..members.len());
    Ok(&members[i])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(name: &str) -> GroupMember {
        GroupMember {
            name: name.to_string(),
            zone: "europe-west1-b".to_string(),
        }
    }

    #[test]
    fn empty_group_has_no_victim() {
        assert!(matches!(pick_victim(&[]), Err(ComputeError::NoMembers)));
    }

    #[test]
    fn victim_comes_from_the_member_list() {
        let members = vec![member("a"), member("b"), member("c")];
        for _ in 0..20 {
            let v = pick_victim(&members).unwrap();
            assert!(members.contains(v));
        }
    }

    #[test]
    fn single_member_is_always_picked() {
        let members = vec![member("only")];
        assert_eq!(pick_victim(&members).unwrap().name, "only");
    }
}
