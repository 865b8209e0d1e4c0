//! Peer selection for order forwarding.

use broker_types::FederationMember;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Chooses the next peer to try for an open order.
///
/// Implementations see the current membership snapshot on every call and
/// must never return the local site.
pub trait MemberPickerInterface: Send + Sync {
	fn pick(&self, members: &[FederationMember]) -> Option<FederationMember>;
}

/// Cycles through the membership in arrival order, skipping the local site.
pub struct RoundRobinPicker {
	local_member_id: String,
	current: AtomicUsize,
}

impl RoundRobinPicker {
	pub fn new(local_member_id: impl Into<String>) -> Self {
		Self {
			local_member_id: local_member_id.into(),
			current: AtomicUsize::new(0),
		}
	}
}

impl MemberPickerInterface for RoundRobinPicker {
	fn pick(&self, members: &[FederationMember]) -> Option<FederationMember> {
		let candidates: Vec<&FederationMember> = members
			.iter()
			.filter(|member| member.id != self.local_member_id)
			.collect();
		if candidates.is_empty() {
			return None;
		}
		let index = self.current.fetch_add(1, Ordering::Relaxed) % candidates.len();
		Some(candidates[index].clone())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn members(ids: &[&str]) -> Vec<FederationMember> {
		ids.iter().map(|id| FederationMember::new(*id)).collect()
	}

	#[test]
	fn cycles_through_remote_members() {
		let picker = RoundRobinPicker::new("local");
		let members = members(&["local", "site-a", "site-b"]);

		let first = picker.pick(&members).unwrap();
		let second = picker.pick(&members).unwrap();
		let third = picker.pick(&members).unwrap();

		assert_eq!(first.id, "site-a");
		assert_eq!(second.id, "site-b");
		assert_eq!(third.id, "site-a");
	}

	#[test]
	fn never_picks_the_local_site() {
		let picker = RoundRobinPicker::new("local");
		let members = members(&["local"]);
		assert!(picker.pick(&members).is_none());
	}

	#[test]
	fn tolerates_membership_changes_between_calls() {
		let picker = RoundRobinPicker::new("local");
		let full = members(&["site-a", "site-b", "site-c"]);
		let shrunk = members(&["site-a"]);

		picker.pick(&full).unwrap();
		picker.pick(&full).unwrap();
		// Index wraps over the smaller snapshot instead of panicking.
		assert_eq!(picker.pick(&shrunk).unwrap().id, "site-a");
	}
}
