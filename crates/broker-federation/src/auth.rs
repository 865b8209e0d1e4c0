//! Membership authorization hooks.

use broker_types::{FederationMember, Token};

/// Decides which peers may receive our resources and which peers we accept
/// resources from. `member` is `None` when the request targets the local
/// site itself.
pub trait MemberAuthorizationInterface: Send + Sync {
	fn can_donate_to(&self, member: Option<&FederationMember>, requester: &Token) -> bool;

	fn can_receive_from(&self, member: &FederationMember) -> bool;
}

/// Default policy: every federation member is trusted both ways.
pub struct AcceptAllAuthorization;

impl MemberAuthorizationInterface for AcceptAllAuthorization {
	fn can_donate_to(&self, _member: Option<&FederationMember>, _requester: &Token) -> bool {
		true
	}

	fn can_receive_from(&self, _member: &FederationMember) -> bool {
		true
	}
}
