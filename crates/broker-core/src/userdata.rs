//! Cloud-init user data assembly.
//!
//! Local compute fulfillment injects a generated cloud-config so the
//! instance comes up with the site's temporary key authorized for the
//! common login user. User-supplied extra user data is appended verbatim
//! after decoding.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use broker_types::{attributes, Order};
use tracing::warn;

/// Builds the base64-encoded user data for a local compute allocation.
///
/// Returns `None` when there is nothing to inject: no site key and no
/// extra user data on the order.
pub fn generate(order: &Order, ssh_common_user: &str, site_public_key: Option<&str>) -> Option<String> {
	let extra = order
		.attribute(attributes::EXTRA_USER_DATA)
		.and_then(|encoded| match STANDARD.decode(encoded) {
			Ok(bytes) => String::from_utf8(bytes).ok(),
			Err(e) => {
				warn!(order = %order.id, error = %e, "dropping undecodable extra user data");
				None
			}
		});

	if site_public_key.is_none() && extra.is_none() {
		return None;
	}

	let mut cloud_config = String::from("#cloud-config\n");
	if let Some(key) = site_public_key {
		cloud_config.push_str(&format!(
			"users:\n  - name: {}\n    ssh_authorized_keys:\n      - {}\n",
			ssh_common_user, key
		));
	}
	if let Some(extra) = extra {
		cloud_config.push_str("runcmd:\n");
		for line in extra.lines().filter(|line| !line.trim().is_empty()) {
			cloud_config.push_str(&format!("  - {}\n", line));
		}
	}
	Some(STANDARD.encode(cloud_config))
}

/// The command that appends the order's real public key on the instance,
/// replacing reliance on the site's temporary key.
pub fn authorize_key_command(public_key: &str) -> String {
	format!(
		"mkdir -p ~/.ssh && echo '{}' >> ~/.ssh/authorized_keys",
		public_key.replace('\'', "")
	)
}

#[cfg(test)]
mod tests {
	use super::*;
	use broker_types::Token;
	use std::collections::HashMap;

	fn order(attributes: HashMap<String, String>) -> Order {
		Order::new(
			"order-1",
			Token::new("access", "alice"),
			Vec::new(),
			attributes,
			true,
			"local",
		)
	}

	#[test]
	fn nothing_to_inject_yields_none() {
		assert!(generate(&order(HashMap::new()), "broker", None).is_none());
	}

	#[test]
	fn site_key_lands_in_cloud_config() {
		let encoded = generate(&order(HashMap::new()), "broker", Some("ssh-rsa AAAA")).unwrap();
		let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
		assert!(decoded.starts_with("#cloud-config"));
		assert!(decoded.contains("ssh-rsa AAAA"));
		assert!(decoded.contains("name: broker"));
	}

	#[test]
	fn extra_user_data_is_appended() {
		let mut attrs = HashMap::new();
		attrs.insert(
			attributes::EXTRA_USER_DATA.to_string(),
			STANDARD.encode("touch /tmp/ready"),
		);
		let encoded = generate(&order(attrs), "broker", None).unwrap();
		let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
		assert!(decoded.contains("touch /tmp/ready"));
	}

	#[test]
	fn undecodable_extra_user_data_is_dropped() {
		let mut attrs = HashMap::new();
		attrs.insert(
			attributes::EXTRA_USER_DATA.to_string(),
			"%%not-base64%%".to_string(),
		);
		assert!(generate(&order(attrs), "broker", None).is_none());
	}
}
