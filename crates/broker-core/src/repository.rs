//! In-memory order working set and forwarding bookkeeping.

use broker_types::{normalize_instance_id, Millis, Order, OrderState, ResourceKind};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Mutex;
use tracing::debug;

/// Index of all live orders.
///
/// Orders are mutated only through [`OrderRepository::update`], which holds
/// the shard lock for the whole closure, so readers never observe a state
/// transition with a half-applied instance or providing-member binding.
#[derive(Default)]
pub struct OrderRepository {
	orders: DashMap<String, Order>,
}

impl OrderRepository {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn add(&self, order: Order) {
		debug!(order = %order.id, state = %order.state, "order added");
		self.orders.insert(order.id.clone(), order);
	}

	pub fn get(&self, order_id: &str) -> Option<Order> {
		self.orders.get(order_id).map(|entry| entry.clone())
	}

	/// Lookup scoped to the owning user, for user-facing operations.
	pub fn get_for_user(&self, user: &str, order_id: &str) -> Option<Order> {
		self.get(order_id)
			.filter(|order| order.federation_token.user == user)
	}

	pub fn by_user(&self, user: &str, local_only: bool) -> Vec<Order> {
		self.orders
			.iter()
			.filter(|entry| entry.federation_token.user == user)
			.filter(|entry| !local_only || entry.is_local)
			.map(|entry| entry.clone())
			.collect()
	}

	/// Orders currently in any of `states`, optionally narrowed by kind.
	pub fn orders_in(&self, kind: Option<ResourceKind>, states: &[OrderState]) -> Vec<Order> {
		self.orders
			.iter()
			.filter(|entry| entry.state.is_in(states))
			.filter(|entry| kind.map(|kind| entry.resource_kind == kind).unwrap_or(true))
			.map(|entry| entry.clone())
			.collect()
	}

	/// Every order that currently holds an instance.
	pub fn orders_with_instances(&self) -> Vec<Order> {
		self.orders
			.iter()
			.filter(|entry| entry.instance_id.is_some())
			.map(|entry| entry.clone())
			.collect()
	}

	/// Resolves a (possibly global) instance id back to its order.
	pub fn order_by_instance(&self, instance_id: &str) -> Option<Order> {
		let wanted = normalize_instance_id(instance_id);
		self.orders
			.iter()
			.find(|entry| {
				entry
					.instance_id
					.as_deref()
					.map(|bound| normalize_instance_id(bound) == wanted)
					.unwrap_or(false)
			})
			.map(|entry| entry.clone())
	}

	/// Orders donated by peers and fulfilled with local resources.
	pub fn all_served_orders(&self) -> Vec<Order> {
		self.orders
			.iter()
			.filter(|entry| !entry.is_local)
			.map(|entry| entry.clone())
			.collect()
	}

	/// Served orders a peer currently holds in FULFILLED.
	pub fn fulfilled_count_for_peer(&self, member_id: &str) -> usize {
		self.orders
			.iter()
			.filter(|entry| {
				!entry.is_local
					&& entry.requesting_member_id == member_id
					&& entry.state == OrderState::Fulfilled
			})
			.count()
	}

	/// Applies `mutate` to the order under the shard lock and returns the
	/// updated copy.
	pub fn update<F>(&self, order_id: &str, mutate: F) -> Option<Order>
	where
		F: FnOnce(&mut Order),
	{
		let mut entry = self.orders.get_mut(order_id)?;
		mutate(&mut entry);
		Some(entry.clone())
	}

	/// Owner-initiated removal. Orders still holding an instance move to
	/// DELETED and stay visible until teardown completes; the rest leave the
	/// working set immediately. Returns the updated order if it remains.
	pub fn remove(&self, order_id: &str, now: Millis) -> Option<Order> {
		let has_instance = self
			.orders
			.get(order_id)
			.map(|entry| entry.instance_id.is_some())?;
		if has_instance {
			self.update(order_id, |order| order.set_state(OrderState::Deleted, now))
		} else {
			self.exclude(order_id);
			None
		}
	}

	/// Hard removal from the working set.
	pub fn exclude(&self, order_id: &str) -> Option<Order> {
		self.orders.remove(order_id).map(|(_, order)| {
			debug!(order = %order.id, "order excluded");
			order
		})
	}

	pub fn all(&self) -> Vec<Order> {
		self.orders.iter().map(|entry| entry.clone()).collect()
	}

	pub fn contains(&self, order_id: &str) -> bool {
		self.orders.contains_key(order_id)
	}
}

/// One in-flight forward attempt.
#[derive(Debug, Clone)]
pub struct ForwardedEntry {
	pub sent_at: Millis,
	/// Every peer this order was offered to since it last left OPEN for
	/// PENDING. Used for re-forward exclusion and cancellation notices.
	pub tried_peers: Vec<String>,
}

/// Tracking table for orders forwarded to peers.
#[derive(Default)]
pub struct ForwardedOrders {
	entries: DashMap<String, ForwardedEntry>,
}

impl ForwardedOrders {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records a forward to `peer`, refreshing the timeout clock.
	pub fn track(&self, order_id: &str, peer: &str, now: Millis) {
		let mut entry = self
			.entries
			.entry(order_id.to_string())
			.or_insert_with(|| ForwardedEntry {
				sent_at: now,
				tried_peers: Vec::new(),
			});
		entry.sent_at = now;
		if !entry.tried_peers.iter().any(|tried| tried == peer) {
			entry.tried_peers.push(peer.to_string());
		}
	}

	pub fn is_tracked(&self, order_id: &str) -> bool {
		self.entries.contains_key(order_id)
	}

	/// Refreshes the timeout clock, e.g. when a grant arrives and the
	/// benchmark step still has to finish.
	pub fn touch(&self, order_id: &str, now: Millis) {
		if let Some(mut entry) = self.entries.get_mut(order_id) {
			entry.sent_at = now;
		}
	}

	pub fn tried_peers(&self, order_id: &str) -> Vec<String> {
		self.entries
			.get(order_id)
			.map(|entry| entry.tried_peers.clone())
			.unwrap_or_default()
	}

	pub fn remove(&self, order_id: &str) -> Option<ForwardedEntry> {
		self.entries.remove(order_id).map(|(_, entry)| entry)
	}

	/// Test hook: ages an entry so timeout handling can run without waiting.
	#[cfg(test)]
	pub(crate) fn backdate(&self, order_id: &str, by_ms: Millis) {
		if let Some(mut entry) = self.entries.get_mut(order_id) {
			entry.sent_at = entry.sent_at.saturating_sub(by_ms);
		}
	}

	/// Drains every entry older than `timeout_ms` and returns its order id
	/// with the peer history.
	pub fn drain_timed_out(&self, timeout_ms: Millis, now: Millis) -> Vec<(String, ForwardedEntry)> {
		let expired: Vec<String> = self
			.entries
			.iter()
			.filter(|entry| now.saturating_sub(entry.sent_at) > timeout_ms)
			.map(|entry| entry.key().clone())
			.collect();
		expired
			.into_iter()
			.filter_map(|order_id| self.entries.remove(&order_id))
			.collect()
	}
}

/// Batches that already failed the federation-user path in the current
/// scheduling pass. Siblings short-circuit to forwarding instead of
/// repeating a doomed local probe.
#[derive(Default)]
pub struct FailedBatches {
	batches: Mutex<HashSet<String>>,
}

impl FailedBatches {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn fail(&self, batch_id: &str) {
		self.batches
			.lock()
			.expect("failed batches poisoned")
			.insert(batch_id.to_string());
	}

	pub fn has_failed(&self, batch_id: &str) -> bool {
		self.batches
			.lock()
			.expect("failed batches poisoned")
			.contains(batch_id)
	}

	pub fn clear(&self) {
		self.batches.lock().expect("failed batches poisoned").clear();
	}
}
