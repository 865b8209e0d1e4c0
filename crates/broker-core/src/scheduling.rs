//! The order scheduling loop and the forwarding protocol.
//!
//! One pass clears the per-pass batch failures, reconciles forward
//! timeouts and then drives every OPEN order: local fulfillment first
//! (caller credential, then the site's federation-service credential),
//! forwarding to a peer as the last resort. Forward outcomes arrive
//! asynchronously and are reconciled in [`handle_forward_reply`], which is
//! the single place stale and duplicate replies are filtered out.

use crate::controller::BrokerContext;
use crate::requirements::Requirements;
use crate::{benchmark, monitors, userdata};
use broker_federation::{ForwardOutcome, ForwardRequest, ServedOrderReply};
use broker_types::order::categories;
use broker_types::{
	attributes, normalize_instance_id, now_millis, BrokerError, Category, FederationMember,
	Instance, Order, OrderState, ProviderError, ResourceKind, Result, Token,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One scheduler tick.
pub(crate) async fn check_and_submit_open_orders(ctx: &Arc<BrokerContext>) {
	ctx.failed_batches.clear();
	reconcile_forward_timeouts(ctx).await;

	let mut all_scheduled = true;
	for order in ctx.repository.orders_in(None, &[OrderState::Open]) {
		let now = now_millis();
		// Re-read; a callback may have advanced the order meanwhile.
		let Some(order) = ctx.repository.get(&order.id) else {
			continue;
		};
		if order.state != OrderState::Open {
			continue;
		}
		if order.is_expired(now) {
			info!(order = %order.id, "order expired before fulfillment");
			if let Some(closed) = ctx
				.repository
				.update(&order.id, |o| o.set_state(OrderState::Closed, now))
			{
				ctx.persist(&closed).await;
			}
			continue;
		}
		if !order.is_into_valid_period(now) {
			all_scheduled = false;
			continue;
		}
		if !schedule_order(ctx, &order).await {
			all_scheduled = false;
		}
	}
	if !all_scheduled {
		debug!("scheduling pass left orders open");
	}
}

/// Attempts fulfillment for one OPEN order. Returns whether the order left
/// the OPEN state this pass.
async fn schedule_order(ctx: &Arc<BrokerContext>, order: &Order) -> bool {
	let batch_failed = order
		.batch_id()
		.map(|batch| ctx.failed_batches.has_failed(batch))
		.unwrap_or(false);

	if order.is_local {
		match ctx.caller_local_token(&order.federation_token.access_id).await {
			Ok(token) => {
				if create_local_instance(ctx, order, &token).await {
					return true;
				}
			}
			Err(e) => debug!(order = %order.id, error = %e, "caller has no local credentials"),
		}
		if !batch_failed {
			match ctx.federation_token(order).await {
				Ok(token) => {
					if create_local_instance(ctx, order, &token).await {
						return true;
					}
				}
				Err(e) => warn!(order = %order.id, error = %e, "federation credential unavailable"),
			}
			if let Some(batch) = order.batch_id() {
				ctx.failed_batches.fail(batch);
			}
		}
		forward_to_peer(ctx, order).await
	} else {
		// Donated orders are never forwarded onward.
		if batch_failed {
			return false;
		}
		let token = match ctx.federation_token(order).await {
			Ok(token) => token,
			Err(e) => {
				warn!(order = %order.id, error = %e, "federation credential unavailable");
				return false;
			}
		};
		let fulfilled = create_local_instance(ctx, order, &token).await;
		if !fulfilled {
			if let Some(batch) = order.batch_id() {
				ctx.failed_batches.fail(batch);
			}
		}
		fulfilled
	}
}

/// Resets every PENDING order whose forward outstripped the timeout. A
/// late callback for a drained entry is ignored by [`handle_forward_reply`].
pub(crate) async fn reconcile_forward_timeouts(ctx: &Arc<BrokerContext>) {
	let now = now_millis();
	let timeout = ctx.config.timers.forward_timeout_ms;
	for (order_id, entry) in ctx.forwarded.drain_timed_out(timeout, now) {
		let Some(order) = ctx.repository.get(&order_id) else {
			continue;
		};
		if order.state != OrderState::Pending {
			continue;
		}
		warn!(
			order = %order_id,
			peers = ?entry.tried_peers,
			"forward timed out, returning order to open"
		);
		if let Some(updated) = ctx.repository.update(&order_id, |o| {
			o.providing_member_id = None;
			o.set_state(OrderState::Open, now);
		}) {
			ctx.persist(&updated).await;
		}
	}
}

/// Local fulfillment with the given credential. Returns whether the order
/// advanced out of OPEN.
async fn create_local_instance(ctx: &Arc<BrokerContext>, order: &Order, token: &Token) -> bool {
	match order.resource_kind {
		ResourceKind::Compute => create_local_compute(ctx, order, token).await,
		ResourceKind::Storage | ResourceKind::Network => {
			create_local_synchronous(ctx, order, token).await
		}
	}
}

/// Storage and network allocations carry no provisioning delay: success
/// goes straight to FULFILLED.
async fn create_local_synchronous(
	ctx: &Arc<BrokerContext>,
	order: &Order,
	token: &Token,
) -> bool {
	let attributes = stripped_attributes(order);
	let service = ctx.providers.service(order.resource_kind);
	match service
		.request_instance(token, &order.categories, &attributes, None)
		.await
	{
		Ok(instance_id) => {
			let now = now_millis();
			let local_id = ctx.local_member_id().to_string();
			if let Some(updated) = ctx.repository.update(&order.id, |o| {
				o.instance_id = Some(instance_id.clone());
				o.providing_member_id = Some(local_id);
				o.set_state(OrderState::Fulfilled, now);
			}) {
				ctx.persist(&updated).await;
				if !updated.is_local {
					notify_served_outcome(ctx, &updated).await;
					monitors::ensure_served_monitor(ctx);
				}
			}
			monitors::ensure_instance_monitor(ctx);
			true
		}
		Err(e) => {
			warn!(order = %order.id, kind = %order.resource_kind, error = %e, "local allocation failed");
			false
		}
	}
}

async fn create_local_compute(ctx: &Arc<BrokerContext>, order: &Order, token: &Token) -> bool {
	let (payload_categories, payload_attributes, image) = compute_payload(ctx, order, token).await;

	match ctx
		.providers
		.compute()
		.request_instance(token, &payload_categories, &payload_attributes, image.as_deref())
		.await
	{
		Ok(instance_id) => {
			bind_spawning(ctx, order, instance_id).await;
			true
		}
		Err(ProviderError::QuotaExceeded) => {
			debug!(order = %order.id, "local quota exceeded, trying preemption");
			if !preempt_for(ctx, order).await {
				return false;
			}
			// Exactly one retry after reclaiming the victim.
			match ctx
				.providers
				.compute()
				.request_instance(token, &payload_categories, &payload_attributes, image.as_deref())
				.await
			{
				Ok(instance_id) => {
					bind_spawning(ctx, order, instance_id).await;
					true
				}
				Err(e) => {
					warn!(order = %order.id, error = %e, "allocation failed again after preemption");
					false
				}
			}
		}
		Err(ProviderError::NoValidHost) => {
			let requirements = order
				.requirements()
				.and_then(|raw| Requirements::parse(raw).ok());
			let vcpu = requirements
				.as_ref()
				.and_then(|req| req.minimum_for("vcpu"))
				.unwrap_or(1) as u32;
			let mem_mb = requirements
				.as_ref()
				.and_then(|req| req.minimum_for("mem"))
				.unwrap_or(1024) as u32;
			info!(order = %order.id, vcpu, mem_mb, "no valid host, waking sleeping hosts");
			if let Err(e) = ctx.transport.wake_sleeping_hosts(vcpu, mem_mb).await {
				warn!(error = %e, "wake-up signal failed");
			}
			false
		}
		Err(e @ (ProviderError::Unauthorized | ProviderError::BadRequest(_))) => {
			warn!(order = %order.id, error = %e, "local allocation rejected");
			false
		}
		Err(e) => {
			warn!(order = %order.id, error = %e, "local allocation failed");
			false
		}
	}
}

async fn bind_spawning(ctx: &Arc<BrokerContext>, order: &Order, instance_id: String) {
	let now = now_millis();
	let local_id = ctx.local_member_id().to_string();
	if let Some(updated) = ctx.repository.update(&order.id, |o| {
		o.instance_id = Some(instance_id.clone());
		o.providing_member_id = Some(local_id);
		o.set_state(OrderState::Spawning, now);
	}) {
		info!(order = %updated.id, instance = %instance_id, "instance spawning");
		ctx.persist(&updated).await;
		tokio::spawn(benchmark::run_post_provision(
			ctx.clone(),
			updated.id.clone(),
		));
	}
}

/// The provider-facing payload for a compute request: reserved scheduling
/// attributes stripped, public key moved into generated user data, image
/// resolved from the OS template category.
async fn compute_payload(
	ctx: &Arc<BrokerContext>,
	order: &Order,
	token: &Token,
) -> (Vec<Category>, HashMap<String, String>, Option<String>) {
	let mut payload_attributes = stripped_attributes(order);
	payload_attributes.remove(attributes::DATA_PUBLIC_KEY);
	payload_attributes.remove(attributes::EXTRA_USER_DATA);
	payload_attributes.remove(attributes::EXTRA_USER_DATA_CONTENT_TYPE);
	if let Some(user_data) = userdata::generate(
		order,
		&ctx.config.site.ssh_common_user,
		ctx.config.site.public_key.as_deref(),
	) {
		payload_attributes.insert(attributes::USER_DATA.to_string(), user_data);
	}

	let payload_categories: Vec<Category> = order
		.categories
		.iter()
		.filter(|category| category.term != categories::PUBLIC_KEY_TERM)
		.cloned()
		.collect();

	let image = match payload_categories
		.iter()
		.find(|category| category.scheme == categories::TEMPLATE_OS_SCHEME)
	{
		Some(os) => match ctx.image_store.local_image_id(token, &os.term).await {
			Ok(image) => image,
			Err(e) => {
				warn!(order = %order.id, error = %e, "image lookup failed");
				None
			}
		},
		None => None,
	};

	(payload_categories, payload_attributes, image)
}

fn stripped_attributes(order: &Order) -> HashMap<String, String> {
	order
		.attributes
		.iter()
		.filter(|(key, _)| !attributes::reserved().contains(&key.as_str()))
		.map(|(key, value)| (key.clone(), value.clone()))
		.collect()
}

/// Reclaims capacity for `order` by tearing down the policy's victim.
async fn preempt_for(ctx: &Arc<BrokerContext>, order: &Order) -> bool {
	let pool = ctx.repository.orders_with_instances();
	let Some(victim) = ctx.prioritization.take_from(order, &pool).await else {
		debug!(order = %order.id, "no preemption victim available");
		return false;
	};
	info!(order = %order.id, victim = %victim.id, "preempting order");
	tear_down_instance(ctx, &victim).await;
	true
}

/// Forwards an OPEN order to one eligible peer and registers the pending
/// attempt. The outcome is reconciled asynchronously.
async fn forward_to_peer(ctx: &Arc<BrokerContext>, order: &Order) -> bool {
	let tried = ctx.forwarded.tried_peers(&order.id);
	let requirements = order
		.requirements()
		.and_then(|raw| Requirements::parse(raw).ok());
	let eligible: Vec<FederationMember> = ctx
		.current_members()
		.into_iter()
		.filter(|member| member.id != ctx.local_member_id())
		.filter(|member| !tried.contains(&member.id))
		.filter(|member| ctx.authorization.can_receive_from(member))
		.filter(|member| {
			requirements
				.as_ref()
				.map(|req| req.accepts_location(&member.id))
				.unwrap_or(true)
		})
		.collect();
	let Some(peer) = ctx.picker.pick(&eligible) else {
		debug!(order = %order.id, "no eligible peer to forward to");
		return false;
	};

	let token = match ctx.identity.forwardable_token(&order.federation_token).await {
		Ok(token) => token,
		Err(e) => {
			warn!(order = %order.id, error = %e, "cannot derive forwardable token");
			return false;
		}
	};

	let mut request_attributes = order.attributes.clone();
	// The site key rides along so the remote instance is reachable for the
	// post-provision key replacement.
	if let Some(key) = &ctx.config.site.public_key {
		request_attributes
			.entry(attributes::DATA_PUBLIC_KEY.to_string())
			.or_insert_with(|| key.clone());
	}
	let request = ForwardRequest {
		order_id: order.id.clone(),
		categories: order.categories.clone(),
		attributes: request_attributes,
		token,
	};

	let reply = ctx.transport.forward_order(&peer.id, request).await;
	let now = now_millis();
	ctx.forwarded.track(&order.id, &peer.id, now);
	if let Some(updated) = ctx.repository.update(&order.id, |o| {
		o.providing_member_id = Some(peer.id.clone());
		o.set_state(OrderState::Pending, now);
	}) {
		ctx.persist(&updated).await;
	}
	info!(order = %order.id, peer = %peer.id, "order forwarded");

	let ctx = ctx.clone();
	let order_id = order.id.clone();
	let peer_id = peer.id;
	tokio::spawn(async move {
		let outcome = match reply.await {
			Ok(outcome) => outcome,
			Err(_) => ForwardOutcome::Failed("forward reply channel closed".to_string()),
		};
		handle_forward_reply(&ctx, &order_id, &peer_id, outcome).await;
	});
	true
}

/// Reconciles one forward outcome. Every staleness rule lives here: an
/// untracked order, a DELETED order or an order no longer PENDING turns the
/// reply into a no-op.
pub(crate) async fn handle_forward_reply(
	ctx: &Arc<BrokerContext>,
	order_id: &str,
	peer: &str,
	outcome: ForwardOutcome,
) {
	if !ctx.forwarded.is_tracked(order_id) {
		debug!(order = order_id, peer, "ignoring reply for untracked forward");
		return;
	}
	let Some(order) = ctx.repository.get(order_id) else {
		ctx.forwarded.remove(order_id);
		return;
	};

	match outcome {
		ForwardOutcome::Failed(reason) => {
			warn!(order = order_id, peer, reason, "forward failed");
			reset_pending_to_open(ctx, &order, peer).await;
		}
		ForwardOutcome::Granted(None) => {
			debug!(order = order_id, peer, "peer declined the order");
			reset_pending_to_open(ctx, &order, peer).await;
		}
		ForwardOutcome::Granted(Some(instance_id)) => {
			if order.state == OrderState::Deleted {
				// Removed by its owner while in flight; undo the grant.
				ctx.forwarded.remove(order_id);
				if let Err(e) = ctx
					.transport
					.remove_remote_instance(peer, normalize_instance_id(&instance_id))
					.await
				{
					warn!(order = order_id, peer, error = %e, "teardown of granted instance failed");
				}
				return;
			}
			if order.state != OrderState::Pending {
				debug!(order = order_id, state = %order.state, "ignoring stale grant");
				return;
			}
			let now = now_millis();
			let local_instance_id = normalize_instance_id(&instance_id).to_string();
			info!(order = order_id, peer, instance = %local_instance_id, "order granted by peer");
			match order.resource_kind {
				ResourceKind::Compute => {
					ctx.forwarded.touch(order_id, now);
					if let Some(updated) = ctx.repository.update(order_id, |o| {
						o.instance_id = Some(local_instance_id.clone());
						o.providing_member_id = Some(peer.to_string());
						o.set_state(OrderState::Spawning, now);
					}) {
						ctx.persist(&updated).await;
					}
					tokio::spawn(benchmark::run_post_provision(
						ctx.clone(),
						order_id.to_string(),
					));
				}
				ResourceKind::Storage | ResourceKind::Network => {
					ctx.forwarded.remove(order_id);
					if let Some(updated) = ctx.repository.update(order_id, |o| {
						o.instance_id = Some(local_instance_id.clone());
						o.providing_member_id = Some(peer.to_string());
						o.set_state(OrderState::Fulfilled, now);
					}) {
						ctx.persist(&updated).await;
					}
					monitors::ensure_instance_monitor(ctx);
				}
			}
		}
	}
}

async fn reset_pending_to_open(ctx: &Arc<BrokerContext>, order: &Order, peer: &str) {
	if order.state != OrderState::Pending || order.providing_member_id.as_deref() != Some(peer) {
		return;
	}
	let now = now_millis();
	if let Some(updated) = ctx.repository.update(&order.id, |o| {
		o.providing_member_id = None;
		o.set_state(OrderState::Open, now);
	}) {
		ctx.persist(&updated).await;
	}
}

/// Tears down the instance backing `order` (wherever it runs) and applies
/// the post-removal state rules.
pub(crate) async fn tear_down_instance(ctx: &Arc<BrokerContext>, order: &Order) {
	if let Some(instance_id) = order.instance_id.as_deref() {
		let local_instance_id = normalize_instance_id(instance_id);
		let providing = order
			.providing_member_id
			.as_deref()
			.unwrap_or(ctx.local_member_id());
		if providing == ctx.local_member_id() {
			match ctx.federation_token(order).await {
				Ok(token) => {
					let service = ctx.providers.service(order.resource_kind);
					match service.remove_instance(&token, local_instance_id).await {
						Ok(()) | Err(ProviderError::NotFound) => {}
						Err(e) => {
							warn!(order = %order.id, error = %e, "instance removal failed")
						}
					}
				}
				Err(e) => warn!(order = %order.id, error = %e, "no credential to remove instance"),
			}
		} else if let Err(e) = ctx
			.transport
			.remove_remote_instance(providing, local_instance_id)
			.await
		{
			warn!(order = %order.id, peer = providing, error = %e, "remote instance removal failed");
		}
	}
	instance_removed(ctx, &order.id).await;
}

/// Post-removal state rules: DELETED and served orders leave the working
/// set; persistent local orders reopen; one-time local orders close.
pub(crate) async fn instance_removed(ctx: &Arc<BrokerContext>, order_id: &str) {
	let Some(order) = ctx.repository.get(order_id) else {
		return;
	};
	// Charge usage up to the moment of removal so it is not lost.
	ctx.accounting
		.update(&ctx.repository.orders_with_instances(), now_millis())
		.await;
	if let Some(global_id) = order.global_instance_id() {
		ctx.benchmark.remove(&global_id).await;
	}
	let now = now_millis();
	if order.state == OrderState::Deleted || !order.is_local {
		ctx.repository.exclude(order_id);
		ctx.drop_snapshot(order_id).await;
		return;
	}
	let next = if order.is_persistent() && !order.is_expired(now) {
		OrderState::Open
	} else {
		OrderState::Closed
	};
	info!(order = order_id, next = %next, "instance removed, order reverted");
	if let Some(updated) = ctx.repository.update(order_id, |o| {
		o.instance_id = None;
		o.providing_member_id = None;
		o.set_state(next, now);
	}) {
		ctx.persist(&updated).await;
	}
}

/// Fetches the live instance backing `order`, locally or from the peer
/// fulfilling it.
pub(crate) async fn fetch_instance(ctx: &Arc<BrokerContext>, order: &Order) -> Result<Instance> {
	let instance_id = order
		.instance_id
		.as_deref()
		.ok_or_else(|| BrokerError::NotFound(format!("order {} has no instance", order.id)))?;
	let local_instance_id = normalize_instance_id(instance_id);
	let providing = order
		.providing_member_id
		.as_deref()
		.unwrap_or(ctx.local_member_id());
	if providing == ctx.local_member_id() {
		let token = ctx.federation_token(order).await?;
		let service = ctx.providers.service(order.resource_kind);
		service
			.get_instance(&token, local_instance_id)
			.await
			.map_err(Into::into)
	} else {
		ctx.transport
			.remote_instance(providing, local_instance_id)
			.await
			.map_err(|e| BrokerError::Transport(e.to_string()))
	}
}

/// Reports the final outcome of a served order back to its origin.
pub(crate) async fn notify_served_outcome(ctx: &Arc<BrokerContext>, order: &Order) {
	let reply = ServedOrderReply {
		order_id: order.id.clone(),
		instance_id: order
			.instance_id
			.as_deref()
			.map(|id| broker_types::global_instance_id(id, Some(ctx.local_member_id()))),
	};
	if let Err(e) = ctx
		.transport
		.reply_served_order(&order.requesting_member_id, reply)
		.await
	{
		warn!(
			order = %order.id,
			peer = %order.requesting_member_id,
			error = %e,
			"served order reply failed"
		);
	}
}
