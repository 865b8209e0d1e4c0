//! Direction-flipping hill climber over a per-peer donation quota.

use broker_types::Millis;

/// Climber state for one peer.
///
/// Fairness below zero means "no exchange history yet" and pins the quota
/// to the configured maximum. While fairness sits inside the target band
/// the quota holds. Outside the band the quota moves by `delta` per tick,
/// reversing direction whenever the previous move failed to improve
/// fairness.
#[derive(Debug, Clone)]
pub struct HillClimb {
	delta: f64,
	minimum_threshold: f64,
	maximum_threshold: f64,
	maximum_capacity: f64,
	current_fairness: f64,
	last_fairness: f64,
	increasing: bool,
	capacity: f64,
	last_updated: Option<Millis>,
}

impl HillClimb {
	pub fn new(
		delta: f64,
		minimum_threshold: f64,
		maximum_threshold: f64,
		maximum_capacity: f64,
	) -> Self {
		Self {
			delta,
			minimum_threshold,
			maximum_threshold,
			maximum_capacity,
			current_fairness: -1.0,
			last_fairness: -1.0,
			increasing: false,
			capacity: maximum_capacity,
			last_updated: None,
		}
	}

	pub fn record_fairness(&mut self, fairness: f64) {
		self.last_fairness = self.current_fairness;
		self.current_fairness = fairness;
	}

	pub fn update_capacity(&mut self) {
		if self.current_fairness < 0.0 {
			self.capacity = self.maximum_capacity;
			return;
		}
		if self.current_fairness >= self.minimum_threshold
			&& self.current_fairness <= self.maximum_threshold
		{
			return;
		}
		if self.last_fairness >= 0.0 && self.current_fairness <= self.last_fairness {
			self.increasing = !self.increasing;
		}
		let step = if self.increasing { self.delta } else { -self.delta };
		self.capacity = (self.capacity + step).clamp(0.0, self.maximum_capacity);
	}

	pub fn capacity(&self) -> f64 {
		self.capacity
	}

	pub fn current_fairness(&self) -> f64 {
		self.current_fairness
	}

	pub fn last_fairness(&self) -> f64 {
		self.last_fairness
	}

	pub fn last_updated(&self) -> Option<Millis> {
		self.last_updated
	}

	pub fn set_last_updated(&mut self, now: Millis) {
		self.last_updated = Some(now);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn climber() -> HillClimb {
		HillClimb::new(1.0, 0.8, 1.0, 10.0)
	}

	#[test]
	fn unset_fairness_pins_capacity_to_maximum() {
		let mut climb = climber();
		climb.record_fairness(-1.0);
		climb.update_capacity();
		assert_eq!(climb.capacity(), 10.0);
	}

	#[test]
	fn fairness_inside_band_holds_capacity() {
		let mut climb = climber();
		climb.record_fairness(0.5);
		climb.update_capacity();
		let after_first = climb.capacity();

		climb.record_fairness(0.9);
		climb.update_capacity();
		assert_eq!(climb.capacity(), after_first);
	}

	#[test]
	fn low_fairness_shrinks_capacity() {
		let mut climb = climber();
		climb.record_fairness(0.5);
		climb.update_capacity();
		assert_eq!(climb.capacity(), 9.0);
	}

	#[test]
	fn improving_fairness_keeps_direction() {
		let mut climb = climber();
		climb.record_fairness(0.5);
		climb.update_capacity();
		// Fairness improved but still below band, keep shrinking.
		climb.record_fairness(0.6);
		climb.update_capacity();
		assert_eq!(climb.capacity(), 8.0);
	}

	#[test]
	fn worsening_fairness_flips_direction() {
		let mut climb = climber();
		climb.record_fairness(0.5);
		climb.update_capacity();
		assert_eq!(climb.capacity(), 9.0);

		climb.record_fairness(0.4);
		climb.update_capacity();
		assert_eq!(climb.capacity(), 10.0);
	}

	#[test]
	fn capacity_never_goes_negative() {
		let mut climb = HillClimb::new(4.0, 0.8, 1.0, 10.0);
		let mut fairness = 0.5;
		for _ in 0..6 {
			climb.record_fairness(fairness);
			climb.update_capacity();
			// Strictly improving so direction is never reversed.
			fairness += 0.01;
		}
		assert!(climb.capacity() >= 0.0);
		assert!(climb.capacity() <= 10.0);
	}
}
