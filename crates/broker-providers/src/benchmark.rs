//! Post-provision benchmarking plugin contract.

use async_trait::async_trait;
use broker_types::Instance;
use dashmap::DashMap;
use tracing::debug;

/// Measures the computing power of a freshly provisioned instance. The
/// result feeds accounting; removal is bookkeeping when the instance goes
/// away.
#[async_trait]
pub trait BenchmarkInterface: Send + Sync {
	async fn run(&self, global_instance_id: &str, instance: Option<&Instance>);

	async fn remove(&self, global_instance_id: &str);

	/// Measured power for the instance, if known.
	async fn power(&self, global_instance_id: &str) -> Option<f64>;
}

/// Benchmark that assigns every instance one unit of power.
#[derive(Default)]
pub struct VanillaBenchmark {
	powers: DashMap<String, f64>,
}

impl VanillaBenchmark {
	pub const SINGLE_POWER: f64 = 1.0;

	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl BenchmarkInterface for VanillaBenchmark {
	async fn run(&self, global_instance_id: &str, _instance: Option<&Instance>) {
		debug!(instance = global_instance_id, "benchmarking instance");
		self.powers
			.insert(global_instance_id.to_string(), Self::SINGLE_POWER);
	}

	async fn remove(&self, global_instance_id: &str) {
		self.powers.remove(global_instance_id);
	}

	async fn power(&self, global_instance_id: &str) -> Option<f64> {
		self.powers.get(global_instance_id).map(|entry| *entry)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn records_and_forgets_power() {
		let benchmark = VanillaBenchmark::new();
		benchmark.run("vm-1@site-a", None).await;
		assert_eq!(benchmark.power("vm-1@site-a").await, Some(1.0));

		benchmark.remove("vm-1@site-a").await;
		assert_eq!(benchmark.power("vm-1@site-a").await, None);
	}
}
