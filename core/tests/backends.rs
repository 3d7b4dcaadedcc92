use dd_core::{drive::actions, AddOperationOptions, Backends, DriveServer, DriveServerConfig};
use dd_document::{helpers, MergeStrategy, ModelRegistry, Operation};

use std::sync::{
	atomic::{AtomicUsize, Ordering},
	Arc,
};

use tracing_test::traced_test;

mod common;

use common::{build_operations, node_ids, BudgetModel, DRIVE_ID};

/// Default primitives, counting how often diverging histories had to be merged.
#[derive(Default)]
struct CountingMerge {
	merges: AtomicUsize,
}

impl MergeStrategy for CountingMerge {
	fn merge(&self, sorted_target: &[Operation], sorted_merge: &[Operation]) -> Vec<Operation> {
		self.merges.fetch_add(1, Ordering::SeqCst);
		helpers::merge(
			sorted_target,
			sorted_merge,
			helpers::reshuffle_by_timestamp_and_index,
		)
	}
}

#[tokio::test]
#[traced_test]
async fn injected_merge_strategy_reconciles_divergent_writers() {
	let config = DriveServerConfig::default();
	let merge = Arc::new(CountingMerge::default());

	let backends = Backends {
		merge: Arc::clone(&merge) as Arc<dyn MergeStrategy>,
		..Backends::memory(&config)
	};

	let server = DriveServer::with_backends(
		config,
		ModelRegistry::default().with_model(BudgetModel),
		backends,
	)
	.await
	.expect("server starts");

	server
		.add_drive(dd_core::DriveInput {
			id: DRIVE_ID.to_string(),
			name: "Drive".to_string(),
			..Default::default()
		})
		.await
		.expect("drive added");

	let drive = server.get_drive(DRIVE_ID).await.expect("drive");
	let (_, first) = build_operations(drive.clone(), &[actions::add_folder("a", "A", None)]);
	let (_, second) = build_operations(drive, &[actions::add_folder("b", "B", None)]);

	for operations in [&first, &first, &second] {
		server
			.add_drive_operations(DRIVE_ID, operations, AddOperationOptions::default())
			.await
			.expect("applied");
	}

	assert_eq!(merge.merges.load(Ordering::SeqCst), 1);

	let drive = server.get_drive(DRIVE_ID).await.expect("drive");
	let mut ids = node_ids(&drive);
	ids.sort();
	assert_eq!(ids, ["a", "b"]);

	server.shutdown().await;
}
