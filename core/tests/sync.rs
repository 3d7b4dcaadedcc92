use dd_core::{
	drive::{actions, DRIVE_DOCUMENT_TYPE},
	sync_units::{OperationDataFilter, SynchronizationUnitFilter, DRIVE_SYNC_ID},
	AddOperationOptions, DriveEvent, DriveServerConfig, Error, OperationScope, SyncStatus,
};

use std::time::Duration;

use tokio::time::timeout;
use tracing_test::traced_test;

mod common;

use common::{add_account, server, server_with, BUDGET_TYPE, DRIVE_ID};

async fn drive_with_budget() -> dd_core::DriveServer {
	let server = server().await;

	server
		.add_drive_actions(
			DRIVE_ID,
			&[
				actions::add_folder("folder", "Folder", None),
				actions::add_file("file-1", "Budget", BUDGET_TYPE, Some("folder")),
			],
			AddOperationOptions::default(),
		)
		.await
		.expect("drive tree");

	server
		.add_actions(
			DRIVE_ID,
			"file-1",
			&[add_account("0x1"), add_account("0x2")],
			AddOperationOptions::default(),
		)
		.await
		.expect("budget accounts");

	server
}

#[tokio::test]
#[traced_test]
async fn units_cover_the_drive_and_its_files() {
	let server = drive_with_budget().await;

	let units = server
		.get_synchronization_units(DRIVE_ID, &SynchronizationUnitFilter::default())
		.await
		.expect("units");

	let summary = units
		.iter()
		.map(|unit| (unit.sync_id.as_str(), unit.document_id.as_str(), unit.revision))
		.collect::<Vec<_>>();
	assert_eq!(
		summary,
		[
			(DRIVE_SYNC_ID, "", 2),
			("file-1:global", "file-1", 2),
			("file-1:local", "file-1", 0)
		]
	);
	assert_eq!(units[0].document_type, DRIVE_DOCUMENT_TYPE);

	let budget_units = server
		.get_synchronization_units(
			DRIVE_ID,
			&SynchronizationUnitFilter {
				document_types: vec![BUDGET_TYPE.to_string()],
				scopes: vec!["global".to_string()],
				..Default::default()
			},
		)
		.await
		.expect("filtered units");
	assert_eq!(budget_units.len(), 1);
	assert_eq!(budget_units[0].sync_id, "file-1:global");

	server.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn single_unit_and_its_operations() {
	let server = drive_with_budget().await;

	let unit = server
		.get_synchronization_unit(DRIVE_ID, "file-1:global")
		.await
		.expect("unit");
	assert_eq!(unit.scope, OperationScope::Global);
	assert_eq!(unit.revision, 2);

	let all = server
		.get_operation_data(DRIVE_ID, "file-1:global", OperationDataFilter::default())
		.await
		.expect("operations");
	assert_eq!(all.len(), 2);
	assert_eq!(all[0].input["address"], "0x1");

	let newer = server
		.get_operation_data(
			DRIVE_ID,
			"file-1:global",
			OperationDataFilter {
				from_revision: Some(1),
				..Default::default()
			},
		)
		.await
		.expect("operations");
	assert_eq!(newer.len(), 1);
	assert_eq!(newer[0].index, 1);

	let missing = server
		.get_synchronization_unit(DRIVE_ID, "unknown")
		.await
		.expect_err("unknown unit");
	assert!(matches!(missing, Error::SyncUnitNotFound { .. }));
	assert!(missing.is_not_found());

	server.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn listeners_report_sync_status() {
	let server = server().await;
	let mut events = server.subscribe();

	server
		.add_drive_action(
			DRIVE_ID,
			actions::add_folder("folder", "Folder", None),
			AddOperationOptions::default(),
		)
		.await
		.expect("applied");

	let mut statuses = vec![];
	while statuses.len() < 2 {
		let event = timeout(Duration::from_secs(5), events.recv())
			.await
			.expect("event in time")
			.expect("channel open");

		let DriveEvent::SyncStatus {
			drive_id, status, ..
		} = event;
		assert_eq!(drive_id, DRIVE_ID);
		statuses.push(status);
	}

	assert_eq!(statuses, [SyncStatus::Syncing, SyncStatus::Success]);
	assert_eq!(server.get_sync_status(DRIVE_ID), Some(SyncStatus::Success));

	server.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn drive_lifecycle_without_cache() {
	let mut config = DriveServerConfig::default();
	config.cache.enabled = false;
	let server = server_with(config).await;

	server
		.add_drive_action(
			DRIVE_ID,
			actions::add_file("file-1", "Budget", BUDGET_TYPE, None),
			AddOperationOptions::default(),
		)
		.await
		.expect("file added");

	assert_eq!(server.get_drives().await.expect("drives"), [DRIVE_ID]);
	assert_eq!(
		server.get_documents(DRIVE_ID).await.expect("documents"),
		["file-1"]
	);

	server.delete_drive(DRIVE_ID).await.expect("deleted");

	assert!(server.get_drives().await.expect("drives").is_empty());
	assert!(server
		.get_drive(DRIVE_ID)
		.await
		.expect_err("drive removed")
		.is_not_found());

	server.shutdown().await;
}
