use dd_core::{drive::actions, AddOperationOptions, Error, UpdateStatus};
use dd_document::Signal;

use futures::future::join_all;
use tracing_test::traced_test;

mod common;

use common::{
	accounts, add_account, budget_document, build_operations, node_ids, server, BUDGET_TYPE,
	DRIVE_ID,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn document_job_waits_for_the_drive_job_creating_it() {
	let server = server().await;

	let drive = server.get_drive(DRIVE_ID).await.expect("drive");
	let (_, drive_operations) = build_operations(
		drive,
		&[
			actions::add_folder("folder", "Folder", None),
			actions::add_file("file-1", "Budget", BUDGET_TYPE, Some("folder")),
		],
	);
	let (_, budget_operations) = build_operations(budget_document(), &[add_account("0x123")]);

	let (document_result, drive_result) = tokio::join!(
		server.queue_operations(
			DRIVE_ID,
			"file-1",
			budget_operations,
			AddOperationOptions::default()
		),
		server.queue_drive_operations(DRIVE_ID, drive_operations, AddOperationOptions::default()),
	);

	let drive_result = drive_result.expect("drive job processed");
	let document_result = document_result.expect("document job processed");
	assert_eq!(drive_result.status, UpdateStatus::Success);
	assert_eq!(document_result.status, UpdateStatus::Success);

	let drive = server.get_drive(DRIVE_ID).await.expect("drive");
	assert_eq!(node_ids(&drive), ["folder", "file-1"]);

	let budget = server.get_document(DRIVE_ID, "file-1").await.expect("budget");
	assert_eq!(budget.document_type(), BUDGET_TYPE);
	assert_eq!(accounts(&budget), ["0x123"]);

	server.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn already_stored_operations_are_not_queued_again() {
	let server = server().await;

	let drive = server.get_drive(DRIVE_ID).await.expect("drive");
	let (_, operations) = build_operations(drive, &[actions::add_folder("folder", "Folder", None)]);

	let first = server
		.queue_drive_operations(DRIVE_ID, operations.clone(), AddOperationOptions::default())
		.await
		.expect("queued");
	assert_eq!(first.operations.len(), 1);

	let second = server
		.queue_drive_operations(DRIVE_ID, operations, AddOperationOptions::default())
		.await
		.expect("short circuited");
	assert!(second.is_success());
	assert!(second.operations.is_empty());

	let drive = server.get_drive(DRIVE_ID).await.expect("drive");
	assert_eq!(drive.operations.global.len(), 1);
	assert_eq!(node_ids(&drive), ["folder"]);

	server.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn deleted_document_rejects_queued_jobs() {
	let server = server().await;

	server
		.queue_drive_actions(
			DRIVE_ID,
			vec![actions::add_file("file-1", "Budget", BUDGET_TYPE, None)],
			AddOperationOptions::default(),
		)
		.await
		.expect("file added");
	server
		.get_document(DRIVE_ID, "file-1")
		.await
		.expect("child document created");

	let deleted = server
		.queue_drive_actions(
			DRIVE_ID,
			vec![actions::delete_node("file-1")],
			AddOperationOptions::default(),
		)
		.await
		.expect("file deleted");
	assert!(deleted.is_success());
	assert!(deleted
		.signals
		.iter()
		.any(|result| result.signal == Signal::DeleteChildDocument { id: "file-1".to_string() }));

	let error = server
		.queue_actions(
			DRIVE_ID,
			"file-1",
			vec![add_account("0x1")],
			AddOperationOptions::default(),
		)
		.await
		.expect_err("queue is deleted");
	assert!(matches!(error, Error::Queue(dd_queue::Error::QueueDeleted(_))));
	assert!(error.to_string().contains("Queue is deleted"));

	assert!(server
		.get_document(DRIVE_ID, "file-1")
		.await
		.expect_err("document removed")
		.is_not_found());

	server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn concurrent_queued_batches_never_conflict() {
	let server = server().await;

	let drive = server.get_drive(DRIVE_ID).await.expect("drive");
	let batches = (0..8)
		.map(|i| {
			build_operations(
				drive.clone(),
				&[actions::add_folder(&format!("folder-{i}"), "Folder", None)],
			)
			.1
		})
		.collect::<Vec<_>>();

	let results = join_all(batches.into_iter().map(|operations| {
		server.queue_drive_operations(DRIVE_ID, operations, AddOperationOptions::default())
	}))
	.await;

	for result in results {
		assert_eq!(result.expect("processed").status, UpdateStatus::Success);
	}

	let drive = server.get_drive(DRIVE_ID).await.expect("drive");
	let mut ids = node_ids(&drive);
	ids.sort();
	assert_eq!(
		ids,
		(0..8).map(|i| format!("folder-{i}")).collect::<Vec<_>>()
	);

	server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn concurrent_queued_actions_apply_in_sequence() {
	let server = server().await;

	let results = join_all((0..8).map(|i| {
		server.queue_drive_actions(
			DRIVE_ID,
			vec![actions::add_folder(&format!("folder-{i}"), "Folder", None)],
			AddOperationOptions::default(),
		)
	}))
	.await;

	for result in results {
		assert_eq!(result.expect("processed").status, UpdateStatus::Success);
	}

	let drive = server.get_drive(DRIVE_ID).await.expect("drive");
	let mut ids = node_ids(&drive);
	ids.sort();
	assert_eq!(ids.len(), 8);
	assert_eq!(ids[0], "folder-0");
	assert_eq!(
		drive
			.operations
			.global
			.iter()
			.map(|op| op.index)
			.collect::<Vec<_>>(),
		(0..8).collect::<Vec<_>>()
	);

	server.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn queued_actions_on_a_document() {
	let server = server().await;

	let added = server
		.queue_drive_action(
			DRIVE_ID,
			actions::add_file("file-1", "Budget", BUDGET_TYPE, None),
			AddOperationOptions::default(),
		)
		.await
		.expect("file added");

	let created = added
		.signals
		.iter()
		.find_map(|result| match &result.signal {
			Signal::CreateChildDocument { id, .. } if id == "file-1" => result.result.as_ref(),
			_ => None,
		})
		.expect("child document signal");
	assert_eq!(created.document_type(), BUDGET_TYPE);

	for address in ["0xa", "0xb"] {
		let result = server
			.queue_action(
				DRIVE_ID,
				"file-1",
				add_account(address),
				AddOperationOptions::default(),
			)
			.await
			.expect("account added");
		assert!(result.is_success());
	}

	let budget = server.get_document(DRIVE_ID, "file-1").await.expect("budget");
	assert_eq!(accounts(&budget), ["0xa", "0xb"]);
	assert_eq!(budget.header.revision.global, 2);

	server.shutdown().await;
}

#[tokio::test]
#[traced_test]
async fn rejected_document_action_is_recorded() {
	let server = server().await;

	server
		.queue_drive_action(
			DRIVE_ID,
			actions::add_folder("folder", "Folder", None),
			AddOperationOptions::default(),
		)
		.await
		.expect("folder added");

	let result = server
		.queue_drive_action(
			DRIVE_ID,
			actions::add_folder("folder", "Again", None),
			AddOperationOptions::default(),
		)
		.await
		.expect("processed");

	assert!(result.is_success());
	assert_eq!(
		result.operations[0].error.as_deref(),
		Some("Node with id folder already exists")
	);

	let drive = server.get_drive(DRIVE_ID).await.expect("drive");
	assert_eq!(node_ids(&drive), ["folder"]);
	assert_eq!(drive.header.revision.global, 2);

	server.shutdown().await;
}
