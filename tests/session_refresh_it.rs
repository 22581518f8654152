// crates.io
use tokio::task::JoinSet;
// self
use notify_courier::{
	_preludet::*, auth::Identity, shutdown::CancelToken, store::CredentialStore,
};

#[tokio::test]
async fn concurrent_callers_cost_exactly_one_refresh() {
	let (refresher, store, transport) = build_test_refresher();
	let refresher = Arc::new(refresher);
	let identity = test_identity();

	store
		.save(expired_credential(&identity))
		.await
		.expect("Failed to seed the expired credential into the store.");

	let mut callers = JoinSet::new();

	for _ in 0..50 {
		let refresher = refresher.clone();
		let identity = identity.clone();

		callers.spawn(async move { refresher.ensure_valid(&identity, &CancelToken::new()).await });
	}

	let mut minted = Vec::new();

	while let Some(joined) = callers.join_next().await {
		let credential = joined
			.expect("Caller task should not panic.")
			.expect("Every concurrent caller should receive a valid credential.");

		minted.push(credential);
	}

	assert_eq!(minted.len(), 50);
	assert_eq!(
		transport.refresh_calls(),
		1,
		"Concurrent callers for one identity must collapse into a single upstream refresh.",
	);

	let reference = &minted[0];

	assert!(
		minted.iter().all(|credential| credential == reference),
		"Every caller should observe the identical minted credential.",
	);

	let stored = store
		.get(&identity)
		.await
		.expect("Store read should succeed after the refresh.")
		.expect("The refreshed credential should be persisted.");

	assert_eq!(stored.access_token.expose(), reference.access_token.expose());
}

#[tokio::test]
async fn later_callers_reuse_the_refreshed_credential() {
	let (refresher, store, transport) = build_test_refresher();
	let identity = test_identity();
	let cancel = CancelToken::new();

	store
		.save(expired_credential(&identity))
		.await
		.expect("Failed to seed the expired credential into the store.");

	let first = refresher
		.ensure_valid(&identity, &cancel)
		.await
		.expect("The expired credential should be refreshed.");
	let second = refresher
		.ensure_valid(&identity, &cancel)
		.await
		.expect("A later call should find the refreshed credential valid.");

	assert_eq!(first, second);
	assert_eq!(transport.refresh_calls(), 1, "The second call must not touch the upstream.");
}

#[tokio::test]
async fn distinct_identities_refresh_independently() {
	let (refresher, store, transport) = build_test_refresher();
	let refresher = Arc::new(refresher);
	let alpha = test_identity();
	let beta = Identity::new("backup@example.com")
		.expect("Secondary identity fixture should be valid.");

	for identity in [&alpha, &beta] {
		store
			.save(expired_credential(identity))
			.await
			.expect("Failed to seed the expired credential into the store.");
	}

	let mut callers = JoinSet::new();

	for identity in [alpha, beta] {
		let refresher = refresher.clone();

		callers.spawn(async move { refresher.ensure_valid(&identity, &CancelToken::new()).await });
	}

	while let Some(joined) = callers.join_next().await {
		joined
			.expect("Caller task should not panic.")
			.expect("Both identities should refresh successfully.");
	}

	assert_eq!(transport.refresh_calls(), 2, "Distinct identities must not share a flight.");
}
