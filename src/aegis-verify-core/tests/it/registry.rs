//! Verification registry and bulk pass behaviour.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use aegis_hash::{HashAlgorithm, HashParameters};
use aegis_verify_core::{
    Component, ComponentKind, ComponentSelection, ComponentType, HashCalculator, HashRequest,
    NoHardware, StaticCatalog, VerificationEvent, VerificationRegistry,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::support::next_event;

fn registry(
    components: Vec<Component>,
    parallelism: usize,
) -> (Arc<VerificationRegistry>, mpsc::UnboundedReceiver<VerificationEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let calculator = HashCalculator::new(Arc::new(NoHardware), Arc::new(NoHardware), Duration::from_secs(5));
    let registry = VerificationRegistry::new(
        Arc::new(StaticCatalog::new(components)),
        Arc::new(calculator),
        Arc::new(tx),
        parallelism,
    );
    (Arc::new(registry), rx)
}

fn file_component(id: &str, path: &Path) -> Component {
    Component::new(id, ComponentKind::File, path.to_string_lossy(), ComponentType::Package)
}

/// Events up to and including the next batch-complete event.
async fn collect_batch(rx: &mut mpsc::UnboundedReceiver<VerificationEvent>) -> Vec<VerificationEvent> {
    let mut events = Vec::new();
    loop {
        let event = next_event(rx).await;
        let done = matches!(event, VerificationEvent::BatchComplete { .. });
        events.push(event);
        if done {
            return events;
        }
    }
}

#[tokio::test]
async fn test_unmodified_file_hashes_identically() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("a.bin");
    std::fs::write(&path, (0u8..100).collect::<Vec<_>>()).unwrap();
    let component = file_component("A", &path);
    let (registry, mut rx) = registry(vec![component.clone()], 2);

    let mut digests = Vec::new();
    for _ in 0..2 {
        assert!(
            registry
                .get_component_hashes(HashRequest::new(HashAlgorithm::Sha256), CancellationToken::new())
                .await
        );
        let events = collect_batch(&mut rx).await;
        assert_eq!(events.len(), 2);
        digests.push(registry.verification(&component).result().unwrap().digest);
    }

    assert_eq!(digests[0].len(), 32);
    assert_eq!(digests[0], digests[1]);
}

#[tokio::test]
async fn test_one_unreadable_component_does_not_abort_batch() {
    let dir = tempfile::tempdir().unwrap();
    let mut components = Vec::new();
    for i in 0..4 {
        let path = dir.path().join(format!("c{i}.bin"));
        std::fs::write(&path, format!("component {i}")).unwrap();
        components.push(file_component(&format!("c{i}"), &path));
    }
    components.push(file_component("broken", &dir.path().join("missing.bin")));
    let (registry, mut rx) = registry(components, 2);

    let ok = registry
        .get_component_hashes(HashRequest::new(HashAlgorithm::Sha1), CancellationToken::new())
        .await;
    assert!(!ok);

    let events = collect_batch(&mut rx).await;
    let complete = events
        .iter()
        .filter(|e| matches!(e, VerificationEvent::HashComplete { .. }))
        .count();
    let errors: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            VerificationEvent::HashError { verification, message } => {
                Some((verification.component_id.clone(), message.clone()))
            },
            _ => None,
        })
        .collect();

    assert_eq!(complete, 4);
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].0, "broken");
    assert!(!errors[0].1.is_empty());
    assert_eq!(
        events.last(),
        Some(&VerificationEvent::BatchComplete { had_failure: true })
    );
    assert_eq!(events.len(), 6);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_lookups_share_one_record() {
    let component = Component::new("os", ComponentKind::Hardware, "os", ComponentType::OperatingSystem);
    let (registry, _rx) = registry(vec![component.clone()], 2);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        let component = component.clone();
        tasks.push(tokio::spawn(async move { registry.verification(&component) }));
    }

    let first = registry.verification(&component);
    for task in tasks {
        assert!(Arc::ptr_eq(&first, &task.await.unwrap()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_bulk_passes_do_not_interleave() {
    let dir = tempfile::tempdir().unwrap();
    let mut components = Vec::new();
    for i in 0..6 {
        let path = dir.path().join(format!("m{i}.bin"));
        std::fs::write(&path, vec![i as u8; 64 * 1024]).unwrap();
        components.push(file_component(&format!("m{i}"), &path));
    }
    let (registry, mut rx) = registry(components, 2);

    let first = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry
                .get_component_hashes(HashRequest::new(HashAlgorithm::Sha256), CancellationToken::new())
                .await
        })
    };
    let second = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry
                .get_component_hashes(HashRequest::new(HashAlgorithm::Md5), CancellationToken::new())
                .await
        })
    };
    assert!(first.await.unwrap());
    assert!(second.await.unwrap());

    for _ in 0..2 {
        let events = collect_batch(&mut rx).await;
        assert_eq!(events.len(), 7);
        assert!(events[..6]
            .iter()
            .all(|e| matches!(e, VerificationEvent::HashComplete { .. })));
    }
}

#[tokio::test]
async fn test_records_carry_request_parameters() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fw.bin");
    std::fs::write(&path, b"firmware image").unwrap();
    let component = file_component("fw", &path);
    let (registry, mut rx) = registry(vec![component.clone()], 1);

    let request = HashRequest::new(HashAlgorithm::HmacSha256)
        .with_seed_or_salt(b"secret".to_vec())
        .with_start_offset(4)
        .with_selection(ComponentSelection::Single("fw".into()));
    assert!(registry.get_component_hashes(request, CancellationToken::new()).await);

    let snapshot = match next_event(&mut rx).await {
        VerificationEvent::HashComplete { verification } => verification,
        other => panic!("unexpected event {other:?}"),
    };
    assert_eq!(
        snapshot.parameters,
        HashParameters::new(HashAlgorithm::HmacSha256)
            .with_key(b"secret".to_vec())
            .with_range(4, None)
    );
    assert_eq!(snapshot.result.unwrap().digest.len(), 32);
    assert_eq!(
        next_event(&mut rx).await,
        VerificationEvent::BatchComplete { had_failure: false }
    );
}

#[tokio::test]
async fn test_reconfigure_clears_previous_digest_on_failure() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pkg.bin");
    std::fs::write(&path, b"package").unwrap();
    let component = file_component("pkg", &path);
    let (registry, mut rx) = registry(vec![component.clone()], 1);

    assert!(
        registry
            .get_component_hashes(HashRequest::new(HashAlgorithm::Sha1), CancellationToken::new())
            .await
    );
    collect_batch(&mut rx).await;
    assert!(registry.verification(&component).result().is_some());

    // Start offset beyond the file length is rejected.
    let request = HashRequest::new(HashAlgorithm::Sha1).with_start_offset(1024);
    assert!(!registry.get_component_hashes(request, CancellationToken::new()).await);
    let events = collect_batch(&mut rx).await;
    assert!(matches!(events[0], VerificationEvent::HashError { .. }));
    assert!(registry.verification(&component).result().is_none());
}
