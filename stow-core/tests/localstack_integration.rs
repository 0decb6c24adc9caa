/*!
LocalStack integration tests for the S3 backend.

LocalStack should be running on localhost:4566 with the test bucket created:
```bash
docker run --rm -p 4566:4566 localstack/localstack
awslocal s3 mb s3://stow-test-bucket
```

Then run tests with:
```bash
RUN_LOCALSTACK_TESTS=1 cargo test -p stow-core --features s3 localstack
```
*/

#![cfg(feature = "s3")]

use std::sync::Once;
use stow_core::{
    create_backend, init_default_observability, StorageBackend, StorageConfig, StowError,
    VersionedStore,
};

static INIT: Once = Once::new();

const BUCKET: &str = "stow-test-bucket";

fn init_test_observability() {
    INIT.call_once(|| {
        // Another test binary may have installed a subscriber already
        let _ = init_default_observability();
    });
}

fn check_localstack_available() -> bool {
    std::env::var("RUN_LOCALSTACK_TESTS").unwrap_or_default() == "1"
}

fn create_localstack_config() -> StorageConfig {
    std::env::set_var("AWS_ACCESS_KEY_ID", "test");
    std::env::set_var("AWS_SECRET_ACCESS_KEY", "test");
    std::env::set_var("AWS_REGION", "us-east-1");
    std::env::set_var("AWS_ENDPOINT_URL", "http://localhost:4566");

    StorageConfig::s3_with_bucket(BUCKET.to_string())
}

fn unique_prefix(test: &str) -> String {
    format!("{test}/{}", uuid::Uuid::new_v4())
}

#[test]
fn test_localstack_backend_primitives() {
    if !check_localstack_available() {
        println!("Skipping LocalStack test - set RUN_LOCALSTACK_TESTS=1 and run LocalStack");
        return;
    }
    init_test_observability();

    let backend = create_backend(&create_localstack_config()).unwrap();
    let dir = unique_prefix("primitives");
    let a = format!("{dir}/a.model");
    let b = format!("{dir}/b.model");

    assert!(!backend.exists(&a).unwrap());
    assert!(matches!(backend.read(&a), Err(StowError::NotFound(_))));

    backend.write(&a, b"weights").unwrap();
    assert_eq!(backend.read(&a).unwrap(), b"weights");

    backend.rename(&a, &b).unwrap();
    assert!(!backend.exists(&a).unwrap());
    assert_eq!(backend.list(&dir).unwrap(), vec![b.clone()]);
    assert!(matches!(
        backend.rename(&a, &b),
        Err(StowError::RenameFailed { .. })
    ));

    backend.delete(&b).unwrap();
    assert!(backend.list(&dir).unwrap().is_empty());
}

#[test]
fn test_localstack_versioned_store() {
    if !check_localstack_available() {
        println!("Skipping LocalStack test - set RUN_LOCALSTACK_TESTS=1 and run LocalStack");
        return;
    }
    init_test_observability();

    let backend = create_backend(&create_localstack_config()).unwrap();
    assert!(!backend.capabilities().atomic_rename);

    let path = format!("{}/classifier.model", unique_prefix("store"));
    let store = VersionedStore::new(path, backend).with_history(true);

    store.save(&vec![0.1_f64, 0.9]).unwrap();
    store.save(&vec![0.4_f64, 0.6]).unwrap();

    assert_eq!(store.load::<Vec<f64>>().unwrap(), vec![0.4, 0.6]);
    let history = store.history().unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(store.load_from::<Vec<f64>>(&history[0]).unwrap(), vec![0.1, 0.9]);

    assert_eq!(store.prune_history(0).unwrap(), 1);
    assert!(store.history().unwrap().is_empty());
}
