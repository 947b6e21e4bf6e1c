// tests/receipts.rs

//! Receipt store under concurrent writers

mod common;

use common::{TestEnv, names};
use keg::cancel::CancellationToken;
use keg::db::{InstallReceipt, ReceiptStore, SqliteReceiptStore};
use keg::platform::{Arch, PlatformDescriptor};
use keg::recipe::ArtifactSource;
use keg::{InstallOptions, Version};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

fn receipt(name: &str) -> InstallReceipt {
    InstallReceipt {
        name: name.to_string(),
        version: Version::parse("1.0").unwrap(),
        revision: 0,
        source: ArtifactSource::Source,
        installed_at: chrono::Utc::now(),
        installed_on_request: true,
        runtime_dependencies: vec![],
        keg_path: PathBuf::from(format!("/opt/keg/Cellar/{}/1.0", name)),
        files: vec![PathBuf::from(format!("bin/{}", name))],
    }
}

#[test]
fn test_separate_handles_write_concurrently() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("var/keg/receipts.db");
    let stores: Vec<Arc<SqliteReceiptStore>> = (0..4)
        .map(|_| Arc::new(SqliteReceiptStore::open(&path).unwrap()))
        .collect();

    let handles: Vec<_> = stores
        .iter()
        .enumerate()
        .map(|(i, store)| {
            let store = store.clone();
            thread::spawn(move || {
                for j in 0..5 {
                    store.put(&receipt(&format!("pkg{}-{}", i, j))).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let reopened = SqliteReceiptStore::open(&path).unwrap();
    let all = reopened.list().unwrap();
    assert_eq!(all.len(), 20);
    let names: Vec<&str> = all.iter().map(|r| r.name.as_str()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);

    let one = reopened.get("pkg3-4").unwrap().unwrap();
    assert_eq!(one.files, vec![PathBuf::from("bin/pkg3-4")]);
    assert!(one.installed_on_request);
}

#[test]
fn test_parallel_install_records_every_receipt() {
    let mut env = TestEnv::new();
    for name in ["alpha", "beta", "gamma", "delta"] {
        env.add_source(name, "1.0", &[]);
    }
    let options = InstallOptions {
        jobs: 4,
        ..Default::default()
    };
    let report = env
        .orchestrator(PlatformDescriptor::linux(Arch::X86_64))
        .install(
            &names(&["alpha", "beta", "gamma", "delta"]),
            &options,
            &CancellationToken::new(),
        )
        .unwrap();
    assert!(report.is_success(), "{:?}", report.outcomes);

    let receipts = env.store().list().unwrap();
    let names: Vec<&str> = receipts.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "beta", "delta", "gamma"]);
    for r in &receipts {
        assert!(r.keg_path.join("bin").join(&r.name).is_file());
        assert_eq!(r.files, vec![PathBuf::from("bin").join(&r.name)]);
    }
}
