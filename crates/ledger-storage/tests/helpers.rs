#![allow(dead_code)]

use std::fs;

use ledger_core::{Classification, VerificationStatus};
use ledger_storage::SledStore;
use rand::Rng;
use tempfile::{tempdir, TempDir};

pub const LABELS: [&str; 6] = ["HDPE", "LDPE", "PET", "PP", "PS", "PVC"];

pub fn create_temp_store() -> (TempDir, SledStore) {
    // Create a temporary directory for the sled database
    let temp_dir = tempdir().expect("Failed to create temp dir");
    let db_path = temp_dir.path().to_path_buf();
    (
        temp_dir,
        SledStore::open(&db_path).expect("Failed to open SledStore"),
    )
}

pub fn teardown(temp_dir: TempDir) {
    let db_path = temp_dir.path().to_path_buf();
    temp_dir.close().expect("Failed to delete temp dir");
    let _ = fs::remove_dir_all(&db_path);
    assert!(!db_path.exists(), "Database directory should be removed");
}

pub fn random_classification(request_id: &str) -> Classification {
    let mut rng = rand::thread_rng();
    let image: [u8; 32] = rng.gen();
    Classification {
        request_id: request_id.to_string(),
        plastic_type: LABELS[rng.gen_range(0..LABELS.len())].to_string(),
        confidence: rng.gen_range(0.0..=1.0),
        image_hash: hex::encode(image),
        verification_status: VerificationStatus::Verified,
    }
}
