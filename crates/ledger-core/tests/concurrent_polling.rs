use ledger_core::{
    verify_chain, Block, ChainStore, Classification, PollError, PollGateway, VerificationStatus,
};
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tokio_util::sync::CancellationToken;

fn classification(id: &str) -> Classification {
    let mut rng = rand::thread_rng();
    let image: [u8; 32] = rng.gen();
    Classification {
        request_id: id.to_string(),
        plastic_type: ["HDPE", "PET", "PS"][rng.gen_range(0..3)].to_string(),
        confidence: rng.gen_range(0.0..=1.0),
        image_hash: hex::encode(image),
        verification_status: if rng.gen_bool(0.8) {
            VerificationStatus::Verified
        } else {
            VerificationStatus::Unverified
        },
    }
}

fn assert_window_consistent(window: &[Arc<Block>]) {
    for pair in window.windows(2) {
        assert_eq!(pair[0].index, pair[1].index + 1, "window has a gap");
        assert_eq!(pair[0].previous_hash, pair[1].hash, "window linkage broken");
    }
    for block in window {
        assert_ne!(block.index, 0);
        assert_eq!(block.hash, block.compute_hash());
    }
}

#[tokio::test]
async fn empty_store_polls_empty_once_initialized() -> anyhow::Result<()> {
    let store = Arc::new(ChainStore::new());
    let gateway = PollGateway::new(store.clone());
    let cancel = CancellationToken::new();

    let before = gateway.poll(10, &cancel).await;
    assert!(matches!(before, Err(PollError::Unavailable { .. })));

    store.init()?;
    assert!(gateway.poll(10, &cancel).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn poll_scenarios() -> anyhow::Result<()> {
    let store = Arc::new(ChainStore::new());
    store.init()?;
    let gateway = PollGateway::new(store.clone());
    let cancel = CancellationToken::new();

    for i in 1..=3 {
        store.append(classification(&format!("req-{i}")))?;
    }
    let window = gateway.poll(10, &cancel).await?;
    assert_eq!(window.iter().map(|b| b.index).collect::<Vec<_>>(), vec![3, 2, 1]);

    for i in 4..=15 {
        store.append(classification(&format!("req-{i}")))?;
    }
    let window = gateway.poll(10, &cancel).await?;
    assert_eq!(
        window.iter().map(|b| b.index).collect::<Vec<_>>(),
        (6..=15).rev().collect::<Vec<u64>>()
    );
    assert_window_consistent(&window);
    Ok(())
}

#[test]
fn appends_interleaved_with_polls_never_tear() {
    let store = Arc::new(ChainStore::new());
    store.init().unwrap();
    for i in 1..=3 {
        store.append(classification(&format!("seed-{i}"))).unwrap();
    }

    let done = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let gateway = PollGateway::new(store.clone());
            let done = done.clone();
            thread::spawn(move || {
                let mut polls = 0u64;
                while !done.load(Ordering::Acquire) || polls < 100 {
                    let window = gateway.poll_now(10).expect("poll should succeed");
                    assert_window_consistent(&window);
                    let indices: Vec<u64> = window.iter().map(|b| b.index).collect();
                    if indices.contains(&5) {
                        assert!(indices.contains(&4), "block 5 served without block 4");
                    }
                    polls += 1;
                }
                polls
            })
        })
        .collect();

    let writer = {
        let store = store.clone();
        thread::spawn(move || {
            for i in 4..=200 {
                store.append(classification(&format!("live-{i}"))).unwrap();
            }
        })
    };

    writer.join().unwrap();
    done.store(true, Ordering::Release);
    for reader in readers {
        assert!(reader.join().unwrap() >= 100);
    }

    let snapshot = store.snapshot();
    assert_eq!(snapshot.len(), 201);
    assert!(verify_chain(&snapshot.blocks()).is_ok());
}

#[test]
fn read_your_writes() {
    let store = Arc::new(ChainStore::new());
    store.init().unwrap();
    let gateway = PollGateway::new(store.clone());
    for i in 1..=50u64 {
        let block = store.append(classification(&format!("ryw-{i}"))).unwrap();
        let window = gateway.poll_now(1).unwrap();
        assert_eq!(window[0].index, i);
        assert_eq!(window[0].hash, block.hash);
    }
}

#[test]
fn chains_built_by_append_always_verify() {
    let mut rng = rand::thread_rng();
    for _ in 0..20 {
        let store = ChainStore::new();
        store.init().unwrap();
        let len = rng.gen_range(0..60);
        let mut clock = 1_700_000_000u64;
        for i in 0..len {
            // Clock jitter, including backwards steps.
            clock = clock.saturating_add_signed(rng.gen_range(-5..=5));
            store
                .append_at(classification(&format!("p-{i}")), clock)
                .unwrap();
        }
        let blocks = store.snapshot().blocks();
        assert!(verify_chain(&blocks).is_ok());
        assert!(blocks.windows(2).all(|w| w[1].timestamp >= w[0].timestamp));
    }
}
