//! Concurrency tests
//!
//! Writers are serialized on the store-wide lock; readers run on pooled
//! read-only connections and must never see a layer without its full file set.

use layerdex::prelude::*;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc, Barrier,
};
use std::thread;

const FILES_PER_LAYER: usize = 40;

fn layer_toc(tag: &str) -> Toc {
    Toc::new(1000, 4000).with_files(
        (0..FILES_PER_LAYER).map(|i| TocFile::new(format!("/{tag}/file-{i:03}")).with_size(i as i64)),
    )
}

#[test]
fn test_concurrent_inserts_are_not_interleaved() {
    let temp_dir = tempfile::tempdir().unwrap();
    let index = Arc::new(LayerIndex::new(IndexConfig::new(
        temp_dir.path().join("index.db"),
    )));

    let num_threads = 12;
    let barrier = Arc::new(Barrier::new(num_threads));
    let handles: Vec<_> = (0..num_threads)
        .map(|i| {
            let index = Arc::clone(&index);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let tag = format!("t{i}");
                let id = index
                    .insert(&format!("sha256:{tag}"), &layer_toc(&tag), None)
                    .unwrap();
                (tag, id)
            })
        })
        .collect();

    let inserted: Vec<(String, LayerId)> =
        handles.into_iter().map(|h| h.join().unwrap()).collect();

    let stats = index.stats().unwrap();
    assert_eq!(stats.layers, num_threads as u64);
    assert_eq!(stats.files, (num_threads * FILES_PER_LAYER) as u64);
    assert_eq!(stats.initializations, 1);

    for (tag, id) in inserted {
        let files = index.files_for_layer(id).unwrap();
        assert_eq!(files.len(), FILES_PER_LAYER);
        assert!(files.iter().all(|f| f.name.starts_with(&format!("/{tag}/"))));
        // One transaction per layer: its file ids form a contiguous run
        for pair in files.windows(2) {
            assert_eq!(pair[1].id.0, pair[0].id.0 + 1);
        }
    }
}

#[test]
fn test_readers_never_see_partial_layers() {
    let temp_dir = tempfile::tempdir().unwrap();
    let index = Arc::new(
        LayerIndex::open(
            IndexConfig::new(temp_dir.path().join("index.db")).with_read_pool_size(4),
        )
        .unwrap(),
    );

    let num_layers = 30;
    let num_readers = 4;
    let done = Arc::new(AtomicBool::new(false));
    let checks = Arc::new(AtomicU64::new(0));

    let readers: Vec<_> = (0..num_readers)
        .map(|_| {
            let index = Arc::clone(&index);
            let done = Arc::clone(&done);
            let checks = Arc::clone(&checks);
            thread::spawn(move || {
                while !done.load(Ordering::Acquire) {
                    for layer in index.find_layers_by_image(&ImageFilter::new()).unwrap() {
                        let files = index.files_for_layer(layer.id).unwrap();
                        assert_eq!(files.len(), FILES_PER_LAYER, "partial layer {}", layer.id);
                        checks.fetch_add(1, Ordering::Relaxed);
                    }

                    let hits = index
                        .find_files_by_name(NameMatch::Suffix("file-000".into()), FileScope::All)
                        .unwrap()
                        .count();
                    assert!(hits <= num_layers);
                }
            })
        })
        .collect();

    let writer = {
        let index = Arc::clone(&index);
        thread::spawn(move || {
            for i in 0..num_layers {
                let tag = format!("w{i}");
                index
                    .insert(&format!("sha256:{tag}"), &layer_toc(&tag), None)
                    .unwrap();
            }
        })
    };

    writer.join().unwrap();
    done.store(true, Ordering::Release);
    for reader in readers {
        reader.join().unwrap();
    }

    assert_eq!(index.stats().unwrap().layers, num_layers as u64);
    println!("reader checks: {}", checks.load(Ordering::Relaxed));
}

#[test]
fn test_close_while_idle_readers_exist() {
    let temp_dir = tempfile::tempdir().unwrap();
    let index = Arc::new(LayerIndex::open(IndexConfig::new(temp_dir.path().join("index.db"))).unwrap());
    index
        .insert("sha256:abc", &layer_toc("a"), None)
        .unwrap();

    let num_threads = 4;
    let barrier = Arc::new(Barrier::new(num_threads + 1));
    let handles: Vec<_> = (0..num_threads)
        .map(|_| {
            let index = Arc::clone(&index);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                // Either completes before the close or observes it
                match index.find_layers_by_digest("sha256:abc") {
                    Ok(layers) => assert_eq!(layers.len(), 1),
                    Err(e) => assert_eq!(e.kind(), ErrorKind::Closed),
                }
            })
        })
        .collect();

    barrier.wait();
    index.close().unwrap();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(matches!(
        index.find_layers_by_digest("sha256:abc"),
        Err(IndexError::Closed)
    ));
}

#[test]
fn test_stats_counts_come_from_one_snapshot() {
    let temp_dir = tempfile::tempdir().unwrap();
    let index = Arc::new(
        LayerIndex::open(
            IndexConfig::new(temp_dir.path().join("index.db")).with_read_pool_size(2),
        )
        .unwrap(),
    );

    let num_layers = 40;
    let done = Arc::new(AtomicBool::new(false));

    let reader = {
        let index = Arc::clone(&index);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            while !done.load(Ordering::Acquire) {
                let stats = index.stats().unwrap();
                assert_eq!(
                    stats.files,
                    stats.layers * FILES_PER_LAYER as u64,
                    "layers and files counted from different snapshots"
                );
            }
        })
    };

    for i in 0..num_layers {
        let tag = format!("s{i}");
        index
            .insert(&format!("sha256:{tag}"), &layer_toc(&tag), None)
            .unwrap();
    }
    done.store(true, Ordering::Release);
    reader.join().unwrap();

    assert_eq!(index.stats().unwrap().layers, num_layers as u64);
}
