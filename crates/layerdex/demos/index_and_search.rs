//! Index and Search Example
//!
//! This example demonstrates:
//! - Opening an index lazily
//! - Indexing layers with and without image provenance
//! - Looking layers up by digest and by image
//! - Searching file names across layers
//!
//! Run with: cargo run -p layerdex --example index_and_search

use layerdex::prelude::*;

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("layerdex_sqlite=debug,info")
        .init();

    let temp_dir = tempfile::tempdir()?;
    let db_path = temp_dir.path().join("index").join("layers.db");

    // ========================================
    // 1. Open (lazily) and index two layers
    // ========================================
    println!("Step 1: Indexing layers into {}", db_path.display());
    let index = LayerIndex::new(IndexConfig::new(&db_path));

    let base = Toc::new(2_811_478, 7_376_896)
        .with_archive_type("tar+gzip")
        .with_media_type("application/vnd.oci.image.layer.v1.tar+gzip")
        .with_file(TocFile::new("/bin").with_typeflag(b'5').with_mode(0o755))
        .with_file(
            TocFile::new("/bin/sh")
                .with_typeflag(b'2')
                .with_linkname("/bin/busybox"),
        )
        .with_file(TocFile::new("/etc/passwd").with_size(1172).with_mode(0o644))
        .with_file(TocFile::new("/lib/libc.musl-x86_64.so.1").with_size(596_536));
    let alpine = ImageContext::parse("alpine:3.19")?;
    let base_id = index.insert("sha256:4abcf2066143", &base, Some(&alpine))?;
    println!("   layer {} <- {}", base_id, alpine.image_ref);

    let app = Toc::new(1_024, 4_096)
        .with_file(TocFile::new("/etc/nginx/nginx.conf").with_size(2_048))
        .with_file(TocFile::new("/usr/sbin/nginx").with_size(1_310_720).with_mode(0o755));
    let app_id = index.insert("sha256:9c7a54a9a43c", &app, None)?;
    println!("   layer {} <- (no provenance)\n", app_id);

    // ========================================
    // 2. Layer lookups
    // ========================================
    println!("Step 2: Layer lookups");
    for layer in index.find_layers_by_image(&ImageFilter::from_reference("alpine")?)? {
        println!(
            "   {} tag={} files={}",
            layer.digest,
            layer.tag.as_deref().unwrap_or("-"),
            index.files_for_layer(layer.id)?.len()
        );
    }
    println!(
        "   by digest: {} match(es)\n",
        index.find_layers_by_digest("sha256:9c7a54a9a43c")?.len()
    );

    // ========================================
    // 3. File searches
    // ========================================
    println!("Step 3: File searches");
    for name in [
        NameMatch::Exact("/etc/passwd".into()),
        NameMatch::Prefix("/etc/".into()),
        NameMatch::Glob("*nginx*".into()),
    ] {
        println!("   {:?}", name);
        for hit in index.find_files_by_name(name, FileScope::All)? {
            let hit = hit?;
            println!(
                "      {} ({}) in {}",
                hit.file.name,
                hit.file.entry_type(),
                hit.layer.digest
            );
        }
    }

    let stats = index.stats()?;
    println!(
        "\nDone: {} layers, {} files, schema v{}",
        stats.layers, stats.files, stats.schema_version
    );

    index.close()
}
