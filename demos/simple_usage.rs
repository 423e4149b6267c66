/// Complete Verbex API Demo
///
/// Demonstrates the major index operations:
/// - Document ingestion and removal
/// - Search (OR, AND, label filtered)
/// - Labels and tags
/// - Statistics
/// - Persistence across close/reopen
use std::sync::Arc;

use verbex::{
    BasicLemmatizer, BasicStopWordRemover, CancellationToken, Index, IndexConfig, SearchOptions,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("\n╔═══════════════════════════════════════════╗");
    println!("║       Verbex Index - Complete Demo        ║");
    println!("╚═══════════════════════════════════════════╝\n");

    let cancel = CancellationToken::new();

    // Step 1: Create an in-memory index with the full pipeline
    println!("Step 1: Opening index...");
    let mut config = IndexConfig::new("demo");
    config.stop_word_remover = Some(Arc::new(BasicStopWordRemover::english()));
    config.lemmatizer = Some(Arc::new(BasicLemmatizer::new()));
    let index = Index::new(config)?;
    index.open().await?;
    println!("  Done!\n");

    // Step 2: Ingest documents
    println!("Step 2: Adding documents...");
    let rust_doc = index
        .add_document(
            "rust-intro",
            "The Rust language is running everywhere these days",
            &cancel,
        )
        .await?;
    index
        .add_document(
            "db-systems",
            "Databases were storing documents long before search engines",
            &cancel,
        )
        .await?;
    index
        .add_document("web-dev", "Building web apps with search built in", &cancel)
        .await?;
    println!("  Inserted 3 documents\n");

    // Step 3: Labels and tags
    println!("Step 3: Labeling...");
    index.add_label(&rust_doc, "tech", &cancel).await?;
    index
        .set_tag(&rust_doc, "language", Some("rust"), &cancel)
        .await?;
    println!("  Labeled '{rust_doc}'\n");

    // Step 4: Search
    println!("Step 4: Searching...");
    let results = index
        .search("search", &SearchOptions::default(), &cancel)
        .await?;
    println!("  'search': {} results", results.total_count);

    // Lemmatized query: "run" matches "running".
    let results = index
        .search("run", &SearchOptions::default(), &cancel)
        .await?;
    println!("  'run': {} results", results.total_count);

    let results = index
        .search("search web", &SearchOptions::and_logic(), &cancel)
        .await?;
    println!("  'search web' (AND): {} results", results.total_count);

    let results = index
        .search("rust", &SearchOptions::with_labels(["tech"]), &cancel)
        .await?;
    println!("  'rust' with label 'tech': {} results", results.total_count);

    // Step 5: Statistics
    println!("\nStep 5: Statistics...");
    let stats = index.get_statistics().await?;
    println!(
        "  documents={} terms={} postings={} avg_len={:.1}",
        stats.doc_count, stats.term_count, stats.posting_count, stats.avg_doc_length
    );

    // Step 6: Snapshot to disk, then reopen as a persistent index
    println!("\nStep 6: Persisting...");
    let dir = tempfile::tempdir()?;
    index.flush(Some(dir.path())).await?;
    index.close().await?;

    let reopened = Index::new(IndexConfig::on_disk("demo", dir.path()))?;
    reopened.open().await?;
    let stats = reopened.get_statistics().await?;
    println!("  Reopened from disk: {} documents", stats.doc_count);
    reopened.close().await?;

    println!("\nAll done.");
    Ok(())
}
