use kbguard::models::Caller;
use kbguard::{Config, KnowledgeBase};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = Config::load()?;
    let knowledge = KnowledgeBase::open(config).await?;
    let operator = Caller::operator("stats-cli");

    let documents = knowledge.list_documents(&operator).await?;
    let stats = knowledge.stats().await?;

    println!("\n=== kbguard Knowledge Base Statistics ===\n");
    println!("Documents: {}", documents.len());
    println!("Vector records: {}", stats.total_records);

    if documents.is_empty() {
        println!("\nNo documents ingested yet. Run the ingest binary to add some.");
        return Ok(());
    }

    println!();
    println!("{:-<96}", "");
    println!(
        "{:<32} {:<28} {:>8} {:>8} {:>16}",
        "Document", "Filename", "Chunks", "Records", "Updated"
    );
    println!("{:-<96}", "");

    let mut mismatches = 0;
    let mut expected_total = 0;
    for document in &documents {
        let records = knowledge.index().count_for_document(&document.document_id).await?;
        expected_total += document.chunks_count;
        let flag = if records == document.chunks_count {
            ""
        } else {
            mismatches += 1;
            "  !"
        };
        println!(
            "{:<32} {:<28} {:>8} {:>8} {:>16}{}",
            document.document_id,
            document.filename,
            document.chunks_count,
            records,
            document.updated_at.format("%Y-%m-%d %H:%M"),
            flag
        );
    }
    println!("{:-<96}", "");

    if stats.total_records != expected_total {
        println!(
            "\nIndex holds {} records but metadata accounts for {} (orphaned or missing records)",
            stats.total_records, expected_total
        );
    }
    if mismatches > 0 {
        println!("{} document(s) disagree with the index; re-ingest them with --force", mismatches);
    } else {
        println!("\nEvery document matches its record count.");
    }
    println!();

    Ok(())
}
