use anyhow::Result;
use clap::Parser;
use kbguard::ingest::{discover_files, SourceFile};
use kbguard::models::Caller;
use kbguard::service::{IngestReport, IngestRequest};
use kbguard::{Config, KnowledgeBase};
use std::collections::{BTreeSet, HashSet};
use std::path::PathBuf;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "ingest")]
#[command(about = "Ingest markdown/text files into the knowledge base (unchanged files are skipped)")]
struct Args {
    /// File or directory to ingest
    path: PathBuf,

    /// Comma-separated tags applied to every file (derived from headings when omitted)
    #[arg(short, long, value_delimiter = ',')]
    tags: Vec<String>,

    /// Re-ingest files even when their content is unchanged
    #[arg(short, long)]
    force: bool,

    /// Delete documents whose files no longer exist under the path
    #[arg(short, long)]
    cleanup: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "info")).init();

    let args = Args::parse();
    log::info!("Starting kbguard ingestion");

    let config = Config::load()?;
    log::info!("Database path: {}", config.db_path().display());
    let knowledge = KnowledgeBase::open(config).await?;
    let operator = Caller::operator("ingest-cli");

    let files = discover_files(&args.path)?;
    if files.is_empty() {
        log::warn!("No files found to ingest under {}", args.path.display());
        return Ok(());
    }

    let tags: BTreeSet<String> = args
        .tags
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();

    let start = Instant::now();
    let total = files.len();
    let (mut ingested, mut unchanged, mut partial, mut errors, mut chunks) = (0, 0, 0, 0, 0);

    for (idx, file) in files.iter().enumerate() {
        log::info!("[{}/{}] Processing: {}", idx + 1, total, file.relative_path);

        match process_file(&knowledge, &operator, file, &tags, args.force).await {
            Ok(report) if report.unchanged => {
                unchanged += 1;
                log::info!("= {} (unchanged)", file.relative_path);
            }
            Ok(report) => {
                ingested += 1;
                chunks += report.chunks_count;
                if report.failed_chunks.is_empty() {
                    log::info!("✓ {} ({} chunks)", file.relative_path, report.chunks_count);
                } else {
                    partial += 1;
                    log::warn!(
                        "~ {} ({} chunks, failed: {:?})",
                        file.relative_path,
                        report.chunks_count,
                        report.failed_chunks
                    );
                }
            }
            Err(e) => {
                errors += 1;
                log::error!("✗ {}: {}", file.relative_path, e);
            }
        }
    }

    let mut removed = 0;
    if args.cleanup && args.path.is_dir() {
        let present: HashSet<String> = files.iter().map(|f| f.document_id()).collect();
        for document in knowledge.list_documents(&operator).await? {
            if present.contains(&document.document_id) {
                continue;
            }
            match knowledge.delete_document(&operator, &document.document_id).await {
                Ok(report) => {
                    removed += 1;
                    log::info!("Removed {} ({} records)", document.document_id, report.deleted_count);
                }
                Err(e) => log::error!("Failed to remove {}: {}", document.document_id, e),
            }
        }
    }

    log::info!("=== Ingestion Complete ===");
    log::info!("Files discovered: {}", total);
    log::info!("  Ingested: {} ({} partially)", ingested, partial);
    log::info!("  Unchanged (skipped): {}", unchanged);
    log::info!("  Errors: {}", errors);
    log::info!("Chunks indexed: {}", chunks);
    if args.cleanup {
        log::info!("Documents removed: {}", removed);
    }
    log::info!("Time: {:?}", start.elapsed());

    if errors > 0 {
        log::warn!("Some files failed to ingest. Check logs above for details.");
    }
    Ok(())
}

async fn process_file(
    knowledge: &KnowledgeBase,
    operator: &Caller,
    file: &SourceFile,
    tags: &BTreeSet<String>,
    force: bool,
) -> Result<IngestReport> {
    let text = tokio::fs::read_to_string(&file.absolute_path)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to read file: {}", e))?;

    let report = knowledge
        .ingest_document(
            operator,
            IngestRequest {
                document_id: file.document_id(),
                filename: file.filename(),
                text,
                tags: tags.clone(),
                force,
            },
        )
        .await?;
    Ok(report)
}
