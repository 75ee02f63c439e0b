use clap::Parser;
use kbguard::{Config, KnowledgeBase};
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(name = "search")]
#[command(about = "Show the context the chatbot would retrieve for a question")]
struct Args {
    /// Question to retrieve context for
    query: String,

    /// Only consider records carrying this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Also generate the chatbot reply
    #[arg(short, long)]
    answer: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    if args.query.trim().is_empty() {
        anyhow::bail!("Query cannot be empty");
    }

    let config = Config::load()?;
    let knowledge = KnowledgeBase::open(config).await?;

    let start = Instant::now();
    let bundle = knowledge.search(&args.query, args.tag.as_deref()).await;
    let elapsed = start.elapsed();

    println!("{}", serde_json::to_string_pretty(&bundle)?);
    eprintln!(
        "{} passages, {} chars, retrieved in {:?}",
        bundle.passages.len(),
        bundle.total_chars(),
        elapsed
    );

    if args.answer {
        let reply = knowledge.converse(&args.query, &[]).await;
        println!("\n{}", reply.reply);
    }

    Ok(())
}
