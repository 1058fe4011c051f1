use clap::Parser;
use eyre::{Context, Result};
use log::debug;
use reverie::chat::{ChatClient, ChatSession};
use reverie::config::Config;
use reverie::corpus::Corpus;
use reverie::embedding::OpenAiEmbedder;
use reverie::prompt::PromptBuilder;
use reverie::vector_store::VectorStore;
use std::io::{BufRead, Write, stdin, stdout};
use std::path::PathBuf;

/// Console RAG chatbot that role-plays a historical figure from a diary corpus.
#[derive(Parser, Debug)]
#[command(name = "reverie", version, about)]
struct Args {
    /// CSV corpus of diary entries.
    #[arg(long, default_value = "data/cognitive_dataset_van_gogh.csv")]
    corpus: PathBuf,

    /// Directory for the persisted vector index. Defaults to
    /// `<persona id>_index` next to the corpus.
    #[arg(long)]
    index_dir: Option<PathBuf>,

    /// JSON file overriding the model settings.
    #[arg(long)]
    model_config: Option<PathBuf>,

    /// JSON file overriding the persona (character) settings.
    #[arg(long)]
    persona_config: Option<PathBuf>,

    /// Number of diary entries to retrieve per turn.
    #[arg(long, default_value_t = 5)]
    top_k: usize,

    /// Re-embed the corpus even if a fresh index exists.
    #[arg(long)]
    rebuild: bool,

    /// Print the assembled system prompt before each reply.
    #[arg(long)]
    show_context: bool,

    /// Where to persist the chat history; pass to enable saving.
    #[arg(long)]
    history: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Args::parse();
    let config = Config::load(args.model_config.as_deref(), args.persona_config.as_deref())
        .await?;
    let api_key = Config::api_key()?;

    let corpus = Corpus::load(&args.corpus)
        .await
        .wrap_err_with(|| format!("failed to load corpus {}", args.corpus.display()))?;
    println!("Loaded {} diary entries.", corpus.entries.len());

    let index_dir = args.index_dir.unwrap_or_else(|| {
        let dir = format!("{}_index", config.persona.id);
        args.corpus
            .parent()
            .map(|p| p.join(&dir))
            .unwrap_or_else(|| PathBuf::from(dir))
    });

    let embedder = OpenAiEmbedder::new(
        &config.model.endpoint,
        &api_key,
        &config.model.embedding_model,
    )?;
    let store = VectorStore::open_or_build(&index_dir, &corpus, &embedder, args.rebuild).await?;

    let mut client = ChatClient::new(&config.model.endpoint, &api_key, &config.model.chat_model)?;
    client.temperature = config.model.temperature;
    client.max_tokens = config.model.max_tokens;
    let mut session = ChatSession::new(client, args.history);

    let prompt_builder = PromptBuilder::new(config.persona.clone());
    println!(
        "Speaking with {}. Type 'quit' to leave.",
        config.persona.name
    );

    let mut input = String::new();
    let mut out = stdout();
    loop {
        print!("> ");
        out.flush()?;

        input.clear();
        if stdin().lock().read_line(&mut input)? == 0 {
            break;
        }
        let query = input.trim();
        if query.is_empty() {
            continue;
        }
        if query == "quit" || query == "exit" {
            break;
        }

        let matches = store.search_query(&embedder, query, args.top_k).await?;
        debug!("retrieved {} entries", matches.len());

        let matched_texts: Vec<String> = matches.into_iter().map(|(_, text)| text).collect();
        let rows = corpus.filter_by_text(&matched_texts);
        let system_prompt = prompt_builder.system_prompt(&rows);

        if args.show_context {
            println!("--- system prompt ---\n{system_prompt}\n---------------------");
        }

        session
            .process_and_chat(query, system_prompt, &mut out)
            .await?;
        println!();
    }

    Ok(())
}
