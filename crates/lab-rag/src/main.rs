//! lab-rag - interactive graduate lab recommender

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::sync::Arc;

use lab_rag::{ClassifierPolicy, Command, LabRagConfig, LabRecommender};

const DIVIDER: &str = "============================================================";

#[derive(Parser, Debug)]
#[command(name = "lab-rag", version, about = "대학원 연구실 추천 AI")]
struct Args {
    /// Number of labs retrieved per search (default 5)
    #[arg(long)]
    k: Option<usize>,

    /// Re-embed the corpus and overwrite the index snapshot
    #[arg(long)]
    rebuild: bool,

    /// JSON configuration file
    #[arg(long, env = "LAB_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Professor dataset
    #[arg(long)]
    data: Option<PathBuf>,

    /// Index snapshot location
    #[arg(long)]
    index: Option<PathBuf>,

    /// Intent classification policy
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    Llm,
    Rules,
}

impl From<PolicyArg> for ClassifierPolicy {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::Llm => ClassifierPolicy::Llm,
            PolicyArg::Rules => ClassifierPolicy::Rules,
        }
    }
}

fn load_config(args: &Args) -> Result<LabRagConfig> {
    let mut config = match &args.config {
        Some(path) => LabRagConfig::from_file(path)
            .map_err(anyhow::Error::msg)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => LabRagConfig::default(),
    };
    config.apply_env();

    if let Some(k) = args.k {
        config.search.default_k = k;
    }
    if let Some(data) = &args.data {
        config.data_path = data.clone();
    }
    if let Some(index) = &args.index {
        config.index_path = index.clone();
    }
    if let Some(policy) = args.policy {
        config.classifier.policy = policy.into();
    }

    config.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

async fn build_index(engine: &LabRecommender) {
    let pb = ProgressBar::new(engine.corpus_size() as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} 교수 임베딩 ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );

    let report = engine
        .rebuild_index_with_progress(|done, _| pb.set_position(done as u64))
        .await;
    pb.finish_and_clear();

    println!("✅ 벡터 저장소 생성 완료: {}개 연구실", report.total);
    if !report.failed.is_empty() {
        println!(
            "⚠️  임베딩 실패 {}건 (검색 품질이 낮을 수 있습니다): {}",
            report.failed.len(),
            report
                .failed
                .iter()
                .map(|id| id.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }
}

async fn run_repl(engine: Arc<LabRecommender>) -> Result<()> {
    let mut editor = DefaultEditor::new().context("Failed to initialize line editor")?;
    let mut session = engine.new_session();

    println!("\n🎓 대학원 연구실 추천 AI에 오신 것을 환영합니다!");
    println!("관심있는 연구 분야나 주제를 자유롭게 입력해주세요.");
    println!("종료하려면 'quit' 또는 'exit'를 입력하세요.");
    println!("대화를 새로 시작하려면 'clear' 또는 'reset'을 입력하세요.\n");

    loop {
        let prompt = if session.state().is_empty() {
            "\n💭 어떤 연구 분야에 관심이 있으신가요? >> "
        } else {
            "\n💬 추가 질문이 있으신가요? >> "
        };

        let line = match editor.readline(prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => {
                println!("\n\n👋 프로그램을 종료합니다.");
                break;
            }
            Err(e) => return Err(e).context("Failed to read input"),
        };

        match Command::parse(&line) {
            Command::Quit => {
                println!("\n👋 대학원 연구실 추천 AI를 이용해 주셔서 감사합니다!");
                break;
            }
            Command::Reset => {
                session.reset();
                println!("\n🔄 대화 히스토리가 초기화되었습니다. 새로운 대화를 시작합니다.");
            }
            Command::Empty => println!("❗ 질문을 입력해주세요."),
            Command::Ask(query) => {
                if let Err(e) = editor.add_history_entry(query.as_str()) {
                    tracing::debug!(error = %e, "Failed to record input history");
                }
                match session.ask(&query).await {
                    Ok(reply) => {
                        println!("\n🤖 질문 분류: {}", reply.classification.intent);
                        println!("   이유: {}", reply.classification.reason);
                        println!("{}", DIVIDER);
                        println!("{}", reply.answer);
                        println!("{}", DIVIDER);
                        if !reply.documents.is_empty() {
                            let names: Vec<&str> =
                                reply.documents.iter().map(|d| d.professor_name()).collect();
                            println!("📚 참고한 교수진: {}", names.join(", "));
                        }
                    }
                    Err(e) => {
                        println!("\n❌ 오류가 발생했습니다: {}", e);
                        println!("다시 시도해주세요.");
                    }
                }
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = load_config(&args)?;

    let (embedder, llm) = LabRecommender::connect(&config).context("Failed to set up API clients")?;
    let engine = Arc::new(
        LabRecommender::new(config, embedder, llm).context("Failed to load professor corpus")?,
    );

    if args.rebuild || engine.needs_rebuild() {
        println!("🔨 벡터 저장소를 생성합니다...");
        build_index(&engine).await;
    }

    run_repl(engine).await
}
