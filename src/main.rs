//! crawl-forum CLI 진입점

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    // .env 로드 (없어도 무시)
    let _ = dotenvy::dotenv();

    // 로깅 초기화
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    // CLI 실행
    let cli = crawl_forum::cli::Cli::parse();

    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(crawl_forum::cli::run(cli))
}
