use std::io::{IsTerminal, Write};

use clap::Parser;
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use rshuffledns::api::SubdomainResolveEngine;
use rshuffledns::input::Opts;

#[tokio::main]
async fn main() {
    let opts = Opts::parse();
    init_logger(&opts);

    // 没有显式输入源时，管道进来的内容当作子域名列表
    let stdin_piped = !std::io::stdin().is_terminal()
        && opts.wordlist.is_none()
        && opts.list.is_none()
        && opts.massdns_raw.is_none();

    if let Err(e) = run(opts, stdin_piped).await {
        log::error!("程序退出: {}", e);
        std::process::exit(1);
    }
}

fn init_logger(opts: &Opts) {
    let level = if opts.silent {
        LevelFilter::Error
    } else if opts.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    let _ = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    );
}

async fn run(opts: Opts, stdin_piped: bool) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    opts.validate(stdin_piped)?;

    // 管道输入先落到临时文件，引擎只处理文件
    let mut stdin_file = None;
    let subdomains_list = if stdin_piped {
        let mut file = tempfile::NamedTempFile::new()?;
        std::io::copy(&mut std::io::stdin().lock(), &mut file)?;
        file.flush()?;
        let path = file.path().to_string_lossy().to_string();
        stdin_file = Some(file);
        Some(path)
    } else {
        None
    };

    let config = opts.into_config(subdomains_list);
    let engine = SubdomainResolveEngine::new(config).await?;
    let resolved = engine.process().await?;
    log::info!("完成，共输出 {} 个有效域名", resolved);

    drop(stdin_file);
    Ok(())
}
