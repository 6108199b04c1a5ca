/// MySQL GTID 위치 검색 도구
///
/// 환경 변수로 설정을 받아 binlog 디렉토리 또는 원격 서버에서 GTID 위치를 찾습니다.
use mysql_gtid_position::{locate, GtidPosition, OutputFormat, Result, SearchConfig};
use std::path::Path;
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing::{error, info, Level};

#[tokio::main]
async fn main() -> ExitCode {
    let config = match SearchConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // 로깅 초기화
    tracing_subscriber::fmt()
        .with_max_level(if config.verbose {
            Level::DEBUG
        } else {
            Level::INFO
        })
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = config.validate() {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    info!("Target GTID: {}", config.target_gtid);

    let started = Instant::now();
    let result = match locate(&config).await {
        Ok(result) => result,
        Err(e) => {
            error!("Search failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match result {
        Some(position) => match print_result(
            &position,
            config.output_format,
            config.output_file.as_deref(),
            started.elapsed(),
        ) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Failed to print result: {}", e);
                ExitCode::FAILURE
            }
        },
        None => {
            println!("GTID not found");
            ExitCode::FAILURE
        }
    }
}

fn print_result(
    position: &GtidPosition,
    format: OutputFormat,
    output_file: Option<&Path>,
    elapsed: Duration,
) -> Result<()> {
    let rendered = match format {
        OutputFormat::Json => serde_json::to_string_pretty(&position.to_json())? + "\n",
        OutputFormat::Csv => position.to_csv(),
        OutputFormat::Console => {
            let rule = "-".repeat(60);
            println!("{}", rule);
            println!("Found GTID in {:.2} seconds", elapsed.as_secs_f64());
            println!("{}", rule);
            println!("{}", position);
            println!("{}", rule);
            println!(
                "Resume CDC from: {} (next GTID: {})",
                position.resume_at(),
                position.next_gtid.as_deref().unwrap_or("none")
            );
            return Ok(());
        }
    };

    match output_file {
        Some(path) => {
            std::fs::write(path, rendered)?;
            info!("Result written to {}", path.display());
        }
        None => print!("{}", rendered),
    }
    Ok(())
}
