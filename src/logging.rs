//! # Logging モジュール
//!
//! ドローン運航シミュレーションのログ管理機能を提供します。
//!
//! tracing-appender による非同期ファイル出力と、コンソールへの簡易出力を
//! 組み合わせて初期化します。ティック処理の速度に影響しないよう、
//! ファイルへの書き込みは別スレッドで行います。
//!
//! ## 主要機能
//!
//! - **非同期ログ書き込み**: 日次ローテーションの JSON ファイル出力
//! - **出力先選択**: コンソール、ファイル、またはその両方
//! - **ログレベル制御**: `RUST_LOG` が設定されていればそちらを優先
//!
//! ## 設定可能な出力先
//!
//! - `Console`: コンソールのみ
//! - `File`: ファイルのみ（logs/dronesim.YYYY-MM-DD）
//! - `Both`: コンソールとファイルの両方

use std::str::FromStr;
use tracing::{Level, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::{non_blocking, rolling};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// ログ出力先の設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogOutput {
    /// コンソールのみ
    Console,
    /// ファイルのみ
    File,
    /// コンソールとファイルの両方
    Both,
}

impl LogOutput {
    /// ファイルへ書き出すか
    pub fn writes_file(self) -> bool {
        matches!(self, LogOutput::File | LogOutput::Both)
    }
}

impl FromStr for LogOutput {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "console" | "stdout" => Ok(LogOutput::Console),
            "file" => Ok(LogOutput::File),
            "both" | "all" => Ok(LogOutput::Both),
            _ => Err(format!("無効な出力先: {}. 利用可能: console, file, both", s)),
        }
    }
}

/// ログ設定構造体
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// ログレベル
    pub level: Level,
    /// 出力先
    pub output: LogOutput,
    /// ログファイルのディレクトリ（File または Both の場合）
    pub log_dir: String,
    /// ログファイル名のプレフィックス
    pub file_prefix: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            output: LogOutput::Console,
            log_dir: "logs".to_string(),
            file_prefix: "dronesim".to_string(),
        }
    }
}

/// ログシステムを初期化
///
/// # 引数
///
/// * `config` - ログ設定
///
/// # 戻り値
///
/// ファイル出力時は非同期書き込みのガード。呼び出し側がプロセス終了まで保持する
pub fn init_logging(config: LogConfig) -> Result<Option<WorkerGuard>, Box<dyn std::error::Error>> {
    let env_filter = build_filter(config.level);

    match config.output {
        LogOutput::Console => {
            Registry::default().with(env_filter).with(console_layer()).try_init()?;
            Ok(None)
        }
        LogOutput::File | LogOutput::Both => {
            ensure_log_directory(&config.log_dir)?;
            let file_appender = rolling::daily(&config.log_dir, &config.file_prefix);
            let (writer, guard) = non_blocking(file_appender);
            let file_layer = fmt::layer()
                .with_writer(writer)
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false)
                .json();

            let registry = Registry::default().with(env_filter).with(file_layer);
            if config.output == LogOutput::Both {
                registry.with(console_layer()).try_init()?;
            } else {
                registry.try_init()?;
            }
            Ok(Some(guard))
        }
    }
}

/// コンソール向けの簡易フォーマット
fn console_layer<S>() -> impl Layer<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
}

/// `RUST_LOG` を優先し、なければ設定レベルでフィルタを作る
fn build_filter(level: Level) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.to_string()))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// ログレベルを文字列から解析
///
/// # 引数
///
/// * `level_str` - ログレベル文字列 ("trace", "debug", "info", "warn", "error")
///
/// # 戻り値
///
/// 解析されたログレベル、無効な場合は INFO
pub fn parse_log_level(level_str: &str) -> Level {
    match level_str.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!("警告: 無効なログレベル '{}'. INFOを使用します", level_str);
            Level::INFO
        }
    }
}

/// 詳細出力レベル (-v の数) からログレベルを決める
pub fn level_for_verbosity(verbose: u8) -> Level {
    match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    }
}

/// ログディレクトリを作成
pub fn ensure_log_directory(log_dir: &str) -> Result<(), std::io::Error> {
    std::fs::create_dir_all(log_dir)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_output_from_str() {
        assert_eq!(LogOutput::from_str("console"), Ok(LogOutput::Console));
        assert_eq!(LogOutput::from_str("FILE"), Ok(LogOutput::File));
        assert_eq!(LogOutput::from_str("both"), Ok(LogOutput::Both));
        assert!(LogOutput::from_str("invalid").is_err());
        assert!(LogOutput::Both.writes_file());
        assert!(!LogOutput::Console.writes_file());
    }

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("debug"), Level::DEBUG);
        assert_eq!(parse_log_level("INFO"), Level::INFO);
        assert_eq!(parse_log_level("invalid"), Level::INFO);
    }

    #[test]
    fn test_level_for_verbosity() {
        assert_eq!(level_for_verbosity(0), Level::INFO);
        assert_eq!(level_for_verbosity(1), Level::DEBUG);
        assert_eq!(level_for_verbosity(3), Level::TRACE);
    }
}
