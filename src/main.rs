use clap::{Arg, Command};
use dronesim::logging::{init_logging, level_for_verbosity, parse_log_level, LogConfig, LogOutput};
use dronesim::scenario::{LoggingSection, ScenarioConfig};
use dronesim::simulation::SimulationEngine;
use std::str::FromStr;
use tracing::info;

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("dronesim")
        .version("0.1.0")
        .about("ドローン配送シミュレーション (Drone Fleet Simulation)")
        .long_about(
            "空港間で荷物を運ぶドローン群の自動操縦シミュレーション\n\
             Dubins 経路追従・空港の待機旋回・荷物割当を固定時間刻みで実行します。",
        )
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .conflicts_with("demo"),
        )
        .arg(
            Arg::new("demo")
                .short('d')
                .long("demo")
                .action(clap::ArgAction::SetTrue)
                .help("組み込みの2空港デモシナリオを実行"),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("TARGET")
                .value_parser(["console", "file", "both"])
                .help("ログ出力先 (console, file, both)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)"),
        )
        .get_matches();

    println!("ドローン配送シミュレーション - dronesim v0.1.0");
    println!();

    let verbose_level = matches.get_count("verbose");

    let scenario = if matches.get_flag("demo") {
        ScenarioConfig::demo()
    } else if let Some(path) = matches.get_one::<String>("scenario") {
        match ScenarioConfig::from_file(path) {
            Ok(scenario) => scenario,
            Err(e) => {
                eprintln!("エラー: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        show_default_help();
        return;
    };

    if matches.get_flag("info") {
        scenario.print_summary();
        return;
    }

    let log_config = build_log_config(
        scenario.logging.as_ref(),
        matches.get_one::<String>("log-output").map(String::as_str),
        matches.get_one::<String>("log-level").map(String::as_str),
        verbose_level,
    );
    // ファイル出力のガードは終了まで保持する
    let _guard = match init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ログ初期化エラー: {}", e);
            None
        }
    };

    if let Err(e) = execute_scenario(scenario, verbose_level) {
        eprintln!("エラー: {}", e);
        std::process::exit(1);
    }
}

/// シナリオのログ設定に CLI 指定を重ねる
fn build_log_config(
    section: Option<&LoggingSection>,
    output: Option<&str>,
    level: Option<&str>,
    verbose_level: u8,
) -> LogConfig {
    let mut config = LogConfig::default();
    if let Some(section) = section {
        if let Some(level) = &section.level {
            config.level = parse_log_level(level);
        }
        if let Some(output) = section.output.as_deref().and_then(|o| LogOutput::from_str(o).ok()) {
            config.output = output;
        }
        if let Some(dir) = &section.dir {
            config.log_dir = dir.clone();
        }
        if let Some(prefix) = &section.prefix {
            config.file_prefix = prefix.clone();
        }
    }
    if verbose_level > 0 {
        config.level = level_for_verbosity(verbose_level);
    }
    if let Some(level) = level {
        config.level = parse_log_level(level);
    }
    if let Some(output) = output.and_then(|o| LogOutput::from_str(o).ok()) {
        config.output = output;
    }
    config
}

/// シナリオの実行
fn execute_scenario(scenario: ScenarioConfig, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    scenario.print_summary();
    println!();

    let mut simulation = SimulationEngine::new(scenario, verbose_level);
    simulation.initialize()?;
    let report = simulation.run()?;

    println!();
    report.print_summary();
    info!(
        delivered = report.delivered,
        requested = report.requested,
        "SIM_REPORT: 結果を出力しました"
    );
    Ok(())
}

/// デフォルトヘルプとシナリオ一覧を表示
fn show_default_help() {
    println!("使用方法:");
    println!("  dronesim [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>    シナリオファイルを指定して実行");
    println!("  -d, --demo               組み込みデモシナリオを実行");
    println!("  -i, --info               シナリオ情報のみ表示");
    println!("  -v, --verbose            詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-output <TO>    ログ出力先 (console, file, both)");
    println!("      --log-level <LEVEL>  ログレベル");
    println!("  -h, --help               このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/two_airports.yaml     - 2空港間の往復配送");
    println!("  scenarios/europe_delivery.yaml  - 欧州8空港の配送網");
    println!();
    println!("例:");
    println!("  dronesim -s scenarios/two_airports.yaml");
    println!("  dronesim -s scenarios/europe_delivery.yaml -v --log-output both");
    println!("  dronesim -s scenarios/europe_delivery.yaml -i");
    println!("  dronesim --demo");
}
