use crate::dynamics::DynamicsConfig;
use crate::models::airport::{AirportDimensions, Gate};
use crate::models::fleet::{FleetConfig, SchedulingPolicy};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// シナリオメタデータ
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioMeta {
    pub version: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// シミュレーション設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationConfig {
    pub dt_s: f64,
    pub t_max_s: f64,
}

/// 世界設定（全空港共通）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorldConfig {
    pub airport_length_m: f64,
    pub airport_width_m: f64,
    pub collision_distance_m: f64,
}

impl Default for WorldConfig {
    fn default() -> Self {
        let dims = AirportDimensions::default();
        Self {
            airport_length_m: dims.length,
            airport_width_m: dims.width,
            collision_distance_m: FleetConfig::default().collision_distance,
        }
    }
}

/// 水平面上の位置・方向 (X, Z)
#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct Position2D {
    pub x_m: f64,
    pub z_m: f64,
}

/// 空港設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AirportConfig {
    pub id: String,
    pub center: Position2D,
    pub runway_direction: Position2D,
}

/// 機体設定（初期位置のゲート）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DroneConfig {
    pub id: String,
    pub airport: String,
    pub gate: usize,
}

/// 配送依頼設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackageConfig {
    pub request_time_s: f64,
    pub from_airport: String,
    pub from_gate: usize,
    pub to_airport: String,
    pub to_gate: usize,
}

/// 荷物割当の設定
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulingConfig {
    pub policy: SchedulingPolicy,
}

/// ログ設定（CLI 指定が優先）
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSection {
    pub level: Option<String>,
    pub output: Option<String>,
    pub dir: Option<String>,
    pub prefix: Option<String>,
}

/// 完全なシナリオ設定
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub meta: ScenarioMeta,
    pub sim: SimulationConfig,
    #[serde(default)]
    pub world: WorldConfig,
    pub airports: Vec<AirportConfig>,
    pub drones: Vec<DroneConfig>,
    #[serde(default)]
    pub packages: Vec<PackageConfig>,
    #[serde(default)]
    pub scheduling: SchedulingConfig,
    #[serde(default)]
    pub dynamics: DynamicsConfig,
    #[serde(default)]
    pub logging: Option<LoggingSection>,
}

impl ScenarioConfig {
    /// YAMLファイルからシナリオ設定を読み込み
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScenarioError> {
        let path = path.as_ref();

        // ファイル存在チェック
        if !path.exists() {
            return Err(ScenarioError::FileNotFound(path.to_path_buf()));
        }

        // ファイル読み込み
        let contents = fs::read_to_string(path).map_err(|e| ScenarioError::Io(path.to_path_buf(), e))?;

        // YAML解析
        let config: ScenarioConfig = serde_yaml::from_str(&contents)
            .map_err(|e| ScenarioError::Parse(path.display().to_string(), e))?;

        config.validate()?;
        Ok(config)
    }

    /// YAML文字列からシナリオ設定を読み込み
    pub fn from_yaml_str(contents: &str) -> Result<Self, ScenarioError> {
        let config: ScenarioConfig =
            serde_yaml::from_str(contents).map_err(|e| ScenarioError::Parse("<inline>".to_string(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// 組み込みのデモシナリオ（2空港・2機・往復2件）
    pub fn demo() -> Self {
        let airport = |id: &str, x_m: f64, z_m: f64| AirportConfig {
            id: id.to_string(),
            center: Position2D { x_m, z_m },
            runway_direction: Position2D { x_m: -1.0, z_m: 0.0 },
        };
        let package = |request_time_s: f64, from: &str, to: &str| PackageConfig {
            request_time_s,
            from_airport: from.to_string(),
            from_gate: 1,
            to_airport: to.to_string(),
            to_gate: 1,
        };
        Self {
            meta: ScenarioMeta {
                version: "1.0".to_string(),
                name: "demo".to_string(),
                description: "2空港間の往復配送".to_string(),
            },
            sim: SimulationConfig { dt_s: 0.05, t_max_s: 1800.0 },
            world: WorldConfig::default(),
            airports: vec![airport("MAD", 3000.0, -2800.0), airport("PAR", 8800.0, -10800.0)],
            drones: vec![
                DroneConfig { id: "D0".to_string(), airport: "MAD".to_string(), gate: 0 },
                DroneConfig { id: "D1".to_string(), airport: "PAR".to_string(), gate: 0 },
            ],
            packages: vec![package(0.0, "MAD", "PAR"), package(10.0, "PAR", "MAD")],
            scheduling: SchedulingConfig::default(),
            dynamics: DynamicsConfig::default(),
            logging: None,
        }
    }

    /// 空港IDから空港番号を引く
    pub fn airport_index(&self, id: &str) -> Option<usize> {
        self.airports.iter().position(|a| a.id == id)
    }

    /// フリート設定への変換
    pub fn fleet_config(&self) -> FleetConfig {
        FleetConfig {
            dimensions: AirportDimensions {
                length: self.world.airport_length_m,
                width: self.world.airport_width_m,
            },
            collision_distance: self.world.collision_distance_m,
            policy: self.scheduling.policy,
        }
    }

    /// 設定の基本的な検証
    pub fn validate(&self) -> Result<(), ScenarioError> {
        let invalid = |msg: String| Err(ScenarioError::Validation(msg));

        // 時間設定の検証
        if self.sim.dt_s <= 0.0 {
            return invalid("dt_s must be positive".to_string());
        }
        if self.sim.t_max_s <= 0.0 {
            return invalid("t_max_s must be positive".to_string());
        }

        // 空港寸法の検証
        if self.world.airport_length_m <= 0.0 || self.world.airport_width_m <= 0.0 {
            return invalid("airport dimensions must be positive".to_string());
        }
        if self.world.collision_distance_m < 0.0 {
            return invalid("collision_distance_m must not be negative".to_string());
        }

        // 空港の検証
        if self.airports.is_empty() {
            return invalid("at least one airport is required".to_string());
        }
        let mut ids = HashSet::new();
        for airport in &self.airports {
            if !ids.insert(airport.id.as_str()) {
                return invalid(format!("duplicate airport id {}", airport.id));
            }
            let dir = airport.runway_direction;
            let norm = (dir.x_m * dir.x_m + dir.z_m * dir.z_m).sqrt();
            if !norm.is_finite() || (norm - 1.0).abs() > 0.1 {
                return invalid(format!("airport {} runway_direction must be a unit vector", airport.id));
            }
        }

        // 機体の検証
        let mut occupied = HashSet::new();
        for drone in &self.drones {
            let airport = self.check_gate(&drone.airport, drone.gate, &format!("drone {}", drone.id))?;
            if !occupied.insert((airport, drone.gate)) {
                return invalid(format!(
                    "drone {} placed on occupied gate {} of {}",
                    drone.id, drone.gate, drone.airport
                ));
            }
        }

        // 配送依頼の検証
        for (index, package) in self.packages.iter().enumerate() {
            let label = format!("package #{}", index);
            let from = self.check_gate(&package.from_airport, package.from_gate, &label)?;
            let to = self.check_gate(&package.to_airport, package.to_gate, &label)?;
            if (from, package.from_gate) == (to, package.to_gate) {
                return invalid(format!("{} has identical pickup and delivery gates", label));
            }
            if package.request_time_s < 0.0 || package.request_time_s >= self.sim.t_max_s {
                return invalid(format!(
                    "{} request time {} outside simulation time {}",
                    label, package.request_time_s, self.sim.t_max_s
                ));
            }
        }

        Ok(())
    }

    fn check_gate(&self, airport: &str, gate: usize, label: &str) -> Result<usize, ScenarioError> {
        let index = self
            .airport_index(airport)
            .ok_or_else(|| ScenarioError::Validation(format!("{} refers to unknown airport {}", label, airport)))?;
        if Gate::from_index(gate).is_none() {
            return Err(ScenarioError::Validation(format!("{} refers to invalid gate {}", label, gate)));
        }
        Ok(index)
    }

    /// シナリオの概要を表示
    pub fn print_summary(&self) {
        println!("=== シナリオ情報 ===");
        println!("名前: {}", self.meta.name);
        println!("説明: {}", self.meta.description);
        println!("バージョン: {}", self.meta.version);
        println!();

        println!("=== シミュレーション設定 ===");
        println!("時間刻み: {:.3}秒", self.sim.dt_s);
        println!("最大時間: {:.1}秒 ({:.1}分)", self.sim.t_max_s, self.sim.t_max_s / 60.0);
        println!("割当方式: {:?}", self.scheduling.policy);
        println!();

        println!("=== 空港 ===");
        println!(
            "寸法: 長さ {:.0}m / 幅 {:.0}m",
            self.world.airport_length_m, self.world.airport_width_m
        );
        for airport in &self.airports {
            println!(
                "  {}: 中心 ({:.0}, {:.0})",
                airport.id, airport.center.x_m, airport.center.z_m
            );
        }
        println!();

        println!("=== 機体 ===");
        println!("機体数: {}機", self.drones.len());
        for drone in &self.drones {
            println!("  {}: {} ゲート{}", drone.id, drone.airport, drone.gate);
        }
        println!();

        println!("=== 配送依頼 ===");
        println!("依頼数: {}件", self.packages.len());
        for package in &self.packages {
            println!(
                "  {:.1}秒: {} ゲート{} → {} ゲート{}",
                package.request_time_s, package.from_airport, package.from_gate, package.to_airport, package.to_gate
            );
        }
    }
}

/// シナリオ読み込みエラー
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("シナリオファイルが見つかりません: {}", .0.display())]
    FileNotFound(PathBuf),

    #[error("ファイル読み込みエラー {}: {}", .0.display(), .1)]
    Io(PathBuf, #[source] std::io::Error),

    #[error("YAML解析エラー {0}: {1}")]
    Parse(String, #[source] serde_yaml::Error),

    #[error("設定検証エラー: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
meta:
  version: "1.0"
  name: minimal
sim:
  dt_s: 0.05
  t_max_s: 600
airports:
  - id: A
    center: { x_m: 0, z_m: 0 }
    runway_direction: { x_m: -1, z_m: 0 }
  - id: B
    center: { x_m: 8000, z_m: 0 }
    runway_direction: { x_m: 0, z_m: 1 }
drones:
  - { id: D0, airport: A, gate: 0 }
packages:
  - { request_time_s: 5, from_airport: A, from_gate: 1, to_airport: B, to_gate: 0 }
scheduling:
  policy: naive
"#;

    #[test]
    fn test_parse_minimal_with_defaults() {
        let config = ScenarioConfig::from_yaml_str(MINIMAL).unwrap();
        assert_eq!(config.airports.len(), 2);
        assert_eq!(config.world.airport_width_m, 250.0);
        assert_eq!(config.world.collision_distance_m, 5.0);
        assert_eq!(config.scheduling.policy, SchedulingPolicy::Naive);
        assert_eq!(config.dynamics, DynamicsConfig::default());
        assert_eq!(config.airport_index("B"), Some(1));
        assert!(config.logging.is_none());
    }

    #[test]
    fn test_demo_is_valid() {
        let demo = ScenarioConfig::demo();
        assert!(demo.validate().is_ok());
        assert_eq!(demo.fleet_config().policy, SchedulingPolicy::Greedy);
    }

    #[test]
    fn test_rejects_shared_gate() {
        let mut config = ScenarioConfig::demo();
        config.drones[1].airport = "MAD".to_string();
        assert!(matches!(config.validate(), Err(ScenarioError::Validation(_))));
    }

    #[test]
    fn test_rejects_unknown_airport_and_gate() {
        let mut config = ScenarioConfig::demo();
        config.packages[0].to_airport = "LON".to_string();
        assert!(matches!(config.validate(), Err(ScenarioError::Validation(msg)) if msg.contains("LON")));

        let mut config = ScenarioConfig::demo();
        config.drones[0].gate = 2;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_bad_runway_and_time() {
        let mut config = ScenarioConfig::demo();
        config.airports[0].runway_direction = Position2D { x_m: 0.0, z_m: 0.0 };
        assert!(config.validate().is_err());

        let mut config = ScenarioConfig::demo();
        config.sim.dt_s = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_io_error_message_names_path() {
        let error = ScenarioError::Io(
            PathBuf::from("scenarios/broken.yaml"),
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(error.to_string(), "ファイル読み込みエラー scenarios/broken.yaml: denied");
    }

    #[test]
    fn test_parse_error_and_missing_file() {
        assert!(matches!(
            ScenarioConfig::from_yaml_str("meta: ["),
            Err(ScenarioError::Parse(_, _))
        ));
        assert!(matches!(
            ScenarioConfig::from_file("no/such/scenario.yaml"),
            Err(ScenarioError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_bundled_scenarios_load() {
        for name in ["two_airports.yaml", "europe_delivery.yaml"] {
            let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios").join(name);
            let config = ScenarioConfig::from_file(&path).unwrap();
            assert!(!config.drones.is_empty(), "{}", name);
        }
    }
}
