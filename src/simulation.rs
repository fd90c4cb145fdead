//! # Simulation モジュール
//!
//! ドローン配送シミュレーションのメインループを提供します。
//!
//! 固定時間刻み (Δt) で、質点モデルの姿勢をフリート調整器に渡し、
//! 返ってきた指令で質点モデルを1ステップ進めます。
//!
//! ## 主要機能
//!
//! - **シミュレーションループ管理**: 固定時間刻みによる時間進行制御
//! - **配送依頼の投入**: 依頼時刻に達した荷物をフリートへ登録
//! - **終了判定**: 最大時間到達、全荷物の配送完了、または衝突
//!
//! ## 各ステップの処理順序
//!
//! 1. **依頼投入**: 依頼時刻に達した荷物を登録（集荷ゲートに荷物が残っていれば保留）
//! 2. **フリート処理**: 全機体の姿勢を渡し、指令を受け取る（機体 0 で全体処理）
//! 3. **力学処理**: 指令に従って各機体の姿勢を更新
//!
//! ## 使用例
//!
//! ```no_run
//! use dronesim::scenario::ScenarioConfig;
//! use dronesim::simulation::SimulationEngine;
//!
//! let config = ScenarioConfig::from_file("scenarios/two_airports.yaml")?;
//! let mut engine = SimulationEngine::new(config, 1);
//! engine.initialize()?;
//! let report = engine.run()?;
//! report.print_summary();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use crate::dynamics::KinematicModel;
use crate::models::airport::Gate;
use crate::models::common::{Point2, Pose};
use crate::models::fleet::{FleetCoordinator, FleetError, FleetStats};
use crate::models::package::DeliveryRecord;
use crate::models::traits::IFlightDynamics;
use crate::scenario::{ScenarioConfig, ScenarioError};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, trace};

/// 進行状況を出力する間隔 (s)
const PROGRESS_INTERVAL_S: f64 = 60.0;

/// シミュレーションのエラー
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),

    #[error(transparent)]
    Fleet(#[from] FleetError),

    #[error("シミュレーションが初期化されていません")]
    NotInitialized,
}

/// 時刻付きの配送依頼（空港番号に解決済み）
#[derive(Debug, Clone, Copy)]
struct PackageRequest {
    time: f64,
    from: (usize, Gate),
    to: (usize, Gate),
}

/// 実行結果
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub elapsed_s: f64,
    pub steps: u64,
    pub requested: usize,
    pub delivered: usize,
    /// 未集荷（未依頼を含む）
    pub pending: usize,
    /// 輸送中
    pub in_flight: usize,
    pub mean_delivery_time_s: Option<f64>,
    pub stats: FleetStats,
    pub deliveries: Vec<DeliveryRecord>,
}

impl SimulationReport {
    pub fn all_delivered(&self) -> bool {
        self.delivered == self.requested
    }

    /// 結果の概要を表示
    pub fn print_summary(&self) {
        println!("=== シミュレーション結果 ===");
        println!("経過時間: {:.1}秒 ({}ステップ)", self.elapsed_s, self.steps);
        println!("配送済み: {}/{}件", self.delivered, self.requested);
        println!("未集荷: {}件 / 輸送中: {}件", self.pending, self.in_flight);
        if let Some(mean) = self.mean_delivery_time_s {
            println!("平均配送時間: {:.1}秒", mean);
        }
        println!(
            "割当: {} / 集荷: {} / ゲート移動: {} / 引き渡し: {}",
            self.stats.assignments, self.stats.pickups, self.stats.gate_swaps, self.stats.handovers
        );
        println!(
            "一時上昇: 接近回避 {} / 空港上空 {}",
            self.stats.traffic_raises, self.stats.overflight_raises
        );
        for record in &self.deliveries {
            println!(
                "  荷物{}: 機体{} ({:.1}秒 → {:.1}秒)",
                record.package.id, record.drone, record.package.requested_at, record.delivered_at
            );
        }
    }
}

pub struct SimulationEngine {
    pub current_time: f64,
    pub dt: f64,
    pub max_time: f64,
    pub step_count: u64,

    pub fleet: FleetCoordinator,
    pub dynamics: Vec<KinematicModel>,
    requests: Vec<PackageRequest>,
    released: usize,
    initialized: bool,

    pub scenario_config: ScenarioConfig,
    pub verbose_level: u8,
}

impl SimulationEngine {
    pub fn new(scenario: ScenarioConfig, verbose_level: u8) -> Self {
        Self {
            current_time: 0.0,
            dt: scenario.sim.dt_s,
            max_time: scenario.sim.t_max_s,
            step_count: 0,
            fleet: FleetCoordinator::new(scenario.fleet_config()),
            dynamics: Vec::new(),
            requests: Vec::new(),
            released: 0,
            initialized: false,
            scenario_config: scenario,
            verbose_level,
        }
    }

    /// 空港・機体・配送依頼を組み立てる
    pub fn initialize(&mut self) -> Result<(), SimulationError> {
        self.scenario_config.validate()?;
        info!("シミュレーションエンジンを初期化中...");

        self.initialize_airports();
        self.initialize_drones()?;
        self.initialize_requests()?;
        self.initialized = true;

        info!(
            airports = self.fleet.airports().len(),
            drones = self.fleet.drones().len(),
            packages = self.requests.len(),
            "SIM_INITIALIZED: 初期化完了"
        );
        Ok(())
    }

    fn initialize_airports(&mut self) {
        for airport in &self.scenario_config.airports {
            let index = self.fleet.define_airport(
                Point2::new(airport.center.x_m, airport.center.z_m),
                Point2::new(airport.runway_direction.x_m, airport.runway_direction.z_m),
            );
            if self.verbose_level > 1 {
                debug!("空港初期化: {} (番号: {})", airport.id, index);
            }
        }
    }

    fn initialize_drones(&mut self) -> Result<(), SimulationError> {
        for drone in &self.scenario_config.drones {
            let (airport, gate) = resolve(&self.scenario_config, &drone.airport, drone.gate)?;
            let index = self.fleet.define_drone(airport, gate)?;
            let agent = &self.fleet.drones()[index];
            let pose = Pose::new(agent.location(), agent.heading(), 0.0, 0.0, 0.0);
            self.dynamics
                .push(KinematicModel::new(self.scenario_config.dynamics, pose, 0.0));
            if self.verbose_level > 1 {
                debug!("機体初期化: {} ({} ゲート{})", drone.id, drone.airport, drone.gate);
            }
        }
        Ok(())
    }

    fn initialize_requests(&mut self) -> Result<(), SimulationError> {
        let mut requests = Vec::with_capacity(self.scenario_config.packages.len());
        for package in &self.scenario_config.packages {
            requests.push(PackageRequest {
                time: package.request_time_s,
                from: resolve(&self.scenario_config, &package.from_airport, package.from_gate)?,
                to: resolve(&self.scenario_config, &package.to_airport, package.to_gate)?,
            });
        }
        requests.sort_by(|a, b| a.time.total_cmp(&b.time));
        self.requests = requests;
        Ok(())
    }

    /// 最大時間まで、または全荷物の配送完了まで実行
    pub fn run(&mut self) -> Result<SimulationReport, SimulationError> {
        if !self.initialized {
            return Err(SimulationError::NotInitialized);
        }
        info!("=== シミュレーション実行開始 ===");

        let max_steps = (self.max_time / self.dt - 1e-9).ceil() as u64;
        let progress_every = ((PROGRESS_INTERVAL_S / self.dt).round() as u64).max(1);
        while self.step_count < max_steps {
            if let Err(e) = self.step() {
                error!(time = self.current_time, "SIM_ABORTED: {}", e);
                return Err(e);
            }

            if self.verbose_level > 2 {
                trace!("時刻: {:.2}秒 (ステップ: {})", self.current_time, self.step_count);
            }
            if self.step_count % progress_every == 0 && self.verbose_level > 0 {
                let progress = (self.current_time / self.max_time) * 100.0;
                info!(
                    delivered = self.fleet.delivered().len(),
                    "進行状況: {:.1}% ({:.1}/{:.1}秒)",
                    progress,
                    self.current_time,
                    self.max_time
                );
            }
            if !self.requests.is_empty() && self.released == self.requests.len() && self.fleet.all_delivered() {
                info!(time = self.current_time, "SIM_ALL_DELIVERED: 全ての荷物を配送しました");
                break;
            }
        }

        info!("=== シミュレーション完了 ===");
        info!("実行時間: {:.1}秒", self.current_time);
        info!("総ステップ数: {}", self.step_count);
        Ok(self.report())
    }

    /// 1ステップ進める
    pub fn step(&mut self) -> Result<(), SimulationError> {
        if !self.initialized {
            return Err(SimulationError::NotInitialized);
        }
        self.release_requests()?;

        let poses: Vec<Pose> = self.dynamics.iter().map(|m| m.pose()).collect();
        let commands = self.fleet.step(&poses)?;
        for (model, command) in self.dynamics.iter_mut().zip(&commands) {
            model.step(command, self.dt);
        }

        self.current_time += self.dt;
        self.step_count += 1;
        Ok(())
    }

    fn release_requests(&mut self) -> Result<(), SimulationError> {
        while let Some(request) = self.requests.get(self.released) {
            if request.time > self.current_time {
                break;
            }
            let (from, to) = (request.from, request.to);
            match self.fleet.deliver_package(from.0, from.1, to.0, to.1) {
                Ok(_) => self.released += 1,
                // 集荷ゲートが空くまで後続の依頼ごと保留
                Err(FleetError::PackageWaiting { airport, gate }) => {
                    trace!(airport, ?gate, "SIM_REQUEST_DEFERRED: 集荷ゲートに荷物が残っているため依頼を保留します");
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    /// 現時点の結果
    pub fn report(&self) -> SimulationReport {
        let deliveries = self.fleet.delivered().to_vec();
        let in_flight = self.fleet.packages().iter().filter(|p| p.picked_up).count();
        let mean_delivery_time_s = (!deliveries.is_empty()).then(|| {
            deliveries
                .iter()
                .map(|r| r.delivered_at - r.package.requested_at)
                .sum::<f64>()
                / deliveries.len() as f64
        });
        SimulationReport {
            elapsed_s: self.current_time,
            steps: self.step_count,
            requested: self.requests.len(),
            delivered: deliveries.len(),
            pending: self.requests.len() - deliveries.len() - in_flight,
            in_flight,
            mean_delivery_time_s,
            stats: self.fleet.stats().clone(),
            deliveries,
        }
    }
}

/// 空港ID・ゲート番号を解決
fn resolve(config: &ScenarioConfig, airport: &str, gate: usize) -> Result<(usize, Gate), ScenarioError> {
    let index = config
        .airport_index(airport)
        .ok_or_else(|| ScenarioError::Validation(format!("unknown airport {}", airport)))?;
    let gate = Gate::from_index(gate).ok_or_else(|| ScenarioError::Validation(format!("invalid gate {}", gate)))?;
    Ok((index, gate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::stage::FlightStage;
    use std::collections::HashSet;

    fn short_demo(t_max_s: f64) -> SimulationEngine {
        let mut config = ScenarioConfig::demo();
        config.sim.t_max_s = t_max_s;
        config.packages.retain(|p| p.request_time_s < t_max_s);
        SimulationEngine::new(config, 0)
    }

    #[test]
    fn test_run_requires_initialize() {
        let mut engine = short_demo(1.0);
        assert!(matches!(engine.run(), Err(SimulationError::NotInitialized)));
    }

    #[test]
    fn test_initialize_places_drones_at_gates() {
        let mut engine = short_demo(5.0);
        engine.initialize().unwrap();
        assert_eq!(engine.fleet.airports().len(), 2);
        assert_eq!(engine.dynamics.len(), 2);
        let gate = engine.fleet.airports()[0].gate(Gate::Zero);
        let pose = engine.dynamics[0].pose();
        assert!(pose.position.distance_horizontal(&gate) < 1e-9);
        assert_eq!(pose.position.y, 0.0);
    }

    #[test]
    fn test_package_released_at_request_time() {
        let mut engine = short_demo(20.0);
        engine.initialize().unwrap();
        engine.step().unwrap();
        assert_eq!(engine.released, 1);
        assert_eq!(engine.fleet.stats().assignments, 1);

        while engine.current_time < 10.0 {
            engine.step().unwrap();
        }
        engine.step().unwrap();
        assert_eq!(engine.released, 2);
    }

    #[test]
    fn test_short_run_reports_progress() {
        let mut engine = short_demo(30.0);
        engine.initialize().unwrap();
        let report = engine.run().unwrap();
        assert_eq!(report.steps, 600);
        assert_eq!(report.requested, 2);
        assert_eq!(report.delivered + report.pending + report.in_flight, 2);
        // 同じ空港の反対側ゲートの荷物へ向かっている
        let drone = &engine.fleet.drones()[0];
        assert_eq!(drone.assigned_package(), Some(0));
        assert_eq!(drone.stage(), FlightStage::Taxi);
    }

    /// ゲート・レーン・担当空港・荷物をそれぞれ1機だけが保持していること
    fn assert_exclusive(engine: &SimulationEngine) {
        let fleet = &engine.fleet;
        let time = engine.current_time;
        for drone in fleet.drones() {
            let (mut gates, mut lanes, mut active) = (0, 0, 0);
            for airport in 0..fleet.airports().len() {
                let Some(scheduler) = fleet.scheduler(airport) else {
                    continue;
                };
                for gate in [Gate::Zero, Gate::One] {
                    gates += usize::from(scheduler.gate_occupant(gate) == Some(drone.id));
                    lanes += usize::from(scheduler.lane_occupant(gate) == Some(drone.id));
                }
                active += usize::from(scheduler.is_active(drone.id));
            }
            assert!(gates <= 1, "t={} drone {} holds {} gates", time, drone.id, gates);
            assert!(lanes <= 1, "t={} drone {} holds {} lanes", time, drone.id, lanes);
            assert!(active <= 1, "t={} drone {} active at {} airports", time, drone.id, active);
        }

        let mut holders = HashSet::new();
        for package in fleet.packages() {
            assert!(
                package.reserver.is_none() || package.transporter.is_none(),
                "t={} package {} reserved and carried",
                time,
                package.id
            );
            for holder in [package.reserver, package.transporter].into_iter().flatten() {
                assert!(holders.insert(holder), "t={} drone {} holds two packages", time, holder);
                assert_eq!(fleet.drones()[holder].assigned_package(), Some(package.id), "t={}", time);
            }
            if let Some(transporter) = package.transporter {
                assert!(package.picked_up && fleet.drones()[transporter].is_carrying(), "t={}", time);
            }
        }
    }

    #[test]
    fn test_demo_delivers_packages_end_to_end() {
        let mut engine = SimulationEngine::new(ScenarioConfig::demo(), 0);
        engine.initialize().unwrap();
        let max_steps = (engine.max_time / engine.dt).round() as u64;
        let mut seen = 0;

        while engine.step_count < max_steps {
            engine.step().unwrap();
            assert_exclusive(&engine);

            // 配送はゲートで停止した運搬機でのみ記録される
            for record in &engine.fleet.delivered()[seen..] {
                let package = &record.package;
                let drone = &engine.fleet.drones()[record.drone];
                assert_eq!(package.transporter, Some(record.drone));
                assert!(engine.fleet.airports()[package.to_airport].in_gate(package.to_gate, &drone.location()));
                assert!(drone.location().y < 5.0);
                assert!(drone.is_stationary());
                assert!(!drone.is_carrying());
            }
            seen = engine.fleet.delivered().len();

            if engine.released == engine.requests.len() && engine.fleet.all_delivered() {
                break;
            }
        }

        let report = engine.report();
        assert!(report.delivered >= 1, "nothing delivered in {:.0} s", report.elapsed_s);
        assert!(report.stats.pickups as usize >= report.delivered);
        assert_eq!(report.delivered + report.pending + report.in_flight, 2);
    }

    #[test]
    fn test_request_deferred_while_package_waits_at_gate() {
        let mut config = ScenarioConfig::demo();
        config.packages[1] = config.packages[0].clone();
        config.packages[1].request_time_s = 1.0;
        config.packages[1].to_gate = 0;
        let mut engine = SimulationEngine::new(config, 0);
        engine.initialize().unwrap();

        while engine.current_time < 2.0 {
            engine.step().unwrap();
        }
        // 1件目がまだ集荷されていないので2件目は保留
        assert_eq!(engine.released, 1);
        assert_eq!(engine.fleet.packages().len(), 1);
    }
}
