//! # Fleet モジュール
//!
//! フリート全体の調整器を提供します。
//!
//! 調整器は全機体・全空港・配送依頼を所有し、毎ティック各機体の
//! 監視者（フリートまたはいずれかの空港スケジューラ）に判断を委ねます。
//! 機体番号 0 のティックでは全体処理（衝突判定・荷物割当・集荷・配送）を行います。
//!
//! ## 主要機能
//!
//! - 荷物の割当（最近傍の貪欲法、または機体ごとの単純方式）
//! - 集荷・配送の検出と記録
//! - 自由空域での一時上昇（接近回避、空港上空の通過）
//! - 目的空港への引き渡し

use crate::models::airport::{Airport, AirportDimensions, Gate};
use crate::models::common::{math_utils, Point2, Pose};
use crate::models::drone::{DroneAgent, DroneDirective, RaiseCause};
use crate::models::package::{DeliveryRecord, Package};
use crate::models::scheduler::{AirportScheduler, AirportStatus, FleetView, LEVEL_HEIGHT};
use crate::models::stage::FlightCommand;
use crate::models::traits::IPilot;
use serde::{Deserialize, Serialize};
use std::f64::consts::FRAC_PI_2;
use thiserror::Error;
use tracing::{debug, error, info};

/// 目的空港のスケジューラへ引き渡す距離 (m)
pub const HANDOVER_DISTANCE: f64 = 2000.0;
/// 接近回避の対象とする水平距離 (m)
pub const TRAFFIC_DISTANCE: f64 = 500.0;
/// 単純方式で他空港の荷物を取りに行く最小距離 (m)
const NAIVE_MIN_DISTANCE: f64 = 1000.0;

/// フリート調整のエラー
#[derive(Debug, Error, Clone, PartialEq)]
pub enum FleetError {
    #[error("unknown airport {0}")]
    UnknownAirport(usize),

    #[error("unknown drone {0}")]
    UnknownDrone(usize),

    #[error("gate {gate:?} of airport {airport} is already occupied")]
    GateOccupied { airport: usize, gate: Gate },

    #[error("a package is already waiting at gate {gate:?} of airport {airport}")]
    PackageWaiting { airport: usize, gate: Gate },

    #[error("drones {first} and {second} collided ({distance:.2} m apart)")]
    Collision { first: usize, second: usize, distance: f64 },
}

/// 荷物の割当方式
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulingPolicy {
    /// 待機機と荷物を距離順に対応付ける
    #[default]
    Greedy,
    /// 各機体が自分で次の荷物を選ぶ
    Naive,
}

/// 機体の監視者
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Supervisor {
    Fleet,
    Airport(usize),
}

/// フリート設定
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FleetConfig {
    pub dimensions: AirportDimensions,
    /// この距離未満に近づいたら衝突とみなす (m)
    pub collision_distance: f64,
    pub policy: SchedulingPolicy,
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            dimensions: AirportDimensions::default(),
            collision_distance: 5.0,
            policy: SchedulingPolicy::Greedy,
        }
    }
}

/// フリート統計
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FleetStats {
    pub assignments: u32,
    pub pickups: u32,
    pub deliveries: u32,
    pub gate_swaps: u32,
    pub traffic_raises: u32,
    pub overflight_raises: u32,
    pub handovers: u32,
}

/// フリート調整器
#[derive(Debug)]
pub struct FleetCoordinator {
    config: FleetConfig,
    airports: Vec<Airport>,
    schedulers: Vec<AirportScheduler>,
    statuses: Vec<AirportStatus>,
    drones: Vec<DroneAgent>,
    supervisors: Vec<Supervisor>,
    packages: Vec<Package>,
    delivered: Vec<DeliveryRecord>,
    next_package_id: usize,
    elapsed: f64,
    stats: FleetStats,
}

impl FleetCoordinator {
    pub fn new(config: FleetConfig) -> Self {
        Self {
            config,
            airports: Vec::new(),
            schedulers: Vec::new(),
            statuses: Vec::new(),
            drones: Vec::new(),
            supervisors: Vec::new(),
            packages: Vec::new(),
            delivered: Vec::new(),
            next_package_id: 0,
            elapsed: 0.0,
            stats: FleetStats::default(),
        }
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    pub fn airports(&self) -> &[Airport] {
        &self.airports
    }

    pub fn drones(&self) -> &[DroneAgent] {
        &self.drones
    }

    pub fn scheduler(&self, airport: usize) -> Option<&AirportScheduler> {
        self.schedulers.get(airport)
    }

    pub fn supervisor(&self, drone: usize) -> Option<Supervisor> {
        self.supervisors.get(drone).copied()
    }

    /// 未配送の荷物
    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn delivered(&self) -> &[DeliveryRecord] {
        &self.delivered
    }

    pub fn stats(&self) -> &FleetStats {
        &self.stats
    }

    pub fn elapsed(&self) -> f64 {
        self.elapsed
    }

    /// 依頼済みの荷物がすべて配送されたか
    pub fn all_delivered(&self) -> bool {
        self.packages.is_empty()
    }

    /// 空港を定義
    ///
    /// # 引数
    ///
    /// * `center` - 中心 (X, Z)
    /// * `runway_direction` - 滑走路 0 方向
    ///
    /// # 戻り値
    ///
    /// 空港番号
    pub fn define_airport(&mut self, center: Point2, runway_direction: Point2) -> usize {
        let id = self.airports.len();
        let airport = Airport::new(id, center, runway_direction, self.config.dimensions);
        info!(airport = id, x = center.x, z = center.z, "FLEET_AIRPORT_DEFINED: 空港を定義しました");
        self.schedulers.push(AirportScheduler::new(airport.clone()));
        self.airports.push(airport);
        self.refresh_statuses();
        id
    }

    /// 機体をゲートに駐機した状態で定義
    ///
    /// # 戻り値
    ///
    /// 機体番号。ゲートが使用中ならエラー
    pub fn define_drone(&mut self, airport: usize, gate: Gate) -> Result<usize, FleetError> {
        let id = self.drones.len();
        let scheduler = self.schedulers.get_mut(airport).ok_or(FleetError::UnknownAirport(airport))?;
        if !scheduler.place_at_gate(id, gate) {
            return Err(FleetError::GateOccupied { airport, gate });
        }
        // 離陸時に使うレーン入口を向けて駐機
        let location = self.airports[airport].gate(gate).with_height(0.0);
        let heading = math_utils::bearing(&location, &self.airports[airport].start_lane(gate.other()));
        self.drones.push(DroneAgent::new(id, location, heading));
        self.supervisors.push(Supervisor::Airport(airport));
        info!(drone = id, airport, ?gate, "FLEET_DRONE_DEFINED: 機体を定義しました");
        self.refresh_statuses();
        Ok(id)
    }

    /// 配送依頼を登録
    ///
    /// 集荷ゲートに未集荷の荷物が残っている間は受け付けない。
    pub fn deliver_package(
        &mut self,
        from_airport: usize,
        from_gate: Gate,
        to_airport: usize,
        to_gate: Gate,
    ) -> Result<usize, FleetError> {
        for airport in [from_airport, to_airport] {
            if airport >= self.airports.len() {
                return Err(FleetError::UnknownAirport(airport));
            }
        }
        if self
            .packages
            .iter()
            .any(|p| !p.picked_up && p.origin() == (from_airport, from_gate))
        {
            return Err(FleetError::PackageWaiting {
                airport: from_airport,
                gate: from_gate,
            });
        }
        let id = self.next_package_id;
        self.next_package_id += 1;
        self.packages
            .push(Package::new(id, from_airport, from_gate, to_airport, to_gate, self.elapsed));
        info!(package = id, from_airport, to_airport, "FLEET_PACKAGE_REQUESTED: 配送依頼を受け付けました");
        Ok(id)
    }

    /// 全機体を1ティック進める
    pub fn step(&mut self, poses: &[Pose]) -> Result<Vec<FlightCommand>, FleetError> {
        poses
            .iter()
            .enumerate()
            .map(|(drone, pose)| self.tick(drone, pose))
            .collect()
    }

    /// 1機分のティック
    ///
    /// 機体 0 のときは先に全体処理を行う。
    ///
    /// # 引数
    ///
    /// * `drone` - 機体番号
    /// * `pose` - 飛行力学から受け取った姿勢
    ///
    /// # 戻り値
    ///
    /// 飛行力学への指令。衝突時はエラー
    pub fn tick(&mut self, drone: usize, pose: &Pose) -> Result<FlightCommand, FleetError> {
        if drone >= self.drones.len() {
            return Err(FleetError::UnknownDrone(drone));
        }
        self.elapsed = pose.elapsed;
        self.drones[drone].observe(pose);

        if drone == 0 {
            self.global_pass()?;
        }

        match self.supervisors[drone] {
            Supervisor::Airport(airport) => self.supervise_at_airport(drone, airport, pose),
            Supervisor::Fleet => self.supervise_in_fleet(drone, pose),
        }
        Ok(self.drones[drone].command(pose))
    }

    fn global_pass(&mut self) -> Result<(), FleetError> {
        self.check_collisions()?;
        self.refresh_statuses();
        match self.config.policy {
            SchedulingPolicy::Greedy => self.assign_greedy(),
            SchedulingPolicy::Naive => self.assign_naive(),
        }
        self.handle_pickups();
        self.handle_deliveries();
        self.handle_gate_swaps();
        Ok(())
    }

    fn refresh_statuses(&mut self) {
        self.statuses = self.schedulers.iter().map(|s| s.status(&self.drones)).collect();
    }

    fn check_collisions(&self) -> Result<(), FleetError> {
        for (first, a) in self.drones.iter().enumerate() {
            for (second, b) in self.drones.iter().enumerate().skip(first + 1) {
                let distance = a.location().distance_3d(&b.location());
                if distance < self.config.collision_distance {
                    error!(first, second, distance, "FLEET_COLLISION: 機体同士が衝突しました");
                    return Err(FleetError::Collision { first, second, distance });
                }
            }
        }
        Ok(())
    }

    fn assign_greedy(&mut self) {
        let idle: Vec<usize> = self
            .drones
            .iter()
            .filter(|d| d.is_idle())
            .map(|d| d.id)
            .collect();
        let waiting: Vec<usize> = self
            .packages
            .iter()
            .enumerate()
            .filter(|(_, p)| p.is_unassigned())
            .map(|(index, _)| index)
            .collect();
        if idle.is_empty() || waiting.is_empty() {
            return;
        }

        let mut pairs = Vec::with_capacity(idle.len() * waiting.len());
        for &drone in &idle {
            for &index in &waiting {
                let (airport, gate) = self.packages[index].origin();
                let distance = self.drones[drone].location().distance_3d(&self.airports[airport].gate(gate));
                pairs.push((drone, index, distance));
            }
        }
        pairs.sort_by(|a, b| a.2.total_cmp(&b.2));

        let limit = idle.len().min(waiting.len());
        let mut assigned = 0;
        for (drone, index, distance) in pairs {
            if assigned == limit {
                break;
            }
            if !self.drones[drone].is_idle() || !self.packages[index].is_unassigned() {
                continue;
            }
            self.reserve(drone, index);
            debug!(drone, distance, "FLEET_NEAREST_MATCH: 最短距離で対応付けました");
            assigned += 1;
        }
    }

    fn assign_naive(&mut self) {
        for drone in 0..self.drones.len() {
            if !self.drones[drone].is_idle() {
                continue;
            }
            let location = self.drones[drone].location();
            let Some((airport, gate)) = self.parked_at(drone) else {
                continue;
            };
            let waiting = |p: &&Package| p.is_unassigned();

            if let Some(index) = self.packages.iter().position(|p| waiting(&p) && p.origin() == (airport, gate)) {
                self.reserve(drone, index);
            } else if let Some(index) = self
                .packages
                .iter()
                .position(|p| waiting(&p) && p.origin() == (airport, gate.other()))
            {
                self.reserve(drone, index);
            } else {
                let nearest = self
                    .packages
                    .iter()
                    .enumerate()
                    .filter(|(_, p)| waiting(p) && p.from_airport != airport)
                    .map(|(index, p)| (index, location.distance_3d(&self.airports[p.from_airport].gate(p.from_gate))))
                    .filter(|(_, distance)| *distance > NAIVE_MIN_DISTANCE)
                    .min_by(|a, b| a.1.total_cmp(&b.1));
                if let Some((index, _)) = nearest {
                    self.reserve(drone, index);
                }
            }
        }
    }

    /// 集荷に向かう機体を予約
    fn reserve(&mut self, drone: usize, index: usize) {
        let package = &mut self.packages[index];
        package.reserver = Some(drone);
        let (airport, gate) = package.origin();
        let id = package.id;
        self.drones[drone].assign_package(id);
        self.drones[drone].apply([DroneDirective::AddTargetAirport(airport, gate)]);
        self.stats.assignments += 1;
        info!(drone, package = id, airport, ?gate, "FLEET_ASSIGN: 荷物の集荷を割り当てました");
    }

    /// ゲートに駐機している空港とゲート
    fn parked_at(&self, drone: usize) -> Option<(usize, Gate)> {
        let location = self.drones[drone].location();
        self.schedulers.iter().find_map(|s| {
            [Gate::Zero, Gate::One]
                .into_iter()
                .find(|g| s.gate_occupant(*g) == Some(drone) && s.airport().in_gate(*g, &location))
                .map(|g| (s.id(), g))
        })
    }

    /// ゲートで停止し、次の行き先を持たない機体
    fn ready_at(&self, airport: usize, gate: Gate) -> Option<usize> {
        let drone = self.schedulers[airport].gate_occupant(gate)?;
        let agent = &self.drones[drone];
        let ready = self.airports[airport].in_gate(gate, &agent.location())
            && agent.is_stationary()
            && agent.target_count() == 0
            && !agent.has_target_airport();
        ready.then_some(drone)
    }

    fn handle_pickups(&mut self) {
        for index in 0..self.packages.len() {
            let package = &self.packages[index];
            if package.picked_up {
                continue;
            }
            let (airport, gate) = package.origin();
            let Some(drone) = self.ready_at(airport, gate) else {
                continue;
            };
            let agent = &self.drones[drone];
            if agent.is_carrying() || agent.assigned_package().is_some_and(|p| p != package.id) {
                continue;
            }

            let previous = package.reserver.filter(|r| *r != drone);
            let package = &mut self.packages[index];
            package.transporter = Some(drone);
            package.reserver = None;
            package.picked_up = true;
            let (id, destination) = (package.id, package.destination());
            if let Some(previous) = previous {
                self.drones[previous].clear_package();
            }
            self.drones[drone].pick_up(id);
            self.drones[drone].apply([DroneDirective::AddTargetAirport(destination.0, destination.1)]);
            self.stats.pickups += 1;
            info!(drone, package = id, to_airport = destination.0, "FLEET_PICKUP: 荷物を積み込みました");
        }
    }

    fn handle_deliveries(&mut self) {
        let mut index = 0;
        while index < self.packages.len() {
            let package = &self.packages[index];
            let (airport, gate) = package.destination();
            let delivered = package.picked_up
                && package
                    .transporter
                    .is_some_and(|t| self.ready_at(airport, gate) == Some(t));
            if !delivered {
                index += 1;
                continue;
            }
            let package = self.packages.remove(index);
            let Some(drone) = package.transporter else {
                continue;
            };
            self.drones[drone].clear_package();
            self.stats.deliveries += 1;
            info!(
                drone,
                package = package.id,
                elapsed = self.elapsed,
                waited = self.elapsed - package.requested_at,
                "FLEET_DELIVERED: 荷物を配送しました"
            );
            self.delivered.push(DeliveryRecord {
                package,
                drone,
                delivered_at: self.elapsed,
            });
        }
    }

    /// 集荷ゲートが空いていれば、反対側ゲートの待機機を移す
    fn handle_gate_swaps(&mut self) {
        for index in 0..self.packages.len() {
            let package = &self.packages[index];
            if package.picked_up || package.reserver.is_none() {
                continue;
            }
            let (airport, gate) = package.origin();
            let scheduler = &self.schedulers[airport];
            if scheduler.gate_occupant(gate).is_some() || scheduler.lane_occupant(gate).is_some() {
                continue;
            }
            let Some(drone) = self.ready_at(airport, gate.other()) else {
                continue;
            };
            if !self.drones[drone].is_idle() {
                continue;
            }
            self.drones[drone].apply([DroneDirective::AddTargetAirport(airport, gate)]);
            self.stats.gate_swaps += 1;
            info!(drone, package = package.id, airport, ?gate, "FLEET_GATE_SWAP: 待機機を集荷ゲートへ移します");
        }
    }

    fn supervise_at_airport(&mut self, drone: usize, airport: usize, pose: &Pose) {
        let outcome = self.schedulers[airport].handle(
            drone,
            pose,
            &FleetView {
                drones: &self.drones,
                airports: &self.statuses,
            },
        );
        self.drones[drone].apply(outcome.directives);
        if outcome.released {
            self.supervisors[drone] = Supervisor::Fleet;
        }
    }

    fn supervise_in_fleet(&mut self, drone: usize, pose: &Pose) {
        let location = self.drones[drone].location();

        if let Some((airport, _)) = self.drones[drone].first_target_airport() {
            if self.airports[airport].distance_to(&location) < HANDOVER_DISTANCE {
                self.drones[drone].restore_altitude();
                self.schedulers[airport].register(drone);
                self.supervisors[drone] = Supervisor::Airport(airport);
                self.stats.handovers += 1;
                info!(drone, airport, "FLEET_HANDOVER: 目的空港のスケジューラへ引き渡しました");
                self.supervise_at_airport(drone, airport, pose);
                return;
            }
        }

        match self.drones[drone].altitude_raise().map(|r| r.cause) {
            Some(RaiseCause::Traffic) => {
                if self.nearby_fleet_drone(drone, false).is_none() {
                    self.drones[drone].restore_altitude();
                }
            }
            Some(RaiseCause::Overflight(airport)) => {
                if !self.airport_ahead(drone, pose, airport) {
                    self.drones[drone].restore_altitude();
                }
            }
            None => {
                if let Some(other) = self.nearby_fleet_drone(drone, true) {
                    if self.drones[drone].raise_for_traffic() {
                        self.stats.traffic_raises += 1;
                        debug!(drone, other, "FLEET_TRAFFIC_RAISE: 接近機を避けるため上昇します");
                    }
                } else if let Some(airport) = self.overflown_airport(drone, pose) {
                    let height = self.statuses[airport].stack_height + LEVEL_HEIGHT;
                    if self.drones[drone].raise_for_overflight(airport, height) {
                        self.stats.overflight_raises += 1;
                        debug!(drone, airport, height, "FLEET_OVERFLIGHT_RAISE: 空港上空を通過するため上昇します");
                    }
                }
            }
        }
    }

    /// 接近しているフリート監視下の機体（`lower_only` なら自分より小さい番号のみ）
    fn nearby_fleet_drone(&self, drone: usize, lower_only: bool) -> Option<usize> {
        let location = self.drones[drone].location();
        self.drones
            .iter()
            .filter(|other| other.id != drone && (!lower_only || other.id < drone))
            .filter(|other| self.supervisors[other.id] == Supervisor::Fleet)
            .find(|other| other.location().distance_horizontal(&location) < TRAFFIC_DISTANCE)
            .map(|other| other.id)
    }

    fn airport_ahead(&self, drone: usize, pose: &Pose, airport: usize) -> bool {
        let center = self.airports[airport].center_at(pose.position.y);
        self.airports[airport].distance_to(&pose.position) < HANDOVER_DISTANCE
            && math_utils::heading_delta(pose.heading, &self.drones[drone].location(), &center).abs() < FRAC_PI_2
    }

    /// 前方で通過しようとしている目的地以外の空港
    fn overflown_airport(&self, drone: usize, pose: &Pose) -> Option<usize> {
        let agent = &self.drones[drone];
        if agent.location().y <= 5.0 || agent.first_target_height() <= 0.0 {
            return None;
        }
        let target = agent.first_target_airport().map(|(a, _)| a);
        self.airports
            .iter()
            .filter(|a| Some(a.id) != target)
            .find(|a| self.airport_ahead(drone, pose, a.id))
            .map(|a| a.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::common::Point3;

    fn coordinator() -> FleetCoordinator {
        let mut fleet = FleetCoordinator::new(FleetConfig::default());
        fleet.define_airport(Point2::new(0.0, 0.0), Point2::new(-1.0, 0.0));
        fleet.define_airport(Point2::new(20000.0, 0.0), Point2::new(-1.0, 0.0));
        fleet
    }

    fn parked_poses(fleet: &FleetCoordinator, elapsed: f64) -> Vec<Pose> {
        fleet
            .drones()
            .iter()
            .map(|d| Pose::new(d.location(), d.heading(), 0.0, 0.0, elapsed))
            .collect()
    }

    #[test]
    fn test_greedy_assigns_nearest_drone() {
        let mut fleet = coordinator();
        fleet.define_drone(0, Gate::Zero).unwrap();
        fleet.define_drone(1, Gate::Zero).unwrap();
        fleet.deliver_package(1, Gate::One, 0, Gate::One).unwrap();
        fleet.deliver_package(0, Gate::One, 1, Gate::One).unwrap();

        let poses = parked_poses(&fleet, 0.0);
        fleet.step(&poses).unwrap();

        assert_eq!(fleet.drones()[0].assigned_package(), Some(1));
        assert_eq!(fleet.drones()[1].assigned_package(), Some(0));
        assert_eq!(fleet.packages()[0].reserver, Some(1));
        assert_eq!(fleet.packages()[1].reserver, Some(0));
        assert_eq!(fleet.stats().assignments, 2);
    }

    #[test]
    fn test_two_packages_at_one_airport_get_one_drone_each() {
        let mut fleet = coordinator();
        fleet.define_drone(1, Gate::Zero).unwrap();
        fleet.define_drone(0, Gate::Zero).unwrap();
        fleet.deliver_package(0, Gate::Zero, 1, Gate::One).unwrap();
        fleet.deliver_package(0, Gate::One, 1, Gate::One).unwrap();

        fleet.step(&parked_poses(&fleet, 0.0)).unwrap();

        // 機体1は自ゲートの荷物、遠方の機体0は残りの荷物
        assert_eq!(fleet.drones()[1].assigned_package(), Some(0));
        assert_eq!(fleet.drones()[0].assigned_package(), Some(1));
        assert_eq!(fleet.stats().assignments, 2);
        for package in fleet.packages() {
            assert!(package.reserver.is_some());
        }
    }

    #[test]
    fn test_single_package_assigned_once() {
        let mut fleet = coordinator();
        fleet.define_drone(0, Gate::Zero).unwrap();
        fleet.define_drone(0, Gate::One).unwrap();
        fleet.deliver_package(0, Gate::One, 1, Gate::Zero).unwrap();

        let poses = parked_poses(&fleet, 0.0);
        fleet.step(&poses).unwrap();
        fleet.step(&parked_poses(&fleet, 0.1)).unwrap();

        let holders: Vec<_> = fleet.drones().iter().filter(|d| d.assigned_package().is_some()).collect();
        assert_eq!(holders.len(), 1);
        assert_eq!(holders[0].id, 1);
    }

    #[test]
    fn test_pickup_then_take_off() {
        let mut fleet = coordinator();
        fleet.define_drone(0, Gate::Zero).unwrap();
        fleet.deliver_package(0, Gate::Zero, 1, Gate::One).unwrap();

        fleet.step(&parked_poses(&fleet, 0.0)).unwrap();
        assert!(!fleet.drones()[0].has_target_airport());

        fleet.step(&parked_poses(&fleet, 0.1)).unwrap();
        let drone = &fleet.drones()[0];
        assert!(drone.is_carrying());
        assert!(fleet.packages()[0].picked_up);
        assert_eq!(fleet.packages()[0].transporter, Some(0));
        assert_eq!(drone.first_target_airport(), Some((1, Gate::One)));
        assert_eq!(drone.target_count(), 5);
        assert_eq!(fleet.scheduler(0).and_then(|s| s.lane_occupant(Gate::One)), Some(0));
    }

    #[test]
    fn test_delivery_recorded_at_destination_gate() {
        let mut fleet = coordinator();
        fleet.define_drone(1, Gate::One).unwrap();
        fleet.deliver_package(0, Gate::Zero, 1, Gate::One).unwrap();
        fleet.packages[0].picked_up = true;
        fleet.packages[0].transporter = Some(0);
        fleet.drones[0].pick_up(0);

        fleet.step(&parked_poses(&fleet, 5.0)).unwrap();
        assert!(fleet.all_delivered());
        assert_eq!(fleet.delivered().len(), 1);
        assert_eq!(fleet.delivered()[0].drone, 0);
        assert_eq!(fleet.delivered()[0].delivered_at, 5.0);
        assert!(!fleet.drones()[0].is_carrying());
        assert_eq!(fleet.drones()[0].assigned_package(), None);
    }

    #[test]
    fn test_collision_is_fatal() {
        let mut fleet = coordinator();
        fleet.define_drone(0, Gate::Zero).unwrap();
        fleet.define_drone(0, Gate::One).unwrap();
        let p = Pose::new(Point3::new(100.0, 50.0, 100.0), 0.0, 0.0, 0.0, 1.0);
        let q = Pose::new(Point3::new(102.0, 50.0, 100.0), 0.0, 0.0, 0.0, 1.0);

        fleet.tick(1, &q).unwrap();
        let result = fleet.tick(0, &p);
        assert!(matches!(result, Err(FleetError::Collision { first: 0, second: 1, .. })));
    }

    #[test]
    fn test_define_errors() {
        let mut fleet = coordinator();
        fleet.define_drone(0, Gate::Zero).unwrap();
        assert_eq!(
            fleet.define_drone(0, Gate::Zero),
            Err(FleetError::GateOccupied { airport: 0, gate: Gate::Zero })
        );
        assert_eq!(fleet.define_drone(7, Gate::Zero), Err(FleetError::UnknownAirport(7)));
        assert_eq!(
            fleet.deliver_package(0, Gate::Zero, 9, Gate::Zero),
            Err(FleetError::UnknownAirport(9))
        );
        let pose = Pose::new(Point3::default(), 0.0, 0.0, 0.0, 0.0);
        assert_eq!(fleet.tick(3, &pose), Err(FleetError::UnknownDrone(3)));
    }

    #[test]
    fn test_second_package_at_waiting_gate_is_refused() {
        let mut fleet = coordinator();
        fleet.define_drone(0, Gate::Zero).unwrap();
        fleet.deliver_package(0, Gate::Zero, 1, Gate::One).unwrap();
        assert_eq!(
            fleet.deliver_package(0, Gate::Zero, 1, Gate::Zero),
            Err(FleetError::PackageWaiting { airport: 0, gate: Gate::Zero })
        );
        // 反対側のゲートは別扱い
        assert_eq!(fleet.deliver_package(0, Gate::One, 1, Gate::Zero), Ok(1));

        // 積み込み後は同じゲートに次の依頼を出せる
        fleet.step(&parked_poses(&fleet, 0.0)).unwrap();
        fleet.step(&parked_poses(&fleet, 0.1)).unwrap();
        assert!(fleet.packages()[0].picked_up);
        assert_eq!(fleet.deliver_package(0, Gate::Zero, 1, Gate::One), Ok(2));
    }

    /// 空港を離れて巡航中の機体に仕立てる
    fn cruising(fleet: &mut FleetCoordinator, drone: usize, target_height: f64) {
        fleet.schedulers[0].release(drone);
        fleet.supervisors[drone] = Supervisor::Fleet;
        fleet.drones[drone].apply([
            DroneDirective::AddTargetAirport(1, Gate::Zero),
            DroneDirective::AppendTargets(vec![
                Point3::new(15000.0, target_height, 0.0),
                Point3::new(19000.0, 40.0, 0.0),
            ]),
        ]);
    }

    #[test]
    fn test_traffic_raise_and_restore() {
        let mut fleet = coordinator();
        fleet.define_drone(0, Gate::Zero).unwrap();
        fleet.define_drone(0, Gate::One).unwrap();
        cruising(&mut fleet, 0, 100.0);
        cruising(&mut fleet, 1, 100.0);
        let east = -FRAC_PI_2;

        let close = [
            Pose::new(Point3::new(5000.0, 100.0, 0.0), east, 0.0, 0.0, 1.0),
            Pose::new(Point3::new(5000.0, 100.0, 300.0), east, 0.0, 0.0, 1.0),
        ];
        fleet.step(&close).unwrap();
        assert!(fleet.drones()[0].altitude_raise().is_none());
        assert_eq!(fleet.drones()[1].first_target_height(), 130.0);

        let apart = [
            Pose::new(Point3::new(5000.0, 100.0, 0.0), east, 0.0, 0.0, 2.0),
            Pose::new(Point3::new(5000.0, 100.0, 3000.0), east, 0.0, 0.0, 2.0),
        ];
        fleet.step(&apart).unwrap();
        assert!(fleet.drones()[1].altitude_raise().is_none());
        assert_eq!(fleet.drones()[1].first_target_height(), 100.0);
        assert_eq!(fleet.stats().traffic_raises, 1);
    }

    #[test]
    fn test_overflight_raise_over_other_airport() {
        let mut fleet = coordinator();
        fleet.define_airport(Point2::new(10000.0, 0.0), Point2::new(-1.0, 0.0));
        fleet.define_drone(0, Gate::Zero).unwrap();
        cruising(&mut fleet, 0, 50.0);

        let east = -FRAC_PI_2;
        fleet
            .step(&[Pose::new(Point3::new(8500.0, 60.0, 0.0), east, 0.0, 0.0, 1.0)])
            .unwrap();
        let raise = fleet.drones()[0].altitude_raise();
        assert_eq!(raise.map(|r| r.cause), Some(RaiseCause::Overflight(2)));
        assert_eq!(fleet.drones()[0].first_target_height(), 100.0);

        // 通過後は元の高度へ
        fleet
            .step(&[Pose::new(Point3::new(10500.0, 100.0, 0.0), east, 0.0, 0.0, 2.0)])
            .unwrap();
        assert!(fleet.drones()[0].altitude_raise().is_none());
        assert_eq!(fleet.drones()[0].first_target_height(), 50.0);
    }

    #[test]
    fn test_handover_near_destination() {
        let mut fleet = coordinator();
        fleet.define_drone(0, Gate::Zero).unwrap();
        cruising(&mut fleet, 0, 100.0);

        let east = -FRAC_PI_2;
        fleet
            .step(&[Pose::new(Point3::new(18500.0, 100.0, 0.0), east, 0.0, 0.0, 1.0)])
            .unwrap();
        assert_eq!(fleet.supervisor(0), Some(Supervisor::Airport(1)));
        assert!(fleet.scheduler(1).is_some_and(|s| s.is_active(0)));
        assert_eq!(fleet.scheduler(1).and_then(|s| s.gate_occupant(Gate::Zero)), Some(0));
    }

    #[test]
    fn test_naive_policy_picks_package_at_own_gate() {
        let mut fleet = FleetCoordinator::new(FleetConfig {
            policy: SchedulingPolicy::Naive,
            ..FleetConfig::default()
        });
        fleet.define_airport(Point2::new(0.0, 0.0), Point2::new(-1.0, 0.0));
        fleet.define_airport(Point2::new(20000.0, 0.0), Point2::new(-1.0, 0.0));
        fleet.define_drone(0, Gate::Zero).unwrap();
        fleet.deliver_package(1, Gate::Zero, 0, Gate::One).unwrap();
        fleet.deliver_package(0, Gate::Zero, 1, Gate::One).unwrap();

        fleet.step(&parked_poses(&fleet, 0.0)).unwrap();
        assert_eq!(fleet.drones()[0].assigned_package(), Some(1));
    }
}
