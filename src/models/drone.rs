//! # Drone モジュール
//!
//! 1 機の自動操縦エージェントを提供します。
//!
//! エージェントは自分のウェイポイント列と飛行段階を所有し、毎ティック
//! 姿勢を観測して段階を選び、対応する運動プリミティブで指令を生成します。
//! 空港スケジューラやフリート調整器はキューを直接書き換えず、
//! [`DroneDirective`] を渡してエージェント自身に適用させます。
//!
//! ## 段階選択
//!
//! 1. ウェイポイントなし、または自由走行フラグ → `Free`
//! 2. 地上目標・低高度・低速 → `Taxi`
//! 3. 最後の目標または地上目標 → 高速で空中なら `Land`、それ以外は `Taxi`
//! 4. 高度 30 m 以下 → `TakeOff`
//! 5. 待機フラグ → `WaitingToLand`
//! 6. Dubins フラグ → `Fly`、それ以外 → `FlyDirect`

use crate::models::airport::Gate;
use crate::models::common::{Point3, Pose};
use crate::models::primitives::{is_reached, Motion};
use crate::models::stage::{FlightCommand, FlightMode, FlightStage};
use crate::models::traits::IPilot;
use std::collections::VecDeque;
use std::f64::consts::PI;
use tracing::{debug, info};

/// 空中目標の到達判定半径 (m)
pub const WIDE_REACH_RADIUS: f64 = 55.0;
/// 地上目標の到達判定半径 (m)
pub const NARROW_REACH_RADIUS: f64 = 40.0;
/// 離陸段階を抜ける高度 (m)
pub const TAKE_OFF_HEIGHT: f64 = 30.0;
/// 地上とみなす高度 (m)
pub const GROUND_ALTITUDE: f64 = 5.0;
/// 最後の地上目標の手前で停止指令を出す距離 (m)
pub const TAXI_STOP_RADIUS: f64 = 30.0;
/// 停止とみなす速度 (m/s)
const STOP_SPEED: f64 = 1.0;
/// 観測間隔が得られないときの Δt (s)
const DEFAULT_DT: f64 = 0.017;
/// 高度による地上目標の到達判定の打ち切り (m)
const GROUND_TARGET_CEILING: f64 = 10.0;
/// 一時上昇量 (m)
pub const RAISE_STEP: f64 = 30.0;

/// エージェントへの指示
///
/// スケジューラが返し、エージェントが順番に適用する。
#[derive(Debug, Clone, PartialEq)]
pub enum DroneDirective {
    ClearTargets,
    AppendTargets(Vec<Point3>),
    PushFrontTarget(Point3),
    SetFirstTargetHeight(f64),
    SetFreeEnabled(bool),
    SetStackEnabled(bool),
    SetDubinsEnabled(bool),
    SetSpeedFactor(f64),
    AddTargetAirport(usize, Gate),
    RemoveFirstTargetAirport,
}

/// 一時上昇の理由
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RaiseCause {
    /// 自由空域での接近回避
    Traffic,
    /// 目的地以外の空港上空の通過
    Overflight(usize),
}

/// 一時上昇の記録
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AltitudeRaise {
    pub restore_height: f64,
    pub cause: RaiseCause,
}

/// 自動操縦エージェント
#[derive(Debug, Clone)]
pub struct DroneAgent {
    pub id: usize,
    targets: VecDeque<Point3>,
    target_airports: VecDeque<(usize, Gate)>,
    free_enabled: bool,
    stack_enabled: bool,
    dubins_enabled: bool,
    speed_factor: f64,
    mode: FlightMode,

    // observeで更新
    location: Point3,
    heading: f64,
    speed: f64,
    last_elapsed: Option<f64>,
    dt: f64,

    assigned_package: Option<usize>,
    carrying: bool,
    altitude_raise: Option<AltitudeRaise>,
}

impl DroneAgent {
    /// 新しいエージェントを作成
    ///
    /// # 引数
    ///
    /// * `id` - 機体番号
    /// * `location` - 初期位置
    /// * `heading` - 初期方位
    pub fn new(id: usize, location: Point3, heading: f64) -> Self {
        Self {
            id,
            targets: VecDeque::new(),
            target_airports: VecDeque::new(),
            free_enabled: false,
            stack_enabled: false,
            dubins_enabled: true,
            speed_factor: 1.0,
            mode: FlightMode::Free,
            location,
            heading,
            speed: 0.0,
            last_elapsed: None,
            dt: DEFAULT_DT,
            assigned_package: None,
            carrying: false,
            altitude_raise: None,
        }
    }

    pub fn location(&self) -> Point3 {
        self.location
    }

    pub fn heading(&self) -> f64 {
        self.heading
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    pub fn stage(&self) -> FlightStage {
        self.mode.stage()
    }

    pub fn targets(&self) -> impl Iterator<Item = &Point3> {
        self.targets.iter()
    }

    pub fn target_count(&self) -> usize {
        self.targets.len()
    }

    pub fn first_target(&self) -> Option<Point3> {
        self.targets.front().copied()
    }

    /// 先頭目標の高度（目標なしは -1）
    pub fn first_target_height(&self) -> f64 {
        self.targets.front().map_or(-1.0, |t| t.y)
    }

    pub fn first_target_airport(&self) -> Option<(usize, Gate)> {
        self.target_airports.front().copied()
    }

    pub fn has_target_airport(&self) -> bool {
        !self.target_airports.is_empty()
    }

    pub fn free_enabled(&self) -> bool {
        self.free_enabled
    }

    pub fn stack_enabled(&self) -> bool {
        self.stack_enabled
    }

    pub fn dubins_enabled(&self) -> bool {
        self.dubins_enabled
    }

    pub fn speed_factor(&self) -> f64 {
        self.speed_factor
    }

    pub fn assigned_package(&self) -> Option<usize> {
        self.assigned_package
    }

    pub fn is_carrying(&self) -> bool {
        self.carrying
    }

    pub fn altitude_raise(&self) -> Option<AltitudeRaise> {
        self.altitude_raise
    }

    /// 停止しているか（速度 1 m/s 未満）
    pub fn is_stationary(&self) -> bool {
        self.speed < 1.0
    }

    /// 待機中か（目標・目的地・荷物なし）
    pub fn is_idle(&self) -> bool {
        self.targets.is_empty() && self.target_airports.is_empty() && self.assigned_package.is_none() && !self.carrying
    }

    /// 荷物の予約
    pub fn assign_package(&mut self, package: usize) {
        self.assigned_package = Some(package);
    }

    pub fn clear_package(&mut self) {
        self.assigned_package = None;
        self.carrying = false;
    }

    /// 荷物の積み込み
    pub fn pick_up(&mut self, package: usize) {
        self.assigned_package = Some(package);
        self.carrying = true;
    }

    /// 指示を順番に適用
    pub fn apply<I>(&mut self, directives: I)
    where
        I: IntoIterator<Item = DroneDirective>,
    {
        for directive in directives {
            self.apply_one(directive);
        }
    }

    fn apply_one(&mut self, directive: DroneDirective) {
        match directive {
            DroneDirective::ClearTargets => {
                self.targets.clear();
                self.altitude_raise = None;
            }
            DroneDirective::AppendTargets(points) => self.targets.extend(points),
            DroneDirective::PushFrontTarget(point) => self.targets.push_front(point),
            DroneDirective::SetFirstTargetHeight(height) => self.set_first_target_height(height),
            DroneDirective::SetFreeEnabled(enabled) => self.free_enabled = enabled,
            DroneDirective::SetStackEnabled(enabled) => self.stack_enabled = enabled,
            DroneDirective::SetDubinsEnabled(enabled) => self.dubins_enabled = enabled,
            DroneDirective::SetSpeedFactor(factor) => self.speed_factor = factor,
            DroneDirective::AddTargetAirport(airport, gate) => self.target_airports.push_back((airport, gate)),
            DroneDirective::RemoveFirstTargetAirport => {
                self.target_airports.pop_front();
            }
        }
    }

    /// 先頭目標の高度を変更（空中目標のみ）
    pub fn set_first_target_height(&mut self, height: f64) {
        if let Some(head) = self.targets.front_mut() {
            if head.y > 0.0 {
                head.y = height;
            }
        }
    }

    /// 接近回避のための一時上昇（未上昇時のみ）
    pub fn raise_for_traffic(&mut self) -> bool {
        self.raise_to(self.first_target_height() + RAISE_STEP, RaiseCause::Traffic)
    }

    /// 空港上空通過のための一時上昇
    pub fn raise_for_overflight(&mut self, airport: usize, height: f64) -> bool {
        self.raise_to(height, RaiseCause::Overflight(airport))
    }

    fn raise_to(&mut self, height: f64, cause: RaiseCause) -> bool {
        if self.altitude_raise.is_some() {
            return false;
        }
        let Some(head) = self.targets.front() else {
            return false;
        };
        if head.y <= 0.0 {
            return false;
        }
        self.altitude_raise = Some(AltitudeRaise { restore_height: head.y, cause });
        self.set_first_target_height(height.max(head.y));
        debug!(drone = self.id, ?cause, height, "DRONE_RAISED: 目標高度を一時的に上げました");
        true
    }

    /// 一時上昇を元に戻す
    pub fn restore_altitude(&mut self) -> bool {
        let Some(raise) = self.altitude_raise.take() else {
            return false;
        };
        self.set_first_target_height(raise.restore_height);
        debug!(drone = self.id, height = raise.restore_height, "DRONE_RESTORED: 目標高度を元に戻しました");
        true
    }

    /// 段階を選択（純粋関数）
    ///
    /// # 戻り値
    ///
    /// (段階, 速度倍率)
    pub fn select_stage(&self, altitude: f64) -> (FlightStage, f64) {
        let Some(head) = self.targets.front() else {
            return (FlightStage::Free, 0.0);
        };
        if self.free_enabled {
            return (FlightStage::Free, 0.0);
        }
        let speed_sq = self.speed * self.speed;
        let single = self.targets.len() == 1;

        if head.y < 0.0 && altitude < GROUND_ALTITUDE && speed_sq < 300.0 {
            let factor = if single { self.approach_factor(head) } else { 1.0 };
            return (FlightStage::Taxi, factor);
        }
        if single || head.y < 0.0 {
            if altitude > GROUND_ALTITUDE && speed_sq > 400.0 {
                return (FlightStage::Land, 1.0);
            }
            return (FlightStage::Taxi, self.approach_factor(head));
        }
        if altitude <= TAKE_OFF_HEIGHT {
            return (FlightStage::TakeOff, 1.0);
        }
        if self.stack_enabled {
            return (FlightStage::WaitingToLand, self.speed_factor);
        }
        if self.dubins_enabled {
            (FlightStage::Fly, self.speed_factor)
        } else {
            (FlightStage::FlyDirect, self.speed_factor)
        }
    }

    /// 目標手前 100 m から減速し、停止半径内では停止させる速度倍率
    fn approach_factor(&self, head: &Point3) -> f64 {
        let distance = self.location.distance_horizontal(head);
        if distance < TAXI_STOP_RADIUS {
            0.0
        } else {
            (distance / 100.0).min(1.0)
        }
    }

    /// 先頭目標に到達したか
    fn head_reached(&self, pose: &Pose) -> bool {
        let Some(head) = self.targets.front() else {
            return false;
        };
        if head.is_ground_point() && pose.altitude() > GROUND_TARGET_CEILING {
            return false;
        }
        if !head.is_ground_point() {
            return is_reached(&pose.position, pose.heading, head, WIDE_REACH_RADIUS);
        }
        if self.targets.len() == 1 {
            // 最後の地上目標は停止して初めて到達
            return self.speed < STOP_SPEED && pose.position.distance_horizontal(head) < NARROW_REACH_RADIUS;
        }
        is_reached(&pose.position, pose.heading, head, NARROW_REACH_RADIUS)
    }
}

impl IPilot for DroneAgent {
    fn observe(&mut self, pose: &Pose) {
        let elapsed = self.last_elapsed.map(|prev| pose.elapsed - prev);
        match elapsed {
            Some(dt) if dt > 0.0 => {
                self.speed = self.location.distance_3d(&pose.position) / dt;
                self.dt = dt;
            }
            _ => self.dt = DEFAULT_DT,
        }
        self.location = pose.position;
        self.heading = pose.heading;
        self.last_elapsed = Some(pose.elapsed);
    }

    fn command(&mut self, pose: &Pose) -> FlightCommand {
        if self.head_reached(pose) {
            if let Some(reached) = self.targets.pop_front() {
                debug!(drone = self.id, target = ?reached, remaining = self.targets.len(), "DRONE_TARGET_REACHED: 目標に到達しました");
                // 一時上昇は到達した目標とともに破棄
                self.altitude_raise = None;
            }
        }

        let (stage, speed_factor) = self.select_stage(pose.altitude());
        if stage != self.mode.stage() {
            info!(drone = self.id, from = ?self.mode.stage(), to = ?stage, "DRONE_STAGE_CHANGE: 飛行段階が切り替わりました");
            self.mode = FlightMode::enter(stage);
        }

        let dt = self.dt;
        let targets: &[Point3] = self.targets.make_contiguous();
        let motion = match (&mut self.mode, targets.first()) {
            (FlightMode::TakeOff, _) => {
                let pitch = if pose.altitude() < 10.0 { PI / 36.0 } else { PI / 18.0 };
                Motion::new(pitch, pose.heading)
            }
            (FlightMode::Fly { dubins, fallback }, Some(head)) => {
                if targets.len() >= 2 && head.y > 0.0 {
                    dubins.compute(targets, pose, dt)
                } else {
                    fallback.compute(head, pose, dt)
                }
            }
            (FlightMode::FlyDirect(tracker), Some(head))
            | (FlightMode::Land(tracker), Some(head))
            | (FlightMode::Taxi(tracker), Some(head)) => tracker.compute(head, pose, dt),
            (FlightMode::WaitingToLand(stack), Some(center)) => stack.compute(center, pose, dt),
            _ => Motion::new(0.0, pose.heading),
        };

        FlightCommand::new(motion.pitch, motion.heading, speed_factor, stage)
    }

    fn get_id(&self) -> usize {
        self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamics::{DynamicsConfig, KinematicModel};
    use crate::models::traits::IFlightDynamics;

    fn pose(x: f64, y: f64, z: f64, heading: f64, elapsed: f64) -> Pose {
        Pose::new(Point3::new(x, y, z), heading, 0.0, 0.0, elapsed)
    }

    /// 速度を持たせるため 2 回観測する
    fn moving_drone(y: f64, speed: f64) -> DroneAgent {
        let mut drone = DroneAgent::new(0, Point3::new(0.0, y, 0.0), 0.0);
        drone.observe(&pose(0.0, y, 0.0, 0.0, 0.0));
        drone.observe(&pose(0.0, y, -speed, 0.0, 1.0));
        drone
    }

    #[test]
    fn test_empty_queue_is_free_with_level_pitch() {
        let mut drone = DroneAgent::new(0, Point3::new(10.0, 4.0, 10.0), 0.8);
        let p = Pose::new(Point3::new(10.0, 4.0, 10.0), 0.8, 0.05, 0.0, 0.0);
        drone.observe(&p);
        let command = drone.command(&p);
        assert_eq!(command.stage, FlightStage::Free);
        assert_eq!(command.pitch, 0.0);
        assert_eq!(command.heading, 0.8);
        assert_eq!(command.speed_factor, 0.0);
    }

    #[test]
    fn test_free_flag_overrides_targets() {
        let mut drone = moving_drone(0.0, 0.0);
        drone.apply([
            DroneDirective::AppendTargets(vec![Point3::new(0.0, -1.0, -500.0)]),
            DroneDirective::SetFreeEnabled(true),
        ]);
        assert_eq!(drone.select_stage(0.0).0, FlightStage::Free);
    }

    #[test]
    fn test_stage_selection() {
        let ground = Point3::new(0.0, -1.0, -500.0);
        let air = Point3::new(0.0, 100.0, -3000.0);

        let mut slow = moving_drone(0.0, 5.0);
        slow.apply([DroneDirective::AppendTargets(vec![ground, ground])]);
        assert_eq!(slow.select_stage(0.0).0, FlightStage::Taxi);

        let mut fast = moving_drone(40.0, 60.0);
        fast.apply([DroneDirective::AppendTargets(vec![ground])]);
        assert_eq!(fast.select_stage(40.0).0, FlightStage::Land);

        let mut climbing = moving_drone(10.0, 40.0);
        climbing.apply([DroneDirective::AppendTargets(vec![air, air])]);
        assert_eq!(climbing.select_stage(10.0).0, FlightStage::TakeOff);
        assert_eq!(climbing.select_stage(80.0).0, FlightStage::Fly);

        climbing.apply([DroneDirective::SetDubinsEnabled(false)]);
        assert_eq!(climbing.select_stage(80.0).0, FlightStage::FlyDirect);

        climbing.apply([DroneDirective::SetStackEnabled(true), DroneDirective::SetSpeedFactor(1.1)]);
        assert_eq!(climbing.select_stage(80.0), (FlightStage::WaitingToLand, 1.1));
    }

    #[test]
    fn test_taxi_speed_shaping_for_last_target() {
        let mut drone = moving_drone(0.0, 2.0);
        let location = drone.location();
        drone.apply([DroneDirective::AppendTargets(vec![Point3::new(location.x, -1.0, location.z - 50.0)])]);
        let (stage, factor) = drone.select_stage(0.0);
        assert_eq!(stage, FlightStage::Taxi);
        assert!(factor > 0.49 && factor < 0.51);
    }

    #[test]
    fn test_last_ground_target_commands_stop_inside_stop_radius() {
        let mut drone = moving_drone(0.0, 3.0);
        let location = drone.location();
        let gate = Point3::new(location.x, -1.0, location.z - 20.0);
        drone.apply([DroneDirective::AppendTargets(vec![gate])]);
        assert_eq!(drone.select_stage(0.0), (FlightStage::Taxi, 0.0));

        // 停止するまでは到達としない
        drone.command(&pose(location.x, 0.0, location.z, 0.0, 2.0));
        assert_eq!(drone.target_count(), 1);
        drone.observe(&pose(location.x, 0.0, location.z, 0.0, 3.0));
        drone.command(&pose(location.x, 0.0, location.z, 0.0, 3.0));
        assert_eq!(drone.target_count(), 0);
    }

    #[test]
    fn test_taxi_to_gate_comes_to_rest() {
        let start = Point3::new(0.0, 0.0, 0.0);
        let gate = Point3::new(0.0, -1.0, -200.0);
        let mut model = KinematicModel::new(DynamicsConfig::default(), Pose::new(start, 0.0, 0.0, 0.0, 0.0), 0.0);
        let mut drone = DroneAgent::new(0, start, 0.0);
        drone.apply([DroneDirective::AppendTargets(vec![gate])]);

        let mut reached_at = None;
        for step in 0..2000 {
            let p = model.pose();
            drone.observe(&p);
            let command = drone.command(&p);
            if drone.target_count() == 0 {
                reached_at = Some(step);
                break;
            }
            model.step(&command, 0.05);
        }

        assert!(reached_at.is_some(), "gate never reached");
        let distance = model.pose().position.distance_horizontal(&gate);
        assert!(distance < NARROW_REACH_RADIUS, "stopped {} m from gate", distance);
        assert!(model.speed() < STOP_SPEED);
        assert!(drone.is_stationary());
    }

    #[test]
    fn test_air_target_popped_within_wide_radius() {
        let mut drone = moving_drone(100.0, 60.0);
        let location = drone.location();
        drone.apply([DroneDirective::AppendTargets(vec![
            Point3::new(location.x, 100.0, location.z - 50.0),
            Point3::new(location.x, 100.0, location.z - 3000.0),
        ])]);
        let p = pose(location.x, 100.0, location.z, 0.0, 2.0);
        drone.command(&p);
        assert_eq!(drone.target_count(), 1);
    }

    #[test]
    fn test_ground_target_not_reached_from_altitude() {
        let mut drone = moving_drone(50.0, 60.0);
        let location = drone.location();
        drone.apply([DroneDirective::AppendTargets(vec![
            Point3::new(location.x, -1.0, location.z - 10.0),
            Point3::new(location.x, -1.0, location.z - 300.0),
        ])]);
        drone.command(&pose(location.x, 50.0, location.z, 0.0, 2.0));
        assert_eq!(drone.target_count(), 2);
    }

    #[test]
    fn test_first_target_height_only_changes_air_points() {
        let mut drone = DroneAgent::new(0, Point3::default(), 0.0);
        drone.apply([DroneDirective::AppendTargets(vec![Point3::new(0.0, -1.0, 0.0)])]);
        drone.set_first_target_height(70.0);
        assert_eq!(drone.first_target_height(), -1.0);

        drone.apply([DroneDirective::PushFrontTarget(Point3::new(0.0, 40.0, 0.0))]);
        drone.set_first_target_height(70.0);
        assert_eq!(drone.first_target_height(), 70.0);
    }

    #[test]
    fn test_traffic_raise_is_applied_once_and_restored() {
        let mut drone = DroneAgent::new(0, Point3::default(), 0.0);
        drone.apply([DroneDirective::AppendTargets(vec![Point3::new(0.0, 100.0, -5000.0)])]);
        assert!(drone.raise_for_traffic());
        assert!(!drone.raise_for_traffic());
        assert_eq!(drone.first_target_height(), 130.0);
        assert!(drone.restore_altitude());
        assert_eq!(drone.first_target_height(), 100.0);
        assert!(drone.altitude_raise().is_none());
    }

    #[test]
    fn test_observe_falls_back_to_default_dt() {
        let mut drone = DroneAgent::new(0, Point3::default(), 0.0);
        drone.observe(&pose(0.0, 0.0, 0.0, 0.0, 3.0));
        drone.observe(&pose(0.0, 0.0, 0.0, 0.0, 3.0));
        assert_eq!(drone.dt(), DEFAULT_DT);
        drone.observe(&pose(0.0, 0.0, -2.0, 0.0, 3.5));
        assert!((drone.dt() - 0.5).abs() < 1e-12);
        assert!((drone.speed() - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_take_off_pitch_schedule() {
        let mut drone = moving_drone(3.0, 40.0);
        let location = drone.location();
        drone.apply([DroneDirective::AppendTargets(vec![
            Point3::new(0.0, 100.0, -5000.0),
            Point3::new(0.0, 100.0, -9000.0),
        ])]);
        let low = drone.command(&Pose::new(location, 0.3, 0.0, 0.0, 2.0));
        assert_eq!(low.stage, FlightStage::TakeOff);
        assert!((low.pitch - PI / 36.0).abs() < 1e-12);
        assert_eq!(low.heading, 0.3);
        let high = drone.command(&Pose::new(location.with_height(20.0), 0.3, 0.0, 0.0, 2.1));
        assert!((high.pitch - PI / 18.0).abs() < 1e-12);
    }
}
