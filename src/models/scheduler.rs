//! # Scheduler モジュール
//!
//! 空港ごとの資源スケジューラを提供します。
//!
//! スケジューラはゲート・レーンの占有、待機旋回 (stack) の順番待ち、
//! 低空域 (離着陸中の機体) の集合、担当機体の集合を排他的に所有します。
//! 機体のウェイポイント列には触れず、[`DroneDirective`] の列を返します。
//!
//! ## 機体の分類
//!
//! - **待機 (resting)**: 目的地なし。他機のためにゲートを空ける必要があれば移動・出発
//! - **出発 (departing)**: 目的地が他空港。レーンが空けば離陸、十分離れたらフリートへ返却
//! - **到着 (arriving)**: 目的地がこの空港。ゲートとレーンが空いていれば着陸、なければ待機旋回
//!
//! 占有状態は変更直前に毎回再確認する（単一スレッドのティック処理）。

use crate::models::airport::{Airport, Gate};
use crate::models::common::{math_utils, Point3, Pose};
use crate::models::drone::{DroneAgent, DroneDirective};
use crate::models::primitives::stack::STACK_RADIUS;
use std::f64::consts::{FRAC_PI_2, PI};
use tracing::{debug, info};

/// 待機旋回円から外れたとみなす距離 (m)
pub const MAX_STACK_FAULT: f64 = 40.0;
/// 待機旋回の最低高度 (m)
pub const STACK_BOTTOM: f64 = 70.0;
/// 待機旋回の高度間隔 (m)
pub const LEVEL_HEIGHT: f64 = 30.0;
/// 巡航高度 (m)
pub const DEFAULT_FLY_HEIGHT: f64 = 100.0;
/// 待機旋回中の前後間隔 (m)
pub const SPACE_BETWEEN: f64 = 100.0;
/// 待機旋回で間隔を空けるときの速度倍率
pub const GAP_SPEED_FACTOR: f64 = 1.1;
/// 着陸許可を出す方位誤差
const LANDING_HEADING_TOLERANCE: f64 = PI / 180.0;
/// 着陸経路に乗っているとみなす先頭目標高度 (m)
const LANDING_TRACK_HEIGHT: f64 = 45.0;
/// 出発機をフリートへ返却する距離 (m)
const RELEASE_DISTANCE: f64 = 1000.0;
/// 出発機がレーンを解放する距離 (m)
const LANE_CLEAR_DISTANCE: f64 = 500.0;
/// 待機円へ向かう他機との高度差を確保する範囲 (m)
const CONVERGING_RANGE: f64 = 300.0;

/// 他空港の状況（スケジューラ呼び出し前のスナップショット）
#[derive(Debug, Clone, PartialEq)]
pub struct AirportStatus {
    pub airport: Airport,
    pub active_count: usize,
    pub gate_free: [bool; 2],
    pub stack_height: f64,
}

/// スケジューラから見たフリート全体（読み取り専用）
#[derive(Debug, Clone, Copy)]
pub struct FleetView<'a> {
    pub drones: &'a [DroneAgent],
    pub airports: &'a [AirportStatus],
}

/// スケジューラの判断結果
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Outcome {
    pub directives: Vec<DroneDirective>,
    /// フリート監視へ戻す
    pub released: bool,
}

/// 空港資源スケジューラ
#[derive(Debug, Clone)]
pub struct AirportScheduler {
    airport: Airport,
    gate_occupant: [Option<usize>; 2],
    lane_occupant: [Option<usize>; 2],
    stack: Vec<usize>,
    lower_airspace: Vec<usize>,
    active: Vec<usize>,
}

impl AirportScheduler {
    pub fn new(airport: Airport) -> Self {
        Self {
            airport,
            gate_occupant: [None; 2],
            lane_occupant: [None; 2],
            stack: Vec::new(),
            lower_airspace: Vec::new(),
            active: Vec::new(),
        }
    }

    pub fn airport(&self) -> &Airport {
        &self.airport
    }

    pub fn id(&self) -> usize {
        self.airport.id
    }

    pub fn gate_occupant(&self, gate: Gate) -> Option<usize> {
        self.gate_occupant[gate.index()]
    }

    pub fn lane_occupant(&self, lane: Gate) -> Option<usize> {
        self.lane_occupant[lane.index()]
    }

    pub fn stack(&self) -> &[usize] {
        &self.stack
    }

    pub fn lower_airspace(&self) -> &[usize] {
        &self.lower_airspace
    }

    pub fn active(&self) -> &[usize] {
        &self.active
    }

    pub fn is_active(&self, drone: usize) -> bool {
        self.active.contains(&drone)
    }

    /// 他空港向けの状況スナップショット
    pub fn status(&self, drones: &[DroneAgent]) -> AirportStatus {
        AirportStatus {
            airport: self.airport.clone(),
            active_count: self.active.len(),
            gate_free: [self.gate_occupant[0].is_none(), self.gate_occupant[1].is_none()],
            stack_height: self.stack_height(drones),
        }
    }

    /// ゲートに駐機した状態で機体を登録
    ///
    /// # 戻り値
    ///
    /// ゲートが空いていれば true
    pub fn place_at_gate(&mut self, drone: usize, gate: Gate) -> bool {
        if self.gate_occupant[gate.index()].is_some() {
            return false;
        }
        self.gate_occupant[gate.index()] = Some(drone);
        self.register(drone);
        true
    }

    /// 機体を担当に加える
    pub fn register(&mut self, drone: usize) {
        if !self.active.contains(&drone) {
            debug!(airport = self.airport.id, drone, "AIRPORT_REGISTER: 機体を担当に加えました");
            self.active.push(drone);
        }
    }

    /// 機体を担当から外し、保持していた資源をすべて解放する
    pub fn release(&mut self, drone: usize) {
        self.free_gates_of(drone);
        self.free_lanes_of(drone);
        self.active.retain(|d| *d != drone);
        self.stack.retain(|d| *d != drone);
        self.lower_airspace.retain(|d| *d != drone);
    }

    /// 待機旋回に入る高度
    ///
    /// 旋回円上の最上位機 (最低でも 70) + 30。空なら 70。
    pub fn stack_height(&self, drones: &[DroneAgent]) -> f64 {
        let highest = self
            .stack
            .iter()
            .filter_map(|id| drones.get(*id))
            .filter(|d| self.is_on_ring(&d.location()))
            .map(|d| d.location().y)
            .fold(None, |acc: Option<f64>, y| Some(acc.map_or(y, |a| a.max(y))));
        match highest {
            Some(y) => y.max(STACK_BOTTOM) + LEVEL_HEIGHT,
            None if self.stack.is_empty() => STACK_BOTTOM,
            None => STACK_BOTTOM + LEVEL_HEIGHT,
        }
    }

    fn is_on_ring(&self, position: &Point3) -> bool {
        (self.airport.distance_to(position) - STACK_RADIUS).abs() <= MAX_STACK_FAULT
    }

    /// 1機分の判断
    ///
    /// # 引数
    ///
    /// * `drone` - 機体番号
    /// * `pose` - 今ティックの姿勢
    /// * `view` - フリートの読み取り専用ビュー
    ///
    /// # 戻り値
    ///
    /// 機体に適用する指示と、フリートへ返却するかどうか
    pub fn handle(&mut self, drone: usize, pose: &Pose, view: &FleetView) -> Outcome {
        let mut out = Outcome::default();
        let Some(agent) = view.drones.get(drone) else {
            return out;
        };
        self.register(drone);

        match agent.first_target_airport() {
            None => self.handle_resting(drone, agent, view, &mut out),
            Some((airport, gate)) if airport != self.airport.id => {
                self.handle_departing(drone, agent, (airport, gate), view, &mut out)
            }
            Some((_, gate)) => self.handle_arriving(drone, agent, gate, pose, view, &mut out),
        }
        out
    }

    fn handle_resting(&mut self, drone: usize, agent: &DroneAgent, view: &FleetView, out: &mut Outcome) {
        if agent.target_count() == 0 {
            out.directives.push(DroneDirective::SetFreeEnabled(true));
        }
        let location = agent.location();
        let Some(gate) = self.gate_held_by(drone) else {
            return;
        };
        if location.distance_horizontal(&self.airport.gate(gate)) < SPACE_BETWEEN {
            self.free_lanes_of(drone);
        }
        if self.stack.is_empty() || agent.target_count() > 0 {
            return;
        }

        let mut wanted = [false; 2];
        for other in &self.stack {
            if let Some((airport, g)) = view.drones.get(*other).and_then(|d| d.first_target_airport()) {
                if airport == self.airport.id {
                    wanted[g.index()] = true;
                }
            }
        }
        let other_gate = gate.other();
        if self.gate_occupant[other_gate.index()].is_some_and(|d| d != drone) {
            wanted[other_gate.index()] = true;
        }

        if wanted[gate.index()] && wanted[other_gate.index()] {
            let Some((destination, dest_gate)) = self.best_other_airport(view) else {
                return;
            };
            info!(
                airport = self.airport.id,
                drone,
                destination,
                "AIRPORT_EVICT: 両ゲートが必要なため待機機を他空港へ移動させます"
            );
            out.directives.push(DroneDirective::AddTargetAirport(destination, dest_gate));
            if self.lane_is_free(gate.other(), drone) && self.lower_airspace.is_empty() {
                if let Some(status) = view.airports.get(destination) {
                    self.take_off(drone, gate, &status.airport, dest_gate, out);
                }
            }
        } else if wanted[gate.index()]
            && self.gate_occupant[other_gate.index()].is_none()
            && self.lane_occupant[other_gate.index()].is_none()
        {
            self.taxi_to_other_gate(drone, gate, out);
        }
    }

    fn handle_departing(
        &mut self,
        drone: usize,
        agent: &DroneAgent,
        (destination, dest_gate): (usize, Gate),
        view: &FleetView,
        out: &mut Outcome,
    ) {
        let location = agent.location();
        if let Some(gate) = self.gate_held_by(drone).filter(|g| self.airport.in_gate(*g, &location)) {
            let lower_busy = self.lower_airspace.iter().any(|d| *d != drone);
            let lane = gate.other();
            if !lower_busy && self.lane_is_free(lane, drone) {
                match view.airports.get(destination) {
                    Some(status) => self.take_off(drone, gate, &status.airport, dest_gate, out),
                    None => out.directives.push(DroneDirective::ClearTargets),
                }
            } else {
                out.directives.push(DroneDirective::ClearTargets);
            }
            return;
        }

        if location.y > STACK_BOTTOM {
            self.lower_airspace.retain(|d| *d != drone);
        }
        let distance = self.airport.distance_to(&location);
        if distance > LANE_CLEAR_DISTANCE {
            self.free_lanes_of(drone);
        }
        if distance < RELEASE_DISTANCE {
            if agent.first_target_height() > 50.0 {
                out.directives.push(DroneDirective::SetFirstTargetHeight(STACK_BOTTOM));
            }
            return;
        }

        let ahead = self.active.iter().filter(|d| **d != drone).any(|d| {
            view.drones.get(*d).is_some_and(|other| {
                math_utils::heading_delta(agent.heading(), &location, &other.location()).abs() < FRAC_PI_2
            })
        });
        if !ahead {
            info!(airport = self.airport.id, drone, distance, "AIRPORT_RELEASE: 出発機をフリート監視へ戻します");
            self.release(drone);
            out.directives.push(DroneDirective::SetFirstTargetHeight(DEFAULT_FLY_HEIGHT));
            out.released = true;
            return;
        }

        let lowest = self
            .stack
            .iter()
            .filter_map(|d| view.drones.get(*d))
            .map(|d| d.location().y)
            .fold(f64::INFINITY, f64::min);
        let height = if lowest.is_finite() {
            (lowest - LEVEL_HEIGHT).max(STACK_BOTTOM)
        } else {
            DEFAULT_FLY_HEIGHT
        };
        self.free_gates_of(drone);
        self.free_lanes_of(drone);
        out.directives.push(DroneDirective::SetFirstTargetHeight(height));
    }

    fn handle_arriving(
        &mut self,
        drone: usize,
        agent: &DroneAgent,
        gate: Gate,
        pose: &Pose,
        view: &FleetView,
        out: &mut Outcome,
    ) {
        let location = agent.location();

        if agent.target_count() == 0 && self.airport.in_gate(gate, &location) {
            debug!(airport = self.airport.id, drone, ?gate, "AIRPORT_ARRIVED: 目的ゲートに到着しました");
            self.lower_airspace.retain(|d| *d != drone);
            self.free_lanes_of(drone);
            if self.gate_occupant[gate.index()].is_none() {
                self.gate_occupant[gate.index()] = Some(drone);
            }
            out.directives.push(DroneDirective::RemoveFirstTargetAirport);
            return;
        }

        if location.y < 5.0 {
            self.lower_airspace.retain(|d| *d != drone);
            if location.distance_horizontal(&self.airport.gate(gate)) < 150.0 {
                self.free_lanes_of(drone);
            }
            if let Some(current) = self.gate_held_by(drone) {
                if current != gate
                    && self.gate_is_free(gate, drone)
                    && self.lane_occupant[gate.index()].is_none()
                    && agent.target_count() == 0
                {
                    self.taxi_to_other_gate(drone, current, out);
                }
            }
            return;
        }

        let strictly_free =
            self.gate_occupant[gate.index()].is_none() && self.lane_occupant[gate.index()].is_none();
        let only = self.is_only_in_lower_airspace(drone);

        if strictly_free && only {
            if self.stack.is_empty() {
                if agent.first_target_height() > LANDING_TRACK_HEIGHT {
                    self.let_drone_land(drone, gate, out);
                }
                return;
            }
            if !self.stack.contains(&drone) {
                self.stack.push(drone);
            }
            if self.first_in_stack_for_gate(drone, gate, view) && agent.first_target_height() <= LANDING_TRACK_HEIGHT {
                self.stack.retain(|d| *d != drone);
            } else {
                self.handle_in_stack(drone, agent, gate, pose, view, out);
            }
        } else if (!only || !self.gate_is_free(gate, drone)) && location.y > 25.0 {
            self.handle_in_stack(drone, agent, gate, pose, view, out);
        }
    }

    fn handle_in_stack(
        &mut self,
        drone: usize,
        agent: &DroneAgent,
        gate: Gate,
        pose: &Pose,
        view: &FleetView,
        out: &mut Outcome,
    ) {
        if !self.stack.contains(&drone) {
            debug!(airport = self.airport.id, drone, position = self.stack.len(), "AIRPORT_STACK_ENTER: 待機旋回に入ります");
            self.stack.push(drone);
        }
        self.lower_airspace.retain(|d| *d != drone);
        out.directives.push(DroneDirective::SetStackEnabled(true));
        out.directives.push(DroneDirective::SetFreeEnabled(false));

        let center = self.airport.center_at(STACK_BOTTOM);
        let on_center = agent.first_target().is_some_and(|t| t.distance_horizontal(&center) < 1.0);
        if !on_center {
            out.directives.push(DroneDirective::PushFrontTarget(center));
        }

        let location = agent.location();
        let may_land = self.gate_is_free(gate, drone)
            && self.lane_is_free(gate, drone)
            && self.first_in_stack_for_gate(drone, gate, view)
            && self.is_only_in_lower_airspace(drone)
            && self.is_on_ring(&location);
        if may_land {
            let error = math_utils::normalize_angle(pose.heading - self.airport.landing_heading(gate));
            if error.abs() < LANDING_HEADING_TOLERANCE {
                self.let_drone_land(drone, gate, out);
                return;
            }
        }
        self.fly_in_stack(drone, agent, pose, view, out);
    }

    fn fly_in_stack(&self, drone: usize, agent: &DroneAgent, pose: &Pose, view: &FleetView, out: &mut Outcome) {
        let location = agent.location();
        let others: Vec<Point3> = self
            .stack
            .iter()
            .filter(|d| **d != drone)
            .filter_map(|d| view.drones.get(*d))
            .map(|d| d.location())
            .collect();

        if !self.is_on_ring(&location) {
            // 先に並んでいて同じく旋回円へ向かっている機体より上を飛ぶ
            let mut height = self.stack_height(view.drones);
            for other in self.stack.iter().take_while(|d| **d != drone) {
                if let Some(o) = view.drones.get(*other) {
                    let p = o.location();
                    let converging = self.airport.distance_to(&p) > STACK_RADIUS + MAX_STACK_FAULT;
                    if converging && p.distance_horizontal(&location) < CONVERGING_RANGE {
                        height = height.max(p.y + LEVEL_HEIGHT);
                    }
                }
            }
            out.directives.push(DroneDirective::SetFirstTargetHeight(height));
            out.directives.push(DroneDirective::SetSpeedFactor(1.0));
            return;
        }

        let is_behind = |p: &Point3| math_utils::heading_delta(pose.heading, &location, p).abs() > FRAC_PI_2;
        let below = closest_horizontal(&location, others.iter().filter(|p| p.y < location.y + 5.0));
        let factor;
        match below {
            Some(b) if b.distance_horizontal(&location) <= SPACE_BETWEEN => {
                factor = if is_behind(&b) { GAP_SPEED_FACTOR } else { 1.0 };
                let height = if location.y - 5.0 > b.y { b.y + LEVEL_HEIGHT } else { location.y };
                out.directives.push(DroneDirective::SetFirstTargetHeight(height));
            }
            _ => {
                out.directives.push(DroneDirective::SetFirstTargetHeight(STACK_BOTTOM));
                factor = match closest_horizontal(&location, others.iter()) {
                    Some(c) if c.distance_horizontal(&location) <= SPACE_BETWEEN && is_behind(&c) => GAP_SPEED_FACTOR,
                    _ => 1.0,
                };
            }
        }
        out.directives.push(DroneDirective::SetSpeedFactor(factor));
    }

    fn let_drone_land(&mut self, drone: usize, gate: Gate, out: &mut Outcome) {
        info!(airport = self.airport.id, drone, ?gate, "AIRPORT_CLEARED_TO_LAND: 着陸を許可しました");
        if !self.lower_airspace.contains(&drone) {
            self.lower_airspace.push(drone);
        }
        self.stack.retain(|d| *d != drone);
        self.gate_occupant[gate.index()] = Some(drone);
        self.lane_occupant[gate.index()] = Some(drone);
        out.directives.extend([
            DroneDirective::ClearTargets,
            DroneDirective::SetFreeEnabled(false),
            DroneDirective::SetStackEnabled(false),
            DroneDirective::SetDubinsEnabled(true),
            DroneDirective::SetSpeedFactor(1.0),
            DroneDirective::AppendTargets(vec![
                self.airport.prepare_landing(gate),
                self.airport.end_lane(gate),
                self.airport.gate(gate),
            ]),
        ]);
    }

    fn take_off(&mut self, drone: usize, gate: Gate, destination: &Airport, dest_gate: Gate, out: &mut Outcome) {
        let lane = gate.other();
        info!(
            airport = self.airport.id,
            drone,
            ?lane,
            destination = destination.id,
            "AIRPORT_TAKE_OFF: 離陸を開始します"
        );
        self.lane_occupant[lane.index()] = Some(drone);
        if self.gate_occupant[gate.index()] == Some(drone) {
            self.gate_occupant[gate.index()] = None;
        }
        if !self.lower_airspace.contains(&drone) {
            self.lower_airspace.push(drone);
        }
        out.directives.extend([
            DroneDirective::ClearTargets,
            DroneDirective::SetFreeEnabled(false),
            DroneDirective::SetStackEnabled(false),
            DroneDirective::SetDubinsEnabled(true),
            DroneDirective::SetSpeedFactor(1.0),
            DroneDirective::AppendTargets(vec![
                self.airport.start_lane(lane),
                self.airport.start_second_lane(lane),
                destination.prepare_landing(dest_gate),
                destination.end_lane(dest_gate),
                destination.gate(dest_gate),
            ]),
        ]);
    }

    fn taxi_to_other_gate(&mut self, drone: usize, from: Gate, out: &mut Outcome) {
        let to = from.other();
        info!(airport = self.airport.id, drone, ?from, ?to, "AIRPORT_TAXI: 反対側のゲートへ移動します");
        self.gate_occupant[to.index()] = Some(drone);
        self.lane_occupant[to.index()] = Some(drone);
        if self.gate_occupant[from.index()] == Some(drone) {
            self.gate_occupant[from.index()] = None;
        }
        out.directives.extend([
            DroneDirective::SetFreeEnabled(false),
            DroneDirective::SetDubinsEnabled(false),
            DroneDirective::AppendTargets(vec![
                self.airport.start_lane(to),
                self.airport.end_lane(to),
                self.airport.gate(to),
            ]),
        ]);
    }

    /// 最寄りの空いている他空港 (無人 → 1機の順で選ぶ)
    fn best_other_airport(&self, view: &FleetView) -> Option<(usize, Gate)> {
        let candidates = || {
            view.airports
                .iter()
                .filter(|s| s.airport.id != self.airport.id)
                .map(|s| (s, s.airport.center.distance(&self.airport.center)))
        };
        let nearest = |count: usize| {
            candidates()
                .filter(|(s, _)| s.active_count == count)
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(s, _)| s)
        };
        let status = nearest(0).or_else(|| nearest(1))?;
        let gate = if status.gate_free[0] { Gate::Zero } else { Gate::One };
        Some((status.airport.id, gate))
    }

    fn first_in_stack_for_gate(&self, drone: usize, gate: Gate, view: &FleetView) -> bool {
        self.stack
            .iter()
            .find(|d| {
                view.drones
                    .get(**d)
                    .and_then(|a| a.first_target_airport())
                    .is_some_and(|(airport, g)| airport == self.airport.id && g == gate)
            })
            .is_none_or(|first| *first == drone)
    }

    fn is_only_in_lower_airspace(&self, drone: usize) -> bool {
        self.lower_airspace.iter().all(|d| *d == drone)
    }

    fn gate_is_free(&self, gate: Gate, drone: usize) -> bool {
        self.gate_occupant[gate.index()].is_none_or(|d| d == drone)
    }

    fn lane_is_free(&self, lane: Gate, drone: usize) -> bool {
        self.lane_occupant[lane.index()].is_none_or(|d| d == drone)
    }

    fn gate_held_by(&self, drone: usize) -> Option<Gate> {
        [Gate::Zero, Gate::One]
            .into_iter()
            .find(|g| self.gate_occupant[g.index()] == Some(drone))
    }

    fn free_gates_of(&mut self, drone: usize) {
        for slot in self.gate_occupant.iter_mut().filter(|slot| **slot == Some(drone)) {
            *slot = None;
        }
    }

    fn free_lanes_of(&mut self, drone: usize) {
        for slot in self.lane_occupant.iter_mut().filter(|slot| **slot == Some(drone)) {
            *slot = None;
        }
    }
}

/// 水平距離で最も近い点
fn closest_horizontal<'a>(from: &Point3, points: impl Iterator<Item = &'a Point3>) -> Option<Point3> {
    points
        .min_by(|a, b| a.distance_horizontal(from).total_cmp(&b.distance_horizontal(from)))
        .copied()
}
