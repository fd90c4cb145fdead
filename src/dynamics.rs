//! # Dynamics モジュール
//!
//! 指令から次の姿勢を求める簡易な質点モデルを提供します。
//!
//! 厳密な空力ではなく、自動操縦の確認用に以下だけを再現します。
//!
//! - 速度は段階ごとの目標速度（巡航/地上走行 × 速度倍率）へ加速度制限付きで追従
//! - 旋回率は方位指令との差に比例し、11.5° の差で半径 400 m の旋回円になる
//! - ピッチは変化率制限付きで指令へ追従
//! - 高度は地面 (0) で打ち切り、離陸には最低速度が必要
//! - 地上走行系の段階では一定の沈下率で接地する

use crate::models::common::{math_utils, Point3, Pose};
use crate::models::control::ARC_BIAS_DEG;
use crate::models::stage::{FlightCommand, FlightStage};
use crate::models::traits::IFlightDynamics;
use serde::{Deserialize, Serialize};

/// 重力加速度 (m/s²)
const GRAVITY: f64 = 9.81;
/// 地上走行系の段階で空中にいるときの沈下率 (m/s)
const TOUCHDOWN_SINK_MPS: f64 = 2.0;

/// 質点モデルのパラメータ
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicsConfig {
    pub cruise_speed_mps: f64,
    pub taxi_speed_mps: f64,
    pub acceleration_mps2: f64,
    pub lift_off_speed_mps: f64,
    pub turning_radius_m: f64,
    pub ground_turning_radius_m: f64,
    pub max_turn_rate_rps: f64,
    pub pitch_rate_rps: f64,
}

impl Default for DynamicsConfig {
    fn default() -> Self {
        Self {
            cruise_speed_mps: 60.0,
            taxi_speed_mps: 10.0,
            acceleration_mps2: 6.0,
            lift_off_speed_mps: 30.0,
            turning_radius_m: 400.0,
            ground_turning_radius_m: 15.0,
            max_turn_rate_rps: 0.5,
            pitch_rate_rps: 0.5,
        }
    }
}

/// 質点モデル
#[derive(Debug, Clone)]
pub struct KinematicModel {
    config: DynamicsConfig,
    pose: Pose,
    speed: f64,
}

impl KinematicModel {
    /// モデルを作成
    ///
    /// # 引数
    ///
    /// * `config` - パラメータ
    /// * `pose` - 初期姿勢
    /// * `speed` - 初速 (m/s)
    pub fn new(config: DynamicsConfig, pose: Pose, speed: f64) -> Self {
        Self { config, pose, speed }
    }

    pub fn config(&self) -> &DynamicsConfig {
        &self.config
    }

    fn target_speed(&self, command: &FlightCommand) -> f64 {
        let factor = command.speed_factor.max(0.0);
        match command.stage {
            FlightStage::Free => 0.0,
            FlightStage::Taxi => self.config.taxi_speed_mps * factor,
            FlightStage::Land if self.is_on_ground() => self.config.taxi_speed_mps,
            _ => self.config.cruise_speed_mps * factor,
        }
    }

    fn is_on_ground(&self) -> bool {
        self.pose.position.y <= 0.0
    }
}

impl IFlightDynamics for KinematicModel {
    fn step(&mut self, command: &FlightCommand, dt: f64) -> Pose {
        if dt <= 0.0 {
            return self.pose;
        }
        let max_dv = self.config.acceleration_mps2 * dt;
        self.speed += (self.target_speed(command) - self.speed).clamp(-max_dv, max_dv);
        self.speed = self.speed.max(0.0);

        let on_ground = self.is_on_ground();
        let ground_stage = command.stage.is_ground();
        let max_dp = self.config.pitch_rate_rps * dt;
        let mut pitch = self.pose.pitch + (command.pitch - self.pose.pitch).clamp(-max_dp, max_dp);
        if ground_stage || (on_ground && (self.speed < self.config.lift_off_speed_mps || pitch < 0.0)) {
            pitch = 0.0;
        }

        let horizontal = self.speed * pitch.cos();
        let radius = if on_ground {
            self.config.ground_turning_radius_m
        } else {
            self.config.turning_radius_m
        };
        let delta = math_utils::normalize_angle(command.heading - self.pose.heading);
        let rate = (horizontal / radius * delta / math_utils::deg_to_rad(ARC_BIAS_DEG))
            .clamp(-self.config.max_turn_rate_rps, self.config.max_turn_rate_rps);
        let heading = math_utils::normalize_angle(self.pose.heading + rate * dt);

        let p = self.pose.position;
        let climb = if ground_stage { -TOUCHDOWN_SINK_MPS } else { self.speed * pitch.sin() };
        let position = Point3::new(
            p.x - heading.sin() * horizontal * dt,
            (p.y + climb * dt).max(0.0),
            p.z - heading.cos() * horizontal * dt,
        );
        let roll = (horizontal * rate / GRAVITY).atan();

        self.pose = Pose::new(position, heading, pitch, roll, self.pose.elapsed + dt);
        self.pose
    }

    fn pose(&self) -> Pose {
        self.pose
    }

    fn speed(&self) -> f64 {
        self.speed
    }
}
