use crate::models::common::Pose;
use crate::models::stage::FlightCommand;

/// 飛行力学（外部協調者）のインターフェース
///
/// 指令 (pitch, heading, 速度倍率) を受け取り、次の姿勢を返す。
pub trait IFlightDynamics {
    /// 1ティック分の積分
    fn step(&mut self, command: &FlightCommand, dt: f64) -> Pose;

    /// 現在の姿勢
    fn pose(&self) -> Pose;

    /// 現在の対地速度 (m/s)
    fn speed(&self) -> f64;
}

/// 毎ティック姿勢を受け取り指令を返すエージェントのインターフェース
pub trait IPilot {
    /// 姿勢の観測（位置・速度・Δt の更新）
    fn observe(&mut self, pose: &Pose);

    /// 観測済みの姿勢に対する指令
    fn command(&mut self, pose: &Pose) -> FlightCommand;

    /// エージェントIDの取得
    fn get_id(&self) -> usize;
}
