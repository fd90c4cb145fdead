use crate::models::primitives::{DubinsTracker, LineTracker, StackTracker};
use serde::Serialize;

/// 飛行段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum FlightStage {
    TakeOff,
    Fly,
    FlyDirect,
    Land,
    Taxi,
    Free,
    WaitingToLand,
}

impl FlightStage {
    /// 地上走行系の段階か
    pub fn is_ground(&self) -> bool {
        matches!(self, FlightStage::Taxi | FlightStage::Free)
    }
}

/// 飛行力学への出力
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlightCommand {
    pub pitch: f64,        // rad
    pub heading: f64,      // rad
    pub speed_factor: f64, // スロットル倍率（既定 1.0）
    pub stage: FlightStage,
}

impl FlightCommand {
    pub fn new(pitch: f64, heading: f64, speed_factor: f64, stage: FlightStage) -> Self {
        Self { pitch, heading, speed_factor, stage }
    }
}

/// 段階ごとの追従状態
///
/// 段階が切り替わると新しい状態で作り直される。
#[derive(Debug, Clone)]
pub enum FlightMode {
    TakeOff,
    Fly { dubins: DubinsTracker, fallback: LineTracker },
    FlyDirect(LineTracker),
    Land(LineTracker),
    Taxi(LineTracker),
    Free,
    WaitingToLand(StackTracker),
}

impl FlightMode {
    /// 段階に対応する初期状態
    pub fn enter(stage: FlightStage) -> Self {
        match stage {
            FlightStage::TakeOff => FlightMode::TakeOff,
            FlightStage::Fly => FlightMode::Fly {
                dubins: DubinsTracker::default(),
                fallback: LineTracker::flight(),
            },
            FlightStage::FlyDirect => FlightMode::FlyDirect(LineTracker::flight()),
            FlightStage::Land => FlightMode::Land(LineTracker::flight()),
            FlightStage::Taxi => FlightMode::Taxi(LineTracker::taxi()),
            FlightStage::Free => FlightMode::Free,
            FlightStage::WaitingToLand => FlightMode::WaitingToLand(StackTracker::default()),
        }
    }

    pub fn stage(&self) -> FlightStage {
        match self {
            FlightMode::TakeOff => FlightStage::TakeOff,
            FlightMode::Fly { .. } => FlightStage::Fly,
            FlightMode::FlyDirect(_) => FlightStage::FlyDirect,
            FlightMode::Land(_) => FlightStage::Land,
            FlightMode::Taxi(_) => FlightStage::Taxi,
            FlightMode::Free => FlightStage::Free,
            FlightMode::WaitingToLand(_) => FlightStage::WaitingToLand,
        }
    }
}
