//! 運動プリミティブ
//!
//! 目標ウェイポイント列と現在姿勢から (pitch, heading) 指令を生成するステートマシン群。

pub mod dubins_tracker;
pub mod line;
pub mod stack;

pub use dubins_tracker::{DubinsStage, DubinsTracker, ResetReason};
pub use line::{LineProfile, LineTracker};
pub use stack::{StackPhase, StackTracker};

use crate::models::common::{math_utils, Point3};

/// 運動プリミティブの出力
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    pub pitch: f64,   // rad
    pub heading: f64, // rad
}

impl Motion {
    pub fn new(pitch: f64, heading: f64) -> Self {
        Self { pitch, heading }
    }
}

/// 目標到達判定の半径（狭）
pub const REACH_RADIUS: f64 = 50.0;
/// 通過判定を許す距離
pub const PASSED_RADIUS: f64 = 200.0;

/// 目標点に到達（または通過）したか
///
/// 水平距離が `radius` 未満、あるいは目標が後方（方位差 90° 超）かつ 200 m 未満。
pub fn is_reached(position: &Point3, heading: f64, point: &Point3, radius: f64) -> bool {
    let distance = position.distance_horizontal(point);
    if distance < radius {
        return true;
    }
    let behind = math_utils::heading_delta(heading, position, point).abs() > std::f64::consts::FRAC_PI_2;
    behind && distance < PASSED_RADIUS
}
