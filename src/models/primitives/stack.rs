//! 空港上空の待機旋回
//!
//! 中心の周りを時計回りに旋回する。円の外からは接線方向へ進入し、内側からは外へ修正する。

use crate::models::common::{math_utils, Point3, Pose};
use crate::models::control::{self, PdController, DERIVATIVE_GAIN};
use crate::models::dubins::Turn;
use crate::models::primitives::Motion;
use std::f64::consts::PI;
use tracing::trace;

/// 待機旋回円の半径 (m)
pub const STACK_RADIUS: f64 = 400.0;
/// 旋回円から外れたとみなす外側の許容幅 (m)
const OUTER_FAULT: f64 = 40.0;
/// 内側の許容幅 (m)
const INNER_FAULT: f64 = 10.0;
/// 旋回円に乗ったとみなす幅 (m)
const ON_CIRCLE_BAND: f64 = 5.0;
/// 円内側からの離脱時に毎ティック切る方位 (rad)
const INSIDE_CORRECTION: f64 = 10.0 * PI / 180.0;
/// 旋回中のピッチ上限
const MAX_STACK_PITCH: f64 = PI / 30.0;

/// 待機旋回の段階
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackPhase {
    /// 円の外側から接線方向へ進入
    ApproachCircle,
    /// 円の内側から徐々に外へ修正
    GetOnCircle,
    /// 時計回りに旋回中
    OnCircle,
}

/// 空港上空の待機旋回（時計回り固定）追従器
#[derive(Debug, Clone)]
pub struct StackTracker {
    rho: f64,
    on_circle: bool,
    phase: StackPhase,
    pd: PdController,
}

impl Default for StackTracker {
    fn default() -> Self {
        Self::new(STACK_RADIUS)
    }
}

impl StackTracker {
    pub fn new(rho: f64) -> Self {
        Self {
            rho,
            on_circle: false,
            phase: StackPhase::ApproachCircle,
            pd: PdController::new(),
        }
    }

    pub fn phase(&self) -> StackPhase {
        self.phase
    }

    /// 1ティック分の指令を計算
    ///
    /// # 引数
    ///
    /// * `center` - 待機円の中心（高度は目標高度）
    /// * `pose` - 現在姿勢
    /// * `dt` - 経過時間 (s)
    pub fn compute(&mut self, center: &Point3, pose: &Pose, dt: f64) -> Motion {
        let distance = pose.position.distance_horizontal(center);

        if distance > self.rho + OUTER_FAULT {
            self.on_circle = false;
        } else if distance < self.rho - INNER_FAULT {
            self.phase = StackPhase::GetOnCircle;
            return Motion::new(0.0, pose.heading - INSIDE_CORRECTION);
        } else if (distance - self.rho).abs() < ON_CIRCLE_BAND {
            if !self.on_circle {
                trace!(distance, "STACK_JOINED: 待機旋回円に乗りました");
            }
            self.on_circle = true;
        }

        if self.on_circle {
            self.phase = StackPhase::OnCircle;
            let pitch = control::pitch_toward(pose, Some(center)).clamp(-MAX_STACK_PITCH, MAX_STACK_PITCH);
            let error = self.rho - distance;
            let heading = self.pd.heading(pose.heading, error, dt, DERIVATIVE_GAIN, Some(Turn::Right));
            return Motion::new(pitch, heading);
        }

        self.phase = StackPhase::ApproachCircle;
        let ratio = if distance > 0.0 { (self.rho / distance).min(1.0) } else { 1.0 };
        let bearing = math_utils::bearing(&pose.position, center);
        Motion::new(
            control::pitch_toward(pose, Some(center)),
            math_utils::normalize_angle(bearing + ratio.asin()),
        )
    }
}
