//! # Control モジュール
//!
//! 経路追従のための制御則を提供します。
//!
//! ## 主要機能
//!
//! - **横方向 PD 制御**: 符号付き横偏差から方位指令を生成
//! - **ピッチ（滑空角）制御**: 目標高度へのピッチ指令をロール角依存の上限付きで生成
//! - **距離偏差関数**: 円・直線からの符号付き横偏差
//!
//! 横偏差は機体が基準線（円）の右側にいるとき正。

use crate::models::common::{math_utils, Point2, Point3, Pose};
use crate::models::dubins::Turn;
use std::f64::consts::PI;

/// 微分ゲイン（円弧区間）
pub const DERIVATIVE_GAIN: f64 = 3.0;
/// 微分ゲイン（直線区間）
pub const STRAIGHT_DERIVATIVE_GAIN: f64 = 1.0;
/// 補正量の上限 (deg)
pub const MAX_CORRECTION_DEG: f64 = 20.0;
/// 旋回円に乗るための固定バイアス (deg)
pub const ARC_BIAS_DEG: f64 = 11.5;

/// 目標なしのときの既定ピッチ
pub const DEFAULT_PITCH: f64 = PI / 36.0;
/// 降下側の下限ピッチ
pub const MIN_PITCH: f64 = -PI / 12.0;
/// 近距離ピッチ算出に使う水平距離 (m)
const SHORT_PITCH_DISTANCE: f64 = 100.0;

/// 横方向 PD 制御器
///
/// 前回偏差のみを状態として持つ。リセット時は新しいインスタンスで置き換える。
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PdController {
    prev_error: f64,
}

impl PdController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prev_error(&self) -> f64 {
        self.prev_error
    }

    /// 方位指令を計算し、前回偏差を更新する
    ///
    /// # 引数
    ///
    /// * `heading` - 現在の方位角 (rad)
    /// * `error` - 符号付き横偏差 (m)
    /// * `dt` - 前回からの経過時間 (s)
    /// * `gain` - 微分ゲイン
    /// * `bias` - 円弧追従中の旋回方向（直線なら None）
    ///
    /// # 戻り値
    ///
    /// 方位指令 (rad)
    pub fn heading(&mut self, heading: f64, error: f64, dt: f64, gain: f64, bias: Option<Turn>) -> f64 {
        let command = pd_heading(heading, error, self.prev_error, dt, gain, bias);
        self.prev_error = error;
        command
    }
}

/// PD 補正量 (deg 相当) を ±20 にクランプして返す
pub fn pd_correction(error: f64, prev_error: f64, dt: f64, gain: f64) -> f64 {
    let derivative = if dt > 0.0 { ((error - prev_error) / dt).atan() } else { 0.0 };
    (error + gain * derivative).clamp(-MAX_CORRECTION_DEG, MAX_CORRECTION_DEG)
}

/// PD 制御による方位指令
///
/// 補正量にバイアス（左 +11.5°、右 -11.5°）を加え、現在方位に足し込む。
pub fn pd_heading(
    heading: f64,
    error: f64,
    prev_error: f64,
    dt: f64,
    gain: f64,
    bias: Option<Turn>,
) -> f64 {
    let mut correction = pd_correction(error, prev_error, dt, gain);
    if let Some(turn) = bias {
        correction += turn.sign() * ARC_BIAS_DEG;
    }
    heading + math_utils::deg_to_rad(correction)
}

/// ロール角に応じた上昇ピッチの上限
pub fn climb_ceiling(roll: f64) -> f64 {
    let roll = roll.abs();
    if roll < PI / 36.0 {
        PI / 12.0
    } else if roll < PI / 18.0 {
        PI / 18.0
    } else {
        PI / 36.0
    }
}

/// 目標点へのピッチ指令
///
/// 方位ピッチ `atan(Δy / 水平距離)` と近距離ピッチ `atan(Δy / 100)` を比較し、
/// 絶対値の大きい方を採用する。近距離ピッチはロール角依存の上限で段階的に抑えられる。
///
/// # 引数
///
/// * `pose` - 現在姿勢
/// * `target` - 目標点（なければ既定の緩上昇）
///
/// # 戻り値
///
/// ピッチ指令 (rad)。[`MIN_PITCH`]〜[`climb_ceiling`] の範囲
pub fn pitch_toward(pose: &Pose, target: Option<&Point3>) -> f64 {
    let Some(target) = target else {
        return DEFAULT_PITCH;
    };
    let dy = target.y - pose.position.y;
    let horizontal = pose.position.distance_horizontal(target);
    let pitch = dy.atan2(horizontal);
    let mut short_pitch = (dy / SHORT_PITCH_DISTANCE).atan();

    if short_pitch > 0.0 {
        let roll = pose.roll.abs();
        if short_pitch > PI / 12.0 && roll < PI / 36.0 {
            short_pitch = PI / 12.0;
        } else if short_pitch > PI / 18.0 && roll < PI / 18.0 {
            short_pitch = PI / 18.0;
        } else if short_pitch > PI / 36.0 {
            short_pitch = PI / 36.0;
        }
    } else if short_pitch < -PI / 30.0 {
        short_pitch = -PI / 30.0;
    }

    let chosen = if (pitch > 0.0 && pitch < short_pitch) || (pitch < 0.0 && pitch > short_pitch) {
        short_pitch
    } else {
        pitch
    };
    chosen.clamp(MIN_PITCH, climb_ceiling(pose.roll))
}

/// 旋回円からの符号付き距離偏差
///
/// 左旋回円では外側が正、右旋回円では外側が負。
pub fn circle_fault(position: &Point3, center: &Point2, rho: f64, turn: Turn) -> f64 {
    let distance = position.horizontal().distance(center);
    match turn {
        Turn::Left => distance - rho,
        Turn::Right => rho - distance,
    }
}

/// 直線 (start → target) からの符号付き距離偏差
///
/// 機体が進行方向右側にいるとき正。長さゼロの基準線では 0。
pub fn line_fault(position: &Point3, start: &Point3, target: &Point3) -> f64 {
    let dx = target.x - start.x;
    let dz = target.z - start.z;
    let length = (dx * dx + dz * dz).sqrt();
    if length <= f64::EPSILON {
        return 0.0;
    }
    let side = (position.x - start.x) * dz - (position.z - start.z) * dx;
    let distance = side.abs() / length;
    if side > 0.0 { -distance } else { distance }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pose_at(x: f64, y: f64, z: f64, roll: f64) -> Pose {
        Pose::new(Point3::new(x, y, z), 0.0, 0.0, roll, 0.0)
    }

    #[test]
    fn test_pd_output_is_clamped() {
        let bound = math_utils::deg_to_rad(MAX_CORRECTION_DEG + ARC_BIAS_DEG);
        for error in [-500.0, -30.0, -1.0, 0.0, 2.0, 25.0, 900.0] {
            for prev in [-100.0, 0.0, 100.0] {
                for bias in [None, Some(Turn::Left), Some(Turn::Right)] {
                    let command = pd_heading(0.3, error, prev, 0.02, DERIVATIVE_GAIN, bias);
                    assert!((command - 0.3).abs() <= bound + 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_pd_bias_direction() {
        let left = pd_heading(0.0, 0.0, 0.0, 0.1, DERIVATIVE_GAIN, Some(Turn::Left));
        let right = pd_heading(0.0, 0.0, 0.0, 0.1, DERIVATIVE_GAIN, Some(Turn::Right));
        assert!((left - math_utils::deg_to_rad(ARC_BIAS_DEG)).abs() < 1e-12);
        assert!((right + math_utils::deg_to_rad(ARC_BIAS_DEG)).abs() < 1e-12);
    }

    #[test]
    fn test_pd_controller_tracks_previous_error() {
        let mut pd = PdController::new();
        pd.heading(0.0, 4.0, 0.1, DERIVATIVE_GAIN, None);
        assert_eq!(pd.prev_error(), 4.0);
        // 偏差が変化しなければ微分項はゼロ
        let command = pd.heading(0.0, 4.0, 0.1, DERIVATIVE_GAIN, None);
        assert!((command - math_utils::deg_to_rad(4.0)).abs() < 1e-12);
    }

    #[test]
    fn test_pitch_respects_roll_ceiling() {
        let target = Point3::new(0.0, 500.0, -50.0);
        for roll in [0.0, 0.06, 0.12, 0.5, -0.5] {
            let pitch = pitch_toward(&pose_at(0.0, 100.0, 0.0, roll), Some(&target));
            assert!(pitch <= climb_ceiling(roll) + 1e-12);
            assert!(pitch > 0.0);
        }
        assert!((climb_ceiling(0.0) - PI / 12.0).abs() < 1e-12);
        assert!((climb_ceiling(0.5) - PI / 36.0).abs() < 1e-12);
    }

    #[test]
    fn test_pitch_prefers_steeper_short_pitch() {
        // 遠方のわずかな上昇は近距離ピッチが支配する
        let target = Point3::new(0.0, 105.0, -5000.0);
        let pitch = pitch_toward(&pose_at(0.0, 100.0, 0.0, 0.0), Some(&target));
        assert!((pitch - (5.0f64 / 100.0).atan()).abs() < 1e-12);
    }

    #[test]
    fn test_pitch_descent_floor() {
        let target = Point3::new(0.0, -1.0, -2000.0);
        let pitch = pitch_toward(&pose_at(0.0, 60.0, 0.0, 0.0), Some(&target));
        assert!((pitch + PI / 30.0).abs() < 1e-12);
        let steep = pitch_toward(&pose_at(0.0, 300.0, 0.0, 0.0), Some(&Point3::new(0.0, 0.0, -10.0)));
        assert!((steep - MIN_PITCH).abs() < 1e-12);
    }

    #[test]
    fn test_pitch_without_target() {
        assert_eq!(pitch_toward(&pose_at(0.0, 0.0, 0.0, 0.0), None), DEFAULT_PITCH);
    }

    #[test]
    fn test_line_fault_sign() {
        let start = Point3::new(0.0, 0.0, 0.0);
        let target = Point3::new(0.0, 0.0, -100.0);
        // -Z へ進むとき +X 側が右
        assert!((line_fault(&Point3::new(10.0, 0.0, -50.0), &start, &target) - 10.0).abs() < 1e-12);
        assert!((line_fault(&Point3::new(-7.0, 0.0, -50.0), &start, &target) + 7.0).abs() < 1e-12);
        assert_eq!(line_fault(&Point3::new(5.0, 0.0, 5.0), &start, &start), 0.0);
    }

    #[test]
    fn test_circle_fault_sign() {
        let center = Point2::new(0.0, 0.0);
        let outside = Point3::new(450.0, 0.0, 0.0);
        assert!((circle_fault(&outside, &center, 400.0, Turn::Left) - 50.0).abs() < 1e-12);
        assert!((circle_fault(&outside, &center, 400.0, Turn::Right) + 50.0).abs() < 1e-12);
    }
}
