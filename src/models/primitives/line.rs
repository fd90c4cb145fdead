//! 単一目標への直線追従
//!
//! 飛行中の直行・着陸進入と地上走行で共通に使い、調整値 [`LineProfile`] だけを切り替える。

use crate::models::common::{math_utils, Point3, Pose};
use crate::models::control::{self, PdController, DERIVATIVE_GAIN};
use crate::models::dubins::Turn;
use crate::models::primitives::Motion;
use std::f64::consts::PI;
use tracing::debug;

/// 反転旋回に入る方位差
const TURN_AROUND_ENTER: f64 = 35.0 * PI / 36.0;
/// 反転旋回を解除する方位差
const TURN_AROUND_EXIT: f64 = PI / 2.0;
/// 固定レート旋回の刻み
const TURN_STEP: f64 = PI / 16.0;

/// 直線追従の調整値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineProfile {
    /// 基準線を張り直す横偏差 (m)
    pub max_fault: f64,
    /// 固定レート旋回に切り替える方位差
    pub fixed_turn_threshold: f64,
    /// PD 出力に旋回刻みを上乗せする方位差
    pub assist_threshold: Option<f64>,
    /// ピッチを目標へ向けるか（地上走行では水平）
    pub follow_height: bool,
}

impl LineProfile {
    /// 飛行中の直線追従
    pub fn flight() -> Self {
        Self {
            max_fault: 3.0,
            fixed_turn_threshold: PI / 4.0,
            assist_threshold: Some(PI / 36.0),
            follow_height: true,
        }
    }

    /// 地上走行
    pub fn taxi() -> Self {
        Self {
            max_fault: 2.0,
            fixed_turn_threshold: PI / 8.0,
            assist_threshold: None,
            follow_height: false,
        }
    }
}

/// 単一目標への直線追従
///
/// 開始位置から目標への基準線を PD 制御で追従する。大きな方位差は固定レート旋回、
/// ほぼ反対向きの目標は旋回方向を保持した反転旋回で処理する。
#[derive(Debug, Clone)]
pub struct LineTracker {
    profile: LineProfile,
    line_start: Option<Point3>,
    pd: PdController,
    turn_around: Option<Turn>,
}

impl LineTracker {
    pub fn new(profile: LineProfile) -> Self {
        Self {
            profile,
            line_start: None,
            pd: PdController::new(),
            turn_around: None,
        }
    }

    pub fn flight() -> Self {
        Self::new(LineProfile::flight())
    }

    pub fn taxi() -> Self {
        Self::new(LineProfile::taxi())
    }

    pub fn is_turning_around(&self) -> bool {
        self.turn_around.is_some()
    }

    /// 1ティック分の指令を計算
    ///
    /// # 引数
    ///
    /// * `target` - 目標点
    /// * `pose` - 現在姿勢
    /// * `dt` - 経過時間 (s)
    ///
    /// # 戻り値
    ///
    /// (pitch, heading) 指令
    pub fn compute(&mut self, target: &Point3, pose: &Pose, dt: f64) -> Motion {
        let position = pose.position;
        let heading = pose.heading;
        let pitch = if self.profile.follow_height {
            control::pitch_toward(pose, Some(target))
        } else {
            0.0
        };
        let delta = math_utils::heading_delta(heading, &position, target);

        if let Some(turn) = self.turn_around {
            if delta.abs() > TURN_AROUND_EXIT {
                return Motion::new(pitch, heading + turn.sign() * TURN_STEP);
            }
            self.turn_around = None;
            self.line_start = None;
        }

        if delta.abs() > TURN_AROUND_ENTER {
            let turn = if delta >= 0.0 { Turn::Left } else { Turn::Right };
            debug!(?turn, delta, "LINE_TURN_AROUND: 目標がほぼ真後ろのため反転旋回します");
            self.turn_around = Some(turn);
            return Motion::new(pitch, heading + turn.sign() * TURN_STEP);
        }

        if delta.abs() > self.profile.fixed_turn_threshold {
            self.line_start = None;
            return Motion::new(pitch, heading + delta.signum() * TURN_STEP);
        }

        let start = match self.line_start {
            Some(start) if control::line_fault(&position, &start, target).abs() <= self.profile.max_fault => start,
            _ => {
                self.line_start = Some(position);
                position
            }
        };
        let error = control::line_fault(&position, &start, target);
        let mut command = self.pd.heading(heading, error, dt, DERIVATIVE_GAIN, None);
        if let Some(threshold) = self.profile.assist_threshold {
            if delta.abs() > threshold {
                command += delta.signum() * TURN_STEP;
            }
        }
        Motion::new(pitch, command)
    }
}
