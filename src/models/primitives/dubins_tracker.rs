//! Dubins 経路の多段追従
//!
//! 現在姿勢から次の 2 つのウェイポイントへの Dubins 経路を計画し、
//! 第 1 旋回円 → 中間区間 → 第 2 旋回円 → 最終直線の順に追従する。

use crate::models::common::{math_utils, Point3, Pose};
use crate::models::control::{self, PdController, DERIVATIVE_GAIN, STRAIGHT_DERIVATIVE_GAIN};
use crate::models::dubins::{self, DubinsPath, KeyPoints, Pose2, SegmentKind};
use crate::models::primitives::{is_reached, Motion, REACH_RADIUS};
use tracing::{debug, warn};

/// 飛行時の旋回半径 (m)
pub const TURNING_RADIUS: f64 = 400.0;
/// 直線区間で基準線を張り直す横偏差 (m)
const MAX_FAULT: f64 = 3.0;
/// 経路を再計画する横偏差 (m)
const MAX_FAULT_RESET: f64 = 30.0;
/// 1 ティックでの最大移動量 (m)。超えたら再計画
const MAX_DISPLACEMENT: f64 = 100.0;
/// 再計画を強制する高度 (m)
const MIN_ALTITUDE: f64 = 5.0;
/// 最終直線中に次区間を先行計画する距離 (m)
const REPLAN_AHEAD_DISTANCE: f64 = 1000.0;
/// 同一ウェイポイントとみなす水平距離 (m)
const SAME_WAYPOINT: f64 = 1.0;

/// 追従段階
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DubinsStage {
    FirstCircle,
    StraightLine,
    SecondCircle,
    FinalLine,
    Stuck,
}

/// 再計画の理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetReason {
    NoPlan,
    Stuck,
    LowAltitude,
    LargeError,
    Displaced,
    TargetChanged,
    NextLegFar,
}

#[derive(Debug, Clone)]
struct DubinsPlan {
    path: DubinsPath,
    keys: KeyPoints,
    target: Point3,
    next: Point3,
}

/// Dubins 多段追従器
#[derive(Debug, Clone)]
pub struct DubinsTracker {
    rho: f64,
    stage: DubinsStage,
    plan: Option<DubinsPlan>,
    line_start: Option<Point3>,
    pd: PdController,
    last_position: Option<Point3>,
    last_error: f64,
}

impl Default for DubinsTracker {
    fn default() -> Self {
        Self::new(TURNING_RADIUS)
    }
}

impl DubinsTracker {
    pub fn new(rho: f64) -> Self {
        Self {
            rho,
            stage: DubinsStage::Stuck,
            plan: None,
            line_start: None,
            pd: PdController::new(),
            last_position: None,
            last_error: 0.0,
        }
    }

    pub fn stage(&self) -> DubinsStage {
        self.stage
    }

    pub fn path(&self) -> Option<&DubinsPath> {
        self.plan.as_ref().map(|plan| &plan.path)
    }

    /// 再計画が必要かどうかを判定
    ///
    /// # 戻り値
    ///
    /// 再計画が必要なら理由、不要なら None
    pub fn reset_reason(&self, targets: &[Point3], pose: &Pose) -> Option<ResetReason> {
        let Some(plan) = &self.plan else {
            return Some(ResetReason::NoPlan);
        };
        if self.stage == DubinsStage::Stuck {
            return Some(ResetReason::Stuck);
        }
        if pose.altitude() < MIN_ALTITUDE {
            return Some(ResetReason::LowAltitude);
        }
        if self.last_error.abs() > MAX_FAULT_RESET {
            return Some(ResetReason::LargeError);
        }
        if let Some(last) = &self.last_position {
            if last.distance_3d(&pose.position) > MAX_DISPLACEMENT {
                return Some(ResetReason::Displaced);
            }
        }
        let head = targets.first()?;
        let head_is_target = same_waypoint(head, &plan.target);
        let head_is_next = same_waypoint(head, &plan.next);
        if !head_is_target && !head_is_next {
            return Some(ResetReason::TargetChanged);
        }
        if self.stage == DubinsStage::FinalLine
            && head_is_next
            && targets.len() > 1
            && pose.position.distance_horizontal(&plan.next) > REPLAN_AHEAD_DISTANCE
        {
            return Some(ResetReason::NextLegFar);
        }
        None
    }

    /// 1ティック分の指令を計算
    ///
    /// # 引数
    ///
    /// * `targets` - ウェイポイント列（先頭 2 点を使用）
    /// * `pose` - 現在姿勢
    /// * `dt` - 経過時間 (s)
    ///
    /// # 戻り値
    ///
    /// (pitch, heading) 指令。目標が 2 点未満なら目標方位への直接指令
    pub fn compute(&mut self, targets: &[Point3], pose: &Pose, dt: f64) -> Motion {
        let (target, next) = match targets {
            [] => return Motion::new(pose.pitch, pose.heading),
            [only] => {
                return Motion::new(control::pitch_toward(pose, Some(only)), math_utils::bearing(&pose.position, only));
            }
            [target, next, ..] => (*target, *next),
        };

        if let Some(reason) = self.reset_reason(targets, pose) {
            self.replan(pose, target, next, reason);
        }
        self.last_position = Some(pose.position);

        let Some(plan) = self.plan.clone() else {
            // 経路なし: 姿勢を保持して次ティックで再計画
            self.last_error = 0.0;
            return Motion::new(pose.pitch, pose.heading);
        };

        self.advance_stage(&plan, pose);

        let (error, gain, bias) = match self.stage {
            DubinsStage::FirstCircle => {
                let turn = plan.path.family.first_turn();
                (control::circle_fault(&pose.position, &plan.keys.first_center, self.rho, turn), DERIVATIVE_GAIN, Some(turn))
            }
            DubinsStage::StraightLine => match (plan.path.family.segments()[1], plan.keys.middle_center) {
                (SegmentKind::Arc(turn), Some(center)) => {
                    (control::circle_fault(&pose.position, &center, self.rho, turn), DERIVATIVE_GAIN, Some(turn))
                }
                _ => {
                    let goal = plan.keys.second.position().at_height(target.y);
                    let start = match self.line_start {
                        Some(start) if control::line_fault(&pose.position, &start, &goal).abs() <= MAX_FAULT => start,
                        _ => {
                            self.line_start = Some(pose.position);
                            pose.position
                        }
                    };
                    (control::line_fault(&pose.position, &start, &goal), STRAIGHT_DERIVATIVE_GAIN, None)
                }
            },
            DubinsStage::SecondCircle => {
                let turn = plan.path.family.last_turn();
                (control::circle_fault(&pose.position, &plan.keys.second_center, self.rho, turn), DERIVATIVE_GAIN, Some(turn))
            }
            DubinsStage::FinalLine => {
                (control::line_fault(&pose.position, &plan.target, &plan.next), DERIVATIVE_GAIN, None)
            }
            DubinsStage::Stuck => {
                warn!(position = ?pose.position, "DUBINS_STUCK: 追従段階が不定のため姿勢を保持し再計画します");
                self.last_error = 0.0;
                return Motion::new(pose.pitch, pose.heading);
            }
        };

        self.last_error = error;
        let heading = self.pd.heading(pose.heading, error, dt, gain, bias);
        let pitch_target = if self.stage < DubinsStage::FinalLine { &plan.target } else { &plan.next };
        Motion::new(control::pitch_toward(pose, Some(pitch_target)), heading)
    }

    fn replan(&mut self, pose: &Pose, target: Point3, next: Point3, reason: ResetReason) {
        let start = Pose2::from_point(&pose.position, pose.heading);
        let end = Pose2::from_point(&target, math_utils::bearing(&target, &next));
        self.pd = PdController::new();
        self.line_start = None;
        self.last_error = 0.0;
        match dubins::solve(&start, &end, self.rho) {
            Some(path) => {
                debug!(
                    ?reason,
                    family = ?path.family,
                    length = path.length(),
                    "DUBINS_REPLAN: Dubins経路を再計画しました"
                );
                let keys = path.key_points();
                self.plan = Some(DubinsPlan { path, keys, target, next });
                self.stage = DubinsStage::FirstCircle;
            }
            None => {
                warn!(?reason, rho = self.rho, "DUBINS_NO_PATH: 経路を計画できません");
                self.plan = None;
                self.stage = DubinsStage::Stuck;
            }
        }
    }

    fn advance_stage(&mut self, plan: &DubinsPlan, pose: &Pose) {
        let reached = |point: &Point3| is_reached(&pose.position, pose.heading, point, REACH_RADIUS);
        let first = plan.keys.first.position().at_height(plan.target.y);
        let second = plan.keys.second.position().at_height(plan.target.y);

        let next_stage = match self.stage {
            DubinsStage::FirstCircle if reached(&first) => Some(DubinsStage::StraightLine),
            DubinsStage::StraightLine if reached(&second) => Some(DubinsStage::SecondCircle),
            DubinsStage::SecondCircle if reached(&plan.target) => Some(DubinsStage::FinalLine),
            _ => None,
        };
        if let Some(stage) = next_stage {
            debug!(from = ?self.stage, to = ?stage, "DUBINS_STAGE_TRANSITION: 追従段階が切り替わりました");
            self.stage = stage;
            self.line_start = None;
        }
    }
}

fn same_waypoint(a: &Point3, b: &Point3) -> bool {
    a.distance_horizontal(b) < SAME_WAYPOINT
}
