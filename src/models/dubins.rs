//! # Dubins モジュール
//!
//! 最小旋回半径 ρ を持つ機体のための Dubins 経路ソルバーを提供します。
//!
//! 開始姿勢と終了姿勢（水平位置と方位角）から、6 つの経路族
//! (LSL, LSR, RSL, RSR, RLR, LRL) のパラメータを閉形式で計算し、
//! 総コスト最小の経路を選択します。
//!
//! ## 主要機能
//!
//! - **経路解法**: [`solve`] による最短経路の選択（同コストは列挙順で先勝ち）
//! - **経路族ごとの評価**: [`family_cost`] で個別の経路族を評価
//! - **経路サンプリング**: [`DubinsPath::sample`] で任意の弧長位置の姿勢を取得
//! - **キーポイント導出**: 旋回円の中心と接点を [`DubinsPath::key_points`] で取得
//!
//! ## 座標系
//!
//! ワールド座標 (x, z, heading) は内部で (u, v, θ) = (-z, -x, heading) に変換されます。
//! この変換により heading の増加が u→v 方向（反時計回り）の回転に対応し、
//! 標準的な Dubins の式をそのまま適用できます。

use crate::models::common::{math_utils, Point2, Point3};
use std::f64::consts::{FRAC_PI_2, TAU};

/// 旋回方向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    Left,
    Right,
}

impl Turn {
    /// 旋回方向の符号（左 +1、右 -1）
    pub fn sign(self) -> f64 {
        match self {
            Turn::Left => 1.0,
            Turn::Right => -1.0,
        }
    }
}

/// 経路セグメントの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    Arc(Turn),
    Straight,
}

/// Dubins 経路族
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathFamily {
    Lsl,
    Lsr,
    Rsl,
    Rsr,
    Rlr,
    Lrl,
}

impl PathFamily {
    /// 評価順（同コスト時はこの順で先に見つかったものを採用）
    pub const ALL: [PathFamily; 6] = [
        PathFamily::Lsl,
        PathFamily::Lsr,
        PathFamily::Rsl,
        PathFamily::Rsr,
        PathFamily::Rlr,
        PathFamily::Lrl,
    ];

    /// 3 つのセグメントの種類
    pub fn segments(self) -> [SegmentKind; 3] {
        use SegmentKind::{Arc, Straight};
        use Turn::{Left, Right};
        match self {
            PathFamily::Lsl => [Arc(Left), Straight, Arc(Left)],
            PathFamily::Lsr => [Arc(Left), Straight, Arc(Right)],
            PathFamily::Rsl => [Arc(Right), Straight, Arc(Left)],
            PathFamily::Rsr => [Arc(Right), Straight, Arc(Right)],
            PathFamily::Rlr => [Arc(Right), Arc(Left), Arc(Right)],
            PathFamily::Lrl => [Arc(Left), Arc(Right), Arc(Left)],
        }
    }

    pub fn first_turn(self) -> Turn {
        match self {
            PathFamily::Lsl | PathFamily::Lsr | PathFamily::Lrl => Turn::Left,
            PathFamily::Rsl | PathFamily::Rsr | PathFamily::Rlr => Turn::Right,
        }
    }

    pub fn last_turn(self) -> Turn {
        match self {
            PathFamily::Lsl | PathFamily::Rsl | PathFamily::Lrl => Turn::Left,
            PathFamily::Lsr | PathFamily::Rsr | PathFamily::Rlr => Turn::Right,
        }
    }

    /// 正規化済みパラメータ (t, p, q) を計算
    ///
    /// # 引数
    ///
    /// * `alpha` - 開始方位と基線の角度差 [0, 2π)
    /// * `beta` - 終了方位と基線の角度差 [0, 2π)
    /// * `d` - ρ で正規化した始点終点間距離
    ///
    /// # 戻り値
    ///
    /// 実現可能な場合は Some([t, p, q])、判別式が範囲外なら None
    fn parameters(self, alpha: f64, beta: f64, d: f64) -> Option<[f64; 3]> {
        let (sa, ca) = alpha.sin_cos();
        let (sb, cb) = beta.sin_cos();
        let c_ab = (alpha - beta).cos();
        let mod2pi = math_utils::mod2pi;

        match self {
            PathFamily::Lsl => {
                let p_sq = 2.0 + d * d - 2.0 * c_ab + 2.0 * d * (sa - sb);
                if p_sq < 0.0 {
                    return None;
                }
                let tmp1 = (cb - ca).atan2(d + sa - sb);
                Some([mod2pi(-alpha + tmp1), p_sq.sqrt(), mod2pi(beta - tmp1)])
            }
            PathFamily::Rsr => {
                let p_sq = 2.0 + d * d - 2.0 * c_ab + 2.0 * d * (sb - sa);
                if p_sq < 0.0 {
                    return None;
                }
                let tmp1 = (ca - cb).atan2(d - sa + sb);
                Some([mod2pi(alpha - tmp1), p_sq.sqrt(), mod2pi(-beta + tmp1)])
            }
            PathFamily::Lsr => {
                let p_sq = -2.0 + d * d + 2.0 * c_ab + 2.0 * d * (sa + sb);
                if p_sq < 0.0 {
                    return None;
                }
                let p = p_sq.sqrt();
                let tmp2 = (-ca - cb).atan2(d + sa + sb) - (-2.0f64).atan2(p);
                Some([mod2pi(-alpha + tmp2), p, mod2pi(-mod2pi(beta) + tmp2)])
            }
            PathFamily::Rsl => {
                let p_sq = d * d - 2.0 + 2.0 * c_ab - 2.0 * d * (sa + sb);
                if p_sq < 0.0 {
                    return None;
                }
                let p = p_sq.sqrt();
                let tmp2 = (ca + cb).atan2(d - sa - sb) - 2.0f64.atan2(p);
                Some([mod2pi(alpha - tmp2), p, mod2pi(beta - tmp2)])
            }
            PathFamily::Rlr => {
                let tmp = (6.0 - d * d + 2.0 * c_ab + 2.0 * d * (sa - sb)) / 8.0;
                if tmp.abs() > 1.0 {
                    return None;
                }
                let p = mod2pi(TAU - tmp.acos());
                let t = mod2pi(alpha - (ca - cb).atan2(d - sa + sb) + mod2pi(p / 2.0));
                Some([t, p, mod2pi(alpha - beta - t + mod2pi(p))])
            }
            PathFamily::Lrl => {
                let tmp = (6.0 - d * d + 2.0 * c_ab + 2.0 * d * (sb - sa)) / 8.0;
                if tmp.abs() > 1.0 {
                    return None;
                }
                let p = mod2pi(TAU - tmp.acos());
                let t = mod2pi(-alpha - (ca - cb).atan2(d + sa - sb) + p / 2.0);
                Some([t, p, mod2pi(mod2pi(beta) - alpha - t + mod2pi(p))])
            }
        }
    }
}

/// 水平面上の姿勢 (x, z, heading)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose2 {
    pub x: f64,
    pub z: f64,
    pub heading: f64,
}

impl Pose2 {
    pub fn new(x: f64, z: f64, heading: f64) -> Self {
        Self { x, z, heading }
    }

    pub fn from_point(point: &Point3, heading: f64) -> Self {
        Self::new(point.x, point.z, heading)
    }

    pub fn position(&self) -> Point2 {
        Point2::new(self.x, self.z)
    }

    /// 指定方向へ旋回するときの旋回円中心
    pub fn turn_center(&self, turn: Turn, rho: f64) -> Point2 {
        let sigma = self.heading + turn.sign() * FRAC_PI_2;
        Point2::new(self.x - rho * sigma.sin(), self.z - rho * sigma.cos())
    }

    // (u, v, θ) フレームへの変換
    fn to_frame(self) -> (f64, f64, f64) {
        (-self.z, -self.x, self.heading)
    }

    fn from_frame(u: f64, v: f64, theta: f64) -> Self {
        Self::new(-v, -u, math_utils::normalize_angle(theta))
    }
}

/// 旋回円と接点
///
/// 第 1 セグメント終端 (`first`) と第 3 セグメント始端 (`second`) が接点。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KeyPoints {
    pub first_center: Point2,
    pub middle_center: Option<Point2>,
    pub second_center: Point2,
    pub first: Pose2,
    pub second: Pose2,
}

/// Dubins 経路
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DubinsPath {
    pub start: Pose2,
    pub family: PathFamily,
    /// 正規化済みパラメータ (t, p, q)
    pub params: [f64; 3],
    pub rho: f64,
}

impl DubinsPath {
    /// 正規化コスト t + p + q
    pub fn cost(&self) -> f64 {
        self.params.iter().sum()
    }

    /// 経路長 (m)
    pub fn length(&self) -> f64 {
        self.cost() * self.rho
    }

    /// セグメント i の長さ (m)
    pub fn segment_length(&self, index: usize) -> f64 {
        self.params[index] * self.rho
    }

    /// 弧長 s (m) における姿勢を返す
    ///
    /// s は [0, length] にクランプされる。
    pub fn sample(&self, s: f64) -> Pose2 {
        let (u0, v0, theta0) = self.start.to_frame();
        let mut remaining = s.clamp(0.0, self.length()) / self.rho;
        // 正規化座標での現在位置
        let (mut u, mut v, mut theta) = (0.0, 0.0, theta0);

        for (kind, param) in self.family.segments().iter().zip(self.params) {
            let step = remaining.min(param);
            (u, v, theta) = advance(*kind, u, v, theta, step);
            remaining -= step;
            if remaining <= 0.0 {
                break;
            }
        }

        Pose2::from_frame(u * self.rho + u0, v * self.rho + v0, theta)
    }

    /// 経路終端の姿勢
    pub fn end_pose(&self) -> Pose2 {
        self.sample(self.length())
    }

    /// 旋回円中心と接点を導出
    pub fn key_points(&self) -> KeyPoints {
        let first = self.sample(self.segment_length(0));
        let second = self.sample(self.segment_length(0) + self.segment_length(1));
        let middle_center = match self.family.segments()[1] {
            SegmentKind::Arc(turn) => Some(first.turn_center(turn, self.rho)),
            SegmentKind::Straight => None,
        };
        KeyPoints {
            first_center: self.start.turn_center(self.family.first_turn(), self.rho),
            middle_center,
            second_center: second.turn_center(self.family.last_turn(), self.rho),
            first,
            second,
        }
    }
}

// 正規化座標で 1 セグメント分進める
fn advance(kind: SegmentKind, u: f64, v: f64, theta: f64, t: f64) -> (f64, f64, f64) {
    match kind {
        SegmentKind::Arc(Turn::Left) => (
            u + (theta + t).sin() - theta.sin(),
            v - (theta + t).cos() + theta.cos(),
            theta + t,
        ),
        SegmentKind::Arc(Turn::Right) => (
            u - (theta - t).sin() + theta.sin(),
            v + (theta - t).cos() - theta.cos(),
            theta - t,
        ),
        SegmentKind::Straight => (u + theta.cos() * t, v + theta.sin() * t, theta),
    }
}

// (alpha, beta, d) を計算
fn normalized_geometry(start: &Pose2, end: &Pose2, rho: f64) -> (f64, f64, f64) {
    let (su, sv, s_theta) = start.to_frame();
    let (eu, ev, e_theta) = end.to_frame();
    let du = eu - su;
    let dv = ev - sv;
    let d = (du * du + dv * dv).sqrt() / rho;
    let theta = if d > 0.0 { math_utils::mod2pi(dv.atan2(du)) } else { 0.0 };
    let alpha = math_utils::mod2pi(s_theta - theta);
    let beta = math_utils::mod2pi(e_theta - theta);
    (alpha, beta, d)
}

/// 単一の経路族を評価
///
/// # 戻り値
///
/// 実現可能なら正規化コスト、ρ が正でないか判別式が範囲外なら None
pub fn family_cost(start: &Pose2, end: &Pose2, rho: f64, family: PathFamily) -> Option<f64> {
    if rho <= 0.0 {
        return None;
    }
    let (alpha, beta, d) = normalized_geometry(start, end, rho);
    family.parameters(alpha, beta, d).map(|p| p.iter().sum())
}

/// 最短の Dubins 経路を求める
///
/// # 引数
///
/// * `start` - 開始姿勢
/// * `end` - 終了姿勢
/// * `rho` - 旋回半径 (m)
///
/// # 戻り値
///
/// 最短経路。ρ が正でない場合は None（呼び出し側は目標への直接方位にフォールバックする）
pub fn solve(start: &Pose2, end: &Pose2, rho: f64) -> Option<DubinsPath> {
    if rho <= 0.0 {
        return None;
    }
    let (alpha, beta, d) = normalized_geometry(start, end, rho);

    let mut best: Option<DubinsPath> = None;
    for family in PathFamily::ALL {
        let Some(params) = family.parameters(alpha, beta, d) else {
            continue;
        };
        let candidate = DubinsPath { start: *start, family, params, rho };
        match &best {
            Some(current) if candidate.cost() >= current.cost() => {}
            _ => best = Some(candidate),
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    const RHO: f64 = 400.0;

    fn lsl_case() -> (Pose2, Pose2) {
        // 北向き (-Z) から左へ回り込み、+Z 方向を向いて終わる
        (Pose2::new(0.0, 0.0, 0.0), Pose2::new(-4000.0, 0.0, PI))
    }

    #[test]
    fn test_lsl_parameters() {
        let (start, end) = lsl_case();
        let path = solve(&start, &end, RHO).expect("path");
        assert_eq!(path.family, PathFamily::Lsl);
        assert!((path.params[0] - FRAC_PI_2).abs() < 1e-9);
        assert!((path.params[1] - 8.0).abs() < 1e-9);
        assert!((path.params[2] - FRAC_PI_2).abs() < 1e-9);
        assert!((path.length() - (8.0 + PI) * RHO).abs() < 1e-6);
    }

    #[test]
    fn test_solution_is_minimal_over_all_families() {
        let cases = [
            (Pose2::new(0.0, 0.0, 0.0), Pose2::new(300.0, -900.0, 2.0)),
            (Pose2::new(100.0, 50.0, -1.2), Pose2::new(-250.0, 400.0, 0.3)),
            (Pose2::new(0.0, 0.0, 0.5), Pose2::new(10.0, -5.0, -2.5)),
            (Pose2::new(-3000.0, 2000.0, 3.0), Pose2::new(1500.0, -700.0, -0.4)),
        ];
        for (start, end) in cases {
            let path = solve(&start, &end, RHO).expect("path");
            for family in PathFamily::ALL {
                if let Some(cost) = family_cost(&start, &end, RHO, family) {
                    assert!(path.cost() <= cost + 1e-12, "{:?} beat {:?}", family, path.family);
                }
            }
        }
    }

    #[test]
    fn test_solve_is_idempotent() {
        let start = Pose2::new(12.0, -40.0, 0.7);
        let end = Pose2::new(-800.0, 1200.0, -2.2);
        assert_eq!(solve(&start, &end, RHO), solve(&start, &end, RHO));
    }

    #[test]
    fn test_end_pose_matches_goal() {
        let cases = [
            lsl_case(),
            (Pose2::new(0.0, 0.0, 0.0), Pose2::new(300.0, -900.0, 2.0)),
            (Pose2::new(100.0, 50.0, -1.2), Pose2::new(-250.0, 400.0, 0.3)),
            (Pose2::new(0.0, 0.0, 0.0), Pose2::new(200.0, 0.0, PI)),
        ];
        for (start, end) in cases {
            let path = solve(&start, &end, RHO).expect("path");
            let reached = path.end_pose();
            assert!((reached.x - end.x).abs() < 1e-6, "{:?}", path.family);
            assert!((reached.z - end.z).abs() < 1e-6, "{:?}", path.family);
            let heading_error = math_utils::normalize_angle(reached.heading - end.heading);
            assert!(heading_error.abs() < 1e-6);
        }
    }

    #[test]
    fn test_key_points_for_lsl() {
        let (start, end) = lsl_case();
        let keys = solve(&start, &end, RHO).expect("path").key_points();
        assert!((keys.first_center.x + 400.0).abs() < 1e-6);
        assert!(keys.first_center.z.abs() < 1e-6);
        assert!((keys.first.x + 400.0).abs() < 1e-6);
        assert!((keys.first.z + 400.0).abs() < 1e-6);
        assert!((keys.second.x + 3600.0).abs() < 1e-6);
        assert!((keys.second.z + 400.0).abs() < 1e-6);
        assert!((keys.second_center.x + 3600.0).abs() < 1e-6);
        assert!(keys.middle_center.is_none());
        // 直線区間の長さは p·ρ
        let straight = keys.first.position().distance(&keys.second.position());
        assert!((straight - 8.0 * RHO).abs() < 1e-6);
    }

    #[test]
    fn test_non_positive_radius_has_no_path() {
        let (start, end) = lsl_case();
        assert!(solve(&start, &end, -1.0).is_none());
        assert!(solve(&start, &end, 0.0).is_none());
        assert!(family_cost(&start, &end, -5.0, PathFamily::Lsl).is_none());
    }

    #[test]
    fn test_short_hop_uses_three_arc_family() {
        // 近距離で逆向きに戻る場合は CCC 族が候補に入る
        let start = Pose2::new(0.0, 0.0, 0.0);
        let end = Pose2::new(0.0, 100.0, 0.0);
        assert!(family_cost(&start, &end, RHO, PathFamily::Rlr).is_some()
            || family_cost(&start, &end, RHO, PathFamily::Lrl).is_some());
        assert!(solve(&start, &end, RHO).is_some());
    }
}
