use crate::models::common::{Point2, Point3, Vector3};
use serde::{Deserialize, Serialize};

/// 地上チェックポイントの高度
pub const GROUND_LEVEL: f64 = -1.0;
/// 着陸進入点の高度 (m)
pub const APPROACH_HEIGHT: f64 = 40.0;
/// 着陸進入点の横方向オフセット (m)
const APPROACH_OFFSET: f64 = 700.0;
/// ゲートの空港端からの距離 (m)
const GATE_INSET: f64 = 35.0;
/// 離陸滑走開始点の空港端からの距離 (m)
const SECOND_LANE_INSET: f64 = 150.0;

/// ゲート番号
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gate {
    Zero,
    One,
}

impl Gate {
    pub fn index(self) -> usize {
        match self {
            Gate::Zero => 0,
            Gate::One => 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(Gate::Zero),
            1 => Some(Gate::One),
            _ => None,
        }
    }

    /// 反対側のゲート
    pub fn other(self) -> Self {
        match self {
            Gate::Zero => Gate::One,
            Gate::One => Gate::Zero,
        }
    }
}

/// 全空港共通の寸法
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AirportDimensions {
    pub length: f64, // m
    pub width: f64,  // m
}

impl Default for AirportDimensions {
    fn default() -> Self {
        Self { length: 70.0, width: 250.0 }
    }
}

/// 空港の幾何形状
///
/// 生成時に全チェックポイントを計算し、以後は変更しない。
/// `runway_direction` は中心から滑走路 0 側への単位ベクトル (X, Z)。
#[derive(Debug, Clone, PartialEq)]
pub struct Airport {
    pub id: usize,
    pub center: Point2,
    pub runway_direction: Point2,
    pub dimensions: AirportDimensions,
    gates: [Point3; 2],
    start_lane: [Point3; 2],
    start_second_lane: [Point3; 2],
    end_lane: [Point3; 2],
    prepare_landing: [Point3; 2],
}

impl Airport {
    /// 空港を定義する
    ///
    /// # 引数
    ///
    /// * `id` - 空港番号
    /// * `center` - 中心 (X, Z)
    /// * `runway_direction` - 滑走路 0 方向（正規化される）
    /// * `dimensions` - 全空港共通の長さ・幅
    pub fn new(id: usize, center: Point2, runway_direction: Point2, dimensions: AirportDimensions) -> Self {
        let norm = (runway_direction.x.powi(2) + runway_direction.z.powi(2)).sqrt();
        let (dx, dz) = if norm > 0.0 {
            (runway_direction.x / norm, runway_direction.z / norm)
        } else {
            (1.0, 0.0)
        };
        // チェックポイントは反転した滑走路方向を基準に組み立てる
        let r = Vector3::new(-dx, 0.0, -dz);
        // 滑走路と直交する方向
        let n = Vector3::new(r.z, 0.0, -r.x);
        let c = center.at_height(GROUND_LEVEL);
        let w = dimensions.width;
        let lane_offset = r * (dimensions.length / 2.0 + w / 2.0);

        let gate0 = c + n * (w - GATE_INSET);
        let gate1 = c - n * (w - GATE_INSET);
        let second0 = c - n * (w - SECOND_LANE_INSET) + lane_offset;
        let second1 = c + n * (w - SECOND_LANE_INSET) - lane_offset;
        let approach0 = (c - n * APPROACH_OFFSET + lane_offset).with_height(APPROACH_HEIGHT);
        let approach1 = (c + n * APPROACH_OFFSET - lane_offset).with_height(APPROACH_HEIGHT);

        Self {
            id,
            center,
            runway_direction: Point2::new(dx, dz),
            dimensions,
            gates: [gate0, gate1],
            start_lane: [gate1 + lane_offset, gate0 - lane_offset],
            start_second_lane: [second0, second1],
            end_lane: [gate0 + lane_offset, gate1 - lane_offset],
            prepare_landing: [approach0, approach1],
        }
    }

    /// 指定高度での中心点
    pub fn center_at(&self, height: f64) -> Point3 {
        self.center.at_height(height)
    }

    pub fn gate(&self, gate: Gate) -> Point3 {
        self.gates[gate.index()]
    }

    /// 離陸時のレーン進入点（レーン番号で指定）
    pub fn start_lane(&self, lane: Gate) -> Point3 {
        self.start_lane[lane.index()]
    }

    /// 離陸滑走開始点
    pub fn start_second_lane(&self, lane: Gate) -> Point3 {
        self.start_second_lane[lane.index()]
    }

    /// 着陸滑走の終端（ゲート手前）
    pub fn end_lane(&self, lane: Gate) -> Point3 {
        self.end_lane[lane.index()]
    }

    /// 着陸進入点
    pub fn prepare_landing(&self, lane: Gate) -> Point3 {
        self.prepare_landing[lane.index()]
    }

    /// ゲート周りの正方形（一辺 = 幅）内にいるか
    pub fn in_gate(&self, gate: Gate, position: &Point3) -> bool {
        let g = self.gate(gate);
        let half = self.dimensions.width / 2.0;
        (position.x - g.x).abs() <= half && (position.z - g.z).abs() <= half
    }

    /// 着陸のため待機円上で合わせる方位
    pub fn landing_heading(&self, gate: Gate) -> f64 {
        let (rx, rz) = (-self.runway_direction.x, -self.runway_direction.z);
        match gate {
            Gate::Zero => (-rx).atan2(-rz),
            Gate::One => rx.atan2(rz),
        }
    }

    /// 中心からの水平距離
    pub fn distance_to(&self, position: &Point3) -> f64 {
        self.center.distance(&position.horizontal())
    }
}
